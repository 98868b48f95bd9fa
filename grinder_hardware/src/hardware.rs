//! GPIO-backed implementations of the grinder traits (Raspberry Pi via rppal).
use std::time::Duration;

use grinder_traits::{BoxError, ButtonLevels, ButtonPanel, Direction, Esc, Motor, Scale};
use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::error::{HwError, Result};
use crate::hx711::Hx711;

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

fn pwm_err(e: rppal::gpio::Error) -> HwError {
    HwError::Pwm(e.to_string())
}

pub struct HardwareScale {
    hx711: Hx711,
    max_retries: u32,
}

impl HardwareScale {
    pub fn new(dt_pin: u8, sck_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let dt = gpio.get(dt_pin).map_err(gpio_err)?.into_input();
        let sck = gpio.get(sck_pin).map_err(gpio_err)?.into_output();
        Ok(Self {
            hx711: Hx711::new(dt, sck, 25)?,
            max_retries: 3,
        })
    }
}

impl Scale for HardwareScale {
    fn read(&mut self, timeout: Duration) -> std::result::Result<i32, BoxError> {
        let mut attempts = 0;
        loop {
            match self.hx711.read_with_timeout(timeout) {
                Ok(raw) => return Ok(raw),
                Err(HwError::Timeout) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(retries = attempts, "scale timeout, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "scale read failed");
                    return Err(Box::new(e));
                }
            }
        }
    }
}

/// Step/dir stepper driver with an active-low enable line.
///
/// The step train is generated by rppal's software PWM at 50% duty.
pub struct StepDirMotor {
    step: OutputPin,
    dir: OutputPin,
    enable: OutputPin,
    speed_sps: u32,
    running: bool,
}

impl StepDirMotor {
    pub fn new(step_pin: u8, dir_pin: u8, enable_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let step = gpio.get(step_pin).map_err(gpio_err)?.into_output_low();
        let dir = gpio.get(dir_pin).map_err(gpio_err)?.into_output_low();
        let enable = gpio.get(enable_pin).map_err(gpio_err)?.into_output_high();
        Ok(Self {
            step,
            dir,
            enable,
            speed_sps: 0,
            running: false,
        })
    }

    fn apply(&mut self) -> Result<()> {
        if !self.running || self.speed_sps == 0 {
            self.step.clear_pwm().map_err(pwm_err)?;
            self.step.set_low();
            return Ok(());
        }
        self.step
            .set_pwm_frequency(f64::from(self.speed_sps), 0.5)
            .map_err(pwm_err)
    }
}

impl Motor for StepDirMotor {
    fn set_speed(&mut self, steps_per_sec: u32) -> std::result::Result<(), BoxError> {
        self.speed_sps = steps_per_sec;
        self.apply()?;
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction) -> std::result::Result<(), BoxError> {
        match direction {
            Direction::Forward => self.dir.set_low(),
            Direction::Reverse => self.dir.set_high(),
        }
        Ok(())
    }

    fn start(&mut self) -> std::result::Result<(), BoxError> {
        self.enable.set_low();
        self.running = true;
        self.apply()?;
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.running = false;
        self.apply()?;
        self.enable.set_high();
        Ok(())
    }
}

/// Servo-style ESC driven by a 50 Hz PWM frame.
pub struct PwmEsc {
    pin: OutputPin,
}

const ESC_FRAME: Duration = Duration::from_millis(20);

impl PwmEsc {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        Ok(Self {
            pin: gpio.get(pin).map_err(gpio_err)?.into_output_low(),
        })
    }
}

impl Esc for PwmEsc {
    fn set_pulse_us(&mut self, pulse_us: u16) -> std::result::Result<(), BoxError> {
        self.pin
            .set_pwm(ESC_FRAME, Duration::from_micros(u64::from(pulse_us)))
            .map_err(pwm_err)?;
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.pin.clear_pwm().map_err(pwm_err)?;
        self.pin.set_low();
        Ok(())
    }
}

pub struct GpioButtons {
    left: InputPin,
    right: InputPin,
    start: InputPin,
    active_high: bool,
}

impl GpioButtons {
    pub fn new(left: u8, right: u8, start: u8, active_high: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = |n: u8| -> Result<InputPin> {
            let p = gpio.get(n).map_err(gpio_err)?;
            Ok(if active_high {
                p.into_input_pulldown()
            } else {
                p.into_input_pullup()
            })
        };
        Ok(Self {
            left: pin(left)?,
            right: pin(right)?,
            start: pin(start)?,
            active_high,
        })
    }
}

impl ButtonPanel for GpioButtons {
    fn levels(&mut self) -> std::result::Result<ButtonLevels, BoxError> {
        let pressed = |p: &InputPin| p.is_high() == self.active_high;
        Ok(ButtonLevels {
            left: pressed(&self.left),
            right: pressed(&self.right),
            start: pressed(&self.start),
        })
    }
}
