//! Debounced press / long-press classification for the three front-panel buttons.
//!
//! Per button we keep the raw level with the time it last changed, the
//! debounced level, the time the debounced press began and one latch that
//! records whether a `Hold` was already emitted for the current press.
use grinder_traits::ButtonLevels;

use crate::config::InputCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Left,
    Right,
    Start,
}

impl Button {
    pub const ALL: [Self; 3] = [Self::Left, Self::Right, Self::Start];

    const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Start => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressKind {
    /// Released before the long-press threshold.
    Press,
    /// Held past the long-press threshold; emitted once per press.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: Button,
    pub kind: PressKind,
}

impl ButtonEvent {
    pub const fn press(button: Button) -> Self {
        Self {
            button,
            kind: PressKind::Press,
        }
    }

    pub const fn hold(button: Button) -> Self {
        Self {
            button,
            kind: PressKind::Hold,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tracker {
    raw: bool,
    raw_since_ms: u64,
    pressed: bool,
    press_start_ms: u64,
    hold_fired: bool,
}

#[derive(Debug, Clone)]
pub struct InputClassifier {
    debounce_ms: u64,
    longpress_ms: u64,
    buttons: [Tracker; 3],
}

impl InputClassifier {
    pub fn new(cfg: &InputCfg) -> Self {
        Self {
            debounce_ms: cfg.debounce_ms,
            longpress_ms: cfg.longpress_ms,
            buttons: [Tracker::default(); 3],
        }
    }

    /// Feed one raw level for `button` observed at `now_ms`.
    pub fn sample(&mut self, button: Button, level: bool, now_ms: u64) -> Option<ButtonEvent> {
        let t = &mut self.buttons[button.index()];
        if level != t.raw {
            t.raw = level;
            t.raw_since_ms = now_ms;
        }

        if t.raw != t.pressed && now_ms.saturating_sub(t.raw_since_ms) >= self.debounce_ms {
            t.pressed = t.raw;
            if t.pressed {
                t.press_start_ms = t.raw_since_ms;
                t.hold_fired = false;
            } else {
                let fired = std::mem::take(&mut t.hold_fired);
                if !fired {
                    return Some(ButtonEvent::press(button));
                }
                return None;
            }
        }

        if t.pressed
            && !t.hold_fired
            && now_ms.saturating_sub(t.press_start_ms) >= self.longpress_ms
        {
            t.hold_fired = true;
            return Some(ButtonEvent::hold(button));
        }
        None
    }

    /// Feed a snapshot of all three buttons; events come out in left, right, start order.
    pub fn poll(&mut self, levels: ButtonLevels, now_ms: u64) -> Vec<ButtonEvent> {
        Button::ALL
            .iter()
            .filter_map(|&b| {
                let level = match b {
                    Button::Left => levels.left,
                    Button::Right => levels.right,
                    Button::Start => levels.start,
                };
                self.sample(b, level, now_ms)
            })
            .collect()
    }

    /// Debounced level of `button`.
    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons[button.index()].pressed
    }
}
