#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing and validation must reject bad input with errors, never panics.
    if let Ok(cfg) = toml::from_str::<grinder_config::Config>(data) {
        let _ = cfg.validate();
    }
});
