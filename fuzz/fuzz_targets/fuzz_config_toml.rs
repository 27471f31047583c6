//! Fuzz target for process configuration parsing.
//!
//! Arbitrary input must either parse or return an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use msg_source::ProcessConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        if let Ok(config) = ProcessConfig::from_toml_str(raw) {
            // Pooled connections must always disable the shared reply queue
            if config.connections_are_pooled {
                assert!(!config.effective_use_single_dynamic_reply_queue());
            }
        }
    }
});
