// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration fresh from the environment and config file, so
//! they reflect what a new process would resolve.

use crate::config::{
    self, EffectiveConfig, ProcessConfig, CLEANUP_ON_CLOSE_KEY, CLEANUP_THRESHOLD_KEY,
    CONNECTIONS_ARE_POOLED_KEY, SESSIONS_ARE_POOLED_KEY, USE_SINGLE_DYNAMIC_REPLY_QUEUE_KEY,
};

/// Print effective config as key-value pairs (or JSON) to stdout.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to serialize config: {}", e);
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&ProcessConfig::default().effective_config());
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let cfg = config::load();
    let warnings = validate(&cfg);
    for w in &warnings {
        eprintln!("WARNING: {}", w);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validate(cfg: &ProcessConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if cfg.connections_are_pooled && cfg.use_single_dynamic_reply_queue {
        warnings.push(format!(
            "{} is ignored while {} is set; reply queues are created per call",
            USE_SINGLE_DYNAMIC_REPLY_QUEUE_KEY, CONNECTIONS_ARE_POOLED_KEY
        ));
    }
    if cfg.cleanup_threshold < 0 {
        warnings.push(format!(
            "{} is negative ({}); sources close only after extra close calls",
            CLEANUP_THRESHOLD_KEY, cfg.cleanup_threshold
        ));
    }
    if !cfg.cleanup_on_close {
        warnings.push(format!(
            "{} is false; sources are never torn down",
            CLEANUP_ON_CLOSE_KEY
        ));
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("{}={}", CONNECTIONS_ARE_POOLED_KEY, cfg.connections_are_pooled);
    println!("{}={}", SESSIONS_ARE_POOLED_KEY, cfg.sessions_are_pooled);
    println!("{}={}", USE_SINGLE_DYNAMIC_REPLY_QUEUE_KEY, cfg.use_single_dynamic_reply_queue);
    println!("{}={}", CLEANUP_ON_CLOSE_KEY, cfg.cleanup_on_close);
    println!("{}={}", CLEANUP_THRESHOLD_KEY, cfg.cleanup_threshold);
    println!("# effective single reply queue: {}", cfg.effective_single_dynamic_reply_queue);
    if let Some(path) = &cfg.config_file {
        println!("# config file: {}", path);
    }
}
