// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! CLI subcommands for msg-source.
//!
//! ## Usage
//!
//! ```bash
//! msg-source-cli config show      # Effective configuration
//! msg-source-cli config validate  # Check for misconfiguration
//! msg-source-cli demo --pooled    # Exercise a source against the in-memory broker
//! ```

pub mod config_cmd;
pub mod demo_cmd;

pub use demo_cmd::{DemoOptions, DemoReport};

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
