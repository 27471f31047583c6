// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! msg-source CLI entry point.
//!
//! ## CLI Subcommands
//!
//! - `msg-source-cli config show|defaults|validate` - Inspect configuration
//! - `msg-source-cli demo` - Run concurrent workers against the in-memory broker
//! - `msg-source-cli version` - Show version information

use std::process::ExitCode;

use msg_source::cli::{config_cmd, demo_cmd, flag_value, has_flag, DemoOptions};
use msg_source::config::ProcessConfig;
use msg_source::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("Logging disabled: {}", e);
    }

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(has_flag(&args, "--json")) as u8),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "demo" => run_demo(&args).await,
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("msg-source {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_demo(args: &[String]) -> ExitCode {
    let mut options = DemoOptions::default();
    if has_flag(args, "--pooled") {
        options.config = ProcessConfig {
            connections_are_pooled: true,
            ..options.config
        };
    }
    if let Some(raw) = flag_value(args, "--workers") {
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => options.workers = n,
            _ => {
                eprintln!("Invalid --workers value: {}", raw);
                return ExitCode::from(2u8);
            }
        }
    }
    if let Some(raw) = flag_value(args, "--iterations") {
        match raw.parse::<usize>() {
            Ok(n) => options.iterations = n,
            Err(_) => {
                eprintln!("Invalid --iterations value: {}", raw);
                return ExitCode::from(2u8);
            }
        }
    }

    match demo_cmd::run_demo(options).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(out) => println!("{}", out),
                Err(e) => eprintln!("Failed to serialize report: {}", e),
            }
            if report.leaked_connections == 0 && report.leaked_sessions == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "msg-source - shared broker connection and session manager v{}

USAGE:
    msg-source-cli [COMMAND] [OPTIONS]

COMMANDS:
    config       Inspect configuration (show, defaults, validate)
    demo         Run concurrent workers against an in-memory broker
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    MSG_SOURCE_CONFIG                          TOML config file
    MSG_SOURCE_CONNECTIONS_ARE_POOLED          Connection per session (default: false)
    MSG_SOURCE_SESSIONS_ARE_POOLED             Reserved (default: false)
    MSG_SOURCE_USE_SINGLE_DYNAMIC_REPLY_QUEUE  Shared reply queue (default: true)
    MSG_SOURCE_CLEANUP_ON_CLOSE                Tear down on last close (default: true)
    MSG_SOURCE_CLEANUP_THRESHOLD               Teardown threshold (default: 0)
    MSG_SOURCE_LOG                             Log filter (default: info)
    MSG_SOURCE_LOG_FORMAT                      json or pretty (default: json)

EXIT CODES:
    0  Success
    1  Failure
    2  Invalid arguments
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "config" => {
            eprintln!(
                "msg-source-cli config - Inspect configuration

USAGE:
    msg-source-cli config show [--json]
    msg-source-cli config defaults
    msg-source-cli config validate

DESCRIPTION:
    Configuration is layered: compiled defaults, then the TOML file named by
    MSG_SOURCE_CONFIG, then MSG_SOURCE_* environment variables.
"
            );
        }
        "demo" => {
            eprintln!(
                "msg-source-cli demo - Exercise a shared source

USAGE:
    msg-source-cli demo [--pooled] [--workers N] [--iterations M]

OPTIONS:
    --pooled          Use a private connection per session
    --workers N       Concurrent workers (default: CPU count)
    --iterations M    Request/reply cycles per worker (default: 10)

DESCRIPTION:
    Every worker shares one source, creates sessions and reply queues and
    releases them. Prints a JSON report; exits 1 if anything leaked.
"
            );
        }
        _ => {
            eprintln!("No detailed help for: {}", command);
            print_usage();
        }
    }
}
