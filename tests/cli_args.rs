//! Integration tests for the shellcache binary
//!
//! Only exercises paths that need no network: help, argument errors and
//! listing a local cache directory.

use std::process::Command;
use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_shellcache"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute shellcache")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("shellcache"), "Help should mention shellcache");
    assert!(stdout.contains("install"), "Help should list install");
    assert!(stdout.contains("activate"), "Help should list activate");
    assert!(stdout.contains("fetch"), "Help should list fetch");
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_mode_prints_error_and_exits() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_str().unwrap();
    let output = run_cli(&["--cache-dir", dir, "fetch", "index.html", "--mode", "bogus"]);

    assert!(!output.status.success(), "Expected invalid mode to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid mode"),
        "Should print error message about invalid mode: {}",
        stderr
    );
}

#[test]
fn test_invalid_scope_prints_error_and_exits() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_str().unwrap();
    let output = run_cli(&["--cache-dir", dir, "--scope", "not-a-url", "list"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid scope"), "stderr: {}", stderr);
}

#[test]
fn test_list_empty_cache_dir() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_str().unwrap();
    let output = run_cli(&["--cache-dir", dir, "list"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No caches"));
}

#[test]
fn test_activate_needs_no_network() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_str().unwrap();

    let output = run_cli(&["--cache-dir", dir, "--cache-name", "v2", "activate"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Active cache: v2"), "stdout: {}", stdout);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use shellcache::cli::{parse_mode_arg, Cli, Command};
    use shellcache::http::RequestMode;

    #[test]
    fn test_cli_fetch_with_output() {
        let cli = Cli::parse_from(["shellcache", "fetch", "app.js", "-o", "/tmp/app.js"]);
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.url, "app.js");
                assert_eq!(args.output.unwrap().to_str(), Some("/tmp/app.js"));
            }
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_config_flag() {
        let cli = Cli::parse_from(["shellcache", "-c", "shell.toml", "install"]);
        assert_eq!(cli.config.unwrap().to_str(), Some("shell.toml"));
    }

    #[test]
    fn test_parse_mode_arg_navigate() {
        assert_eq!(parse_mode_arg("navigate").unwrap(), RequestMode::Navigate);
    }
}
