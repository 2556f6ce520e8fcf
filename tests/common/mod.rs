//! Common utilities for integration tests.
//!
//! This module provides helper functions for connecting to Redis,
//! appending stream entries and cleaning up after tests.
//!
//! ## Environment Variables
//!
//! - `REDIS_URL`: Redis connection URL (default: `redis://localhost:6379`)
//! - `REDIS_PORT`: Redis port for CLI commands (default: `6379`)

#![allow(dead_code)]

use std::process::Command;
use std::time::Duration;

/// Get the Redis URL from environment or default.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Default Redis port for CLI commands.
/// Override with REDIS_PORT env var for CI.
pub fn redis_port() -> u16 {
    std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379)
}

/// Check if Redis is available at the test port.
pub fn redis_available() -> bool {
    redis_cli_output(&["PING"]).is_some_and(|out| out == "PONG")
}

/// Run a redis-cli command and return success status.
pub fn redis_cli(args: &[&str]) -> bool {
    redis_cli_output(args).is_some()
}

/// Run a redis-cli command and return the output as a string.
pub fn redis_cli_output(args: &[&str]) -> Option<String> {
    let port_str = redis_port().to_string();
    let mut full_args = vec!["-p", &port_str];
    full_args.extend(args);

    Command::new("redis-cli")
        .args(&full_args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

/// Append an entry to a stream and return its ID.
pub fn xadd(stream: &str, fields: &[(&str, &str)]) -> String {
    let mut args = vec!["XADD", stream, "*"];
    for (k, v) in fields {
        args.push(*k);
        args.push(*v);
    }
    redis_cli_output(&args).expect("XADD failed")
}

/// Number of pending entries for a group, as reported by XPENDING.
pub fn pending_count(stream: &str, group: &str) -> u64 {
    redis_cli_output(&["XPENDING", stream, group])
        .and_then(|out| out.lines().next().and_then(|l| l.trim().parse().ok()))
        .unwrap_or(0)
}

/// Delete the given stream keys.
pub fn cleanup_streams(streams: &[&str]) {
    for stream in streams {
        redis_cli(&["DEL", stream]);
    }
}

/// Poll `check` every 50ms until it returns true or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
