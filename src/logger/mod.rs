//! Logger module
//!
//! Provides logging utilities for the service and the build pipeline:
//! - Server lifecycle logging (startup-complete signal, shutdown)
//! - Access logging with multiple formats
//! - Pipeline stage and verification progress
//! - Error and warning logging, file-based logging support

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::{AccessLogFormat, Config, LoggingConfig};
use std::net::SocketAddr;
use std::time::Duration;

/// Prefix of the startup-complete line; supervisors wait for it on stdout
pub const STARTUP_MARKER: &str = "[Startup] Started";

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &LoggingConfig) -> std::io::Result<()> {
    writer::init(
        config.access_log_file.as_deref(),
        config.error_log_file.as_deref(),
    )
}

/// Write to info/access log
fn write_info(message: &str) {
    match writer::get() {
        Some(w) => w.write_info(message),
        None => println!("{message}"),
    }
}

/// Write to error log
fn write_error(message: &str) {
    match writer::get() {
        Some(w) => w.write_error(message),
        None => eprintln!("{message}"),
    }
}

pub fn log_config_loaded(config: &Config) {
    write_info("[CONFIG] Loaded configuration:");
    write_info(&format!(
        "  - Listen: {}:{}",
        config.server.host, config.server.port
    ));
    match config.server.workers {
        Some(workers) => write_info(&format!("  - Worker threads: {workers}")),
        None => write_info("  - Worker threads: default (CPU cores)"),
    }
    write_info(&format!(
        "  - Shutdown grace: {}s",
        config.server.shutdown_grace_secs
    ));
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("  - Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("  - Error log: {path}"));
    }
    if let Some(status) = config.http.force_status {
        log_warning(&format!("Fault injection active: every route answers {status}"));
    }
}

/// Emit the startup-complete signal: wall-clock timestamp plus boot duration
pub fn log_startup_complete(addr: &SocketAddr, boot: Duration) {
    write_info(&format!(
        "{STARTUP_MARKER} {} in {:.3} seconds (ready at {}) on http://{addr}",
        env!("CARGO_PKG_NAME"),
        boot.as_secs_f64(),
        chrono::Local::now().to_rfc3339(),
    ));
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    write_info(&format!("[Connection] Accepted from: {peer_addr}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_headers_count(count: usize, show: bool) {
    if show {
        write_info(&format!("[Headers] Count: {count}"));
    }
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &AccessLogFormat) {
    write_info(&entry.format(format));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_shutdown_requested(signal: &str) {
    write_info(&format!("[Shutdown] {signal} received, no longer accepting connections"));
}

pub fn log_shutdown_draining(in_flight: usize, grace: Duration) {
    write_info(&format!(
        "[Shutdown] Waiting up to {}s for {in_flight} in-flight request(s)",
        grace.as_secs_f64()
    ));
}

pub fn log_shutdown_complete() {
    write_info("[Shutdown] All requests completed, exiting");
}

pub fn log_shutdown_timeout(aborted: usize, grace: Duration) {
    write_error(&format!(
        "[WARN] ShutdownTimeout: grace period of {}s elapsed, aborting {aborted} request(s)",
        grace.as_secs_f64()
    ));
}

pub fn log_pipeline_start(source: &str, workdir: &str) {
    write_info("======================================");
    write_info(&format!("[Pipeline] Source: {source}"));
    write_info(&format!("[Pipeline] Work dir: {workdir}"));
    write_info("======================================");
}

pub fn log_stage_started(stage: &str, command: &[String]) {
    write_info(&format!("[Stage] {stage}: {}", command.join(" ")));
}

pub fn log_stage_skipped(stage: &str) {
    write_info(&format!("[Stage] {stage}: skipped"));
}

pub fn log_stage_passed(stage: &str, duration_ms: u64) {
    write_info(&stage_passed_line(stage, duration_ms));
}

pub fn log_stage_failed(stage: &str, reason: &str) {
    write_error(&stage_failed_line(stage, reason));
}

fn stage_passed_line(stage: &str, duration_ms: u64) -> String {
    format!("[Stage] {stage}: ok in {duration_ms}ms")
}

fn stage_failed_line(stage: &str, reason: &str) -> String {
    format!("[Stage] {stage}: FAILED: {reason}")
}

pub fn log_stage_output(stage: &str, stream: &str, output: &str) {
    for line in output.lines() {
        write_error(&format!("[{stage} {stream}] {line}"));
    }
}

pub fn log_artifact(label: &str, path: &str, size: u64, sha256: &str) {
    write_info(&format!("[Artifact] {label}: {path} ({size} bytes, sha256 {sha256})"));
}

pub fn log_verify_probe(method: &str, path: &str, status: u16, ok: bool) {
    write_info(&verify_probe_line(method, path, status, ok));
}

fn verify_probe_line(method: &str, path: &str, status: u16, ok: bool) -> String {
    let mark = if ok { "ok" } else { "FAILED" };
    format!("[Verify] {method} {path} -> {status} {mark}")
}

pub fn log_pipeline_finished(state: &str, duration_ms: u64) {
    write_info(&format!("[Pipeline] Finished in state {state} after {duration_ms}ms"));
}
