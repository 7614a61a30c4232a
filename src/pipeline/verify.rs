//! Post-build smoke test of a packaged artifact.
//!
//! The executable runs as a sandboxed child process: empty environment,
//! private working directory, loopback port. It must print the startup
//! marker in time and answer every declared probe as expected.

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::config::{Probe, VerifySettings};
use crate::logger::{self, STARTUP_MARKER};

/// The packaged artifact does not behave as declared; it must not ship.
#[derive(Debug, Error)]
pub enum VerificationFailure {
    #[error("no probes declared")]
    NoProbes,

    #[error("sandbox setup failed: {0}")]
    Sandbox(#[source] io::Error),

    #[error("could not start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("artifact did not report startup within {} seconds", .timeout.as_secs())]
    StartupTimeout { timeout: Duration },

    #[error("artifact exited before it was ready ({status}): {stderr}")]
    ExitedEarly { status: String, stderr: String },

    #[error("{method} {path}: request failed: {reason}")]
    Request {
        method: String,
        path: String,
        reason: String,
    },

    #[error("{method} {path}: expected status {expected}, got {actual}")]
    StatusMismatch {
        method: String,
        path: String,
        expected: u16,
        actual: u16,
    },

    #[error("{method} {path}: expected body {expected:?}, got {actual:?}")]
    BodyMismatch {
        method: String,
        path: String,
        expected: String,
        actual: String,
    },
}

/// Successful probe answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub probe: Probe,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    /// Spawn to startup marker
    pub startup: Duration,
    pub probes: Vec<ProbeResult>,
}

/// Run `executable` inside `sandbox_dir` and probe it.
///
/// The child is killed when this returns, whatever the outcome.
pub async fn verify_artifact(
    settings: &VerifySettings,
    executable: &Path,
    sandbox_dir: &Path,
) -> Result<VerifyReport, VerificationFailure> {
    if settings.probes.is_empty() {
        return Err(VerificationFailure::NoProbes);
    }

    prepare_sandbox(sandbox_dir).map_err(VerificationFailure::Sandbox)?;
    let port = free_port().map_err(VerificationFailure::Sandbox)?;

    let started = Instant::now();
    let mut child = Command::new(executable)
        .env_clear()
        .env("PORT", port.to_string())
        .env("HELLO__SERVER__HOST", "127.0.0.1")
        .envs(settings.env_pairs())
        .current_dir(sandbox_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| VerificationFailure::Spawn {
            path: executable.to_path_buf(),
            source,
        })?;

    let result = probe_child(&mut child, settings, port, started).await;
    let _ = child.kill().await;
    result
}

async fn probe_child(
    child: &mut Child,
    settings: &VerifySettings,
    port: u16,
    started: Instant,
) -> Result<VerifyReport, VerificationFailure> {
    wait_for_startup(child, settings.startup_timeout()).await?;
    let startup = started.elapsed();

    let mut probes = Vec::with_capacity(settings.probes.len());
    for probe in &settings.probes {
        let (status, body) = send_probe(port, probe, settings.request_timeout()).await?;
        let status_ok = status == probe.expect_status;
        let body_ok = probe.expect_body.as_ref().map_or(true, |b| *b == body);
        logger::log_verify_probe(&probe.method, &probe.path, status, status_ok && body_ok);

        if !status_ok {
            return Err(VerificationFailure::StatusMismatch {
                method: probe.method.clone(),
                path: probe.path.clone(),
                expected: probe.expect_status,
                actual: status,
            });
        }
        if let Some(expected) = probe.expect_body.as_ref().filter(|_| !body_ok) {
            return Err(VerificationFailure::BodyMismatch {
                method: probe.method.clone(),
                path: probe.path.clone(),
                expected: expected.clone(),
                actual: body,
            });
        }
        probes.push(ProbeResult {
            probe: probe.clone(),
            status,
            body,
        });
    }

    Ok(VerifyReport { startup, probes })
}

/// Read the child's stdout until the startup marker shows up.
///
/// Everything here, including reaping a child that closed stdout, shares one
/// deadline; the caller kills the child whatever the outcome.
async fn wait_for_startup(child: &mut Child, timeout: Duration) -> Result<(), VerificationFailure> {
    let deadline = Instant::now() + timeout;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| VerificationFailure::Sandbox(io::Error::other("child stdout not captured")))?;
    let mut lines = BufReader::new(stdout).lines();

    let ready = tokio::time::timeout_at(deadline.into(), async {
        while let Some(line) = lines.next_line().await? {
            if line.contains(STARTUP_MARKER) {
                return Ok(true);
            }
        }
        Ok::<bool, io::Error>(false)
    })
    .await;

    match ready {
        Err(_) => Err(VerificationFailure::StartupTimeout { timeout }),
        Ok(Err(e)) => Err(VerificationFailure::Sandbox(e)),
        Ok(Ok(false)) => {
            // stdout closed: the process is gone, or it only closed the pipe
            let status = match tokio::time::timeout_at(deadline.into(), child.wait()).await {
                Err(_) => return Err(VerificationFailure::StartupTimeout { timeout }),
                Ok(Ok(status)) => status.to_string(),
                Ok(Err(e)) => e.to_string(),
            };
            // A leftover grandchild may hold stderr open; report without it
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = tokio::time::timeout_at(deadline.into(), pipe.read_to_string(&mut stderr)).await;
            }
            Err(VerificationFailure::ExitedEarly {
                status,
                stderr: stderr.trim().to_string(),
            })
        }
        Ok(Ok(true)) => {
            // Keep both pipes drained so logging never blocks the child
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            if let Some(mut pipe) = child.stderr.take() {
                tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await;
                });
            }
            Ok(())
        }
    }
}

async fn send_probe(
    port: u16,
    probe: &Probe,
    timeout: Duration,
) -> Result<(u16, String), VerificationFailure> {
    let request_failed = |reason: String| VerificationFailure::Request {
        method: probe.method.clone(),
        path: probe.path.clone(),
        reason,
    };

    tokio::time::timeout(timeout, request(port, probe))
        .await
        .map_err(|_| request_failed(format!("no answer within {} seconds", timeout.as_secs())))?
        .map_err(request_failed)
}

async fn request(port: u16, probe: &Probe) -> Result<(u16, String), String> {
    let method = Method::from_bytes(probe.method.as_bytes()).map_err(|e| e.to_string())?;
    let req = Request::builder()
        .method(method)
        .uri(probe.path.as_str())
        .header(HOST, format!("127.0.0.1:{port}"))
        .body(Empty::<Bytes>::new())
        .map_err(|e| e.to_string())?;

    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .map_err(|e| e.to_string())?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| e.to_string())?;
    let conn_task = tokio::spawn(conn);

    let response = sender.send_request(req).await.map_err(|e| e.to_string());
    let result = match response {
        Ok(resp) => {
            let status = resp.status().as_u16();
            resp.into_body()
                .collect()
                .await
                .map(|body| (status, String::from_utf8_lossy(&body.to_bytes()).into_owned()))
                .map_err(|e| e.to_string())
        }
        Err(e) => Err(e),
    };
    conn_task.abort();
    result
}

fn prepare_sandbox(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

/// Ask the OS for an unused loopback port
fn free_port() -> io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(startup_timeout_secs: u64) -> VerifySettings {
        VerifySettings {
            startup_timeout_secs,
            ..VerifySettings::default()
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-artifact");
        std::fs::write(&path, format!("#!/bin/sh\nPATH=/usr/bin:/bin\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_no_probes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(1);
        settings.probes.clear();
        let err = verify_artifact(&settings, Path::new("/bin/true"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::NoProbes));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_artifact(&settings(1), &dir.path().join("nope"), &dir.path().join("sb"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_artifact_exiting_early() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "echo 'bind failed' >&2; exit 1");
        let err = verify_artifact(&settings(5), &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        match err {
            VerificationFailure::ExitedEarly { stderr, .. } => assert_eq!(stderr, "bind failed"),
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_artifact_never_ready() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "echo booting; exec sleep 30");
        let started = Instant::now();
        let err = verify_artifact(&settings(1), &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::StartupTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_but_not_listening() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            &format!("echo '{STARTUP_MARKER} fake in 0.001 seconds'; exec sleep 30"),
        );
        let err = verify_artifact(&settings(5), &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, VerificationFailure::Request { path, .. } if path == "/hello"),
            "unexpected failure: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sandbox_environment_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        // Fails startup unless only the sandbox variables are present
        let exe = script(
            dir.path(),
            "[ -z \"$HOME\" ] || { echo \"HOME=$HOME\" >&2; exit 2; }\n\
             [ -n \"$PORT\" ] || exit 3\n\
             [ \"$EXTRA\" = yes ] || exit 4\n\
             exit 9",
        );
        let mut settings = settings(5);
        settings.env = vec!["EXTRA=yes".to_string()];
        let err = verify_artifact(&settings, &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        match err {
            VerificationFailure::ExitedEarly { status, .. } => {
                assert!(status.contains('9'), "{status}");
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_stdout_still_bounded_by_startup_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "exec >&-\nexec sleep 8");
        let started = Instant::now();
        let err = verify_artifact(&settings(1), &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, VerificationFailure::StartupTimeout { .. }),
            "unexpected failure: {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_held_by_grandchild_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "sleep 8 >/dev/null &\nexit 1");
        let started = Instant::now();
        let err = verify_artifact(&settings(1), &exe, &dir.path().join("sb"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, VerificationFailure::ExitedEarly { .. }),
            "unexpected failure: {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    }
}
