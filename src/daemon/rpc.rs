//! Length-prefixed JSON-RPC over the daemon's local socket.
//!
//! Frames are a 4-byte big-endian length followed by a JSON payload. Every
//! response carries the daemon's version; a client whose major/minor
//! disagrees refuses the daemon and falls back to direct mode.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{BeadsError, FallbackReason, Result};

/// Socket connect deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single frame; a mirror line tops out well below this.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// One RPC request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// One RPC response. `error` is set instead of `result` on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful response for a request id.
    #[must_use]
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            version: crate::BD_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Error response for a request id.
    #[must_use]
    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            version: crate::BD_VERSION.to_string(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Health payload returned by the `health` method.
#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub compatible: bool,
}

/// Write one frame to the stream.
///
/// # Errors
///
/// Returns an error if the payload exceeds the frame cap or the write fails.
pub fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME)
        .ok_or_else(|| BeadsError::Config(format!("RPC frame too large: {}", payload.len())))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Read one frame from the stream.
///
/// # Errors
///
/// Returns an error on malformed length, oversized frame, or read failure.
pub fn read_frame(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(BeadsError::Config(format!("RPC frame too large: {len}")));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Whether a daemon version is compatible with this client.
///
/// Major and minor must match; patch may differ.
#[must_use]
pub fn version_compatible(daemon_version: &str) -> bool {
    let Ok(theirs) = semver::Version::parse(daemon_version) else {
        return false;
    };
    let Ok(ours) = semver::Version::parse(crate::BD_VERSION) else {
        return false;
    };
    theirs.major == ours.major && theirs.minor == ours.minor
}

/// Client side of the daemon socket.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    next_id: u64,
}

impl DaemonClient {
    /// Create a client for a socket path. No connection happens until a
    /// call is made.
    #[must_use]
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            next_id: 1,
        }
    }

    fn connect(&self) -> Result<UnixStream> {
        let (tx, rx) = mpsc::channel();
        let path = self.socket_path.clone();
        thread::spawn(move || {
            let _ = tx.send(UnixStream::connect(&path));
        });

        let stream = match rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Daemon socket connect failed");
                return Err(BeadsError::DaemonUnavailable {
                    reason: FallbackReason::ConnectionRefused,
                });
            }
            Err(_) => {
                return Err(BeadsError::DaemonUnavailable {
                    reason: FallbackReason::Timeout,
                });
            }
        };

        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
        Ok(stream)
    }

    /// Call one method and return its result value.
    ///
    /// # Errors
    ///
    /// Returns `DaemonUnavailable` with the matching fallback reason on
    /// transport, timeout, version, or unsupported-method failures; other
    /// daemon-side errors surface as `Config` errors.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let mut stream = self.connect()?;

        let id = self.next_id;
        self.next_id += 1;

        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        write_frame(&mut stream, &serde_json::to_vec(&request)?)?;

        let payload = read_frame(&mut stream).map_err(|e| match e {
            BeadsError::Io(ref io)
                if io.kind() == std::io::ErrorKind::WouldBlock
                    || io.kind() == std::io::ErrorKind::TimedOut =>
            {
                BeadsError::DaemonUnavailable {
                    reason: FallbackReason::Timeout,
                }
            }
            other => other,
        })?;
        let response: Response = serde_json::from_slice(&payload)?;

        if !version_compatible(&response.version) {
            return Err(BeadsError::DaemonUnavailable {
                reason: FallbackReason::VersionMismatch,
            });
        }

        if let Some(error) = response.error {
            if error.starts_with("unsupported method") {
                return Err(BeadsError::DaemonUnavailable {
                    reason: FallbackReason::DaemonUnsupported,
                });
            }
            return Err(BeadsError::Config(format!("daemon error: {error}")));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Query daemon health.
    ///
    /// # Errors
    ///
    /// Returns `DaemonUnavailable` when the daemon cannot be reached.
    pub fn health(&mut self) -> Result<Health> {
        let value = self.call("health", json!({}))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the daemon to shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns `DaemonUnavailable` when the daemon cannot be reached.
    pub fn shutdown(&mut self) -> Result<()> {
        self.call("shutdown", json!({}))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn test_version_compatibility() {
        assert!(version_compatible(crate::BD_VERSION));
        assert!(!version_compatible("999.0.0"));
        assert!(!version_compatible("not-a-version"));

        let ours = semver::Version::parse(crate::BD_VERSION).unwrap();
        let patch_bump = format!("{}.{}.{}", ours.major, ours.minor, ours.patch + 1);
        assert!(version_compatible(&patch_bump));
    }

    #[test]
    fn test_frame_round_trip() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("test.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let payload = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, &payload).unwrap();
        });

        let mut stream = UnixStream::connect(&socket).unwrap();
        write_frame(&mut stream, b"{\"hello\":true}").unwrap();
        let echoed = read_frame(&mut stream).unwrap();
        assert_eq!(echoed, b"{\"hello\":true}");
        handle.join().unwrap();
    }

    #[test]
    fn test_client_connection_refused() {
        let temp = TempDir::new().unwrap();
        let mut client = DaemonClient::new(&temp.path().join("missing.sock"));
        let err = client.call("health", json!({})).unwrap_err();
        assert!(matches!(
            err,
            BeadsError::DaemonUnavailable {
                reason: FallbackReason::ConnectionRefused
            }
        ));
    }

    #[test]
    fn test_client_rejects_incompatible_version() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("old.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_frame(&mut stream).unwrap();
            let response = Response {
                id: 1,
                version: "0.1.0".to_string(),
                result: Some(json!({})),
                error: None,
            };
            write_frame(&mut stream, &serde_json::to_vec(&response).unwrap()).unwrap();
        });

        let mut client = DaemonClient::new(&socket);
        let err = client.call("health", json!({})).unwrap_err();
        assert!(matches!(
            err,
            BeadsError::DaemonUnavailable {
                reason: FallbackReason::VersionMismatch
            }
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_unsupported_method_maps_to_fallback() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let payload = read_frame(&mut stream).unwrap();
            let request: Request = serde_json::from_slice(&payload).unwrap();
            let response = Response::err(request.id, "unsupported method: frobnicate");
            write_frame(&mut stream, &serde_json::to_vec(&response).unwrap()).unwrap();
        });

        let mut client = DaemonClient::new(&socket);
        let err = client.call("frobnicate", json!({})).unwrap_err();
        assert!(matches!(
            err,
            BeadsError::DaemonUnavailable {
                reason: FallbackReason::DaemonUnsupported
            }
        ));
        handle.join().unwrap();
    }
}
