//! SSH client on top of the ssh2 crate.
//!
//! Password authentication only; host keys are not verified, matching how
//! network gear is usually reached from a management station.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{ErrorCode, Session};
use tracing::{debug, warn};

use super::{ExecOutput, SessionError, SshConnector, SshSession, SshTarget};

/// libssh2 `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// libssh2 `LIBSSH2_ERROR_PASSWORD_EXPIRED`.
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;

/// libssh2 `LIBSSH2_ERROR_AUTHENTICATION_FAILED`.
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;

/// Maximum captured output per stream (4MB).
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Pause between polls when neither stream has data.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Converts a timeout to libssh2 milliseconds, clamped to `u32`.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

fn is_timeout(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
}

fn map_io(err: &io::Error, timeout: Duration) -> SessionError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SessionError::Timeout(timeout),
        _ => SessionError::Command(err.to_string()),
    }
}

/// Maps a failed `userauth_password`.
///
/// Only an explicit rejection of the credentials is an authentication
/// failure. Disconnects and protocol errors during auth are connection
/// failures.
fn map_auth_error(err: &ssh2::Error, username: &str, timeout: Duration) -> SessionError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => SessionError::Timeout(timeout),
        ErrorCode::Session(
            LIBSSH2_ERROR_AUTHENTICATION_FAILED | LIBSSH2_ERROR_PASSWORD_EXPIRED,
        ) => SessionError::Authentication(format!("rejected for user {username}")),
        _ => SessionError::Connection(format!("SSH authentication aborted: {}", err.message())),
    }
}

/// Appends one chunk from `reader` to `out`.
///
/// Returns true if any bytes were read. Bytes past [`MAX_OUTPUT_BYTES`] are
/// read and discarded so the remote side never stalls on a full window.
fn read_chunk(
    reader: &mut impl Read,
    out: &mut Vec<u8>,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<bool, SessionError> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            let room = MAX_OUTPUT_BYTES.saturating_sub(out.len());
            out.extend_from_slice(&buf[..n.min(room)]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(map_io(&e, timeout)),
    }
}

/// Reads stdout and stderr in alternation until both are exhausted and
/// `finished` reports end of output.
///
/// The readers are expected to be non-blocking. Fails with
/// [`SessionError::Timeout`] once `timeout` has elapsed without the output
/// completing.
fn drain_streams(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    finished: impl Fn() -> bool,
    timeout: Duration,
) -> Result<(String, String), SessionError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = vec![0u8; 32 * 1024];

    loop {
        let got_out = read_chunk(stdout, &mut out, &mut buf, timeout)?;
        let got_err = read_chunk(stderr, &mut err, &mut buf, timeout)?;
        if got_out || got_err {
            continue;
        }
        if finished() {
            break;
        }
        if Instant::now() >= deadline {
            return Err(SessionError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// Connector that opens real SSH sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Opens a TCP stream to the first address that answers.
    fn dial(target: &SshTarget, timeout: Duration) -> Result<TcpStream, SessionError> {
        let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| {
                SessionError::Connection(format!("cannot resolve {}: {}", target.host, e))
            })?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => SessionError::Timeout(timeout),
            Some(e) => SessionError::Connection(e.to_string()),
            None => SessionError::Connection(format!("no addresses for {}", target.host)),
        })
    }
}

impl SshConnector for Ssh2Connector {
    fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError> {
        let tcp = Self::dial(target, timeout)?;
        set_socket_timeouts(&tcp, timeout)
            .map_err(|e| SessionError::Connection(format!("socket setup: {e}")))?;
        let socket = tcp
            .try_clone()
            .map_err(|e| SessionError::Connection(format!("socket setup: {e}")))?;

        let mut session =
            Session::new().map_err(|e| SessionError::Connection(format!("session init: {e}")))?;
        session.set_timeout(timeout_millis(timeout));
        session.set_tcp_stream(tcp);

        let mut opened = Ssh2Session {
            session,
            socket,
            closed: false,
        };

        if let Err(e) = opened.session.handshake() {
            opened.close();
            return Err(if is_timeout(&e) {
                SessionError::Timeout(timeout)
            } else {
                SessionError::Connection(format!("SSH handshake failed: {e}"))
            });
        }

        if let Err(e) = opened
            .session
            .userauth_password(&target.username, &target.password)
        {
            opened.close();
            return Err(map_auth_error(&e, &target.username, timeout));
        }

        if !opened.session.authenticated() {
            opened.close();
            return Err(SessionError::Authentication(format!(
                "rejected for user {}",
                target.username
            )));
        }

        Ok(Box::new(opened))
    }
}

/// Applies `timeout` to socket reads and writes.
fn set_socket_timeouts(tcp: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = Some(timeout.max(Duration::from_millis(1)));
    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)
}

/// An authenticated ssh2 session.
pub struct Ssh2Session {
    session: Session,
    /// Handle on the session's socket, kept to adjust its timeouts.
    socket: TcpStream,
    closed: bool,
}

impl SshSession for Ssh2Session {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, SessionError> {
        if self.closed {
            return Err(SessionError::Command("session is closed".to_string()));
        }

        self.session.set_timeout(timeout_millis(timeout));
        set_socket_timeouts(&self.socket, timeout).map_err(|e| map_io(&e, timeout))?;
        let map_ssh = |e: ssh2::Error| {
            if is_timeout(&e) {
                SessionError::Timeout(timeout)
            } else {
                SessionError::Command(e.to_string())
            }
        };

        let mut channel = self.session.channel_session().map_err(map_ssh)?;
        channel.exec(command).map_err(map_ssh)?;

        let mut out_stream = channel.stream(0);
        let mut err_stream = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_streams(&mut out_stream, &mut err_stream, || channel.eof(), timeout);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;

        if let Err(e) = channel.wait_close() {
            warn!("Channel close for '{}' failed: {}", command, e);
        }
        let exit_status = channel.exit_status().ok();

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!("SSH disconnect failed: {}", e);
        }
    }
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_timeout_millis_clamps() {
        assert_eq!(timeout_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(timeout_millis(Duration::ZERO), 1);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_io_timeouts_map_to_timeout() {
        let timeout = Duration::from_secs(3);
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(map_io(&err, timeout), SessionError::Timeout(timeout));
        let err = io::Error::other("reset");
        assert!(matches!(map_io(&err, timeout), SessionError::Command(_)));
    }

    #[test]
    fn test_only_credential_rejection_is_authentication() {
        let timeout = Duration::from_secs(3);
        let rejected = ssh2::Error::new(
            ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED),
            "Authentication failed",
        );
        assert!(matches!(
            map_auth_error(&rejected, "admin", timeout),
            SessionError::Authentication(_)
        ));

        let expired =
            ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_PASSWORD_EXPIRED), "expired");
        assert!(matches!(
            map_auth_error(&expired, "admin", timeout),
            SessionError::Authentication(_)
        ));

        // -13: socket disconnect, -14: protocol error
        for code in [-13, -14] {
            let err = ssh2::Error::new(ErrorCode::Session(code), "transport");
            assert!(matches!(
                map_auth_error(&err, "admin", timeout),
                SessionError::Connection(_)
            ));
        }

        let slow = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timeout");
        assert_eq!(map_auth_error(&slow, "admin", timeout), SessionError::Timeout(timeout));
    }

    /// Reader that yields `WouldBlock` until `ready` is set, then its data.
    struct Gated {
        data: io::Cursor<Vec<u8>>,
        ready: Rc<Cell<bool>>,
    }

    impl Read for Gated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ready.get() {
                self.data.read(buf)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    /// Reader that sets `done` once its data is exhausted.
    struct Flagging {
        data: io::Cursor<Vec<u8>>,
        done: Rc<Cell<bool>>,
    }

    impl Read for Flagging {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                self.done.set(true);
            }
            Ok(n)
        }
    }

    #[test]
    fn test_heavy_stderr_drains_before_stdout_arrives() {
        let stderr_done = Rc::new(Cell::new(false));
        let mut stdout = Gated {
            data: io::Cursor::new(b"done".to_vec()),
            ready: Rc::clone(&stderr_done),
        };
        let mut stderr = Flagging {
            data: io::Cursor::new(vec![b'e'; 200 * 1024]),
            done: Rc::clone(&stderr_done),
        };

        let (out, err) = drain_streams(
            &mut stdout,
            &mut stderr,
            || stderr_done.get(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(err.len(), 200 * 1024);
    }

    #[test]
    fn test_stalled_streams_time_out() {
        let never = Rc::new(Cell::new(false));
        let mut stdout = Gated {
            data: io::Cursor::new(Vec::new()),
            ready: Rc::clone(&never),
        };
        let mut stderr = Gated {
            data: io::Cursor::new(Vec::new()),
            ready: Rc::clone(&never),
        };
        let timeout = Duration::from_millis(50);

        let result = drain_streams(&mut stdout, &mut stderr, || false, timeout);
        assert_eq!(result, Err(SessionError::Timeout(timeout)));
    }

    #[test]
    fn test_output_is_capped() {
        let mut stdout = io::Cursor::new(vec![b'x'; MAX_OUTPUT_BYTES + 10]);
        let mut stderr = io::empty();
        let (out, err) =
            drain_streams(&mut stdout, &mut stderr, || true, Duration::from_secs(5)).unwrap();
        assert_eq!(out.len(), MAX_OUTPUT_BYTES);
        assert!(err.is_empty());
    }

    #[test]
    fn test_socket_timeouts_applied() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let timeout = Duration::from_secs(7);

        set_socket_timeouts(&tcp, timeout).unwrap();
        assert_eq!(tcp.read_timeout().unwrap(), Some(timeout));
        assert_eq!(tcp.write_timeout().unwrap(), Some(timeout));

        set_socket_timeouts(&tcp, Duration::ZERO).unwrap();
        assert_eq!(tcp.read_timeout().unwrap(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_unresolvable_host_is_connection_error() {
        let target = SshTarget::new("host.invalid", "admin", "pw");
        let result = Ssh2Connector::new().connect(&target, Duration::from_millis(200));
        assert!(matches!(result, Err(SessionError::Connection(_))));
    }
}
