//! Pinned transport connections.
//!
//! A [`Connection`] owns one transport to a `(scheme, host, port)` triple
//! and is reused only for an exact match. The transport itself is opaque:
//! TLS lives behind the [`Dialer`] seam, which receives the scheme flag
//! and the server name for SNI and verification. Readiness waits go
//! through `poll(2)` with one per-socket timeout bounding every I/O wait;
//! a `None` timeout means wait forever.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;

use crate::http::HttpError;
use crate::log::debug;
use crate::uri::{Scheme, Uri};

// ===== Transport =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
}

/// An opaque byte stream, already connected and (for https) already
/// through its handshake.
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Wait until the stream is ready for `mode`; `Ok(false)` is a
    /// timeout.
    fn ready(&mut self, mode: Readiness, timeout: Option<Duration>) -> io::Result<bool>;
}

/// Plain TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpTransport> {
        let addrs = (host, port).to_socket_addrs()?;
        let mut last = io::Error::new(io::ErrorKind::NotFound, "no address for host");
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(TcpTransport { stream });
                }
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)
    }

    fn ready(&mut self, mode: Readiness, timeout: Option<Duration>) -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events: match mode {
                Readiness::Readable => libc::POLLIN,
                Readiness::Writable => libc::POLLOUT,
            },
            revents: 0,
        };
        // -1 means infinite
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        loop {
            let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(rc > 0);
        }
    }
}

// ===== Dialer =====

/// A possible error value when opening a transport.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// TLS handshake failed. Final for the URL, exit status 5.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    /// Certificate verification failed. Final for the URL, exit status 5.
    #[error("certificate verification failed: {0}")]
    Certificate(String),
    /// The dialer has no TLS support configured.
    #[error("no TLS transport configured for https")]
    TlsUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DialError {
    /// Handshake-class failures never retry.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DialError::Handshake(_) | DialError::Certificate(_) | DialError::TlsUnavailable
        )
    }
}

/// Opens transports. `host` doubles as the server name for SNI and
/// certificate verification when `scheme` is https.
pub trait Dialer: Send + Sync {
    fn dial(
        &self,
        scheme: Scheme,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>, DialError>;
}

/// Plain-TCP dialer; https is refused until a TLS-capable [`Dialer`] is
/// installed.
#[derive(Debug, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(
        &self,
        scheme: Scheme,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>, DialError> {
        if matches!(scheme, Scheme::Https) {
            return Err(DialError::TlsUnavailable);
        }
        Ok(Box::new(TcpTransport::connect(host, port, timeout)?))
    }
}

// ===== Connection =====

/// One open transport pinned to `(scheme, host, port)`.
pub struct Connection {
    transport: Box<dyn Transport>,
    scheme: Scheme,
    host: String,
    port: u16,
    /// Scratch buffer reused across responses; may hold pipelined bytes.
    pub(crate) buf: BytesMut,
    abort: AtomicBool,
    global_abort: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        transport: Box<dyn Transport>,
        scheme: Scheme,
        host: String,
        port: u16,
        timeout: Option<Duration>,
        global_abort: Arc<AtomicBool>,
    ) -> Connection {
        Connection {
            transport,
            scheme,
            host,
            port,
            buf: BytesMut::with_capacity(16 * 1024),
            abort: AtomicBool::new(false),
            global_abort,
            timeout,
        }
    }

    /// Reuse requires the exact `(scheme, host, port)` pin.
    pub fn matches(&self, uri: &Uri) -> bool {
        self.scheme == uri.scheme() && self.port == uri.port() && self.host == uri.host()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Soft-abort the current transfer.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.global_abort.load(Ordering::Relaxed)
    }

    /// Read some bytes, appending to `buf`. `Ok(0)` is end of stream.
    ///
    /// Both abort flags are consulted before blocking.
    pub fn read_some(&mut self, buf: &mut BytesMut) -> Result<usize, HttpError> {
        if self.aborted() {
            return Err(HttpError::Aborted);
        }
        if !self.transport.ready(Readiness::Readable, self.timeout)? {
            return Err(HttpError::Io(io::ErrorKind::TimedOut.into()));
        }
        let mut chunk = [0u8; 16 * 1024];
        let n = self.transport.read(&mut chunk)?;
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Like [`read_some`](Self::read_some) but never past `limit` bytes.
    pub fn read_capped(&mut self, buf: &mut BytesMut, limit: usize) -> Result<usize, HttpError> {
        if self.aborted() {
            return Err(HttpError::Aborted);
        }
        if !self.transport.ready(Readiness::Readable, self.timeout)? {
            return Err(HttpError::Io(io::ErrorKind::TimedOut.into()));
        }
        let mut chunk = [0u8; 16 * 1024];
        let cap = limit.min(chunk.len());
        let n = self.transport.read(&mut chunk[..cap])?;
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if self.aborted() {
            return Err(HttpError::Aborted);
        }
        if !self.transport.ready(Readiness::Writable, self.timeout)? {
            return Err(HttpError::Io(io::ErrorKind::TimedOut.into()));
        }
        self.transport.write_all(data)?;
        Ok(())
    }
}

// ===== Proxy rotation =====

/// Round-robin proxy lists, one per scheme.
#[derive(Debug, Default)]
pub struct ProxyRing {
    http: Vec<(String, u16)>,
    https: Vec<(String, u16)>,
    next: Mutex<(usize, usize)>,
}

impl ProxyRing {
    pub fn new(http: Vec<(String, u16)>, https: Vec<(String, u16)>) -> ProxyRing {
        ProxyRing { http, https, next: Mutex::new((0, 0)) }
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.https.is_empty()
    }

    /// Next proxy for `scheme`, rotating under the proxy mutex.
    pub fn pick(&self, scheme: Scheme) -> Option<(String, u16)> {
        let list = match scheme {
            Scheme::Http => &self.http,
            Scheme::Https => &self.https,
        };
        if list.is_empty() {
            return None;
        }
        let mut next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match scheme {
            Scheme::Http => &mut next.0,
            Scheme::Https => &mut next.1,
        };
        let picked = list[*slot % list.len()].clone();
        *slot = slot.wrapping_add(1);
        debug!("proxy {}:{}", picked.0, picked.1);
        Some(picked)
    }
}
