use crate::commands::Command;
use crate::error::{Mk3Error, Result};
use crate::protocol::{self, Payload};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default connect deadline; generous for a LAN device that is booting.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default response deadline, deliberately shorter than the connect
/// deadline: MK3 responses arrive within tens of milliseconds when the
/// firmware is going to answer at all.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Responses are at most a short status frame or one text line.
const DEFAULT_READ_BUFFER: usize = 64;

/// Tunables for a single session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Deadline for the TCP handshake
    pub connect_timeout: Duration,
    /// Deadline for each response read, distinct from the connect deadline
    pub read_timeout: Duration,
    /// Upper bound on a single response read
    pub read_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Why a send failed, preserved as typed data for the harness and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailure {
    /// No response inside the read deadline
    Timeout,
    /// The device refused the connection
    Refused,
    /// The device dropped the connection (reset or EOF)
    Reset,
    /// Anything else the socket reported
    Other(String),
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("response timeout"),
            Self::Refused => f.write_str("connection refused"),
            Self::Reset => f.write_str("connection reset by device"),
            Self::Other(detail) => write!(f, "socket error: {detail}"),
        }
    }
}

/// Result of one command round trip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    /// Raw response bytes, kept even when parsing fails
    #[serde(serialize_with = "crate::protocol::serialize_hex")]
    pub raw: Vec<u8>,
    /// Wall-clock latency around the full write+read, in milliseconds
    pub latency_ms: f64,
    pub failure: Option<SendFailure>,
    /// Sniffed payload for successful responses
    pub payload: Option<Payload>,
}

impl CommandResponse {
    fn ok(raw: Vec<u8>, latency_ms: f64) -> Self {
        let payload = Some(protocol::decode(&raw));
        Self {
            success: true,
            raw,
            latency_ms,
            failure: None,
            payload,
        }
    }

    fn failed(failure: SendFailure, latency_ms: f64) -> Self {
        Self {
            success: false,
            raw: Vec::new(),
            latency_ms,
            failure: Some(failure),
            payload: None,
        }
    }

    /// Failure rendered for error lists, None on success
    pub fn error_text(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

/// One TCP session to one amplifier
///
/// Owns exactly one socket and is either connected or not; a command can
/// only be sent while connected. Commands are strictly ordered: the
/// protocol has no request IDs, so the session never pipelines and a
/// caller must await each response before the next send. Not safe to
/// share across tasks without external synchronization.
pub struct Session {
    settings: SessionSettings,
    stream: Option<TcpStream>,
    addr: String,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            stream: None,
            addr: String::new(),
        }
    }

    /// Establish the TCP connection, bounded by the connect timeout
    ///
    /// Performs no implicit queries. Returns the handshake latency in
    /// milliseconds. An existing connection is dropped first.
    pub async fn connect(&mut self, addr: &str) -> Result<f64> {
        self.disconnect().await;

        tracing::debug!(addr = %addr, timeout_ms = self.settings.connect_timeout.as_millis(), "connecting");
        let start = Instant::now();

        let stream = timeout(self.settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::warn!(addr = %addr, "connect timed out");
                Mk3Error::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(addr = %addr, error = %e, "connect failed");
                Mk3Error::ConnectionFailed {
                    detail: e.to_string(),
                }
            })?;

        // Commands are tiny and latency-sensitive; don't let Nagle batch them.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(addr = %addr, latency_ms = elapsed, "connected");

        self.stream = Some(stream);
        self.addr = addr.to_string();
        Ok(elapsed)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Address of the current or most recent connection
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and read one bounded response
    ///
    /// Returns `Err(NotConnected)` if called while disconnected; that is a
    /// caller error and no I/O happens. Runtime failures (timeout, reset,
    /// socket error) come back as a failed [`CommandResponse`] with a typed
    /// [`SendFailure`], and the session transitions to disconnected; the
    /// caller decides whether to reconnect.
    pub async fn send(&mut self, command: &Command) -> Result<CommandResponse> {
        let stream = self.stream.as_mut().ok_or(Mk3Error::NotConnected)?;
        let start = Instant::now();

        tracing::debug!(addr = %self.addr, command = %command, "sending");

        if let Err(e) = write_command(stream, command).await {
            let latency = start.elapsed().as_secs_f64() * 1000.0;
            let failure = map_io_failure(&e);
            tracing::warn!(addr = %self.addr, error = %e, "send failed");
            self.drop_stream();
            return Ok(CommandResponse::failed(failure, latency));
        }

        let mut buf = vec![0u8; self.settings.read_buffer];
        let response = match timeout(self.settings.read_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                // EOF: the device closed its end mid-session.
                tracing::warn!(addr = %self.addr, "device closed connection");
                self.drop_stream();
                CommandResponse::failed(SendFailure::Reset, elapsed_ms(start))
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                let latency = elapsed_ms(start);
                tracing::debug!(
                    addr = %self.addr,
                    response = %protocol::hex_string(&buf),
                    latency_ms = latency,
                    "received"
                );
                CommandResponse::ok(buf, latency)
            }
            Ok(Err(e)) => {
                let failure = map_io_failure(&e);
                tracing::warn!(addr = %self.addr, error = %e, "read failed");
                self.drop_stream();
                CommandResponse::failed(failure, elapsed_ms(start))
            }
            Err(_) => {
                tracing::debug!(
                    addr = %self.addr,
                    timeout_ms = self.settings.read_timeout.as_millis(),
                    "response timeout"
                );
                self.drop_stream();
                CommandResponse::failed(SendFailure::Timeout, elapsed_ms(start))
            }
        };

        Ok(response)
    }

    /// Close the connection; idempotent and safe in any state
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            tracing::debug!(addr = %self.addr, "disconnected");
        }
    }

    fn drop_stream(&mut self) {
        self.stream = None;
    }
}

async fn write_command(stream: &mut TcpStream, command: &Command) -> std::io::Result<()> {
    stream.write_all(command.as_bytes()).await?;
    stream.flush().await
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn map_io_failure(e: &std::io::Error) -> SendFailure {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => SendFailure::Timeout,
        ErrorKind::ConnectionRefused => SendFailure::Refused,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => SendFailure::Reset,
        _ => SendFailure::Other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(200),
            read_buffer: 64,
        }
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        // Amp answers the power query with a single status byte.
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[0xFF, 0x55, 0x01, 0x70]);
            stream.write_all(&[0x01]).await.unwrap();
        });

        let mut session = Session::new(fast_settings());
        let latency = session.connect(&addr).await.unwrap();
        assert!(latency >= 0.0);
        assert!(session.is_connected());

        let response = session.send(&Command::power_query()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.raw, vec![0x01]);
        assert_eq!(response.payload, Some(Payload::Binary(vec![0x01])));
        assert!(response.latency_ms >= 0.0);

        session.disconnect().await;
        assert!(!session.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_caller_error() {
        let mut session = Session::new(fast_settings());
        let result = session.send(&Command::power_query()).await;
        assert!(matches!(result, Err(Mk3Error::NotConnected)));
    }

    #[tokio::test]
    async fn read_timeout_disconnects_session() {
        let (listener, addr) = test_listener().await;

        // Server accepts, reads, and never answers.
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut session = Session::new(fast_settings());
        session.connect(&addr).await.unwrap();

        let response = session.send(&Command::power_query()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.failure, Some(SendFailure::Timeout));
        assert!(!session.is_connected());

        server.abort();
    }

    #[tokio::test]
    async fn peer_close_reports_reset() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut session = Session::new(fast_settings());
        session.connect(&addr).await.unwrap();
        server.await.unwrap();

        // Let the FIN propagate before we try the round trip.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = session.send(&Command::power_query()).await.unwrap();
        assert!(!response.success);
        assert!(matches!(
            response.failure,
            Some(SendFailure::Reset) | Some(SendFailure::Other(_))
        ));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn connect_refused() {
        let (listener, addr) = test_listener().await;
        drop(listener);

        let mut session = Session::new(fast_settings());
        let result = session.connect(&addr).await;
        assert!(matches!(result, Err(Mk3Error::ConnectionFailed { .. })));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut session = Session::new(fast_settings());
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());

        let (listener, addr) = test_listener().await;
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        session.connect(&addr).await.unwrap();
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn latency_reflects_device_delay() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            stream.write_all(&[0x00]).await.unwrap();
        });

        let mut session = Session::new(SessionSettings {
            read_timeout: Duration::from_secs(1),
            ..fast_settings()
        });
        session.connect(&addr).await.unwrap();

        let response = session.send(&Command::power_query()).await.unwrap();
        assert!(response.success);
        assert!(
            response.latency_ms >= 50.0,
            "latency {} should include device delay",
            response.latency_ms
        );

        server.await.unwrap();
    }
}
