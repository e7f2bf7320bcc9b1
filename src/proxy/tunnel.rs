//! CONNECT tunnelling
//!
//! A tunnel is an opaque byte pipe between the hijacked client connection and
//! a freshly dialled origin. Each direction is shaped independently: client →
//! origin at the profile's upload rate, origin → client at its download rate.

use async_trait::async_trait;
use hyper::ext::ReasonPhrase;
use hyper::upgrade::OnUpgrade;
use hyper::{Body, Request, Response, StatusCode, Uri};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::logging::log_transfer;
use crate::models::{Profile, TransferKind, TransferLog};
use crate::throttle::RateLimitedRelay;
use crate::utils::{build_error_response, log_connect_failure, log_connect_success, parse_connect_target};

/// Written to the client once the origin is connected; the raw stream follows
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

const CONNECT_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Anything a tunnel can relay through
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn TunnelStream>;

/// Opens the origin side of a tunnel
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP dialer
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

async fn apply_latency(profile: &Profile) {
    if profile.latency_ms > 0 {
        tokio::time::sleep(profile.latency()).await;
    }
}

async fn dial_origin(dialer: &dyn Dialer, host: &str, port: u16, start_time: Instant) -> io::Result<BoxedStream> {
    match dialer.dial(host, port).await {
        Ok(origin) => {
            log_connect_success(host, port, start_time.elapsed().as_millis());
            Ok(origin)
        }
        Err(e) => {
            log_connect_failure(host, port, start_time.elapsed().as_millis(), &e.to_string());
            Err(e)
        }
    }
}

/// Serve a CONNECT that opened a fresh client connection.
///
/// `client` is positioned just past the request head. On a dial failure the
/// client is dropped without a single byte written back.
pub async fn handle_raw_connect<S>(mut client: S, target: &str, profile: Profile, dialer: Arc<dyn Dialer>)
where
    S: TunnelStream,
{
    let start_time = Instant::now();
    apply_latency(&profile).await;

    let parsed = target
        .parse::<Uri>()
        .map_err(|e| e.to_string())
        .and_then(|uri| parse_connect_target(&uri));
    let (host, port) = match parsed {
        Ok(target) => target,
        Err(e) => {
            warn!("CONNECT {} rejected: {}", target, e);
            if let Err(e) = client.write_all(CONNECT_BAD_REQUEST).await {
                debug!("Client went away before the rejection: {}", e);
            }
            return;
        }
    };

    let origin = match dial_origin(dialer.as_ref(), &host, port, start_time).await {
        Ok(origin) => origin,
        Err(_) => return,
    };

    if let Err(e) = client.write_all(CONNECT_ESTABLISHED).await {
        debug!("Client went away before the tunnel to {}:{} opened: {}", host, port, e);
        return;
    }

    let record = TunnelSession::new(client, origin)
        .run(&format!("{}:{}", host, port), &profile)
        .await;
    log_transfer(&record);
}

/// Handle a CONNECT that arrived through hyper, i.e. on a connection that
/// already carried other requests.
///
/// The profile is captured by the caller once; a later switch does not touch
/// this tunnel. Without an upgrade handle the connection cannot be hijacked
/// and the request fails with 500. A dial failure comes back as `Err`, which
/// makes hyper drop the connection without answering.
pub async fn handle_connect_request(
    mut req: Request<Body>,
    profile: Profile,
    dialer: Arc<dyn Dialer>,
) -> Result<Response<Body>> {
    let start_time = Instant::now();
    apply_latency(&profile).await;

    let on_upgrade = match req.extensions_mut().remove::<OnUpgrade>() {
        Some(on_upgrade) => on_upgrade,
        None => {
            warn!("CONNECT {} rejected: connection cannot be hijacked", req.uri());
            return Ok(build_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "hijacking not supported",
            ));
        }
    };

    let (host, port) = match parse_connect_target(req.uri()) {
        Ok(target) => target,
        Err(e) => {
            warn!("{}", e);
            return Ok(build_error_response(StatusCode::BAD_REQUEST, "invalid CONNECT target"));
        }
    };

    let origin = dial_origin(dialer.as_ref(), &host, port, start_time)
        .await
        .map_err(Error::Io)?;

    let target = format!("{}:{}", host, port);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(client) => {
                let record = TunnelSession::new(client, origin).run(&target, &profile).await;
                log_transfer(&record);
            }
            Err(e) => error!("Failed to hijack connection for {}: {}", target, e),
        }
    });

    let mut response = Response::new(Body::empty());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    Ok(response)
}

/// Result of one direction of a tunnel
#[derive(Debug)]
struct DirectionOutcome {
    copied: u64,
    error: Option<String>,
}

/// The two endpoints of an established tunnel.
///
/// Both directions share one close signal. Whichever direction finishes
/// first (cleanly, with an error, or by panicking) closes the session, which
/// stops the other one; every half is shut down and dropped before `run`
/// returns.
pub struct TunnelSession<C, O> {
    client: C,
    origin: O,
    closed: CancellationToken,
}

impl<C, O> TunnelSession<C, O>
where
    C: TunnelStream,
    O: TunnelStream,
{
    pub fn new(client: C, origin: O) -> Self {
        Self {
            client,
            origin,
            closed: CancellationToken::new(),
        }
    }

    /// Relay until either side is done and return the transfer record
    pub async fn run(self, target: &str, profile: &Profile) -> TransferLog {
        let record = TransferLog::new(TransferKind::Tunnel, target, profile);

        let (client_read, client_write) = tokio::io::split(self.client);
        let (origin_read, origin_write) = tokio::io::split(self.origin);

        let upload = tokio::spawn(pump(
            client_read,
            origin_write,
            profile.upload_bytes_per_sec,
            self.closed.clone(),
        ));
        let download = tokio::spawn(pump(
            origin_read,
            client_write,
            profile.download_bytes_per_sec,
            self.closed.clone(),
        ));

        let upload = join_direction(upload, "upload").await;
        let download = join_direction(download, "download").await;
        debug!("Tunnel to {} closed", target);

        let mut record = record.finish();
        record.bytes_up = upload.copied;
        record.bytes_down = download.copied;
        record.error = upload.error.or(download.error);
        record
    }
}

/// One direction of a tunnel. Closes the session on every exit path.
async fn pump<R, W>(mut reader: R, mut writer: W, bytes_per_sec: u64, closed: CancellationToken) -> DirectionOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let _close_on_exit = closed.clone().drop_guard();
    let mut relay = RateLimitedRelay::new(bytes_per_sec);

    let error = tokio::select! {
        result = relay.copy(&mut writer, &mut reader) => result.err().map(|e| e.to_string()),
        _ = closed.cancelled() => None,
    };

    if let Err(e) = writer.shutdown().await {
        debug!("Tunnel half already closed: {}", e);
    }

    DirectionOutcome {
        copied: relay.copied(),
        error,
    }
}

async fn join_direction(handle: tokio::task::JoinHandle<DirectionOutcome>, direction: &str) -> DirectionOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Tunnel {} task failed: {}", direction, e);
            DirectionOutcome {
                copied: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::sync::Mutex;

    fn unlimited() -> Profile {
        Profile::new("Full", 10, 0, 0, 0)
    }

    /// Hands out one pre-made stream and records where it was asked to dial
    struct StaticDialer {
        stream: Mutex<Option<DuplexStream>>,
        dialled: Mutex<Vec<(String, u16)>>,
    }

    #[async_trait]
    impl Dialer for StaticDialer {
        async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
            self.dialled.lock().await.push((host.to_string(), port));
            match self.stream.lock().await.take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            }
        }
    }

    fn connect_request(target: &str) -> Request<Body> {
        Request::builder()
            .method("CONNECT")
            .uri(target)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_without_hijack_is_server_error() {
        let dialer = Arc::new(StaticDialer {
            stream: Mutex::new(None),
            dialled: Mutex::new(Vec::new()),
        });

        let response = handle_connect_request(connect_request("example.com:443"), unlimited(), dialer.clone())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hijacking not supported");
        assert!(dialer.dialled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_relays_both_directions() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (origin, mut origin_peer) = duplex(64 * 1024);

        let session = tokio::spawn(async move {
            TunnelSession::new(client, origin).run("origin:443", &unlimited()).await
        });

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        origin_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        origin_peer.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Origin hangs up: the whole session must wind down
        drop(origin_peer);
        let record = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session did not close")
            .unwrap();

        assert_eq!(record.kind, TransferKind::Tunnel);
        assert_eq!(record.bytes_up, 4);
        assert_eq!(record.bytes_down, 5);

        // Client side observes the close too
        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_client_close_stops_idle_download() {
        let (client, client_peer) = duplex(1024);
        let (origin, _origin_peer) = duplex(1024);

        let session = tokio::spawn(async move {
            TunnelSession::new(client, origin).run("origin:443", &unlimited()).await
        });

        // Origin never sends anything; only the shared close can end the download side
        drop(client_peer);
        let record = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session did not close")
            .unwrap();
        assert_eq!(record.bytes_down, 0);
    }

    #[tokio::test]
    async fn test_download_direction_is_throttled() {
        let (client, mut client_peer) = duplex(256 * 1024);
        let (origin, mut origin_peer) = duplex(256 * 1024);
        let profile = Profile::new("Bad", 3, 0, 20_000, 0);

        let session = tokio::spawn(async move {
            TunnelSession::new(client, origin).run("origin:443", &profile).await
        });

        let payload = vec![7u8; 40_000];
        let start = Instant::now();
        origin_peer.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        client_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
        // The second 20 000-byte window cannot start before the first has elapsed
        assert!(start.elapsed() >= Duration::from_millis(900));

        drop(origin_peer);
        drop(client_peer);
        let record = tokio::time::timeout(Duration::from_secs(5), session).await.unwrap().unwrap();
        assert_eq!(record.bytes_down, 40_000);
    }

    #[tokio::test]
    async fn test_upload_direction_is_throttled() {
        let (client, mut client_peer) = duplex(256 * 1024);
        let (origin, mut origin_peer) = duplex(256 * 1024);
        let profile = Profile::new("Bad", 3, 0, 0, 20_000);

        let session = tokio::spawn(async move {
            TunnelSession::new(client, origin).run("origin:443", &profile).await
        });

        let payload = vec![9u8; 40_000];
        let start = Instant::now();
        client_peer.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        origin_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
        assert!(start.elapsed() >= Duration::from_millis(900));

        drop(client_peer);
        drop(origin_peer);
        let record = tokio::time::timeout(Duration::from_secs(5), session).await.unwrap().unwrap();
        assert_eq!(record.bytes_up, 40_000);
        assert_eq!(record.bytes_down, 0);
    }

    fn static_dialer(stream: Option<DuplexStream>) -> Arc<StaticDialer> {
        Arc::new(StaticDialer {
            stream: Mutex::new(stream),
            dialled: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_raw_connect_writes_established_line_then_relays() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (origin, mut origin_peer) = duplex(64 * 1024);
        let dialer = static_dialer(Some(origin));

        let handler = tokio::spawn(handle_raw_connect(client, "origin.test:8443", unlimited(), dialer.clone()));

        let mut head = vec![0u8; CONNECT_ESTABLISHED.len()];
        client_peer.read_exact(&mut head).await.unwrap();
        assert_eq!(head, b"HTTP/1.1 200 Connection Established\r\n\r\n");
        assert_eq!(
            *dialer.dialled.lock().await,
            vec![("origin.test".to_string(), 8443)]
        );

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        origin_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        origin_peer.write_all(b"world").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(origin_peer);
        tokio::time::timeout(Duration::from_secs(5), handler).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_raw_connect_dial_failure_closes_without_reply() {
        let (client, mut client_peer) = duplex(1024);
        let dialer = static_dialer(None);

        tokio::time::timeout(
            Duration::from_secs(5),
            handle_raw_connect(client, "127.0.0.1:9", unlimited(), dialer.clone()),
        )
        .await
        .unwrap();

        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected reply: {:?}", String::from_utf8_lossy(&rest));
        assert_eq!(dialer.dialled.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_raw_connect_invalid_target_is_bad_request() {
        let (client, mut client_peer) = duplex(1024);
        let dialer = static_dialer(None);

        handle_raw_connect(client, "/no-authority", unlimited(), dialer.clone()).await;

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(dialer.dialled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_raw_connect_waits_out_latency() {
        let (client, mut client_peer) = duplex(1024);
        let (origin, _origin_peer) = duplex(1024);
        let profile = Profile::new("Slow", 2, 200, 0, 0);

        let start = Instant::now();
        tokio::spawn(handle_raw_connect(client, "origin.test:443", profile, static_dialer(Some(origin))));

        let mut head = vec![0u8; CONNECT_ESTABLISHED.len()];
        client_peer.read_exact(&mut head).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
