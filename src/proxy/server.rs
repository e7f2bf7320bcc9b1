//! Proxy listener and request dispatch
//!
//! The listener reads the opening of every connection itself. A connection
//! that starts with CONNECT is tunnelled straight from the raw socket; any
//! other connection is handed to hyper with the bytes read so far replayed.

use bytes::{Bytes, BytesMut};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::HttpClientConfig;
use crate::error::Result;
use crate::proxy::http::handle_http_request;
use crate::proxy::http_client::HttpClient;
use crate::proxy::rewind::Rewind;
use crate::proxy::tunnel::{handle_connect_request, handle_raw_connect, Dialer, TcpDialer};
use crate::throttle::ProfileStore;
use crate::utils::log_incoming_request;
use crate::{log_debug, log_info};

const CONNECT_PREFIX: &[u8] = b"CONNECT ";
const MAX_CONNECT_HEAD: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a request handler needs, shared by all connections
pub struct ProxyState {
    pub store: Arc<ProfileStore>,
    pub client: Arc<HttpClient>,
    pub dialer: Arc<dyn Dialer>,
}

pub struct ProxyServer {
    listen_addr: SocketAddr,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub fn new(
        listen_addr: SocketAddr,
        store: Arc<ProfileStore>,
        client: Arc<HttpClient>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            listen_addr,
            state: Arc::new(ProxyState { store, client, dialer }),
        }
    }

    /// Create a proxy with a pooled client and TCP dialer built from settings
    pub fn with_config(listen_addr: SocketAddr, store: Arc<ProfileStore>, config: &HttpClientConfig) -> Self {
        Self::new(
            listen_addr,
            store,
            Arc::new(HttpClient::from_config(config)),
            Arc::new(TcpDialer::new(config.connect_timeout())),
        )
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Bind the listener and return its real address together with the
    /// serving future. Accepting stops once `shutdown` resolves; connections
    /// already accepted keep running until their peers close.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind<F>(self, shutdown: F) -> Result<(SocketAddr, impl Future<Output = Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = std::net::TcpListener::bind(self.listen_addr)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;
        info!("🚀 Proxy listening on {}", local_addr);

        Ok((local_addr, accept_loop(listener, self.state, shutdown)))
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (_, serving) = self.bind(shutdown)?;
        serving.await
    }
}

async fn accept_loop<F>(listener: TcpListener, state: Arc<ProxyState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    log_debug!("New connection from: {}", remote_addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
                    }
                    tokio::spawn(serve_connection(stream, remote_addr, Arc::clone(&state)));
                }
                Err(e) => {
                    // Usually fd exhaustion; give in-flight connections a moment
                    error!("Failed to accept proxy connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    if let Ok(addr) = listener.local_addr() {
        log_info!("Proxy on {} stopped accepting connections", addr);
    }
    Ok(())
}

/// How a client connection opened
#[derive(Debug, PartialEq)]
enum Opening {
    /// A CONNECT head: its target plus whatever the client sent after it
    Connect { target: String, rest: Bytes },
    /// Anything else, with the bytes consumed while finding out
    Http(Bytes),
}

/// Read just enough of a fresh connection to tell a CONNECT from anything
/// else. Returns `None` if the client closed before sending a byte.
async fn read_opening<S>(stream: &mut S) -> io::Result<Option<Opening>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        let checked = buf.len().min(CONNECT_PREFIX.len());
        if buf[..checked] != CONNECT_PREFIX[..checked] {
            return Ok(Some(Opening::Http(buf.freeze())));
        }

        if let Some(end) = find_head_end(&buf) {
            let rest = buf.split_off(end).freeze();
            let target = connect_target(&buf)?;
            return Ok(Some(Opening::Connect { target, rest }));
        }
        if buf.len() > MAX_CONNECT_HEAD {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "CONNECT head too large"));
        }

        if stream.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Opening::Http(buf.freeze())));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Target of a `CONNECT <target> HTTP/1.x` request line
fn connect_target(head: &[u8]) -> io::Result<String> {
    let line_end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request line is not UTF-8"))?;

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("CONNECT"), Some(target), Some(version)) if version.starts_with("HTTP/1.") => Ok(target.to_string()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed request line: {}", line.trim_end()),
        )),
    }
}

async fn serve_connection(mut stream: TcpStream, remote_addr: SocketAddr, state: Arc<ProxyState>) {
    let opening = match read_opening(&mut stream).await {
        Ok(Some(opening)) => opening,
        Ok(None) => return,
        Err(e) => {
            debug!("Dropping connection from {}: {}", remote_addr, e);
            return;
        }
    };

    match opening {
        Opening::Connect { target, rest } => {
            let profile = state.store.current_profile();
            log_incoming_request("CONNECT", &target, &remote_addr, &profile);
            handle_raw_connect(Rewind::new(stream, rest), &target, profile, Arc::clone(&state.dialer)).await;
        }
        Opening::Http(prefix) => {
            let service = service_fn(move |req| handle_request(req, remote_addr, Arc::clone(&state)));
            let connection = Http::new()
                .serve_connection(Rewind::new(stream, prefix), service)
                .with_upgrades();
            if let Err(e) = connection.await {
                debug!("Connection from {} closed: {}", remote_addr, e);
            }
        }
    }
}

/// Route one request. The profile is read exactly once here and that copy
/// governs the whole exchange.
pub async fn handle_request(
    req: Request<Body>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> Result<Response<Body>> {
    let profile = state.store.current_profile();
    log_incoming_request(req.method().as_str(), &req.uri().to_string(), &remote_addr, &profile);

    if req.method() == Method::CONNECT {
        handle_connect_request(req, profile, Arc::clone(&state.dialer)).await
    } else {
        Ok(handle_http_request(req, profile, &state.client).await)
    }
}
