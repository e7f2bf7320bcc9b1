//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use bytes::Bytes;
use hyper::client::conn;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use taper::{ControlApi, Profile, ProfileStore, ProxyServer};
use taper::config::HttpClientConfig;

/// Deterministic payload so corruption is visible
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Origin with a couple of fixed routes:
/// `/hello` answers with a short body and an `X-Upstream` header,
/// `/stream/<n>` streams `pattern(n)` in 8 KiB pieces without a content length.
pub async fn spawn_origin() -> SocketAddr {
    let make_svc = make_service_fn(|_| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let path = req.uri().path().to_string();
            let response = if let Some(len) = path.strip_prefix("/stream/") {
                let len: usize = len.parse().unwrap_or(0);
                let chunks: Vec<Result<Bytes, Infallible>> = pattern(len)
                    .chunks(8 * 1024)
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                Response::new(Body::wrap_stream(futures::stream::iter(chunks)))
            } else {
                Response::builder()
                    .header("X-Upstream", "ok")
                    .body(Body::from("hello from upstream"))
                    .unwrap()
            };
            Ok::<_, Infallible>(response)
        }))
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

/// TCP origin that echoes every byte back
pub async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// A running proxy plus control API sharing one store
pub struct TestProxy {
    pub proxy_addr: SocketAddr,
    pub api_addr: SocketAddr,
    pub store: Arc<ProfileStore>,
    _shutdown: Vec<oneshot::Sender<()>>,
}

/// Two-tier table: unlimited Full at 10 and Bad at 3 (64 000 B/s down)
pub fn test_profiles() -> Vec<Profile> {
    vec![
        Profile::new("Full", 10, 0, 0, 0),
        Profile::new("Bad", 3, 0, 64_000, 32_000),
    ]
}

pub async fn spawn_proxy(profiles: Vec<Profile>, initial_level: i64) -> TestProxy {
    let store = Arc::new(ProfileStore::new(profiles, initial_level).unwrap());

    let (proxy_tx, proxy_rx) = oneshot::channel::<()>();
    let proxy = ProxyServer::with_config(
        "127.0.0.1:0".parse().unwrap(),
        Arc::clone(&store),
        &HttpClientConfig::default(),
    );
    let (proxy_addr, serving) = proxy
        .bind(async move {
            let _ = proxy_rx.await;
        })
        .unwrap();
    tokio::spawn(serving);

    let (api_tx, api_rx) = oneshot::channel::<()>();
    let api = ControlApi::new("127.0.0.1:0".parse().unwrap(), Arc::clone(&store));
    let (api_addr, serving) = api
        .bind(async move {
            let _ = api_rx.await;
        })
        .unwrap();
    tokio::spawn(serving);

    TestProxy {
        proxy_addr,
        api_addr,
        store,
        _shutdown: vec![proxy_tx, api_tx],
    }
}

/// Send one absolute-form request through the proxy and collect the response
pub async fn get_via_proxy(proxy: SocketAddr, url: &str) -> (Response<()>, Vec<u8>) {
    let stream = TcpStream::connect(proxy).await.unwrap();
    let (mut sender, connection) = conn::handshake(stream).await.unwrap();
    tokio::spawn(connection);

    let req = Request::builder().uri(url).body(Body::empty()).unwrap();
    let response = sender.send_request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap();
    (Response::from_parts(parts, ()), body.to_vec())
}

/// Issue a CONNECT and return the raw status head plus the open stream
pub async fn connect_via_proxy(proxy: SocketAddr, target: SocketAddr) -> (String, TcpStream) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let head = send_connect(&mut stream, target).await;
    (head, stream)
}

/// Write a CONNECT on an already open proxy connection and read the reply head
pub async fn send_connect(stream: &mut TcpStream, target: SocketAddr) -> String {
    let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, target);
    stream.write_all(request.as_bytes()).await.unwrap();
    read_head(stream).await
}

/// Read up to the blank line ending a response head, or until EOF.
/// Byte at a time so nothing past the head is consumed.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}
