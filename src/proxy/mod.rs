//! Throttling forward proxy: listener, plain HTTP forwarding and CONNECT tunnels

pub mod http;
pub mod http_client;
pub mod rewind;
pub mod server;
pub mod tunnel;

pub use http_client::{ClientConfig, HttpClient};
pub use rewind::Rewind;
pub use server::{handle_request, ProxyServer, ProxyState};
pub use tunnel::{BoxedStream, CONNECT_ESTABLISHED, Dialer, TcpDialer, TunnelSession, TunnelStream};
