//! HTTP control API over the profile store

use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::{LevelRequest, StatusResponse};
use crate::throttle::ProfileStore;
use crate::utils::build_error_response;
use crate::log_debug;

pub struct ControlApi {
    listen_addr: SocketAddr,
    store: Arc<ProfileStore>,
}

impl ControlApi {
    pub fn new(listen_addr: SocketAddr, store: Arc<ProfileStore>) -> Self {
        Self { listen_addr, store }
    }

    /// Bind the listener and return its real address with the serving future
    pub fn bind<F>(self, shutdown: F) -> Result<(SocketAddr, impl Future<Output = Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let store = self.store;
        let make_svc = make_service_fn(move |_: &AddrStream| {
            let store = Arc::clone(&store);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let store = Arc::clone(&store);
                    async move { Ok::<_, Infallible>(handle_api_request(req, &store).await) }
                }))
            }
        });

        let server = Server::try_bind(&self.listen_addr)?.serve(make_svc);
        let local_addr = server.local_addr();
        info!("🎛️  Control API listening on {}", local_addr);

        let serving = async move {
            if let Err(e) = server.with_graceful_shutdown(shutdown).await {
                error!("Control API error: {}", e);
                return Err(Error::Http(e));
            }
            Ok(())
        };

        Ok((local_addr, serving))
    }

    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (_, serving) = self.bind(shutdown)?;
        serving.await
    }
}

/// Route one control request
pub async fn handle_api_request(req: Request<Body>, store: &ProfileStore) -> Response<Body> {
    log_debug!("API {} {}", req.method(), req.uri().path());

    let mut response = if req.method() == Method::OPTIONS {
        empty_response(StatusCode::NO_CONTENT)
    } else {
        match (req.uri().path(), req.method()) {
            ("/status", &Method::GET) => json_response(&StatusResponse {
                level: store.current_level(),
                profile: store.current_profile(),
            }),
            ("/profiles", &Method::GET) => json_response(&store.profiles()),
            ("/level", &Method::POST) => set_level(req, store).await,
            ("/status", _) | ("/profiles", _) | ("/level", _) => {
                build_error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
            _ => build_error_response(StatusCode::NOT_FOUND, "not found"),
        }
    };

    add_cors_headers(&mut response);
    response
}

async fn set_level(req: Request<Body>, store: &ProfileStore) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read level request body: {}", e);
            return build_error_response(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    match serde_json::from_slice::<LevelRequest>(&body) {
        Ok(request) => {
            store.set_level(request.level);
            empty_response(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            warn!("Rejected level request: {}", e);
            build_error_response(StatusCode::BAD_REQUEST, "bad request")
        }
    }
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(json) => {
            let mut response = Response::new(Body::from(json));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to serialize API response: {}", e);
            build_error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn add_cors_headers(response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("content-type"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
}
