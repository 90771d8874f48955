//! Mock backend servers for tests.

use crate::principal::AUTH_TOKEN_HEADER;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub type TestResponse = Response<Full<Bytes>>;

pub type HandlerFn = Arc<
    dyn Fn(Request<Incoming>) -> Pin<Box<dyn Future<Output = TestResponse> + Send>> + Send + Sync,
>;

/// Starts a backend on an ephemeral port, serving every request with
/// the given handler.
pub async fn spawn_backend(handler: HandlerFn) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler(req).await) }
                });
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    addr
}

pub fn json_response<T: Serialize + ?Sized>(value: &T) -> TestResponse {
    Response::builder()
        .status(200)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(
            serde_json::to_vec(value).expect("serialize test body"),
        )))
        .unwrap()
}

/// Handler that answers every request with the same JSON value.
pub fn json_backend<T: Serialize + ?Sized>(value: &T) -> HandlerFn {
    let body = Bytes::from(serde_json::to_vec(value).expect("serialize test body"));
    Arc::new(move |_req| {
        let body = body.clone();
        Box::pin(async move {
            Response::builder()
                .status(200)
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(body))
                .unwrap()
        })
    })
}

/// Handler that answers every request with a bare status code.
pub fn status_backend(status: u16) -> HandlerFn {
    Arc::new(move |_req| {
        Box::pin(async move {
            Response::builder()
                .status(status)
                .body(Full::new(Bytes::new()))
                .unwrap()
        })
    })
}

/// Handler that never responds, for timeout behavior.
pub fn hanging_backend() -> HandlerFn {
    Arc::new(|_req| {
        Box::pin(async {
            std::future::pending::<()>().await;
            unreachable!()
        })
    })
}

/// Wraps a handler, recording the auth-token header of the most recent
/// request, and spawns it.
pub async fn captured_header(inner: HandlerFn) -> (SocketAddr, Arc<Mutex<Option<String>>>) {
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    let handler: HandlerFn = Arc::new(move |req| {
        let token = req
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        *seen_clone.lock().unwrap() = token;
        inner(req)
    });

    (spawn_backend(handler).await, seen)
}
