use crate::errors::GatewayError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::http::make_error_response;
use std::future::Future;
use std::pin::Pin;

/// Health endpoints on the admin listener. The gateway holds no
/// correctness-critical state, so liveness and readiness coincide.
pub struct AdminService {}

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

impl Default for AdminService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        Box::pin(async move {
            let ok_body = || Full::new(Bytes::from("ok\n")).map_err(|e| match e {}).boxed();

            let res = match req.uri().path() {
                "/health" | "/ready" => Response::new(ok_body()),
                _ => make_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}
