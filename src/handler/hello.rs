//! The greeting endpoint

use super::error::HandlerError;
use super::router::{HttpRequest, HttpResponse};
use hyper::StatusCode;

pub const GREETING: &str = "Hi welcome tutorial";

/// `GET /hello`
#[allow(clippy::unnecessary_wraps)]
pub fn hello(_req: &HttpRequest) -> Result<HttpResponse, HandlerError> {
    Ok(HttpResponse::text(StatusCode::OK, GREETING))
}
