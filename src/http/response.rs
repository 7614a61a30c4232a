//! HTTP response building module
//!
//! Turns handler results into hyper responses, decoupled from routing.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use hyper::{Response, StatusCode};

use crate::handler::{HandlerError, HttpResponse};

/// Build the response for a successful handler call
pub fn build_handler_response(resp: &HttpResponse, server_name: &str) -> Response<Full<Bytes>> {
    build_text_response(resp.status, resp.content_type, resp.body.clone(), server_name)
}

/// Build the plain-text response a `HandlerError` recovers into
pub fn build_error_response(err: &HandlerError, server_name: &str) -> Response<Full<Bytes>> {
    let status = err.status();
    let body = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    build_text_response(status, "text/plain", Bytes::from(body), server_name)
}

/// Build a response with a fixed body and content type
pub fn build_text_response(
    status: StatusCode,
    content_type: &str,
    body: Bytes,
    server_name: &str,
) -> Response<Full<Bytes>> {
    let content_length = body.len();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, content_length)
        .header(SERVER, server_name)
        .body(Full::new(body.clone()))
        .unwrap_or_else(|e| {
            log_build_error(status, &e);
            let mut fallback = Response::new(Full::new(body));
            *fallback.status_mut() = status;
            fallback
        })
}

/// Log response build error
fn log_build_error(status: StatusCode, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    #[test]
    fn test_error_response_body() {
        let err = HandlerError::NotFound {
            method: Method::GET,
            path: "/x".to_string(),
        };
        let resp = build_error_response(&err, "test");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[CONTENT_LENGTH], "13");
        assert_eq!(resp.headers()[SERVER], "test");
    }

    #[test]
    fn test_invalid_server_name_falls_back() {
        // Header values cannot contain newlines; the builder fails and the
        // status must survive the fallback
        let resp = build_text_response(
            StatusCode::OK,
            "text/plain",
            Bytes::from_static(b"hi"),
            "bad\nname",
        );
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(SERVER).is_none());
    }
}
