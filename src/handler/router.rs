//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: body limits, route matching,
//! error recovery and access logging.

use crate::config::AppState;
use crate::handler::error::{DuplicateRoute, HandlerError};
use crate::handler::hello;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, CONTENT_LENGTH, REFERER, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// A request as seen by route handlers: fully read, transport-free
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response produced by a route handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(status: StatusCode, body: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Bytes::from_static(body.as_bytes()),
        }
    }
}

/// Route handlers are plain functions: no captured state, no I/O
pub type HandlerFn = fn(&HttpRequest) -> Result<HttpResponse, HandlerError>;

/// One (method, path) binding
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub path: &'static str,
    pub handler: HandlerFn,
}

impl Route {
    pub const fn get(path: &'static str, handler: HandlerFn) -> Self {
        Self {
            method: Method::GET,
            path,
            handler,
        }
    }
}

/// Immutable route table, built once at startup
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    force_status: Option<StatusCode>,
}

impl RouteTable {
    /// Build a table, rejecting a second handler for the same (method, path)
    pub fn new(routes: Vec<Route>) -> Result<Self, DuplicateRoute> {
        for (i, route) in routes.iter().enumerate() {
            if routes[..i]
                .iter()
                .any(|r| r.method == route.method && r.path == route.path)
            {
                return Err(DuplicateRoute {
                    method: route.method.clone(),
                    path: route.path.to_string(),
                });
            }
        }
        Ok(Self {
            routes,
            force_status: None,
        })
    }

    /// The service's routes
    pub fn application() -> Result<Self, DuplicateRoute> {
        Self::new(vec![Route::get("/hello", hello::hello)])
    }

    /// Make every matched route answer `status` with an empty-ish body
    #[must_use]
    pub const fn with_forced_status(mut self, status: Option<StatusCode>) -> Self {
        self.force_status = status;
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn find(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.method == *method && r.path == path)
    }

    /// Run the handler bound to the request's (method, path)
    pub fn dispatch(&self, req: &HttpRequest) -> Result<HttpResponse, HandlerError> {
        let route = self
            .find(&req.method, &req.path)
            .ok_or_else(|| HandlerError::NotFound {
                method: req.method.clone(),
                path: req.path.clone(),
            })?;

        if let Some(status) = self.force_status {
            return Ok(HttpResponse {
                status,
                content_type: "text/plain",
                body: Bytes::from(status.canonical_reason().unwrap_or("Forced").to_string()),
            });
        }

        (route.handler)(req)
    }
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: Option<SocketAddr>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let server_name = state.config.http.server_name.as_str();

    let mut entry = state.config.logging.access_log.then(|| access_entry(&req, peer_addr));
    logger::log_headers_count(req.headers().len(), state.config.logging.show_headers);

    let response = match read_request(req, state.config.http.max_body_size).await {
        Ok(parsed) => state.routes.dispatch(&parsed),
        Err(e) => Err(e),
    };

    let response = match response {
        Ok(resp) => http::build_handler_response(&resp, server_name),
        Err(err) => {
            if !matches!(err, HandlerError::NotFound { .. }) {
                logger::log_warning(&err.to_string());
            }
            http::build_error_response(&err, server_name)
        }
    };

    if let Some(ref mut entry) = entry {
        entry.status = response.status().as_u16();
        entry.body_bytes = usize::try_from(response.body().size_hint().exact().unwrap_or(0))
            .unwrap_or(usize::MAX);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

fn access_entry<B>(req: &Request<B>, peer_addr: Option<SocketAddr>) -> AccessLogEntry {
    let mut entry = AccessLogEntry::new(
        peer_addr.map_or_else(|| "-".to_string(), |a| a.ip().to_string()),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = format!("{:?}", req.version()).trim_start_matches("HTTP/").to_string();
    entry.referer = header_string(req.headers(), REFERER.as_str());
    entry.user_agent = header_string(req.headers(), USER_AGENT.as_str());
    entry
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Validate size limits and read the whole body
async fn read_request<B>(req: Request<B>, max_body_size: u64) -> Result<HttpRequest, HandlerError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if let Some(value) = req.headers().get(CONTENT_LENGTH) {
        let size = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| HandlerError::Malformed("invalid Content-Length header".to_string()))?;
        if size > max_body_size {
            return Err(HandlerError::PayloadTooLarge {
                size,
                limit: max_body_size,
            });
        }
    }

    let (parts, body) = req.into_parts();
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    let body = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                HandlerError::PayloadTooLarge {
                    size: max_body_size.saturating_add(1),
                    limit: max_body_size,
                }
            } else {
                HandlerError::Malformed(format!("failed to read body: {e}"))
            }
        })?
        .to_bytes();

    Ok(HttpRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state_with(force_status: Option<u16>) -> Arc<AppState> {
        let mut config = Config::load_from("/nonexistent/hello-native-config").expect("defaults");
        config.logging.access_log = false;
        config.http.max_body_size = 16;
        config.http.force_status = force_status;
        Arc::new(AppState::new(config).expect("state"))
    }

    fn request(method: Method, path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn bare(method: Method, path: &str) -> HttpRequest {
        HttpRequest {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let err = RouteTable::new(vec![
            Route::get("/hello", hello::hello),
            Route::get("/hello", hello::hello),
        ])
        .unwrap_err();
        assert_eq!(err.path, "/hello");
        assert_eq!(err.method, Method::GET);
    }

    #[test]
    fn test_dispatch_hello() {
        let table = RouteTable::application().unwrap();
        let resp = table.dispatch(&bare(Method::GET, "/hello")).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.content_type, "text/plain");
        assert_eq!(resp.body, Bytes::from_static(b"Hi welcome tutorial"));
    }

    #[test]
    fn test_dispatch_unmatched() {
        let table = RouteTable::application().unwrap();
        for (method, path) in [
            (Method::GET, "/"),
            (Method::GET, "/hello/"),
            (Method::GET, "/HELLO"),
            (Method::POST, "/hello"),
            (Method::HEAD, "/hello"),
            (Method::DELETE, "/other"),
        ] {
            let err = table.dispatch(&bare(method.clone(), path)).unwrap_err();
            assert_eq!(err.status(), StatusCode::NOT_FOUND, "{method} {path}");
        }
    }

    #[test]
    fn test_forced_status_only_applies_to_routes() {
        let table = RouteTable::application()
            .unwrap()
            .with_forced_status(Some(StatusCode::INTERNAL_SERVER_ERROR));
        let resp = table.dispatch(&bare(Method::GET, "/hello")).unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(table.dispatch(&bare(Method::GET, "/nope")).is_err());
    }

    #[tokio::test]
    async fn test_handle_hello() {
        let state = state_with(None);
        let resp = handle_request(request(Method::GET, "/hello?x=1"), state, None)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(resp.headers()["server"], "hello-native");
        assert_eq!(body_string(resp).await, "Hi welcome tutorial");
    }

    #[tokio::test]
    async fn test_handle_is_idempotent() {
        let state = state_with(None);
        let mut bodies = Vec::new();
        for _ in 0..5 {
            let resp = handle_request(request(Method::GET, "/hello"), Arc::clone(&state), None)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            bodies.push(body_string(resp).await);
        }
        assert!(bodies.iter().all(|b| b == &bodies[0]));
    }

    #[tokio::test]
    async fn test_handle_not_found() {
        let state = state_with(None);
        for (method, path) in [(Method::GET, "/missing"), (Method::PUT, "/hello")] {
            let resp = handle_request(request(method, path), Arc::clone(&state), None)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_handle_body_too_large() {
        let state = state_with(None);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/hello")
            .body(Full::new(Bytes::from(vec![b'x'; 64])))
            .unwrap();
        let resp = handle_request(req, state, None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_handle_invalid_content_length() {
        let state = state_with(None);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/hello")
            .header("content-length", "abc")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = handle_request(req, state, None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_handle_forced_fault() {
        let state = state_with(Some(500));
        let resp = handle_request(request(Method::GET, "/hello"), state, None)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
