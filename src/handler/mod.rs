//! Request handler module
//!
//! Route table, the greeting handler and the hyper-facing request entry point.

pub mod error;
pub mod hello;
pub mod router;

// Re-export main entry point
pub use error::{DuplicateRoute, HandlerError};
pub use router::{handle_request, HandlerFn, HttpRequest, HttpResponse, Route, RouteTable};
