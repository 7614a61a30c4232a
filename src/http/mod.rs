//! HTTP protocol layer module
//!
//! Response construction shared by the request router.

pub mod response;

// Re-export commonly used types
pub use response::{build_error_response, build_handler_response, build_text_response};
