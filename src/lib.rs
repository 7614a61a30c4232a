//! hello-native
//!
//! A single-route HTTP service built for fast startup, plus the staged build
//! pipeline that compiles, compresses, packages and smoke-tests it.

pub mod config;
pub mod handler;
pub mod http;
pub mod logger;
pub mod pipeline;
pub mod server;
