//! Utility functions for the proxy

pub mod http;
pub mod logging;

pub use http::*;
pub use logging::*;
