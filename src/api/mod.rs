//! Control API: read and switch the active network profile over HTTP

pub mod server;

pub use server::{handle_api_request, ControlApi};
