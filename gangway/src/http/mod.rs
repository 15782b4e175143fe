//! HTTP clients

pub mod client;
pub mod machines;
