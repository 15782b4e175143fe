//! Gangway Library
//!
//! Core modules for the MCP deployment gateway.

pub mod app;
pub mod bridge;
pub mod cache;
pub mod compute;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod validator;
pub mod workers;
