//! Protocol bridge
//!
//! Relays Streamable HTTP traffic between clients and the MCP server of one
//! deployment, after checking its access token and lifecycle state.

pub mod auth;
pub mod forward;
pub mod handler;
pub mod protocol;
pub mod session;
