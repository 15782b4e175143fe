//! Gangway management API models

pub mod models;
