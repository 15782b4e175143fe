//! Caches

pub mod validation;
