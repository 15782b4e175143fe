//! Compute provisioner (Machines API) wire models

pub mod models;
