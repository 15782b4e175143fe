//! Deployment module

pub mod credentials;
pub mod executor;
pub mod fsm;
pub mod launch;
