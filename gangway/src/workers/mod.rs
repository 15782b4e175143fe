//! Background workers

pub mod monitor;
pub mod session_sweeper;
