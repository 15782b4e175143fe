//! Unit test suite

mod support;

mod test_bridge;
mod test_executor;
mod test_validator;
