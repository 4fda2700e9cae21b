pub mod config;
pub mod error;
pub mod http;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
