//! Utilities shared across database drivers.

pub mod tls;

pub use tls::{make_tls_connect, SslMode};
