//! Transport implementations.
//!
//! This module contains concrete implementations of the `Transport` trait
//! for reaching a broker over HTTP or running one in-process.

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::InMemoryTransport;
