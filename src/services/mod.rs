//! Cloud API service implementations.

mod operations;

pub use operations::*;
