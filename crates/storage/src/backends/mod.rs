//! Storage client backends.

pub mod baton;
pub mod memory;
