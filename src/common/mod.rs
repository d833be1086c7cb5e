//! Common module - shared types, errors, traits and primitives

pub mod channels;
pub mod errors;
pub mod locks;
pub mod traits;
pub mod types;
