//! Core data structures for the PoCBFT platform
//!
//! This crate provides the fundamental building blocks shared by the
//! consensus engine and the surrounding node components:
//! - Basic types (Hash, Address, BlockNumber, etc.)
//! - Hashing utilities used for deterministic validator ordering

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use types::*;
