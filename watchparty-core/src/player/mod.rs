//! Local Player
//!
//! Wraps the platform media engine and tracks what it is actually doing.

mod adapter;
mod engine;

pub use adapter::*;
pub use engine::*;

#[cfg(test)]
pub(crate) use adapter::tests;
