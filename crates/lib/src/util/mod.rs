//! Shared utilities.
//!
//! Hashing and fingerprinting, plus an in-memory chain for tests.

pub mod hash;

#[cfg(test)]
pub mod testutil;
