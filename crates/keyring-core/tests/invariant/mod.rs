//! Invariant tests module
//!
//! Guarantees that must hold across every operation sequence.

pub mod keyring_invariant;
