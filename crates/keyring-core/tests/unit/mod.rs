//! Unit tests module
//!
//! This module contains unit tests for individual components:
//! - Vault encryption and stores
//! - Keyring adapters
//! - Remote sessions

pub mod keyring_test;
pub mod session_test;
pub mod vault_test;
