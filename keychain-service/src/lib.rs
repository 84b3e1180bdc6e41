//! HTTP/JSON service exposing the keychain operations
//!
//! - Keychain lifecycle (create, get, reset, delete)
//! - Fresh and observable addresses
//! - Usage marking, reverse lookup and public keys

pub mod api;
pub mod config;
pub mod error;
