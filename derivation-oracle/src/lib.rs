/// Derivation Oracle Service Library
///
/// This crate provides both a standalone binary and library components
/// for serving BIP32 public derivation and address encoding over HTTP.

pub mod handlers;
pub mod server;

// Re-export commonly used types
pub use server::{create_router, run_server};
