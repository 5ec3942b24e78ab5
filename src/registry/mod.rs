//! Docker Registry v2 access

pub mod auth;
pub mod client;

pub use client::RegistryClient;
