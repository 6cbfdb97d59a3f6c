//! Triton Service Groups.
//!
//! HTTP API authenticated with CloudAPI request signatures. Each caller's
//! account is mirrored locally and provisioned with a service-managed RSA
//! key, registered on the account under a per-datacenter name, that the
//! service later uses to act on the account's behalf.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod server;

#[cfg(test)]
mod testing;
