//! Core of the SafeStore vault: accounts, sessions, notes, files, the audit
//! trail and the access policy, all persisted through a [`kv::KvStore`].
//!
//! This crate has no database or HTTP dependencies. Backends and the
//! command-line front end live in their own crates.

pub mod audit;
pub mod clock;
pub mod config;
mod context;
pub mod display;
pub mod error;
pub mod file;
pub mod identity;
pub mod kv;
pub mod note;
pub mod policy;
pub mod preview;
pub mod session;
pub mod storage;
pub mod vault;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use vault::Vault;
