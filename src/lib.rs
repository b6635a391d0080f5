//! netfleet
//!
//! Manages a fleet of network devices reachable over SSH.
//!
//! # Architecture
//!
//! - **Vault Module**: per-owner AES-256-GCM keys and the credential cipher
//! - **Probe Module**: vendor identification from an ordered signature table
//! - **Exec Module**: serial multi-command execution on one session
//! - **Normalize Module**: raw CLI text to key-value fields and table rows
//! - **Registry Module**: device and credential records on a document store
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use netfleet::exec::CommandExecutor;
//! use netfleet::ssh::{Ssh2Connector, SshSettings};
//!
//! let executor = CommandExecutor::new(Arc::new(Ssh2Connector::new()), SshSettings::default());
//! let report = executor.execute_all("10.0.0.1", "admin", "secret", &["show version"]);
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod exec;
pub mod logging;
pub mod normalize;
pub mod probe;
pub mod registry;
pub mod ssh;
pub mod store;
pub mod vault;

// Re-export main types
pub use config::Config;
pub use exec::{CommandExecutor, CommandResult, ExecutionReport};
pub use normalize::{NormalizedOutput, normalize};
pub use probe::{DeviceFamily, DeviceProber, DeviceProfile, ProbeError};
pub use registry::{CredentialBook, DeviceRegistry, RegistryError};
pub use store::{DocumentStore, FileStore, MemoryStore};
pub use vault::{CredentialCipher, KeyVault, SealedSecret, VaultError};
