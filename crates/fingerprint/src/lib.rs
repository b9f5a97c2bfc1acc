//! # Rightsizer Fingerprint
//!
//! Deterministic content signatures for monitored sources.
//!
//! ## Pipeline
//!
//! ```text
//! Source root
//!     │
//!     ├──> Git probe (HEAD + dirty-path digest, bounded timeouts)
//!     │      └─> Fingerprint::Git
//!     │
//!     └──> Content walk (.gitignore aware, sorted)
//!            └─> Fingerprint::Content (SHA-256)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rightsizer_fingerprint::SourceFingerprinter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fingerprinter = SourceFingerprinter::new("my-service", "/path/to/source")?;
//!     let snapshot = fingerprinter.capture().await?;
//!
//!     println!("{} -> {}", snapshot.source_id, snapshot.digest());
//!     Ok(())
//! }
//! ```

mod error;
mod fingerprint;
mod git_probe;
mod scanner;

pub use error::{FingerprintError, Result};
pub use fingerprint::{unix_now_ms, Fingerprint, SourceFingerprinter, SourceSnapshot};
pub use scanner::{SourceScanner, IGNORED_SCOPES};
