//! Per-case hash-chained audit ledger for land-acquisition cases.
//!
//! Every state change of a case (measurement, award, notice, documents,
//! payment) is recorded as an immutable [`LedgerBlock`]. Blocks of one case
//! form a chain: each block carries the hash of the previous block of the
//! *same* case, so the integrity of a case never depends on unrelated cases.
//!
//! # Key Components
//!
//! - [`LedgerStore`]: Trait for ordered, append-only block persistence
//! - [`InMemoryLedgerStore`]: Process-local store used by the node and tests
//! - [`BlockBuilder`]: Mints the next block of a case (does not persist it)
//! - [`IntegrityVerifier`]: Recomputes hashes and chain links for a case
//!
//! # Example
//!
//! ```ignore
//! use land_ledger::{BlockBuilder, BlockDraft, EventType, InMemoryLedgerStore, IntegrityVerifier};
//!
//! let store = Arc::new(InMemoryLedgerStore::new());
//! let builder = BlockBuilder::new(store.clone());
//!
//! let block = builder
//!     .build(BlockDraft::new("SY-100", EventType::MeasurementRecorded, "officer-7", "project-1"))
//!     .await?;
//! store.append(block).await?;
//!
//! let report = IntegrityVerifier::new(store).verify("SY-100").await?;
//! assert!(report.valid);
//! ```

pub mod builder;
pub mod hashing;
pub mod store;
pub mod types;
pub mod verifier;

// Re-export main types
pub use builder::BlockBuilder;
pub use hashing::{canonical_json, compute_block_hash, compute_hash};
pub use store::{BlockSequence, InMemoryLedgerStore, LedgerStore, StoreError};
pub use types::*;
pub use verifier::{annotate, verify_chain, ChainFailure, IntegrityVerifier, VerificationReport};
