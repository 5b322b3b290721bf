//! # VcsMirror Engine
//!
//! Concurrent reconciliation engine mirroring a remote VCS project
//! tree onto the local filesystem.
//!
//! This crate provides:
//! - Per-file classification (skip, fetch, check out) by content hash
//! - A fetch → decompress → write pipeline overlapped with metadata
//!   prefetch, sequenced by single-slot hand-off gates
//! - Session keep-alive and block prefetch background tasks
//! - A run-scoped error funnel draining background failures to one
//!   abort point
//!
//! ## Architecture
//!
//! One orchestrator thread drives the run; a prefetch thread keeps the
//! next metadata block resident while the current block is processed,
//! and each block's data pipeline runs on its own thread behind three
//! hand-off gates.
//!
//! ## Key Invariants
//!
//! - Block N is fully reconciled and written before block N+1's
//!   reconciliation begins; only its metadata may already be resident
//! - At most one fetch, one decompress, and one write stage is in
//!   flight at any time
//! - Project markers precede the file records that reference them;
//!   a violation aborts the run
//! - Writes committed before an abort are kept (at-least-applied)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod config;
mod engine;
mod error;
mod funnel;
mod gate;
mod localfs;
mod pathmap;
mod pipeline;
mod remote;
mod session;

pub use classify::{classify, FileAttr, FileDecision, FileState, SyncAction};
pub use config::{ExistingFileAction, ExistingFilePolicy, FileTimePolicy, SyncOptions};
pub use engine::{synchronize, Synchronizer, SyncSummary};
pub use error::{EngineError, EngineResult};
pub use funnel::ErrorFunnel;
pub use gate::Gate;
pub use localfs::{clean_destination, LocalHash};
pub use pathmap::LocalPathIndex;
pub use pipeline::{BlockPipeline, PipelineGates, TransferItem};
pub use remote::{InMemoryRemote, RemoteSource};
pub use session::{BlockPrefetcher, Heartbeat};
