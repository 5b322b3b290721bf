//! # VcsMirror Protocol
//!
//! Remote metadata types for VcsMirror synchronization.
//!
//! This crate provides:
//! - `ContentHash` for content-addressed file comparison
//! - Project and file records delivered in metadata blocks
//! - `MetadataBlock` with parent-before-child ordering validation
//! - Session, open, and checkout request/reply types
//!
//! This is a pure data crate with no I/O operations; the wire encoding
//! used to reach a real remote service is out of scope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod hash;
mod record;
mod session;

pub use block::MetadataBlock;
pub use hash::ContentHash;
pub use record::{BlockRecord, CheckoutInfo, FileRecord, ProjectRecord};
pub use session::{
    AccessDenied, CheckOutEntry, CheckOutRequest, OpenReply, OpenRequest, RevisionSelector,
    SessionId,
};
