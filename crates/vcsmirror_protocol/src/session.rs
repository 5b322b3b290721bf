//! Session and request/reply types for the remote boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a synchronization session on the remote service.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh session identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which revision of the remote tree a session targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionSelector {
    /// The latest checked-in state.
    Latest,
    /// The tree as of the given instant.
    AsOf(DateTime<Utc>),
}

impl Default for RevisionSelector {
    fn default() -> Self {
        Self::Latest
    }
}

/// Request to open a synchronization session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Host name of the requesting client.
    pub host: String,
    /// Remote project path to synchronize.
    pub path: String,
    /// Whether to descend into subprojects.
    pub recursive: bool,
    /// Revision of the tree to deliver.
    pub revision: RevisionSelector,
}

impl OpenRequest {
    /// Creates a request for the latest revision.
    pub fn new(host: impl Into<String>, path: impl Into<String>, recursive: bool) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            recursive,
            revision: RevisionSelector::Latest,
        }
    }

    /// Selects a revision other than the latest.
    pub fn with_revision(mut self, revision: RevisionSelector) -> Self {
        self.revision = revision;
        self
    }
}

/// Reply to a session open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    /// The session to use for subsequent calls.
    pub session: SessionId,
    /// Total number of records the session expects to deliver.
    pub expected_records: u64,
}

/// One file in a batched checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutEntry {
    /// Full remote path of the file.
    pub remote_path: String,
    /// Local folder the checkout is registered against.
    pub local_folder: String,
    /// Checkout comment.
    pub comment: String,
}

impl CheckOutEntry {
    /// Creates an entry with an empty comment.
    pub fn new(remote_path: impl Into<String>, local_folder: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_folder: local_folder.into(),
            comment: String::new(),
        }
    }
}

/// A batched checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutRequest {
    /// Host name of the requesting client.
    pub host: String,
    /// Files to check out.
    pub entries: Vec<CheckOutEntry>,
}

impl CheckOutRequest {
    /// Creates a request.
    pub fn new(host: impl Into<String>, entries: Vec<CheckOutEntry>) -> Self {
        Self {
            host: host.into(),
            entries,
        }
    }
}

/// A per-object access denial reported by the remote service.
///
/// Denials are warnings, never aborts: the affected file or project is
/// skipped and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDenied {
    /// Index of the denied entry within the originating request,
    /// if the denial refers to one.
    pub entry: Option<usize>,
    /// Name of the denied remote object.
    pub object: String,
}

impl AccessDenied {
    /// Denial tied to a request entry.
    pub fn for_entry(entry: usize, object: impl Into<String>) -> Self {
        Self {
            entry: Some(entry),
            object: object.into(),
        }
    }

    /// Denial for a remote object outside any request list.
    pub fn for_object(object: impl Into<String>) -> Self {
        Self {
            entry: None,
            object: object.into(),
        }
    }
}
