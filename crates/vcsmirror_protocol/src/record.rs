//! Metadata records delivered inside blocks.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project marker inside a metadata block.
///
/// Markers announce a remote project (directory) before any of its files
/// appear. The relative path is empty for the session root itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project path relative to the session root, `/`-separated.
    /// Empty for the root project.
    pub relative_path: String,
    /// Local checkout folder registered on the server, if any.
    ///
    /// Used verbatim as the local directory when the caller opts out of
    /// building the tree under its own root.
    pub checkout_folder: Option<String>,
}

impl ProjectRecord {
    /// Creates a marker for the session root.
    pub fn root() -> Self {
        Self {
            relative_path: String::new(),
            checkout_folder: None,
        }
    }

    /// Creates a marker for a subproject.
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            checkout_folder: None,
        }
    }

    /// Attaches the server-side checkout folder hint.
    pub fn with_checkout_folder(mut self, folder: impl Into<String>) -> Self {
        self.checkout_folder = Some(folder.into());
        self
    }

    /// Returns true if this marker denotes the session root.
    pub fn is_root(&self) -> bool {
        self.relative_path.is_empty()
    }
}

/// Ownership of a remote checkout lock.
///
/// A checkout is an exclusive remote lock tied to a host + local folder
/// pair. Two checkouts are the same ownership only when both match,
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutInfo {
    /// Whether the current user holds the checkout.
    pub by_me: bool,
    /// Host the file is checked out on.
    pub host: String,
    /// Local folder the checkout is registered against.
    pub folder: String,
}

impl CheckoutInfo {
    /// Tests whether this checkout is owned by the given host and folder.
    pub fn owned_by(&self, host: &str, folder: &str) -> bool {
        self.by_me
            && self.host.eq_ignore_ascii_case(host)
            && self.folder.eq_ignore_ascii_case(folder)
    }
}

/// A file entry inside a metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Index into the flattened list of project markers seen so far
    /// in the session, identifying the file's project.
    pub project_ref: usize,
    /// File name within the project.
    pub name: String,
    /// Content digest of the file's latest version.
    pub hash: ContentHash,
    /// Last modification time of the latest version.
    pub modified_at: DateTime<Utc>,
    /// Check-in time of the latest version.
    pub checked_in_at: DateTime<Utc>,
    /// Checkout lock state, if the file is checked out.
    pub checkout: Option<CheckoutInfo>,
}

impl FileRecord {
    /// Creates a record with no checkout lock.
    pub fn new(
        project_ref: usize,
        name: impl Into<String>,
        hash: ContentHash,
        modified_at: DateTime<Utc>,
        checked_in_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_ref,
            name: name.into(),
            hash,
            modified_at,
            checked_in_at,
            checkout: None,
        }
    }

    /// Attaches checkout lock state.
    pub fn with_checkout(mut self, checkout: CheckoutInfo) -> Self {
        self.checkout = Some(checkout);
        self
    }

    /// Returns true if the file is checked out by anyone.
    pub fn checked_out(&self) -> bool {
        self.checkout.is_some()
    }

    /// Returns true if the file is checked out by the current user.
    pub fn checked_out_by_me(&self) -> bool {
        self.checkout.as_ref().is_some_and(|c| c.by_me)
    }
}

/// One entry of a metadata block: a project marker or a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockRecord {
    /// A project marker; subsequent files may reference it.
    Project(ProjectRecord),
    /// A file entry.
    File(FileRecord),
}

impl BlockRecord {
    /// Returns the project marker, if this is one.
    pub fn as_project(&self) -> Option<&ProjectRecord> {
        match self {
            BlockRecord::Project(p) => Some(p),
            BlockRecord::File(_) => None,
        }
    }

    /// Returns the file record, if this is one.
    pub fn as_file(&self) -> Option<&FileRecord> {
        match self {
            BlockRecord::File(f) => Some(f),
            BlockRecord::Project(_) => None,
        }
    }
}
