//! Per-file reconciliation decisions.

use crate::config::{ExistingFileAction, FileTimePolicy, SyncOptions};
use crate::error::EngineResult;
use crate::localfs::{self, LocalHash};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use vcsmirror_protocol::FileRecord;

/// Observed state of a local file relative to its remote record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileState {
    /// Local file exists and matches the remote content.
    Exists,
    /// No local file.
    Missing,
    /// Local content differs from the remote record.
    Modified,
    /// Local version is older than the remote version.
    ///
    /// Reported by history-aware service paths; plain mirroring
    /// resolves staleness through the content hash instead.
    Outdated,
    /// Local and remote both changed; a merge would be required.
    NeedMerge,
    /// The local file is held by another process.
    Locked,
    /// The local state could not be determined.
    Error,
}

/// What the engine does with a file record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Leave the local file as it is.
    Skip,
    /// Fetch the remote content and write it locally.
    Fetch,
    /// Fetch the remote content and check the file out.
    FetchAndCheckout,
    /// Check the file out without overwriting local content.
    CheckoutOnly,
}

/// Final attribute a file receives after processing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileAttr {
    /// Protected mirror copy.
    ReadOnly,
    /// Locally editable.
    Normal,
}

/// The outcome of classifying one file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDecision {
    /// Observed local state.
    pub state: FileState,
    /// Chosen action.
    pub action: SyncAction,
    /// Resolved local file path.
    pub local_path: PathBuf,
    /// Resolved full remote path.
    pub remote_path: String,
    /// Explicit timestamp to stamp after writing, if the policy names
    /// one.
    pub file_time: Option<DateTime<Utc>>,
    /// Attribute the file receives after processing.
    pub final_attr: FileAttr,
    /// Whether payload bytes are requested from the remote. False when
    /// only attributes and timestamps need refreshing.
    pub want_data: bool,
}

/// Selects the explicit timestamp for a fetched file, if any.
fn select_file_time(record: &FileRecord, policy: FileTimePolicy) -> Option<DateTime<Utc>> {
    match policy {
        FileTimePolicy::Current => None,
        FileTimePolicy::Modification => Some(record.modified_at),
        FileTimePolicy::CheckIn => Some(record.checked_in_at),
    }
}

/// Tests whether the record's checkout is owned by this client: same
/// host and same local folder, held by the current user.
fn owned_here(record: &FileRecord, local_dir: &Path, options: &SyncOptions) -> bool {
    record
        .checkout
        .as_ref()
        .is_some_and(|c| c.owned_by(&options.host, &local_dir.to_string_lossy()))
}

/// Classifies one file record against the local filesystem.
///
/// Comparison is content-addressed: the local file is hashed and the
/// digest compared with the record's. A file that cannot be opened is
/// `Locked` and skipped, never an error.
///
/// The force-writable option is applied as a final override after
/// ordinary classification, so the hash is still computed and the
/// reported state stays truthful even though the comparison no longer
/// influences the action.
pub fn classify(
    record: &FileRecord,
    remote_path: &str,
    local_dir: &Path,
    options: &SyncOptions,
) -> EngineResult<FileDecision> {
    let local_path = local_dir.join(&record.name);
    let file_time = select_file_time(record, options.file_time);
    let owned = owned_here(record, local_dir, options);

    let mut state;
    let mut action = SyncAction::Skip;
    let mut final_attr = FileAttr::ReadOnly;
    let mut want_data = true;

    match localfs::probe(&local_path)? {
        None => {
            state = FileState::Missing;
            if local_dir.is_dir() {
                action = SyncAction::Fetch;
            }
        }
        Some(meta) => match localfs::hash_file(&local_path) {
            LocalHash::Locked => {
                state = FileState::Locked;
                tracing::warn!(path = %local_path.display(), "local file is locked, skipping");
            }
            LocalHash::Hash(local_hash) => {
                let need_write = local_hash != record.hash;
                state = if need_write {
                    FileState::Modified
                } else {
                    FileState::Exists
                };
                if meta.read_only {
                    if need_write {
                        action = SyncAction::Fetch;
                    }
                } else if options.make_writable && !need_write {
                    // Override below still forces the fetch.
                } else {
                    match options.existing_file.action {
                        ExistingFileAction::Replace => {
                            action = SyncAction::Fetch;
                            want_data = need_write;
                        }
                        ExistingFileAction::Leave => {}
                        ExistingFileAction::CheckOut => {
                            if !owned {
                                action = SyncAction::CheckoutOnly;
                                final_attr = FileAttr::Normal;
                            }
                        }
                    }
                }
            }
        },
    }

    if action == SyncAction::Fetch
        && owned
        && (options.make_writable || record.checked_out())
    {
        final_attr = FileAttr::Normal;
    }

    if options.make_writable {
        action = match action {
            SyncAction::CheckoutOnly => SyncAction::FetchAndCheckout,
            _ => SyncAction::Fetch,
        };
        final_attr = FileAttr::Normal;
        want_data = true;
    }

    Ok(FileDecision {
        state,
        action,
        local_path,
        remote_path: remote_path.to_string(),
        file_time,
        final_attr,
        want_data,
    })
}
