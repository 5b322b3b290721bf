//! Configuration for a synchronization run.

use std::time::Duration;
use vcsmirror_protocol::RevisionSelector;

/// What to do with a local file that already exists and is writable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExistingFileAction {
    /// Fetch the remote version, refreshing content, attributes, and
    /// timestamp even when the content already matches.
    Replace,
    /// Leave the local file untouched.
    Leave,
    /// Check the file out instead of overwriting it.
    CheckOut,
}

/// Caller-supplied policy for writable local copies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExistingFilePolicy {
    /// The action to take.
    pub action: ExistingFileAction,
    /// Whether the caller chose the action for every remaining file.
    ///
    /// Carried for callers that prompt per file; the engine itself
    /// applies `action` uniformly either way.
    pub apply_to_all: bool,
}

impl ExistingFilePolicy {
    /// Creates a policy.
    pub fn new(action: ExistingFileAction, apply_to_all: bool) -> Self {
        Self {
            action,
            apply_to_all,
        }
    }
}

impl Default for ExistingFilePolicy {
    fn default() -> Self {
        Self::new(ExistingFileAction::Replace, false)
    }
}

/// Which timestamp a fetched file receives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FileTimePolicy {
    /// The time of the write itself; no explicit stamp is applied.
    #[default]
    Current,
    /// The remote record's modification time.
    Modification,
    /// The remote record's check-in time.
    CheckIn,
}

/// Options for a synchronization run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Host name reported to the remote service; checkout ownership is
    /// tested against it.
    pub host: String,
    /// Build the local directory tree from remote paths under the root.
    /// When false, the checkout-folder hint on each project marker is
    /// used verbatim.
    pub build_tree: bool,
    /// Descend into subprojects.
    pub recursive: bool,
    /// Force every fetched file writable, overriding ordinary
    /// classification.
    pub make_writable: bool,
    /// Policy for existing writable local files.
    pub existing_file: ExistingFilePolicy,
    /// Timestamp policy for fetched files.
    pub file_time: FileTimePolicy,
    /// Revision of the remote tree to mirror.
    pub revision: RevisionSelector,
    /// Clear the destination root before the run, so the mirror
    /// reflects exactly the fetched remote state. When off, existing
    /// files are reconciled in place by content hash.
    pub clean_destination: bool,
    /// Directory name preserved when the destination root is cleared
    /// before the run.
    pub control_dir: String,
    /// Interval between session keep-alive calls.
    pub heartbeat_interval: Duration,
    /// Delay between retries of transient "not ready" conditions.
    pub poll_interval: Duration,
}

impl SyncOptions {
    /// Creates options with the given client host name.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            build_tree: true,
            recursive: true,
            make_writable: false,
            existing_file: ExistingFilePolicy::default(),
            file_time: FileTimePolicy::default(),
            revision: RevisionSelector::Latest,
            clean_destination: true,
            control_dir: ".git".into(),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Sets whether the local tree is built from remote paths.
    pub fn with_build_tree(mut self, build_tree: bool) -> Self {
        self.build_tree = build_tree;
        self
    }

    /// Sets whether subprojects are included.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Forces fetched files writable.
    pub fn with_make_writable(mut self, make_writable: bool) -> Self {
        self.make_writable = make_writable;
        self
    }

    /// Sets the policy for existing writable files.
    pub fn with_existing_file(mut self, policy: ExistingFilePolicy) -> Self {
        self.existing_file = policy;
        self
    }

    /// Sets the timestamp policy.
    pub fn with_file_time(mut self, file_time: FileTimePolicy) -> Self {
        self.file_time = file_time;
        self
    }

    /// Selects the revision to mirror.
    pub fn with_revision(mut self, revision: RevisionSelector) -> Self {
        self.revision = revision;
        self
    }

    /// Sets whether the destination is cleared before the run.
    pub fn with_clean_destination(mut self, clean: bool) -> Self {
        self.clean_destination = clean;
        self
    }

    /// Sets the preserved control directory name.
    pub fn with_control_dir(mut self, name: impl Into<String>) -> Self {
        self.control_dir = name.into();
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the transient-retry poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new("localhost")
    }
}
