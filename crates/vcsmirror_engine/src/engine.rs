//! The synchronization orchestrator.

use crate::classify::{classify, FileAttr, FileState, SyncAction};
use crate::config::SyncOptions;
use crate::error::{EngineError, EngineResult};
use crate::funnel::ErrorFunnel;
use crate::localfs;
use crate::pathmap::{resolve_project_dir, LocalPathIndex};
use crate::pipeline::{BlockPipeline, PipelineGates, TransferItem};
use crate::remote::RemoteSource;
use crate::session::{BlockPrefetcher, Heartbeat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use vcsmirror_protocol::{
    CheckOutEntry, CheckOutRequest, MetadataBlock, OpenRequest, SessionId,
};

/// Run statistics shared with the pipeline threads.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub files_written: AtomicU64,
    pub files_checked_out: AtomicU64,
    pub skipped: AtomicU64,
    pub locked: AtomicU64,
    pub checkout_denials: AtomicU64,
    pub decompress_failures: AtomicU64,
}

/// Result of a completed synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Record count the session announced at open.
    pub expected_records: u64,
    /// Metadata blocks processed.
    pub blocks_processed: u64,
    /// Files fetched and written to disk.
    pub files_written: u64,
    /// Files checked out (granted).
    pub files_checked_out: u64,
    /// File records skipped as already up to date or per policy.
    pub skipped: u64,
    /// Files skipped because another process held them.
    pub locked: u64,
    /// Checkout requests the remote denied.
    pub checkout_denials: u64,
    /// Payloads that failed to decompress.
    pub decompress_failures: u64,
}

impl Counters {
    fn summarize(&self, expected_records: u64, blocks_processed: u64) -> SyncSummary {
        SyncSummary {
            expected_records,
            blocks_processed,
            files_written: self.files_written.load(Ordering::Relaxed),
            files_checked_out: self.files_checked_out.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            locked: self.locked.load(Ordering::Relaxed),
            checkout_denials: self.checkout_denials.load(Ordering::Relaxed),
            decompress_failures: self.decompress_failures.load(Ordering::Relaxed),
        }
    }
}

/// Mirrors a remote project tree into a local directory.
///
/// Generic over the remote boundary so tests and alternative services
/// plug in behind [`RemoteSource`].
pub struct Synchronizer<R: RemoteSource + 'static> {
    remote: Arc<R>,
    options: SyncOptions,
}

/// Mutable reconciliation state scoped to one run.
struct RunState {
    /// Flattened relative paths of every project marker seen, in
    /// delivery order; file back-references index into it.
    path_list: Vec<String>,
    index: LocalPathIndex,
    blocks_processed: u64,
}

impl<R: RemoteSource + 'static> Synchronizer<R> {
    /// Creates a synchronizer.
    pub fn new(remote: R, options: SyncOptions) -> Self {
        Self {
            remote: Arc::new(remote),
            options,
        }
    }

    /// Runs one full synchronization of `remote_path` into
    /// `local_root`.
    ///
    /// The destination is cleared first (except the control
    /// directory), then every metadata block is reconciled and its
    /// fetches written before the next block's reconciliation begins.
    /// On failure the session is still closed and background work is
    /// drained; writes already committed are not rolled back.
    pub fn synchronize(&self, remote_path: &str, local_root: &Path) -> EngineResult<SyncSummary> {
        let remote_path = remote_path.trim_end_matches('/');
        if self.options.clean_destination {
            localfs::clean_destination(local_root, &self.options.control_dir)?;
        } else {
            localfs::ensure_dir(local_root)?;
        }

        let reply = self.remote.open_session(&OpenRequest {
            host: self.options.host.clone(),
            path: remote_path.to_string(),
            recursive: self.options.recursive,
            revision: self.options.revision,
        })?;
        let session = reply.session;
        tracing::info!(
            %session,
            path = remote_path,
            expected = reply.expected_records,
            "synchronization session opened"
        );
        for denial in self.remote.take_access_info(&session)? {
            tracing::warn!(object = %denial.object, "no read permission, subtree skipped");
        }

        let funnel = Arc::new(ErrorFunnel::new());
        let counters = Arc::new(Counters::default());
        let gates = Arc::new(PipelineGates::new());
        let heartbeat = Heartbeat::start(
            Arc::clone(&self.remote),
            session,
            self.options.heartbeat_interval,
        );
        let prefetcher = BlockPrefetcher::start(
            Arc::clone(&self.remote),
            session,
            Arc::clone(&funnel),
            self.options.poll_interval,
        );

        let mut state = RunState {
            path_list: Vec::new(),
            index: LocalPathIndex::new(),
            blocks_processed: 0,
        };
        let mut pipelines: Vec<JoinHandle<()>> = Vec::new();

        let result = self.run_blocks(
            session,
            remote_path,
            local_root,
            &prefetcher,
            &gates,
            &funnel,
            &counters,
            &mut state,
            &mut pipelines,
        );

        // Cleanup runs on success and failure alike: drain in-flight
        // hand-offs first, then stop the background tasks, then close
        // the session.
        gates.drain();
        for pipeline in pipelines {
            let _ = pipeline.join();
        }
        prefetcher.shutdown();
        heartbeat.stop();
        let closed = self.remote.close_session(&session);

        result?;
        funnel.checkpoint()?;
        closed?;
        tracing::info!(%session, "synchronization session closed");
        Ok(counters.summarize(reply.expected_records, state.blocks_processed))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_blocks(
        &self,
        session: SessionId,
        remote_path: &str,
        local_root: &Path,
        prefetcher: &BlockPrefetcher,
        gates: &Arc<PipelineGates>,
        funnel: &Arc<ErrorFunnel>,
        counters: &Arc<Counters>,
        state: &mut RunState,
        pipelines: &mut Vec<JoinHandle<()>>,
    ) -> EngineResult<()> {
        prefetcher.request();
        loop {
            let block = prefetcher.take();
            funnel.checkpoint()?;
            let block = block.ok_or_else(|| {
                EngineError::Protocol("metadata stream ended unexpectedly".into())
            })?;
            // Overlap the next block's metadata with this block's work.
            if block.has_more {
                prefetcher.request();
            }

            let (items, wanted, checkouts) =
                self.reconcile_block(&block, remote_path, local_root, state, counters)?;

            if items.is_empty() {
                // No fetch work: the fetch slot still serves as the
                // checkpoint where the previous block's stage A is
                // awaited.
                gates.fetch.wait();
                let checked = funnel.checkpoint();
                gates.fetch.set();
                checked?;
            } else {
                self.remote
                    .request_block_data(&session, block.index, &wanted)?;
                gates.fetch.wait();
                if let Err(error) = funnel.checkpoint() {
                    gates.fetch.set();
                    return Err(error);
                }
                pipelines.push(BlockPipeline::spawn(
                    Arc::clone(&self.remote),
                    session,
                    block.index,
                    items,
                    Arc::clone(gates),
                    Arc::clone(funnel),
                    Arc::clone(counters),
                    self.options.poll_interval,
                ));
            }

            if !checkouts.is_empty() {
                self.check_out_batch(session, checkouts, counters)?;
            }

            state.blocks_processed += 1;
            tracing::debug!(
                block = block.index,
                magic_pos = block.magic_pos,
                "block processed"
            );
            if !block.has_more {
                return Ok(());
            }
        }
    }

    /// Classifies every record of a block. Returns the pending
    /// transfers, the aligned wanted-payload mask, and the checkout
    /// batch.
    fn reconcile_block(
        &self,
        block: &MetadataBlock,
        remote_path: &str,
        local_root: &Path,
        state: &mut RunState,
        counters: &Counters,
    ) -> EngineResult<(Vec<TransferItem>, Vec<bool>, Vec<(CheckOutEntry, PathBuf)>)> {
        if let Some(index) = block.first_invalid_back_ref(state.path_list.len()) {
            return Err(EngineError::Protocol(format!(
                "block {}: record {index} references a project marker not yet seen",
                block.index
            )));
        }

        let mut items = Vec::new();
        let mut wanted = vec![false; block.len()];
        let mut checkouts = Vec::new();

        for (record_index, record) in block.records.iter().enumerate() {
            match record {
                vcsmirror_protocol::BlockRecord::Project(marker) => {
                    let full_remote = join_remote(remote_path, &marker.relative_path);
                    let local_dir = resolve_project_dir(
                        local_root,
                        &marker.relative_path,
                        self.options.build_tree,
                        marker.checkout_folder.as_deref(),
                    )?;
                    state.index.insert(&full_remote, local_dir);
                    state.path_list.push(marker.relative_path.clone());
                }
                vcsmirror_protocol::BlockRecord::File(file) => {
                    let relative = &state.path_list[file.project_ref];
                    let project_remote = join_remote(remote_path, relative);
                    let local_dir = state.index.get(&project_remote).ok_or_else(|| {
                        EngineError::Protocol(format!(
                            "project '{project_remote}' has no local mapping"
                        ))
                    })?;
                    let file_remote = format!("{project_remote}/{}", file.name);
                    let decision =
                        classify(file, &file_remote, local_dir, &self.options)?;

                    if decision.state == FileState::Locked {
                        counters.locked.fetch_add(1, Ordering::Relaxed);
                    }
                    match decision.action {
                        SyncAction::Skip => {
                            counters.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        SyncAction::Fetch => {
                            wanted[record_index] = decision.want_data;
                            items.push(TransferItem {
                                record_index,
                                remote_path: decision.remote_path,
                                local_path: decision.local_path,
                                file_time: decision.file_time,
                                final_attr: decision.final_attr,
                            });
                        }
                        SyncAction::FetchAndCheckout => {
                            wanted[record_index] = decision.want_data;
                            checkouts.push((
                                CheckOutEntry::new(
                                    decision.remote_path.clone(),
                                    local_dir.to_string_lossy().into_owned(),
                                ),
                                decision.local_path.clone(),
                            ));
                            items.push(TransferItem {
                                record_index,
                                remote_path: decision.remote_path,
                                local_path: decision.local_path,
                                file_time: decision.file_time,
                                final_attr: decision.final_attr,
                            });
                        }
                        SyncAction::CheckoutOnly => {
                            checkouts.push((
                                CheckOutEntry::new(
                                    decision.remote_path,
                                    local_dir.to_string_lossy().into_owned(),
                                ),
                                decision.local_path,
                            ));
                        }
                    }
                }
            }
        }
        Ok((items, wanted, checkouts))
    }

    /// Issues one batched checkout for the block and applies lock
    /// ownership to file attributes.
    fn check_out_batch(
        &self,
        session: SessionId,
        checkouts: Vec<(CheckOutEntry, PathBuf)>,
        counters: &Counters,
    ) -> EngineResult<()> {
        let entries: Vec<CheckOutEntry> =
            checkouts.iter().map(|(entry, _)| entry.clone()).collect();
        let request = CheckOutRequest::new(self.options.host.clone(), entries);
        let denials = self.remote.check_out(&session, &request)?;
        let denied: Vec<Option<usize>> = denials.iter().map(|d| d.entry).collect();

        for (i, (entry, local_path)) in checkouts.iter().enumerate() {
            if denied.contains(&Some(i)) {
                counters.checkout_denials.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %entry.remote_path, "checkout denied");
            } else {
                counters.files_checked_out.fetch_add(1, Ordering::Relaxed);
                if localfs::probe(local_path)?.is_some() {
                    localfs::set_attr(local_path, FileAttr::Normal)?;
                }
            }
        }
        Ok(())
    }
}

/// Joins a relative project path onto the session's remote root.
fn join_remote(remote_path: &str, relative: &str) -> String {
    if relative.is_empty() {
        remote_path.to_string()
    } else {
        format!("{remote_path}/{relative}")
    }
}

/// Runs one synchronization as a single call.
///
/// Convenience wrapper over [`Synchronizer`] for callers that do not
/// keep the engine around.
pub fn synchronize<R: RemoteSource + 'static>(
    remote: R,
    remote_path: &str,
    local_root: &Path,
    options: SyncOptions,
) -> EngineResult<SyncSummary> {
    Synchronizer::new(remote, options).synchronize(remote_path, local_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_remote_handles_root_and_nested() {
        assert_eq!(join_remote("$/proj", ""), "$/proj");
        assert_eq!(join_remote("$/proj", "lib/net"), "$/proj/lib/net");
    }

    #[test]
    fn counters_summarize() {
        let counters = Counters::default();
        counters.files_written.store(3, Ordering::Relaxed);
        counters.skipped.store(2, Ordering::Relaxed);

        let summary = counters.summarize(10, 4);
        assert_eq!(summary.expected_records, 10);
        assert_eq!(summary.blocks_processed, 4);
        assert_eq!(summary.files_written, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.locked, 0);
    }
}
