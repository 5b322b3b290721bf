//! Per-block data pipeline: fetch, decompress, write.

use crate::classify::FileAttr;
use crate::engine::Counters;
use crate::error::EngineError;
use crate::funnel::ErrorFunnel;
use crate::gate::Gate;
use crate::localfs;
use crate::remote::RemoteSource;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use vcsmirror_protocol::SessionId;

/// The three hand-off gates sequencing pipeline stages across blocks.
///
/// Each gate is a single slot: at most one fetch, one decompress, and
/// one write stage is in flight at any time, and no two stages of the
/// same block run concurrently. All gates start signaled (idle).
#[derive(Debug)]
pub struct PipelineGates {
    /// Held while a block's payloads are being fetched.
    pub fetch: Gate,
    /// Held while a block's payloads are being decompressed.
    pub decompress: Gate,
    /// Held while a block's files are being written.
    pub write: Gate,
}

impl PipelineGates {
    /// Creates the gates, all idle.
    pub fn new() -> Self {
        Self {
            fetch: Gate::new(true),
            decompress: Gate::new(true),
            write: Gate::new(true),
        }
    }

    /// Waits until every stage still in flight has finished.
    ///
    /// Stages release their gates on failure too, so draining never
    /// deadlocks.
    pub fn drain(&self) {
        self.fetch.wait();
        self.decompress.wait();
        self.write.wait();
    }
}

impl Default for PipelineGates {
    fn default() -> Self {
        Self::new()
    }
}

/// A file record selected for fetching, owned by the pipeline from
/// creation to the final write.
#[derive(Debug, Clone)]
pub struct TransferItem {
    /// Index of the record within its block; payload arrays are
    /// aligned to it.
    pub record_index: usize,
    /// Full remote path, for diagnostics.
    pub remote_path: String,
    /// Destination file path.
    pub local_path: PathBuf,
    /// Explicit timestamp to stamp after the write, if any.
    pub file_time: Option<DateTime<Utc>>,
    /// Attribute the file receives afterwards.
    pub final_attr: FileAttr,
}

/// Executes stages A (fetch), B (decompress), and C (write) for one
/// block on a background thread.
pub struct BlockPipeline;

impl BlockPipeline {
    /// Spawns the pipeline for a block.
    ///
    /// The caller must hold the fetch slot (have consumed the fetch
    /// gate's signal); the spawned stage releases it once the
    /// decompress slot is acquired, letting the orchestrator overlap
    /// the next block's metadata and classification. A stage that
    /// fails reports to the funnel and still releases the gates it
    /// holds.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<R: RemoteSource + 'static>(
        remote: R,
        session: SessionId,
        block_index: u64,
        items: Vec<TransferItem>,
        gates: Arc<PipelineGates>,
        funnel: Arc<ErrorFunnel>,
        counters: Arc<Counters>,
        poll_interval: Duration,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            run_stages(
                &remote,
                session,
                block_index,
                items,
                &gates,
                &funnel,
                &counters,
                poll_interval,
            );
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn run_stages<R: RemoteSource>(
    remote: &R,
    session: SessionId,
    block_index: u64,
    items: Vec<TransferItem>,
    gates: &PipelineGates,
    funnel: &ErrorFunnel,
    counters: &Counters,
    poll_interval: Duration,
) {
    // Stage A: fetch raw payloads, retrying while the remote has no
    // data ready. Holds the fetch slot; releases it only after the
    // decompress slot is acquired.
    let fetched = loop {
        match remote.fetch_block_data(&session, block_index) {
            Ok(payloads) => break Some(payloads),
            Err(EngineError::NotReady) => std::thread::sleep(poll_interval),
            Err(error) => {
                funnel.report(error);
                break None;
            }
        }
    };
    gates.decompress.wait();
    gates.fetch.set();

    // Stage B: decompress. A payload that fails to decompress is
    // degraded to "no change" with a warning; the entry then gets
    // attribute handling only.
    let decompressed: Option<Vec<(TransferItem, Option<Vec<u8>>)>> = fetched.map(|payloads| {
        items
            .into_iter()
            .map(|item| {
                let payload = payloads
                    .get(item.record_index)
                    .and_then(|raw| raw.as_ref())
                    .and_then(|raw| match decompress(raw) {
                        Ok(data) => Some(data),
                        Err(_) => {
                            counters.decompress_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                path = %item.remote_path,
                                "payload failed to decompress, keeping local copy"
                            );
                            None
                        }
                    });
                (item, payload)
            })
            .collect()
    });
    gates.write.wait();
    gates.decompress.set();

    // Stage C: write content, stamp the timestamp, set the final
    // attribute. Entries without a payload have their existing file's
    // attribute set without a content write.
    if let Some(entries) = decompressed {
        for (item, payload) in entries {
            if let Err(error) = apply_entry(&item, payload.as_deref(), counters) {
                funnel.report(error);
                break;
            }
        }
    }
    gates.write.set();
}

fn decompress(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    ZlibDecoder::new(raw).read_to_end(&mut data)?;
    Ok(data)
}

fn apply_entry(
    item: &TransferItem,
    payload: Option<&[u8]>,
    counters: &Counters,
) -> Result<(), EngineError> {
    match payload {
        Some(data) => {
            localfs::write_file(&item.local_path, data)?;
            if let Some(when) = item.file_time {
                localfs::set_file_time(&item.local_path, when)?;
            }
            localfs::set_attr(&item.local_path, item.final_attr)?;
            counters.files_written.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %item.local_path.display(), "file written");
        }
        None => {
            if localfs::probe(&item.local_path)?.is_some() {
                localfs::set_attr(&item.local_path, item.final_attr)?;
            }
        }
    }
    Ok(())
}
