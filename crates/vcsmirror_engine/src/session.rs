//! Background tasks serving an open session.

use crate::error::EngineError;
use crate::funnel::ErrorFunnel;
use crate::gate::Gate;
use crate::remote::RemoteSource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use vcsmirror_protocol::{MetadataBlock, SessionId};

/// Keeps a remote session alive with periodic no-op calls.
///
/// Best-effort: a failed keep-alive is swallowed. Losing the heartbeat
/// does not abort the run by itself; a later protocol call failing on
/// the expired session will.
pub struct Heartbeat {
    stop: Arc<Gate>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Starts the heartbeat thread.
    pub fn start<R: RemoteSource + 'static>(
        remote: Arc<R>,
        session: SessionId,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(Gate::new(false));
        let stop_signal = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !stop_signal.wait_timeout(interval) {
                if let Err(error) = remote.touch_session(&session) {
                    tracing::debug!(%session, %error, "session keep-alive failed");
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the heartbeat and waits for the thread to exit.
    pub fn stop(mut self) {
        self.stop.set();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct PrefetchShared {
    request: Gate,
    ready: Gate,
    slot: Mutex<Option<MetadataBlock>>,
    stopped: AtomicBool,
}

/// Pulls metadata blocks on a dedicated thread, one at a time.
///
/// The orchestrator `request`s the next block while it processes the
/// current one and `take`s it when ready; the request/ready gate pair
/// keeps exactly one `next_block` call in flight, bounding prefetch
/// depth to one block. Transient "no data yet" replies are retried on
/// the poll interval; any other failure goes to the error funnel and
/// the ready gate is still released so the orchestrator observes the
/// failure at its next checkpoint instead of deadlocking.
pub struct BlockPrefetcher {
    shared: Arc<PrefetchShared>,
    handle: Option<JoinHandle<()>>,
}

impl BlockPrefetcher {
    /// Starts the prefetch thread.
    pub fn start<R: RemoteSource + 'static>(
        remote: Arc<R>,
        session: SessionId,
        funnel: Arc<ErrorFunnel>,
        poll_interval: Duration,
    ) -> Self {
        let shared = Arc::new(PrefetchShared {
            request: Gate::new(false),
            ready: Gate::new(false),
            slot: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || loop {
            thread_shared.request.wait();
            if thread_shared.stopped.load(Ordering::SeqCst) {
                break;
            }
            let block = loop {
                match remote.next_block(&session) {
                    Ok(block) => break Some(block),
                    Err(EngineError::NotReady) => {
                        if thread_shared.stopped.load(Ordering::SeqCst) {
                            break None;
                        }
                        std::thread::sleep(poll_interval);
                    }
                    Err(error) => {
                        funnel.report(error);
                        break None;
                    }
                }
            };
            *thread_shared.slot.lock() = block;
            thread_shared.ready.set();
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Asks the thread to pull the next block.
    pub fn request(&self) {
        self.shared.request.set();
    }

    /// Waits for the requested block. `None` means the pull failed and
    /// the failure is in the funnel.
    pub fn take(&self) -> Option<MetadataBlock> {
        self.shared.ready.wait();
        self.shared.slot.lock().take()
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.request.set();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use vcsmirror_protocol::OpenRequest;

    fn open(remote: &InMemoryRemote) -> SessionId {
        remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap()
            .session
    }

    #[test]
    fn heartbeat_touches_until_stopped() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.add_file("", "a.txt", b"a".to_vec());
        let session = open(&remote);

        let heartbeat = Heartbeat::start(
            Arc::clone(&remote),
            session,
            Duration::from_millis(10),
        );
        std::thread::sleep(Duration::from_millis(80));
        heartbeat.stop();

        assert!(remote.touch_count(&session) >= 2);
    }

    #[test]
    fn prefetcher_delivers_blocks_in_order() {
        let remote = Arc::new(InMemoryRemote::new().with_block_size(2));
        remote.add_file("", "a.txt", b"a".to_vec());
        remote.add_file("", "b.txt", b"b".to_vec());
        remote.add_file("", "c.txt", b"c".to_vec());
        let session = open(&remote);

        let funnel = Arc::new(ErrorFunnel::new());
        let prefetcher = BlockPrefetcher::start(
            Arc::clone(&remote),
            session,
            Arc::clone(&funnel),
            Duration::from_millis(1),
        );

        prefetcher.request();
        let first = prefetcher.take().expect("first block");
        assert_eq!(first.index, 0);
        assert!(first.has_more);

        prefetcher.request();
        let second = prefetcher.take().expect("second block");
        assert_eq!(second.index, 1);
        assert!(!second.has_more);

        prefetcher.shutdown();
        assert!(funnel.is_empty());
    }

    #[test]
    fn prefetcher_retries_transient_delays() {
        let remote = Arc::new(
            InMemoryRemote::new().with_block_delay(3),
        );
        remote.add_file("", "a.txt", b"a".to_vec());
        let session = open(&remote);

        let funnel = Arc::new(ErrorFunnel::new());
        let prefetcher = BlockPrefetcher::start(
            Arc::clone(&remote),
            session,
            Arc::clone(&funnel),
            Duration::from_millis(1),
        );

        prefetcher.request();
        assert!(prefetcher.take().is_some());
        prefetcher.shutdown();
        assert!(funnel.is_empty());
    }

    #[test]
    fn prefetcher_funnels_failures_and_still_signals() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.add_file("", "a.txt", b"a".to_vec());
        let session = open(&remote);
        remote.inject_block_error(EngineError::remote_fatal("connection reset"));

        let funnel = Arc::new(ErrorFunnel::new());
        let prefetcher = BlockPrefetcher::start(
            Arc::clone(&remote),
            session,
            Arc::clone(&funnel),
            Duration::from_millis(1),
        );

        prefetcher.request();
        assert!(prefetcher.take().is_none());
        assert!(funnel.checkpoint().is_err());
        prefetcher.shutdown();
    }

    #[test]
    fn shutdown_without_request_exits() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.add_file("", "a.txt", b"a".to_vec());
        let session = open(&remote);

        let funnel = Arc::new(ErrorFunnel::new());
        let prefetcher = BlockPrefetcher::start(
            Arc::clone(&remote),
            session,
            funnel,
            Duration::from_millis(1),
        );
        prefetcher.shutdown();
    }
}
