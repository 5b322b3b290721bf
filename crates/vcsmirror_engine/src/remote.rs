//! Remote metadata source abstraction.

use crate::error::{EngineError, EngineResult};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use vcsmirror_protocol::{
    AccessDenied, BlockRecord, CheckOutRequest, CheckoutInfo, ContentHash, FileRecord,
    MetadataBlock, OpenReply, OpenRequest, ProjectRecord, SessionId,
};

/// The remote service boundary consumed by the engine.
///
/// Implementations deliver metadata in blocks and raw file payloads on
/// demand. `next_block` and `fetch_block_data` may return
/// [`EngineError::NotReady`] as a transient condition; callers retry it
/// in a loop. Every other error is terminal for the call.
pub trait RemoteSource: Send + Sync {
    /// Opens a synchronization session for a remote path.
    fn open_session(&self, request: &OpenRequest) -> EngineResult<OpenReply>;

    /// Takes pending per-object access denials for the session.
    ///
    /// Called once right after open; denials are warnings, not aborts.
    fn take_access_info(&self, session: &SessionId) -> EngineResult<Vec<AccessDenied>>;

    /// Pulls the next metadata block.
    fn next_block(&self, session: &SessionId) -> EngineResult<MetadataBlock>;

    /// Announces which records of a block the client wants payloads for.
    ///
    /// `wanted` is aligned to the block's records; project markers are
    /// always false.
    fn request_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
        wanted: &[bool],
    ) -> EngineResult<()>;

    /// Fetches the raw (still-compressed) payloads announced earlier.
    ///
    /// The result is aligned to the block's records; unwanted indices
    /// are `None`.
    fn fetch_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
    ) -> EngineResult<Vec<Option<Vec<u8>>>>;

    /// Issues a batched checkout. Returns denials for entries that
    /// could not be locked.
    fn check_out(
        &self,
        session: &SessionId,
        request: &CheckOutRequest,
    ) -> EngineResult<Vec<AccessDenied>>;

    /// Session keep-alive. Issued periodically by the heartbeat task.
    fn touch_session(&self, session: &SessionId) -> EngineResult<()>;

    /// Ends the session on the remote.
    fn close_session(&self, session: &SessionId) -> EngineResult<()>;
}

impl<R: RemoteSource + ?Sized> RemoteSource for std::sync::Arc<R> {
    fn open_session(&self, request: &OpenRequest) -> EngineResult<OpenReply> {
        (**self).open_session(request)
    }

    fn take_access_info(&self, session: &SessionId) -> EngineResult<Vec<AccessDenied>> {
        (**self).take_access_info(session)
    }

    fn next_block(&self, session: &SessionId) -> EngineResult<MetadataBlock> {
        (**self).next_block(session)
    }

    fn request_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
        wanted: &[bool],
    ) -> EngineResult<()> {
        (**self).request_block_data(session, block_index, wanted)
    }

    fn fetch_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
    ) -> EngineResult<Vec<Option<Vec<u8>>>> {
        (**self).fetch_block_data(session, block_index)
    }

    fn check_out(
        &self,
        session: &SessionId,
        request: &CheckOutRequest,
    ) -> EngineResult<Vec<AccessDenied>> {
        (**self).check_out(session, request)
    }

    fn touch_session(&self, session: &SessionId) -> EngineResult<()> {
        (**self).touch_session(session)
    }

    fn close_session(&self, session: &SessionId) -> EngineResult<()> {
        (**self).close_session(session)
    }
}

/// A file in the in-memory remote tree.
#[derive(Debug, Clone)]
struct RemoteFile {
    project: String,
    name: String,
    content: Vec<u8>,
    modified_at: chrono::DateTime<chrono::Utc>,
    checked_in_at: chrono::DateTime<chrono::Utc>,
    checkout: Option<CheckoutInfo>,
}

#[derive(Debug, Default)]
struct SessionState {
    blocks: Vec<MetadataBlock>,
    next_block: usize,
    wanted: HashMap<u64, Vec<bool>>,
    touches: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: Vec<RemoteFile>,
    projects: Vec<String>,
    project_hints: HashMap<String, String>,
    denied_projects: Vec<String>,
    denied_checkouts: HashSet<String>,
    checked_out: Vec<String>,
    sessions: HashMap<SessionId, SessionState>,
    last_session: Option<SessionId>,
    block_delays: u32,
    data_delays: u32,
    scripted_blocks: Option<Vec<MetadataBlock>>,
    block_fault: Option<EngineError>,
    data_fault: Option<EngineError>,
}

/// An in-memory remote service.
///
/// Serves a scripted project tree over the full [`RemoteSource`]
/// contract: zlib-compressed payloads, per-session bookkeeping,
/// transient-delay simulation, and one-shot fault injection. Used by
/// the engine's tests and as a reference implementation of the
/// boundary.
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    block_size: usize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// Creates an empty remote tree.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            block_size: 64,
        }
    }

    /// Sets how many records each metadata block carries.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be positive");
        self.block_size = block_size;
        self
    }

    /// Makes the first `n` `next_block` calls report no data yet.
    pub fn with_block_delay(self, n: u32) -> Self {
        self.state.lock().block_delays = n;
        self
    }

    /// Makes the first `n` `fetch_block_data` calls report no data yet.
    pub fn with_data_delay(self, n: u32) -> Self {
        self.state.lock().data_delays = n;
        self
    }

    /// Serves exactly the given blocks instead of deriving them from
    /// the tree. For protocol-violation tests.
    pub fn with_scripted_blocks(self, blocks: Vec<MetadataBlock>) -> Self {
        self.state.lock().scripted_blocks = Some(blocks);
        self
    }

    /// Adds a file to the tree. `project` is relative to the session
    /// root, empty for the root project itself.
    pub fn add_file(
        &self,
        project: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) {
        let now = chrono::Utc::now();
        self.add_file_at(project, name, content, now, now);
    }

    /// Adds a file with explicit modification and check-in times.
    pub fn add_file_at(
        &self,
        project: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        modified_at: chrono::DateTime<chrono::Utc>,
        checked_in_at: chrono::DateTime<chrono::Utc>,
    ) {
        let project = project.into();
        let mut state = self.state.lock();
        register_project(&mut state, &project);
        state.files.push(RemoteFile {
            project,
            name: name.into(),
            content: content.into(),
            modified_at,
            checked_in_at,
            checkout: None,
        });
    }

    /// Registers a project marker even if it has no files.
    pub fn add_project(&self, project: impl Into<String>) {
        register_project(&mut self.state.lock(), &project.into());
    }

    /// Sets the checkout-folder hint carried by a project's marker.
    pub fn set_project_hint(&self, project: impl Into<String>, folder: impl Into<String>) {
        let project = project.into();
        let mut state = self.state.lock();
        register_project(&mut state, &project);
        state.project_hints.insert(project, folder.into());
    }

    /// Marks a file as checked out.
    pub fn set_checkout(
        &self,
        project: &str,
        name: &str,
        by_me: bool,
        host: impl Into<String>,
        folder: impl Into<String>,
    ) {
        let checkout = CheckoutInfo {
            by_me,
            host: host.into(),
            folder: folder.into(),
        };
        let mut state = self.state.lock();
        if let Some(file) = state
            .files
            .iter_mut()
            .find(|f| f.project == project && f.name == name)
        {
            file.checkout = Some(checkout);
        }
    }

    /// Denies read access to a project; surfaced at session open.
    pub fn deny_project(&self, project: impl Into<String>) {
        self.state.lock().denied_projects.push(project.into());
    }

    /// Denies checkout of a remote path.
    pub fn deny_checkout(&self, remote_path: impl Into<String>) {
        self.state.lock().denied_checkouts.insert(remote_path.into());
    }

    /// Fails the next `next_block` call with the given error. One-shot.
    pub fn inject_block_error(&self, error: EngineError) {
        self.state.lock().block_fault = Some(error);
    }

    /// Fails the next `fetch_block_data` call with the given error.
    /// One-shot.
    pub fn inject_data_error(&self, error: EngineError) {
        self.state.lock().data_fault = Some(error);
    }

    /// The most recently opened session, for post-run inspection.
    pub fn last_session(&self) -> Option<SessionId> {
        self.state.lock().last_session
    }

    /// Number of keep-alive calls the session has received.
    pub fn touch_count(&self, session: &SessionId) -> u64 {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| s.touches)
            .unwrap_or(0)
    }

    /// Whether the session was closed.
    pub fn is_closed(&self, session: &SessionId) -> bool {
        self.state
            .lock()
            .sessions
            .get(session)
            .is_some_and(|s| s.closed)
    }

    /// Remote paths successfully checked out so far.
    pub fn checked_out_paths(&self) -> Vec<String> {
        self.state.lock().checked_out.clone()
    }

    fn build_blocks(&self, state: &RemoteState, recursive: bool) -> Vec<MetadataBlock> {
        if let Some(scripted) = &state.scripted_blocks {
            return scripted.clone();
        }

        let mut records = Vec::new();
        for (marker_index, project) in state.projects.iter().enumerate() {
            if !recursive && !project.is_empty() {
                continue;
            }
            let mut marker = ProjectRecord::new(project.clone());
            if let Some(hint) = state.project_hints.get(project) {
                marker = marker.with_checkout_folder(hint.clone());
            }
            records.push(BlockRecord::Project(marker));
            for file in state.files.iter().filter(|f| &f.project == project) {
                let mut record = FileRecord::new(
                    marker_index,
                    file.name.clone(),
                    ContentHash::digest(&file.content),
                    file.modified_at,
                    file.checked_in_at,
                );
                if let Some(checkout) = &file.checkout {
                    record = record.with_checkout(checkout.clone());
                }
                records.push(BlockRecord::File(record));
            }
        }

        let chunks: Vec<Vec<BlockRecord>> = records
            .chunks(self.block_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = chunks.len().max(1);
        let mut magic_pos = 0u64;
        let mut blocks = Vec::with_capacity(total);
        for (i, chunk) in chunks.into_iter().enumerate() {
            magic_pos += chunk.len() as u64;
            blocks.push(MetadataBlock::new(
                i as u64,
                magic_pos,
                i + 1 < total,
                chunk,
            ));
        }
        if blocks.is_empty() {
            blocks.push(MetadataBlock::new(0, 0, false, Vec::new()));
        }
        blocks
    }
}

/// Records the project's marker position; root first, parents before
/// children in insertion order.
fn register_project(state: &mut RemoteState, project: &str) {
    if state.projects.is_empty() {
        state.projects.push(String::new());
    }
    if !project.is_empty() && !state.projects.iter().any(|p| p == project) {
        // Parents are registered first so back-references stay ordered.
        if let Some(parent) = project.rsplit_once('/').map(|(parent, _)| parent) {
            register_project(state, parent);
        }
        state.projects.push(project.to_string());
    }
}

/// Compresses a payload the way the wire carries it.
fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}

impl RemoteSource for InMemoryRemote {
    fn open_session(&self, request: &OpenRequest) -> EngineResult<OpenReply> {
        let mut state = self.state.lock();
        let blocks = self.build_blocks(&state, request.recursive);
        let expected_records = blocks.iter().map(|b| b.len() as u64).sum();
        let session = SessionId::generate();
        state.sessions.insert(
            session,
            SessionState {
                blocks,
                ..SessionState::default()
            },
        );
        state.last_session = Some(session);
        Ok(OpenReply {
            session,
            expected_records,
        })
    }

    fn take_access_info(&self, session: &SessionId) -> EngineResult<Vec<AccessDenied>> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session) {
            return Err(EngineError::UnknownSession(session.to_string()));
        }
        let denials = state
            .denied_projects
            .drain(..)
            .map(AccessDenied::for_object)
            .collect();
        Ok(denials)
    }

    fn next_block(&self, session: &SessionId) -> EngineResult<MetadataBlock> {
        let mut state = self.state.lock();
        if let Some(fault) = state.block_fault.take() {
            return Err(fault);
        }
        if state.block_delays > 0 {
            state.block_delays -= 1;
            return Err(EngineError::NotReady);
        }
        let session_state = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| EngineError::UnknownSession(session.to_string()))?;
        let block = session_state
            .blocks
            .get(session_state.next_block)
            .cloned()
            .ok_or_else(|| EngineError::Protocol("block requested past end of session".into()))?;
        session_state.next_block += 1;
        Ok(block)
    }

    fn request_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
        wanted: &[bool],
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        let session_state = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| EngineError::UnknownSession(session.to_string()))?;
        session_state.wanted.insert(block_index, wanted.to_vec());
        Ok(())
    }

    fn fetch_block_data(
        &self,
        session: &SessionId,
        block_index: u64,
    ) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let mut state = self.state.lock();
        if let Some(fault) = state.data_fault.take() {
            return Err(fault);
        }
        if state.data_delays > 0 {
            state.data_delays -= 1;
            return Err(EngineError::NotReady);
        }
        let session_state = state
            .sessions
            .get(session)
            .ok_or_else(|| EngineError::UnknownSession(session.to_string()))?;
        let block = session_state
            .blocks
            .iter()
            .find(|b| b.index == block_index)
            .ok_or_else(|| EngineError::Protocol(format!("unknown block {block_index}")))?;
        let wanted = session_state
            .wanted
            .get(&block_index)
            .ok_or_else(|| EngineError::Protocol(format!("block {block_index} not requested")))?;

        let payloads = block
            .records
            .iter()
            .zip(wanted.iter())
            .map(|(record, &want)| match record {
                BlockRecord::File(file) if want => {
                    let content = state
                        .files
                        .iter()
                        .find(|f| {
                            f.name == file.name && ContentHash::digest(&f.content) == file.hash
                        })
                        .map(|f| f.content.clone())
                        .unwrap_or_default();
                    Some(compress(&content))
                }
                _ => None,
            })
            .collect();
        Ok(payloads)
    }

    fn check_out(
        &self,
        session: &SessionId,
        request: &CheckOutRequest,
    ) -> EngineResult<Vec<AccessDenied>> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session) {
            return Err(EngineError::UnknownSession(session.to_string()));
        }
        let mut denials = Vec::new();
        for (i, entry) in request.entries.iter().enumerate() {
            if state.denied_checkouts.contains(&entry.remote_path) {
                denials.push(AccessDenied::for_entry(i, entry.remote_path.clone()));
            } else {
                state.checked_out.push(entry.remote_path.clone());
            }
        }
        Ok(denials)
    }

    fn touch_session(&self, session: &SessionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let session_state = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| EngineError::UnknownSession(session.to_string()))?;
        session_state.touches += 1;
        Ok(())
    }

    fn close_session(&self, session: &SessionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let session_state = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| EngineError::UnknownSession(session.to_string()))?;
        session_state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn blocks_list_projects_before_files() {
        let remote = InMemoryRemote::new();
        remote.add_file("", "root.txt", b"r".to_vec());
        remote.add_file("lib", "lib.txt", b"l".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        assert_eq!(reply.expected_records, 4);

        let block = remote.next_block(&reply.session).unwrap();
        assert!(!block.has_more);
        assert_eq!(block.first_invalid_back_ref(0), None);
        assert!(block.records[0].as_project().unwrap().is_root());
        assert_eq!(block.records[1].as_file().unwrap().name, "root.txt");
        assert_eq!(block.records[2].as_project().unwrap().relative_path, "lib");
        assert_eq!(block.records[3].as_file().unwrap().project_ref, 1);
    }

    #[test]
    fn nested_projects_register_parents() {
        let remote = InMemoryRemote::new();
        remote.add_file("a/b", "deep.txt", b"d".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        let block = remote.next_block(&reply.session).unwrap();
        let projects: Vec<_> = block
            .records
            .iter()
            .filter_map(BlockRecord::as_project)
            .map(|p| p.relative_path.clone())
            .collect();
        assert_eq!(projects, vec!["", "a", "a/b"]);
        assert_eq!(block.first_invalid_back_ref(0), None);
    }

    #[test]
    fn non_recursive_session_serves_root_only() {
        let remote = InMemoryRemote::new();
        remote.add_file("", "root.txt", b"r".to_vec());
        remote.add_file("lib", "lib.txt", b"l".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", false))
            .unwrap();
        assert_eq!(reply.expected_records, 2);
    }

    #[test]
    fn block_size_splits_stream() {
        let remote = InMemoryRemote::new().with_block_size(2);
        remote.add_file("", "a.txt", b"a".to_vec());
        remote.add_file("", "b.txt", b"b".to_vec());
        remote.add_file("", "c.txt", b"c".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        let first = remote.next_block(&reply.session).unwrap();
        assert!(first.has_more);
        assert_eq!(first.len(), 2);

        let second = remote.next_block(&reply.session).unwrap();
        assert!(!second.has_more);
        assert_eq!(second.len(), 2);
        assert!(second.magic_pos >= first.magic_pos);
    }

    #[test]
    fn payloads_are_zlib_compressed_and_masked() {
        let remote = InMemoryRemote::new();
        remote.add_file("", "a.txt", b"alpha".to_vec());
        remote.add_file("", "b.txt", b"beta".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        let session = reply.session;
        remote.next_block(&session).unwrap();

        // Want only the second file (index 2; index 0 is the marker).
        remote
            .request_block_data(&session, 0, &[false, false, true])
            .unwrap();
        let payloads = remote.fetch_block_data(&session, 0).unwrap();

        assert_eq!(payloads.len(), 3);
        assert!(payloads[0].is_none());
        assert!(payloads[1].is_none());
        assert_eq!(decompress(payloads[2].as_ref().unwrap()), b"beta");
    }

    #[test]
    fn transient_delays_are_reported_then_clear() {
        let remote = InMemoryRemote::new().with_block_delay(2);
        remote.add_file("", "a.txt", b"a".to_vec());

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        assert!(matches!(
            remote.next_block(&reply.session),
            Err(EngineError::NotReady)
        ));
        assert!(matches!(
            remote.next_block(&reply.session),
            Err(EngineError::NotReady)
        ));
        assert!(remote.next_block(&reply.session).is_ok());
    }

    #[test]
    fn checkout_denial_reports_entry_index() {
        let remote = InMemoryRemote::new();
        remote.add_file("", "a.txt", b"a".to_vec());
        remote.deny_checkout("$/proj/a.txt");

        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        let request = CheckOutRequest::new(
            "host",
            vec![
                vcsmirror_protocol::CheckOutEntry::new("$/proj/b.txt", "/work"),
                vcsmirror_protocol::CheckOutEntry::new("$/proj/a.txt", "/work"),
            ],
        );
        let denials = remote.check_out(&reply.session, &request).unwrap();

        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].entry, Some(1));
        assert_eq!(remote.checked_out_paths(), vec!["$/proj/b.txt"]);
    }

    #[test]
    fn session_bookkeeping() {
        let remote = InMemoryRemote::new();
        let reply = remote
            .open_session(&OpenRequest::new("host", "$/proj", true))
            .unwrap();
        let session = reply.session;

        remote.touch_session(&session).unwrap();
        remote.touch_session(&session).unwrap();
        assert_eq!(remote.touch_count(&session), 2);

        assert!(!remote.is_closed(&session));
        remote.close_session(&session).unwrap();
        assert!(remote.is_closed(&session));
    }

    #[test]
    fn unknown_session_is_rejected() {
        let remote = InMemoryRemote::new();
        let ghost = SessionId::generate();
        assert!(matches!(
            remote.next_block(&ghost),
            Err(EngineError::UnknownSession(_))
        ));
    }
}
