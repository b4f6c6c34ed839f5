//! In-memory collaborators for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedRwLockWriteGuard, RwLock};

use crate::identity::MemberIdentity;
use crate::presence::PresenceSource;
use crate::sheet::SheetTransport;

#[derive(Debug, thiserror::Error)]
#[error("fake failure: {0}")]
pub struct FakeError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    Get(String),
    Update(String, Vec<Vec<String>>),
    Clear(String),
}

#[derive(Default)]
struct SheetState {
    header: Option<String>,
    rows: Vec<String>,
    calls: Vec<SheetCall>,
    /// Data-row snapshots after each successful update of the data anchor.
    writes: Vec<Vec<String>>,
}

/// Column-A-only sheet with failure injection and a write gate.
#[derive(Clone)]
pub struct FakeSheet {
    state: Arc<Mutex<SheetState>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_next_writes: Arc<AtomicUsize>,
    gate: Arc<RwLock<()>>,
    /// Notified whenever a clear starts (before waiting on the gate).
    pub clear_started: Arc<Notify>,
}

impl FakeSheet {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            fail_reads: Arc::default(),
            fail_writes: Arc::default(),
            fail_next_writes: Arc::default(),
            gate: Arc::new(RwLock::new(())),
            clear_started: Arc::new(Notify::new()),
        }
    }

    pub fn set_header(&self, value: &str) {
        self.state.lock().unwrap().header = Some(value.to_string());
    }

    pub fn set_rows(&self, rows: &[&str]) {
        self.state.lock().unwrap().rows = rows.iter().map(|s| s.to_string()).collect();
    }

    pub fn header(&self) -> Option<String> {
        self.state.lock().unwrap().header.clone()
    }

    pub fn rows(&self) -> Vec<String> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn calls(&self) -> Vec<SheetCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SheetCall::Clear(_)))
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SheetCall::Update(..)))
            .count()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` clear/update calls.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// Hold every clear until the returned guard is dropped.
    pub async fn hold_writes(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.gate).write_owned().await
    }

    fn write_should_fail(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SheetTransport for FakeSheet {
    type Error = FakeError;

    async fn get_range(&self, range: &str) -> Result<Vec<Vec<String>>, FakeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(SheetCall::Get(range.to_string()));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FakeError("read".into()));
        }
        if range.ends_with("!A1") {
            Ok(state.header.iter().map(|h| vec![h.clone()]).collect())
        } else {
            Ok(state.rows.iter().map(|r| vec![r.clone()]).collect())
        }
    }

    async fn update_range(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), FakeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(SheetCall::Update(range.to_string(), rows.clone()));
        if self.write_should_fail() {
            return Err(FakeError("update".into()));
        }
        let column: Vec<String> = rows.into_iter().filter_map(|r| r.into_iter().next()).collect();
        if range.ends_with("!A1") {
            state.header = column.into_iter().next();
        } else {
            state.rows = column;
            let snapshot = state.rows.clone();
            state.writes.push(snapshot);
        }
        Ok(())
    }

    async fn clear_range(&self, range: &str) -> Result<(), FakeError> {
        self.clear_started.notify_one();
        let _permit = self.gate.read().await;

        let mut state = self.state.lock().unwrap();
        state.calls.push(SheetCall::Clear(range.to_string()));
        if self.write_should_fail() {
            return Err(FakeError("clear".into()));
        }
        state.rows.clear();
        Ok(())
    }
}

/// Presence source backed by fixed channel and member tables.
#[derive(Clone, Default)]
pub struct FakePresence {
    channels: Arc<Mutex<HashMap<String, Option<Vec<MemberIdentity>>>>>,
    members: Arc<Mutex<HashMap<String, MemberIdentity>>>,
}

impl FakePresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_channel(&self, channel_id: &str, members: Vec<MemberIdentity>) {
        self.channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), Some(members));
    }

    /// Make fetching `channel_id` fail.
    pub fn break_channel(&self, channel_id: &str) {
        self.channels.lock().unwrap().insert(channel_id.to_string(), None);
    }

    pub fn set_member(&self, user_id: &str, identity: MemberIdentity) {
        self.members
            .lock()
            .unwrap()
            .insert(user_id.to_string(), identity);
    }
}

#[async_trait]
impl PresenceSource for FakePresence {
    type Error = FakeError;

    async fn channel_members(&self, channel_id: &str) -> Result<Vec<MemberIdentity>, FakeError> {
        match self.channels.lock().unwrap().get(channel_id) {
            Some(Some(members)) => Ok(members.clone()),
            Some(None) => Err(FakeError(format!("channel {channel_id} unavailable"))),
            None => Ok(Vec::new()),
        }
    }

    async fn resolve_member(&self, user_id: &str) -> Result<MemberIdentity, FakeError> {
        self.members
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| FakeError(format!("unknown member {user_id}")))
    }
}
