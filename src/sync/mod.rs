//! Background reconciliation between local artifacts and their remote records.
//!
//! Local storage may be wiped at any time, so every tracked artifact is
//! mirrored to a named record in a durable [`RemoteStore`]. On every tick the
//! [`Reconciler`] fingerprints each artifact and asks [`decide`] what to do:
//!
//! - artifact missing or too small to be real: restore it from the remote
//!   record, unless a push happened within the guard window;
//! - fingerprint changed since the last tick: push the artifact;
//! - otherwise nothing.
//!
//! There is no lock shared with the mutation pipeline. The guard window keeps
//! a restore from racing a push that has only just landed, and an artifact's
//! [`RestoreGate`] keeps the pipeline from writing while the artifact looks
//! wiped and has not been restored. Remote failures
//! are logged and retried on the next tick; they never reach interactive
//! callers.

mod remote;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::persist::{ArtifactStorage, GateState, RestoreGate};

pub use remote::HttpRecordStore;

// ============================================================
// Remote store port
// ============================================================

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload is not valid UTF-8")]
    Encoding,

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("record database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("remote store unavailable")]
    Unavailable,
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}

/// A durable store of named blobs. Both calls are full overwrites/reads;
/// nothing is merged.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, name: &str, payload: &[u8]) -> Result<(), RemoteError>;

    /// The latest payload stored under `name`, or `None` if there is none.
    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RemoteError>;
}

/// In-process record store. Can be switched off to simulate an outage.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    offline: Arc<AtomicBool>,
    upserts: Arc<AtomicUsize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub fn record(&self, name: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .expect("record lock poisoned")
            .get(name)
            .cloned()
    }

    /// Number of successful upserts so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRecordStore {
    async fn upsert(&self, name: &str, payload: &[u8]) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }
        self.records
            .lock()
            .expect("record lock poisoned")
            .insert(name.to_string(), payload.to_vec());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }
        Ok(self.record(name))
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RemoteError::Timeout(limit))?
}

// ============================================================
// Clock
// ============================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ============================================================
// Decision
// ============================================================

/// Content fingerprint of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("blake3:{}", blake3::hash(bytes).to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What one look at the local artifact found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Missing,
    Present { size: usize, fingerprint: Fingerprint },
}

impl Observation {
    pub fn of(bytes: Option<&[u8]>) -> Self {
        match bytes {
            None => Self::Missing,
            Some(bytes) => Self::Present {
                size: bytes.len(),
                fingerprint: Fingerprint::of(bytes),
            },
        }
    }

    /// Whether the artifact looks like real data rather than wiped storage.
    pub fn is_plausible(&self, min_bytes: usize) -> bool {
        match self {
            Self::Missing => false,
            Self::Present { size, .. } => *size >= min_bytes.max(1),
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Missing => None,
            Self::Present { fingerprint, .. } => Some(fingerprint),
        }
    }
}

/// Timing and threshold knobs for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub tick_interval: Duration,
    /// How long after a push restores are suppressed.
    pub guard_window: Duration,
    /// Artifacts smaller than this are treated as wiped.
    pub min_plausible_bytes: usize,
    pub remote_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            guard_window: Duration::from_secs(20),
            min_plausible_bytes: 16,
            remote_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Local artifact matches what was last pushed or restored.
    Clean,
    /// Local artifact changed and has not been pushed successfully yet.
    DirtyLocal,
    /// A restore is in flight.
    Restoring,
}

/// Reconciliation bookkeeping for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub last_fingerprint: Option<Fingerprint>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub state: ArtifactState,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_fingerprint: None,
            last_push_at: None,
            state: ArtifactState::Clean,
        }
    }
}

impl SyncState {
    /// Whether a push happened less than `guard_window` before `now`.
    pub fn within_guard(&self, now: DateTime<Utc>, guard_window: Duration) -> bool {
        match self.last_push_at {
            None => false,
            // A push "in the future" means the clock stepped back; stay safe.
            Some(pushed) => (now - pushed)
                .to_std()
                .map(|elapsed| elapsed < guard_window)
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Restore,
    Push,
    /// Artifact looks wiped but a push was too recent to trust that.
    HoldForGuard,
    Idle,
}

/// Decide what one tick should do for one artifact.
pub fn decide(
    observation: &Observation,
    state: &SyncState,
    now: DateTime<Utc>,
    policy: &SyncPolicy,
) -> SyncAction {
    if !observation.is_plausible(policy.min_plausible_bytes) {
        if state.within_guard(now, policy.guard_window) {
            SyncAction::HoldForGuard
        } else {
            SyncAction::Restore
        }
    } else if observation.fingerprint() != state.last_fingerprint.as_ref() {
        SyncAction::Push
    } else {
        SyncAction::Idle
    }
}

// ============================================================
// Reconciler
// ============================================================

/// A local artifact mirrored under a remote record name.
#[derive(Clone)]
pub struct TrackedArtifact {
    pub name: String,
    pub storage: Arc<dyn ArtifactStorage>,
    pub gate: Option<RestoreGate>,
}

impl TrackedArtifact {
    pub fn new(name: impl Into<String>, storage: Arc<dyn ArtifactStorage>) -> Self {
        Self {
            name: name.into(),
            storage,
            gate: None,
        }
    }

    /// Report this artifact's restore progress through `gate`.
    pub fn with_gate(mut self, gate: RestoreGate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn set_gate(&self, state: GateState) {
        if let Some(gate) = &self.gate {
            gate.set(state);
        }
    }
}

/// What happened to one artifact during a pass.
#[derive(Debug)]
pub struct TickOutcome {
    pub artifact: String,
    pub action: SyncAction,
    pub result: Result<(), Error>,
}

pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    policy: SyncPolicy,
    artifacts: Vec<(TrackedArtifact, SyncState)>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, policy: SyncPolicy) -> Self {
        Self {
            remote,
            clock,
            policy,
            artifacts: Vec::new(),
        }
    }

    pub fn track(mut self, artifact: TrackedArtifact) -> Self {
        self.artifacts.push((artifact, SyncState::default()));
        self
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn state(&self, name: &str) -> Option<&SyncState> {
        self.artifacts
            .iter()
            .find(|(artifact, _)| artifact.name == name)
            .map(|(_, state)| state)
    }

    /// Startup pass: restore any artifact that looks wiped. Never pushes.
    ///
    /// Run this before the service accepts mutations.
    pub async fn restore_check(&mut self) -> Vec<TickOutcome> {
        tracing::info!("Running initial restore check");
        self.pass(false).await
    }

    /// One reconciliation tick over every tracked artifact.
    pub async fn tick(&mut self) -> Vec<TickOutcome> {
        self.pass(true).await
    }

    async fn pass(&mut self, allow_push: bool) -> Vec<TickOutcome> {
        let now = self.clock.now();
        let mut outcomes = Vec::with_capacity(self.artifacts.len());

        for (artifact, state) in self.artifacts.iter_mut() {
            let bytes = match artifact.storage.read() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Could not read {}: {}", artifact.storage.describe(), e);
                    outcomes.push(TickOutcome {
                        artifact: artifact.name.clone(),
                        action: SyncAction::Idle,
                        result: Err(e.into()),
                    });
                    continue;
                }
            };

            let observation = Observation::of(bytes.as_deref());
            let action = match decide(&observation, state, now, &self.policy) {
                SyncAction::Push if !allow_push => SyncAction::Idle,
                action => action,
            };

            match action {
                // Looks wiped: hold writers until a restore settles it.
                SyncAction::Restore | SyncAction::HoldForGuard => {
                    artifact.set_gate(GateState::Pending)
                }
                // Real local data; nothing to restore.
                SyncAction::Idle | SyncAction::Push => {
                    if let Some(gate) = &artifact.gate {
                        if gate.state() == GateState::Pending {
                            gate.set(GateState::Restored);
                        }
                    }
                }
            }

            let result = match action {
                SyncAction::Restore => {
                    restore(self.remote.as_ref(), &self.policy, artifact, state).await
                }
                SyncAction::Push => {
                    let bytes = bytes.unwrap_or_default();
                    push(self.remote.as_ref(), &self.policy, artifact, state, &bytes, now).await
                }
                SyncAction::HoldForGuard => {
                    tracing::debug!(
                        "{} looks wiped but was pushed recently, holding restore",
                        artifact.name
                    );
                    Ok(())
                }
                SyncAction::Idle => Ok(()),
            };

            outcomes.push(TickOutcome {
                artifact: artifact.name.clone(),
                action,
                result,
            });
        }

        outcomes
    }

    /// Tick forever on the policy interval until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            "Sync watcher started ({} artifacts, every {:?})",
            self.artifacts.len(),
            self.policy.tick_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Sync watcher stopped");
    }

    /// Spawn [`Reconciler::run`] on the current runtime.
    pub fn spawn(self) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        SyncHandle {
            shutdown_tx,
            handle,
        }
    }
}

async fn restore(
    remote: &dyn RemoteStore,
    policy: &SyncPolicy,
    artifact: &TrackedArtifact,
    state: &mut SyncState,
) -> Result<(), Error> {
    let previous = state.state;
    state.state = ArtifactState::Restoring;

    let payload = match with_timeout(policy.remote_timeout, remote.fetch(&artifact.name)).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            tracing::warn!("No remote record for {}, nothing to restore", artifact.name);
            artifact.set_gate(GateState::Fresh);
            state.state = previous;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!("Restore of {} failed: {}", artifact.name, e);
            state.state = previous;
            return Err(e.into());
        }
    };

    if let Err(e) = artifact.storage.write(&payload) {
        tracing::warn!("Could not write restored {}: {}", artifact.name, e);
        state.state = previous;
        return Err(e.into());
    }

    // The restored bytes equal the remote record; no need to push them back.
    state.last_fingerprint = Some(Fingerprint::of(&payload));
    state.state = ArtifactState::Clean;
    artifact.set_gate(GateState::Restored);
    tracing::info!(
        "Restored {} from remote record ({} bytes)",
        artifact.name,
        payload.len()
    );
    Ok(())
}

async fn push(
    remote: &dyn RemoteStore,
    policy: &SyncPolicy,
    artifact: &TrackedArtifact,
    state: &mut SyncState,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<(), Error> {
    state.state = ArtifactState::DirtyLocal;

    if let Err(e) = with_timeout(policy.remote_timeout, remote.upsert(&artifact.name, bytes)).await {
        tracing::warn!("Push of {} failed, retrying next tick: {}", artifact.name, e);
        return Err(e.into());
    }

    state.last_fingerprint = Some(Fingerprint::of(bytes));
    state.last_push_at = Some(now);
    state.state = ArtifactState::Clean;
    // The remote holds a record now; a later wipe must be restored, not
    // started over.
    artifact.set_gate(GateState::Restored);
    tracing::info!("Pushed {} ({} bytes)", artifact.name, bytes.len());
    Ok(())
}

/// Handle to a spawned reconciler.
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the watcher and wait for its current tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Sync watcher ended abnormally: {}", e);
        }
    }
}
