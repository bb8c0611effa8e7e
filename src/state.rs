//! Verification state.
//!
//! One `VerificationStateStore` per `VerifierService` tracks the per-identifier
//! state machine, the active-identifier scoping slot, and fans broadcast
//! events out to subscribers. Interior mutability is `tokio::sync::RwLock`
//! rather than a single implicit global, so a host can own more than one
//! independent `VerifierService`.

use std::collections::{HashMap, HashSet};

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::identifier::{Identifier, TxId};
use crate::manifest::Manifest;

/// Lifecycle states for a single identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    VerifyingManifest,
    ManifestVerified,
    Failed { error: String },
}

/// Per-identifier verification state.
#[derive(Debug, Clone)]
pub struct PerIdentifierState {
    pub status: Status,
    pub manifest: Option<Manifest>,
    pub verified_resources: HashSet<TxId>,
    /// Monotonic sequence number for ordering broadcast events, bumped on
    /// every transition.
    pub sequence: u64,
}

impl PerIdentifierState {
    fn new() -> Self {
        Self {
            status: Status::VerifyingManifest,
            manifest: None,
            verified_resources: HashSet::new(),
            sequence: 0,
        }
    }
}

/// Broadcast event payloads.
#[derive(Debug, Clone)]
pub enum VerificationEvent {
    Started {
        identifier: Identifier,
    },
    ManifestVerified {
        identifier: Identifier,
        manifest_tx_id: TxId,
        resource_count: usize,
    },
    ResourceVerified {
        identifier: Identifier,
        path: String,
        tx_id: TxId,
    },
    Failed {
        identifier: Identifier,
        error: String,
    },
    Cancelled {
        identifier: Identifier,
    },
}

pub struct VerificationStateStore {
    states: RwLock<HashMap<Identifier, PerIdentifierState>>,
    active: RwLock<Option<Identifier>>,
    events: broadcast::Sender<VerificationEvent>,
}

impl VerificationStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            states: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            events,
        }
    }

    /// Subscribe as a "controlled client" to the event broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.events.subscribe()
    }

    pub fn broadcast(&self, event: VerificationEvent) {
        // A broadcast channel with no receivers is not an error; controlled
        // clients may simply not be listening yet.
        let _ = self.events.send(event);
    }

    pub async fn get_state(&self, id: &Identifier) -> Option<PerIdentifierState> {
        self.states.read().await.get(id).cloned()
    }

    pub async fn is_in_progress(&self, id: &Identifier) -> bool {
        matches!(
            self.states.read().await.get(id).map(|s| &s.status),
            Some(Status::VerifyingManifest)
        )
    }

    pub async fn is_ready(&self, id: &Identifier) -> bool {
        matches!(
            self.states.read().await.get(id).map(|s| &s.status),
            Some(Status::ManifestVerified)
        )
    }

    /// Transition `id` into `verifying-manifest`, creating it if absent.
    /// No-op (re-asserts the same state) if verification is already in
    /// flight — callers must dedupe via the pending-verifications table,
    /// not via this call.
    pub async fn begin_verifying(&self, id: &Identifier) {
        let mut states = self.states.write().await;
        let entry = states.entry(id.clone()).or_insert_with(PerIdentifierState::new);
        entry.status = Status::VerifyingManifest;
        entry.sequence += 1;
        debug!(identifier = %id, "state -> verifying-manifest");
    }

    /// Transition to `manifest-verified`, storing the parsed manifest and
    /// marking the index resource as verified. Only reachable from
    /// `verifying-manifest`.
    pub async fn mark_manifest_verified(&self, id: &Identifier, manifest: Manifest, index_tx_id: TxId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.status = Status::ManifestVerified;
            state.verified_resources.insert(index_tx_id);
            state.manifest = Some(manifest);
            state.sequence += 1;
            debug!(identifier = %id, "state -> manifest-verified");
        }
    }

    pub async fn mark_resource_verified(&self, id: &Identifier, tx_id: TxId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.verified_resources.insert(tx_id);
            state.sequence += 1;
        }
    }

    pub async fn mark_failed(&self, id: &Identifier, error: String) {
        let mut states = self.states.write().await;
        let entry = states.entry(id.clone()).or_insert_with(PerIdentifierState::new);
        entry.status = Status::Failed { error };
        entry.sequence += 1;
    }

    /// Remove all state for `id`; afterwards `get_state` returns `None`.
    pub async fn clear(&self, id: &Identifier) {
        self.states.write().await.remove(id);
        let mut active = self.active.write().await;
        if active.as_ref() == Some(id) {
            *active = None;
        }
    }

    pub async fn set_active(&self, id: Option<Identifier>) {
        *self.active.write().await = id;
    }

    pub async fn get_active(&self) -> Option<Identifier> {
        self.active.read().await.clone()
    }

    /// Resolve an absolute path against the active identifier's manifest,
    /// only when that identifier is `manifest-verified`.
    pub async fn tx_id_for_active_path(&self, path: &str) -> Option<(Identifier, TxId)> {
        let active = self.get_active().await?;
        let states = self.states.read().await;
        let state = states.get(&active)?;
        if state.status != Status::ManifestVerified {
            return None;
        }
        let manifest = state.manifest.as_ref()?;
        manifest.resolve(path).ok().map(|tx| (active.clone(), tx.clone()))
    }
}

impl Default for VerificationStateStore {
    fn default() -> Self {
        Self::new()
    }
}
