//! Indexed workflow persistence.
//!
//! Records live in the key/value store under `workflows/{nym}/{id}`, one JSON
//! blob each, with a single per-nym index blob at `workflows/{nym}/_index`
//! rewritten on every mutation. The index maps source instrument to workflow
//! (one-to-one), account and unit to workflow sets, and workflow to its
//! current `(kind, state)` pair; the reverse kind buckets are derived in
//! memory and rebuilt after every load.
//!
//! A missing or corrupt index blob is repaired by scanning the nym's records.
//! Query failures surface as empty results with a warning; mutation failures
//! are returned to the caller.
//!
//! # Thread Safety
//!
//! One mutex guards the in-memory index maps, so index writes serialize even
//! across different workflow ids. Callers provide per-workflow exclusion one
//! layer up; this type only promises the maps and the blobs stay coherent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use ledgerkit_lib::{AccountId, InstrumentId, NymId, RecordStore, UnitId, WorkflowId};

use crate::record::{PaymentWorkflow, WorkflowKind, WorkflowState};
use crate::WorkflowError;

fn record_key(nym: &NymId, id: &WorkflowId) -> String {
    format!("workflows/{}/{}", nym.as_str(), id.as_str())
}

fn index_key(nym: &NymId) -> String {
    format!("workflows/{}/_index", nym.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct KindState {
    kind: WorkflowKind,
    state: WorkflowState,
}

/// Secondary indices over one nym's workflow records.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NymIndex {
    by_source: BTreeMap<InstrumentId, WorkflowId>,
    by_account: BTreeMap<AccountId, BTreeSet<WorkflowId>>,
    by_unit: BTreeMap<UnitId, BTreeSet<WorkflowId>>,
    kind_state: BTreeMap<WorkflowId, KindState>,
    #[serde(skip)]
    by_kind: BTreeMap<WorkflowKind, BTreeSet<WorkflowId>>,
    #[serde(skip)]
    by_kind_state: BTreeMap<(WorkflowKind, WorkflowState), BTreeSet<WorkflowId>>,
}

impl NymIndex {
    fn rebuild_derived(&mut self) {
        self.by_kind.clear();
        self.by_kind_state.clear();
        for (id, entry) in &self.kind_state {
            self.by_kind
                .entry(entry.kind)
                .or_default()
                .insert(id.clone());
            self.by_kind_state
                .entry((entry.kind, entry.state))
                .or_default()
                .insert(id.clone());
        }
    }

    fn contains(&self, id: &WorkflowId) -> bool {
        self.kind_state.contains_key(id)
    }

    /// Insert or reindex one workflow.
    ///
    /// The workflow leaves its old `(kind, state)` bucket and enters the new
    /// one in the same call, so it is never present in two buckets or absent
    /// from all of them. A source instrument already mapped to a different
    /// workflow is a modeling bug upstream and asserts.
    fn insert(&mut self, workflow: &PaymentWorkflow) {
        if let Some(source) = workflow.source.first() {
            if let Some(existing) = self.by_source.get(&source.id) {
                if *existing != workflow.id {
                    panic!(
                        "source instrument {} is already indexed to workflow {}",
                        source.id, existing
                    );
                }
            }
            self.by_source.insert(source.id.clone(), workflow.id.clone());
        }
        self.remove_from_buckets(&workflow.id);
        self.kind_state.insert(
            workflow.id.clone(),
            KindState {
                kind: workflow.kind,
                state: workflow.state,
            },
        );
        self.by_kind
            .entry(workflow.kind)
            .or_default()
            .insert(workflow.id.clone());
        self.by_kind_state
            .entry((workflow.kind, workflow.state))
            .or_default()
            .insert(workflow.id.clone());
        for account in &workflow.accounts {
            self.by_account
                .entry(account.clone())
                .or_default()
                .insert(workflow.id.clone());
        }
        for unit in &workflow.units {
            self.by_unit
                .entry(unit.clone())
                .or_default()
                .insert(workflow.id.clone());
        }
    }

    fn remove_from_buckets(&mut self, id: &WorkflowId) {
        if let Some(previous) = self.kind_state.remove(id) {
            if let Some(set) = self.by_kind.get_mut(&previous.kind) {
                set.remove(id);
                if set.is_empty() {
                    self.by_kind.remove(&previous.kind);
                }
            }
            let bucket = (previous.kind, previous.state);
            if let Some(set) = self.by_kind_state.get_mut(&bucket) {
                set.remove(id);
                if set.is_empty() {
                    self.by_kind_state.remove(&bucket);
                }
            }
        }
    }

    fn remove(&mut self, id: &WorkflowId) {
        self.remove_from_buckets(id);
        self.by_source.retain(|_, workflow| workflow != id);
        prune(&mut self.by_account, id);
        prune(&mut self.by_unit, id);
    }
}

fn prune<K: Ord>(map: &mut BTreeMap<K, BTreeSet<WorkflowId>>, id: &WorkflowId) {
    map.retain(|_, set| {
        set.remove(id);
        !set.is_empty()
    });
}

fn collect_set(set: Option<&BTreeSet<WorkflowId>>) -> Vec<WorkflowId> {
    set.map(|set| set.iter().cloned().collect()).unwrap_or_default()
}

/// Workflow records plus secondary indices over a [`RecordStore`].
pub struct WorkflowStorage {
    records: Arc<dyn RecordStore>,
    indices: Mutex<HashMap<NymId, NymIndex>>,
}

impl WorkflowStorage {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            indices: Mutex::new(HashMap::new()),
        }
    }

    /// Write a record and bring every index in line with it.
    pub fn store(&self, nym: &NymId, workflow: &PaymentWorkflow) -> Result<(), WorkflowError> {
        let bytes = workflow.to_bytes()?;
        let mut indices = self.lock_indices();
        let index = self.ensure_index(&mut indices, nym)?;
        self.records
            .put(&record_key(nym, &workflow.id), &bytes)
            .map_err(|e| WorkflowError::Storage(e.to_string()))?;
        index.insert(workflow);
        self.write_index(nym, index)
    }

    pub fn load(
        &self,
        nym: &NymId,
        id: &WorkflowId,
    ) -> Result<Option<PaymentWorkflow>, WorkflowError> {
        let bytes = self
            .records
            .get(&record_key(nym, id))
            .map_err(|e| WorkflowError::Storage(e.to_string()))?;
        match bytes {
            Some(bytes) => Ok(Some(PaymentWorkflow::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the record and every index entry. Returns whether anything was
    /// actually removed.
    pub fn delete(&self, nym: &NymId, id: &WorkflowId) -> bool {
        let mut indices = self.lock_indices();
        let index = match self.ensure_index(&mut indices, nym) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(nym = %nym, error = %e, "workflow index unavailable");
                return false;
            }
        };
        let was_indexed = index.contains(id);
        let existed = match self.records.delete(&record_key(nym, id)) {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(nym = %nym, workflow = %id, error = %e, "failed to delete workflow record");
                return false;
            }
        };
        if !was_indexed && !existed {
            return false;
        }
        index.remove(id);
        if let Err(e) = self.write_index(nym, index) {
            tracing::warn!(nym = %nym, error = %e, "failed to rewrite workflow index after delete");
        }
        true
    }

    /// Workflow holding `source` as its instrument, restricted to `kinds`.
    pub fn lookup_by_source(
        &self,
        nym: &NymId,
        source: &InstrumentId,
        kinds: &[WorkflowKind],
    ) -> Result<Option<WorkflowId>, WorkflowError> {
        let mut indices = self.lock_indices();
        let index = self.ensure_index(&mut indices, nym)?;
        Ok(index
            .by_source
            .get(source)
            .filter(|id| {
                index
                    .kind_state
                    .get(*id)
                    .map_or(false, |entry| kinds.contains(&entry.kind))
            })
            .cloned())
    }

    pub fn by_account(&self, nym: &NymId, account: &AccountId) -> Vec<WorkflowId> {
        self.query(nym, |index| collect_set(index.by_account.get(account)))
    }

    pub fn by_unit(&self, nym: &NymId, unit: &UnitId) -> Vec<WorkflowId> {
        self.query(nym, |index| collect_set(index.by_unit.get(unit)))
    }

    pub fn by_state(
        &self,
        nym: &NymId,
        kind: WorkflowKind,
        state: WorkflowState,
    ) -> Vec<WorkflowId> {
        self.query(nym, |index| {
            collect_set(index.by_kind_state.get(&(kind, state)))
        })
    }

    pub fn by_kind(&self, nym: &NymId, kind: WorkflowKind) -> Vec<WorkflowId> {
        self.query(nym, |index| collect_set(index.by_kind.get(&kind)))
    }

    /// Every workflow id stored for `nym`, in id order.
    pub fn list(&self, nym: &NymId) -> Vec<WorkflowId> {
        self.query(nym, |index| index.kind_state.keys().cloned().collect())
    }

    fn lock_indices(&self) -> MutexGuard<'_, HashMap<NymId, NymIndex>> {
        self.indices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query<R: Default>(&self, nym: &NymId, f: impl FnOnce(&NymIndex) -> R) -> R {
        let mut indices = self.lock_indices();
        match self.ensure_index(&mut indices, nym) {
            Ok(index) => f(index),
            Err(e) => {
                tracing::warn!(nym = %nym, error = %e, "workflow index unavailable");
                R::default()
            }
        }
    }

    fn ensure_index<'a>(
        &self,
        indices: &'a mut HashMap<NymId, NymIndex>,
        nym: &NymId,
    ) -> Result<&'a mut NymIndex, WorkflowError> {
        if !indices.contains_key(nym) {
            let index = self.load_index(nym)?;
            indices.insert(nym.clone(), index);
        }
        let Some(index) = indices.get_mut(nym) else {
            return Err(WorkflowError::Storage("workflow index cache miss".into()));
        };
        Ok(index)
    }

    fn load_index(&self, nym: &NymId) -> Result<NymIndex, WorkflowError> {
        match self.records.get(&index_key(nym)) {
            Ok(Some(bytes)) => match serde_json::from_slice::<NymIndex>(&bytes) {
                Ok(mut index) => {
                    index.rebuild_derived();
                    Ok(index)
                }
                Err(e) => {
                    tracing::warn!(nym = %nym, error = %e, "workflow index is corrupt, rebuilding from records");
                    self.scan_records(nym)
                }
            },
            Ok(None) => self.scan_records(nym),
            Err(e) => Err(WorkflowError::Storage(e.to_string())),
        }
    }

    fn scan_records(&self, nym: &NymId) -> Result<NymIndex, WorkflowError> {
        let prefix = format!("workflows/{}/", nym.as_str());
        let keys = self
            .records
            .list(&prefix)
            .map_err(|e| WorkflowError::Storage(e.to_string()))?;
        let skip = index_key(nym);
        let mut index = NymIndex::default();
        for key in keys {
            if key == skip {
                continue;
            }
            let bytes = match self.records.get(&key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Err(WorkflowError::Storage(e.to_string())),
            };
            match PaymentWorkflow::from_bytes(&bytes) {
                Ok(workflow) => index.insert(&workflow),
                Err(e) => {
                    tracing::warn!(nym = %nym, key = %key, error = %e, "skipping unreadable workflow record");
                }
            }
        }
        Ok(index)
    }

    fn write_index(&self, nym: &NymId, index: &NymIndex) -> Result<(), WorkflowError> {
        let bytes = serde_json::to_vec(index)
            .map_err(|e| WorkflowError::Serialization(e.to_string()))?;
        self.records
            .put(&index_key(nym), &bytes)
            .map_err(|e| WorkflowError::Storage(e.to_string()))
    }
}
