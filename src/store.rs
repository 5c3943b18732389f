//! Object store: bounded accumulator of cross-frame results.
//!
//! The store keeps an ordered list of top-level tracked objects. Each tracked
//! object owns a list of sub-objects collected from frames.
//!
//! - Capacity: after every admission the store holds at most `max_objects`
//!   entries; overflow evicts oldest-first.
//! - Age: `sweep` removes nested sub-objects older than a threshold. Top-level
//!   entries are never removed by age.
//!
//! One store lives per pipeline runner. Snapshots serialize the whole store,
//! and restoring one replaces it wholesale.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::object::SubObject;
use crate::unix_now;

/// Default bound on retained top-level objects.
pub const DEFAULT_MAX_OBJECTS: usize = 100;

/// Top-level store entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackedObject {
    id: Uuid,
    pub camera_id: Option<String>,
    pub objects: Vec<SubObject>,
    created_at: f64,
    updated_at: f64,
}

impl TrackedObject {
    pub fn new(camera_id: Option<String>) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4(),
            camera_id,
            objects: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    /// Refresh the last-update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }

    /// Append a sub-object and refresh the update stamp.
    pub fn push(&mut self, obj: SubObject) {
        self.objects.push(obj);
        self.touch();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "StoreSnapshot")]
pub struct ObjectStore {
    objects: VecDeque<TrackedObject>,
    max_objects: usize,
}

/// Wire form of a store; the bound is checked before it becomes a store.
#[derive(Deserialize)]
struct StoreSnapshot {
    objects: VecDeque<TrackedObject>,
    max_objects: usize,
}

impl TryFrom<StoreSnapshot> for ObjectStore {
    type Error = PipelineError;

    fn try_from(raw: StoreSnapshot) -> Result<Self> {
        let mut store = Self::with_capacity(raw.max_objects)?;
        store.objects = raw.objects;
        if store.objects.len() > store.max_objects {
            return Err(PipelineError::config(format!(
                "store snapshot holds {} entries over a bound of {}",
                store.objects.len(),
                store.max_objects
            )));
        }
        Ok(store)
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: VecDeque::new(),
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }

    pub fn with_capacity(max_objects: usize) -> Result<Self> {
        if max_objects == 0 {
            return Err(PipelineError::config(
                "object store bound must be at least 1",
            ));
        }
        Ok(Self {
            objects: VecDeque::with_capacity(max_objects.min(1024)),
            max_objects,
        })
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.iter()
    }

    /// Append an object, evicting the oldest entries past the bound.
    /// Returns the admitted entry.
    pub fn admit(&mut self, obj: TrackedObject) -> Option<&mut TrackedObject> {
        self.objects.push_back(obj);
        let excess = self.objects.len().saturating_sub(self.max_objects);
        if excess > 0 {
            self.objects.drain(..excess);
            log::debug!("object store evicted {} entries", excess);
        }
        self.objects.back_mut()
    }

    /// Remove nested sub-objects whose age is at least `max_age_secs`.
    pub fn sweep(&mut self, max_age_secs: f64) -> usize {
        self.sweep_at(max_age_secs, unix_now())
    }

    /// Same as `sweep`, with ages measured against `now`.
    pub fn sweep_at(&mut self, max_age_secs: f64, now: f64) -> usize {
        let mut removed = 0;
        for entry in &mut self.objects {
            let before = entry.objects.len();
            entry.objects.retain(|obj| obj.age_at(now) < max_age_secs);
            removed += before - entry.objects.len();
        }
        log::debug!(
            "object store sweep removed {} sub-objects, {} remain",
            removed,
            self.total()
        );
        removed
    }

    /// Remove nested sub-objects with the given id from every entry.
    /// Absent ids are a no-op.
    pub fn remove_by_id(&mut self, id: Uuid) -> usize {
        let mut removed = 0;
        for entry in &mut self.objects {
            let before = entry.objects.len();
            entry.objects.retain(|obj| obj.id() != id);
            removed += before - entry.objects.len();
        }
        removed
    }

    /// Number of nested sub-objects across all entries.
    pub fn total(&self) -> usize {
        self.objects.iter().map(|entry| entry.objects.len()).sum()
    }

    /// Entries for a camera, with their positions in insertion order.
    pub fn objects_for_camera(&self, camera_id: &str) -> Vec<(usize, &TrackedObject)> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.camera_id.as_deref() == Some(camera_id))
            .collect()
    }

    /// First entry tracking `camera_id`.
    pub fn find_by_camera_mut(&mut self, camera_id: &str) -> Option<&mut TrackedObject> {
        self.objects
            .iter_mut()
            .find(|entry| entry.camera_id.as_deref() == Some(camera_id))
    }

    pub fn snapshot(&self) -> ObjectStore {
        self.clone()
    }

    /// Replace the whole store with a snapshot.
    pub fn restore(&mut self, snapshot: ObjectStore) {
        *self = snapshot;
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged(now: f64, age: f64, label: &str) -> SubObject {
        SubObject::classification(0.5, label)
            .unwrap()
            .with_created_at(now - age)
    }

    #[test]
    fn admission_enforces_bound_fifo() {
        let mut store = ObjectStore::with_capacity(3).unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let entry = store.admit(TrackedObject::new(Some(format!("cam{}", i)))).unwrap();
            ids.push(entry.id());
            assert!(store.len() <= 3);
        }
        let kept: Vec<Uuid> = store.iter().map(TrackedObject::id).collect();
        assert_eq!(kept, ids[2..].to_vec());
    }

    #[test]
    fn admission_below_bound_keeps_everything() {
        let mut store = ObjectStore::with_capacity(10).unwrap();
        for _ in 0..4 {
            store.admit(TrackedObject::new(None));
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn zero_bound_is_rejected() {
        assert!(ObjectStore::with_capacity(0).is_err());
    }

    #[test]
    fn sweep_removes_old_sub_objects_in_order() {
        let now = 1_000_000.0;
        let mut store = ObjectStore::new();
        let entry = store.admit(TrackedObject::new(Some("0".into()))).unwrap();
        for (age, label) in [(1.0, "a"), (5.0, "b"), (10.0, "c"), (20.0, "d")] {
            entry.push(aged(now, age, label));
        }

        let removed = store.sweep_at(8.0, now);
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        let labels: Vec<&str> = store
            .iter()
            .flat_map(|e| e.objects.iter())
            .filter_map(|o| o.as_classification())
            .map(|c| c.label())
            .collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn sweep_never_removes_top_level_entries() {
        let now = 1_000_000.0;
        let mut store = ObjectStore::new();
        store.admit(TrackedObject::new(None)).unwrap().push(aged(now, 100.0, "x"));
        store.sweep_at(1.0, now);
        assert_eq!(store.len(), 1);
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn remove_by_id_is_idempotent() {
        let mut store = ObjectStore::new();
        let obj = SubObject::base();
        let id = obj.id();
        let entry = store.admit(TrackedObject::new(None)).unwrap();
        entry.push(obj);
        entry.push(SubObject::base());

        let before_absent = store.clone();
        assert_eq!(store.remove_by_id(Uuid::new_v4()), 0);
        assert_eq!(store, before_absent);

        assert_eq!(store.remove_by_id(id), 1);
        assert_eq!(store.remove_by_id(id), 0);
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn snapshot_restore_replaces_wholesale() {
        let mut store = ObjectStore::with_capacity(5).unwrap();
        store.admit(TrackedObject::new(Some("a".into())));
        let json = serde_json::to_string(&store.snapshot()).unwrap();

        let mut other = ObjectStore::new();
        other.admit(TrackedObject::new(Some("b".into())));
        other.admit(TrackedObject::new(Some("c".into())));
        other.restore(serde_json::from_str(&json).unwrap());

        assert_eq!(other.len(), 1);
        assert_eq!(other.max_objects(), 5);
        assert_eq!(other.objects_for_camera("a").len(), 1);
        assert!(other.find_by_camera_mut("b").is_none());
    }

    #[test]
    fn snapshot_with_zero_bound_is_rejected() {
        let err = serde_json::from_str::<ObjectStore>(r#"{"objects":[],"max_objects":0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn snapshot_over_its_bound_is_rejected() {
        let mut store = ObjectStore::with_capacity(2).unwrap();
        store.admit(TrackedObject::new(None));
        store.admit(TrackedObject::new(None));
        let mut value = serde_json::to_value(&store).unwrap();
        value["max_objects"] = serde_json::json!(1);
        assert!(serde_json::from_value::<ObjectStore>(value).is_err());
    }

    #[test]
    fn restored_snapshot_keeps_admitting() {
        let mut store: ObjectStore =
            serde_json::from_str(r#"{"objects":[],"max_objects":1}"#).unwrap();
        store.admit(TrackedObject::new(Some("a".into())));
        let last = store.admit(TrackedObject::new(Some("b".into()))).unwrap();
        assert_eq!(last.camera_id.as_deref(), Some("b"));
        assert_eq!(store.len(), 1);
    }
}
