//! Selection pool management
//!
//! Discovers, filters, and indexes the active set of selectable stimulus
//! objects. The pool holds non-owning handles: the host owns the objects and
//! may destroy one between frames, so a dead entry is a normal, recoverable
//! condition (warn and skip), never an invariant violation. Pool indices are
//! dense, zero-based and contiguous immediately after every population pass;
//! identifiers are assigned lazily and stay unique per entity for its
//! lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use stim_types::{ObjectHandle, ObjectId, StimulusObject};

use crate::config::PopulationMethod;
use crate::error::{EngineError, EngineResult};

/// Label-keyed index of host-registered stimulus objects.
///
/// An explicit registry rebuilt on population keeps tag discovery
/// deterministic and testable, instead of a live scene scan.
#[derive(Default)]
pub struct TagRegistry {
    entries: Mutex<Vec<(String, ObjectHandle)>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one entity under a label. The registry keeps a non-owning
    /// handle; dead handles are pruned on the next query.
    pub fn register(&self, label: &str, object: &Arc<dyn StimulusObject>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push((label.to_string(), Arc::downgrade(object)));
    }

    /// All live entities registered under `label`, in registration order.
    pub fn query(&self, label: &str) -> Vec<Arc<dyn StimulusObject>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        entries
            .iter()
            .filter(|(l, _)| l == label)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}

struct PoolEntry {
    id: ObjectId,
    object: ObjectHandle,
}

#[derive(Default)]
struct PoolInner {
    entries: Vec<PoolEntry>,
    by_id: HashMap<ObjectId, usize>,
    next_id: ObjectId,
}

impl PoolInner {
    fn rebuild_id_map(&mut self) {
        self.by_id.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            self.by_id.insert(entry.id, index);
        }
    }

    fn install(&mut self, objects: Vec<Arc<dyn StimulusObject>>) {
        self.entries.clear();
        for object in objects {
            let id = match object.object_id() {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    object.assign_object_id(id);
                    id
                }
            };
            self.next_id = self.next_id.max(id + 1);
            self.entries.push(PoolEntry {
                id,
                object: Arc::downgrade(&object),
            });
        }
        self.rebuild_id_map();
    }
}

/// The currently active, indexed set of stimulus objects.
pub struct SelectionPool {
    registry: Arc<TagRegistry>,
    inner: Mutex<PoolInner>,
}

impl SelectionPool {
    pub fn new(registry: Arc<TagRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Rebuild the pool with the given method.
    ///
    /// `Tag` clears the pool, scans the registry, keeps live selectable
    /// entities and assigns identifiers to any entity whose id is unset.
    /// `Predefined` is a no-op over the currently assigned pool. `Children`
    /// is not implemented and surfaces an explicit error.
    pub fn populate(&self, method: &PopulationMethod) -> EngineResult<()> {
        match method {
            PopulationMethod::Tag { label } => {
                let objects: Vec<Arc<dyn StimulusObject>> = self
                    .registry
                    .query(label)
                    .into_iter()
                    .filter(|o| o.is_selectable())
                    .collect();
                let mut inner = self.lock();
                inner.install(objects);
                debug!(label, size = inner.entries.len(), "pool populated by tag");
                Ok(())
            }
            PopulationMethod::Predefined => Ok(()),
            PopulationMethod::Children => {
                Err(EngineError::UnsupportedPopulation("children-of-caller"))
            }
        }
    }

    /// Install a caller-supplied fixed list, for `Predefined` population.
    pub fn set_predefined(&self, objects: &[Arc<dyn StimulusObject>]) {
        let mut inner = self.lock();
        inner.install(objects.to_vec());
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Identifiers in pool-index order.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.lock().entries.iter().map(|e| e.id).collect()
    }

    /// Invoke the select capability on the object at a pool index. Warns and
    /// returns `None` when the pool is empty, the index is out of range, or
    /// the entry has been destroyed by the host.
    pub fn select_by_index(&self, index: usize) -> Option<ObjectId> {
        let (id, object) = {
            let inner = self.lock();
            if inner.entries.is_empty() {
                warn!("selection requested on an empty pool");
                return None;
            }
            let entry = match inner.entries.get(index) {
                Some(entry) => entry,
                None => {
                    warn!(index, size = inner.entries.len(), "selection index out of range");
                    return None;
                }
            };
            (entry.id, entry.object.clone())
        };
        match object.upgrade() {
            Some(object) => {
                object.select();
                Some(id)
            }
            None => {
                warn!(index, id, "selected pool entry no longer exists");
                None
            }
        }
    }

    /// Invoke the select capability by stable identifier. Used by paradigms
    /// whose visible subset is filtered, so indices into the filtered view
    /// never collide with full-pool indices.
    pub fn select_by_id(&self, id: ObjectId) -> Option<ObjectId> {
        let index = {
            let inner = self.lock();
            match inner.by_id.get(&id) {
                Some(&index) => index,
                None => {
                    warn!(id, "selection id not present in pool");
                    return None;
                }
            }
        };
        self.select_by_index(index)
    }

    /// Begin visual emphasis on one entry. Dead entries are skipped.
    pub fn start_stimulus(&self, index: usize) {
        if let Some(object) = self.get(index) {
            object.start_stimulus();
        }
    }

    /// End visual emphasis on one entry.
    pub fn stop_stimulus(&self, index: usize) {
        if let Some(object) = self.get(index) {
            object.stop_stimulus();
        }
    }

    /// Force every live entry to the stopped visual state.
    pub fn stop_all(&self) {
        for object in self.live_objects() {
            object.stop_stimulus();
        }
    }

    /// Highlight the entry at `index` as the training target.
    pub fn mark_target(&self, index: usize) {
        if let Some(object) = self.get(index) {
            object.mark_training_target();
        }
    }

    /// Remove the training-target highlight from the entry at `index`.
    pub fn unmark_target(&self, index: usize) {
        if let Some(object) = self.get(index) {
            object.unmark_training_target();
        }
    }

    /// Remove the training-target highlight from every live entry.
    pub fn unmark_all(&self) {
        for object in self.live_objects() {
            object.unmark_training_target();
        }
    }

    /// Live on-screen entries: pool index, identifier and screen position.
    pub fn visible_entries(&self) -> Vec<(usize, ObjectId, [f32; 2])> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let object = entry.object.upgrade()?;
                let position = object.screen_position()?;
                Some((index, entry.id, position))
            })
            .collect()
    }

    /// Upgrade one entry, warning if it has died.
    fn get(&self, index: usize) -> Option<Arc<dyn StimulusObject>> {
        let weak = {
            let inner = self.lock();
            inner.entries.get(index)?.object.clone()
        };
        let object = weak.upgrade();
        if object.is_none() {
            warn!(index, "pool entry no longer exists, skipping");
        }
        object
    }

    fn live_objects(&self) -> Vec<Arc<dyn StimulusObject>> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter_map(|entry| entry.object.upgrade())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestObject {
        selectable: bool,
        id: AtomicU32,
        has_id: AtomicBool,
        lit: AtomicBool,
        selections: AtomicUsize,
        position: Option<[f32; 2]>,
    }

    impl TestObject {
        fn selectable() -> Arc<Self> {
            Arc::new(Self {
                selectable: true,
                ..Default::default()
            })
        }

        fn decoration() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    impl StimulusObject for TestObject {
        fn start_stimulus(&self) -> u64 {
            self.lit.store(true, Ordering::SeqCst);
            0
        }

        fn stop_stimulus(&self) {
            self.lit.store(false, Ordering::SeqCst);
        }

        fn mark_training_target(&self) {}

        fn unmark_training_target(&self) {}

        fn select(&self) {
            self.selections.fetch_add(1, Ordering::SeqCst);
        }

        fn is_selectable(&self) -> bool {
            self.selectable
        }

        fn object_id(&self) -> Option<ObjectId> {
            if self.has_id.load(Ordering::SeqCst) {
                Some(self.id.load(Ordering::SeqCst))
            } else {
                None
            }
        }

        fn assign_object_id(&self, id: ObjectId) {
            self.id.store(id, Ordering::SeqCst);
            self.has_id.store(true, Ordering::SeqCst);
        }

        fn screen_position(&self) -> Option<[f32; 2]> {
            self.position
        }
    }

    fn tag_setup(selectable: usize, decorations: usize) -> (Arc<TagRegistry>, Vec<Arc<TestObject>>) {
        let registry = Arc::new(TagRegistry::new());
        let mut objects = Vec::new();
        for _ in 0..selectable {
            let object = TestObject::selectable();
            registry.register("BCI", &(object.clone() as Arc<dyn StimulusObject>));
            objects.push(object);
        }
        for _ in 0..decorations {
            let object = TestObject::decoration();
            registry.register("BCI", &(object.clone() as Arc<dyn StimulusObject>));
            objects.push(object);
        }
        (registry, objects)
    }

    #[test]
    fn test_tag_population_filters_and_indexes() {
        let (registry, objects) = tag_setup(5, 2);
        let pool = SelectionPool::new(registry);
        pool.populate(&PopulationMethod::Tag {
            label: "BCI".to_string(),
        })
        .unwrap();

        assert_eq!(pool.len(), 5);
        let ids = pool.ids();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5, "identifiers must be unique");
        // Non-selectable decorations never received an id.
        assert!(objects[5].object_id().is_none());
        assert!(objects[6].object_id().is_none());
    }

    #[test]
    fn test_ids_stable_across_repopulation() {
        let (registry, _objects) = tag_setup(3, 0);
        let pool = SelectionPool::new(registry);
        let method = PopulationMethod::Tag {
            label: "BCI".to_string(),
        };
        pool.populate(&method).unwrap();
        let first = pool.ids();
        pool.populate(&method).unwrap();
        assert_eq!(pool.ids(), first);
    }

    #[test]
    fn test_select_by_index_and_id() {
        let (registry, objects) = tag_setup(3, 0);
        let pool = SelectionPool::new(registry);
        pool.populate(&PopulationMethod::Tag {
            label: "BCI".to_string(),
        })
        .unwrap();

        let id = pool.select_by_index(1).unwrap();
        assert_eq!(objects[1].selections.load(Ordering::SeqCst), 1);
        assert_eq!(pool.select_by_id(id), Some(id));
        assert_eq!(objects[1].selections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_select_out_of_range_is_a_noop() {
        let (registry, _objects) = tag_setup(2, 0);
        let pool = SelectionPool::new(registry);
        pool.populate(&PopulationMethod::Tag {
            label: "BCI".to_string(),
        })
        .unwrap();
        assert_eq!(pool.select_by_index(7), None);
    }

    #[test]
    fn test_select_on_empty_pool_is_a_noop() {
        let pool = SelectionPool::new(Arc::new(TagRegistry::new()));
        assert_eq!(pool.select_by_index(0), None);
    }

    #[test]
    fn test_destroyed_entry_is_recoverable() {
        let (registry, mut objects) = tag_setup(2, 0);
        let pool = SelectionPool::new(registry);
        pool.populate(&PopulationMethod::Tag {
            label: "BCI".to_string(),
        })
        .unwrap();

        // Host destroys the first object between frames.
        objects.remove(0);
        assert_eq!(pool.select_by_index(0), None);
        assert!(pool.select_by_index(1).is_some());

        pool.start_stimulus(1);
        assert!(objects[0].lit.load(Ordering::SeqCst));
        pool.stop_all();
        assert!(!objects[0].lit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_predefined_population_is_a_noop_over_assigned_pool() {
        let objects: Vec<Arc<dyn StimulusObject>> = (0..2)
            .map(|_| TestObject::selectable() as Arc<dyn StimulusObject>)
            .collect();
        let pool = SelectionPool::new(Arc::new(TagRegistry::new()));
        pool.set_predefined(&objects);
        assert_eq!(pool.len(), 2);
        pool.populate(&PopulationMethod::Predefined).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_children_population_is_unsupported() {
        let pool = SelectionPool::new(Arc::new(TagRegistry::new()));
        match pool.populate(&PopulationMethod::Children) {
            Err(EngineError::UnsupportedPopulation(_)) => {}
            other => panic!("expected UnsupportedPopulation, got {other:?}"),
        }
    }

    #[test]
    fn test_visible_entries() {
        let registry = Arc::new(TagRegistry::new());
        let on_screen = Arc::new(TestObject {
            selectable: true,
            position: Some([0.25, 0.5]),
            ..Default::default()
        });
        let off_screen = TestObject::selectable();
        registry.register("BCI", &(on_screen.clone() as Arc<dyn StimulusObject>));
        registry.register("BCI", &(off_screen.clone() as Arc<dyn StimulusObject>));

        let pool = SelectionPool::new(registry);
        pool.populate(&PopulationMethod::Tag {
            label: "BCI".to_string(),
        })
        .unwrap();

        let visible = pool.visible_entries();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].0, 0);
        assert_eq!(visible[0].2, [0.25, 0.5]);
    }
}
