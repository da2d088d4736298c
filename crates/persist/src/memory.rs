use std::collections::BTreeMap;
use weald_common::{AttrMap, EntityId};
use weald_kernel::{ObjectStore, StoreError};

/// In-memory object store for tests and tools.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: BTreeMap<EntityId, AttrMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn load(&self, id: EntityId) -> Result<Option<AttrMap>, StoreError> {
        Ok(self.objects.get(&id).cloned())
    }

    fn save(&mut self, id: EntityId, attrs: &AttrMap) -> Result<(), StoreError> {
        self.objects.insert(id, attrs.clone());
        Ok(())
    }

    fn delete(&mut self, id: EntityId) -> Result<bool, StoreError> {
        Ok(self.objects.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weald_common::Value;

    #[test]
    fn roundtrip() {
        let mut store = MemoryStore::new();
        let id = EntityId::new();
        let mut attrs = AttrMap::new();
        attrs.insert("mass".into(), Value::Float(12.0));
        store.save(id, &attrs).unwrap();
        assert_eq!(store.load(id).unwrap(), Some(attrs));
    }

    #[test]
    fn missing_object_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.load(EntityId::new()).unwrap(), None);
    }

    #[test]
    fn delete_reports_presence() {
        let mut store = MemoryStore::new();
        let id = EntityId::new();
        store.save(id, &AttrMap::new()).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(store.is_empty());
    }
}
