//! The entity arena and containment tree.
//!
//! # Invariants
//! - Every entity except the root has exactly one parent, and appears in
//!   exactly that parent's child set.
//! - No entity is ever a descendant of itself; `reparent` rejects cycles
//!   before mutating anything.
//! - Iteration over entities and children is deterministic (BTreeMap /
//!   BTreeSet keyed by `EntityId`).

use crate::entity::{DirtyFlags, Entity, EntityKind};
use crate::error::KernelError;
use crate::motion::MotionMode;
use glam::Vec3;
use std::collections::BTreeMap;
use tracing::debug;
use weald_common::{EntityId, SimConfig};

/// The arena owning all entities of one world, plus world time.
#[derive(Debug)]
pub struct World {
    entities: BTreeMap<EntityId, Entity>,
    root: EntityId,
    time: f64,
    config: SimConfig,
}

impl World {
    /// Create a world containing only its root entity.
    pub fn new(config: SimConfig) -> Self {
        let root_id = EntityId::new();
        let mut entities = BTreeMap::new();
        entities.insert(root_id, Entity::new(root_id, EntityKind::World, None));
        Self {
            entities,
            root: root_id,
            time: 0.0,
            config,
        }
    }

    pub fn root(&self) -> EntityId {
        self.root
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Advance world time. Time never runs backwards.
    pub fn set_time(&mut self, time: f64) {
        if time > self.time {
            self.time = time;
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    /// Create an entity under an existing parent. Returns its id.
    pub fn create_entity(
        &mut self,
        kind: EntityKind,
        parent: EntityId,
    ) -> Result<EntityId, KernelError> {
        self.create_entity_with_id(EntityId::new(), kind, parent)
    }

    /// Create an entity with a caller-chosen id (used when restoring from
    /// a store).
    pub fn create_entity_with_id(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        parent: EntityId,
    ) -> Result<EntityId, KernelError> {
        let Some(parent_entity) = self.entities.get_mut(&parent) else {
            return Err(KernelError::EntityMissing(parent));
        };
        let was_empty = parent_entity.children.is_empty();
        parent_entity.children.insert(id);
        if was_empty {
            parent_entity.dirty.raise(DirtyFlags::CONTAINMENT);
        }
        let mut entity = Entity::new(id, kind, Some(parent));
        entity.updated_at = self.time;
        self.entities.insert(id, entity);
        debug!(entity = %id, parent = %parent, ?kind, "entity created");
        Ok(id)
    }

    /// Whether `a` lies on `b`'s parent chain (including `a == b`).
    pub fn is_ancestor_of(&self, a: EntityId, b: EntityId) -> bool {
        let mut cursor = Some(b);
        while let Some(id) = cursor {
            if id == a {
                return true;
            }
            cursor = self.entities.get(&id).and_then(|e| e.parent);
        }
        false
    }

    /// Move an entity under a new parent.
    ///
    /// The caller is expected to have validated the request (destination
    /// exists, no cycle); violations here are programmer errors, reported
    /// as `KernelError` without partial mutation. On success the child's
    /// containment is marked dirty, as is either parent whose child set
    /// transitioned between empty and non-empty.
    pub fn reparent(&mut self, id: EntityId, new_parent: EntityId) -> Result<(), KernelError> {
        if !self.entities.contains_key(&new_parent) {
            return Err(KernelError::EntityMissing(new_parent));
        }
        if self.is_ancestor_of(id, new_parent) {
            return Err(KernelError::ContainmentCycle {
                child: id,
                parent: new_parent,
            });
        }
        let old_parent = {
            let entity = self.entities.get(&id).ok_or(KernelError::EntityMissing(id))?;
            entity.parent.ok_or(KernelError::Detached(id))?
        };
        if old_parent == new_parent {
            return Ok(());
        }

        if let Some(old) = self.entities.get_mut(&old_parent) {
            old.children.remove(&id);
            if old.children.is_empty() {
                old.dirty.raise(DirtyFlags::CONTAINMENT);
            }
        }
        let new = self
            .entities
            .get_mut(&new_parent)
            .expect("destination checked above");
        let was_empty = new.children.is_empty();
        new.children.insert(id);
        if was_empty {
            new.dirty.raise(DirtyFlags::CONTAINMENT);
        }
        let entity = self
            .entities
            .get_mut(&id)
            .expect("entity checked above");
        entity.parent = Some(new_parent);
        entity.dirty.raise(DirtyFlags::CONTAINMENT);
        debug!(entity = %id, from = %old_parent, to = %new_parent, "reparented");
        Ok(())
    }

    /// Remove an entity from the arena and its parent's child set.
    ///
    /// Surviving children are moved to the removed entity's parent, each
    /// raising its containment flag. The root cannot be removed.
    pub fn remove(&mut self, id: EntityId) -> Result<Entity, KernelError> {
        if id == self.root {
            return Err(KernelError::RootDeletion);
        }
        let entity = self.entities.get(&id).ok_or(KernelError::EntityMissing(id))?;
        let parent = entity.parent.ok_or(KernelError::Detached(id))?;
        let children: Vec<EntityId> = entity.children.iter().copied().collect();
        for child in children {
            self.reparent(child, parent)?;
        }
        if let Some(parent_entity) = self.entities.get_mut(&parent) {
            parent_entity.children.remove(&id);
            if parent_entity.children.is_empty() {
                parent_entity.dirty.raise(DirtyFlags::CONTAINMENT);
            }
        }
        let removed = self
            .entities
            .remove(&id)
            .expect("entity checked above");
        debug!(entity = %id, "entity removed");
        Ok(removed)
    }

    /// The direct children of `id`, in id order.
    pub fn children_of(&self, id: EntityId) -> impl Iterator<Item = &Entity> {
        self.entities
            .get(&id)
            .into_iter()
            .flat_map(|e| e.children.iter())
            .filter_map(|child| self.entities.get(child))
    }

    /// Entities sharing `id`'s parent, excluding `id` itself.
    pub fn siblings_of(&self, id: EntityId) -> impl Iterator<Item = &Entity> {
        self.entities
            .get(&id)
            .and_then(|e| e.parent)
            .into_iter()
            .flat_map(|parent| self.children_of(parent))
            .filter(move |e| e.id != id)
    }

    /// Floor height of a containing entity, from its reserved `floor`
    /// attribute.
    pub fn floor_of(&self, id: EntityId) -> f32 {
        self.entities
            .get(&id)
            .and_then(|e| e.attrs.get("floor"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32
    }

    /// Constrain the vertical coordinate of a position inside `parent`,
    /// after horizontal integration and before collision evaluation.
    pub fn constrain_height(&self, parent: EntityId, position: Vec3, mode: MotionMode) -> f32 {
        match mode {
            MotionMode::Fixed => position.z,
            MotionMode::Floating => self
                .entities
                .get(&parent)
                .and_then(|e| e.attrs.get("surface_level"))
                .and_then(|v| v.as_f64())
                .map(|n| n as f32)
                .unwrap_or_else(|| self.floor_of(parent)),
            MotionMode::Grounded => self.floor_of(parent),
        }
    }
}
