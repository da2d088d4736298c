//! Entities: identity, spatial state, containment links, attributes.
//!
//! The arena (`World`) is the sole owner of entities; `parent` and
//! `children` hold ids, never references, so the containment graph can be
//! densely cross-referenced without ownership cycles.

use crate::motion::{Motion, MotionMode};
use crate::ops::Fragment;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;
use weald_common::{AttrMap, EntityId, Value};

/// Behavioral type tag; selects which handler set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// The world root. Exactly one per world; never moves, never dies.
    World,
    /// A tangible, inert entity.
    Thing,
    /// A tangible entity that perceives its surroundings.
    Creature,
}

/// Bit-set of entity facets changed since observers were last notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirtyFlags(u8);

impl DirtyFlags {
    pub const POSITION: DirtyFlags = DirtyFlags(1);
    pub const ORIENTATION: DirtyFlags = DirtyFlags(1 << 1);
    pub const CONTAINMENT: DirtyFlags = DirtyFlags(1 << 2);
    pub const VELOCITY: DirtyFlags = DirtyFlags(1 << 3);
    pub const ATTRIBUTES: DirtyFlags = DirtyFlags(1 << 4);

    pub fn raise(&mut self, flags: DirtyFlags) {
        self.0 |= flags.0;
    }

    pub fn contains(self, flags: DirtyFlags) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Return the accumulated flags and clear them.
    pub fn take(&mut self) -> DirtyFlags {
        std::mem::take(self)
    }
}

impl std::ops::BitOr for DirtyFlags {
    type Output = DirtyFlags;
    fn bitor(self, rhs: DirtyFlags) -> DirtyFlags {
        DirtyFlags(self.0 | rhs.0)
    }
}

/// A spatial entity in the containment tree.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Change-sequence counter, bumped whenever visible state changes.
    pub stamp: u64,

    pub position: Vec3,
    /// `None` while stationary; a near-zero vector is treated the same.
    pub velocity: Option<Vec3>,
    pub orientation: Quat,
    /// Bounding half-extent, used only for coarse sight and collision
    /// tests, never as exact geometry.
    pub box_size: f32,

    /// Owning location. `None` only for the world root.
    pub parent: Option<EntityId>,
    pub children: BTreeSet<EntityId>,

    pub attrs: AttrMap,
    /// Mirror of the reserved `status` attribute.
    pub status: f64,
    /// Mirror of the reserved `mass` attribute.
    pub mass: f64,
    perceptive: bool,

    pub dirty: DirtyFlags,
    /// `None` only for the world root; a tangible entity without motion
    /// state is a programmer error.
    pub motion: Option<Motion>,
    /// World time of the last committed location update.
    pub updated_at: f64,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, parent: Option<EntityId>) -> Self {
        Self {
            id,
            kind,
            stamp: 0,
            position: Vec3::ZERO,
            velocity: None,
            orientation: Quat::IDENTITY,
            box_size: 0.0,
            parent,
            children: BTreeSet::new(),
            attrs: AttrMap::new(),
            status: 1.0,
            mass: 1.0,
            perceptive: matches!(kind, EntityKind::Creature),
            dirty: DirtyFlags::default(),
            motion: (kind != EntityKind::World).then(Motion::new),
            updated_at: 0.0,
        }
    }

    /// Whether this entity takes part in perception as an observer.
    pub fn is_perceptive(&self) -> bool {
        self.perceptive
    }

    pub fn square_box_size(&self) -> f32 {
        self.box_size * self.box_size
    }

    /// Right-biased attribute merge. Reserved keys are mirrored into their
    /// typed fields; every merged key lands in the open map as well.
    pub fn merge(&mut self, attrs: &AttrMap) {
        for (key, value) in attrs {
            match key.as_str() {
                "status" => match value.as_f64() {
                    Some(n) => self.status = n,
                    None => warn!(entity = %self.id, "non-numeric status merged"),
                },
                "mass" => match value.as_f64() {
                    Some(n) => self.mass = n,
                    None => warn!(entity = %self.id, "non-numeric mass merged"),
                },
                "mode" => match value {
                    Value::String(mode) => self.set_mode(mode),
                    _ => warn!(entity = %self.id, "non-string mode merged"),
                },
                "perceptive" => {
                    self.perceptive = value.as_f64().is_some_and(|n| n != 0.0);
                }
                _ => {}
            }
            self.attrs.insert(key.clone(), value.clone());
        }
        if !attrs.is_empty() {
            self.dirty.raise(DirtyFlags::ATTRIBUTES);
        }
    }

    /// Update the reserved `mode` attribute and the motion model together.
    pub fn set_mode(&mut self, mode: &str) {
        self.attrs
            .insert("mode".to_owned(), Value::String(mode.to_owned()));
        if let Some(motion) = self.motion.as_mut() {
            motion.set_mode(MotionMode::from_attr(mode));
        }
    }

    pub fn mode(&self) -> MotionMode {
        self.motion.as_ref().map(Motion::mode).unwrap_or_default()
    }

    /// Write this entity's committed location into a fragment, as relayed
    /// by movement broadcasts.
    pub fn write_location(&self, fragment: &mut Fragment) {
        fragment.id = Some(self.id);
        fragment.parent = self.parent;
        fragment.position = Some(self.position);
        fragment.velocity = self.velocity;
        fragment.orientation = Some(self.orientation);
    }

    /// Fragment carrying exactly the facets accumulated in the dirty mask,
    /// plus id and stamp. Basis for outgoing perception payloads.
    pub fn changed_fragment(&self) -> Fragment {
        let mut fragment = Fragment::new(self.id).with_stamp(self.stamp);
        if self.dirty.contains(DirtyFlags::POSITION) {
            fragment.position = Some(self.position);
        }
        if self.dirty.contains(DirtyFlags::ORIENTATION) {
            fragment.orientation = Some(self.orientation);
        }
        if self.dirty.contains(DirtyFlags::CONTAINMENT) {
            fragment.parent = self.parent;
        }
        if self.dirty.contains(DirtyFlags::VELOCITY) {
            fragment.velocity = self.velocity;
        }
        fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thing() -> Entity {
        Entity::new(EntityId::new(), EntityKind::Thing, Some(EntityId::new()))
    }

    #[test]
    fn dirty_flags_accumulate_and_clear() {
        let mut flags = DirtyFlags::default();
        assert!(flags.is_empty());
        flags.raise(DirtyFlags::POSITION);
        flags.raise(DirtyFlags::ATTRIBUTES);
        assert!(flags.contains(DirtyFlags::POSITION));
        assert!(!flags.contains(DirtyFlags::CONTAINMENT));
        assert!(flags.contains(DirtyFlags::POSITION | DirtyFlags::ATTRIBUTES));
        let taken = flags.take();
        assert!(flags.is_empty());
        assert!(taken.contains(DirtyFlags::POSITION));
    }

    #[test]
    fn merge_mirrors_reserved_keys() {
        let mut e = thing();
        let mut attrs = AttrMap::new();
        attrs.insert("status".into(), Value::Float(0.5));
        attrs.insert("mass".into(), Value::Int(80));
        attrs.insert("mode".into(), Value::from("floating"));
        attrs.insert("burn_speed".into(), Value::Float(0.1));
        e.merge(&attrs);

        assert_eq!(e.status, 0.5);
        assert_eq!(e.mass, 80.0);
        assert_eq!(e.mode(), MotionMode::Floating);
        assert_eq!(e.attrs["burn_speed"].as_f64(), Some(0.1));
        assert!(e.dirty.contains(DirtyFlags::ATTRIBUTES));
    }

    #[test]
    fn merge_is_right_biased() {
        let mut e = thing();
        let mut first = AttrMap::new();
        first.insert("name".into(), Value::from("stone"));
        e.merge(&first);
        let mut second = AttrMap::new();
        second.insert("name".into(), Value::from("boulder"));
        e.merge(&second);
        assert_eq!(e.attrs["name"].as_str(), Some("boulder"));
    }

    #[test]
    fn merge_does_not_bump_stamp() {
        let mut e = thing();
        let mut attrs = AttrMap::new();
        attrs.insert("status".into(), Value::Float(0.9));
        e.merge(&attrs);
        assert_eq!(e.stamp, 0);
    }

    #[test]
    fn creatures_are_perceptive_by_default() {
        let c = Entity::new(EntityId::new(), EntityKind::Creature, Some(EntityId::new()));
        assert!(c.is_perceptive());
        assert!(!thing().is_perceptive());
    }

    #[test]
    fn perceptive_attr_overrides_kind() {
        let mut e = thing();
        let mut attrs = AttrMap::new();
        attrs.insert("perceptive".into(), Value::Int(1));
        e.merge(&attrs);
        assert!(e.is_perceptive());
    }

    #[test]
    fn world_root_has_no_motion() {
        let root = Entity::new(EntityId::new(), EntityKind::World, None);
        assert!(root.motion.is_none());
        assert!(thing().motion.is_some());
    }

    #[test]
    fn changed_fragment_tracks_dirty_mask() {
        let mut e = thing();
        e.position = Vec3::new(1.0, 2.0, 3.0);
        e.velocity = Some(Vec3::X);
        e.dirty.raise(DirtyFlags::POSITION);
        let fragment = e.changed_fragment();
        assert_eq!(fragment.position, Some(e.position));
        assert!(fragment.velocity.is_none());
        assert_eq!(fragment.id, Some(e.id));
    }
}
