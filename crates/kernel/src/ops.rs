//! Typed operations: the message protocol entities speak to each other.
//!
//! An operation is immutable once constructed. Handlers never mutate the
//! operation they receive; they build new ones (including modified relay
//! copies) and append them to their output list.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use weald_common::{AttrMap, EntityId, Value};

/// The closed set of operation verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    /// Fired once after construction to prime an entity.
    Setup,
    /// Request a change of position, containment, velocity or orientation.
    Move,
    /// Request an attribute merge.
    Set,
    /// Self-addressed motion timer; re-enters dispatch at a scheduled instant.
    Update,
    /// A fire entity consumes mass from the receiver.
    Burn,
    /// Request destruction; teardown is performed by the router.
    Delete,
    /// Feeds mass to the receiver (emitted by the burn handler).
    Nourish,
    /// Notification: the receiver was picked up by the sender.
    Pickup,
    /// Notification: the receiver was dropped by the sender.
    Drop,
    /// Notification: the sender now wields the argument entity.
    Wield,
    /// Perception broadcast wrapping another operation.
    Sight,
    /// The argument entities became visible to the receiver.
    Appearance,
    /// The argument entities stopped being visible to the receiver.
    Disappearance,
    /// Reports a rejected operation back to its sender.
    Error,
    /// Generic contact verb; exercises the fallback handler.
    Touch,
}

impl Verb {
    /// Broadcast-class verbs cause the router to flush the sender's dirty
    /// mask when they appear in a handler's output.
    pub fn is_broadcast(self) -> bool {
        matches!(self, Verb::Sight | Verb::Appearance | Verb::Disappearance)
    }
}

/// Partial snapshot of an entity carried inside an operation.
///
/// Only the id is mandatory; every other facet is present exactly when the
/// sender means to assert it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Option<EntityId>,
    pub stamp: Option<u64>,
    pub parent: Option<EntityId>,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub orientation: Option<Quat>,
    #[serde(default, skip_serializing_if = "AttrMap::is_empty")]
    pub attrs: AttrMap,
}

impl Fragment {
    pub fn new(id: EntityId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// A fragment carrying no id, used for error messages.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_stamp(mut self, stamp: u64) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_owned(), value.into());
        self
    }
}

/// A payload slot in an operation's argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Fragment(Fragment),
    Op(Box<Operation>),
}

impl Payload {
    pub fn as_fragment(&self) -> Option<&Fragment> {
        match self {
            Payload::Fragment(f) => Some(f),
            Payload::Op(_) => None,
        }
    }

    pub fn as_op(&self) -> Option<&Operation> {
        match self {
            Payload::Op(op) => Some(op),
            Payload::Fragment(_) => None,
        }
    }
}

/// A typed message between entities.
///
/// `to == None` addresses external observers: the router forwards such
/// operations on the outbound stream and never re-dispatches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub verb: Verb,
    pub from: Option<EntityId>,
    pub to: Option<EntityId>,
    pub args: Vec<Payload>,
    /// Scheduled-delivery offset in seconds; `None` delivers immediately.
    pub delay: Option<f64>,
}

impl Operation {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            from: None,
            to: None,
            args: Vec::new(),
            delay: None,
        }
    }

    pub fn from(mut self, id: EntityId) -> Self {
        self.from = Some(id);
        self
    }

    pub fn to(mut self, id: EntityId) -> Self {
        self.to = Some(id);
        self
    }

    pub fn arg(mut self, fragment: Fragment) -> Self {
        self.args.push(Payload::Fragment(fragment));
        self
    }

    pub fn arg_op(mut self, op: Operation) -> Self {
        self.args.push(Payload::Op(Box::new(op)));
        self
    }

    pub fn delayed(mut self, seconds: f64) -> Self {
        self.delay = Some(seconds);
        self
    }

    /// First argument viewed as a fragment, if any.
    pub fn first_fragment(&self) -> Option<&Fragment> {
        self.args.first().and_then(Payload::as_fragment)
    }

    /// Wrap `inner` in a perception broadcast reported by `reporter`.
    pub fn sight_of(inner: Operation, reporter: EntityId) -> Self {
        Operation::new(Verb::Sight).from(reporter).arg_op(inner)
    }

    /// Build the rejection report for `offending`: a message fragment plus
    /// the operation itself, addressed back to its sender.
    pub fn error_for(offending: &Operation, message: &str, reporter: EntityId) -> Self {
        let mut op = Operation::new(Verb::Error)
            .from(reporter)
            .arg(Fragment::anonymous().with_attr("message", message));
        op.to = offending.from;
        op.args.push(Payload::Op(Box::new(offending.clone())));
        op
    }

    /// Self-addressed motion timer due in `seconds`.
    pub fn update_timer(entity: EntityId, seconds: f64) -> Self {
        Operation::new(Verb::Update)
            .from(entity)
            .to(entity)
            .delayed(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_addressing() {
        let a = EntityId::new();
        let b = EntityId::new();
        let op = Operation::new(Verb::Move)
            .from(a)
            .to(b)
            .arg(Fragment::new(b).with_position(Vec3::ONE));
        assert_eq!(op.from, Some(a));
        assert_eq!(op.to, Some(b));
        assert_eq!(op.first_fragment().unwrap().id, Some(b));
        assert!(op.delay.is_none());
    }

    #[test]
    fn error_report_addresses_offender_sender() {
        let sender = EntityId::new();
        let target = EntityId::new();
        let offending = Operation::new(Verb::Move).from(sender).to(target);
        let err = Operation::error_for(&offending, "no position", target);
        assert_eq!(err.verb, Verb::Error);
        assert_eq!(err.to, Some(sender));
        assert_eq!(err.from, Some(target));
        assert_eq!(
            err.first_fragment().unwrap().attrs["message"].as_str(),
            Some("no position")
        );
        assert_eq!(err.args[1].as_op().unwrap().verb, Verb::Move);
    }

    #[test]
    fn sight_wraps_inner_operation() {
        let id = EntityId::new();
        let inner = Operation::new(Verb::Touch).from(id).to(id);
        let sight = Operation::sight_of(inner.clone(), id);
        assert_eq!(sight.verb, Verb::Sight);
        assert!(sight.to.is_none());
        assert_eq!(sight.args[0].as_op(), Some(&inner));
    }

    #[test]
    fn update_timer_is_self_addressed_and_delayed() {
        let id = EntityId::new();
        let op = Operation::update_timer(id, 2.5);
        assert_eq!(op.to, Some(id));
        assert_eq!(op.from, Some(id));
        assert_eq!(op.delay, Some(2.5));
    }

    #[test]
    fn broadcast_class() {
        assert!(Verb::Sight.is_broadcast());
        assert!(Verb::Appearance.is_broadcast());
        assert!(!Verb::Move.is_broadcast());
        assert!(!Verb::Error.is_broadcast());
    }
}
