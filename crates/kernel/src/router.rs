//! The delivery loop: owns the world, the dispatcher, the timer queue
//! and the outbound stream.
//!
//! Handlers never deliver operations; they only emit them. The router
//! resolves addressing, re-enters dispatch for resident receivers,
//! schedules delayed operations, and forwards everything else on the
//! outbound stream. Simulation keeps running without external input
//! because self-addressed timers re-enter the same path.

use crate::dispatch::Dispatcher;
use crate::entity::EntityKind;
use crate::error::KernelError;
use crate::ops::{Operation, Verb};
use crate::store::ObjectStore;
use crate::world::World;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use tracing::{debug, error, warn};
use weald_common::{EntityId, SimConfig};

/// A delayed operation waiting in the queue.
///
/// Ordered by due time, then by scheduling serial so that operations
/// scheduled for the same instant deliver in scheduling order.
#[derive(Debug)]
struct Scheduled {
    due: f64,
    serial: u64,
    op: Operation,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

/// One world's router: the single thread of control driving dispatch.
pub struct Router {
    world: World,
    dispatcher: Dispatcher,
    queue: BinaryHeap<Reverse<Scheduled>>,
    serial: u64,
    outbound: Vec<Operation>,
    store: Option<Box<dyn ObjectStore>>,
}

impl Router {
    pub fn new(config: SimConfig) -> Self {
        Self {
            world: World::new(config),
            dispatcher: Dispatcher::new(),
            queue: BinaryHeap::new(),
            serial: 0,
            outbound: Vec::new(),
            store: None,
        }
    }

    /// Attach the object store consulted at entity construction and
    /// destruction boundaries.
    pub fn attach_store(&mut self, store: Box<dyn ObjectStore>) {
        self.store = Some(store);
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Number of operations waiting in the delayed queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the operations addressed to external observers and
    /// connections, in emission order.
    pub fn take_outbound(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.outbound)
    }

    /// Create a fresh entity and run its setup.
    pub fn spawn(&mut self, kind: EntityKind, parent: EntityId) -> Result<EntityId, KernelError> {
        let id = self.world.create_entity(kind, parent)?;
        self.deliver(Operation::new(Verb::Setup).from(id).to(id))?;
        Ok(id)
    }

    /// Recreate an entity under a known id, seeding its attributes from
    /// the attached store, then run its setup.
    pub fn restore(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        parent: EntityId,
    ) -> Result<EntityId, KernelError> {
        let attrs = match self.store.as_ref() {
            Some(store) => store.load(id)?,
            None => None,
        };
        self.world.create_entity_with_id(id, kind, parent)?;
        if let (Some(attrs), Some(entity)) = (attrs, self.world.get_mut(id)) {
            entity.merge(&attrs);
        }
        self.deliver(Operation::new(Verb::Setup).from(id).to(id))?;
        Ok(id)
    }

    /// Deliver one operation now, then route everything it causes.
    ///
    /// Delivery is iterative and ordered: each handler's output joins a
    /// FIFO work list, so the call graph stays acyclic even though
    /// entities cross-reference each other densely. Dispatch failures
    /// abort only the offending operation.
    pub fn deliver(&mut self, op: Operation) -> Result<(), KernelError> {
        let mut pending = VecDeque::new();
        pending.push_back(op);
        while let Some(mut op) = pending.pop_front() {
            if let Some(delay) = op.delay.take() {
                self.schedule_in(delay, op);
                continue;
            }
            let Some(to) = op.to else {
                self.outbound.push(op);
                continue;
            };
            if !self.world.contains(to) {
                // Unknown receivers are the transport's problem, not ours.
                self.outbound.push(op);
                continue;
            }
            match self.dispatcher.dispatch(&mut self.world, to, &op) {
                Ok(outputs) => {
                    // Flushing a broadcast clears the receiver's
                    // accumulated dirty mask.
                    if outputs.iter().any(|o| o.verb.is_broadcast())
                        && let Some(entity) = self.world.get_mut(to)
                    {
                        entity.dirty.take();
                    }
                    let was_delete = op.verb == Verb::Delete;
                    pending.extend(outputs);
                    if was_delete && to != self.world.root() {
                        self.teardown(to)?;
                    }
                }
                Err(err) => {
                    error!(%err, entity = %to, verb = ?op.verb, "dispatch aborted");
                }
            }
        }
        Ok(())
    }

    /// Advance world time to `time`, delivering every scheduled operation
    /// that falls due on the way, in (instant, scheduling order).
    pub fn run_until(&mut self, time: f64) {
        loop {
            let due = match self.queue.peek() {
                Some(Reverse(next)) if next.due <= time => next.due,
                _ => break,
            };
            let Some(Reverse(next)) = self.queue.pop() else {
                break;
            };
            self.world.set_time(due);
            if let Err(err) = self.deliver(next.op) {
                error!(%err, "scheduled delivery failed");
            }
        }
        self.world.set_time(time);
    }

    /// Advance world time by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        self.run_until(self.world.time() + dt);
    }

    fn schedule_in(&mut self, delay: f64, op: Operation) {
        let due = self.world.time() + delay.max(0.0);
        self.serial += 1;
        debug!(due, verb = ?op.verb, "operation scheduled");
        self.queue.push(Reverse(Scheduled {
            due,
            serial: self.serial,
            op,
        }));
    }

    /// Tear an entity down after its delete broadcast: persist its
    /// attributes, move surviving children up, remove it everywhere.
    fn teardown(&mut self, id: EntityId) -> Result<(), KernelError> {
        if let (Some(store), Some(entity)) = (self.store.as_mut(), self.world.get(id))
            && let Err(err) = store.save(id, &entity.attrs)
        {
            warn!(%err, entity = %id, "failed to persist attributes before removal");
        }
        self.world.remove(id)?;
        self.dispatcher.remove_hook(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Fragment;
    use crate::store::{ObjectStore, StoreError};
    use glam::Vec3;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use weald_common::{AttrMap, Value};

    fn router() -> Router {
        Router::new(SimConfig::default())
    }

    fn move_op(id: EntityId, parent: EntityId, pos: Vec3, vel: Option<Vec3>) -> Operation {
        let mut fragment = Fragment::new(id).with_parent(parent).with_position(pos);
        fragment.velocity = vel;
        Operation::new(Verb::Move).from(id).to(id).arg(fragment)
    }

    #[test]
    fn spawn_announces_on_the_outbound_stream() {
        let mut r = router();
        let root = r.world().root();
        let id = r.spawn(EntityKind::Thing, root).unwrap();

        let outbound = r.take_outbound();
        assert!(
            outbound
                .iter()
                .any(|op| op.verb == Verb::Appearance
                    && op.first_fragment().and_then(|f| f.id) == Some(id))
        );
        // Setup primed one timer.
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn motion_proceeds_through_self_timers() {
        let mut r = router();
        let root = r.world().root();
        let id = r.spawn(EntityKind::Thing, root).unwrap();

        r.deliver(move_op(id, root, Vec3::ZERO, Some(Vec3::new(1.0, 0.0, 0.0))))
            .unwrap();
        r.run_until(10.0);

        let x = r.world().get(id).unwrap().position.x;
        // Integrated up to the last timer at or before t=10.
        assert!(x >= 9.0 - 1e-3, "x = {x}");
    }

    #[test]
    fn stopping_cancels_future_timers() {
        let mut r = router();
        let root = r.world().root();
        let id = r.spawn(EntityKind::Thing, root).unwrap();

        r.deliver(move_op(id, root, Vec3::ZERO, Some(Vec3::new(1.0, 0.0, 0.0))))
            .unwrap();
        r.advance(1.0);
        // Stop: a move with zero velocity.
        r.deliver(move_op(
            id,
            root,
            r.world().get(id).unwrap().position,
            Some(Vec3::ZERO),
        ))
        .unwrap();

        // Drain whatever stale timers remain; they must all no-op.
        r.run_until(60.0);
        assert_eq!(r.pending(), 0);
        let e = r.world().get(id).unwrap();
        assert!(e.position.x <= 1.0 + 1e-3);
    }

    #[test]
    fn equal_instants_deliver_in_scheduling_order() {
        let mut r = router();
        let root = r.world().root();
        let a = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();
        let b = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();

        // Two touches scheduled for the same instant; their Sight wraps
        // must appear outbound in scheduling order.
        r.deliver(Operation::new(Verb::Touch).from(a).to(a).delayed(1.0))
            .unwrap();
        r.deliver(Operation::new(Verb::Touch).from(b).to(b).delayed(1.0))
            .unwrap();
        r.run_until(2.0);

        let outbound = r.take_outbound();
        let froms: Vec<Option<EntityId>> = outbound
            .iter()
            .filter(|op| op.verb == Verb::Sight)
            .map(|op| op.args[0].as_op().unwrap().from)
            .collect();
        assert_eq!(froms, vec![Some(a), Some(b)]);
    }

    #[test]
    fn collision_stops_motion_at_the_predicted_instant() {
        let mut r = router();
        let root = r.world().root();
        let id = r.spawn(EntityKind::Thing, root).unwrap();
        let wall = r.spawn(EntityKind::Thing, root).unwrap();
        r.world_mut().get_mut(id).unwrap().box_size = 0.5;
        {
            let w = r.world_mut().get_mut(wall).unwrap();
            w.box_size = 0.5;
            w.position = Vec3::new(10.0, 0.0, 0.0);
        }

        r.deliver(move_op(id, root, Vec3::ZERO, Some(Vec3::new(1.0, 0.0, 0.0))))
            .unwrap();
        r.run_until(30.0);

        let e = r.world().get(id).unwrap();
        // Stopped just short of the wall (combined radius 1).
        assert!((e.position.x - 9.0).abs() < 1e-2, "x = {}", e.position.x);
        assert!(e.velocity.is_none());
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn broadcasts_without_receiver_go_outbound() {
        let mut r = router();
        let root = r.world().root();
        let id = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();
        r.deliver(
            Operation::new(Verb::Set)
                .from(id)
                .to(id)
                .arg(Fragment::new(id).with_attr("name", "lantern")),
        )
        .unwrap();

        let outbound = r.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].verb, Verb::Sight);
    }

    #[test]
    fn broadcast_flush_clears_the_dirty_mask() {
        let mut r = router();
        let root = r.world().root();
        let id = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();
        r.deliver(move_op(id, root, Vec3::new(2.0, 0.0, 0.0), None))
            .unwrap();
        assert!(r.world().get(id).unwrap().dirty.is_empty());
    }

    #[test]
    fn error_reports_reach_the_outbound_stream() {
        let mut r = router();
        let root = r.world().root();
        let id = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();
        let sender = EntityId::new();

        let mut op = Operation::new(Verb::Move).to(id).arg(Fragment::new(id));
        op.from = Some(sender);
        r.deliver(op).unwrap();

        let outbound = r.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].verb, Verb::Error);
        assert_eq!(outbound[0].to, Some(sender));
    }

    #[derive(Default)]
    struct SharedStore {
        objects: Rc<RefCell<BTreeMap<EntityId, AttrMap>>>,
    }

    impl ObjectStore for SharedStore {
        fn load(&self, id: EntityId) -> Result<Option<AttrMap>, StoreError> {
            Ok(self.objects.borrow().get(&id).cloned())
        }
        fn save(&mut self, id: EntityId, attrs: &AttrMap) -> Result<(), StoreError> {
            self.objects.borrow_mut().insert(id, attrs.clone());
            Ok(())
        }
        fn delete(&mut self, id: EntityId) -> Result<bool, StoreError> {
            Ok(self.objects.borrow_mut().remove(&id).is_some())
        }
    }

    #[test]
    fn delete_tears_down_and_persists() {
        let mut r = router();
        let objects = Rc::new(RefCell::new(BTreeMap::new()));
        r.attach_store(Box::new(SharedStore {
            objects: objects.clone(),
        }));
        let root = r.world().root();
        let bag = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();
        let coin = r.world_mut().create_entity(EntityKind::Thing, bag).unwrap();
        r.world_mut()
            .get_mut(bag)
            .unwrap()
            .attrs
            .insert("name".into(), Value::from("bag"));

        r.deliver(Operation::new(Verb::Delete).from(bag).to(bag).arg(Fragment::new(bag)))
            .unwrap();

        assert!(!r.world().contains(bag));
        // The child moved up to the deleted entity's parent.
        assert_eq!(r.world().get(coin).unwrap().parent, Some(root));
        // Attributes were saved at the destruction boundary.
        assert_eq!(
            objects.borrow().get(&bag).unwrap()["name"].as_str(),
            Some("bag")
        );
        // The delete was announced.
        assert!(r.take_outbound().iter().any(|op| op.verb == Verb::Sight));
    }

    #[test]
    fn restore_seeds_attributes_from_the_store() {
        let mut r = router();
        let objects = Rc::new(RefCell::new(BTreeMap::new()));
        let id = EntityId::new();
        let mut attrs = AttrMap::new();
        attrs.insert("status".into(), Value::Float(0.25));
        attrs.insert("name".into(), Value::from("relic"));
        objects.borrow_mut().insert(id, attrs);
        r.attach_store(Box::new(SharedStore {
            objects: objects.clone(),
        }));

        let root = r.world().root();
        r.restore(id, EntityKind::Thing, root).unwrap();

        let e = r.world().get(id).unwrap();
        assert_eq!(e.status, 0.25);
        assert_eq!(e.attrs["name"].as_str(), Some("relic"));
    }

    #[test]
    fn delete_addressed_to_the_root_is_ignored() {
        let mut r = router();
        let root = r.world().root();
        r.deliver(Operation::new(Verb::Delete).to(root)).unwrap();
        assert!(r.world().contains(root));
    }

    #[test]
    fn status_collapse_cascades_to_teardown() {
        let mut r = router();
        let root = r.world().root();
        let id = r.world_mut().create_entity(EntityKind::Thing, root).unwrap();

        r.deliver(
            Operation::new(Verb::Set)
                .from(id)
                .to(id)
                .arg(Fragment::new(id).with_attr("status", -5.0)),
        )
        .unwrap();

        // The emitted delete was routed back through dispatch and the
        // router performed the teardown.
        assert!(!r.world().contains(id));
    }
}
