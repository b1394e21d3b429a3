//! Single-writer replicated properties.
//!
//! Every replicated object names one [`Writer`]. Only a participant that
//! [`may_write`](Participant::may_write) that writer changes the object's
//! fields locally; everyone else receives the changes as [`PropertyUpdate`]s
//! once per step. There is no locking: the single-writer rule is what keeps
//! participants from fighting over a field.
//!
//! Changes of writer are numbered. Every handoff produces an [`Ownership`]
//! with a higher generation, and an announcement older than the local one is
//! ignored, so a late or reordered announcement can never take an object
//! back from its newer writer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

/// Identifier of a replicated object (entity) within a match.
pub type EntityId = u32;

/// The role allowed to write an object's replicated fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Writer {
    /// Whichever participant is currently the authority.
    Authority,
    /// One specific participant.
    Peer(PlayerId),
}

/// A participant as seen by the replication layer: who it is and whether it
/// is the authority for the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PlayerId,
    pub is_authority: bool,
}

impl Participant {
    pub fn authority(id: PlayerId) -> Self {
        Self {
            id,
            is_authority: true,
        }
    }

    pub fn peer(id: PlayerId) -> Self {
        Self {
            id,
            is_authority: false,
        }
    }

    pub fn may_write(&self, writer: Writer) -> bool {
        match writer {
            Writer::Authority => self.is_authority,
            Writer::Peer(id) => id == self.id,
        }
    }
}

/// A writer and the number of handoffs that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub writer: Writer,
    pub generation: u32,
}

impl Ownership {
    /// Ownership of a freshly spawned object.
    pub const fn new(writer: Writer) -> Self {
        Self {
            writer,
            generation: 0,
        }
    }

    /// The ownership after handing the object to `writer`.
    pub fn succeeded_by(self, writer: Writer) -> Self {
        Self {
            writer,
            generation: self.generation.wrapping_add(1),
        }
    }

    pub fn supersedes(self, other: Ownership) -> bool {
        self.generation > other.generation
    }
}

/// One replicated field with local change tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replicated<T> {
    value: T,
    #[serde(skip)]
    dirty: bool,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Local write. Callers are responsible for checking the writer first.
    pub fn set(&mut self, value: T) {
        if self.value != value {
            self.value = value;
            self.dirty = true;
        }
    }

    /// Force the value to be sent with the next batch even if unchanged.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Overwrite with a value received from the field's writer.
    pub fn apply_remote(&mut self, value: T) {
        self.value = value;
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the value if it changed since the last call.
    pub fn take_dirty(&mut self) -> Option<T> {
        if self.dirty {
            self.dirty = false;
            Some(self.value.clone())
        } else {
            None
        }
    }
}

impl<T: Copy> Replicated<T> {
    pub fn value(&self) -> T {
        self.value
    }
}

/// An object whose fields are mirrored across participants.
pub trait ReplicatedObject {
    /// Closed set of field updates, one variant per field.
    type Field: Clone;

    fn ownership(&self) -> Ownership;

    fn writer(&self) -> Writer {
        self.ownership().writer
    }

    /// The field announcing `ownership`.
    fn ownership_field(ownership: Ownership) -> Self::Field;

    /// The ownership `field` announces, if it is the ownership field.
    fn announced_ownership(field: &Self::Field) -> Option<Ownership>;

    /// Drain locally changed fields, in a stable order.
    fn take_changes(&mut self) -> Vec<Self::Field>;

    /// Apply one field received from the object's writer.
    fn apply_field(&mut self, field: Self::Field);

    /// A pending change of writer. Called once the object's other changes
    /// have been collected; the implementation switches its writer locally
    /// and returns the field announcing it, which is sent last.
    fn take_handoff(&mut self) -> Option<Self::Field> {
        None
    }
}

/// Reference to something that can take part in a collision: a player agent
/// or a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRef {
    Player(PlayerId),
    Holdable(EntityId),
}

/// A field change addressed to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdate<F> {
    pub entity: EntityId,
    pub field: F,
}

/// Per-match collection of replicated objects keyed by entity id.
///
/// Iteration is in entity id order so every participant walks objects the
/// same way.
#[derive(Debug, Clone)]
pub struct PropertyStore<T> {
    objects: BTreeMap<EntityId, T>,
}

impl<T> Default for PropertyStore<T> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }
}

impl<T: ReplicatedObject> PropertyStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EntityId, object: T) {
        self.objects.insert(id, object);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.objects.iter().map(|(id, obj)| (*id, obj))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.objects.iter_mut().map(|(id, obj)| (*id, obj))
    }

    /// Collect changed fields of every object `local` may write, followed by
    /// any pending hand-off to a new writer.
    ///
    /// Objects written by someone else are skipped even if a local field was
    /// touched; their dirty flags are cleared so stale writes never leak out.
    pub fn collect_updates(&mut self, local: &Participant) -> Vec<PropertyUpdate<T::Field>> {
        let mut updates = Vec::new();
        for (&entity, object) in self.objects.iter_mut() {
            let changes = object.take_changes();
            if !local.may_write(object.writer()) {
                if !changes.is_empty() {
                    tracing::trace!(entity, "Discarded writes to an object owned elsewhere");
                }
                continue;
            }
            updates.extend(changes.into_iter().map(|field| PropertyUpdate { entity, field }));
            if let Some(field) = object.take_handoff() {
                updates.push(PropertyUpdate { entity, field });
            }
        }
        updates
    }

    /// Ownership of every object `local` does not write. The authority sends
    /// this to participants that joined late, which otherwise know objects
    /// only as they spawned.
    pub fn announce_ownership(&self, local: &Participant) -> Vec<PropertyUpdate<T::Field>> {
        self.objects
            .iter()
            .filter(|(_, object)| !local.may_write(object.writer()))
            .map(|(&entity, object)| PropertyUpdate {
                entity,
                field: T::ownership_field(object.ownership()),
            })
            .collect()
    }

    /// Apply updates sent by `origin`.
    ///
    /// A field is accepted when `origin` may write the object at that point
    /// in the batch. An ownership field must also be newer than the local
    /// ownership, and is accepted from the current writer or from the
    /// authority, which arbitrates ownership. Fields after it in the same
    /// batch are checked against the new writer.
    ///
    /// Returns the ids of objects that changed.
    pub fn apply_updates(
        &mut self,
        origin: &Participant,
        updates: Vec<PropertyUpdate<T::Field>>,
    ) -> Vec<EntityId> {
        let mut touched = Vec::new();
        for update in updates {
            let Some(object) = self.objects.get_mut(&update.entity) else {
                tracing::trace!(entity = update.entity, "Update for unknown entity dropped");
                continue;
            };
            let current = object.ownership();
            let accepted = match T::announced_ownership(&update.field) {
                Some(claim) if !claim.supersedes(current) => {
                    tracing::trace!(
                        entity = update.entity,
                        generation = claim.generation,
                        "Ignored stale ownership"
                    );
                    continue;
                },
                Some(_) => origin.is_authority || origin.may_write(current.writer),
                None => origin.may_write(current.writer),
            };
            if !accepted {
                tracing::debug!(
                    entity = update.entity,
                    sender = origin.id,
                    "Rejected update from a participant that does not own the entity"
                );
                continue;
            }
            object.apply_field(update.field);
            if !touched.contains(&update.entity) {
                touched.push(update.entity);
            }
        }
        touched
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum CounterField {
        Owner(Ownership),
        Count(u32),
    }

    struct Counter {
        owner: Replicated<Ownership>,
        count: Replicated<u32>,
        handoff: Option<Writer>,
    }

    impl Counter {
        fn new(writer: Writer) -> Self {
            Self {
                owner: Replicated::new(Ownership::new(writer)),
                count: Replicated::new(0),
                handoff: None,
            }
        }
    }

    impl ReplicatedObject for Counter {
        type Field = CounterField;

        fn ownership(&self) -> Ownership {
            self.owner.value()
        }

        fn ownership_field(ownership: Ownership) -> CounterField {
            CounterField::Owner(ownership)
        }

        fn announced_ownership(field: &CounterField) -> Option<Ownership> {
            match field {
                CounterField::Owner(o) => Some(*o),
                CounterField::Count(_) => None,
            }
        }

        fn take_changes(&mut self) -> Vec<CounterField> {
            let mut out = Vec::new();
            if let Some(o) = self.owner.take_dirty() {
                out.push(CounterField::Owner(o));
            }
            if let Some(c) = self.count.take_dirty() {
                out.push(CounterField::Count(c));
            }
            out
        }

        fn apply_field(&mut self, field: CounterField) {
            match field {
                CounterField::Owner(o) => self.owner.apply_remote(o),
                CounterField::Count(c) => self.count.apply_remote(c),
            }
        }

        fn take_handoff(&mut self) -> Option<CounterField> {
            let next = self.owner.value().succeeded_by(self.handoff.take()?);
            self.owner.apply_remote(next);
            Some(CounterField::Owner(next))
        }
    }

    fn owner(writer: Writer, generation: u32) -> CounterField {
        CounterField::Owner(Ownership { writer, generation })
    }

    fn update(entity: EntityId, field: CounterField) -> PropertyUpdate<CounterField> {
        PropertyUpdate { entity, field }
    }

    #[test]
    fn may_write_rules() {
        let host = Participant::authority(1);
        let guest = Participant::peer(2);
        assert!(host.may_write(Writer::Authority));
        assert!(!guest.may_write(Writer::Authority));
        assert!(guest.may_write(Writer::Peer(2)));
        assert!(!host.may_write(Writer::Peer(2)));
    }

    #[test]
    fn set_same_value_is_not_dirty() {
        let mut field = Replicated::new(5u32);
        field.set(5);
        assert!(!field.is_dirty());
        field.set(6);
        assert_eq!(field.take_dirty(), Some(6));
        assert_eq!(field.take_dirty(), None);
    }

    #[test]
    fn only_owned_objects_are_collected() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Authority));
        store.insert(2, Counter::new(Writer::Peer(7)));
        store.get_mut(1).unwrap().count.set(3);
        store.get_mut(2).unwrap().count.set(4);

        let updates = store.collect_updates(&Participant::authority(1));
        assert_eq!(updates, vec![update(1, CounterField::Count(3))]);
        // Foreign dirty flag was cleared rather than held back.
        assert!(!store.get(2).unwrap().count.is_dirty());
    }

    #[test]
    fn handoff_is_sent_after_changes() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Peer(7)));
        let counter = store.get_mut(1).unwrap();
        counter.count.set(5);
        counter.handoff = Some(Writer::Authority);

        let updates = store.collect_updates(&Participant::peer(7));
        let fields: Vec<CounterField> = updates.into_iter().map(|u| u.field).collect();
        assert_eq!(
            fields,
            vec![CounterField::Count(5), owner(Writer::Authority, 1)]
        );
        assert_eq!(store.get(1).unwrap().writer(), Writer::Authority);

        // The former writer no longer emits anything.
        store.get_mut(1).unwrap().count.set(6);
        assert!(store.collect_updates(&Participant::peer(7)).is_empty());
    }

    #[test]
    fn updates_from_non_writer_are_rejected() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Peer(7)));
        let forged = vec![update(1, CounterField::Count(9))];
        let touched = store.apply_updates(&Participant::authority(1), forged);
        assert!(touched.is_empty());
        assert_eq!(store.get(1).unwrap().count.value(), 0);
    }

    #[test]
    fn handoff_regates_the_rest_of_the_batch() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Peer(7)));
        let touched = store.apply_updates(
            &Participant::peer(7),
            vec![
                update(1, CounterField::Count(2)),
                update(1, owner(Writer::Authority, 1)),
                update(1, CounterField::Count(3)),
            ],
        );
        assert_eq!(touched, vec![1]);
        let counter = store.get(1).unwrap();
        assert_eq!(counter.count.value(), 2);
        assert_eq!(counter.writer(), Writer::Authority);
    }

    // ========================================================================
    // Ownership announcements
    // ========================================================================

    #[test]
    fn peer_cannot_claim_an_object() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Authority));
        let touched = store.apply_updates(
            &Participant::peer(9),
            vec![
                update(1, owner(Writer::Peer(9), 5)),
                update(1, CounterField::Count(4)),
            ],
        );
        assert!(touched.is_empty());
        assert_eq!(store.get(1).unwrap().writer(), Writer::Authority);
    }

    #[test]
    fn authority_announces_foreign_owner_and_unlocks_its_fields() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Authority));
        store.apply_updates(
            &Participant::authority(1),
            vec![update(1, owner(Writer::Peer(7), 3))],
        );
        assert_eq!(store.get(1).unwrap().writer(), Writer::Peer(7));

        store.apply_updates(&Participant::peer(7), vec![update(1, CounterField::Count(8))]);
        assert_eq!(store.get(1).unwrap().count.value(), 8);
    }

    #[test]
    fn stale_ownership_is_ignored() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Authority));
        store.apply_updates(
            &Participant::authority(1),
            vec![update(1, owner(Writer::Authority, 4))],
        );
        let touched = store.apply_updates(
            &Participant::authority(1),
            vec![update(1, owner(Writer::Peer(7), 3))],
        );
        assert!(touched.is_empty());
        assert_eq!(
            store.get(1).unwrap().ownership(),
            Ownership {
                writer: Writer::Authority,
                generation: 4
            }
        );
    }

    #[test]
    fn announcement_lists_objects_written_elsewhere() {
        let mut store = PropertyStore::new();
        store.insert(1, Counter::new(Writer::Authority));
        let mut held = Counter::new(Writer::Authority);
        held.owner.apply_remote(Ownership::new(Writer::Authority).succeeded_by(Writer::Peer(7)));
        store.insert(2, held);

        assert_eq!(
            store.announce_ownership(&Participant::authority(1)),
            vec![update(2, owner(Writer::Peer(7), 1))]
        );
    }
}
