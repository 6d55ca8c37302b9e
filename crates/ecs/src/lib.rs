//! Deterministic entity registry.
//!
//! Components are stored per type in BTreeMaps keyed by `EntityId`, so every
//! iteration is in entity (spawn) order.
//!
//! # Invariants
//! - Components can only be attached to live entities.
//! - Despawning an entity detaches every component it carries.
//! - All attach/detach/spawn/despawn operations produce events.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use strata_common::{EntityId, StaticMesh, Tag, Transform};

/// Marker for types that can be stored in the [`Registry`].
pub trait Component: 'static {}

impl Component for Transform {}
impl Component for Tag {}
impl Component for StaticMesh {}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("entity {0} is not alive")]
    EntityNotFound(EntityId),
}

/// Events produced by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Spawned { entity: EntityId },
    Despawned { entity: EntityId },
    Attached { entity: EntityId, component: &'static str },
    Detached { entity: EntityId, component: &'static str },
}

trait ErasedStorage {
    fn detach(&mut self, entity: EntityId) -> bool;
    fn component_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Storage<T: Component> {
    items: BTreeMap<EntityId, T>,
}

impl<T: Component> ErasedStorage for Storage<T> {
    fn detach(&mut self, entity: EntityId) -> bool {
        self.items.remove(&entity).is_some()
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The single shared mutable store binding simulation state to entities.
///
/// Only the simulation thread touches it, and only during its own tick phase.
#[derive(Default)]
pub struct Registry {
    next_index: u64,
    alive: BTreeSet<EntityId>,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
    events: Vec<RegistryEvent>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new entity. Ids are sequential, so entity order is spawn order.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId::from_index(self.next_index);
        self.next_index += 1;
        self.alive.insert(id);
        self.events.push(RegistryEvent::Spawned { entity: id });
        id
    }

    /// Spawn an entity carrying a [`Transform`].
    pub fn spawn_at(&mut self, transform: Transform) -> EntityId {
        let id = self.spawn();
        self.attach_unchecked(id, transform);
        id
    }

    /// Destroy an entity and every component attached to it.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        // Sort by name so detach events are reproducible across runs.
        let mut detached: Vec<&'static str> = self
            .storages
            .values_mut()
            .filter_map(|s| s.detach(entity).then(|| s.component_name()))
            .collect();
        detached.sort_unstable();
        for component in detached {
            self.events
                .push(RegistryEvent::Detached { entity, component });
        }
        self.events.push(RegistryEvent::Despawned { entity });
        tracing::trace!(%entity, "despawned");
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// All live entities in entity order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    /// Attach (or replace) a component. Returns the replaced value.
    pub fn insert<T: Component>(
        &mut self,
        entity: EntityId,
        component: T,
    ) -> Result<Option<T>, RegistryError> {
        if !self.is_alive(entity) {
            return Err(RegistryError::EntityNotFound(entity));
        }
        Ok(self.attach_unchecked(entity, component))
    }

    fn attach_unchecked<T: Component>(&mut self, entity: EntityId, component: T) -> Option<T> {
        let old = self.storage_mut::<T>().insert(entity, component);
        if old.is_none() {
            self.events.push(RegistryEvent::Attached {
                entity,
                component: std::any::type_name::<T>(),
            });
        }
        old
    }

    /// Detach a component.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Option<T> {
        let removed = self.storage_mut::<T>().remove(&entity);
        if removed.is_some() {
            self.events.push(RegistryEvent::Detached {
                entity,
                component: std::any::type_name::<T>(),
            });
        }
        removed
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>()?.get(&entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<Storage<T>>()?
            .items
            .get_mut(&entity)
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.get::<T>(entity).is_some()
    }

    /// Iterate all components of type `T` in entity order.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.storage::<T>()
            .into_iter()
            .flat_map(|items| items.iter().map(|(id, c)| (*id, c)))
    }

    /// Mutably iterate all components of type `T` in entity order.
    pub fn iter_mut<T: Component>(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> + '_ {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.as_any_mut().downcast_mut::<Storage<T>>())
            .into_iter()
            .flat_map(|s| s.items.iter_mut().map(|(id, c)| (*id, c)))
    }

    /// Entities carrying a `T`, in entity order.
    pub fn entities_with<T: Component>(&self) -> Vec<EntityId> {
        self.iter::<T>().map(|(id, _)| id).collect()
    }

    /// Entities carrying both an `A` and a `B`, in entity order.
    pub fn entities_with2<A: Component, B: Component>(&self) -> Vec<EntityId> {
        self.iter::<A>()
            .map(|(id, _)| id)
            .filter(|id| self.has::<B>(*id))
            .collect()
    }

    /// Number of `T` components stored.
    pub fn count<T: Component>(&self) -> usize {
        self.storage::<T>().map_or(0, |s| s.len())
    }

    /// Drain and return all pending registry events.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only access to pending events.
    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    fn storage<T: Component>(&self) -> Option<&BTreeMap<EntityId, T>> {
        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<Storage<T>>()
            .map(|s| &s.items)
    }

    fn storage_mut<T: Component>(&mut self) -> &mut BTreeMap<EntityId, T> {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Box::new(Storage::<T> {
                    items: BTreeMap::new(),
                })
            });
        match storage.as_any_mut().downcast_mut::<Storage<T>>() {
            Some(s) => &mut s.items,
            None => unreachable!("storage keyed by TypeId holds its own type"),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.alive.len())
            .field("component_types", &self.storages.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

pub fn crate_info() -> &'static str {
    "strata-ecs v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[derive(Debug, PartialEq)]
    struct Health(u32);
    impl Component for Health {}

    #[test]
    fn spawn_and_despawn() {
        let mut reg = Registry::new();
        let id = reg.spawn();
        assert!(reg.is_alive(id));
        assert_eq!(reg.entity_count(), 1);
        assert!(reg.despawn(id));
        assert!(!reg.is_alive(id));
        assert!(!reg.despawn(id));
    }

    #[test]
    fn insert_get_has_remove() {
        let mut reg = Registry::new();
        let id = reg.spawn();
        reg.insert(id, Health(10)).unwrap();
        assert!(reg.has::<Health>(id));
        assert_eq!(reg.get::<Health>(id), Some(&Health(10)));

        reg.get_mut::<Health>(id).unwrap().0 = 4;
        assert_eq!(reg.remove::<Health>(id), Some(Health(4)));
        assert!(!reg.has::<Health>(id));
    }

    #[test]
    fn insert_on_dead_entity_fails() {
        let mut reg = Registry::new();
        let id = reg.spawn();
        reg.despawn(id);
        assert!(matches!(
            reg.insert(id, Health(1)),
            Err(RegistryError::EntityNotFound(_))
        ));
    }

    #[test]
    fn despawn_clears_all_components() {
        let mut reg = Registry::new();
        let id = reg.spawn_at(Transform::default());
        reg.insert(id, Health(3)).unwrap();
        reg.insert(id, Tag::terrain()).unwrap();
        reg.despawn(id);
        assert_eq!(reg.count::<Health>(), 0);
        assert_eq!(reg.count::<Transform>(), 0);
        assert_eq!(reg.count::<Tag>(), 0);
    }

    #[test]
    fn iteration_is_spawn_order() {
        let mut reg = Registry::new();
        let ids: Vec<EntityId> = (0..50)
            .map(|i| reg.spawn_at(Transform::from_position(Vec3::splat(i as f32))))
            .collect();
        let seen: Vec<EntityId> = reg.iter::<Transform>().map(|(id, _)| id).collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn entities_with_two_components() {
        let mut reg = Registry::new();
        let a = reg.spawn_at(Transform::default());
        let b = reg.spawn_at(Transform::default());
        reg.insert(b, Health(1)).unwrap();
        let c = reg.spawn();
        reg.insert(c, Health(2)).unwrap();
        assert_eq!(reg.entities_with2::<Transform, Health>(), vec![b]);
        assert_eq!(reg.entities_with::<Health>(), vec![b, c]);
        let _ = a;
    }

    #[test]
    fn events_are_recorded() {
        let mut reg = Registry::new();
        let id = reg.spawn();
        reg.insert(id, Health(1)).unwrap();
        reg.insert(id, Health(2)).unwrap(); // replace: no second attach event
        reg.despawn(id);
        let events = reg.drain_events();
        assert_eq!(events.len(), 4); // spawn + attach + detach + despawn
        assert!(matches!(events[3], RegistryEvent::Despawned { .. }));
        assert!(reg.events().is_empty());
    }

    #[test]
    fn iter_mut_updates_in_place() {
        let mut reg = Registry::new();
        for _ in 0..3 {
            let id = reg.spawn();
            reg.insert(id, Health(1)).unwrap();
        }
        for (_, h) in reg.iter_mut::<Health>() {
            h.0 += 1;
        }
        assert!(reg.iter::<Health>().all(|(_, h)| h.0 == 2));
    }
}
