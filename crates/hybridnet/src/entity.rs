use std::collections::BTreeMap;

use crate::config::{AuthorityMode, NetConfig};
use crate::error::{NetError, NetResult};
use crate::net::ConnectionId;
use crate::protocol::packets::Spawn;
use crate::snapshot::{Transform, TransformSync};

pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client(ConnectionId),
    Observer,
}

/// Exactly one side writes an entity's transform at any time.
pub fn has_authority(mode: AuthorityMode, owner: Option<ConnectionId>, role: Role) -> bool {
    match (mode, owner, role) {
        (AuthorityMode::Server, _, Role::Server) => true,
        (AuthorityMode::Client, None, Role::Server) => true,
        (AuthorityMode::Client, Some(owner), Role::Client(id)) => owner == id,
        _ => false,
    }
}

pub trait EntityDirectory {
    fn contains_entity(&self, id: EntityId) -> bool;
}

#[derive(Debug)]
pub struct NetEntity {
    pub id: EntityId,
    pub prefab: String,
    pub owner: Option<ConnectionId>,
    pub sync: TransformSync,
}

impl NetEntity {
    pub fn new(
        id: EntityId,
        prefab: impl Into<String>,
        owner: Option<ConnectionId>,
        transform: Transform,
        config: &NetConfig,
    ) -> Self {
        Self {
            id,
            prefab: prefab.into(),
            owner,
            sync: TransformSync::new(transform, config),
        }
    }

    pub fn from_spawn(spawn: &Spawn, config: &NetConfig) -> Self {
        Self::new(
            spawn.entity_id,
            spawn.prefab.clone(),
            spawn.owner,
            Transform::new(spawn.position, spawn.rotation),
            config,
        )
    }

    pub fn to_spawn(&self) -> Spawn {
        let transform = self.sync.transform();
        Spawn {
            entity_id: self.id,
            prefab: self.prefab.clone(),
            owner: self.owner,
            position: transform.position,
            rotation: transform.rotation,
        }
    }

    pub fn transform(&self) -> Transform {
        self.sync.transform()
    }

    pub fn write_transform(
        &mut self,
        mode: AuthorityMode,
        role: Role,
        transform: Transform,
    ) -> NetResult<()> {
        if !has_authority(mode, self.owner, role) {
            return Err(NetError::AuthorityViolation { entity_id: self.id });
        }
        self.sync.set_transform(transform);
        Ok(())
    }

    pub fn set_owner(&mut self, owner: Option<ConnectionId>) {
        if self.owner != owner {
            self.owner = owner;
            self.sync.rebase();
        }
    }
}

#[derive(Debug)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, NetEntity>,
    next_id: EntityId,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> EntityId {
        while self.entities.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1).max(1);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub fn insert(&mut self, entity: NetEntity) -> Option<NetEntity> {
        self.entities.insert(entity.id, entity)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<NetEntity> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&NetEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut NetEntity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NetEntity> {
        self.entities.values_mut()
    }

    pub fn owned_by(&self, connection: ConnectionId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.owner == Some(connection))
            .map(|e| e.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

impl EntityDirectory for EntityRegistry {
    fn contains_entity(&self, id: EntityId) -> bool {
        self.contains(id)
    }
}
