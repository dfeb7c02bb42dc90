//! In-memory state store.
//!
//! Holds the canonical copy of each gateway entity kind, indexed by natural
//! identifier (name, addr, or cluster-server pair) and by numeric id. All
//! egress values are clones; callers never observe shared mutable state.

use crate::model::{Api, Bind, Cluster, Routing, Server};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("entity already exists")]
    AlreadyExists,

    #[error("identifier is required")]
    IdRequired,
}

/// An entity that can live in a [`Collection`].
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    const KIND: &'static str;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    /// The natural key: name/addr when present, the decimal id otherwise.
    /// Empty when neither is set.
    fn identifier(&self) -> String;
}

impl Entity for Server {
    const KIND: &'static str = "server";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn identifier(&self) -> String {
        named_identifier(&self.addr, self.id)
    }
}

impl Entity for Cluster {
    const KIND: &'static str = "cluster";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn identifier(&self) -> String {
        named_identifier(&self.name, self.id)
    }
}

impl Entity for Api {
    const KIND: &'static str = "api";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn identifier(&self) -> String {
        named_identifier(&self.name, self.id)
    }
}

impl Entity for Routing {
    const KIND: &'static str = "routing";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn identifier(&self) -> String {
        named_identifier(&self.name, self.id)
    }
}

impl Entity for Bind {
    const KIND: &'static str = "bind";

    fn id(&self) -> u64 {
        0
    }

    fn set_id(&mut self, _id: u64) {}

    fn identifier(&self) -> String {
        if self.cluster_id == 0 && self.server_id == 0 {
            return String::new();
        }
        format!("{}-{}", self.cluster_id, self.server_id)
    }
}

fn named_identifier(name: &str, id: u64) -> String {
    if !name.is_empty() {
        return name.to_string();
    }
    if id != 0 {
        return id.to_string();
    }
    String::new()
}

#[derive(Debug)]
struct Table<T> {
    by_key: HashMap<String, T>,
    by_id: HashMap<u64, String>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_id: HashMap::new(),
        }
    }
}

/// A single entity table with atomic read-modify-write operations.
#[derive(Debug)]
pub struct Collection<T> {
    inner: RwLock<Table<T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Table::default()),
        }
    }
}

impl<T: Entity> Collection<T> {
    /// Inserts a new entity. Fails with `AlreadyExists` if the identifier or
    /// a nonzero id is already indexed.
    pub fn add(&self, entity: T) -> Result<(), StoreError> {
        let key = entity.identifier();
        if key.is_empty() {
            return Err(StoreError::IdRequired);
        }

        let mut table = self.inner.write();
        if table.by_key.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        if entity.id() != 0 && table.by_id.contains_key(&entity.id()) {
            return Err(StoreError::AlreadyExists);
        }

        if entity.id() != 0 {
            table.by_id.insert(entity.id(), key.clone());
        }
        table.by_key.insert(key, entity);
        Ok(())
    }

    /// Looks an entity up by name/addr first, then by decimal id.
    pub fn get(&self, name_or_id: &str) -> Result<T, StoreError> {
        if name_or_id.is_empty() {
            return Err(StoreError::IdRequired);
        }

        let table = self.inner.read();
        if let Some(entity) = table.by_key.get(name_or_id) {
            return Ok(entity.clone());
        }
        if let Ok(id) = name_or_id.parse::<u64>() {
            if let Some(key) = table.by_id.get(&id) {
                if let Some(entity) = table.by_key.get(key) {
                    return Ok(entity.clone());
                }
            }
        }
        Err(StoreError::NotFound)
    }

    /// Replaces an existing entity, re-indexing both keys.
    pub fn update(&self, entity: T) -> Result<(), StoreError> {
        let key = entity.identifier();
        if key.is_empty() {
            return Err(StoreError::IdRequired);
        }

        let mut table = self.inner.write();
        let old = table.by_key.remove(&key).ok_or(StoreError::NotFound)?;
        if old.id() != 0 {
            table.by_id.remove(&old.id());
        }
        if entity.id() != 0 {
            table.by_id.insert(entity.id(), key.clone());
        }
        table.by_key.insert(key, entity);
        Ok(())
    }

    pub fn delete(&self, name_or_id: &str) -> Result<(), StoreError> {
        if name_or_id.is_empty() {
            return Err(StoreError::IdRequired);
        }

        let mut table = self.inner.write();
        let key = if table.by_key.contains_key(name_or_id) {
            name_or_id.to_string()
        } else {
            name_or_id
                .parse::<u64>()
                .ok()
                .and_then(|id| table.by_id.get(&id).cloned())
                .ok_or(StoreError::NotFound)?
        };

        let old = table.by_key.remove(&key).ok_or(StoreError::NotFound)?;
        if old.id() != 0 {
            table.by_id.remove(&old.id());
        }
        Ok(())
    }

    /// A point-in-time snapshot of every entity, ordered by identifier so
    /// that downstream iteration is deterministic.
    pub fn get_all(&self) -> Vec<T> {
        let table = self.inner.read();
        let mut all: Vec<T> = table.by_key.values().cloned().collect();
        all.sort_by_key(|e| e.identifier());
        all
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The five entity tables making up one gateway state.
#[derive(Debug, Default)]
pub struct ManbaState {
    pub servers: Collection<Server>,
    pub clusters: Collection<Cluster>,
    pub binds: Collection<Bind>,
    pub apis: Collection<Api>,
    pub routings: Collection<Routing>,
}

impl ManbaState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: u64, name: &str) -> Cluster {
        Cluster {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn add_and_get_by_name_or_id() {
        let state = ManbaState::new();
        state.clusters.add(cluster(7, "web")).unwrap();

        assert_eq!(state.clusters.get("web").unwrap().id, 7);
        assert_eq!(state.clusters.get("7").unwrap().name, "web");
        assert_eq!(state.clusters.get("nope"), Err(StoreError::NotFound));
    }

    #[test]
    fn add_rejects_duplicates() {
        let state = ManbaState::new();
        state.clusters.add(cluster(1, "web")).unwrap();
        assert_eq!(
            state.clusters.add(cluster(2, "web")),
            Err(StoreError::AlreadyExists)
        );
        assert_eq!(
            state.clusters.add(cluster(1, "other")),
            Err(StoreError::AlreadyExists)
        );
    }

    #[test]
    fn add_requires_an_identifier() {
        let state = ManbaState::new();
        assert_eq!(
            state.clusters.add(Cluster::default()),
            Err(StoreError::IdRequired)
        );
    }

    #[test]
    fn update_replaces_in_place() {
        let state = ManbaState::new();
        state.clusters.add(cluster(1, "web")).unwrap();

        let mut updated = cluster(1, "web");
        updated.load_balance = crate::model::LoadBalance::IpHash;
        state.clusters.update(updated.clone()).unwrap();

        assert_eq!(state.clusters.get("web").unwrap(), updated);
        assert_eq!(
            state.clusters.update(cluster(9, "ghost")),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn delete_by_either_index() {
        let state = ManbaState::new();
        state.clusters.add(cluster(1, "a")).unwrap();
        state.clusters.add(cluster(2, "b")).unwrap();

        state.clusters.delete("a").unwrap();
        state.clusters.delete("2").unwrap();
        assert!(state.clusters.is_empty());
        assert_eq!(state.clusters.delete("a"), Err(StoreError::NotFound));
    }

    #[test]
    fn get_all_is_sorted_and_cloned() {
        let state = ManbaState::new();
        state.clusters.add(cluster(2, "b")).unwrap();
        state.clusters.add(cluster(1, "a")).unwrap();

        let mut all = state.clusters.get_all();
        assert_eq!(
            all.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        // Mutating the snapshot must not touch the store.
        all[0].name = "mutated".to_string();
        assert!(state.clusters.get("a").is_ok());
    }

    #[test]
    fn bind_identifier_is_the_pair() {
        let state = ManbaState::new();
        let bind = Bind {
            cluster_id: 3,
            server_id: 9,
        };
        state.binds.add(bind.clone()).unwrap();
        assert_eq!(state.binds.get("3-9").unwrap(), bind);
    }
}
