//! Source configuration store
//!
//! The external collaborator that owns source records. The session engine
//! only ever reads from it; create/update/delete belongs to whatever
//! administrative layer embeds the relay. [`MemoryConfigStore`] is the
//! in-process implementation used by the server and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Logical identifier for one upstream video origin
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId(String);

impl SourceId {
    /// Create a new source id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One configured upstream source
///
/// Immutable for the lifetime of a session: the session captures a copy at
/// start time and never observes later edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Logical identifier
    pub id: SourceId,
    /// Human-readable display name
    pub name: String,
    /// Pull URL of the upstream stream (e.g. `rtsp://...`)
    pub uri: String,
    /// Whether the source may be streamed
    pub active: bool,
}

impl SourceDescriptor {
    /// Create a new active descriptor
    pub fn new(id: impl Into<SourceId>, name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            uri: uri.into(),
            active: true,
        }
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Read access to source configuration
///
/// The sole source of truth for `uri` and `active`; the session engine never
/// mutates it.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Look up a source descriptor by id
    async fn get(&self, id: &SourceId) -> Option<SourceDescriptor>;
}

/// In-memory configuration store
#[derive(Default)]
pub struct MemoryConfigStore {
    sources: RwLock<HashMap<SourceId, SourceDescriptor>>,
}

impl MemoryConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a source record
    pub async fn insert(&self, descriptor: SourceDescriptor) {
        let mut sources = self.sources.write().await;
        sources.insert(descriptor.id.clone(), descriptor);
    }

    /// Remove a source record, returning it if present
    pub async fn remove(&self, id: &SourceId) -> Option<SourceDescriptor> {
        self.sources.write().await.remove(id)
    }

    /// Flip a source's active flag, returning the new value if the record exists
    pub async fn set_active(&self, id: &SourceId, active: bool) -> Option<bool> {
        let mut sources = self.sources.write().await;
        let descriptor = sources.get_mut(id)?;
        descriptor.active = active;
        Some(descriptor.active)
    }

    /// Snapshot of all source records
    pub async fn list(&self) -> Vec<SourceDescriptor> {
        self.sources.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, id: &SourceId) -> Option<SourceDescriptor> {
        self.sources.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryConfigStore::new();
        let id = SourceId::new("cam1");

        store
            .insert(SourceDescriptor::new("cam1", "Front door", "rtsp://10.0.0.2/stream"))
            .await;

        let descriptor = store.get(&id).await.unwrap();
        assert_eq!(descriptor.name, "Front door");
        assert!(descriptor.active);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryConfigStore::new();

        assert!(store.get(&SourceId::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_set_active() {
        let store = MemoryConfigStore::new();
        let id = SourceId::new("cam1");
        store
            .insert(SourceDescriptor::new("cam1", "Front door", "rtsp://10.0.0.2/stream"))
            .await;

        assert_eq!(store.set_active(&id, false).await, Some(false));
        assert!(!store.get(&id).await.unwrap().active);

        assert_eq!(store.set_active(&SourceId::new("nope"), true).await, None);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryConfigStore::new();
        let id = SourceId::new("cam1");
        store
            .insert(SourceDescriptor::new("cam1", "Front door", "rtsp://10.0.0.2/stream"))
            .await;

        assert!(store.remove(&id).await.is_some());
        assert!(store.get(&id).await.is_none());
        assert!(store.list().await.is_empty());
    }
}
