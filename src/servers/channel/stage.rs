//! Stages (zones) and the world objects placed in them.
//!
//! Two lock levels: the registry lock guards the stage map itself, each
//! stage's own lock guards its objects. Object work on different stages
//! never contends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

/// Stages every channel starts with.
pub const SEEDED_STAGES: [&str; 7] = [
    "sl1Ns200p0a0u0", // Mezeporta
    "sl1Ns211p0a0u0", // Rasta bar
    "sl1Ns260p0a0u0", // Pallone Caravan
    "sl1Ns262p0a0u0", // Pallone guest house 1F
    "sl1Ns263p0a0u0", // Pallone guest house 2F
    "sl2Ns379p0a0u0", // Diva fountain
    "sl1Ns462p0a0u0", // MezFes
];

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage already exists: {0}")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub id: u32,
    pub owner_char_id: u32,
    pub position: Position,
}

#[derive(Debug)]
pub struct Stage {
    id: String,
    objects: RwLock<HashMap<u32, Object>>,
    next_object_id: AtomicU32,
}

impl Stage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: RwLock::new(HashMap::new()),
            next_object_id: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Place a new object owned by `owner_char_id`, minting an id unique
    /// within this stage.
    pub async fn add_object(&self, owner_char_id: u32, position: Position) -> Object {
        let mut objects = self.objects.write().await;
        let id = loop {
            let candidate = self.next_object_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if candidate != 0 && !objects.contains_key(&candidate) {
                break candidate;
            }
        };
        let obj = Object { id, owner_char_id, position };
        objects.insert(id, obj.clone());
        obj
    }

    /// Insert or replace an object by id. Returns the previous one.
    pub async fn insert_object(&self, obj: Object) -> Option<Object> {
        self.objects.write().await.insert(obj.id, obj)
    }

    pub async fn remove_object(&self, object_id: u32) -> Option<Object> {
        self.objects.write().await.remove(&object_id)
    }

    pub async fn get_object(&self, object_id: u32) -> Option<Object> {
        self.objects.read().await.get(&object_id).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    async fn find_by_owner(&self, char_id: u32) -> Option<Object> {
        let objects = self.objects.read().await;
        objects.values().find(|o| o.owner_char_id == char_id).cloned()
    }
}

#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: RwLock<HashMap<String, Arc<Stage>>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with [`SEEDED_STAGES`].
    pub fn seeded() -> Self {
        let stages = SEEDED_STAGES
            .iter()
            .map(|id| (id.to_string(), Arc::new(Stage::new(*id))))
            .collect();
        Self { stages: RwLock::new(stages) }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Stage>> {
        self.stages.read().await.get(id).cloned()
    }

    pub async fn insert(&self, stage: Stage) -> Result<Arc<Stage>, StageError> {
        let mut stages = self.stages.write().await;
        if stages.contains_key(stage.id()) {
            return Err(StageError::AlreadyExists(stage.id().to_string()));
        }
        let stage = Arc::new(stage);
        stages.insert(stage.id().to_string(), Arc::clone(&stage));
        Ok(stage)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Stage>> {
        self.stages.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.stages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stages.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.stages.read().await.keys().cloned().collect()
    }

    /// First object owned by `char_id` in any stage. Holds the registry read
    /// lock for the whole scan so no stage appears or vanishes mid-way.
    pub async fn find_object_by_char(&self, char_id: u32) -> Option<Object> {
        let stages = self.stages.read().await;
        for stage in stages.values() {
            if let Some(obj) = stage.find_by_owner(char_id).await {
                return Some(obj);
            }
        }
        None
    }
}
