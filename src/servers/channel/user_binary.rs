use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;

/// Per-character binary blobs (profile, guild card, ...) keyed by slot index.
#[derive(Debug, Default)]
pub struct UserBinaryStore {
    parts: RwLock<HashMap<(u32, u8), Bytes>>,
}

impl UserBinaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, char_id: u32, index: u8) -> Option<Bytes> {
        self.parts.read().await.get(&(char_id, index)).cloned()
    }

    pub async fn set(&self, char_id: u32, index: u8, data: Bytes) {
        self.parts.write().await.insert((char_id, index), data);
    }

    /// Forget every part belonging to `char_id`.
    pub async fn remove_char(&self, char_id: u32) {
        self.parts.write().await.retain(|(owner, _), _| *owner != char_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = UserBinaryStore::new();
        store.set(1, 1, Bytes::from_static(b"name")).await;
        store.set(1, 3, Bytes::from_static(b"card")).await;
        store.set(2, 1, Bytes::from_static(b"other")).await;

        assert_eq!(store.get(1, 3).await.unwrap(), Bytes::from_static(b"card"));
        assert!(store.get(1, 2).await.is_none());

        store.remove_char(1).await;
        assert!(store.get(1, 1).await.is_none());
        assert!(store.get(2, 1).await.is_some());
    }
}
