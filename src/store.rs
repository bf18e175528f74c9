use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;

/// Persistence collaborator for users and memories: an in-memory state
/// guarded by an `RwLock`, snapshotted to a JSON file when a path is
/// configured. Uniqueness of `provider_user_id` is enforced here; the
/// register flow treats a conflict as "someone else won the race".
#[derive(Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    users: HashMap<Uuid, UserRecord>,
    users_by_provider_id: HashMap<i64, Uuid>,
    memories: HashMap<Uuid, MemoryRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    Persistence { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub provider_user_id: i64,
    pub login: String,
    pub name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content: String,
    pub cover_url: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub provider_user_id: i64,
    pub login: String,
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone)]
pub struct CreateMemoryInput {
    pub owner_id: Uuid,
    pub content: String,
    pub cover_url: String,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateMemoryInput {
    pub content: String,
    pub cover_url: String,
    pub is_public: bool,
}

impl Store {
    pub fn from_config(config: &Config) -> Self {
        let path = config.store_path.clone();
        let loaded = load_state(path.as_deref());
        Self {
            state: Arc::new(RwLock::new(loaded)),
            path,
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            path: None,
        }
    }

    pub async fn find_user_by_provider_id(&self, provider_user_id: i64) -> Option<UserRecord> {
        let state = self.state.read().await;
        let user_id = state.users_by_provider_id.get(&provider_user_id)?;
        state.users.get(user_id).cloned()
    }

    pub async fn create_user(&self, input: CreateUserInput) -> Result<UserRecord, StoreError> {
        let mut state = self.state.write().await;

        if state
            .users_by_provider_id
            .contains_key(&input.provider_user_id)
        {
            return Err(StoreError::Conflict {
                message: format!(
                    "user with provider id {} already exists",
                    input.provider_user_id
                ),
            });
        }

        let user = UserRecord {
            id: Uuid::new_v4(),
            provider_user_id: input.provider_user_id,
            login: input.login,
            name: input.name,
            avatar_url: input.avatar_url,
            created_at: Utc::now(),
        };

        state
            .users_by_provider_id
            .insert(user.provider_user_id, user.id);
        state.users.insert(user.id, user.clone());

        self.persist_state(&state).await?;
        Ok(user)
    }

    pub async fn find_memory(&self, id: Uuid) -> Option<MemoryRecord> {
        let state = self.state.read().await;
        state.memories.get(&id).cloned()
    }

    /// Returns the caller's own memories ordered by creation time,
    /// oldest first. Scoping by owner happens here, not as a post-hoc
    /// filter in the handler.
    pub async fn list_memories_by_owner(&self, owner_id: Uuid) -> Vec<MemoryRecord> {
        let state = self.state.read().await;
        let mut memories: Vec<MemoryRecord> = state
            .memories
            .values()
            .filter(|memory| memory.owner_id == owner_id)
            .cloned()
            .collect();
        memories.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        memories
    }

    pub async fn create_memory(&self, input: CreateMemoryInput) -> Result<MemoryRecord, StoreError> {
        let mut state = self.state.write().await;

        let memory = MemoryRecord {
            id: Uuid::new_v4(),
            owner_id: input.owner_id,
            content: input.content,
            cover_url: input.cover_url,
            is_public: input.is_public,
            created_at: Utc::now(),
        };
        state.memories.insert(memory.id, memory.clone());

        self.persist_state(&state).await?;
        Ok(memory)
    }

    pub async fn update_memory(
        &self,
        id: Uuid,
        input: UpdateMemoryInput,
    ) -> Result<MemoryRecord, StoreError> {
        let mut state = self.state.write().await;

        let memory = state.memories.get_mut(&id).ok_or(StoreError::NotFound)?;
        memory.content = input.content;
        memory.cover_url = input.cover_url;
        memory.is_public = input.is_public;
        let updated = memory.clone();

        self.persist_state(&state).await?;
        Ok(updated)
    }

    pub async fn delete_memory(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if state.memories.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }

        self.persist_state(&state).await?;
        Ok(())
    }

    async fn persist_state(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::Persistence {
                    message: format!("failed to prepare store directory: {error}"),
                })?;
        }

        let payload = serde_json::to_vec(state).map_err(|error| StoreError::Persistence {
            message: format!("failed to encode store payload: {error}"),
        })?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| StoreError::Persistence {
                message: format!("failed to write store payload: {error}"),
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|error| StoreError::Persistence {
                message: format!("failed to finalize store payload: {error}"),
            })?;

        Ok(())
    }
}

fn load_state(path: Option<&std::path::Path>) -> StoreState {
    let Some(path) = path else {
        return StoreState::default();
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return StoreState::default();
        }
        Err(error) => {
            tracing::warn!(
                target: "memoria.store",
                path = %path.display(),
                error = %error,
                "failed to read store file; booting with empty state",
            );
            return StoreState::default();
        }
    };

    match serde_json::from_str::<StoreState>(&raw) {
        Ok(state) => state,
        Err(error) => {
            tracing::warn!(
                target: "memoria.store",
                path = %path.display(),
                error = %error,
                "failed to parse store file; booting with empty state",
            );
            StoreState::default()
        }
    }
}
