//! Device-local persistence: a small SQLite kv table holding the device
//! identity, the resumable session keys and the serialized app settings.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::CueResult;
use crate::model::new_device_id;

pub const USER_ID_KEY: &str = "bandcue_user_id";
pub const SESSION_ID_KEY: &str = "bandcue_session_id";
pub const ROLE_KEY: &str = "bandcue_role";
pub const APP_SETTINGS_KEY: &str = "appSettings";

#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub async fn open(url: &str) -> CueResult<Self> {
        // one connection: writes are tiny and serialized, and `:memory:`
        // databases are per-connection
        let pool: SqlitePool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> CueResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str) -> CueResult<()> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> CueResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the persisted device id, creating and storing one on first use.
    pub async fn ensure_device_id(&self) -> CueResult<String> {
        if let Some(id) = self.get(USER_ID_KEY).await? {
            return Ok(id);
        }
        let id = new_device_id();
        self.set(USER_ID_KEY, &id).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mem() -> LocalStore {
        LocalStore::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn kv_roundtrip() {
        let store = mem().await;
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn device_id_is_stable() {
        let store = mem().await;
        let a = store.ensure_device_id().await.unwrap();
        let b = store.ensure_device_id().await.unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
