//! Durable store on an ordered key-value table.
//!
//! Values are compact binary (bincode). Objectives are additionally mirrored
//! in an in-process cache so channel-to-objective routing does not scan the
//! database on every ingest; the cache is rebuilt from disk on open, and
//! every write goes through to disk before the call returns.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_channel::Channel;
use conduit_crypto::SecretKey;
use conduit_primitives::Destination;
use conduit_protocols::{Objective, ObjectiveId, VoucherInfo, WaitingFor};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    channel_key, now_secs, objective_key, progress_key, voucher_key, ProgressRecord, Store,
    StoreError, CHANNEL_PREFIX, OBJECTIVE_PREFIX, SECRET_KEY_KEY,
};

/// A [`Store`] persisted in a sqlite-backed ordered KV table.
#[derive(Debug, Clone)]
pub struct DurableStore {
    pool: Pool<Sqlite>,
    /// Objectives mirrored for routing lookups. Disk is authoritative.
    objectives: Arc<RwLock<HashMap<ObjectiveId, Objective>>>,
}

impl DurableStore {
    /// Opens (or creates) the store at `path` and rebuilds the routing
    /// cache from disk.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        let store = DurableStore {
            pool,
            objectives: Arc::new(RwLock::new(HashMap::new())),
        };
        store.rebuild_cache().await?;
        Ok(store)
    }

    async fn rebuild_cache(&self) -> Result<(), StoreError> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key LIKE ? ORDER BY key")
            .bind(format!("{OBJECTIVE_PREFIX}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        let mut cache = self.objectives.write().await;
        for row in rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
            let value: Vec<u8> = row
                .try_get("value")
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
            let objective: Objective = decode(&key, &value)?;
            cache.insert(objective.id(), objective);
        }
        debug!(objectives = cache.len(), "rebuilt objective routing cache");
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        row.map(|r| {
            r.try_get::<Vec<u8>, _>("value")
                .map_err(|e| StoreError::Persistence(e.to_string()))
        })
        .transpose()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Persistence(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Store for DurableStore {
    async fn get_objective(&self, id: &ObjectiveId) -> Result<Option<Objective>, StoreError> {
        if let Some(cached) = self.objectives.read().await.get(id) {
            return Ok(Some(cached.clone()));
        }
        let key = objective_key(id);
        self.get(&key)
            .await?
            .map(|bytes| decode(&key, &bytes))
            .transpose()
    }

    async fn set_objective(&self, objective: &Objective) -> Result<(), StoreError> {
        let key = objective_key(&objective.id());
        self.put(&key, encode(objective)?).await?;
        self.objectives
            .write()
            .await
            .insert(objective.id(), objective.clone());
        Ok(())
    }

    async fn get_objective_by_channel(
        &self,
        channel_id: &Destination,
    ) -> Result<Option<Objective>, StoreError> {
        Ok(self
            .objectives
            .read()
            .await
            .values()
            .find(|o| !o.is_terminal() && o.owns(channel_id))
            .cloned())
    }

    async fn objectives_by_channel(
        &self,
        channel_id: &Destination,
    ) -> Result<Vec<Objective>, StoreError> {
        let mut found: Vec<Objective> = self
            .objectives
            .read()
            .await
            .values()
            .filter(|o| !o.is_terminal() && o.related_channels().contains(channel_id))
            .cloned()
            .collect();
        found.sort_by_key(|o| o.id());
        Ok(found)
    }

    async fn list_objectives(&self) -> Result<Vec<Objective>, StoreError> {
        let mut all: Vec<Objective> = self.objectives.read().await.values().cloned().collect();
        all.sort_by_key(|o| o.id());
        Ok(all)
    }

    async fn get_channel(&self, channel_id: &Destination) -> Result<Option<Channel>, StoreError> {
        let key = channel_key(channel_id);
        self.get(&key)
            .await?
            .map(|bytes| decode(&key, &bytes))
            .transpose()
    }

    async fn set_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let key = channel_key(&channel.id());
        self.put(&key, encode(channel)?).await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key LIKE ? ORDER BY key")
            .bind(format!("{CHANNEL_PREFIX}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        let mut channels = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
            let value: Vec<u8> = row
                .try_get("value")
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
            channels.push(decode(&key, &value)?);
        }
        Ok(channels)
    }

    async fn get_voucher_info(
        &self,
        channel_id: &Destination,
    ) -> Result<VoucherInfo, StoreError> {
        let key = voucher_key(channel_id);
        Ok(self
            .get(&key)
            .await?
            .map(|bytes| decode(&key, &bytes))
            .transpose()?
            .unwrap_or_default())
    }

    async fn set_voucher_info(
        &self,
        channel_id: &Destination,
        info: &VoucherInfo,
    ) -> Result<(), StoreError> {
        let key = voucher_key(channel_id);
        self.put(&key, encode(info)?).await
    }

    async fn get_channel_secret_key(&self) -> Result<SecretKey, StoreError> {
        let bytes = self
            .get(SECRET_KEY_KEY)
            .await?
            .ok_or(StoreError::MissingSecretKey)?;
        SecretKey::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: SECRET_KEY_KEY.to_string(),
            reason: e.to_string(),
        })
    }

    async fn set_channel_secret_key(&self, secret_key: &SecretKey) -> Result<(), StoreError> {
        self.put(SECRET_KEY_KEY, secret_key.secret_bytes().to_vec())
            .await
    }

    async fn progress_last_made_at(
        &self,
        id: &ObjectiveId,
        waiting_for: WaitingFor,
    ) -> Result<(), StoreError> {
        let record = ProgressRecord {
            waiting_for,
            updated_at_secs: now_secs(),
        };
        let key = progress_key(id);
        self.put(&key, encode(&record)?).await
    }

    async fn get_progress(&self, id: &ObjectiveId) -> Result<Option<ProgressRecord>, StoreError> {
        let key = progress_key(id);
        self.get(&key)
            .await?
            .map(|bytes| decode(&key, &bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use conduit_crypto::address_from_secret_key;
    use conduit_protocols::DirectFund;
    use conduit_state::{Allocation, Exit, State};

    fn sample_objective(nonce: u64) -> (Objective, SecretKey) {
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let me = address_from_secret_key(&sk);
        let peer = Address::repeat_byte(0x02);
        let prefund = State {
            chain_id: 1337,
            participants: vec![me, peer],
            channel_nonce: nonce,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Bytes::new(),
            outcome: Exit::single_asset(
                Address::ZERO,
                vec![
                    Allocation::simple(Destination::from(me), U256::from(100)),
                    Allocation::simple(Destination::from(peer), U256::from(100)),
                ],
            ),
            turn_num: 0,
            is_final: false,
        };
        let df = DirectFund::from_prefund(prefund, me).unwrap();
        (
            Objective::DirectFund(df).approve().unwrap(),
            sk,
        )
    }

    #[tokio::test]
    async fn objectives_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let (objective, sk) = sample_objective(1);
        {
            let store = DurableStore::open(&path).await.unwrap();
            store.set_channel_secret_key(&sk).await.unwrap();
            store.set_objective(&objective).await.unwrap();
        }

        let reopened = DurableStore::open(&path).await.unwrap();
        let loaded = reopened
            .get_objective(&objective.id())
            .await
            .unwrap()
            .expect("objective persisted");
        assert_eq!(loaded, objective);
        assert_eq!(reopened.get_channel_secret_key().await.unwrap(), sk);

        // routing works off the rebuilt cache
        let cid = objective.id().channel_id;
        let owner = reopened.get_objective_by_channel(&cid).await.unwrap();
        assert_eq!(owner.map(|o| o.id()), Some(objective.id()));
    }

    #[tokio::test]
    async fn voucher_info_and_progress_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = DurableStore::open(&path).await.unwrap();

        let (objective, _) = sample_objective(2);
        let cid = objective.id().channel_id;

        assert_eq!(
            store.get_voucher_info(&cid).await.unwrap(),
            VoucherInfo::default()
        );
        let info = VoucherInfo {
            largest_sent: U256::from(5),
            largest_received: U256::from(3),
        };
        store.set_voucher_info(&cid, &info).await.unwrap();
        assert_eq!(store.get_voucher_info(&cid).await.unwrap(), info);

        store
            .progress_last_made_at(&objective.id(), WaitingFor::Deposit)
            .await
            .unwrap();
        let progress = store.get_progress(&objective.id()).await.unwrap().unwrap();
        assert_eq!(progress.waiting_for, WaitingFor::Deposit);
    }

    #[tokio::test]
    async fn missing_secret_key_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::open(&dir.path().join("store.db")).await.unwrap();
        assert!(matches!(
            store.get_channel_secret_key().await,
            Err(StoreError::MissingSecretKey)
        ));
    }
}
