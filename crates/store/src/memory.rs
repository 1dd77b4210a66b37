//! In-memory store, used by tests and as the routing-index reference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_channel::Channel;
use conduit_crypto::SecretKey;
use conduit_primitives::Destination;
use conduit_protocols::{Objective, ObjectiveId, VoucherInfo, WaitingFor};
use tokio::sync::RwLock;

use crate::{now_secs, ProgressRecord, Store, StoreError};

/// A [`Store`] backed by in-process maps. Contents die with the process.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    objectives: Arc<RwLock<HashMap<ObjectiveId, Objective>>>,
    channels: Arc<RwLock<HashMap<Destination, Channel>>>,
    vouchers: Arc<RwLock<HashMap<Destination, VoucherInfo>>>,
    progress: Arc<RwLock<HashMap<ObjectiveId, ProgressRecord>>>,
    secret_key: Arc<RwLock<Option<SecretKey>>>,
}

impl MemStore {
    /// An empty store holding `secret_key`.
    pub fn new(secret_key: SecretKey) -> Self {
        MemStore {
            secret_key: Arc::new(RwLock::new(Some(secret_key))),
            ..MemStore::default()
        }
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_objective(&self, id: &ObjectiveId) -> Result<Option<Objective>, StoreError> {
        Ok(self.objectives.read().await.get(id).cloned())
    }

    async fn set_objective(&self, objective: &Objective) -> Result<(), StoreError> {
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
        Ok(self.channels.read().await.get(channel_id).cloned())
    }

    async fn set_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        self.channels
            .write()
            .await
            .insert(channel.id(), channel.clone());
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let mut all: Vec<Channel> = self.channels.read().await.values().cloned().collect();
        all.sort_by_key(Channel::id);
        Ok(all)
    }

    async fn get_voucher_info(
        &self,
        channel_id: &Destination,
    ) -> Result<VoucherInfo, StoreError> {
        Ok(self
            .vouchers
            .read()
            .await
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_voucher_info(
        &self,
        channel_id: &Destination,
        info: &VoucherInfo,
    ) -> Result<(), StoreError> {
        self.vouchers
            .write()
            .await
            .insert(*channel_id, info.clone());
        Ok(())
    }

    async fn get_channel_secret_key(&self) -> Result<SecretKey, StoreError> {
        (*self.secret_key.read().await).ok_or(StoreError::MissingSecretKey)
    }

    async fn set_channel_secret_key(&self, secret_key: &SecretKey) -> Result<(), StoreError> {
        *self.secret_key.write().await = Some(*secret_key);
        Ok(())
    }

    async fn progress_last_made_at(
        &self,
        id: &ObjectiveId,
        waiting_for: WaitingFor,
    ) -> Result<(), StoreError> {
        self.progress.write().await.insert(
            *id,
            ProgressRecord {
                waiting_for,
                updated_at_secs: now_secs(),
            },
        );
        Ok(())
    }

    async fn get_progress(&self, id: &ObjectiveId) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.progress.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use conduit_crypto::address_from_secret_key;
    use conduit_state::{Allocation, Exit, State};

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let me = address_from_secret_key(&sk);
        let peer = Address::repeat_byte(0x02);
        let store = MemStore::new(sk);

        let prefund = State {
            chain_id: 1337,
            participants: vec![me, peer],
            channel_nonce: 3,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Bytes::new(),
            outcome: Exit::single_asset(
                Address::ZERO,
                vec![Allocation::simple(Destination::from(me), U256::from(1))],
            ),
            turn_num: 0,
            is_final: false,
        };

        let created = store
            .get_or_create_channel(prefund.clone(), 0)
            .await
            .unwrap();
        assert_eq!(created.id(), prefund.channel_id());

        // a second call returns the stored channel, not a fresh one
        let mut stored = created.clone();
        stored
            .update_holdings(&conduit_primitives::Funds::single(
                Address::ZERO,
                U256::from(9),
            ))
            .unwrap();
        store.set_channel(&stored).await.unwrap();
        let again = store.get_or_create_channel(prefund, 0).await.unwrap();
        assert_eq!(again, stored);
    }
}
