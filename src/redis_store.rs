// src/redis_store.rs
use crate::{
    AtomicStore, ListKey, Priority, Result, StageKey, TierqError, lua::LuaScripts,
};
use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use tokio::sync::RwLock;
use tracing::debug;

/// Redis-backed store. Moves run as Lua scripts so Redis executes each one
/// serially with respect to every other client.
pub struct RedisStore {
    connection: RwLock<Option<MultiplexedConnection>>,
    scripts: LuaScripts,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = RedisClient::open(redis_url)?;
        Self::from_client(client).await
    }

    pub async fn from_client(client: RedisClient) -> Result<Self> {
        let connection = client.get_multiplexed_async_connection().await?;
        debug!("Connected to Redis");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            scripts: LuaScripts::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(TierqError::Closed)
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn push(&self, list: &ListKey, value: &str) -> Result<u64> {
        let mut con = self.connection().await?;
        let len: u64 = con.lpush(list.to_string(), value).await?;
        Ok(len)
    }

    async fn pop_move(
        &self,
        source: &StageKey,
        destination: &StageKey,
        tiers: &[Priority],
    ) -> Result<Option<(Priority, String)>> {
        let mut con = self.connection().await?;

        let mut invocation = self.scripts.pop_move.prepare_invoke();
        for tier in tiers {
            invocation
                .key(source.tier(*tier).to_string())
                .key(destination.tier(*tier).to_string())
                .arg(tier.as_str());
        }

        let moved: Option<(String, String)> = invocation.invoke_async(&mut con).await?;

        match moved {
            Some((tier, value)) => {
                let tier = tier.parse::<Priority>().map_err(|_| {
                    TierqError::Store(format!("pop_move returned unknown tier '{}'", tier))
                })?;
                Ok(Some((tier, value)))
            }
            None => Ok(None),
        }
    }

    async fn remove_move(
        &self,
        source: &ListKey,
        destination: &ListKey,
        value: &str,
        replacement: &str,
    ) -> Result<u64> {
        let mut con = self.connection().await?;

        let moved: u64 = self
            .scripts
            .remove_move
            .key(source.to_string())
            .key(destination.to_string())
            .arg(value)
            .arg(replacement)
            .invoke_async(&mut con)
            .await?;

        Ok(moved)
    }

    async fn length(&self, stage: &StageKey, tiers: &[Priority]) -> Result<Vec<(Priority, u64)>> {
        let mut con = self.connection().await?;

        let mut invocation = self.scripts.length.prepare_invoke();
        for tier in tiers {
            invocation.key(stage.tier(*tier).to_string()).arg(tier.as_str());
        }

        // flat reply: tier, count, tier, count, ...
        let pairs: Vec<(String, u64)> = invocation.invoke_async(&mut con).await?;

        pairs
            .into_iter()
            .map(|(tier, count)| {
                let tier = tier.parse::<Priority>().map_err(|_| {
                    TierqError::Store(format!("length returned unknown tier '{}'", tier))
                })?;
                Ok((tier, count))
            })
            .collect()
    }

    async fn close(&self) -> Result<()> {
        self.connection.write().await.take();
        debug!("Released Redis connection");
        Ok(())
    }
}
