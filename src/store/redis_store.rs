//! Redis-backed attempt store.
//!
//! Each [`Batch`] becomes one `MULTI ... EXEC` pipeline on a shared
//! [`ConnectionManager`], so Redis applies the commands for a key without
//! interleaving another client's batch:
//!
//! | command            | Redis                                  |
//! |--------------------|----------------------------------------|
//! | `PruneOlderThan`   | `ZREMRANGEBYSCORE key -inf <max>`      |
//! | `RangeAll`         | `ZRANGE key 0 -1`                      |
//! | `AddScored`        | `ZADD key <score> <member>`            |
//! | `SetExpiry`        | `PEXPIRE key <ms>`                     |
//!
//! A failed transaction surfaces as [`StoreError::Redis`]; nothing is retried.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, Value};
use tracing::{debug, info};

use super::{AttemptStore, Batch, CommandReply, StoreError, WindowCommand};

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone, Default)]
pub struct RedisStoreConfig {
    /// Prepended to every identifier to form the Redis key (default: none)
    pub key_prefix: String,
}

/// Attempt store shared by every process pointing at the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with the default configuration.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(key_prefix = %config.key_prefix, "Connected to Redis attempt store");

        Ok(Self { connection, config })
    }

    /// Round-trip a `PING` to check the store is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "Redis ping");
        Ok(())
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.config.key_prefix, identifier)
    }
}

/// `PEXPIRE` argument; a zero TTL would delete the key outright.
fn expiry_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// Translate `batch` into one `MULTI ... EXEC` pipeline against `key`.
fn pipeline(key: &str, batch: &Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in batch.commands() {
        match command {
            WindowCommand::PruneOlderThan { max_score } => {
                pipe.zrembyscore(key, "-inf", *max_score);
            }
            WindowCommand::RangeAll => {
                pipe.zrange(key, 0, -1);
            }
            WindowCommand::AddScored { score, member } => {
                pipe.zadd(key, member, *score);
            }
            WindowCommand::SetExpiry { ttl } => {
                pipe.pexpire(key, expiry_millis(*ttl));
            }
        }
    }
    pipe
}

fn decode<T: FromRedisValue>(command: &WindowCommand, value: &Value) -> Result<T, StoreError> {
    redis::from_redis_value(value).map_err(|e| StoreError::UnexpectedReply {
        command: command.name(),
        detail: e.to_string(),
    })
}

#[async_trait]
impl AttemptStore for RedisStore {
    async fn execute(&self, batch: &Batch) -> Result<Vec<CommandReply>, StoreError> {
        let pipe = pipeline(&self.key(batch.key()), batch);

        let mut conn = self.connection.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;

        if values.len() != batch.commands().len() {
            return Err(StoreError::UnexpectedReply {
                command: "exec",
                detail: format!(
                    "expected {} replies, got {}",
                    batch.commands().len(),
                    values.len()
                ),
            });
        }

        batch
            .commands()
            .iter()
            .zip(values.iter())
            .map(|(command, value)| {
                Ok(match command {
                    WindowCommand::PruneOlderThan { .. } => {
                        CommandReply::Pruned(decode(command, value)?)
                    }
                    WindowCommand::RangeAll => CommandReply::Members(decode(command, value)?),
                    WindowCommand::AddScored { .. } => CommandReply::Added(decode(command, value)?),
                    WindowCommand::SetExpiry { .. } => {
                        CommandReply::ExpirySet(decode(command, value)?)
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_millis_clamps_to_one() {
        assert_eq!(expiry_millis(Duration::ZERO), 1);
        assert_eq!(expiry_millis(Duration::from_micros(500)), 1);
        assert_eq!(expiry_millis(Duration::from_secs(2)), 2000);
    }

    fn packed(args: &[&str]) -> Vec<u8> {
        let mut cmd = redis::cmd(args[0]);
        for arg in &args[1..] {
            cmd.arg(*arg);
        }
        cmd.get_packed_command()
    }

    #[test]
    fn test_pipeline_wraps_window_commands_in_transaction() {
        let batch = Batch::new("8.8.8.8:/")
            .prune_older_than(1_000)
            .range_all()
            .add_scored(2_000, "2000-a")
            .set_expiry(Duration::from_millis(1500));

        let expected: Vec<u8> = [
            packed(&["MULTI"]),
            packed(&["ZREMRANGEBYSCORE", "gate:8.8.8.8:/", "-inf", "1000"]),
            packed(&["ZRANGE", "gate:8.8.8.8:/", "0", "-1"]),
            packed(&["ZADD", "gate:8.8.8.8:/", "2000", "2000-a"]),
            packed(&["PEXPIRE", "gate:8.8.8.8:/", "1500"]),
            packed(&["EXEC"]),
        ]
        .concat();

        let pipe = pipeline("gate:8.8.8.8:/", &batch);
        assert_eq!(
            String::from_utf8_lossy(&pipe.get_packed_pipeline()),
            String::from_utf8_lossy(&expected)
        );
    }

    #[test]
    fn test_pipeline_clamps_zero_expiry() {
        let batch = Batch::new("k").set_expiry(Duration::ZERO);
        let packed_pipe = pipeline("k", &batch).get_packed_pipeline();
        let expected = packed(&["PEXPIRE", "k", "1"]);

        assert!(packed_pipe
            .windows(expected.len())
            .any(|window| window == expected.as_slice()));
    }

    #[test]
    fn test_decode_members() {
        let value = Value::Array(vec![
            Value::BulkString(b"1".to_vec()),
            Value::BulkString(b"2".to_vec()),
        ]);
        let members: Vec<String> = decode(&WindowCommand::RangeAll, &value).unwrap();
        assert_eq!(members, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_decode_mismatch_is_unexpected_reply() {
        let value = Value::BulkString(b"not-a-number".to_vec());
        let err = decode::<u64>(&WindowCommand::PruneOlderThan { max_score: 0 }, &value)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedReply {
                command: "prune_older_than",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_expiry_flag() {
        let set: bool = decode(&WindowCommand::SetExpiry { ttl: Duration::ZERO }, &Value::Int(1))
            .unwrap();
        assert!(set);
    }
}
