use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TitleSearch(String),
    TitleMatch { title: String, year: Option<i32> },
    Trailer { title: String, year: Option<i32> },
}

fn year_part(year: &Option<i32>) -> String {
    year.map(|y| y.to_string()).unwrap_or_else(|| "any".to_string())
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TitleSearch(query) => write!(f, "search:{}", query.trim().to_lowercase()),
            CacheKey::TitleMatch { title, year } => {
                write!(f, "match:{}:{}", year_part(year), title.trim().to_lowercase())
            }
            CacheKey::Trailer { title, year } => {
                write!(f, "trailer:{}:{}", year_part(year), title.trim().to_lowercase())
            }
        }
    }
}

/// Opens a Redis client; connections are multiplexed per operation
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Read-through cache for catalog and trailer lookups
///
/// Reads are awaited. Writes are handed to a background task so a slow Redis
/// never delays a response.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Stops the background writer after it drains queued writes
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::writer_task(client, write_rx, shutdown_rx).await;
        });

        (
            Self {
                redis_client,
                write_tx,
            },
            CacheWriterHandle { shutdown_tx },
        )
    }

    async fn writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    let key = msg.key.clone();
                    if let Err(e) = Self::write(&client, msg).await {
                        tracing::error!(error = %e, key = %key, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }

    /// Looks up and deserializes a cached value; `None` on a miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;

        cached
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })
            })
            .transpose()
    }

    /// Queues a write without waiting for Redis
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let value = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: key.to_string(),
            value,
            ttl,
        };

        if self.write_tx.send(msg).is_err() {
            tracing::warn!(key = %key, "Cache writer is gone, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_title_search_is_normalized() {
        let key = CacheKey::TitleSearch("  THE Matrix ".to_string());
        assert_eq!(key.to_string(), "search:the matrix");
    }

    #[test]
    fn test_cache_key_title_match() {
        let key = CacheKey::TitleMatch {
            title: "Heat".to_string(),
            year: Some(1995),
        };
        assert_eq!(key.to_string(), "match:1995:heat");

        let key = CacheKey::TitleMatch {
            title: "Heat".to_string(),
            year: None,
        };
        assert_eq!(key.to_string(), "match:any:heat");
    }

    #[test]
    fn test_cache_key_trailer() {
        let key = CacheKey::Trailer {
            title: "Arrival".to_string(),
            year: Some(2016),
        };
        assert_eq!(key.to_string(), "trailer:2016:arrival");
    }

    #[test]
    fn test_match_and_trailer_keys_differ() {
        let matched = CacheKey::TitleMatch {
            title: "Heat".to_string(),
            year: Some(1995),
        };
        let trailer = CacheKey::Trailer {
            title: "Heat".to_string(),
            year: Some(1995),
        };
        assert_ne!(matched.to_string(), trailer.to_string());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_set_in_background_round_trip() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = create_redis_client(&redis_url).unwrap();
        let (cache, handle) = Cache::new(client.clone());

        let key = CacheKey::TitleSearch("cinematch_background_write".to_string());
        let value = vec!["a".to_string(), "b".to_string()];
        cache.set_in_background(&key, &value, 60);
        handle.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let retrieved: Option<Vec<String>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved, Some(value));

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(key.to_string()).await.unwrap();
    }
}
