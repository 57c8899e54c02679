//! Redis Streams broker.
//!
//! One stream per topic, entries carry `key` and `payload` fields. Consumer
//! groups hold the per-service offset; entries are acknowledged with XACK
//! after handling. A restarted consumer first re-reads its own pending
//! (delivered but unacknowledged) entries, then switches to new ones.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use trellis_core::broker::{Broker, Delivery, Subscription};
use trellis_core::config::DEFAULT_STREAM_MAXLEN;
use trellis_core::{Envelope, TrellisError, TrellisResult};

use crate::client::{RedisPool, RedisResult};
use crate::keys;

const READ_BATCH: usize = 64;
const READ_BLOCK: Duration = Duration::from_secs(5);

fn broker_err(e: redis::RedisError) -> TrellisError {
    TrellisError::broker(e.to_string())
}

fn is_busy_group(e: &redis::RedisError) -> bool {
    e.code() == Some("BUSYGROUP")
}

/// Create `group` on `topic`'s stream, creating the stream if needed.
/// Returns false if the group already existed.
pub(crate) async fn ensure_group(pool: &RedisPool, topic: &str, group: &str) -> RedisResult<bool> {
    let mut conn = pool.clone();
    match conn
        .xgroup_create_mkstream::<_, _, _, ()>(keys::stream(topic), group, "0")
        .await
    {
        Ok(()) => Ok(true),
        Err(e) if is_busy_group(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// XREADGROUP start id: `0` re-reads this consumer's pending entries,
/// `>` reads entries never delivered to the group.
fn read_start(replaying: bool) -> &'static str {
    if replaying {
        "0"
    } else {
        ">"
    }
}

/// Decode one stream entry into an envelope for `topic`.
pub(crate) fn parse_entry(topic: &str, entry: &StreamId) -> TrellisResult<Envelope> {
    let key: String = entry
        .get("key")
        .ok_or_else(|| TrellisError::InvalidEnvelope(format!("entry {} has no key", entry.id)))?;
    let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
    Envelope::new(topic, key, payload)
}

#[derive(Clone)]
pub struct RedisStreamBroker {
    client: redis::Client,
    pool: RedisPool,
    maxlen: usize,
}

impl RedisStreamBroker {
    pub async fn connect(redis_url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let pool = RedisPool::new(client.clone()).await?;
        info!(url = %redis_url, "Connected to Redis broker");
        Ok(Self {
            client,
            pool,
            maxlen: DEFAULT_STREAM_MAXLEN,
        })
    }

    /// Trim each stream to roughly `maxlen` entries on append.
    pub fn with_maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen;
        self
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }
}

#[async_trait]
impl Broker for RedisStreamBroker {
    async fn publish(&self, envelope: &Envelope) -> TrellisResult<String> {
        let mut conn = self.pool.clone();
        let fields: [(&str, &[u8]); 2] = [
            ("key", envelope.key().as_bytes()),
            ("payload", envelope.payload()),
        ];
        let id: String = conn
            .xadd_maxlen(
                keys::stream(envelope.topic()),
                StreamMaxlen::Approx(self.maxlen),
                "*",
                &fields,
            )
            .await
            .map_err(broker_err)?;
        debug!(topic = %envelope.topic(), key = %envelope.key(), id = %id, "Envelope appended");
        Ok(id)
    }

    async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
    ) -> TrellisResult<Box<dyn Subscription>> {
        if topics.is_empty() {
            return Err(TrellisError::broker("subscription needs at least one topic"));
        }
        for topic in topics {
            if ensure_group(&self.pool, topic, group).await? {
                info!(topic = %topic, group = %group, "Consumer group created");
            }
        }

        // Blocking reads get their own connection so they never stall publishes.
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(broker_err)?;

        Ok(Box::new(RedisStreamSubscription {
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
            streams: topics.iter().map(|t| keys::stream(t)).collect(),
            buffer: VecDeque::new(),
            replaying: true,
        }))
    }
}

pub struct RedisStreamSubscription {
    conn: MultiplexedConnection,
    group: String,
    consumer: String,
    streams: Vec<String>,
    buffer: VecDeque<Delivery>,
    /// Still re-reading entries delivered to this consumer before a restart.
    replaying: bool,
}

impl RedisStreamSubscription {
    async fn read_batch(&mut self) -> TrellisResult<()> {
        let start = read_start(self.replaying);
        let ids = vec![start; self.streams.len()];
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_BATCH);
        if !self.replaying {
            opts = opts.block(READ_BLOCK.as_millis() as usize);
        }

        let reply: StreamReadReply = self
            .conn
            .xread_options(self.streams.as_slice(), ids.as_slice(), &opts)
            .await
            .map_err(broker_err)?;

        let mut seen = 0usize;
        for stream in reply.keys {
            let Some(topic) = keys::topic_of(&stream.key) else {
                continue;
            };
            for entry in stream.ids {
                seen += 1;
                match parse_entry(topic, &entry) {
                    Ok(envelope) => self.buffer.push_back(Delivery {
                        envelope,
                        offset: entry.id,
                    }),
                    Err(e) => {
                        // Trimmed or foreign entries can never be handled.
                        warn!(stream = %stream.key, id = %entry.id, error = %e, "Skipping unreadable stream entry");
                        self.conn
                            .xack::<_, _, _, ()>(&stream.key, &self.group, &[&entry.id])
                            .await
                            .map_err(broker_err)?;
                    }
                }
            }
        }

        if self.replaying && seen == 0 {
            debug!(group = %self.group, consumer = %self.consumer, "Pending entries replayed");
            self.replaying = false;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisStreamSubscription {
    async fn next(&mut self) -> TrellisResult<Delivery> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(delivery);
            }
            self.read_batch().await?;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> TrellisResult<()> {
        self.conn
            .xack::<_, _, _, ()>(
                keys::stream(delivery.envelope.topic()),
                &self.group,
                &[&delivery.offset],
            )
            .await
            .map_err(broker_err)
    }
}
