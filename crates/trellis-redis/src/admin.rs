//! Topic administration: create streams with their consumer groups, delete streams.

use redis::AsyncCommands;
use tracing::info;
use trellis_core::config::ServiceKind;

use crate::broker::ensure_group;
use crate::client::{RedisPool, RedisResult};
use crate::keys;

/// A consumer group that `create_topics` made sure exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicGroup {
    pub topic: String,
    pub group: String,
    pub created: bool,
}

/// Every (topic, group) pair the services subscribe with.
pub fn service_groups() -> Vec<(&'static str, &'static str)> {
    [ServiceKind::Tasks, ServiceKind::Notifications]
        .iter()
        .flat_map(|service| service.topics().iter().map(move |topic| (*topic, service.group())))
        .collect()
}

/// Create each topic stream and its consumer groups. Existing ones are left alone.
pub async fn create_topics(pool: &RedisPool) -> RedisResult<Vec<TopicGroup>> {
    let mut out = Vec::new();
    for (topic, group) in service_groups() {
        let created = ensure_group(pool, topic, group).await?;
        if created {
            info!(topic, group, "Topic and consumer group created");
        }
        out.push(TopicGroup {
            topic: topic.to_string(),
            group: group.to_string(),
            created,
        });
    }
    Ok(out)
}

/// Delete a topic's stream with all entries and groups. Returns false if it did not exist.
pub async fn clean_topic(pool: &RedisPool, topic: &str) -> RedisResult<bool> {
    let mut conn = pool.clone();
    let removed: i64 = conn.del(keys::stream(topic)).await?;
    info!(topic, removed = removed > 0, "Topic cleaned");
    Ok(removed > 0)
}
