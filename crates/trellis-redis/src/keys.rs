//! Key layout shared by the broker and the stores.

pub const PREFIX: &str = "trellis";

/// Stream holding one topic's log.
pub fn stream(topic: &str) -> String {
    format!("{}:stream:{}", PREFIX, topic)
}

/// Topic name back from a stream key, if it is one of ours.
pub fn topic_of(stream_key: &str) -> Option<&str> {
    stream_key
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_prefix(":stream:"))
        .filter(|topic| !topic.is_empty())
}

pub fn replica(kind: &str, id: &str) -> String {
    format!("{}:replica:{}:{}", PREFIX, kind, id)
}

pub fn replica_index(kind: &str) -> String {
    format!("{}:replicas:{}", PREFIX, kind)
}

pub fn notification(id: &str) -> String {
    format!("{}:notification:{}", PREFIX, id)
}

/// Sorted set of one user's notification ids, scored by creation time.
pub fn user_notifications(user_id: &str) -> String {
    format!("{}:notifications:user:{}", PREFIX, user_id)
}
