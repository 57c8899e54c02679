//! Store implementations backed by Redis.

pub mod notifications;
pub mod replicas;
