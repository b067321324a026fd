//! Binary key encoding for ordered key-value backends.
//!
//! Ids are opaque strings, so a plain separator byte could be forged by an
//! id that contains it. Every segment is length-prefixed instead, which
//! keeps the encoding injective and makes a topic's encoded prefix match
//! exactly that topic's keys.
//!
//! # Binary Format
//!
//! Artifact keys:
//! - `[len: u32 BE][topic_id]`
//! - `[tag: u8]` - `0x00` shared, `0x01` per-user
//! - `[len: u32 BE][user_id]` - only when tag is `0x01`
//! - `[len: u32 BE][variant_key]`
//!
//! Counter keys: `[len][user_id][len][endpoint]`.

use nova_core::{ArtifactKey, CounterKey};

const SHARED_TAG: u8 = 0x00;
const USER_TAG: u8 = 0x01;

/// A key that can be stored in a byte-ordered backend.
pub trait StoreKey {
    fn encode(&self) -> Vec<u8>;
}

impl StoreKey for ArtifactKey {
    fn encode(&self) -> Vec<u8> {
        let mut bytes = topic_prefix(self.topic_id());
        match self.user_id() {
            Some(user_id) => {
                bytes.push(USER_TAG);
                push_segment(&mut bytes, user_id);
            }
            None => bytes.push(SHARED_TAG),
        }
        push_segment(&mut bytes, self.variant_key());
        bytes
    }
}

impl StoreKey for CounterKey {
    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.user_id.len() + self.endpoint.len());
        push_segment(&mut bytes, &self.user_id);
        push_segment(&mut bytes, &self.endpoint);
        bytes
    }
}

/// Prefix shared by every artifact key of `topic_id` and no other topic.
pub fn topic_prefix(topic_id: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + topic_id.len());
    push_segment(&mut bytes, topic_id);
    bytes
}

fn push_segment(bytes: &mut Vec<u8>, segment: &str) {
    bytes.extend_from_slice(&(segment.len() as u32).to_be_bytes());
    bytes.extend_from_slice(segment.as_bytes());
}
