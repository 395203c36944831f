//! Message database: codecs keyed by id plus per-node message ownership.
//!
//! Built once from a [`DatabaseDef`] and read-only afterwards. Runtime
//! components share it behind an `Arc` without any locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::codec::MessageCodec;
use crate::def::DatabaseDef;
use crate::error::{DatabaseError, DatabaseResult};

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub num_messages: usize,
    pub num_signals: usize,
    pub num_nodes: usize,
    pub num_multiplexed: usize,
}

/// Immutable collection of message codecs.
#[derive(Debug, Clone)]
pub struct Database {
    version: String,
    messages: HashMap<u32, MessageCodec>,
    /// Message name -> id.
    names: HashMap<String, u32>,
    /// Node -> ids of messages it transmits.
    transmitted: BTreeMap<String, Vec<u32>>,
    /// Node -> ids of messages carrying at least one signal it receives.
    received: BTreeMap<String, Vec<u32>>,
}

impl Database {
    /// Validate every message and build the database.
    ///
    /// Fails on duplicate ids or names and on any per-message layout error
    /// (overlapping active bit ranges, signals outside the frame, ...).
    pub fn new(def: DatabaseDef) -> DatabaseResult<Self> {
        let mut messages: HashMap<u32, MessageCodec> = HashMap::new();
        let mut names: HashMap<String, u32> = HashMap::new();
        let mut transmitted: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        let mut received: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();

        for node in &def.nodes {
            transmitted.entry(node.clone()).or_default();
            received.entry(node.clone()).or_default();
        }

        for message_def in def.messages {
            let codec = MessageCodec::new(message_def)?;
            let id = codec.id();

            if let Some(existing) = messages.get(&id) {
                return Err(DatabaseError::DuplicateMessageId {
                    id,
                    first: existing.name().to_string(),
                    second: codec.name().to_string(),
                });
            }
            if names.insert(codec.name().to_string(), id).is_some() {
                return Err(DatabaseError::DuplicateMessageName(codec.name().to_string()));
            }

            if let Some(sender) = codec.sender() {
                transmitted.entry(sender.to_string()).or_default().insert(id);
            }
            for receiver in codec.signals().iter().flat_map(|s| s.receivers.iter()) {
                received.entry(receiver.clone()).or_default().insert(id);
            }

            tracing::trace!(
                id,
                name = codec.name(),
                signals = codec.signals().len(),
                "message loaded"
            );
            messages.insert(id, codec);
        }

        Ok(Self {
            version: def.version,
            messages,
            names,
            transmitted: into_sorted(transmitted),
            received: into_sorted(received),
        })
    }

    /// Build from the JSON form of a [`DatabaseDef`].
    pub fn from_json(json: &str) -> DatabaseResult<Self> {
        let def: DatabaseDef =
            serde_json::from_str(json).map_err(|e| DatabaseError::Json(e.to_string()))?;
        Self::new(def)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn message(&self, id: u32) -> Option<&MessageCodec> {
        self.messages.get(&id)
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageCodec> {
        self.names.get(name).and_then(|id| self.messages.get(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.messages.contains_key(&id)
    }

    /// All messages, sorted by id.
    pub fn messages(&self) -> Vec<&MessageCodec> {
        let mut all: Vec<&MessageCodec> = self.messages.values().collect();
        all.sort_unstable_by_key(|m| m.id());
        all
    }

    /// Known node names (declared or referenced as sender/receiver).
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: BTreeSet<&str> = self.transmitted.keys().map(String::as_str).collect();
        nodes.extend(self.received.keys().map(String::as_str));
        nodes.into_iter().collect()
    }

    /// Ids of messages transmitted by `node`, sorted.
    pub fn transmitted_by(&self, node: &str) -> &[u32] {
        self.transmitted.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of messages with at least one signal received by `node`, sorted.
    pub fn received_by(&self, node: &str) -> &[u32] {
        self.received.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals().len()).sum(),
            num_nodes: self.nodes().len(),
            num_multiplexed: self.messages.values().filter(|m| m.is_multiplexed()).count(),
        }
    }
}

fn into_sorted(map: BTreeMap<String, BTreeSet<u32>>) -> BTreeMap<String, Vec<u32>> {
    map.into_iter()
        .map(|(node, ids)| (node, ids.into_iter().collect()))
        .collect()
}
