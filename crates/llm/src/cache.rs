use std::collections::HashMap;
use std::time::{Duration, Instant};

use compass_core::GovernedMessage;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::Completion;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CachedCompletion {
    completion: Completion,
    stored_at: Instant,
}

/// In-process TTL cache for completions keyed by request fingerprint.
/// Holds at most `capacity` entries; the oldest entry makes room for a new one.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<String, CachedCompletion>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key_for(model: &str, temperature: f32, messages: &[GovernedMessage]) -> String {
        let request = serde_json::json!({
            "model": model,
            "temperature": temperature,
            "messages": messages,
        });
        let digest = Sha256::digest(request.to_string().as_bytes());
        format!("llm:{}", hex_encode(digest.as_slice()))
    }

    pub fn get(&self, key: &str) -> Option<Completion> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.completion.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.entries.write().remove(key);
        None
    }

    pub fn insert(&self, key: String, completion: Completion) {
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            self.drop_expired(&mut entries);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CachedCompletion {
                completion,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn purge_expired(&self) -> usize {
        self.drop_expired(&mut self.entries.write())
    }

    fn drop_expired(&self, entries: &mut HashMap<String, CachedCompletion>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(format!("{:02x}", byte).as_str());
    }
    out
}
