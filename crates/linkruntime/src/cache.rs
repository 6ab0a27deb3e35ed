//! Memoized node outputs shared across runs.
//!
//! Keys are [`Fingerprint`]s over a component's type, config and resolved
//! inputs. Concurrent requests for the same fingerprint are coalesced into a
//! single computation; failures are never stored.

use linkcore::{ComponentOutput, NodeError, Value};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// blake3 digest of a node invocation
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(
        component: &str,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_str(&mut hasher, component);
        hash_map(&mut hasher, config);
        hash_map(&mut hasher, inputs);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_map(hasher: &mut blake3::Hasher, map: &HashMap<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    hasher.update(&(keys.len() as u64).to_le_bytes());
    for key in keys {
        hash_str(hasher, key);
        hash_value(hasher, &map[key]);
    }
}

fn hash_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(&[0]);
        }
        Value::Bool(b) => {
            hasher.update(&[1, *b as u8]);
        }
        Value::Number(n) => {
            hasher.update(&[2]);
            hasher.update(&n.to_bits().to_le_bytes());
        }
        Value::String(s) => {
            hasher.update(&[3]);
            hash_str(hasher, s);
        }
        Value::Bytes(bytes) => {
            hasher.update(&[4]);
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Value::Json(json) => {
            hasher.update(&[5]);
            hash_json(hasher, json);
        }
        Value::Vector(v) => {
            hasher.update(&[6]);
            hasher.update(&(v.len() as u64).to_le_bytes());
            for x in v {
                hasher.update(&x.to_bits().to_le_bytes());
            }
        }
        Value::Array(items) => {
            hasher.update(&[7]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(&[8]);
            hash_map(hasher, map);
        }
    }
}

fn hash_json(hasher: &mut blake3::Hasher, json: &serde_json::Value) {
    match json {
        serde_json::Value::Null => {
            hasher.update(&[0]);
        }
        serde_json::Value::Bool(b) => {
            hasher.update(&[1, *b as u8]);
        }
        serde_json::Value::Number(n) => {
            hasher.update(&[2]);
            hash_str(hasher, &n.to_string());
        }
        serde_json::Value::String(s) => {
            hasher.update(&[3]);
            hash_str(hasher, s);
        }
        serde_json::Value::Array(items) => {
            hasher.update(&[7]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_json(hasher, item);
            }
        }
        serde_json::Value::Object(map) => {
            hasher.update(&[8]);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                hash_str(hasher, key);
                hash_json(hasher, &map[key]);
            }
        }
    }
}

/// Configuration for the result cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of stored outputs
    pub capacity: u64,
    /// Entries expire this long after insertion
    pub time_to_live: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            time_to_live: None,
        }
    }
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub requests: u64,
    pub computations: u64,
    pub hits: u64,
    pub entries: u64,
}

/// Result of a [`ResultCache::get_or_compute`] call
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub output: Arc<ComponentOutput>,
    /// True if this caller ran the computation
    pub computed: bool,
}

/// LRU-bounded, single-flight store of component outputs
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<Fingerprint, Arc<ComponentOutput>>,
    requests: Arc<AtomicU64>,
    computations: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.capacity)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            requests: Arc::new(AtomicU64::new(0)),
            computations: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the stored output for `fingerprint`, or run `compute` and
    /// store its result.
    ///
    /// While a computation for a fingerprint is in flight, other callers
    /// with the same fingerprint wait for it and receive the same output
    /// (or the same error). Errors are not stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> Result<CacheLookup, NodeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ComponentOutput, NodeError>>,
    {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let computations = self.computations.clone();
        let entry = self
            .entries
            .entry(fingerprint)
            .or_try_insert_with(async move {
                computations.fetch_add(1, Ordering::Relaxed);
                compute().await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<NodeError>| (*e).clone())?;

        let computed = entry.is_fresh();
        if !computed {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for {:?}", fingerprint);
        }

        Ok(CacheLookup {
            output: entry.into_value(),
            computed,
        })
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ComponentOutput>> {
        self.entries.get(fingerprint).await
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint).await;
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Apply pending evictions and invalidations now.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            requests: self.requests.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
