//! Content-addressed answer cache.
//!
//! Keys are the SHA-256 of the normalized query and jurisdiction, so
//! `"  Speed Limit?  "` and `"speed limit?"` share an entry. Reads are
//! served from an in-memory [`moka`] cache without suspension. Writes land
//! in memory immediately and are queued for a background task that writes
//! them through to SQLite, so answers survive restarts without the caller
//! ever waiting on the store.
//!
//! Only retrieval-tier answers are ever stored. Fallback and error answers
//! are rejected by [`ResponseCache::put`], so a model outage cannot poison
//! later responses.
//!
//! Persistence is best-effort. A cache file that is missing, corrupt, or
//! unwritable is logged as a cache I/O error and the cache keeps working
//! in memory only.
//!
//! Capacity is bounded by `max_entries` with least-recently-used eviction.
//! An optional `ttl_secs` expires entries that many seconds after they were
//! cached.

use anyhow::Result;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, Config};
use crate::db;
use crate::error::{PipelineError, PipelineResult};
use crate::migrate;
use crate::models::{normalize_jurisdiction, normalize_query, AnswerResult, Tier};

/// Separates query and jurisdiction in the hashed key material.
const KEY_SEPARATOR: char = '\u{1f}';

/// Pending store writes. When full, new writes stay in memory only.
const STORE_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub query: String,
    pub jurisdiction: String,
    pub text: String,
    pub source_tier: Tier,
    pub contexts_used: usize,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

pub struct ResponseCache {
    enabled: bool,
    entries: Cache<String, CacheEntry>,
    store: Option<Store>,
    path: Option<PathBuf>,
    persistent: Arc<AtomicBool>,
    max_entries: usize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Durable side of the cache: the pool plus the writer task draining `tx`.
struct Store {
    pool: SqlitePool,
    tx: Mutex<Option<mpsc::Sender<StoreOp>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

enum StoreOp {
    Upsert { key: String, entry: CacheEntry },
    Clear(oneshot::Sender<()>),
}

/// Hex SHA-256 of the normalized (query, jurisdiction) pair.
pub fn cache_key(query: &str, jurisdiction: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(KEY_SEPARATOR.to_string().as_bytes());
    hasher.update(normalize_jurisdiction(jurisdiction).as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ResponseCache {
    /// A cache with no durable store.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::build(true, max_entries, None)
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::build(false, 1, None)
    }

    /// Open the cache described by `config`.
    ///
    /// Never fails: any problem with the SQLite file degrades to an
    /// in-memory cache.
    pub async fn open(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let ttl = config.ttl_secs.map(Duration::from_secs);
        let mut cache = Self::build(true, config.max_entries, ttl);
        let Some(path) = config.path.clone() else {
            return cache;
        };

        let pool = match Self::open_pool(&path).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "answer cache running in memory only");
                return cache;
            }
        };

        cache.path = Some(path.clone());
        match cache.load_persisted(&pool).await {
            Ok(count) => {
                info!(path = %path.display(), entries = count, "answer cache loaded");
                cache.persistent.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "answer cache persistence failed; continuing in memory only"),
        }

        let (tx, rx) = mpsc::channel(STORE_QUEUE_DEPTH);
        let writer = tokio::spawn(run_store_writer(
            pool.clone(),
            rx,
            cache.persistent.clone(),
            cache.max_entries,
        ));
        cache.store = Some(Store {
            pool,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        });
        cache
    }

    fn build(enabled: bool, max_entries: usize, ttl: Option<Duration>) -> Self {
        let max_entries = max_entries.max(1);
        let mut builder = Cache::<String, CacheEntry>::builder()
            .max_capacity(max_entries as u64)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            enabled,
            entries: builder.build(),
            store: None,
            path: None,
            persistent: Arc::new(AtomicBool::new(false)),
            max_entries,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    async fn open_pool(path: &std::path::Path) -> PipelineResult<SqlitePool> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(pool)
    }

    /// Load the newest persisted answers that are still within the TTL.
    async fn load_persisted(&self, pool: &SqlitePool) -> PipelineResult<usize> {
        let cutoff = match self.ttl {
            Some(ttl) => chrono::Utc::now().timestamp() - ttl.as_secs() as i64,
            None => i64::MIN,
        };

        let rows = sqlx::query(
            r#"
            SELECT key, query, jurisdiction, response, source_tier, contexts_used, created_at
            FROM answer_cache
            WHERE created_at >= ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(self.max_entries as i64)
        .fetch_all(pool)
        .await?;

        let mut count = 0;
        // Oldest first, so the newest answers are the most recently used.
        for row in rows.iter().rev() {
            let tier: String = row.try_get("source_tier")?;
            let Some(source_tier) = Tier::parse(&tier) else {
                continue;
            };
            let entry = CacheEntry {
                query: row.try_get("query")?,
                jurisdiction: row.try_get("jurisdiction")?,
                text: row.try_get("response")?,
                source_tier,
                contexts_used: row.try_get::<i64, _>("contexts_used")?.max(0) as usize,
                created_at: row.try_get("created_at")?,
            };
            self.entries.insert(row.try_get::<String, _>("key")?, entry);
            count += 1;
        }
        Ok(count)
    }

    /// Look up a previous answer. Synchronous, in-memory only.
    pub fn get(&self, query: &str, jurisdiction: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        let found = self.entries.get(&cache_key(query, jurisdiction));
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a retrieval-tier answer. Returns whether it was stored.
    ///
    /// The answer is visible to [`get`](Self::get) on return; the durable
    /// write happens in the background. Answers from any other tier are
    /// refused. Last writer wins.
    pub fn put(&self, query: &str, jurisdiction: &str, result: &AnswerResult) -> bool {
        if !self.enabled || result.tier != Tier::Retrieval || result.text.trim().is_empty() {
            return false;
        }

        let key = cache_key(query, jurisdiction);
        let entry = CacheEntry {
            query: normalize_query(query),
            jurisdiction: normalize_jurisdiction(jurisdiction),
            text: result.text.clone(),
            source_tier: result.tier,
            contexts_used: result.contexts_used,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.entries.insert(key.clone(), entry.clone());
        debug!(key = %key, "cached answer");

        if let Some(tx) = self.store_sender() {
            if let Err(TrySendError::Full(_)) = tx.try_send(StoreOp::Upsert { key, entry }) {
                warn!("answer cache store is behind; answer kept in memory only");
            }
        }
        true
    }

    /// Remove every entry, in memory and on disk.
    pub async fn clear(&self) -> usize {
        let removed = self.len();
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();

        if let Some(tx) = self.store_sender() {
            let (ack, done) = oneshot::channel();
            if tx.send(StoreOp::Clear(ack)).await.is_ok() {
                let _ = done.await;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            persistent: self.is_persistent(),
            path: self.path.clone(),
        }
    }

    /// Drain queued writes and close the durable store.
    pub async fn close(&self) {
        let Some(store) = &self.store else {
            return;
        };
        drop(store.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let writer = store
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "answer cache writer stopped abnormally");
            }
        }
        store.pool.close().await;
    }

    fn store_sender(&self) -> Option<mpsc::Sender<StoreOp>> {
        if !self.is_persistent() {
            return None;
        }
        self.store
            .as_ref()?
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Apply queued writes in order until every sender is gone.
async fn run_store_writer(
    pool: SqlitePool,
    mut rx: mpsc::Receiver<StoreOp>,
    persistent: Arc<AtomicBool>,
    max_entries: usize,
) {
    while let Some(op) = rx.recv().await {
        if !persistent.load(Ordering::Relaxed) {
            continue;
        }
        let result = match op {
            StoreOp::Upsert { key, entry } => upsert(&pool, &key, &entry, max_entries).await,
            StoreOp::Clear(ack) => {
                let result = sqlx::query("DELETE FROM answer_cache")
                    .execute(&pool)
                    .await
                    .map(|_| ())
                    .map_err(PipelineError::from);
                let _ = ack.send(());
                result
            }
        };
        if let Err(e) = result {
            if persistent.swap(false, Ordering::Relaxed) {
                warn!(error = %e, "answer cache persistence failed; continuing in memory only");
            }
        }
    }
}

/// Write one entry and keep only the newest `max_entries` rows.
async fn upsert(
    pool: &SqlitePool,
    key: &str,
    entry: &CacheEntry,
    max_entries: usize,
) -> PipelineResult<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO answer_cache
            (key, query, jurisdiction, response, source_tier, contexts_used, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(key)
    .bind(&entry.query)
    .bind(&entry.jurisdiction)
    .bind(&entry.text)
    .bind(entry.source_tier.as_str())
    .bind(entry.contexts_used as i64)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM answer_cache
        WHERE key NOT IN (
            SELECT key FROM answer_cache ORDER BY created_at DESC, rowid DESC LIMIT ?
        )
        "#,
    )
    .bind(max_entries as i64)
    .execute(pool)
    .await?;
    Ok(())
}

// ============ CLI ============

pub async fn run_cache_stats(config: &Config) -> Result<()> {
    let cache = ResponseCache::open(&config.cache).await;
    let stats = cache.stats();

    println!("DriveSmart — Answer Cache");
    println!("=========================");
    println!();
    match &stats.path {
        Some(path) => println!("  Store:       {}", path.display()),
        None => println!("  Store:       (memory)"),
    }
    println!("  Enabled:     {}", stats.enabled);
    println!("  Persistent:  {}", stats.persistent);
    println!("  Entries:     {} / {}", stats.entries, stats.max_entries);
    match config.cache.ttl_secs {
        Some(ttl) => println!("  TTL:         {}s", ttl),
        None => println!("  TTL:         none"),
    }

    cache.close().await;
    Ok(())
}

pub async fn run_cache_clear(config: &Config) -> Result<()> {
    let cache = ResponseCache::open(&config.cache).await;
    let removed = cache.clear().await;
    cache.close().await;
    println!("Cleared {} cached answers.", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FallbackReason;
    use sqlx::Connection;
    use std::time::Instant;
    use tempfile::TempDir;

    fn answer(text: &str, tier: Tier) -> AnswerResult {
        AnswerResult {
            text: text.to_string(),
            tier,
            elapsed_ms: 3,
            jurisdiction: "washington".to_string(),
            contexts_used: 2,
            fallback_reason: (tier == Tier::Fallback).then_some(FallbackReason::Timeout),
            synthesis: None,
        }
    }

    fn store_config(tmp: &TempDir) -> CacheConfig {
        CacheConfig {
            path: Some(tmp.path().join("data").join("cache.sqlite")),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_key_normalizes_case_and_whitespace() {
        assert_eq!(
            cache_key("  Speed Limit?  ", "washington"),
            cache_key("speed limit?", "washington")
        );
        assert_eq!(
            cache_key("speed limit?", "Washington"),
            cache_key("speed limit?", "washington")
        );
    }

    #[test]
    fn test_key_distinguishes_jurisdiction() {
        assert_ne!(
            cache_key("speed limit?", "washington"),
            cache_key("speed limit?", "florida")
        );
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = cache_key("q", "j");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_put_then_get() {
        let cache = ResponseCache::in_memory(10);
        assert!(cache.get("speed limit?", "washington").is_none());
        assert!(cache.put("Speed Limit?", "washington", &answer("25 mph.", Tier::Retrieval)));
        let hit = cache.get("  speed limit?", "washington").unwrap();
        assert_eq!(hit.text, "25 mph.");
        assert_eq!(hit.contexts_used, 2);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_non_retrieval_tiers_refused() {
        let cache = ResponseCache::in_memory(10);
        for tier in [Tier::Fallback, Tier::Quick, Tier::Cache, Tier::Error] {
            assert!(!cache.put("q", "washington", &answer("text.", tier)));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_text_refused() {
        let cache = ResponseCache::in_memory(10);
        assert!(!cache.put("q", "washington", &answer("  ", Tier::Retrieval)));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = ResponseCache::in_memory(2);
        cache.put("a", "washington", &answer("A.", Tier::Retrieval));
        cache.put("b", "washington", &answer("B.", Tier::Retrieval));
        assert_eq!(cache.len(), 2);

        assert!(cache.get("a", "washington").is_some());
        cache.len();
        cache.put("c", "washington", &answer("C.", Tier::Retrieval));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", "washington").is_some());
        assert!(cache.get("b", "washington").is_none());
        assert!(cache.get("c", "washington").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::in_memory(1);
        cache.put("a", "washington", &answer("A1.", Tier::Retrieval));
        cache.put("a", "washington", &answer("A2.", Tier::Retrieval));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a", "washington").unwrap().text, "A2.");
    }

    #[test]
    fn test_ttl_expires_entries() {
        let cache = ResponseCache::build(true, 10, Some(Duration::from_millis(100)));
        cache.put("a", "washington", &answer("A.", Tier::Retrieval));
        assert!(cache.get("a", "washington").is_some());
        std::thread::sleep(Duration::from_millis(250));
        assert!(cache.get("a", "washington").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_never_stores() {
        let cache = ResponseCache::disabled();
        assert!(!cache.put("a", "washington", &answer("A.", Tier::Retrieval)));
        assert!(cache.get("a", "washington").is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_memory() {
        let cache = ResponseCache::in_memory(10);
        cache.put("a", "washington", &answer("A.", Tier::Retrieval));
        cache.put("b", "washington", &answer("B.", Tier::Retrieval));
        assert_eq!(cache.clear().await, 2);
        assert!(cache.is_empty());
        assert!(cache.get("a", "washington").is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let config = store_config(&tmp);

        let cache = ResponseCache::open(&config).await;
        assert!(cache.is_persistent());
        cache.put("What is the speed limit?", "washington", &answer("25 mph.", Tier::Retrieval));
        cache.close().await;

        let reopened = ResponseCache::open(&config).await;
        let hit = reopened.get("what is the speed limit?", "washington").unwrap();
        assert_eq!(hit.text, "25 mph.");
        assert_eq!(hit.source_tier, Tier::Retrieval);

        assert_eq!(reopened.clear().await, 1);
        reopened.close().await;

        let emptied = ResponseCache::open(&config).await;
        assert!(emptied.is_empty());
        emptied.close().await;
    }

    #[tokio::test]
    async fn test_store_keeps_newest_entries() {
        let tmp = TempDir::new().unwrap();
        let config = CacheConfig {
            max_entries: 2,
            ..store_config(&tmp)
        };

        let cache = ResponseCache::open(&config).await;
        for q in ["a", "b", "c"] {
            cache.put(q, "washington", &answer("text.", Tier::Retrieval));
        }
        cache.close().await;

        let reopened = ResponseCache::open(&config).await;
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get("c", "washington").is_some());
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_put_does_not_wait_for_locked_store() {
        let tmp = TempDir::new().unwrap();
        let config = store_config(&tmp);
        let cache = ResponseCache::open(&config).await;
        assert!(cache.is_persistent());

        let url = format!("sqlite:{}", config.path.as_ref().unwrap().display());
        let mut lock = sqlx::SqliteConnection::connect(&url).await.unwrap();
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut lock).await.unwrap();

        let started = Instant::now();
        assert!(cache.put("school zone speed", "washington", &answer("20 mph.", Tier::Retrieval)));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(cache.get("school zone speed", "washington").is_some());

        sqlx::query("ROLLBACK").execute(&mut lock).await.unwrap();
        lock.close().await.unwrap();
        cache.close().await;

        let reopened = ResponseCache::open(&config).await;
        assert!(reopened.get("school zone speed", "washington").is_some());
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_corrupt_store_degrades_to_memory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.sqlite");
        std::fs::write(&path, b"this is not a sqlite database at all, not even close").unwrap();
        let config = CacheConfig {
            path: Some(path),
            ..CacheConfig::default()
        };

        let cache = ResponseCache::open(&config).await;
        assert!(!cache.is_persistent());
        assert!(cache.put("a", "washington", &answer("A.", Tier::Retrieval)));
        assert!(cache.get("a", "washington").is_some());
    }
}
