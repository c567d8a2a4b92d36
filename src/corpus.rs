//! Jurisdiction corpus store.
//!
//! Loads rule documents from the configured corpus directory, segments them
//! into [`Chunk`]s once, and serves them read-only to every request. A
//! jurisdiction's documents are either files in the corpus root whose stem
//! names the jurisdiction (`Washington.txt`, `NewJersey.pdf`) or any files in
//! a sub-directory of that name (`washington/chapter1.txt`).
//!
//! The directory is scanned once (on first use, [`CorpusStore::load_all`], or
//! [`CorpusStore::reload`]) into an index of jurisdictions and their files.
//! Missing or unreadable documents never fail a request: the jurisdiction
//! simply has no chunks. Names outside the index share one empty chunk list
//! and are never stored, so callers cannot grow the store or trigger new
//! scans by inventing jurisdictions.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{Config, CorpusConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::read_document;
use crate::models::{normalize_jurisdiction, Chunk};

pub struct CorpusStore {
    config: CorpusConfig,
    include: GlobSet,
    exclude: GlobSet,
    loaded: RwLock<HashMap<String, Arc<Vec<Chunk>>>>,
    /// Jurisdiction → source files, from the last directory scan.
    index: RwLock<Option<Arc<Index>>>,
    empty: Arc<Vec<Chunk>>,
}

/// Jurisdiction id → source files.
pub type Index = BTreeMap<String, Vec<PathBuf>>;

impl CorpusStore {
    pub fn new(config: &CorpusConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            config: config.clone(),
            include,
            exclude,
            loaded: RwLock::new(HashMap::new()),
            index: RwLock::new(None),
            empty: Arc::new(Vec::new()),
        })
    }

    /// Chunks for `jurisdiction`, loading them on first reference.
    ///
    /// Idempotent: the second and later calls return the same `Arc`.
    /// Jurisdictions without documents get a shared empty list.
    pub fn load(&self, jurisdiction: &str) -> Arc<Vec<Chunk>> {
        let key = normalize_jurisdiction(jurisdiction);
        if let Some(chunks) = self.read_map().get(&key) {
            return chunks.clone();
        }

        let index = self.index();
        let Some(paths) = index.get(&key) else {
            debug!(jurisdiction = %key, "no documents for jurisdiction");
            return self.empty.clone();
        };
        let chunks = self.build_chunks(&key, paths);

        let mut map = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key).or_insert_with(|| Arc::new(chunks)).clone()
    }

    /// Scan the directory and load every jurisdiction found.
    ///
    /// Returns the number of jurisdictions with at least one chunk.
    pub fn load_all(&self) -> usize {
        let index = self.rescan();
        let mut loaded = 0;
        for (jurisdiction, paths) in index.iter() {
            let existing = self.read_map().get(jurisdiction).cloned();
            let chunks = match existing {
                Some(chunks) => chunks,
                None => {
                    let chunks = self.build_chunks(jurisdiction, paths);
                    self.loaded
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(jurisdiction.clone())
                        .or_insert_with(|| Arc::new(chunks))
                        .clone()
                }
            };
            if !chunks.is_empty() {
                loaded += 1;
            }
        }
        info!(jurisdictions = loaded, "corpus loaded");
        loaded
    }

    /// Drop every loaded jurisdiction and load the directory again.
    pub fn reload(&self) -> usize {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.load_all()
    }

    /// The directory index, scanning on first use.
    fn index(&self) -> Arc<Index> {
        let cached = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cached {
            Some(index) => index,
            None => self.rescan(),
        }
    }

    fn rescan(&self) -> Arc<Index> {
        let index = match self.discover() {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "corpus directory unavailable; serving fallback answers only");
                Index::new()
            }
        };
        let index = Arc::new(index);
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        index
    }

    /// Register text for a jurisdiction directly, bypassing the filesystem.
    ///
    /// Used by embedders that ship their corpus in-process, and by tests.
    pub fn insert_text(&self, jurisdiction: &str, text: &str) -> usize {
        let key = normalize_jurisdiction(jurisdiction);
        let chunks = chunk_text(
            &key,
            text,
            0,
            self.config.min_chunk_chars,
            self.config.max_chunk_chars,
        );
        let count = chunks.len();
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(chunks));
        count
    }

    /// Loaded jurisdictions with their chunk counts, sorted by name.
    pub fn jurisdictions(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .read_map()
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect();
        out.sort();
        out
    }

    /// Map every jurisdiction in the corpus directory to its source files.
    pub fn discover(&self) -> PipelineResult<Index> {
        let root = &self.config.dir;
        if !root.is_dir() {
            return Err(PipelineError::CorpusUnavailable {
                jurisdiction: "*".to_string(),
                reason: format!("corpus directory does not exist: {}", root.display()),
            });
        }

        let mut found = Index::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable corpus entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();
            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            if let Some(jurisdiction) = jurisdiction_for(relative) {
                found
                    .entry(jurisdiction)
                    .or_default()
                    .push(path.to_path_buf());
            }
        }
        Ok(found)
    }

    fn build_chunks(&self, jurisdiction: &str, paths: &[PathBuf]) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for path in paths {
            match read_document(path) {
                Ok(text) => {
                    let new = chunk_text(
                        jurisdiction,
                        &text,
                        chunks.len(),
                        self.config.min_chunk_chars,
                        self.config.max_chunk_chars,
                    );
                    debug!(path = %path.display(), chunks = new.len(), "segmented document");
                    chunks.extend(new);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable document");
                }
            }
        }
        if chunks.is_empty() {
            let err = PipelineError::CorpusUnavailable {
                jurisdiction: jurisdiction.to_string(),
                reason: "no readable documents".to_string(),
            };
            warn!(error = %err, "jurisdiction degraded to fallback-only");
        } else {
            info!(jurisdiction, chunks = chunks.len(), files = paths.len(), "loaded jurisdiction");
        }
        chunks
    }

    fn read_map(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Vec<Chunk>>>> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `washington/ch1.txt` → `washington`; `NewJersey.pdf` → `newjersey`.
fn jurisdiction_for(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?.as_os_str().to_string_lossy().to_string();
    let name = if components.next().is_some() {
        first
    } else {
        relative.file_stem()?.to_string_lossy().to_string()
    };
    let key = normalize_jurisdiction(&name);
    (!key.is_empty()).then_some(key)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ CLI ============

pub fn run_corpus(config: &Config) -> Result<()> {
    let store = CorpusStore::new(&config.corpus)?;
    let loaded = store.load_all();
    let jurisdictions = store.jurisdictions();

    println!("Corpus: {}", config.corpus.dir.display());
    if jurisdictions.is_empty() {
        println!("No jurisdictions found.");
        return Ok(());
    }

    println!("{:<20} {:>8}", "JURISDICTION", "CHUNKS");
    for (name, chunks) in &jurisdictions {
        println!("{:<20} {:>8}", name, chunks);
    }
    println!();
    println!("{} of {} jurisdictions have searchable text.", loaded, jurisdictions.len());
    Ok(())
}
