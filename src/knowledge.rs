//! # Knowledge retrieval engine
//!
//! Owns the [`DocumentStore`], the live [`FlatIndex`] and its metadata rows, and the
//! [`EmbeddingProvider`]. It is the only place that mutates the index, and it keeps one
//! invariant above all others: metadata row `i` describes index row `i`, so both always
//! have the same length.
//!
//! ## Lifecycle
//! ```text
//! Uninitialized ──initialize()──▶ Loading ──┬─▶ Ready
//!                                           └─▶ Rebuilding ──▶ Ready
//! ```
//! A persisted index is reused only when both files exist, load cleanly, agree on
//! their row count, and match the provider's dimension. Anything else triggers a full
//! rebuild from the store.
//!
//! ## Mutation
//! Every mutation ([`rebuild_index`](KnowledgeEngine::rebuild_index),
//! [`add_new_case`](KnowledgeEngine::add_new_case),
//! [`update_law_content`](KnowledgeEngine::update_law_content)) holds the store lock for
//! its whole duration and rebuilds the index from scratch. The new index and metadata
//! are built off to the side, written to disk, and only then published together as one
//! snapshot. A failed rebuild publishes nothing and leaves the files on disk as they
//! were.
//!
//! ## Example
//! ```no_run
//! use law_rag::config::DataPaths;
//! use law_rag::embedding::HashingEmbedder;
//! use law_rag::knowledge::KnowledgeEngine;
//!
//! # fn main() -> Result<(), law_rag::error::KnowledgeError> {
//! let engine = KnowledgeEngine::open(DataPaths::in_dir("data"), HashingEmbedder::new(384))?;
//! for hit in engine.retrieve_knowledge("入户盗窃", 5)? {
//!     println!("{} {:.3}", hit.id(), hit.relevance_score);
//! }
//! # Ok(()) }
//! ```

use std::{
    fs,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard},
};
use tracing::{debug, info, warn};

use crate::{
    config::DataPaths,
    embedding::EmbeddingProvider,
    error::{KnowledgeError, Result},
    index::{FlatIndex, l2_normalize},
    query::KnowledgeQuery,
    records::{CaseRecord, KnowledgeItem, RetrievedItem, StatutePatch, StatuteRecord},
    store::{DocumentStore, Entry, SkippedDocuments, stage_file, to_json_bytes},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Rebuilding,
    Ready,
}

/// What a rebuild indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub statutes: usize,
    pub cases: usize,
    /// Malformed collection entries left out of the index.
    pub skipped: usize,
}

impl RebuildReport {
    pub fn documents(&self) -> usize {
        self.statutes + self.cases
    }
}

/// Result of [`KnowledgeEngine::update_law_content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LawUpdate {
    /// Whether a statute with the requested id existed.
    pub matched: bool,
    pub report: RebuildReport,
}

#[derive(Debug)]
struct Snapshot {
    index: FlatIndex,
    metadata: Vec<KnowledgeItem>,
}

impl Snapshot {
    fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            metadata: Vec::new(),
        }
    }
}

fn persist_err(what: &'static str) -> impl FnOnce(io::Error) -> KnowledgeError {
    move |source| KnowledgeError::Persist { what, source }
}

#[derive(Debug)]
struct Live {
    state: EngineState,
    snapshot: Arc<Snapshot>,
}

pub struct KnowledgeEngine<E> {
    embedder: E,
    paths: DataPaths,
    store: Mutex<DocumentStore>,
    live: RwLock<Live>,
}

impl<E: EmbeddingProvider> KnowledgeEngine<E> {
    /// Load the document store and return an engine with an empty, unpublished index.
    /// Call [`initialize`](Self::initialize) before querying.
    pub fn new(paths: DataPaths, embedder: E) -> Self {
        let store = DocumentStore::load(&paths.laws, &paths.cases);
        let snapshot = Snapshot::empty(embedder.dimension());
        Self {
            embedder,
            paths,
            store: Mutex::new(store),
            live: RwLock::new(Live {
                state: EngineState::Uninitialized,
                snapshot: Arc::new(snapshot),
            }),
        }
    }

    /// [`new`](Self::new) followed by [`initialize`](Self::initialize).
    pub fn open(paths: DataPaths, embedder: E) -> Result<Self> {
        let engine = Self::new(paths, embedder);
        engine.initialize()?;
        Ok(engine)
    }

    /// Adopt the persisted index if it is usable, otherwise rebuild it.
    ///
    /// On failure the engine stays [`EngineState::Uninitialized`] and answers every
    /// query with an empty result.
    pub fn initialize(&self) -> Result<()> {
        let store = self.lock_store();
        self.set_state(EngineState::Loading);

        match self.load_persisted() {
            Some(snapshot) => {
                info!("Index loaded: {} documents", snapshot.metadata.len());
                self.publish(snapshot);
                Ok(())
            }
            None => self.rebuild_from(&store).map(|_| ()),
        }
    }

    /// Rebuild the index and metadata from the current store contents.
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let store = self.lock_store();
        self.rebuild_from(&store)
    }

    /// Append a case to the store, persist the store, then rebuild.
    ///
    /// If the rebuild fails the case stays in the store (memory and disk) while the
    /// previous index remains live; a later rebuild picks it up.
    pub fn add_new_case(&self, record: CaseRecord) -> Result<RebuildReport> {
        let mut store = self.lock_store();
        info!("Adding case {}", record.case_id);
        store
            .append_case(record)
            .map_err(|source| KnowledgeError::Persist {
                what: "case collection",
                source,
            })?;
        self.rebuild_from(&store)
    }

    /// Merge `patch` into the statute `article_id`, persist the store, then rebuild.
    /// An unknown id is not an error; the rebuild still runs.
    pub fn update_law_content(&self, article_id: &str, patch: StatutePatch) -> Result<LawUpdate> {
        let mut store = self.lock_store();
        let matched = store
            .update_statute(article_id, patch)
            .map_err(|source| KnowledgeError::Persist {
                what: "statute collection",
                source,
            })?;
        if !matched {
            warn!("No statute with id {article_id}; statute collection unchanged");
        }
        let report = self.rebuild_from(&store)?;
        Ok(LawUpdate { matched, report })
    }

    /// The `top_k` most similar knowledge items, best first.
    ///
    /// `top_k` is clamped to the number of indexed documents. An engine that is not
    /// [`EngineState::Ready`], or whose index is empty, returns an empty list without
    /// calling the embedding provider.
    pub fn retrieve_knowledge(
        &self,
        query: impl Into<KnowledgeQuery>,
        top_k: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let (state, snapshot) = {
            let live = self.read_live();
            (live.state, Arc::clone(&live.snapshot))
        };
        if state != EngineState::Ready || snapshot.index.is_empty() {
            debug!("Knowledge index is empty or not ready ({state:?}); nothing to retrieve");
            return Ok(Vec::new());
        }

        let text = query.into().to_text();
        let mut vectors = self.embedder.encode(&[text])?;
        if vectors.len() != 1 {
            return Err(KnowledgeError::VectorCount {
                expected: 1,
                actual: vectors.len(),
            });
        }
        let mut vector = vectors.remove(0);
        if vector.len() != snapshot.index.dimension() {
            return Err(KnowledgeError::DimensionMismatch {
                expected: snapshot.index.dimension(),
                actual: vector.len(),
            });
        }
        l2_normalize(&mut vector);

        let hits = snapshot.index.search(&vector, top_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(score, ordinal)| {
                snapshot.metadata.get(ordinal).map(|item| RetrievedItem {
                    item: item.clone(),
                    relevance_score: score,
                })
            })
            .collect())
    }

    pub fn state(&self) -> EngineState {
        self.read_live().state
    }

    /// Rows in the live index (equal to live metadata rows).
    pub fn document_count(&self) -> usize {
        self.read_live().snapshot.metadata.len()
    }

    pub fn index_dimension(&self) -> usize {
        self.read_live().snapshot.index.dimension()
    }

    /// Collection entries that are kept on disk but not indexed.
    pub fn skipped_documents(&self) -> SkippedDocuments {
        self.lock_store().skipped()
    }

    pub fn statutes(&self) -> Vec<StatuteRecord> {
        self.lock_store().statutes().cloned().collect()
    }

    pub fn cases(&self) -> Vec<CaseRecord> {
        self.lock_store().cases().cloned().collect()
    }

    fn rebuild_from(&self, store: &DocumentStore) -> Result<RebuildReport> {
        let previous = self.state();
        self.set_state(EngineState::Rebuilding);

        let rebuilt = self
            .build_snapshot(store)
            .and_then(|(snapshot, report)| {
                self.persist_snapshot(&snapshot)?;
                Ok((snapshot, report))
            });

        match rebuilt {
            Ok((snapshot, report)) => {
                info!(
                    "Index rebuilt: {} documents ({} statutes, {} cases)",
                    report.documents(),
                    report.statutes,
                    report.cases
                );
                self.publish(snapshot);
                Ok(report)
            }
            Err(err) => {
                warn!("Index rebuild failed, keeping the previous index: {err}");
                let restored = match previous {
                    EngineState::Ready => EngineState::Ready,
                    _ => EngineState::Uninitialized,
                };
                self.set_state(restored);
                Err(err)
            }
        }
    }

    fn build_snapshot(&self, store: &DocumentStore) -> Result<(Snapshot, RebuildReport)> {
        let mut report = RebuildReport::default();
        let mut texts = Vec::new();
        let mut metadata = Vec::new();

        for entry in store.statute_entries() {
            match entry {
                Entry::Record(statute) => {
                    texts.push(statute.embedding_text());
                    metadata.push(KnowledgeItem::from(statute.clone()));
                    report.statutes += 1;
                }
                Entry::Raw(_) => report.skipped += 1,
            }
        }
        for entry in store.case_entries() {
            match entry {
                Entry::Record(case) => {
                    texts.push(case.embedding_text());
                    metadata.push(KnowledgeItem::from(case.clone()));
                    report.cases += 1;
                }
                Entry::Raw(_) => report.skipped += 1,
            }
        }
        if report.skipped > 0 {
            warn!("{} malformed entries are not indexed", report.skipped);
        }

        let dimension = self.embedder.dimension();
        let mut index = FlatIndex::new(dimension);
        if texts.is_empty() {
            warn!("No documents to index; the knowledge index will be empty");
            return Ok((Snapshot { index, metadata }, report));
        }

        info!("Encoding {} documents", texts.len());
        let mut vectors = self.embedder.encode(&texts)?;
        if vectors.len() != texts.len() {
            return Err(KnowledgeError::VectorCount {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(KnowledgeError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        vectors.iter_mut().for_each(|v| l2_normalize(v));
        index.add(&vectors)?;

        Ok((Snapshot { index, metadata }, report))
    }

    /// Stage both files before renaming either into place.
    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let index_bytes = snapshot.index.to_bytes()?;
        let metadata_bytes = to_json_bytes(&snapshot.metadata)?;

        let staged_index =
            stage_file(&self.paths.index, &index_bytes).map_err(persist_err("index"))?;
        let staged_metadata =
            stage_file(&self.paths.metadata, &metadata_bytes).map_err(persist_err("metadata"))?;

        staged_index
            .persist(&self.paths.index)
            .map_err(|err| persist_err("index")(err.error))?;
        staged_metadata
            .persist(&self.paths.metadata)
            .map_err(|err| persist_err("metadata")(err.error))?;
        Ok(())
    }

    fn load_persisted(&self) -> Option<Snapshot> {
        if !self.paths.index.exists() || !self.paths.metadata.exists() {
            info!("Index or metadata file missing; building a new index");
            return None;
        }

        let index = match FlatIndex::load(&self.paths.index) {
            Ok(index) => index,
            Err(err) => {
                warn!("Failed to load index ({err}); rebuilding");
                return None;
            }
        };

        let metadata: Vec<KnowledgeItem> = match fs::read_to_string(&self.paths.metadata)
            .map_err(|err| err.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|err| err.to_string()))
        {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to load index metadata ({err}); rebuilding");
                return None;
            }
        };

        let dimension = self.embedder.dimension();
        if index.dimension() != dimension {
            warn!(
                "Index dimension ({}) does not match the embedding dimension ({dimension}); rebuilding",
                index.dimension()
            );
            return None;
        }
        if index.count() != metadata.len() {
            warn!(
                "Index has {} rows but metadata has {}; rebuilding",
                index.count(),
                metadata.len()
            );
            return None;
        }

        Some(Snapshot { index, metadata })
    }

    fn publish(&self, snapshot: Snapshot) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        live.snapshot = Arc::new(snapshot);
        live.state = EngineState::Ready;
    }

    fn set_state(&self, state: EngineState) {
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }

    fn read_live(&self) -> RwLockReadGuard<'_, Live> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_store(&self) -> MutexGuard<'_, DocumentStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
