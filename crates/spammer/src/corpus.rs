//! Sample corpus management.
//!
//! Provides a `SampleCorpus` holding every sample fact, report and catalog
//! document in memory. The corpus is slurped once up front so that the run
//! never competes with the target service for disk.

use fleetload_types::{CommandKind, Document};
use rand::Rng;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// In-memory pool of sample documents, grouped by command kind.
#[derive(Clone, Debug, Default)]
pub struct SampleCorpus {
    facts: Vec<Document>,
    reports: Vec<Document>,
    catalogs: Vec<Document>,
}

impl SampleCorpus {
    /// Build a corpus from documents already in memory.
    pub fn from_documents(
        facts: Vec<Document>,
        reports: Vec<Document>,
        catalogs: Vec<Document>,
    ) -> Self {
        Self {
            facts,
            reports,
            catalogs,
        }
    }

    /// Load every sample under `root`.
    ///
    /// A file belongs to a kind when a directory between `root` and the
    /// file has `facts`, `reports` or `catalogs` in its name (checked in that
    /// order). The file name itself is not considered. Other files are
    /// skipped. Either every classified file loads or nothing is
    /// returned.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let root = root.as_ref();
        info!(root = %root.display(), "Loading sample corpus");

        let mut corpus = Self::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| CorpusError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let Some(kind) = classify(relative) else {
                debug!(path = %path.display(), "Skipping unclassified sample file");
                continue;
            };

            let doc = read_document(path)?;
            corpus.documents_mut(kind).push(doc);
        }

        info!(
            facts = corpus.facts.len(),
            reports = corpus.reports.len(),
            catalogs = corpus.catalogs.len(),
            "Loaded sample corpus"
        );

        Ok(corpus)
    }

    /// All documents of a kind, in load order.
    pub fn documents(&self, kind: CommandKind) -> &[Document] {
        match kind {
            CommandKind::Facts => &self.facts,
            CommandKind::Reports => &self.reports,
            CommandKind::Catalogs => &self.catalogs,
        }
    }

    fn documents_mut(&mut self, kind: CommandKind) -> &mut Vec<Document> {
        match kind {
            CommandKind::Facts => &mut self.facts,
            CommandKind::Reports => &mut self.reports,
            CommandKind::Catalogs => &mut self.catalogs,
        }
    }

    /// Document at `index`, if in range.
    pub fn get(&self, kind: CommandKind, index: usize) -> Option<&Document> {
        self.documents(kind).get(index)
    }

    /// Number of documents of a kind.
    pub fn len(&self, kind: CommandKind) -> usize {
        self.documents(kind).len()
    }

    /// Total number of documents across kinds.
    pub fn total(&self) -> usize {
        self.facts.len() + self.reports.len() + self.catalogs.len()
    }

    /// Check if the corpus holds no documents at all.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Fail with [`CorpusError::Empty`] for the first kind with no documents.
    pub fn ensure_populated(&self) -> Result<(), CorpusError> {
        match CommandKind::ALL.into_iter().find(|&kind| self.len(kind) == 0) {
            Some(kind) => Err(CorpusError::Empty { kind }),
            None => Ok(()),
        }
    }

    /// Uniformly random index into a kind's documents.
    pub fn random_index(
        &self,
        kind: CommandKind,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<usize, CorpusError> {
        let len = self.len(kind);
        if len == 0 {
            return Err(CorpusError::Empty { kind });
        }
        Ok(rng.gen_range(0..len))
    }

    /// Uniformly random document of a kind.
    pub fn sample(
        &self,
        kind: CommandKind,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<&Document, CorpusError> {
        let idx = self.random_index(kind, rng)?;
        Ok(&self.documents(kind)[idx])
    }
}

fn classify(relative: &Path) -> Option<CommandKind> {
    let dir = relative.parent()?.to_string_lossy();
    CommandKind::ALL
        .into_iter()
        .find(|kind| dir.contains(kind.dir_name()))
}

fn read_document(path: &Path) -> Result<Document, CorpusError> {
    let raw = fs::read(path).map_err(|source| CorpusError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&raw).map_err(|source| CorpusError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(doc) => Ok(doc),
        _ => Err(CorpusError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

/// Errors loading or sampling the corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("Failed to walk sample directory {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read sample {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse sample {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sample {path} is not a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("No {kind} samples in corpus")]
    Empty { kind: CommandKind },
}
