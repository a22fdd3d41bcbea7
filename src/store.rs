//! # Document store
//!
//! The authoritative statute and case collections. Each collection lives in its own
//! UTF-8 JSON array file; the store reads both once and rewrites a whole file after
//! every mutation.
//!
//! Loading never fails. A missing or unparsable file yields an empty collection and a
//! warning. Entries that are not JSON objects (or whose fields have unusable shapes)
//! are kept verbatim as [`Entry::Raw`]: they are written back on every rewrite but
//! never indexed, and are counted in [`SkippedDocuments`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::records::{CaseRecord, StatutePatch, StatuteRecord};

/// One element of a collection file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entry<T> {
    Record(T),
    /// Anything that did not deserialize as a record, preserved as read.
    Raw(Value),
}

impl<T> Entry<T> {
    pub fn record(&self) -> Option<&T> {
        match self {
            Entry::Record(record) => Some(record),
            Entry::Raw(_) => None,
        }
    }
}

fn records<T>(entries: &[Entry<T>]) -> impl Iterator<Item = &T> {
    entries.iter().filter_map(Entry::record)
}

fn raw_count<T>(entries: &[Entry<T>]) -> usize {
    entries.iter().filter(|e| matches!(e, Entry::Raw(_))).count()
}

/// Counts of collection entries that were not usable records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkippedDocuments {
    pub statutes: usize,
    pub cases: usize,
}

impl SkippedDocuments {
    pub fn total(&self) -> usize {
        self.statutes + self.cases
    }
}

/// In-memory copy of both collections plus the files they came from.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    statutes_path: PathBuf,
    cases_path: PathBuf,
    statutes: Vec<Entry<StatuteRecord>>,
    cases: Vec<Entry<CaseRecord>>,
}

impl DocumentStore {
    /// Read both collection files, substituting empty collections on any failure.
    pub fn load(statutes_path: impl Into<PathBuf>, cases_path: impl Into<PathBuf>) -> Self {
        let statutes_path = statutes_path.into();
        let cases_path = cases_path.into();

        let statutes = load_collection::<StatuteRecord>(&statutes_path);
        let cases = load_collection::<CaseRecord>(&cases_path);

        let store = Self {
            statutes_path,
            cases_path,
            statutes,
            cases,
        };
        info!(
            "Document store loaded: {} statutes, {} cases",
            store.statutes().count(),
            store.cases().count()
        );
        store
    }

    /// Every statute entry in file order, including raw ones.
    pub fn statute_entries(&self) -> &[Entry<StatuteRecord>] {
        &self.statutes
    }

    /// Every case entry in file order, including raw ones.
    pub fn case_entries(&self) -> &[Entry<CaseRecord>] {
        &self.cases
    }

    pub fn statutes(&self) -> impl Iterator<Item = &StatuteRecord> {
        records(&self.statutes)
    }

    pub fn cases(&self) -> impl Iterator<Item = &CaseRecord> {
        records(&self.cases)
    }

    pub fn skipped(&self) -> SkippedDocuments {
        SkippedDocuments {
            statutes: raw_count(&self.statutes),
            cases: raw_count(&self.cases),
        }
    }

    /// No indexable records. Raw entries don't count.
    pub fn is_empty(&self) -> bool {
        self.statutes().next().is_none() && self.cases().next().is_none()
    }

    /// Append a case and rewrite the case file with the full collection.
    ///
    /// The in-memory collection keeps the new case even if the write fails.
    pub fn append_case(&mut self, record: CaseRecord) -> io::Result<()> {
        debug!("Appending case {}", record.case_id);
        self.cases.push(Entry::Record(record));
        write_json_atomic(&self.cases_path, &self.cases)
    }

    /// Merge `patch` into the first statute whose id matches, then rewrite the
    /// statute file. Returns whether a statute matched; no match is not an error
    /// and the file is rewritten either way.
    pub fn update_statute(&mut self, article_id: &str, patch: StatutePatch) -> io::Result<bool> {
        let matched = match self
            .statutes
            .iter_mut()
            .find_map(|entry| match entry {
                Entry::Record(statute) if statute.article_id == article_id => Some(statute),
                _ => None,
            }) {
            Some(statute) => {
                statute.apply(patch);
                true
            }
            None => {
                debug!("No statute with id {article_id}, nothing to update");
                false
            }
        };

        write_json_atomic(&self.statutes_path, &self.statutes)?;
        Ok(matched)
    }
}

fn load_collection<T: DeserializeOwned>(path: &Path) -> Vec<Entry<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "{} could not be read ({err}); using an empty collection",
                path.display()
            );
            return Vec::new();
        }
    };

    let entries: Vec<Value> = match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "{} is not a JSON array ({err}); using an empty collection",
                path.display()
            );
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            if !entry.is_object() {
                warn!(
                    "Entry #{position} in {} is not an object and will not be indexed: {entry}",
                    path.display()
                );
                return Entry::Raw(entry);
            }
            match serde_json::from_value::<T>(entry.clone()) {
                Ok(record) => Entry::Record(record),
                Err(err) => {
                    warn!(
                        "Entry #{position} in {} is malformed and will not be indexed: {err}",
                        path.display()
                    );
                    Entry::Raw(entry)
                }
            }
        })
        .collect()
}

/// Stage `bytes` in a temp file next to `path`. The caller decides when to rename it
/// into place with [`NamedTempFile::persist`].
pub(crate) fn stage_file(path: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Pretty-printed UTF-8 JSON, non-ASCII left unescaped.
pub(crate) fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Replace `path` with the JSON form of `value` via a temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = to_json_bytes(value).map_err(io::Error::other)?;
    let staged = stage_file(path, &bytes)?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("laws.json"), dir.path().join("cases.json"))
    }

    #[test]
    fn missing_files_load_as_empty_collections() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        let store = DocumentStore::load(laws, cases);
        assert!(store.is_empty());
        assert_eq!(store.skipped().total(), 0);
    }

    #[test]
    fn corrupt_file_loads_as_empty_collection() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        fs::write(&laws, "{ not json").unwrap();
        fs::write(&cases, r#"{"案件编号": "C1"}"#).unwrap();

        let store = DocumentStore::load(laws, cases);
        assert!(store.is_empty());
        assert!(store.statute_entries().is_empty());
    }

    #[test]
    fn non_object_entries_are_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        fs::write(
            &laws,
            json!([{"条文编号": "A1", "条文内容": "盗窃罪"}, "garbage", 42]).to_string(),
        )
        .unwrap();
        fs::write(&cases, json!([[1, 2], {"案件编号": "C1"}]).to_string()).unwrap();

        let store = DocumentStore::load(laws, cases);
        assert_eq!(store.statutes().count(), 1);
        assert_eq!(store.cases().count(), 1);
        assert_eq!(store.statute_entries()[1], Entry::Raw(json!("garbage")));
        assert_eq!(
            store.skipped(),
            SkippedDocuments {
                statutes: 2,
                cases: 1
            }
        );
    }

    #[test]
    fn append_case_rewrites_the_whole_file() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        fs::write(&cases, json!([{"案件编号": "C1", "案件概述": "旧案"}]).to_string()).unwrap();

        let mut store = DocumentStore::load(&laws, &cases);
        store
            .append_case(CaseRecord::new("C2", "新案", "有期徒刑一年", "A1"))
            .unwrap();

        let on_disk: Vec<CaseRecord> =
            serde_json::from_str(&fs::read_to_string(&cases).unwrap()).unwrap();
        let ids: Vec<_> = on_disk.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(ids, ["C1", "C2"]);
        assert!(fs::read_to_string(&cases).unwrap().contains("新案"));
    }

    #[test]
    fn rewrites_keep_entries_that_are_not_records() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        fs::write(
            &cases,
            json!([{"案件编号": "C1", "案件概述": "旧案"}, "legacy note", 42]).to_string(),
        )
        .unwrap();
        fs::write(
            &laws,
            json!([null, {"条文编号": "A1", "条文内容": "盗窃罪"}]).to_string(),
        )
        .unwrap();

        let mut store = DocumentStore::load(&laws, &cases);
        store
            .append_case(CaseRecord::new("C2", "新案", "有期徒刑一年", "A1"))
            .unwrap();
        store
            .update_statute("A1", StatutePatch::default().with_explanation("新说明"))
            .unwrap();

        let on_disk: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&cases).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 4);
        assert_eq!(on_disk[1], json!("legacy note"));
        assert_eq!(on_disk[2], json!(42));
        assert_eq!(on_disk[3]["案件编号"], "C2");

        let on_disk: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&laws).unwrap()).unwrap();
        assert_eq!(on_disk[0], Value::Null);
        assert_eq!(on_disk[1]["解释说明"], "新说明");

        let reloaded = DocumentStore::load(&laws, &cases);
        assert_eq!(
            reloaded.skipped(),
            SkippedDocuments {
                statutes: 1,
                cases: 2
            }
        );
    }

    #[test]
    fn update_statute_merges_into_first_match_only() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        fs::write(
            &laws,
            json!([
                {"条文编号": "A1", "条文内容": "盗窃罪", "解释说明": "旧"},
                {"条文编号": "A2", "条文内容": "诈骗罪", "解释说明": "旧"}
            ])
            .to_string(),
        )
        .unwrap();

        let mut store = DocumentStore::load(&laws, &cases);
        let matched = store
            .update_statute("A1", StatutePatch::default().with_explanation("新说明"))
            .unwrap();
        assert!(matched);

        let reloaded = DocumentStore::load(&laws, &cases);
        let statutes: Vec<_> = reloaded.statutes().collect();
        assert_eq!(statutes[0].explanation, "新说明");
        assert_eq!(statutes[0].article_text, "盗窃罪");
        assert_eq!(statutes[1].explanation, "旧");
    }

    #[test]
    fn update_of_unknown_statute_is_a_silent_no_op() {
        let dir = TempDir::new().unwrap();
        let (laws, cases) = paths(&dir);
        let mut store = DocumentStore::load(&laws, &cases);
        let matched = store
            .update_statute("NOPE", StatutePatch::default().with_explanation("x"))
            .unwrap();
        assert!(!matched);
        assert_eq!(fs::read_to_string(&laws).unwrap().trim(), "[]");
    }

    #[test]
    fn unencodable_values_fail_before_touching_the_file() {
        let dir = TempDir::new().unwrap();
        let (laws, _) = paths(&dir);
        let bad = std::collections::BTreeMap::from([((1u8, 2u8), 3u8)]);

        let err = to_json_bytes(&bad).unwrap_err();
        assert!(matches!(
            crate::error::KnowledgeError::from(err),
            crate::error::KnowledgeError::Json(_)
        ));
        assert!(write_json_atomic(&laws, &bad).is_err());
        assert!(!laws.exists());
    }
}
