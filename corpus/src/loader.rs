//! Rule-tree corpus loader.
//!
//! Walks a directory of CSV/JSON rule files, lifts the textual leaves into
//! [`Document`]s by a typed rule per file shape, drops blanks, coalesces
//! duplicates, and returns the corpus in canonical order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{DEFAULT_DOMAIN, DEFAULT_VERSION, DocType, Document, Orientation};
use crate::error::{CorpusError, Result};

/// Tags a document body, e.g. with entity node ids found in the text.
pub type Tagger = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// How rule entries that carry both `text` and `korean` are indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KoreanPolicy {
    /// One document holding both texts.
    Merge,
    /// Two documents; the Korean one has position `ko`.
    #[default]
    Separate,
    /// Index the primary text only.
    PrimaryOnly,
}

impl KoreanPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "merge" => Some(Self::Merge),
            "separate" => Some(Self::Separate),
            "primary_only" | "primary" => Some(Self::PrimaryOnly),
            _ => None,
        }
    }
}

/// Configuration for the corpus loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Version stamped on every document.
    pub version: String,

    /// Policy for bilingual rule entries.
    pub korean_policy: KoreanPolicy,

    /// Whether to descend into hidden files and directories.
    pub include_hidden: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            korean_policy: KoreanPolicy::default(),
            include_hidden: false,
        }
    }
}

/// Outcome of a load, including the files that were skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Documents in canonical order.
    pub documents: Vec<Document>,

    /// Number of files that produced at least one document.
    pub files_loaded: usize,

    /// Files that were skipped, with the reason.
    pub files_skipped: Vec<(PathBuf, String)>,

    /// Number of duplicate texts that were coalesced.
    pub duplicates: usize,

    /// Documents dropped because an earlier one already held their `doc_id`.
    pub conflicts: usize,
}

/// Loads rule trees into documents.
pub struct CorpusLoader {
    config: LoaderConfig,
    tagger: Option<Tagger>,
}

impl Default for CorpusLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CorpusLoader {
    /// Create a loader with default configuration.
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    /// Create a loader with custom configuration.
    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            config,
            tagger: None,
        }
    }

    /// Attach a tagger applied to every document body.
    pub fn with_tagger(mut self, tagger: Tagger) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load every document under `root`.
    pub fn load(&self, root: &Path) -> Result<Vec<Document>> {
        Ok(self.load_with_report(root)?.documents)
    }

    /// Load every document under `root`, reporting skipped files.
    pub fn load_with_report(&self, root: &Path) -> Result<LoadReport> {
        if !root.exists() {
            return Err(CorpusError::SourceMissing(root.to_path_buf()));
        }

        let mut report = LoadReport::default();
        let mut raw = Vec::new();

        for path in self.source_files(root) {
            let rel = relative_source(root, &path);
            match self.load_file(&path, &rel) {
                Ok(docs) if docs.is_empty() => {
                    debug!("No documents in {rel}");
                }
                Ok(docs) => {
                    debug!("Loaded {} documents from {rel}", docs.len());
                    report.files_loaded += 1;
                    raw.extend(docs);
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    report.files_skipped.push((path, e.to_string()));
                }
            }
        }

        let (mut documents, duplicates, conflicts) = coalesce(raw);
        report.duplicates = duplicates;
        report.conflicts = conflicts;

        if let Some(tagger) = &self.tagger {
            for doc in &mut documents {
                let tags = tagger(&doc.text);
                doc.add_tags(tags);
            }
        }

        documents.retain(|doc| match doc.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping document from {}: {e}", doc.source);
                false
            }
        });
        documents.sort_by(Document::canonical_cmp);

        if documents.is_empty() {
            return Err(CorpusError::EmptyCorpus(root.to_path_buf()));
        }

        info!(
            documents = documents.len(),
            files = report.files_loaded,
            skipped = report.files_skipped.len(),
            duplicates = report.duplicates,
            conflicts = report.conflicts,
            "Loaded corpus from {}",
            root.display()
        );
        report.documents = documents;
        Ok(report)
    }

    /// Collect candidate source files in sorted walk order.
    fn source_files(&self, root: &Path) -> Vec<PathBuf> {
        let include_hidden = self.config.include_hidden;
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| include_hidden || e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Cannot read directory entry: {e}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| is_rule_file(p))
            .collect()
    }

    fn load_file(&self, path: &Path, rel: &str) -> Result<Vec<Document>> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let key_prefix = rel
            .rsplit_once('.')
            .map_or(rel, |(head, _)| head)
            .to_lowercase();
        let source = SourceFile {
            rel,
            stem: &stem,
            key_prefix: &key_prefix,
            config: &self.config,
        };

        match ext.as_str() {
            "json" => {
                let content = fs::read_to_string(path)?;
                let value: Value = serde_json::from_str(&content)
                    .map_err(|e| CorpusError::parse(path, e.to_string()))?;
                Ok(source.json_documents(&value))
            }
            "csv" => source.csv_documents(path),
            _ => Ok(Vec::new()),
        }
    }
}

/// Context shared by the typed extraction rules of one file.
struct SourceFile<'a> {
    rel: &'a str,
    stem: &'a str,
    /// Root-relative path without extension; prefixes rule keys.
    key_prefix: &'a str,
    config: &'a LoaderConfig,
}

/// A keyed rule entry before the Korean policy is applied.
#[derive(Debug, Default)]
struct RuleEntry {
    key: String,
    text: Option<String>,
    korean: Option<String>,
    advice: Option<String>,
    domain: Option<String>,
    tags: Vec<String>,
}

impl SourceFile<'_> {
    fn json_documents(&self, value: &Value) -> Vec<Document> {
        match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(is_tarot_card) => {
                items.iter().flat_map(|item| self.tarot_card(item)).collect()
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(is_combo) => {
                items.iter().flat_map(|item| self.combo(item)).collect()
            }
            Value::Object(map) if !map.is_empty() && map.values().all(is_rule_value) => map
                .iter()
                .flat_map(|(key, v)| self.rule(rule_entry_from_json(key, v)))
                .collect(),
            _ => {
                let mut leaves = Vec::new();
                collect_leaves(value, "$", &mut leaves);
                leaves
                    .into_iter()
                    .map(|(path, text)| {
                        Document::new(
                            DocType::Corpus,
                            Some(format!("{}:{path}", self.key_prefix)),
                            DEFAULT_DOMAIN,
                            None,
                            None,
                            text,
                            self.rel,
                            &self.config.version,
                        )
                        .with_tags([format!("kind:{}", self.stem)])
                    })
                    .collect()
            }
        }
    }

    fn csv_documents(&self, path: &Path) -> Result<Vec<Document>> {
        let mut reader =
            csv::Reader::from_path(path).map_err(|e| CorpusError::parse(path, e.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| CorpusError::parse(path, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        if !headers.iter().any(|h| h == "text" || h == "korean") {
            return Err(CorpusError::parse(path, "missing `text` column"));
        }

        let mut docs = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping row {} of {}: {e}", row_idx + 1, self.rel);
                    continue;
                }
            };
            let field = |name: &str| {
                headers
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let entry = RuleEntry {
                key: field("id").unwrap_or_else(|| (row_idx + 1).to_string()),
                text: field("text"),
                korean: field("korean"),
                advice: field("advice"),
                domain: field("domain"),
                tags: field("tags")
                    .map(|t| t.split(';').map(str::to_string).collect())
                    .unwrap_or_default(),
            };
            docs.extend(self.rule(entry));
        }
        Ok(docs)
    }

    fn tarot_card(&self, item: &Value) -> Vec<Document> {
        let name = str_field(item, "name").unwrap_or_default();
        let card_id = str_field(item, "card_id")
            .or_else(|| str_field(item, "id"))
            .map(|c| slugify(&c))
            .unwrap_or_else(|| slugify(&name));
        if card_id.is_empty() {
            warn!("Skipping unnamed card in {}", self.rel);
            return Vec::new();
        }

        let Some(orientation) = str_field(item, "orientation").and_then(|o| Orientation::parse(&o))
        else {
            warn!("Skipping card {card_id} in {}: missing orientation", self.rel);
            return Vec::new();
        };
        let position = str_field(item, "position");
        let extra_tags = string_list(item.get("tags"));

        let Some(Value::Object(meanings)) = item.get("meanings") else {
            return Vec::new();
        };

        meanings
            .iter()
            .filter_map(|(domain, meaning)| {
                let text = meaning.as_str().map(str::trim).filter(|t| !t.is_empty())?;
                let doc = Document::new(
                    DocType::Card,
                    Some(card_id.clone()),
                    domain,
                    Some(orientation),
                    position.clone(),
                    text,
                    self.rel,
                    &self.config.version,
                );
                let tags = [
                    format!("tarot_card:{card_id}"),
                    format!("orientation:{}", orientation.as_str()),
                    format!("domain:{}", doc.domain),
                    format!("kind:{}", self.stem),
                ];
                Some(doc.with_tags(tags).with_tags(&extra_tags))
            })
            .collect()
    }

    fn combo(&self, item: &Value) -> Vec<Document> {
        let mut cards: Vec<String> = string_list(item.get("cards"))
            .iter()
            .map(|c| slugify(c))
            .filter(|c| !c.is_empty())
            .collect();
        cards.sort();
        cards.dedup();

        let Some(text) = str_field(item, "text") else {
            return Vec::new();
        };
        if cards.is_empty() {
            warn!("Skipping combo without cards in {}", self.rel);
            return Vec::new();
        }

        let domain = str_field(item, "domain").unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let doc = Document::new(
            DocType::Combo,
            Some(cards.join("+")),
            domain,
            None,
            None,
            text,
            self.rel,
            &self.config.version,
        );
        let mut tags: Vec<String> = cards.iter().map(|c| format!("tarot_card:{c}")).collect();
        tags.push(format!("domain:{}", doc.domain));
        tags.push(format!("kind:{}", self.stem));
        tags.extend(string_list(item.get("tags")));
        vec![doc.with_tags(tags)]
    }

    fn rule(&self, entry: RuleEntry) -> Vec<Document> {
        let card_id = format!("{}:{}", self.key_prefix, slugify(&entry.key));
        let domain = entry
            .domain
            .clone()
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());

        let (primary, korean) = match (entry.text, entry.korean) {
            (Some(text), korean) => (text, korean),
            (None, Some(korean)) => (korean, None),
            (None, None) => return Vec::new(),
        };
        let with_advice = |text: String| match &entry.advice {
            Some(advice) => format!("{text}\n\n{advice}"),
            None => text,
        };

        let mut bodies: Vec<(Option<String>, String)> = Vec::new();
        match (self.config.korean_policy, korean) {
            (KoreanPolicy::Merge, Some(korean)) => {
                bodies.push((None, with_advice(format!("{primary}\n\n{korean}"))));
            }
            (KoreanPolicy::Separate, Some(korean)) => {
                bodies.push((None, with_advice(primary)));
                bodies.push((Some("ko".to_string()), korean));
            }
            _ => bodies.push((None, with_advice(primary))),
        }

        bodies
            .into_iter()
            .map(|(position, text)| {
                let doc = Document::new(
                    DocType::Rule,
                    Some(card_id.clone()),
                    &domain,
                    None,
                    position,
                    text,
                    self.rel,
                    &self.config.version,
                );
                let tags = [
                    format!("domain:{}", doc.domain),
                    format!("kind:{}", self.stem),
                ];
                doc.with_tags(tags).with_tags(&entry.tags)
            })
            .collect()
    }
}

/// Drop blank documents and duplicate texts, keeping the first occurrence.
///
/// A later document whose `doc_id` is already taken is dropped with a warning.
fn coalesce(raw: Vec<Document>) -> (Vec<Document>, usize, usize) {
    let mut seen_text = HashSet::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Document> = Vec::with_capacity(raw.len());
    let mut duplicates = 0;
    let mut conflicts = 0;

    for mut doc in raw {
        doc.text = doc.text.trim().to_string();
        if doc.text.is_empty() {
            continue;
        }
        if !seen_text.insert(doc.dedup_key()) {
            duplicates += 1;
            debug!("Coalesced duplicate text for {}", doc.doc_id);
            continue;
        }
        if let Some(&idx) = by_id.get(&doc.doc_id) {
            warn!(
                doc_id = %doc.doc_id,
                kept = %out[idx].source,
                "Dropping document from {}: doc_id already taken",
                doc.source
            );
            conflicts += 1;
            continue;
        }
        by_id.insert(doc.doc_id.clone(), out.len());
        out.push(doc);
    }

    (out, duplicates, conflicts)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn is_rule_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.starts_with("nodes_") || name.starts_with("edges_") {
        return false;
    }
    name.ends_with(".json") || name.ends_with(".csv")
}

fn relative_source(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_tarot_card(value: &Value) -> bool {
    value.get("meanings").is_some_and(Value::is_object)
}

fn is_combo(value: &Value) -> bool {
    value.get("cards").is_some_and(Value::is_array)
}

fn is_rule_value(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Object(map) => map.contains_key("text") || map.contains_key("korean"),
        _ => false,
    }
}

fn rule_entry_from_json(key: &str, value: &Value) -> RuleEntry {
    match value {
        Value::String(text) => RuleEntry {
            key: key.to_string(),
            text: Some(text.clone()),
            ..RuleEntry::default()
        },
        _ => RuleEntry {
            key: key.to_string(),
            text: str_field(value, "text"),
            korean: str_field(value, "korean"),
            advice: str_field(value, "advice"),
            domain: str_field(value, "domain"),
            tags: string_list(value.get("tags")),
        },
    }
}

fn str_field(value: &Value, name: &str) -> Option<String> {
    value
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(';').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Collect `(json_path, text)` for every non-blank string leaf.
fn collect_leaves(value: &Value, path: &str, out: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push((path.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_leaves(item, &format!("{path}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            // Key order must not depend on serde_json's preserve_order feature.
            let sorted: BTreeMap<_, _> = map.iter().collect();
            for (key, item) in sorted {
                collect_leaves(item, &format!("{path}.{key}"), out);
            }
        }
        _ => {}
    }
}

/// Lowercase identifier with runs of non-alphanumerics collapsed to `_`.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
