//! IR Builder - validated source to canonical, target-agnostic model
//!
//! Entries live in an arena indexed by declaration position. `defaults_from`
//! links are indices into that arena, resolved parents-first so inheritance
//! is transitive, and every chain is checked for cycles before any value is
//! inherited.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ConvertError, ConvertResult};
use crate::hashing::compute_hash;
use crate::validation::{EntryKind, SourceEntry, ValidatedDocument};

/// Placeholder names a template body may use.
pub const ENTRY_FIELDS: &[&str] = &[
    "key",
    "label",
    "kind",
    "group",
    "description",
    "mappings",
    "see",
    "see_labels",
    "position",
];

/// Placeholder names a template header, footer or output path may use.
pub const META_FIELDS: &[&str] = &["language", "edition", "component", "version"];

/// Fallback values for fields a source entry leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTable {
    #[serde(default = "default_kind")]
    pub kind: EntryKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mappings: Vec<String>,
    /// Derive a card's group from the letters leading its key (`VE2` -> `VE`).
    #[serde(default = "default_true")]
    pub group_from_key_prefix: bool,
    #[serde(default = "default_meta")]
    pub meta: BTreeMap<String, String>,
}

fn default_kind() -> EntryKind { EntryKind::Card }
fn default_true() -> bool { true }

fn default_meta() -> BTreeMap<String, String> {
    ["edition", "component", "version"]
        .into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect()
}

impl Default for DefaultTable {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            description: String::new(),
            mappings: vec![],
            group_from_key_prefix: true,
            meta: default_meta(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrEntry {
    pub key: String,
    pub label: String,
    pub kind: EntryKind,
    pub group: String,
    pub description: String,
    pub mappings: String,
    pub see: Vec<String>,
    pub see_labels: Vec<String>,
    /// 1-based declaration position.
    pub position: usize,
}

/// Ordering key for `sort_by`; integers compare numerically and sort first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Number(u64),
    Text(String),
}

impl IrEntry {
    pub fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        let value = match name {
            "key" => Cow::Borrowed(self.key.as_str()),
            "label" => Cow::Borrowed(self.label.as_str()),
            "kind" => Cow::Borrowed(self.kind.as_str()),
            "group" => Cow::Borrowed(self.group.as_str()),
            "description" => Cow::Borrowed(self.description.as_str()),
            "mappings" => Cow::Borrowed(self.mappings.as_str()),
            "see" => Cow::Owned(self.see.join(", ")),
            "see_labels" => Cow::Owned(self.see_labels.join(", ")),
            "position" => Cow::Owned(self.position.to_string()),
            _ => return None,
        };
        Some(value)
    }

    pub fn sort_key(&self, name: &str) -> Option<SortKey> {
        if name == "position" {
            return Some(SortKey::Number(self.position as u64));
        }
        let text = self.field(name)?;
        Some(match text.parse::<u64>() {
            Ok(n) => SortKey::Number(n),
            Err(_) => SortKey::Text(text.into_owned()),
        })
    }
}

/// Canonical model of one language; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ir {
    language: String,
    meta: BTreeMap<String, String>,
    entries: Vec<IrEntry>,
}

impl Ir {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn entries(&self) -> &[IrEntry] {
        &self.entries
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn meta_field(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    pub fn entry(&self, key: &str) -> Option<&IrEntry> {
        let key = canonical_key(key);
        self.entries.iter().find(|e| e.key == key)
    }

    /// SHA-256 over the canonical JSON form.
    pub fn fingerprint(&self) -> ConvertResult<String> {
        Ok(compute_hash(self)?)
    }
}

/// Values an entry hands down to entries that default from it.
#[derive(Debug, Clone)]
struct Resolved {
    kind: EntryKind,
    group: String,
    description: String,
    mappings: Vec<String>,
}

pub struct IrBuilder {
    defaults: DefaultTable,
}

impl IrBuilder {
    pub fn new(defaults: DefaultTable) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &DefaultTable {
        &self.defaults
    }

    pub fn build(&self, doc: &ValidatedDocument) -> ConvertResult<Ir> {
        let language = doc.language.as_str();
        let entries = &doc.entries;
        let keys: Vec<String> = entries.iter().map(|e| canonical_key(&e.key)).collect();

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            index.entry(key.as_str()).or_insert(i);
        }
        let lookup = |from: usize, target: &str, relation: &str| {
            index
                .get(canonical_key(target).as_str())
                .copied()
                .ok_or_else(|| ConvertError::Resolution {
                    language: language.to_string(),
                    detail: format!(
                        "entry `{}` {relation} unknown entry `{}`",
                        keys[from],
                        canonical_key(target)
                    ),
                })
        };

        let mut parents = Vec::with_capacity(entries.len());
        let mut see = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            parents.push(match &entry.defaults_from {
                Some(target) => Some(lookup(i, target.as_str(), "defaults from")?),
                None => None,
            });
            see.push(
                entry
                    .see
                    .iter()
                    .flatten()
                    .map(|target| lookup(i, target.as_str(), "refers to"))
                    .collect::<ConvertResult<Vec<_>>>()?,
            );
        }

        let order = resolution_order(&parents).map_err(|cycle| ConvertError::Resolution {
            language: language.to_string(),
            detail: format!(
                "cyclic defaults_from chain: {}",
                cycle
                    .iter()
                    .map(|&i| keys[i].as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            ),
        })?;

        let mut resolved: Vec<Option<Resolved>> = vec![None; entries.len()];
        for i in order {
            let parent = parents[i].and_then(|p| resolved[p].as_ref());
            let values = self.resolve_entry(language, &keys[i], &entries[i], parent)?;
            resolved[i] = Some(values);
        }

        let labels: Vec<String> = entries.iter().map(|e| normalize_text(&e.label)).collect();
        let mut ir_entries = Vec::with_capacity(entries.len());
        for (i, values) in resolved.into_iter().enumerate() {
            // Every index appears in the resolution order.
            let Some(values) = values else { continue };
            ir_entries.push(IrEntry {
                key: keys[i].clone(),
                label: labels[i].clone(),
                kind: values.kind,
                group: values.group,
                description: normalize_text(&values.description),
                mappings: normalize_mappings(&values.mappings),
                see: see[i].iter().map(|&j| keys[j].clone()).collect(),
                see_labels: see[i].iter().map(|&j| labels[j].clone()).collect(),
                position: i + 1,
            });
        }

        let mut meta = BTreeMap::new();
        for (key, value) in self.defaults.meta.iter().chain(doc.meta.iter()) {
            let key = key.trim().to_ascii_lowercase();
            if META_FIELDS.contains(&key.as_str()) {
                meta.insert(key, value.trim().nfc().collect());
            }
        }
        meta.insert("language".to_string(), doc.language.clone());

        let ir = Ir {
            language: doc.language.clone(),
            meta,
            entries: ir_entries,
        };
        let fingerprint = ir.fingerprint()?;
        tracing::info!(language, entries = ir.entries.len(), %fingerprint, "IR built");
        Ok(ir)
    }

    fn resolve_entry(
        &self,
        language: &str,
        key: &str,
        entry: &SourceEntry,
        parent: Option<&Resolved>,
    ) -> ConvertResult<Resolved> {
        let kind = entry
            .kind
            .or(parent.map(|p| p.kind))
            .unwrap_or(self.defaults.kind);
        let description = entry
            .description
            .clone()
            .or_else(|| parent.map(|p| p.description.clone()))
            .unwrap_or_else(|| self.defaults.description.clone());
        let mappings = entry
            .mappings
            .clone()
            .or_else(|| parent.map(|p| p.mappings.clone()))
            .unwrap_or_else(|| self.defaults.mappings.clone());

        let inherited_group = parent.map(|p| p.group.clone()).filter(|g| !g.is_empty());
        let group = match (&entry.group, kind) {
            (Some(group), _) => canonical_key(group),
            (None, EntryKind::Suit) => key.to_string(),
            (None, EntryKind::Paragraph) => String::new(),
            (None, EntryKind::Card) => match inherited_group {
                Some(group) => group,
                None => self.infer_group(language, key)?,
            },
        };

        Ok(Resolved {
            kind,
            group,
            description,
            mappings,
        })
    }

    fn infer_group(&self, language: &str, key: &str) -> ConvertResult<String> {
        let conflict = |detail: &str| ConvertError::DefaultConflict {
            language: language.to_string(),
            key: key.to_string(),
            field: "group".to_string(),
            detail: detail.to_string(),
        };
        if !self.defaults.group_from_key_prefix {
            return Err(conflict(
                "card entries need a group and key-prefix inference is disabled",
            ));
        }
        let prefix: String = key.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        if prefix.is_empty() {
            return Err(conflict(
                "card entries need a group and the key has no letter prefix",
            ));
        }
        Ok(prefix)
    }
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new(DefaultTable::default())
    }
}

pub fn canonical_key(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Order entries so every parent comes before its children.
///
/// Roots are visited in declaration order. On a cycle, returns the chain from
/// the first repeated entry back to itself.
fn resolution_order(parents: &[Option<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; parents.len()];
    let mut order = Vec::with_capacity(parents.len());

    for start in 0..parents.len() {
        let mut path = vec![];
        let mut current = Some(start);
        while let Some(i) = current {
            match marks[i] {
                Mark::Done => break,
                Mark::InProgress => {
                    let from = path.iter().position(|&p| p == i).unwrap_or(0);
                    let mut cycle = path[from..].to_vec();
                    cycle.push(i);
                    return Err(cycle);
                }
                Mark::Unvisited => {
                    marks[i] = Mark::InProgress;
                    path.push(i);
                    current = parents[i];
                }
            }
        }
        for &i in path.iter().rev() {
            marks[i] = Mark::Done;
            order.push(i);
        }
    }
    Ok(order)
}

/// Fold line breaks to LF, strip trailing whitespace per line, trim the ends,
/// then compose to NFC so decomposed accents hash like precomposed ones.
pub fn normalize_text(text: &str) -> String {
    let unified = text
        .replace("\r\n", "\n")
        .replace(['\r', '\u{2028}'], "\n");
    unified
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .nfc()
        .collect()
}

/// Canonical text for a list of mapping references.
///
/// All-numeric lists are sorted, de-duplicated and collapsed into ranges
/// (`3, 1, 2, 7` -> `1-3, 7`); anything else keeps first-seen order.
pub fn normalize_mappings(items: &[String]) -> String {
    let items: Vec<String> = items
        .iter()
        .map(|s| s.trim().nfc().collect::<String>())
        .filter(|s| !s.is_empty())
        .collect();

    let numbers: Option<Vec<u64>> = items
        .iter()
        .map(|s| {
            if s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        })
        .collect();

    match numbers {
        Some(mut numbers) if !numbers.is_empty() => {
            numbers.sort_unstable();
            numbers.dedup();
            group_number_ranges(&numbers).join(", ")
        }
        _ => {
            let mut seen: Vec<&str> = Vec::with_capacity(items.len());
            for item in &items {
                if !seen.contains(&item.as_str()) {
                    seen.push(item);
                }
            }
            seen.join(", ")
        }
    }
}

fn group_number_ranges(sorted: &[u64]) -> Vec<String> {
    let mut ranges = vec![];
    let mut iter = sorted.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(next) = end.checked_add(1).filter(|n| iter.peek() == Some(n)) {
            end = next;
            iter.next();
        }
        ranges.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    ranges
}
