//! Schema Validator - Rule/Result Separation
//!
//! Rules produce structured violations; the validator runs every rule and
//! only hands out a typed document when none of them objected.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{ConvertError, ConvertResult, SchemaViolation};
use crate::source::{canonical_language, SourceDocument};

static KEY_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Card,
    Suit,
    Paragraph,
}

impl EntryKind {
    pub const NAMES: &'static [&'static str] = &["card", "suit", "paragraph"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Some(EntryKind::Card),
            "suit" => Some(EntryKind::Suit),
            "paragraph" => Some(EntryKind::Paragraph),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Card => "card",
            EntryKind::Suit => "suit",
            EntryKind::Paragraph => "paragraph",
        }
    }
}

/// Tagged kind of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Key,
    Text,
    TextList,
    KeyList,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldKind {
    pub fn expected(&self) -> String {
        match self {
            FieldKind::Key => "key".into(),
            FieldKind::Text => "text".into(),
            FieldKind::TextList => "text or list of text".into(),
            FieldKind::KeyList => "list of keys".into(),
            FieldKind::Enum(allowed) => format!("one of: {}", allowed.join(", ")),
        }
    }

    /// Check `value` against this kind; the error is a description of what
    /// was found instead.
    pub fn coerce(&self, value: &Value) -> Result<FieldValue, String> {
        match self {
            FieldKind::Text => scalar_text(value).map(FieldValue::Text),
            FieldKind::Key => key_text(value).map(FieldValue::Text),
            FieldKind::Enum(allowed) => {
                let text = scalar_text(value)?;
                let lowered = text.trim().to_ascii_lowercase();
                if allowed.contains(&lowered.as_str()) {
                    Ok(FieldValue::Text(lowered))
                } else {
                    Err(format!("{text:?}"))
                }
            }
            FieldKind::TextList => match value {
                Value::Sequence(items) => items
                    .iter()
                    .map(scalar_text)
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::List),
                other => scalar_text(other).map(|s| FieldValue::List(vec![s])),
            },
            FieldKind::KeyList => match value {
                Value::Sequence(items) => items
                    .iter()
                    .map(key_text)
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::List),
                other => Err(describe(other)),
            },
        }
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(describe(other)),
    }
}

fn key_text(value: &Value) -> Result<String, String> {
    let text = scalar_text(value)?;
    if KEY_SHAPE.is_match(text.trim()) {
        Ok(text.trim().to_string())
    } else {
        Err(format!("{text:?}"))
    }
}

/// Short human description of a YAML value for violation reports.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("{s:?}"),
        Value::Sequence(_) => "sequence".into(),
        Value::Mapping(_) => "mapping".into(),
        Value::Tagged(t) => format!("tagged value {}", t.tag),
    }
}

pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Schema every source entry is checked against.
pub const ENTRY_SCHEMA: &[FieldSpec] = &[
    FieldSpec { name: "key", kind: FieldKind::Key, required: true },
    FieldSpec { name: "label", kind: FieldKind::Text, required: true },
    FieldSpec { name: "kind", kind: FieldKind::Enum(EntryKind::NAMES), required: false },
    FieldSpec { name: "group", kind: FieldKind::Key, required: false },
    FieldSpec { name: "description", kind: FieldKind::Text, required: false },
    FieldSpec { name: "mappings", kind: FieldKind::TextList, required: false },
    FieldSpec { name: "see", kind: FieldKind::KeyList, required: false },
    FieldSpec { name: "defaults_from", kind: FieldKind::Key, required: false },
];

pub const META_KEYS: &[&str] = &["edition", "component", "language", "version"];

/// A source entry whose fields all have the right shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceEntry {
    pub key: String,
    pub label: String,
    pub kind: Option<EntryKind>,
    pub group: Option<String>,
    pub description: Option<String>,
    pub mappings: Option<Vec<String>>,
    pub see: Option<Vec<String>>,
    pub defaults_from: Option<String>,
}

impl SourceEntry {
    fn from_mapping(mapping: &Mapping) -> Option<Self> {
        let mut fields: HashMap<&'static str, FieldValue> = HashMap::new();
        for spec in ENTRY_SCHEMA {
            if let Some(value) = mapping.get(spec.name) {
                fields.insert(spec.name, spec.kind.coerce(value).ok()?);
            }
        }

        Some(SourceEntry {
            key: take_text(&mut fields, "key")?,
            label: take_text(&mut fields, "label")?,
            kind: take_text(&mut fields, "kind").and_then(|k| EntryKind::parse(&k)),
            group: take_text(&mut fields, "group"),
            description: take_text(&mut fields, "description"),
            mappings: take_list(&mut fields, "mappings"),
            see: take_list(&mut fields, "see"),
            defaults_from: take_text(&mut fields, "defaults_from"),
        })
    }
}

fn take_text(fields: &mut HashMap<&'static str, FieldValue>, name: &str) -> Option<String> {
    match fields.remove(name) {
        Some(FieldValue::Text(s)) => Some(s),
        _ => None,
    }
}

fn take_list(fields: &mut HashMap<&'static str, FieldValue>, name: &str) -> Option<Vec<String>> {
    match fields.remove(name) {
        Some(FieldValue::List(l)) => Some(l),
        _ => None,
    }
}

/// A source document that passed every schema rule.
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub language: String,
    pub path: PathBuf,
    pub meta: BTreeMap<String, String>,
    pub entries: Vec<SourceEntry>,
}

#[derive(Debug, Clone)]
pub enum ValidationResult {
    Valid(ValidatedDocument),
    Invalid(Vec<SchemaViolation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            ValidationResult::Valid(_) => &[],
            ValidationResult::Invalid(v) => v,
        }
    }

    pub fn into_result(self, language: &str) -> ConvertResult<ValidatedDocument> {
        match self {
            ValidationResult::Valid(doc) => Ok(doc),
            ValidationResult::Invalid(violations) => Err(ConvertError::Validation {
                language: language.to_string(),
                violations,
            }),
        }
    }
}

/// Schema rule trait - produces violations
pub trait SchemaRule {
    fn name(&self) -> &'static str;
    fn check(&self, doc: &SourceDocument) -> Vec<SchemaViolation>;
}

fn entry_key(entry: &Value) -> Option<String> {
    entry
        .get("key")
        .and_then(|k| scalar_text(k).ok())
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

// --- Concrete Rules ---

pub struct MetaRule;

impl SchemaRule for MetaRule {
    fn name(&self) -> &'static str { "meta" }

    fn check(&self, doc: &SourceDocument) -> Vec<SchemaViolation> {
        let violation = |path: String, expected: String, actual: String| SchemaViolation {
            rule: self.name().to_string(),
            path,
            entry: None,
            expected,
            actual,
        };

        let meta = match &doc.meta {
            None | Some(Value::Null) => return vec![],
            Some(Value::Mapping(m)) => m,
            Some(other) => return vec![violation("meta".into(), "mapping".into(), describe(other))],
        };

        let mut violations = vec![];
        for (key, value) in meta {
            let name = match key.as_str() {
                Some(name) if META_KEYS.contains(&name) => name,
                _ => {
                    violations.push(violation(
                        format!("meta.{}", scalar_text(key).unwrap_or_else(|d| d)),
                        format!("one of: {}", META_KEYS.join(", ")),
                        "unknown meta key".into(),
                    ));
                    continue;
                }
            };
            match scalar_text(value) {
                Err(actual) => {
                    violations.push(violation(format!("meta.{name}"), "text".into(), actual));
                }
                Ok(language) if name == "language" => {
                    if canonical_language(&language) != doc.language {
                        violations.push(violation(
                            "meta.language".into(),
                            format!("language `{}`", doc.language),
                            format!("{language:?}"),
                        ));
                    }
                }
                Ok(_) => {}
            }
        }
        violations
    }
}

pub struct EntryFieldsRule;

impl SchemaRule for EntryFieldsRule {
    fn name(&self) -> &'static str { "entry_fields" }

    fn check(&self, doc: &SourceDocument) -> Vec<SchemaViolation> {
        let mut violations = vec![];

        for (i, entry) in doc.entries.iter().enumerate() {
            let key = entry_key(entry);
            let Value::Mapping(mapping) = entry else {
                violations.push(SchemaViolation {
                    rule: self.name().to_string(),
                    path: format!("entries[{i}]"),
                    entry: None,
                    expected: "mapping".into(),
                    actual: describe(entry),
                });
                continue;
            };

            for spec in ENTRY_SCHEMA {
                let outcome = match mapping.get(spec.name) {
                    None if spec.required => Err("<missing>".to_string()),
                    None => continue,
                    Some(value) => spec.kind.coerce(value).map(|_| ()),
                };
                if let Err(actual) = outcome {
                    violations.push(SchemaViolation {
                        rule: self.name().to_string(),
                        path: format!("entries[{i}].{}", spec.name),
                        entry: key.clone(),
                        expected: spec.kind.expected(),
                        actual,
                    });
                }
            }

            for (field, _) in mapping {
                let known = field
                    .as_str()
                    .map_or(false, |f| ENTRY_SCHEMA.iter().any(|s| s.name == f));
                if !known {
                    violations.push(SchemaViolation {
                        rule: self.name().to_string(),
                        path: format!("entries[{i}].{}", scalar_text(field).unwrap_or_else(|d| d)),
                        entry: key.clone(),
                        expected: "known field".into(),
                        actual: "unknown field".into(),
                    });
                }
            }
        }
        violations
    }
}

pub struct DuplicateKeyRule;

impl SchemaRule for DuplicateKeyRule {
    fn name(&self) -> &'static str { "duplicate_keys" }

    fn check(&self, doc: &SourceDocument) -> Vec<SchemaViolation> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut violations = vec![];

        for (i, entry) in doc.entries.iter().enumerate() {
            let Some(key) = entry_key(entry) else { continue };
            let canonical = key.to_ascii_uppercase();
            if let Some(first) = first_seen.get(&canonical) {
                violations.push(SchemaViolation {
                    rule: self.name().to_string(),
                    path: format!("entries[{i}].key"),
                    entry: Some(key),
                    expected: "unique key".into(),
                    actual: format!("duplicate of entries[{first}]"),
                });
            } else {
                first_seen.insert(canonical, i);
            }
        }
        violations
    }
}

/// Validator runs every rule and collects every violation
pub struct Validator {
    rules: Vec<Box<dyn SchemaRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(MetaRule),
                Box::new(EntryFieldsRule),
                Box::new(DuplicateKeyRule),
            ],
        }
    }

    pub fn validate(&self, doc: &SourceDocument) -> ValidationResult {
        let mut all_violations = vec![];
        for rule in &self.rules {
            all_violations.extend(rule.check(doc));
        }

        if !all_violations.is_empty() {
            tracing::warn!(
                language = %doc.language,
                count = all_violations.len(),
                violations = ?all_violations.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                "validation failed"
            );
            return ValidationResult::Invalid(all_violations);
        }

        match typed_document(doc) {
            Some(validated) => ValidationResult::Valid(validated),
            // Only reachable if a custom rule set skips the shape checks.
            None => ValidationResult::Invalid(vec![SchemaViolation {
                rule: "typed_document".into(),
                path: "entries".into(),
                entry: None,
                expected: "well-typed entries".into(),
                actual: "entry outside the schema".into(),
            }]),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn typed_document(doc: &SourceDocument) -> Option<ValidatedDocument> {
    let entries = doc
        .entries
        .iter()
        .map(|e| e.as_mapping().and_then(SourceEntry::from_mapping))
        .collect::<Option<Vec<_>>>()?;

    let mut meta = BTreeMap::new();
    if let Some(Value::Mapping(m)) = &doc.meta {
        for (key, value) in m {
            meta.insert(key.as_str()?.to_string(), scalar_text(value).ok()?);
        }
    }

    Some(ValidatedDocument {
        language: doc.language.clone(),
        path: doc.path.clone(),
        meta,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_document;
    use std::path::Path;

    fn doc(yaml: &str) -> SourceDocument {
        parse_document("fr", Path::new("source/fr.yaml"), yaml.as_bytes()).unwrap()
    }

    #[test]
    fn valid_document_is_typed() {
        let result = Validator::new().validate(&doc(
            "meta:\n  version: 1.22\nentries:\n  - key: VE2\n    label: Deux\n    kind: Card\n    mappings: [3, 1]\n",
        ));
        let ValidationResult::Valid(validated) = result else {
            panic!("expected valid document");
        };
        assert_eq!(validated.meta["version"], "1.22");
        let entry = &validated.entries[0];
        assert_eq!(entry.kind, Some(EntryKind::Card));
        assert_eq!(entry.mappings, Some(vec!["3".to_string(), "1".to_string()]));
    }

    #[test]
    fn missing_label_is_one_violation() {
        let result = Validator::new().validate(&doc(
            "entries:\n  - key: A\n    label: Alpha\n  - key: B\n",
        ));
        let violations = result.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "entries[1].label");
        assert_eq!(violations[0].entry.as_deref(), Some("B"));
        assert_eq!(violations[0].actual, "<missing>");
    }

    #[test]
    fn every_violation_is_reported() {
        let result = Validator::new().validate(&doc(concat!(
            "meta:\n  language: es\n  colour: red\n",
            "entries:\n",
            "  - key: A\n    label: [x]\n    kind: joker\n",
            "  - key: a\n    label: dup\n    extra: 1\n",
            "  - just text\n",
            "  - key: 'bad key'\n    label: L\n    see: A\n",
        )));
        let paths: Vec<_> = result.violations().iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "meta.language",
                "meta.colour",
                "entries[0].label",
                "entries[0].kind",
                "entries[1].extra",
                "entries[2]",
                "entries[3].key",
                "entries[3].see",
                "entries[1].key",
            ]
        );
    }

    #[test]
    fn invalid_result_converts_to_error() {
        let result = Validator::new().validate(&doc("entries:\n  - label: x\n"));
        assert!(!result.is_valid());
        let err = result.into_result("fr").unwrap_err();
        assert!(matches!(err, ConvertError::Validation { ref violations, .. } if violations.len() == 1));
    }

    #[test]
    fn meta_language_accepts_underscored_form() {
        let parsed = parse_document(
            "pt-br",
            Path::new("source/pt_br.yaml"),
            b"meta:\n  language: PT_BR\nentries: []\n",
        )
        .unwrap();
        assert!(Validator::new().validate(&parsed).is_valid());
    }
}
