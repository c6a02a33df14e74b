//! Source Loader - one YAML definition per language
//!
//! Sources live at `<source_root>/<language>.yaml`. Discovery builds a
//! `SourceIndex`; loading turns one indexed file into a raw `SourceDocument`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

use crate::error::{ConvertError, ConvertResult};
use crate::storage::Storage;

static LANGUAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[a-z0-9]{2,8})?$").unwrap());

const SOURCE_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Lower-case a language identifier and fold `_` to `-`.
pub fn canonical_language(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('_', "-")
}

pub fn is_valid_language(id: &str) -> bool {
    LANGUAGE_ID.is_match(id)
}

/// Raw per-language document, exactly as deserialized.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub language: String,
    pub path: PathBuf,
    pub entries: Vec<Value>,
    pub meta: Option<Value>,
}

/// Languages discovered under a source root.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    root: PathBuf,
    sources: BTreeMap<String, Vec<PathBuf>>,
}

impl SourceIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: BTreeMap::new(),
        }
    }

    /// Scan `root` for files following the `<language>.yaml` convention.
    pub fn discover(storage: &dyn Storage, root: &Path) -> ConvertResult<Self> {
        let mut index = Self::new(root);
        let files = match storage.list(root) {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(root = %root.display(), "source root does not exist");
                return Ok(index);
            }
            Err(e) => {
                return Err(ConvertError::MalformedInput {
                    path: root.to_path_buf(),
                    detail: format!("cannot list source root: {e}"),
                })
            }
        };

        for path in files {
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| SOURCE_EXTENSIONS.contains(&e));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let language = canonical_language(stem);
            if !is_source || !is_valid_language(&language) {
                tracing::debug!(path = %path.display(), "skipping file outside source naming convention");
                continue;
            }
            index.insert(language, path);
        }
        Ok(index)
    }

    pub fn insert(&mut self, language: impl Into<String>, path: impl Into<PathBuf>) {
        self.sources
            .entry(language.into())
            .or_default()
            .push(path.into());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every known language, sorted.
    pub fn languages(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// The single source path for `language`.
    pub fn locate(&self, language: &str) -> ConvertResult<&Path> {
        if !is_valid_language(language) {
            return Err(ConvertError::NotFound {
                language: language.to_string(),
                detail: "identifier does not match the language naming convention".into(),
            });
        }
        match self.sources.get(language).map(Vec::as_slice) {
            None | Some([]) => Err(ConvertError::NotFound {
                language: language.to_string(),
                detail: format!("no {language}.yaml under {}", self.root.display()),
            }),
            Some([path]) => Ok(path),
            Some(paths) => Err(ConvertError::MalformedInput {
                path: paths[0].clone(),
                detail: format!(
                    "multiple source definitions for `{language}`: {}",
                    paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }
}

/// Reads and deserializes source definitions.
pub struct SourceLoader<'a> {
    storage: &'a dyn Storage,
    index: &'a SourceIndex,
}

impl<'a> SourceLoader<'a> {
    pub fn new(storage: &'a dyn Storage, index: &'a SourceIndex) -> Self {
        Self { storage, index }
    }

    pub fn load(&self, language: &str) -> ConvertResult<SourceDocument> {
        let path = self.index.locate(language)?;
        let bytes = self.storage.read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ConvertError::NotFound {
                    language: language.to_string(),
                    detail: format!("{} disappeared", path.display()),
                }
            } else {
                ConvertError::MalformedInput {
                    path: path.to_path_buf(),
                    detail: format!("cannot read: {e}"),
                }
            }
        })?;
        let doc = parse_document(language, path, &bytes)?;
        tracing::debug!(
            language,
            path = %path.display(),
            entries = doc.entries.len(),
            "source document loaded"
        );
        Ok(doc)
    }
}

/// Deserialize raw bytes into a `SourceDocument`.
pub fn parse_document(language: &str, path: &Path, bytes: &[u8]) -> ConvertResult<SourceDocument> {
    let malformed = |detail: String| ConvertError::MalformedInput {
        path: path.to_path_buf(),
        detail,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| malformed(format!("not UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let value: Value = serde_yaml::from_str(text).map_err(|e| malformed(e.to_string()))?;
    let Value::Mapping(mut root) = value else {
        return Err(malformed("top level must be a mapping".into()));
    };

    let entries = match root.remove("entries") {
        Some(Value::Sequence(entries)) => entries,
        Some(_) => return Err(malformed("`entries` must be a sequence".into())),
        None => return Err(malformed("missing `entries` section".into())),
    };
    let meta = root.remove("meta");

    for (key, _) in &root {
        tracing::warn!(
            path = %path.display(),
            section = ?key,
            "ignoring unknown top-level section"
        );
    }

    Ok(SourceDocument {
        language: language.to_string(),
        path: path.to_path_buf(),
        entries,
        meta,
    })
}
