//! Engine configuration (`deckgen.yaml`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, ConvertResult};
use crate::ir::DefaultTable;
use crate::storage::Storage;

pub const CONFIG_FILE_NAME: &str = "deckgen.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    #[serde(default = "default_template_root")]
    pub template_root: PathBuf,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default)]
    pub defaults: DefaultTable,
    /// Abort the batch on the first failure.
    #[serde(default)]
    pub strict: bool,
}

fn default_source_root() -> PathBuf {
    PathBuf::from("source")
}

fn default_template_root() -> PathBuf {
    PathBuf::from("resources/templates")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            template_root: default_template_root(),
            output_root: default_output_root(),
            defaults: DefaultTable::default(),
            strict: false,
        }
    }
}

impl Config {
    /// Load a config file; relative roots resolve against its directory.
    pub fn load(storage: &dyn Storage, path: &Path) -> ConvertResult<Self> {
        let invalid = |detail: String| ConvertError::Config {
            path: path.to_path_buf(),
            detail,
        };
        let text = storage
            .read_to_string(path)
            .map_err(|e| invalid(format!("cannot read: {e}")))?;

        let mut config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&text).map_err(|e| invalid(e.to_string()))?
        };
        config.rebase(path.parent().unwrap_or(Path::new("")));
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn rebase(&mut self, base: &Path) {
        for root in [
            &mut self.source_root,
            &mut self.template_root,
            &mut self.output_root,
        ] {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::validation::EntryKind;

    #[test]
    fn roots_resolve_against_config_dir() {
        let storage = MemoryStorage::new();
        storage.insert(
            "project/deckgen.yaml",
            "source_root: defs\noutput_root: /tmp/out\ndefaults:\n  kind: paragraph\nstrict: true\n",
        );
        let config = Config::load(&storage, Path::new("project/deckgen.yaml")).unwrap();
        assert_eq!(config.source_root, PathBuf::from("project/defs"));
        assert_eq!(config.template_root, PathBuf::from("project/resources/templates"));
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(config.defaults.kind, EntryKind::Paragraph);
        assert!(config.defaults.group_from_key_prefix);
        assert!(config.strict);
    }

    #[test]
    fn empty_file_means_defaults() {
        let storage = MemoryStorage::new();
        storage.insert("deckgen.yaml", "");
        let config = Config::load(&storage, Path::new("deckgen.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        let storage = MemoryStorage::new();
        storage.insert("deckgen.yaml", "sources: x\n");
        let err = Config::load(&storage, Path::new("deckgen.yaml")).unwrap_err();
        assert!(matches!(err, ConvertError::Config { .. }));

        let err = Config::load(&storage, Path::new("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"), "{err}");
    }
}
