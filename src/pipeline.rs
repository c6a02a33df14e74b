//! Conversion Pipeline - Batch Driver
//!
//! Every language goes Loader -> Validator -> IR Builder exactly once; the
//! resulting IR is rendered against each requested target. Failures are
//! recorded per (language, target) pair unless the request is strict.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ConvertError, ConvertResult, ErrorKind, SchemaViolation};
use crate::hashing::compute_hash;
use crate::ir::{Ir, IrBuilder};
use crate::output::{OutputWriter, WriteOutcome, WriteStatus};
use crate::render::Renderer;
use crate::source::{canonical_language, SourceIndex, SourceLoader};
use crate::storage::Storage;
use crate::templates::{Template, TemplateRegistry};
use crate::validation::Validator;
use crate::ENGINE_VERSION;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// `all`, or an explicit list with duplicates removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Only(Vec<String>),
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut items: Vec<String> = vec![];
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if item.eq_ignore_ascii_case("all") {
                return Ok(Selection::All);
            }
            if !items.iter().any(|i| i == item) {
                items.push(item.to_string());
            }
        }
        if items.is_empty() {
            return Err("empty selection; use `all` or a comma-separated list".into());
        }
        Ok(Selection::Only(items))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRequest {
    pub languages: Selection,
    pub targets: Selection,
    /// Abort on the first failure instead of recording it.
    pub strict: bool,
    /// Compare against existing outputs instead of writing.
    pub check: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PairResult {
    Success {
        template_version: String,
        path: PathBuf,
        sha256: String,
        status: WriteStatus,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PairOutcome {
    pub language: String,
    pub target: String,
    #[serde(flatten)]
    pub result: PairResult,
}

impl PairOutcome {
    fn failure(language: &str, target: &str, error: &ConvertError) -> Self {
        Self {
            language: language.to_string(),
            target: target.to_string(),
            result: PairResult::Failure {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, PairResult::Success { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(
            self.result,
            PairResult::Success {
                status: WriteStatus::Stale,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LanguageStatus {
    Built {
        entries: usize,
        fingerprint: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        violations: Vec<SchemaViolation>,
    },
}

/// How one language's IR build went.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageSummary {
    pub language: String,
    #[serde(flatten)]
    pub status: LanguageStatus,
}

impl LanguageSummary {
    fn built(ir: &Ir) -> ConvertResult<Self> {
        Ok(Self {
            language: ir.language().to_string(),
            status: LanguageStatus::Built {
                entries: ir.entries().len(),
                fingerprint: ir.fingerprint()?,
            },
        })
    }

    fn failed(language: &str, error: &ConvertError) -> Self {
        let violations = match error {
            ConvertError::Validation { violations, .. } => violations.clone(),
            _ => vec![],
        };
        Self {
            language: language.to_string(),
            status: LanguageStatus::Failed {
                kind: error.kind(),
                message: error.to_string(),
                violations,
            },
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self.status, LanguageStatus::Built { .. })
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match &self.status {
            LanguageStatus::Built { fingerprint, .. } => Some(fingerprint),
            LanguageStatus::Failed { .. } => None,
        }
    }
}

/// Everything one batch attempted, in (language, target) request order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub output_root: PathBuf,
    pub languages: Vec<LanguageSummary>,
    pub outcomes: Vec<PairOutcome>,
}

impl BatchResult {
    /// No failures and nothing stale.
    pub fn is_clean(&self) -> bool {
        self.languages.iter().all(LanguageSummary::is_built)
            && self.outcomes.iter().all(|o| o.is_success() && !o.is_stale())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn stale(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| o.is_stale())
    }

    pub fn manifest(&self) -> ConvertResult<Manifest> {
        let mut artifacts: Vec<ManifestEntry> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.result {
                PairResult::Success {
                    template_version,
                    path,
                    sha256,
                    ..
                } => Some(ManifestEntry {
                    language: o.language.clone(),
                    target: o.target.clone(),
                    template_version: template_version.clone(),
                    path: manifest_path(&self.output_root, path),
                    sha256: sha256.clone(),
                }),
                PairResult::Failure { .. } => None,
            })
            .collect();
        artifacts.sort_by(|a, b| (&a.language, &a.target).cmp(&(&b.language, &b.target)));

        let mut manifest = Manifest {
            engine_version: ENGINE_VERSION.to_string(),
            artifacts,
            manifest_hash: String::new(),
        };
        // Hash covers everything above; computed last.
        manifest.manifest_hash = compute_hash(&manifest)?;
        Ok(manifest)
    }
}

fn manifest_path(output_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(output_root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub language: String,
    pub target: String,
    pub template_version: String,
    /// Relative to the output root, `/`-separated.
    pub path: String,
    pub sha256: String,
}

/// Reproducible record of a batch's artifacts; no timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub engine_version: String,
    pub artifacts: Vec<ManifestEntry>,
    pub manifest_hash: String,
}

impl Manifest {
    pub fn to_json(&self) -> ConvertResult<String> {
        Ok(serde_json::to_string_pretty(self)? + "\n")
    }
}

/// The conversion pipeline - single entry point for batch runs
pub struct ConversionPipeline<'s> {
    storage: &'s dyn Storage,
    sources: SourceIndex,
    registry: TemplateRegistry,
    validator: Validator,
    builder: IrBuilder,
    renderer: Renderer,
}

impl<'s> ConversionPipeline<'s> {
    pub fn new(
        storage: &'s dyn Storage,
        sources: SourceIndex,
        registry: TemplateRegistry,
        builder: IrBuilder,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            sources,
            registry,
            validator: Validator::new(),
            builder,
            renderer: Renderer::new(output_root),
        }
    }

    /// Discover sources and load every template under the configured roots.
    ///
    /// Template failures are fatal here, before any language is touched.
    pub fn from_config(storage: &'s dyn Storage, config: &Config) -> ConvertResult<Self> {
        let registry = TemplateRegistry::load_from_dir(storage, &config.template_root)?;
        let sources = SourceIndex::discover(storage, &config.source_root)?;
        Ok(Self::new(
            storage,
            sources,
            registry,
            IrBuilder::new(config.defaults.clone()),
            &config.output_root,
        ))
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &SourceIndex {
        &self.sources
    }

    pub fn output_root(&self) -> &Path {
        self.renderer.output_root()
    }

    /// Templates for the requested targets; any unknown target is fatal.
    pub fn resolve_targets(&self, targets: &Selection) -> ConvertResult<Vec<&Template>> {
        match targets {
            Selection::All => self
                .registry
                .targets()
                .into_iter()
                .map(|t| self.registry.get(t))
                .collect(),
            Selection::Only(ids) => ids.iter().map(|t| self.registry.get(t.trim())).collect(),
        }
    }

    /// Canonical language identifiers in request order.
    ///
    /// `all` over a source root with no definitions is `NotFound`, so an
    /// empty or mistyped root never passes as a clean run.
    pub fn resolve_languages(&self, languages: &Selection) -> ConvertResult<Vec<String>> {
        match languages {
            Selection::All => {
                let found: Vec<String> =
                    self.sources.languages().into_iter().map(String::from).collect();
                if found.is_empty() {
                    tracing::error!(root = %self.sources.root().display(), "no source definitions found");
                    return Err(ConvertError::NotFound {
                        language: "all".to_string(),
                        detail: format!("no source definitions under {}", self.sources.root().display()),
                    });
                }
                Ok(found)
            }
            Selection::Only(ids) => {
                let mut resolved: Vec<String> = vec![];
                for id in ids {
                    let id = canonical_language(id);
                    if !resolved.contains(&id) {
                        resolved.push(id);
                    }
                }
                Ok(resolved)
            }
        }
    }

    /// Load, validate and build the IR for one language.
    pub fn build_ir(&self, language: &str) -> ConvertResult<Ir> {
        let doc = SourceLoader::new(self.storage, &self.sources).load(language)?;
        let validated = self.validator.validate(&doc).into_result(language)?;
        self.builder.build(&validated)
    }

    /// Build the IR of every selected language without rendering anything.
    pub fn validate(&self, languages: &Selection) -> ConvertResult<Vec<LanguageSummary>> {
        self.resolve_languages(languages)?
            .iter()
            .map(|language| match self.build_ir(language) {
                Ok(ir) => LanguageSummary::built(&ir),
                Err(err) => Ok(LanguageSummary::failed(language, &err)),
            })
            .collect()
    }

    pub fn run(&self, request: &BatchRequest) -> ConvertResult<BatchResult> {
        let templates = self.resolve_targets(&request.targets)?;
        let languages = self.resolve_languages(&request.languages)?;
        let writer = OutputWriter::new(self.storage, request.check);
        let mut result = BatchResult {
            output_root: self.output_root().to_path_buf(),
            ..Default::default()
        };

        tracing::info!(
            languages = languages.len(),
            targets = templates.len(),
            strict = request.strict,
            check = request.check,
            "batch started"
        );

        for language in &languages {
            let ir = match self.build_ir(language) {
                Ok(ir) => ir,
                Err(err) if request.strict => return Err(err),
                Err(err) => {
                    tracing::warn!(language = %language, error = %err, "language failed; skipping its targets");
                    result.languages.push(LanguageSummary::failed(language, &err));
                    for template in &templates {
                        result
                            .outcomes
                            .push(PairOutcome::failure(language, &template.target, &err));
                    }
                    continue;
                }
            };
            result.languages.push(LanguageSummary::built(&ir)?);

            for template in &templates {
                let written = self
                    .renderer
                    .render(&ir, template)
                    .and_then(|artifact| writer.write(&artifact));
                match written {
                    Ok(outcome) => result.outcomes.push(success(language, template, outcome)),
                    Err(err) if request.strict => return Err(err),
                    Err(err) => {
                        tracing::error!(
                            language = %language,
                            target_id = %template.target,
                            error = %err,
                            "artifact failed"
                        );
                        result
                            .outcomes
                            .push(PairOutcome::failure(language, &template.target, &err));
                    }
                }
            }
        }

        tracing::info!(
            pairs = result.outcomes.len(),
            failed = result.failures().count(),
            stale = result.stale().count(),
            "batch finished"
        );
        Ok(result)
    }

    /// Write (or in check mode, compare) `<output_root>/manifest.json`.
    pub fn write_manifest(&self, manifest: &Manifest, check: bool) -> ConvertResult<WriteOutcome> {
        let path = self.output_root().join(MANIFEST_FILE_NAME);
        OutputWriter::new(self.storage, check).write_file(&path, manifest.to_json()?.as_bytes())
    }
}

fn success(language: &str, template: &Template, outcome: WriteOutcome) -> PairOutcome {
    PairOutcome {
        language: language.to_string(),
        target: template.target.clone(),
        result: PairResult::Success {
            template_version: template.version.to_string(),
            path: outcome.path,
            sha256: outcome.sha256,
            status: outcome.status,
        },
    }
}
