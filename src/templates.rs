//! Template System - Enforceable Contracts
//!
//! A template is YAML frontmatter (target, version, placeholder contract,
//! output rules) followed by the per-entry body. Every contract check runs
//! once, when the template is loaded.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::encoding::{Encoding, Escape, LineEnding};
use crate::error::{ConvertError, ConvertResult};
use crate::ir::{ENTRY_FIELDS, META_FIELDS};
use crate::storage::Storage;
use crate::{ENGINE_VERSION, MIN_TEMPLATE_VERSION};

static TARGET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());
static PLACEHOLDER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());
static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());

pub const TEMPLATE_EXTENSION: &str = "tmpl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Placeholder(String),
}

/// Text with `${name}` placeholders; `$${` is a literal `${`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pieces: Vec<Piece>,
}

impl Segment {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut pieces = vec![];
        let mut literal = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after
                    .find('}')
                    .ok_or_else(|| format!("unterminated placeholder `{}`", truncate(tail)))?;
                let name = &after[..end];
                if !PLACEHOLDER_NAME.is_match(name) {
                    return Err(format!("malformed placeholder `${{{name}}}`"));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Placeholder(name.to_string()));
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Self { pieces })
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Placeholder(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Substitute every placeholder; fails with the first name `lookup`
    /// cannot supply.
    pub fn render<'v, F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Option<Cow<'v, str>>,
    {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder(name) => {
                    let value = lookup(name).ok_or_else(|| name.clone())?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn truncate(text: &str) -> &str {
    let end = text.char_indices().nth(24).map_or(text.len(), |(i, _)| i);
    &text[..end]
}

/// Order in which IR entries are rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EntryOrder {
    #[default]
    Declaration,
    /// Stable sort on one entry field.
    SortBy(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Frontmatter {
    target: String,
    version: String,
    #[serde(default)]
    engine_min_version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    extension: String,
    placeholders: Vec<String>,
    #[serde(default)]
    encoding: Encoding,
    #[serde(default)]
    escape: Escape,
    #[serde(default)]
    line_ending: LineEnding,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    header: String,
    #[serde(default)]
    footer: String,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub target: String,
    pub name: String,
    pub version: Version,
    pub engine_min_version: Option<Version>,
    pub path: PathBuf,
    pub extension: String,
    /// Entry fields the body expects, in declared order.
    pub placeholders: Vec<String>,
    pub encoding: Encoding,
    pub escape: Escape,
    pub line_ending: LineEnding,
    pub order: EntryOrder,
    pub header: Segment,
    pub body: Segment,
    pub footer: Segment,
    /// Artifact path relative to `<output_root>/<target>/`.
    pub output: Segment,
}

/// Serializable summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub target: String,
    pub name: String,
    pub version: Version,
    pub extension: String,
    pub placeholders: Vec<String>,
    pub encoding: Encoding,
    pub escape: Escape,
    pub path: PathBuf,
}

impl Template {
    /// Parse a template file and check its contract.
    pub fn parse(path: &Path, text: &str) -> ConvertResult<Self> {
        let fail = |detail: String| ConvertError::template_load(path, detail);

        let text = text.strip_prefix('\u{feff}').unwrap_or(text).replace("\r\n", "\n");
        let (front, body) =
            split_frontmatter(&text).ok_or_else(|| fail("missing `---` frontmatter".into()))?;
        let front: Frontmatter =
            serde_yaml::from_str(front).map_err(|e| fail(format!("frontmatter: {e}")))?;

        let body = body.strip_suffix('\n').unwrap_or(body);
        if body.trim().is_empty() {
            return Err(fail("template body is empty".into()));
        }

        let version = Version::parse(&front.version)
            .map_err(|e| fail(format!("version `{}`: {e}", front.version)))?;
        let engine_min_version = front
            .engine_min_version
            .as_deref()
            .map(|v| Version::parse(v).map_err(|e| fail(format!("engine_min_version `{v}`: {e}"))))
            .transpose()?;
        let segment = |field: &str, text: &str| {
            Segment::parse(text).map_err(|e| fail(format!("{field}: {e}")))
        };
        let output_text = front
            .output
            .clone()
            .unwrap_or_else(|| format!("${{language}}.{}", front.extension));

        let template = Template {
            name: front.name.clone().unwrap_or_else(|| front.target.clone()),
            target: front.target,
            version,
            engine_min_version,
            path: path.to_path_buf(),
            extension: front.extension,
            placeholders: front.placeholders,
            encoding: front.encoding,
            escape: front.escape,
            line_ending: front.line_ending,
            order: front.sort_by.map_or(EntryOrder::Declaration, EntryOrder::SortBy),
            header: segment("header", &front.header)?,
            body: segment("body", body)?,
            footer: segment("footer", &front.footer)?,
            output: segment("output", &output_text)?,
        };
        template.check_contract().map_err(fail)?;
        Ok(template)
    }

    /// Static contract check against the IR schema.
    pub fn check_contract(&self) -> Result<(), String> {
        if !TARGET_ID.is_match(&self.target) {
            return Err(format!("invalid target identifier `{}`", self.target));
        }
        if !EXTENSION.is_match(&self.extension) {
            return Err(format!("invalid extension `{}`", self.extension));
        }
        check_versions(self)?;

        if self.placeholders.is_empty() {
            return Err("placeholder contract is empty".into());
        }
        let mut declared = HashSet::new();
        for name in &self.placeholders {
            if !ENTRY_FIELDS.contains(&name.as_str()) {
                return Err(format!(
                    "placeholder `{name}` is not an IR entry field (expected one of: {})",
                    ENTRY_FIELDS.join(", ")
                ));
            }
            if !declared.insert(name.as_str()) {
                return Err(format!("placeholder `{name}` declared twice"));
            }
        }
        if let Some(name) = self.body.placeholders().find(|p| !declared.contains(p)) {
            return Err(format!("body uses undeclared placeholder `{name}`"));
        }
        if let EntryOrder::SortBy(field) = &self.order {
            if !ENTRY_FIELDS.contains(&field.as_str()) {
                return Err(format!("sort_by `{field}` is not an IR entry field"));
            }
        }

        for (part, segment) in [
            ("header", &self.header),
            ("footer", &self.footer),
            ("output", &self.output),
        ] {
            if let Some(name) = segment.placeholders().find(|p| !META_FIELDS.contains(p)) {
                return Err(format!(
                    "{part} uses `{name}`, which is not a meta field (expected one of: {})",
                    META_FIELDS.join(", ")
                ));
            }
        }
        check_output_pattern(&self.output)
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            target: self.target.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            extension: self.extension.clone(),
            placeholders: self.placeholders.clone(),
            encoding: self.encoding,
            escape: self.escape,
            path: self.path.clone(),
        }
    }
}

fn check_versions(template: &Template) -> Result<(), String> {
    let engine = Version::parse(ENGINE_VERSION).map_err(|_| "invalid engine version".to_string())?;
    let min_template =
        Version::parse(MIN_TEMPLATE_VERSION).map_err(|_| "invalid minimum template version".to_string())?;

    if template.version < min_template {
        return Err(format!(
            "template version {} is older than the supported minimum {}",
            template.version, min_template
        ));
    }
    if let Some(required) = &template.engine_min_version {
        if engine < *required {
            return Err(format!(
                "template version {} requires engine >= {}, current is {}",
                template.version, required, engine
            ));
        }
    }
    Ok(())
}

fn check_output_pattern(output: &Segment) -> Result<(), String> {
    if !output.placeholders().any(|p| p == "language") {
        return Err("output path must contain `${language}`".into());
    }
    // Placeholder values are path-sanitized at render time; only the literal
    // skeleton can escape the target directory.
    let skeleton = output.render(|_| Some(Cow::Borrowed("x")))?;
    let path = Path::new(&skeleton);
    let escapes = skeleton.starts_with(['/', '\\'])
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(format!("output path `{skeleton}` must stay inside the target directory"));
    }
    Ok(())
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---\n")?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Template registry - loads every template once, read-only afterwards
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Vec<Template>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: BTreeMap::new() }
    }

    /// Load every `*.tmpl` file directly under `dir`.
    ///
    /// Any template that breaks its contract fails the whole load.
    pub fn load_from_dir(storage: &dyn Storage, dir: &Path) -> ConvertResult<Self> {
        let mut registry = Self::new();
        let files = storage
            .list(dir)
            .map_err(|e| ConvertError::template_load(dir, format!("cannot list template root: {e}")))?;

        for path in files {
            if path.extension().map_or(true, |e| e != TEMPLATE_EXTENSION) {
                continue;
            }
            let text = storage
                .read_to_string(&path)
                .map_err(|e| ConvertError::template_load(&path, format!("cannot read: {e}")))?;
            let template = Template::parse(&path, &text)?;
            tracing::debug!(
                target_id = %template.target,
                version = %template.version,
                path = %path.display(),
                "template loaded"
            );
            registry.register(template)?;
        }

        if registry.templates.is_empty() {
            return Err(ConvertError::template_load(dir, "no templates found"));
        }
        tracing::info!(templates = registry.list().len(), targets = registry.templates.len(), "template registry ready");
        Ok(registry)
    }

    pub fn register(&mut self, template: Template) -> ConvertResult<()> {
        template
            .check_contract()
            .map_err(|e| ConvertError::template_load(&template.path, e))?;
        let versions = self.templates.entry(template.target.clone()).or_default();
        if let Some(existing) = versions.iter().find(|t| t.version == template.version) {
            return Err(ConvertError::template_load(
                &template.path,
                format!(
                    "target `{}` version {} is already defined by {}",
                    template.target,
                    template.version,
                    existing.path.display()
                ),
            ));
        }
        let at = versions.partition_point(|t| t.version < template.version);
        versions.insert(at, template);
        Ok(())
    }

    /// The highest version registered for `target`.
    pub fn get(&self, target: &str) -> ConvertResult<&Template> {
        self.templates
            .get(target)
            .and_then(|versions| versions.last())
            .ok_or_else(|| ConvertError::UnknownTarget { target: target.to_string() })
    }

    /// Every version registered for `target`, oldest first.
    pub fn list_by_target(&self, target: &str) -> &[Template] {
        self.templates.get(target).map_or(&[], Vec::as_slice)
    }

    /// Known target identifiers, sorted.
    pub fn targets(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn list(&self) -> Vec<&Template> {
        self.templates.values().flatten().collect()
    }
}
