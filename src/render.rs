//! Renderer - binds one IR to one template
//!
//! Pure: produces a `RenderedArtifact` and never touches storage.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::encoding::{Encoding, LineEnding};
use crate::error::{ConvertError, ConvertResult};
use crate::ir::{Ir, IrEntry};
use crate::output::finalize_text;
use crate::templates::{EntryOrder, Segment, Template};

/// Output for one (language, target) pair, before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub language: String,
    pub target: String,
    pub template_version: String,
    pub path: PathBuf,
    /// Rendered text with LF line breaks, not yet finalized.
    pub text: String,
    pub encoding: Encoding,
    pub line_ending: LineEnding,
}

impl RenderedArtifact {
    /// Final bytes: trailing newline and line endings fixed, then encoded.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encoding.encode(&finalize_text(&self.text, self.line_ending))
    }
}

pub struct Renderer {
    output_root: PathBuf,
}

impl Renderer {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn render(&self, ir: &Ir, template: &Template) -> ConvertResult<RenderedArtifact> {
        let mut entries: Vec<&IrEntry> = ir.entries().iter().collect();
        if let EntryOrder::SortBy(field) = &template.order {
            // sort_by_key is stable, so ties keep declaration order.
            entries.sort_by_key(|e| e.sort_key(field));
        }

        let mut parts = Vec::with_capacity(entries.len() + 2);
        if !template.header.is_empty() {
            parts.push(render_meta(ir, template, &template.header, true)?);
        }
        for entry in entries {
            let text = template
                .body
                .render(|name| {
                    let value = entry.field(name)?;
                    Some(Cow::Owned(template.escape.apply(&value).into_owned()))
                })
                .map_err(|placeholder| ConvertError::PlaceholderMismatch {
                    target: template.target.clone(),
                    key: entry.key.clone(),
                    placeholder,
                })?;
            parts.push(text);
        }
        if !template.footer.is_empty() {
            parts.push(render_meta(ir, template, &template.footer, true)?);
        }

        let relative = render_meta(ir, template, &template.output, false)?;
        Ok(RenderedArtifact {
            language: ir.language().to_string(),
            target: template.target.clone(),
            template_version: template.version.to_string(),
            path: self.output_root.join(&template.target).join(relative),
            text: parts.join("\n"),
            encoding: template.encoding,
            line_ending: template.line_ending,
        })
    }
}

/// Header, footer and output path only see IR meta fields. Path values are
/// made path-safe instead of escaped.
fn render_meta(ir: &Ir, template: &Template, segment: &Segment, escape: bool) -> ConvertResult<String> {
    segment
        .render(|name| {
            let value = ir.meta_field(name)?;
            Some(if escape {
                template.escape.apply(value)
            } else {
                Cow::Owned(path_safe(value))
            })
        })
        .map_err(|placeholder| ConvertError::PlaceholderMismatch {
            target: template.target.clone(),
            key: "meta".to_string(),
            placeholder,
        })
}

/// Lower-case and reduce to `[a-z0-9._-]`; never empty, never all dots.
pub fn path_safe(value: &str) -> String {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;
    use crate::validation::{SourceEntry, ValidatedDocument};
    use std::collections::BTreeMap;

    fn ir(entries: &[(&str, &str)]) -> Ir {
        let doc = ValidatedDocument {
            language: "fr".into(),
            path: PathBuf::from("source/fr.yaml"),
            meta: BTreeMap::from([("edition".to_string(), "Web App".to_string())]),
            entries: entries
                .iter()
                .map(|(key, label)| SourceEntry {
                    key: key.to_string(),
                    label: label.to_string(),
                    ..Default::default()
                })
                .collect(),
        };
        IrBuilder::default().build(&doc).unwrap()
    }

    fn template(front: &str, body: &str) -> Template {
        let text = format!("---\ntarget: demo\nversion: 1.0.0\nextension: txt\n{front}---\n{body}\n");
        Template::parse(Path::new("demo.tmpl"), &text).unwrap()
    }

    #[test]
    fn entries_keep_declaration_order() {
        let t = template("placeholders: [key, label]\n", "${key}: ${label}");
        let artifact = Renderer::new("out")
            .render(&ir(&[("VE3", "Trois"), ("VE2", "Deux")]), &t)
            .unwrap();
        assert_eq!(artifact.text, "VE3: Trois\nVE2: Deux");
        assert_eq!(artifact.path, PathBuf::from("out/demo/fr.txt"));
        assert_eq!(artifact.to_bytes(), b"VE3: Trois\nVE2: Deux\n");
    }

    #[test]
    fn sort_by_is_numeric_aware() {
        let t = template("placeholders: [key, label]\nsort_by: label\n", "${key}=${label}");
        let artifact = Renderer::new("out")
            .render(&ir(&[("A1", "10"), ("A2", "9"), ("A3", "b"), ("A4", "9")]), &t)
            .unwrap();
        assert_eq!(artifact.text, "A2=9\nA4=9\nA1=10\nA3=b");

        let t = template("placeholders: [key, position]\nsort_by: key\n", "${key}@${position}");
        let artifact = Renderer::new("out")
            .render(&ir(&[("VE3", "c"), ("AT1", "a"), ("VE10", "b")]), &t)
            .unwrap();
        assert_eq!(artifact.text, "AT1@2\nVE10@3\nVE3@1");
    }

    #[test]
    fn only_substituted_values_are_escaped() {
        let t = template(
            "placeholders: [key, label]\nescape: csv\nheader: \"key,label,${edition}\"\n",
            "${key},${label}",
        );
        let artifact = Renderer::new("out").render(&ir(&[("A1", "one, two")]), &t).unwrap();
        assert_eq!(artifact.text, "key,label,Web App\nA1,\"one, two\"");
    }

    #[test]
    fn output_path_values_are_path_safe() {
        let t = template(
            "placeholders: [key]\noutput: \"${edition}/${language}.txt\"\n",
            "${key}",
        );
        let artifact = Renderer::new("out").render(&ir(&[("A1", "x")]), &t).unwrap();
        assert_eq!(artifact.path, PathBuf::from("out/demo/web_app/fr.txt"));
        assert_eq!(path_safe(".."), "__");
        assert_eq!(path_safe(""), "_");
        assert_eq!(path_safe("pt-BR"), "pt-br");
    }

    #[test]
    fn missing_meta_field_is_a_placeholder_mismatch() {
        let doc = ValidatedDocument {
            language: "fr".into(),
            path: PathBuf::from("source/fr.yaml"),
            meta: BTreeMap::new(),
            entries: vec![SourceEntry {
                key: "A1".into(),
                label: "x".into(),
                ..Default::default()
            }],
        };
        let table = crate::ir::DefaultTable {
            meta: BTreeMap::new(),
            ..Default::default()
        };
        let ir = IrBuilder::new(table).build(&doc).unwrap();
        let t = template("placeholders: [key]\nfooter: \"v${version}\"\n", "${key}");
        let err = Renderer::new("out").render(&ir, &t).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::PlaceholderMismatch { ref placeholder, .. } if placeholder == "version"
        ));
    }
}
