//! Per-template output rules: value escaping, line endings, byte encoding.
//!
//! A template declares one of each; the renderer applies exactly those and
//! never falls back to a global default.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// How substituted values are escaped before they land in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Escape {
    #[default]
    None,
    /// RFC 4180 field quoting.
    Csv,
    Xml,
    /// Contents of a JSON string literal, without the surrounding quotes.
    Json,
}

impl Escape {
    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match self {
            Escape::None => Cow::Borrowed(value),
            Escape::Csv => csv_field(value),
            Escape::Xml => xml_text(value),
            Escape::Json => json_string_body(value),
        }
    }
}

fn csv_field(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.contains([',', '"', '\n', '\r'])
        || value.starts_with(' ')
        || value.ends_with(' ');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn xml_text(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn json_string_body(value: &str) -> Cow<'_, str> {
    // Serializing a &str cannot fail.
    let quoted = serde_json::to_string(value).unwrap_or_default();
    let body = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&quoted);
    if body == value {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(body.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// Byte encoding of a finished artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "utf-8-bom")]
    Utf8Bom,
    /// Little-endian UTF-16 preceded by a byte-order mark.
    #[serde(rename = "utf-16le")]
    Utf16Le,
    /// Plain ASCII; everything else becomes `\uXXXX` UTF-16 escapes.
    #[serde(rename = "ascii")]
    Ascii,
}

impl Encoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Utf8Bom => {
                let mut out = Vec::with_capacity(text.len() + 3);
                out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
                out.extend_from_slice(text.as_bytes());
                out
            }
            Encoding::Utf16Le => {
                let mut out = Vec::with_capacity(text.len() * 2 + 2);
                out.extend_from_slice(&[0xFF, 0xFE]);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
            Encoding::Ascii => ascii_escape(text).into_bytes(),
        }
    }
}

fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut units = [0u16; 2];
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_only_when_needed() {
        assert_eq!(Escape::Csv.apply("plain"), "plain");
        assert_eq!(Escape::Csv.apply("a, b"), "\"a, b\"");
        assert_eq!(Escape::Csv.apply("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(Escape::Csv.apply("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn xml_escapes_markup() {
        assert_eq!(Escape::Xml.apply("a < b & 'c'"), "a &lt; b &amp; &apos;c&apos;");
        assert!(matches!(Escape::Xml.apply("clean"), Cow::Borrowed(_)));
    }

    #[test]
    fn json_escapes_quotes_and_controls() {
        assert_eq!(Escape::Json.apply("a \"b\"\n"), "a \\\"b\\\"\\n");
        assert_eq!(Escape::Json.apply("é"), "é");
    }

    #[test]
    fn utf16_has_bom_and_le_units() {
        assert_eq!(Encoding::Utf16Le.encode("Aé"), vec![0xFF, 0xFE, 0x41, 0x00, 0xE9, 0x00]);
    }

    #[test]
    fn ascii_escapes_non_ascii_including_astral() {
        let bytes = Encoding::Ascii.encode("é😀!");
        assert_eq!(String::from_utf8(bytes).unwrap(), "\\u00e9\\ud83d\\ude00!");
    }

    #[test]
    fn utf8_bom_prefix() {
        assert_eq!(Encoding::Utf8Bom.encode("x"), vec![0xEF, 0xBB, 0xBF, b'x']);
    }

    #[test]
    fn encoding_names_deserialize() {
        let e: Encoding = serde_yaml::from_str("utf-16le").unwrap();
        assert_eq!(e, Encoding::Utf16Le);
        let e: Escape = serde_yaml::from_str("csv").unwrap();
        assert_eq!(e, Escape::Csv);
    }
}
