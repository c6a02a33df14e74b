//! Deckgen Core - Deck Conversion Compiler
//!
//! One YAML source per language is loaded, validated, and resolved into a
//! target-agnostic IR, then rendered through every requested template.
//!
//! # The Rules
//! 1. Sources Are Truth
//! 2. Templates Are Contracts
//! 3. Validation Is All-Or-Nothing
//! 4. Deterministic Output
//! 5. Build Once, Render Many

pub mod config;
pub mod encoding;
pub mod error;
pub mod hashing;
pub mod ir;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod storage;
pub mod templates;
pub mod validation;

pub use config::{Config, CONFIG_FILE_NAME};
pub use error::{ConvertError, ConvertResult, ErrorKind, SchemaViolation};
pub use hashing::{canonical_json, compute_hash};
pub use ir::{DefaultTable, Ir, IrBuilder, IrEntry};
pub use output::{OutputWriter, WriteOutcome, WriteStatus};
pub use pipeline::{
    BatchRequest, BatchResult, ConversionPipeline, LanguageSummary, Manifest, PairOutcome,
    PairResult, Selection,
};
pub use render::{RenderedArtifact, Renderer};
pub use source::{SourceDocument, SourceIndex, SourceLoader};
pub use storage::{DiskStorage, MemoryStorage, Storage};
pub use templates::{Template, TemplateRegistry};
pub use validation::{ValidationResult, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_TEMPLATE_VERSION: &str = "1.0.0";
