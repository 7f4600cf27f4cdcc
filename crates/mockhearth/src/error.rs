use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while walking the scenario root and resolving `!include` tags.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("include depth exceeded 10 while resolving {path}")]
    IncludeDepthExceeded { path: PathBuf },

    #[error("include cycle detected at {path}")]
    IncludeCycle { path: PathBuf },

    #[error("path {path} escapes root {root} after symlink resolution")]
    PathEscape { path: PathBuf, root: PathBuf },
}

/// Errors produced while lowering a declarative [`crate::scenario::Scenario`] to a
/// [`crate::compiler::CompiledScenario`].
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("scenario {id}: invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        id: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("scenario {id}: malformed extractor {extractor:?}")]
    MalformedExtractor { id: String, extractor: String },

    #[error("scenario {id}: unknown template engine {engine:?}")]
    UnknownEngine { id: String, engine: String },

    #[error("scenario {id}: could not read body file {path}: {source}")]
    BodyFileUnreadable {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while validating a complete batch of declarative scenarios
/// before they are handed to the compiler.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate scenario id {id:?} in {first} and {second}")]
    DuplicateId {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("scenario in {path} is missing required field {field}")]
    MissingField { path: PathBuf, field: &'static str },
}

/// Errors raised during response-pipeline execution for an already-matched scenario.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("pagination data_path {data_path:?} did not resolve to an array")]
    PaginationNotArray { data_path: String },

    #[error("request body exceeded the 10 MB cap")]
    BodyTooLarge,
}

/// A batch of [`LoadError`], [`CompileError`] or [`ValidationError`] produced while
/// building one generation. The generation is aborted as a whole if this is non-empty.
#[derive(Debug, Error)]
#[error("generation build failed with {} error(s): {}", .0.len(), summarize(.0))]
pub struct GenerationError(pub Vec<MockError>);

fn summarize(errors: &[MockError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The crate-wide error type. Every fallible operation in the core returns one of
/// these kinds, matching the error kinds named in the response-pipeline design.
#[derive(Debug, Error)]
pub enum MockError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The matched scenario's rate-limit policy denied the request.
    #[error("rate limited")]
    PolicyDenied,

    /// The request's cancellation signal fired before a response was written.
    #[error("cancelled")]
    Cancelled,
}

impl MockError {
    /// HTTP status code the response pipeline writes for this error, per the
    /// error-handling design's user-visible status-code mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            MockError::Load(_) | MockError::Validation(_) | MockError::Compile(_) => 500,
            MockError::Runtime(RuntimeError::BodyTooLarge) => 413,
            MockError::Runtime(_) => 500,
            MockError::PolicyDenied => 429,
            MockError::Cancelled => 499,
        }
    }

    /// JSON error body `{"error":"..."}` written alongside [`Self::status_code`].
    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}
