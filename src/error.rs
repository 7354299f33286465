//! Error types for the de-identification engine.
//!
//! All fallible operations return `Result<T, DeidError>`. Errors are
//! classified into a small set of kinds that determine how the engine reacts
//! to them — see [`DeidError::is_fatal`].
//!
//! # Error Classification
//!
//! - **Config** — bad YAML, unresolved `defaults`, missing required keys. Fails before any data is touched.
//! - **Lint** — static linter issues; errors block `run`, warnings do not.
//! - **Store** — input/output/reference store unreachable or corrupt. Reference-store failures are always fatal.
//! - **Io** — table-not-found, file-format, write, and validation failures at the store boundary.
//! - **Transform** — a transformer could not complete for a segment.
//! - **Pipeline** — any of the above attributed to one table; the unit the engine reports on.
//! - **Cancelled** — caller-initiated cancellation.

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum DeidError {
    // ── Configuration errors — fail before any data is touched ───────────
    /// The configuration file could not be parsed or its `defaults` chain
    /// could not be resolved.
    #[error("config load error: {0}")]
    ConfigLoad(String),

    /// The static linter found at least one error-severity issue.
    #[error("lint error: {0}")]
    LintError(String),

    /// The static linter found only warning-severity issues. Carried as an
    /// error variant for callers that want to surface it, but `run` does not
    /// raise on warnings alone.
    #[error("lint warning: {0}")]
    LintWarning(String),

    // ── Store errors ──────────────────────────────────────────────────────
    /// The input, output, or reference store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A named table has no corresponding file or directory in its store.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A segment's file format could not be read or is unsupported.
    #[error("file format error: {0}")]
    FileFormatError(String),

    /// A segment or reference frame could not be written.
    #[error("write error: {0}")]
    WriteError(String),

    /// A configuration value failed validation against the data it governs.
    #[error("validation error: {0}")]
    ValidationError(String),

    // ── Transform errors ──────────────────────────────────────────────────
    /// A transformer could not complete: a bad cast, a malformed timestamp,
    /// a join that failed to resolve.
    #[error("transform error: {0}")]
    TransformError(String),

    /// A transform or store error attributed to one table pipeline.
    #[error("pipeline '{pipeline_uid}' failed: {source}")]
    PipelineError {
        pipeline_uid: String,
        #[source]
        source: Box<DeidError>,
    },

    // ── Cancellation ───────────────────────────────────────────────────────
    /// The caller requested cancellation; in-flight segments were allowed to
    /// finish and references were flushed before returning.
    #[error("run cancelled")]
    Cancelled,
}

impl DeidError {
    /// Wrap this error as a [`DeidError::PipelineError`] attributed to `pipeline_uid`.
    pub fn into_pipeline_error(self, pipeline_uid: impl Into<String>) -> DeidError {
        DeidError::PipelineError {
            pipeline_uid: pipeline_uid.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error must abort the run regardless of
    /// `continue_on_error`.
    ///
    /// Reference-store failures are always fatal because the reference map
    /// could otherwise diverge from what was actually written; config and
    /// lint errors are fatal because they are raised before any data is
    /// touched.
    pub fn is_fatal(&self) -> bool {
        match self {
            DeidError::ConfigLoad(_) | DeidError::LintError(_) => true,
            DeidError::StoreUnavailable(_) => true,
            DeidError::Cancelled => true,
            DeidError::PipelineError { source, .. } => source.is_fatal(),
            DeidError::LintWarning(_)
            | DeidError::TableNotFound(_)
            | DeidError::FileFormatError(_)
            | DeidError::WriteError(_)
            | DeidError::ValidationError(_)
            | DeidError::TransformError(_) => false,
        }
    }

    /// Classify the error for the run report and CLI output.
    pub fn kind(&self) -> DeidErrorKind {
        match self {
            DeidError::ConfigLoad(_) => DeidErrorKind::Config,
            DeidError::LintError(_) | DeidError::LintWarning(_) => DeidErrorKind::Lint,
            DeidError::StoreUnavailable(_) => DeidErrorKind::Store,
            DeidError::TableNotFound(_)
            | DeidError::FileFormatError(_)
            | DeidError::WriteError(_)
            | DeidError::ValidationError(_) => DeidErrorKind::Io,
            DeidError::TransformError(_) => DeidErrorKind::Transform,
            DeidError::PipelineError { .. } => DeidErrorKind::Pipeline,
            DeidError::Cancelled => DeidErrorKind::Cancelled,
        }
    }
}

/// Classification of error kind, used in run reports and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeidErrorKind {
    Config,
    Lint,
    Store,
    Io,
    Transform,
    Pipeline,
    Cancelled,
}

impl std::fmt::Display for DeidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeidErrorKind::Config => write!(f, "CONFIG"),
            DeidErrorKind::Lint => write!(f, "LINT"),
            DeidErrorKind::Store => write!(f, "STORE"),
            DeidErrorKind::Io => write!(f, "IO"),
            DeidErrorKind::Transform => write!(f, "TRANSFORM"),
            DeidErrorKind::Pipeline => write!(f, "PIPELINE"),
            DeidErrorKind::Cancelled => write!(f, "CANCELLED"),
        }
    }
}
