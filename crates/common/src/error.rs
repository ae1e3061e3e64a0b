use thiserror::Error;

/// Canonical Rill error taxonomy used across crates.
///
/// Classification guidance:
/// - [`RillError::Parse`]: malformed SQL text, before any planning happens
/// - [`RillError::Type`]: typecheck failures (unknown name, arity mismatch,
///   incompatible types, ambiguous references)
/// - [`RillError::Plan`]: structural plan inconsistencies; reaching one of
///   these means an internal assertion failed during lowering
/// - [`RillError::Datasource`]: I/O or provider failures while opening or
///   scanning a table
/// - [`RillError::Runtime`]: expression evaluation failures after planning
///   succeeded (division by zero, failed type assertion)
/// - [`RillError::InvariantViolation`]: internal engine bug (for example a
///   negative distinct count); fatal for the query
/// - [`RillError::Cancelled`]: the caller cancelled the query
/// - [`RillError::Unsupported`]: syntactically valid but intentionally
///   rejected feature combinations (for example LIMIT on a stream output)
#[derive(Debug, Error)]
pub enum RillError {
    /// Malformed SQL input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Typecheck failure.
    ///
    /// Examples:
    /// - unknown column or table
    /// - ambiguous column reference
    /// - function arity/type mismatch
    #[error("type error: {0}")]
    Type(String),

    /// Structural plan inconsistency. These are assertions; a well-typed plan
    /// never produces one.
    #[error("plan error: {0}")]
    Plan(String),

    /// Datasource open/scan failures.
    ///
    /// Examples:
    /// - missing file
    /// - malformed row in an input file
    #[error("datasource error: {0}")]
    Datasource(String),

    /// Runtime expression/operator evaluation failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Internal invariant broken. Indicates a bug in the engine itself, not
    /// in the query.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The query was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,

    /// Valid request for a feature combination the engine rejects.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RillError {
    /// Typecheck error for a name that resolves to more than one column in a
    /// single scope.
    pub fn ambiguous_name(name: &str) -> Self {
        RillError::Type(format!(
            "ambiguous column reference: {name} (qualify it with a table name)"
        ))
    }

    /// Typecheck error for a function name absent from the registry.
    pub fn unknown_function(name: &str) -> Self {
        RillError::Type(format!("unknown function: {name}"))
    }
}

/// Standard Rill result alias.
pub type Result<T> = std::result::Result<T, RillError>;
