use std::sync::Arc;

use thiserror::Error;

use crate::key::Key;

/// Errors produced while parsing or deriving a [`Key`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key expression {input:?}: {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("Key '{key}' has no dimension '{dim}'")]
    MissingDimension { key: String, dim: String },
}

/// Errors produced while parsing or converting units.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("Unit {input:?} cannot be parsed: {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("Cannot convert from '{from}' to '{to}'")]
    Incompatible { from: String, to: String },
}

/// Errors produced by operations on a [`crate::Quantity`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuantityError {
    #[error("Incompatible units: '{left}' and '{right}'")]
    IncompatibleUnits { left: String, right: String },

    #[error("Quantity has no dimension '{0}'")]
    MissingDimension(String),

    #[error("Dimension '{dim}' has no label '{label}'")]
    MissingLabel { dim: String, label: String },

    #[error("Dimension '{dim}' has duplicate label '{label}'")]
    DuplicateLabel { dim: String, label: String },

    #[error("Duplicate dimension '{0}'")]
    DuplicateDimension(String),

    #[error("Cell {labels} is populated in more than one operand")]
    Overlap { labels: String },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Cannot raise '{base}' to a power in '{exponent}': {reason}")]
    Power {
        base: String,
        exponent: String,
        reason: &'static str,
    },

    #[error("Quantity with dimensions {0:?} is not a scalar")]
    NotScalar(Vec<String>),

    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// Structural errors raised while registering nodes or resolving keys.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Key(s) not found: {}", join(.0))]
    NotFound(Vec<Key>),

    #[error("Ambiguous full key for '{name}': {}", join(.candidates))]
    Ambiguous { name: Key, candidates: Vec<Key> },

    #[error("Key '{0}' already exists; use `replace` to overwrite it")]
    Conflict(Key),

    #[error("Adding '{key}' would create a cycle through '{via}'")]
    Cycle { key: Key, via: Key },

    #[error("No default key is configured")]
    NoDefault,

    #[error("Value of '{key}' is not a {expected}")]
    WrongType { key: Key, expected: &'static str },
}

/// A data error raised while executing a single node of the graph.
#[derive(Debug, Error, Clone)]
#[error("Computing '{key}' failed:\n{error:#}")]
pub struct ComputationError {
    pub key: Key,
    pub error: Arc<anyhow::Error>,
}

impl ComputationError {
    pub fn new(key: Key, err: impl Into<anyhow::Error>) -> Self {
        Self {
            key,
            error: Arc::new(err.into()),
        }
    }
}

/// Failures of the persistent result store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error:\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize cached value:\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Couldn't deserialize cached value:\n{0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Marker for an argument that cannot be canonicalised.
///
/// This is never surfaced as a failure: a call carrying such an argument is
/// computed fresh and its result is not stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Argument {position} cannot be fingerprinted")]
pub struct Uncacheable {
    pub position: usize,
}

/// Errors surfaced by the [`crate::Computer`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid configuration:\n{0}")]
    Config(#[from] serde_json::Error),

    #[error("No operator named '{0}'")]
    UnknownOperator(String),

    #[error("Operator '{operator}' takes no argument '{arg}'")]
    UnknownArgument { operator: String, arg: String },
}

impl Error {
    /// The graph error wrapped by this error, if any.
    pub fn as_graph(&self) -> Option<&GraphError> {
        match self {
            Error::Graph(e) => Some(e),
            _ => None,
        }
    }

    /// Walks the execution error chain looking for a [`QuantityError`].
    pub fn as_quantity(&self) -> Option<&QuantityError> {
        match self {
            Error::Quantity(e) => Some(e),
            Error::Computation(e) => e.error.downcast_ref::<QuantityError>(),
            _ => None,
        }
    }
}

fn join(keys: &[Key]) -> String {
    keys.iter()
        .map(|k| format!("'{k}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
