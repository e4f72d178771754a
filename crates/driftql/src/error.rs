use std::fmt;

use async_graphql_parser::Pos;
use query_path::{QueryPath, QueryPathSegment};
use serde::Serialize;

pub type ServerResult<T> = Result<T, ServerError>;

/// A position in the operation document, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub line: usize,
    pub column: usize,
}

impl From<Pos> for ErrorLocation {
    fn from(pos: Pos) -> Self {
        ErrorLocation {
            line: pos.line,
            column: pos.column,
        }
    }
}

/// An error that occurred while executing an operation.
///
/// Serializes to the GraphQL error shape: `message`, plus `locations` and
/// `path` when known. `path` is the response path at which the error
/// occurred, mixing field names and list indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<QueryPathSegment>,
}

impl ServerError {
    pub fn new(message: impl Into<String>, pos: Option<Pos>) -> Self {
        ServerError {
            message: message.into(),
            locations: pos.map(Into::into).into_iter().collect(),
            path: Vec::new(),
        }
    }

    /// Fills in the response path, unless the error already carries one.
    ///
    /// Resolvers usually report errors without a path; the executor knows
    /// where it was when the error surfaced and attaches it here.
    pub(crate) fn at_path(mut self, path: &QueryPath) -> Self {
        if self.path.is_empty() {
            self.path = path.segments().into_iter().cloned().collect();
        }
        self
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServerError {}

/// Errors raised while building a [`Schema`](crate::Schema) out of a
/// registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("query root type `{0}` is not registered")]
    MissingQueryRoot(String),
    #[error("root type `{0}` must be an object type")]
    RootNotAnObject(String),
    #[error("field `{field}` on `{parent}` references unknown type `{ty}`")]
    UnknownFieldType {
        parent: String,
        field: String,
        ty: String,
    },
    #[error("`{ty}` lists unknown possible type `{possible}`")]
    UnknownPossibleType { ty: String, possible: String },
}
