//! An incremental GraphQL execution engine.
//!
//! `driftql` evaluates a parsed, validated operation against a
//! [`Registry`]-backed [`Schema`] and delivers the response in two phases:
//! an initial result holding everything that was not deferred, then a lazy
//! stream of patches, one per `@defer`red fragment and one per `@stream`ed
//! trailing list element.
//!
//! ```ignore
//! let schema = Schema::build(registry)?;
//! let document = driftql::parse_query("{ hero { id ...Name @defer(label: \"Name\") } }")?;
//! let response = schema.execute(Request::new(document)).await;
//! // response.response is the initial result; response.patches, when
//! // present, drives and yields the deferred patches.
//! ```
//!
//! Parsing, validation and transport framing live outside this crate: the
//! executor consumes [`async_graphql_parser`] documents and produces
//! [`StreamingPayload`] values a transport can frame however it likes.

mod context;
mod deferred;
mod error;
mod registry;
mod request;
mod resolver_utils;
mod response;
mod schema;

pub use async_graphql_parser::{self as parser, parse_query, Pos, Positioned};
pub use async_graphql_value::{ConstValue, Name, Number, Variables};
pub use query_path::{QueryPath, QueryPathSegment};

pub use context::ContextData;
pub use deferred::Patches;
pub use error::{ErrorLocation, SchemaError, ServerError, ServerResult};
pub use registry::{
    MetaField, MetaFieldType, MetaType, Registry, ResolvedValue, Resolver, ResolverContext,
};
pub use request::Request;
pub use response::{
    IncrementalPayload, IncrementalResponse, InitialResponse, Response, StreamingPayload,
};
pub use schema::{ExecutionResponse, Schema};
