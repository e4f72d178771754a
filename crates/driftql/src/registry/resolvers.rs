//! Resolvers attached to registry fields.
//!
//! A resolver is an opaque callable `(parent value, args, context, info) ->
//! value or future-of-value`. The two-case [`ResolvedValue`] sum keeps purely
//! synchronous resolvers allocation-free; the executor lifts both cases into
//! a future at its boundary so the evaluation loop stays monomorphic over
//! asynchrony.

use std::fmt;
use std::sync::Arc;

use async_graphql_value::{ConstValue, Name};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use query_path::QueryPath;

use crate::context::ContextData;
use crate::error::{ServerError, ServerResult};

/// Everything a resolver gets to see.
pub struct ResolverContext<'a> {
    /// The value the enclosing container resolved to.
    pub parent_value: &'a ConstValue,
    /// Coerced field arguments, variables already substituted.
    pub args: &'a IndexMap<Name, ConstValue>,
    /// Request-scoped context data.
    pub data: &'a ContextData,
    pub field_name: &'a str,
    /// The response path of the field being resolved.
    pub path: &'a QueryPath,
}

/// A value, or the promise of one.
pub enum ResolvedValue {
    Ready(ServerResult<ConstValue>),
    Future(BoxFuture<'static, ServerResult<ConstValue>>),
}

impl ResolvedValue {
    pub fn value(value: ConstValue) -> Self {
        ResolvedValue::Ready(Ok(value))
    }

    pub fn error(error: ServerError) -> Self {
        ResolvedValue::Ready(Err(error))
    }

    pub fn future(
        future: impl std::future::Future<Output = ServerResult<ConstValue>> + Send + 'static,
    ) -> Self {
        ResolvedValue::Future(Box::pin(future))
    }

    /// Lifts both cases uniformly; the single suspension point of field
    /// resolution.
    pub(crate) async fn into_value(self) -> ServerResult<ConstValue> {
        match self {
            ResolvedValue::Ready(result) => result,
            ResolvedValue::Future(future) => future.await,
        }
    }
}

impl From<ConstValue> for ResolvedValue {
    fn from(value: ConstValue) -> Self {
        ResolvedValue::value(value)
    }
}

#[derive(Clone)]
pub struct Resolver(Arc<dyn Fn(ResolverContext<'_>) -> ResolvedValue + Send + Sync>);

impl Resolver {
    pub fn new(f: impl Fn(ResolverContext<'_>) -> ResolvedValue + Send + Sync + 'static) -> Self {
        Resolver(Arc::new(f))
    }

    pub(crate) fn resolve(&self, ctx: ResolverContext<'_>) -> ResolvedValue {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver")
    }
}
