//! Per-execution environment threaded through resolution.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_graphql_parser::types::FragmentDefinition;
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::{Name, Variables};
use ulid::Ulid;

use crate::deferred::DeferredWorkloadSender;
use crate::error::ServerError;
use crate::schema::Schema;

/// Request-scoped data resolvers can read, keyed by type.
#[derive(Default)]
pub struct ContextData(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl ContextData {
    pub fn insert<T: Any + Send + Sync>(&mut self, data: T) {
        self.0.insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }
}

impl std::fmt::Debug for ContextData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextData").finish_non_exhaustive()
    }
}

/// Everything shared by every resolution scope of one execution: the initial
/// traversal and each deferred workload hold an `Arc` of this.
pub(crate) struct QueryEnv {
    pub schema: Schema,
    pub fragments: HashMap<Name, Positioned<FragmentDefinition>>,
    pub variables: Variables,
    pub data: ContextData,
    pub execution_id: Ulid,
    /// `@defer`/`@stream` labels seen anywhere in the operation, mapped to
    /// the directive site that claimed them. One site may be reached at
    /// many response paths (a deferred fragment under a list) and keeps its
    /// label; a second site reusing the label is a request error.
    pub seen_labels: Mutex<HashMap<String, Pos>>,
}

/// Where errors of the current scope accumulate: the top-level `errors` list
/// during the initial traversal, the patch's `errors` inside a deferred
/// workload.
#[derive(Clone, Default)]
pub(crate) struct ErrorSink(Arc<Mutex<Vec<ServerError>>>);

impl ErrorSink {
    pub fn record(&self, error: ServerError) {
        self.0.lock().expect("error sink poisoned").push(error);
    }

    pub fn into_errors(self) -> Vec<ServerError> {
        match Arc::try_unwrap(self.0) {
            Ok(mutex) => mutex.into_inner().expect("error sink poisoned"),
            Err(shared) => shared.lock().expect("error sink poisoned").clone(),
        }
    }
}

/// One resolution scope: the initial traversal, or a single deferred
/// workload.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub env: Arc<QueryEnv>,
    pub errors: ErrorSink,
    /// `None` when deferred delivery is disabled for the request.
    pub workloads: Option<DeferredWorkloadSender>,
}
