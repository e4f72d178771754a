use async_graphql_parser::types::ExecutableDocument;
use async_graphql_value::{ConstValue, Variables};

use crate::context::ContextData;

/// One execution of an operation against a [`Schema`](crate::Schema).
///
/// The document is consumed parsed and validated; parsing belongs to the
/// caller. Deferred delivery is on by default: with it disabled the same
/// operation is still accepted and `@defer`/`@stream` become no-ops, all
/// data landing in the initial result.
pub struct Request {
    pub document: ExecutableDocument,
    pub operation_name: Option<String>,
    pub root_value: ConstValue,
    pub variables: Variables,
    pub data: ContextData,
    pub enable_deferred_delivery: bool,
}

impl Request {
    pub fn new(document: ExecutableDocument) -> Self {
        Request {
            document,
            operation_name: None,
            root_value: ConstValue::Null,
            variables: Variables::default(),
            data: ContextData::default(),
            enable_deferred_delivery: true,
        }
    }

    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn root_value(mut self, root_value: ConstValue) -> Self {
        self.root_value = root_value;
        self
    }

    /// Insert context data visible to every resolver of this execution.
    #[must_use]
    pub fn data<T: std::any::Any + Send + Sync>(mut self, data: T) -> Self {
        self.data.insert(data);
        self
    }

    /// Treat `@defer` and `@stream` as no-ops for this request.
    #[must_use]
    pub fn disable_deferred_delivery(mut self) -> Self {
        self.enable_deferred_delivery = false;
        self
    }
}
