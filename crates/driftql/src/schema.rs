use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_graphql_parser::types::{DocumentOperations, OperationDefinition, OperationType};
use async_graphql_parser::Positioned;
use async_graphql_value::ConstValue;
use futures::Stream;
use futures_util::StreamExt;
use query_path::QueryPath;
use ulid::Ulid;

use crate::context::{ErrorSink, ExecutionContext, QueryEnv};
use crate::deferred::{DeferredWorkloadSender, PatchDispatcher, Patches};
use crate::error::{SchemaError, ServerError};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::{IncrementalPayload, Response, StreamingPayload};
use crate::resolver_utils;

/// A validated, executable schema. Cheap to clone and share.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

struct SchemaInner {
    registry: Registry,
}

/// What one execution produces: the initial response plus, when the
/// operation deferred anything, the lazy patch sequence.
pub struct ExecutionResponse {
    pub response: Response,
    /// Present iff at least one `@defer`/`@stream` workload was registered.
    pub patches: Option<Patches>,
}

impl Schema {
    pub fn build(registry: Registry) -> Result<Self, SchemaError> {
        registry.validate()?;
        Ok(Schema(Arc::new(SchemaInner { registry })))
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    /// Executes an operation, producing the initial result synchronously
    /// with respect to the end of non-deferred execution. Deferred workloads
    /// only start resolving once the returned patch stream is drained.
    pub async fn execute(&self, request: Request) -> ExecutionResponse {
        let Request {
            document,
            operation_name,
            root_value,
            variables,
            data,
            enable_deferred_delivery,
        } = request;

        let operation: Positioned<OperationDefinition> = match document.operations {
            DocumentOperations::Single(operation) => operation,
            DocumentOperations::Multiple(mut operations) => match &operation_name {
                Some(name) => match operations.remove(name.as_str()) {
                    Some(operation) => operation,
                    None => {
                        return ExecutionResponse::request_error(format!(
                            r#"Unknown operation named "{name}"."#
                        ))
                    }
                },
                None if operations.len() == 1 => {
                    operations.into_iter().next().expect("length checked").1
                }
                None => {
                    return ExecutionResponse::request_error(
                        "Operation name required in multi-operation document.",
                    )
                }
            },
        };

        let root_type_name = match operation.node.ty {
            OperationType::Query => self.0.registry.query_type.clone(),
            OperationType::Mutation => match &self.0.registry.mutation_type {
                Some(mutation_type) => mutation_type.clone(),
                None => {
                    return ExecutionResponse::request_error(
                        "Schema is not configured for mutations.",
                    )
                }
            },
            OperationType::Subscription => {
                return ExecutionResponse::request_error(
                    "Subscription operations are not supported.",
                )
            }
        };
        // Mutation root fields resolve one at a time.
        let serial = operation.node.ty == OperationType::Mutation;

        let env = Arc::new(QueryEnv {
            schema: self.clone(),
            fragments: document.fragments,
            variables,
            data,
            execution_id: Ulid::new(),
            seen_labels: Mutex::new(HashMap::new()),
        });
        tracing::debug!(
            execution_id = %env.execution_id,
            operation_type = ?operation.node.ty,
            deferred_delivery = enable_deferred_delivery,
            "executing operation"
        );

        let dispatcher = enable_deferred_delivery.then(|| {
            let env = env.clone();
            PatchDispatcher::new(Arc::new(move |workload, dispatcher| {
                Box::pin(resolver_utils::resolve_deferred_workload(
                    env.clone(),
                    workload,
                    dispatcher,
                )) as futures::future::BoxFuture<'static, (ConstValue, Vec<ServerError>)>
            }))
        });

        let errors = ErrorSink::default();
        let ctx = ExecutionContext {
            env: env.clone(),
            errors: errors.clone(),
            workloads: dispatcher.clone().map(DeferredWorkloadSender::new),
        };

        let root_type = env
            .schema
            .registry()
            .lookup(&root_type_name)
            .expect("root types are validated at build time");
        let path = QueryPath::empty();
        let data = match resolver_utils::resolve_container(
            &ctx,
            root_type,
            &root_value,
            &path,
            &operation.node.selection_set,
            serial,
        )
        .await
        {
            Ok(data) => data,
            Err(error) => {
                errors.record(error);
                ConstValue::Null
            }
        };

        let patches = match dispatcher {
            Some(dispatcher) => match dispatcher.into_patches() {
                Ok(patches) => patches,
                Err(fatal) => {
                    return ExecutionResponse {
                        response: Response::from_errors(vec![fatal]),
                        patches: None,
                    };
                }
            },
            None => None,
        };

        ExecutionResponse {
            response: Response {
                data: Some(data),
                errors: errors.into_errors(),
            },
            patches,
        }
    }

    /// Executes an operation and frames the whole delivery as a stream of
    /// payloads: the initial response first, then one payload per patch,
    /// each flagged with whether more follow.
    pub fn execute_stream(
        &self,
        request: Request,
    ) -> impl Stream<Item = StreamingPayload> + Send + 'static {
        let schema = self.clone();
        async_stream::stream! {
            let response = schema.execute(request).await;
            let payloads = response.into_streaming_payloads();
            futures_util::pin_mut!(payloads);
            while let Some(payload) = payloads.next().await {
                yield payload;
            }
        }
    }
}

impl ExecutionResponse {
    fn request_error(message: impl Into<String>) -> Self {
        ExecutionResponse {
            response: Response::from_errors(vec![ServerError::new(message, None)]),
            patches: None,
        }
    }

    pub fn into_parts(self) -> (Response, Option<Patches>) {
        (self.response, self.patches)
    }

    /// The transport-ready payload sequence: the initial response followed
    /// by every patch, with `hasNext` set on all but the last payload.
    pub fn into_streaming_payloads(self) -> impl Stream<Item = StreamingPayload> + Send + 'static {
        let ExecutionResponse { response, patches } = self;
        async_stream::stream! {
            match patches {
                None => yield response.into_streaming_payload(false),
                Some(mut patches) => {
                    yield response.into_streaming_payload(true);
                    let mut previous: Option<IncrementalPayload> = None;
                    while let Some(payload) = patches.next().await {
                        if let Some(previous) = previous.take() {
                            yield previous.into_streaming_payload(true);
                        }
                        previous = Some(payload);
                    }
                    if let Some(last) = previous {
                        yield last.into_streaming_payload(false);
                    }
                }
            }
        }
    }
}
