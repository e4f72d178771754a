use async_graphql_parser::types::SelectionSet;
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::ConstValue;
use futures::future::BoxFuture;
use futures_util::future::join_all;
use query_path::QueryPath;

use crate::context::ExecutionContext;
use crate::deferred::{DeferredWorkload, WorkloadKind};
use crate::error::{ServerError, ServerResult};
use crate::registry::{MetaFieldType, MetaType};

use super::container::resolve_container;
use super::StreamDirective;

/// Completes a resolved value against its declared type: unwraps non-null,
/// recurses into lists, resolves sub-selections on containers and passes
/// leaves through.
///
/// When the field carries `@stream(initial_count: N)`, only the first `N`
/// elements complete inline; every trailing element is snapshotted as a
/// deferred workload at its indexed path.
///
/// Errors return as `Err` so the caller decides where null propagation
/// stops; list elements are their own boundary when the element type is
/// nullable.
pub(super) fn complete_value<'a>(
    ctx: &'a ExecutionContext,
    ty: MetaFieldType,
    value: ConstValue,
    path: QueryPath,
    selection_set: &'a Positioned<SelectionSet>,
    pos: Pos,
    stream: Option<StreamDirective>,
) -> BoxFuture<'a, ServerResult<ConstValue>> {
    Box::pin(async move {
        if ty.is_non_null() {
            let completed =
                complete_value(ctx, ty.nullable(), value, path.clone(), selection_set, pos, stream)
                    .await?;
            if completed == ConstValue::Null {
                return Err(ServerError::new(
                    format!("Cannot return null for non-nullable field {path}"),
                    Some(pos),
                )
                .at_path(&path));
            }
            return Ok(completed);
        }

        if value == ConstValue::Null {
            return Ok(ConstValue::Null);
        }

        if ty.is_list() {
            let element_type = ty.list_element_type().expect("list type has an element");
            let ConstValue::List(items) = value else {
                return Err(ServerError::new(
                    format!("Expected a list at {path}, the resolver returned something else"),
                    Some(pos),
                )
                .at_path(&path));
            };

            let inline_count = match &stream {
                Some(stream) => stream.initial_count.min(items.len()),
                None => items.len(),
            };

            let mut futures: Vec<BoxFuture<'a, ServerResult<ConstValue>>> =
                Vec::with_capacity(inline_count);
            let mut trailing = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let element_path = path.child_index(index);
                if index < inline_count {
                    futures.push(complete_element(
                        ctx,
                        element_type.clone(),
                        item,
                        element_path,
                        selection_set,
                        pos,
                    ));
                } else {
                    trailing.push((element_path, item));
                }
            }

            if let Some(stream) = &stream {
                let sender = ctx
                    .workloads
                    .as_ref()
                    .expect("@stream is only parsed with deferred delivery enabled");
                for (element_path, item) in trailing {
                    sender.send(DeferredWorkload {
                        label: stream.label.clone(),
                        kind: WorkloadKind::StreamElement {
                            element_type: element_type.clone(),
                        },
                        path: element_path,
                        parent_type_name: element_type.named_type().to_owned(),
                        parent_value: item,
                        selection_set: selection_set.clone(),
                    });
                }
            }

            let mut completed = Vec::with_capacity(inline_count);
            for result in join_all(futures).await {
                completed.push(result?);
            }
            return Ok(ConstValue::List(completed));
        }

        let named = ty.named_type();
        let meta_type = ctx.env.schema.registry().lookup(named).ok_or_else(|| {
            ServerError::new(format!("Internal error: unknown type `{named}`"), Some(pos))
                .at_path(&path)
        })?;
        if meta_type.is_leaf() {
            return Ok(value);
        }

        let concrete = resolve_concrete_type(ctx, meta_type, &value, &path, pos)?;
        resolve_container(ctx, concrete, &value, &path, selection_set, false).await
    })
}

/// Completes one inline list element. A nullable element type bounds null
/// propagation at the element itself.
fn complete_element<'a>(
    ctx: &'a ExecutionContext,
    element_type: MetaFieldType,
    item: ConstValue,
    element_path: QueryPath,
    selection_set: &'a Positioned<SelectionSet>,
    pos: Pos,
) -> BoxFuture<'a, ServerResult<ConstValue>> {
    Box::pin(async move {
        let nullable = !element_type.is_non_null();
        match complete_value(
            ctx,
            element_type,
            item,
            element_path,
            selection_set,
            pos,
            None,
        )
        .await
        {
            Ok(value) => Ok(value),
            Err(error) if nullable => {
                ctx.errors.record(error);
                Ok(ConstValue::Null)
            }
            Err(error) => Err(error),
        }
    })
}

/// Finds the concrete object type for a container value. Abstract types
/// resolve through the value's `__typename` property.
fn resolve_concrete_type<'a>(
    ctx: &'a ExecutionContext,
    meta_type: &'a MetaType,
    value: &ConstValue,
    path: &QueryPath,
    pos: Pos,
) -> ServerResult<&'a MetaType> {
    match meta_type {
        MetaType::Object { .. } => Ok(meta_type),
        MetaType::Interface { .. } | MetaType::Union { .. } => {
            let typename = match value {
                ConstValue::Object(map) => map.get("__typename").and_then(|v| match v {
                    ConstValue::String(name) => Some(name.as_str()),
                    _ => None,
                }),
                _ => None,
            };
            let Some(typename) = typename else {
                return Err(ServerError::new(
                    format!(
                        r#"Abstract type "{}" must resolve to an object type at runtime, but the value carries no "__typename""#,
                        meta_type.name()
                    ),
                    Some(pos),
                )
                .at_path(path));
            };
            ctx.env.schema.registry().lookup(typename).ok_or_else(|| {
                ServerError::new(
                    format!(r#"Unknown concrete type "{typename}""#),
                    Some(pos),
                )
                .at_path(path)
            })
        }
        MetaType::Scalar { .. } | MetaType::Enum { .. } => {
            unreachable!("leaf types complete without a sub-selection")
        }
    }
}
