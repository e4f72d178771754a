use async_graphql_parser::types::{Field, Selection, SelectionSet};
use async_graphql_parser::Positioned;
use async_graphql_value::{ConstValue, Name};
use futures::future::BoxFuture;
use futures_util::future::join_all;
use indexmap::IndexMap;
use query_path::QueryPath;

use crate::context::ExecutionContext;
use crate::deferred::{DeferredWorkload, WorkloadKind};
use crate::error::{ServerError, ServerResult};
use crate::registry::{MetaField, MetaType, ResolverContext};

use super::list::complete_value;
use super::{parse_defer, parse_stream, selection_included};

/// One collected field occurrence: the response key it lands under and the
/// selection that produced it. The same key can occur several times (field
/// merging across fragments); occurrences merge during assembly.
struct FieldEntry<'a> {
    response_key: Name,
    field: &'a Positioned<Field>,
}

type BoxFieldFuture<'a> = BoxFuture<'a, ServerResult<(Name, ConstValue)>>;

/// Resolves a container value by collecting the selection set's fields and
/// executing them, concurrently unless `serial` (mutation roots resolve one
/// field at a time).
pub(crate) fn resolve_container<'a>(
    ctx: &'a ExecutionContext,
    ty: &'a MetaType,
    parent_value: &'a ConstValue,
    path: &'a QueryPath,
    selection_set: &'a Positioned<SelectionSet>,
    serial: bool,
) -> BoxFuture<'a, ServerResult<ConstValue>> {
    Box::pin(async move {
        let mut entries = Vec::new();
        collect_fields(ctx, ty, parent_value, path, selection_set, &mut entries)?;

        let futures: Vec<BoxFieldFuture<'a>> = entries
            .into_iter()
            .map(|entry| resolve_field_entry(ctx, ty, parent_value, path, entry))
            .collect();

        let results = if serial {
            let mut results = Vec::with_capacity(futures.len());
            for future in futures {
                results.push(future.await);
            }
            results
        } else {
            join_all(futures).await
        };

        let mut map = IndexMap::new();
        for result in results {
            // A non-null violation in any field fails the whole container;
            // sibling resolution has still run to completion by now.
            let (name, value) = result?;
            insert_value(&mut map, name, value);
        }
        Ok(ConstValue::Object(map))
    })
}

/// Standard GraphQL field collection, with two extra branches: a deferred
/// fragment snapshots a workload instead of contributing fields, and
/// `@skip`/`@include` are evaluated before anything else.
fn collect_fields<'a>(
    ctx: &'a ExecutionContext,
    ty: &MetaType,
    parent_value: &ConstValue,
    path: &QueryPath,
    selection_set: &'a Positioned<SelectionSet>,
    entries: &mut Vec<FieldEntry<'a>>,
) -> ServerResult<()> {
    for selection in &selection_set.node.items {
        match &selection.node {
            Selection::Field(field) => {
                if !selection_included(ctx, &field.node.directives)? {
                    continue;
                }
                entries.push(FieldEntry {
                    response_key: field.node.response_key().node.clone(),
                    field,
                });
            }
            Selection::FragmentSpread(spread) => {
                if !selection_included(ctx, &spread.node.directives)? {
                    continue;
                }
                let fragment = ctx
                    .env
                    .fragments
                    .get(&spread.node.fragment_name.node)
                    .ok_or_else(|| {
                        ServerError::new(
                            format!(
                                r#"Unknown fragment "{}"."#,
                                spread.node.fragment_name.node
                            ),
                            Some(spread.pos),
                        )
                    })?;
                let condition = fragment.node.type_condition.node.on.node.as_str();
                if !ctx
                    .env
                    .schema
                    .registry()
                    .type_condition_matches(ty.name(), condition)
                {
                    continue;
                }
                if defer_fragment(
                    ctx,
                    ty,
                    parent_value,
                    path,
                    &spread.node.directives,
                    &fragment.node.selection_set,
                )? {
                    continue;
                }
                collect_fields(
                    ctx,
                    ty,
                    parent_value,
                    path,
                    &fragment.node.selection_set,
                    entries,
                )?;
            }
            Selection::InlineFragment(fragment) => {
                if !selection_included(ctx, &fragment.node.directives)? {
                    continue;
                }
                if let Some(condition) = &fragment.node.type_condition {
                    if !ctx
                        .env
                        .schema
                        .registry()
                        .type_condition_matches(ty.name(), condition.node.on.node.as_str())
                    {
                        continue;
                    }
                }
                if defer_fragment(
                    ctx,
                    ty,
                    parent_value,
                    path,
                    &fragment.node.directives,
                    &fragment.node.selection_set,
                )? {
                    continue;
                }
                collect_fields(
                    ctx,
                    ty,
                    parent_value,
                    path,
                    &fragment.node.selection_set,
                    entries,
                )?;
            }
        }
    }
    Ok(())
}

/// Registers a deferred workload for a fragment, if it carries an applicable
/// `@defer`. Returns whether the fragment was deferred; a deferred
/// fragment's fields are excluded from the current resolution and delivered
/// as a patch instead. Fields the fragment shares with un-deferred siblings
/// still resolve now through those siblings.
fn defer_fragment(
    ctx: &ExecutionContext,
    ty: &MetaType,
    parent_value: &ConstValue,
    path: &QueryPath,
    directives: &[Positioned<async_graphql_parser::types::Directive>],
    selection_set: &Positioned<SelectionSet>,
) -> ServerResult<bool> {
    let Some(sender) = &ctx.workloads else {
        // Deferred delivery disabled: @defer is a no-op.
        return Ok(false);
    };
    let Some(defer) = parse_defer(ctx, directives)? else {
        return Ok(false);
    };

    sender.send(DeferredWorkload {
        label: defer.label,
        kind: WorkloadKind::Defer,
        path: path.clone(),
        parent_type_name: ty.name().to_owned(),
        parent_value: parent_value.clone(),
        selection_set: selection_set.clone(),
    });
    Ok(true)
}

fn resolve_field_entry<'a>(
    ctx: &'a ExecutionContext,
    ty: &'a MetaType,
    parent_value: &'a ConstValue,
    path: &'a QueryPath,
    entry: FieldEntry<'a>,
) -> BoxFieldFuture<'a> {
    Box::pin(async move {
        let field = entry.field;
        let field_name = field.node.name.node.as_str();
        let field_path = path.child_field(entry.response_key.as_str());

        if field_name == "__typename" {
            return Ok((
                entry.response_key,
                ConstValue::String(ty.name().to_owned()),
            ));
        }

        let meta_field = ty.field_by_name(field_name).ok_or_else(|| {
            ServerError::new(
                format!(r#"Cannot query field "{field_name}" on type "{}"."#, ty.name()),
                Some(field.pos),
            )
            .at_path(&field_path)
        })?;

        match resolve_field_value(ctx, meta_field, field, parent_value, &field_path).await {
            Ok(value) => Ok((entry.response_key, value)),
            Err(error) if meta_field.ty.is_non_null() => Err(error),
            Err(error) => {
                ctx.errors.record(error);
                Ok((entry.response_key, ConstValue::Null))
            }
        }
    })
}

/// Resolves and completes one field occurrence. Any error comes back as
/// `Err`; the caller decides whether it nulls the field or propagates
/// through a non-null boundary.
async fn resolve_field_value(
    ctx: &ExecutionContext,
    meta_field: &MetaField,
    field: &Positioned<Field>,
    parent_value: &ConstValue,
    field_path: &QueryPath,
) -> ServerResult<ConstValue> {
    let field_name = field.node.name.node.as_str();

    let mut args = IndexMap::new();
    for (name, value) in &field.node.arguments {
        let value = super::resolve_argument(ctx, value).map_err(|e| e.at_path(field_path))?;
        args.insert(name.node.clone(), value);
    }

    let stream = if ctx.workloads.is_some() {
        parse_stream(ctx, field, &meta_field.ty)?
    } else {
        None
    };

    let resolved = match &meta_field.resolver {
        Some(resolver) => {
            resolver
                .resolve(ResolverContext {
                    parent_value,
                    args: &args,
                    data: &ctx.env.data,
                    field_name,
                    path: field_path,
                })
                .into_value()
                .await
        }
        // Fields without a resolver read the parent's property.
        None => Ok(default_resolve(parent_value, field_name)),
    };

    match resolved {
        Ok(value) => {
            complete_value(
                ctx,
                meta_field.ty.clone(),
                value,
                field_path.clone(),
                &field.node.selection_set,
                field.pos,
                stream,
            )
            .await
        }
        Err(mut error) => {
            // A synchronously thrown error and a failed future land here
            // identically, stamped with this field's site.
            if error.locations.is_empty() {
                error.locations.push(field.pos.into());
            }
            Err(error.at_path(field_path))
        }
    }
}

fn default_resolve(parent_value: &ConstValue, field_name: &str) -> ConstValue {
    match parent_value {
        ConstValue::Object(map) => map.get(field_name).cloned().unwrap_or(ConstValue::Null),
        _ => ConstValue::Null,
    }
}

/// Merges a resolved field into the response object. The same response key
/// may be produced by several selections (e.g. a field repeated inside a
/// fragment); objects merge recursively, lists merge element-wise.
fn insert_value(target: &mut IndexMap<Name, ConstValue>, name: Name, value: ConstValue) {
    if let Some(prev_value) = target.get_mut(&name) {
        if let ConstValue::Object(target_map) = prev_value {
            if let ConstValue::Object(obj) = value {
                for (key, value) in obj {
                    insert_value(target_map, key, value);
                }
            }
        } else if let ConstValue::List(target_list) = prev_value {
            if let ConstValue::List(list) = value {
                for (idx, value) in list.into_iter().enumerate() {
                    if let Some(ConstValue::Object(target_map)) = target_list.get_mut(idx) {
                        if let ConstValue::Object(obj) = value {
                            for (key, value) in obj {
                                insert_value(target_map, key, value);
                            }
                        }
                    }
                }
            }
        }
    } else {
        target.insert(name, value);
    }
}
