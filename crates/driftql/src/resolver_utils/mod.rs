//! Walks an operation's selection sets, invokes resolvers and assembles the
//! response, registering deferred workloads along the way.

mod container;
mod list;

use std::sync::Arc;

use async_graphql_parser::types::Directive;
use async_graphql_parser::Positioned;
use async_graphql_value::ConstValue;

use crate::context::{ErrorSink, ExecutionContext, QueryEnv};
use crate::deferred::{DeferredWorkload, DeferredWorkloadSender, PatchDispatcher, WorkloadKind};
use crate::error::{ServerError, ServerResult};

pub(crate) use container::resolve_container;

/// Resolves a directive argument, substituting variables from the request.
fn resolve_argument(
    ctx: &ExecutionContext,
    value: &Positioned<async_graphql_value::Value>,
) -> ServerResult<ConstValue> {
    value.node.clone().into_const_with(|name| {
        ctx.env
            .variables
            .get(&name)
            .cloned()
            .ok_or_else(|| {
                ServerError::new(
                    format!(r#"Variable "${name}" is not defined."#),
                    Some(value.pos),
                )
            })
    })
}

fn bool_argument(
    ctx: &ExecutionContext,
    directive: &Positioned<Directive>,
    name: &str,
    default: bool,
) -> ServerResult<bool> {
    let Some(value) = directive.node.get_argument(name) else {
        return Ok(default);
    };
    match resolve_argument(ctx, value)? {
        ConstValue::Boolean(condition) => Ok(condition),
        _ => Err(ServerError::new(
            format!(r#"Invalid value for argument "{name}", expected type "Boolean""#),
            Some(value.pos),
        )),
    }
}

/// Evaluates `@skip` and `@include` on a selection. These come first: an
/// omitted selection is never deferred or resolved.
fn selection_included(
    ctx: &ExecutionContext,
    directives: &[Positioned<Directive>],
) -> ServerResult<bool> {
    for directive in directives {
        let name = directive.node.name.node.as_str();
        let skip = match name {
            "skip" => true,
            "include" => false,
            _ => continue,
        };
        let condition = match directive.node.get_argument("if") {
            Some(value) => match resolve_argument(ctx, value)? {
                ConstValue::Boolean(condition) => condition,
                _ => {
                    return Err(ServerError::new(
                        r#"Invalid value for argument "if", expected type "Boolean""#,
                        Some(value.pos),
                    ))
                }
            },
            None => {
                return Err(ServerError::new(
                    format!(r#"Directive "{name}" requires an "if" argument"#),
                    Some(directive.pos),
                ))
            }
        };
        if condition == skip {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The `@defer` directive, parsed and validated at its site.
struct DeferDirective {
    label: String,
}

/// Parses `@defer` on a fragment spread or inline fragment. Only called when
/// deferred delivery is enabled; a duplicate or malformed label records a
/// request error and the fragment resolves inline as if the directive were
/// absent.
fn parse_defer(
    ctx: &ExecutionContext,
    directives: &[Positioned<Directive>],
) -> ServerResult<Option<DeferDirective>> {
    let Some(directive) = directives
        .iter()
        .find(|directive| directive.node.name.node == "defer")
    else {
        return Ok(None);
    };

    // Label uniqueness comes first: a duplicate label is a request error
    // even when `if:` turns the directive off.
    let Some(label) = label_argument(ctx, directive, "defer")? else {
        return Ok(None);
    };

    if !bool_argument(ctx, directive, "if", true)? {
        return Ok(None);
    }
    Ok(Some(DeferDirective { label }))
}

/// The `@stream` directive, parsed and validated at its field site.
struct StreamDirective {
    label: String,
    initial_count: usize,
}

fn parse_stream(
    ctx: &ExecutionContext,
    field: &Positioned<async_graphql_parser::types::Field>,
    field_type: &crate::registry::MetaFieldType,
) -> ServerResult<Option<StreamDirective>> {
    let Some(directive) = field
        .node
        .directives
        .iter()
        .find(|directive| directive.node.name.node == "stream")
    else {
        return Ok(None);
    };

    if !field_type.is_list() {
        ctx.errors.record(ServerError::new(
            format!(
                r#"@stream can only be applied to list fields, and "{}" is not one"#,
                field.node.name.node
            ),
            Some(directive.pos),
        ));
        return Ok(None);
    }

    let Some(label) = label_argument(ctx, directive, "stream")? else {
        return Ok(None);
    };

    if !bool_argument(ctx, directive, "if", true)? {
        return Ok(None);
    }

    let initial_count = match directive.node.get_argument("initial_count") {
        Some(value) => match resolve_argument(ctx, value)? {
            ConstValue::Number(count) => match count.as_u64() {
                Some(count) => count as usize,
                None => {
                    ctx.errors.record(ServerError::new(
                        r#"@stream initial_count must be a non-negative Int"#,
                        Some(value.pos),
                    ));
                    return Ok(None);
                }
            },
            _ => {
                ctx.errors.record(ServerError::new(
                    r#"Invalid value for argument "initial_count", expected type "Int""#,
                    Some(value.pos),
                ));
                return Ok(None);
            }
        },
        None => {
            ctx.errors.record(ServerError::new(
                r#"@stream requires an "initial_count" argument"#,
                Some(directive.pos),
            ));
            return Ok(None);
        }
    };

    Ok(Some(StreamDirective {
        label,
        initial_count,
    }))
}

/// Extracts and dedups the required `label` argument of `@defer`/`@stream`.
/// Labels are unique across the whole operation, nested deferred scopes
/// included.
fn label_argument(
    ctx: &ExecutionContext,
    directive: &Positioned<Directive>,
    directive_name: &str,
) -> ServerResult<Option<String>> {
    let label = match directive.node.get_argument("label") {
        Some(value) => match resolve_argument(ctx, value)? {
            ConstValue::String(label) => label,
            _ => {
                ctx.errors.record(ServerError::new(
                    r#"Invalid value for argument "label", expected type "String""#,
                    Some(value.pos),
                ));
                return Ok(None);
            }
        },
        None => {
            ctx.errors.record(ServerError::new(
                format!(r#"@{directive_name} requires a "label" argument"#),
                Some(directive.pos),
            ));
            return Ok(None);
        }
    };

    let mut seen = ctx.env.seen_labels.lock().expect("label set poisoned");
    match seen.entry(label.clone()) {
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(directive.pos);
        }
        // The same directive site reached at another response path keeps
        // its label; its units aggregate into one patch.
        std::collections::hash_map::Entry::Occupied(entry) if *entry.get() == directive.pos => {}
        std::collections::hash_map::Entry::Occupied(_) => {
            drop(seen);
            ctx.errors.record(ServerError::new(
                format!(r#"Duplicate @defer/@stream label "{label}""#),
                Some(directive.pos),
            ));
            return Ok(None);
        }
    }
    Ok(Some(label))
}

/// Runs one deferred workload to completion: the same field collection loop,
/// over the captured selection set and parent value, at the captured path.
/// Errors stay with this workload's patch; further `@defer`/`@stream`
/// encountered here register as children of this unit.
pub(crate) async fn resolve_deferred_workload(
    env: Arc<QueryEnv>,
    workload: DeferredWorkload,
    dispatcher: PatchDispatcher,
) -> (ConstValue, Vec<ServerError>) {
    let DeferredWorkload {
        label,
        kind,
        path,
        parent_type_name,
        parent_value,
        selection_set,
    } = workload;

    let errors = ErrorSink::default();
    let ctx = ExecutionContext {
        env: env.clone(),
        errors: errors.clone(),
        workloads: Some(DeferredWorkloadSender::scoped(
            dispatcher,
            label.clone(),
            path.key(),
        )),
    };

    let data = match kind {
        WorkloadKind::Defer => {
            let Some(parent_type) = env.schema.registry().lookup(&parent_type_name) else {
                ctx.errors.record(ServerError::new(
                    format!("Internal error: unknown type `{parent_type_name}`"),
                    None,
                ));
                return (ConstValue::Null, errors.into_errors());
            };
            match resolve_container(&ctx, parent_type, &parent_value, &path, &selection_set, false)
                .await
            {
                Ok(data) => data,
                Err(error) => {
                    // Null propagation stops at the fragment root.
                    ctx.errors.record(error);
                    ConstValue::Null
                }
            }
        }
        WorkloadKind::StreamElement { element_type } => {
            let pos = selection_set.pos;
            match list::complete_value(
                &ctx,
                element_type,
                parent_value,
                path.clone(),
                &selection_set,
                pos,
                None,
            )
            .await
            {
                Ok(data) => data,
                Err(error) => {
                    ctx.errors.record(error);
                    ConstValue::Null
                }
            }
        }
    };

    (data, errors.into_errors())
}
