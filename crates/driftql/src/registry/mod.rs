//! The type system the executor runs against.
//!
//! A [`Registry`] is the validated schema handed to the engine: named types
//! keyed by name, the operation root types, and the interface/union
//! membership table used when matching fragment type conditions. Field types
//! are kept as GraphQL type reference strings (`"[Droid!]!"`) and unwrapped
//! on demand.

mod resolvers;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::SchemaError;

pub use resolvers::{ResolvedValue, Resolver, ResolverContext};

#[derive(Debug, Default)]
pub struct Registry {
    pub types: IndexMap<String, MetaType>,
    pub query_type: String,
    pub mutation_type: Option<String>,
    /// For each object type, the interfaces and unions it belongs to.
    pub implements: HashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Option<&MetaType> {
        self.types.get(name)
    }

    /// Whether a fragment with the given type condition applies to a value of
    /// the given concrete type.
    pub fn type_condition_matches(&self, concrete: &str, condition: &str) -> bool {
        concrete == condition
            || self
                .implements
                .get(concrete)
                .is_some_and(|memberships| memberships.contains(condition))
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let query_root = self
            .lookup(&self.query_type)
            .ok_or_else(|| SchemaError::MissingQueryRoot(self.query_type.clone()))?;
        if !matches!(query_root, MetaType::Object { .. }) {
            return Err(SchemaError::RootNotAnObject(self.query_type.clone()));
        }
        if let Some(mutation_type) = &self.mutation_type {
            let mutation_root = self
                .lookup(mutation_type)
                .ok_or_else(|| SchemaError::MissingQueryRoot(mutation_type.clone()))?;
            if !matches!(mutation_root, MetaType::Object { .. }) {
                return Err(SchemaError::RootNotAnObject(mutation_type.clone()));
            }
        }

        for ty in self.types.values() {
            for field in ty.fields().into_iter().flatten() {
                let named = field.ty.named_type();
                if self.lookup(named).is_none() {
                    return Err(SchemaError::UnknownFieldType {
                        parent: ty.name().to_owned(),
                        field: field.name.clone(),
                        ty: named.to_owned(),
                    });
                }
            }
            for possible in ty.possible_types().into_iter().flatten() {
                if self.lookup(possible).is_none() {
                    return Err(SchemaError::UnknownPossibleType {
                        ty: ty.name().to_owned(),
                        possible: possible.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum MetaType {
    Object {
        name: String,
        fields: IndexMap<String, MetaField>,
    },
    Interface {
        name: String,
        fields: IndexMap<String, MetaField>,
        possible_types: HashSet<String>,
    },
    Union {
        name: String,
        possible_types: HashSet<String>,
    },
    Scalar {
        name: String,
    },
    Enum {
        name: String,
        values: Vec<String>,
    },
}

impl MetaType {
    pub fn name(&self) -> &str {
        match self {
            MetaType::Object { name, .. }
            | MetaType::Interface { name, .. }
            | MetaType::Union { name, .. }
            | MetaType::Scalar { name }
            | MetaType::Enum { name, .. } => name,
        }
    }

    pub fn field_by_name(&self, name: &str) -> Option<&MetaField> {
        match self {
            MetaType::Object { fields, .. } | MetaType::Interface { fields, .. } => {
                fields.get(name)
            }
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<impl Iterator<Item = &MetaField>> {
        match self {
            MetaType::Object { fields, .. } | MetaType::Interface { fields, .. } => {
                Some(fields.values())
            }
            _ => None,
        }
    }

    pub fn possible_types(&self) -> Option<impl Iterator<Item = &String>> {
        match self {
            MetaType::Interface { possible_types, .. } | MetaType::Union { possible_types, .. } => {
                Some(possible_types.iter())
            }
            _ => None,
        }
    }

    /// Leaf types complete without a sub-selection.
    pub fn is_leaf(&self) -> bool {
        matches!(self, MetaType::Scalar { .. } | MetaType::Enum { .. })
    }
}

/// A GraphQL type reference string, e.g. `"[Droid!]!"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFieldType(String);

impl MetaFieldType {
    pub fn new(ty: impl Into<String>) -> Self {
        MetaFieldType(ty.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_non_null(&self) -> bool {
        self.0.ends_with('!')
    }

    pub fn is_list(&self) -> bool {
        self.nullable_str().starts_with('[')
    }

    /// Strips one level of non-null wrapping, if present.
    pub fn nullable(&self) -> MetaFieldType {
        MetaFieldType(self.nullable_str().to_owned())
    }

    /// The element type of a list reference: `"[Droid!]!"` -> `"Droid!"`.
    pub fn list_element_type(&self) -> Option<MetaFieldType> {
        let inner = self.nullable_str();
        inner
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .map(|element| MetaFieldType(element.to_owned()))
    }

    /// The named type at the bottom of all list/non-null wrappers.
    pub fn named_type(&self) -> &str {
        self.0.trim_matches(|c| c == '[' || c == ']' || c == '!')
    }

    fn nullable_str(&self) -> &str {
        self.0.strip_suffix('!').unwrap_or(&self.0)
    }
}

impl From<&str> for MetaFieldType {
    fn from(ty: &str) -> Self {
        MetaFieldType::new(ty)
    }
}

impl From<String> for MetaFieldType {
    fn from(ty: String) -> Self {
        MetaFieldType::new(ty)
    }
}

impl std::fmt::Display for MetaFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct MetaField {
    pub name: String,
    pub ty: MetaFieldType,
    /// How to produce this field's value. Fields without a resolver read the
    /// same-named property off the parent object value.
    pub resolver: Option<Resolver>,
}

impl MetaField {
    pub fn new(name: impl Into<String>, ty: impl Into<MetaFieldType>) -> Self {
        MetaField {
            name: name.into(),
            ty: ty.into(),
            resolver: None,
        }
    }

    pub fn with_resolver(
        name: impl Into<String>,
        ty: impl Into<MetaFieldType>,
        resolver: Resolver,
    ) -> Self {
        MetaField {
            name: name.into(),
            ty: ty.into(),
            resolver: Some(resolver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_unwrapping() {
        let ty = MetaFieldType::new("[Droid!]!");
        assert!(ty.is_non_null());
        assert!(ty.is_list());
        assert_eq!(ty.named_type(), "Droid");

        let element = ty.list_element_type().unwrap();
        assert_eq!(element.as_str(), "Droid!");
        assert!(element.is_non_null());
        assert!(!element.is_list());
        assert_eq!(element.nullable().as_str(), "Droid");

        assert!(!MetaFieldType::new("String").is_non_null());
        assert_eq!(MetaFieldType::new("String").list_element_type(), None);
    }
}
