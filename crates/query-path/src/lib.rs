//! Paths into a GraphQL response.
//!
//! A [`QueryPath`] identifies a position in the response tree: a sequence of
//! field names and list indices, root first. Paths show up in two roles: as
//! wire values (the `path` of an error or an incremental payload serializes
//! as `["hero", "friends", 2]`) and as identifiers (the dispatcher keys its
//! bookkeeping on [`QueryPath::key`]).
//!
//! Paths are immutable. Extending one produces a new path that shares its
//! parent chain, so handing a path to every field resolution is cheap.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// One step in a [`QueryPath`]: a response field name or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryPathSegment {
    Field(Arc<str>),
    Index(usize),
}

impl Serialize for QueryPathSegment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            QueryPathSegment::Field(name) => serializer.serialize_str(name),
            QueryPathSegment::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

impl fmt::Display for QueryPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPathSegment::Field(name) => f.write_str(name),
            QueryPathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

#[derive(Debug)]
struct QueryPathNode {
    parent: QueryPath,
    segment: QueryPathSegment,
}

/// An immutable path into the response, root first.
#[derive(Debug, Clone, Default)]
pub struct QueryPath(Option<Arc<QueryPathNode>>);

impl QueryPath {
    /// The empty path, i.e. the response root.
    pub fn empty() -> Self {
        QueryPath(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut current = &self.0;
        while let Some(node) = current {
            len += 1;
            current = &node.parent.0;
        }
        len
    }

    /// Extends this path with a response field name.
    pub fn child_field(&self, name: impl Into<Arc<str>>) -> Self {
        self.child(QueryPathSegment::Field(name.into()))
    }

    /// Extends this path with a list index.
    pub fn child_index(&self, index: usize) -> Self {
        self.child(QueryPathSegment::Index(index))
    }

    pub fn child(&self, segment: QueryPathSegment) -> Self {
        QueryPath(Some(Arc::new(QueryPathNode {
            parent: self.clone(),
            segment,
        })))
    }

    /// The segments of this path, root first.
    pub fn segments(&self) -> Vec<&QueryPathSegment> {
        let mut segments = Vec::with_capacity(self.len());
        let mut current = &self.0;
        while let Some(node) = current {
            segments.push(&node.segment);
            current = &node.parent.0;
        }
        segments.reverse();
        segments
    }

    /// A stable string form of this path, usable as a map key.
    ///
    /// `.` is reserved: it never appears in GraphQL response keys, so two
    /// distinct paths never collide.
    pub fn key(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        for (i, segment) in self.segments().into_iter().enumerate() {
            if i != 0 {
                out.push('.');
            }
            let _ = write!(out, "{segment}");
        }
        out
    }

    /// The longest path that is a prefix of both `self` and `other`.
    ///
    /// The empty prefix is legal.
    pub fn common_prefix(&self, other: &QueryPath) -> QueryPath {
        let left = self.segments();
        let right = other.segments();
        let shared = left
            .iter()
            .zip(&right)
            .take_while(|(a, b)| a == b)
            .count();

        // A prefix of `self` can share its node chain instead of reallocating.
        if shared == left.len() {
            return self.clone();
        }
        if shared == right.len() {
            return other.clone();
        }
        left[..shared].iter().map(|&segment| segment.clone()).collect()
    }
}

impl PartialEq for QueryPath {
    fn eq(&self, other: &Self) -> bool {
        self.segments() == other.segments()
    }
}

impl Eq for QueryPath {}

impl std::hash::Hash for QueryPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for segment in self.segments() {
            segment.hash(state);
        }
    }
}

impl Serialize for QueryPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.segments())
    }
}

impl FromIterator<QueryPathSegment> for QueryPath {
    fn from_iter<I: IntoIterator<Item = QueryPathSegment>>(iter: I) -> Self {
        let mut path = QueryPath::empty();
        for segment in iter {
            path = path.child(segment);
        }
        path
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().into_iter().enumerate() {
            if i != 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_friends_2() -> QueryPath {
        QueryPath::empty()
            .child_field("hero")
            .child_field("friends")
            .child_index(2)
    }

    #[test]
    fn key_is_stable() {
        assert_eq!(hero_friends_2().key(), "hero.friends.2");
        assert_eq!(QueryPath::empty().key(), "");
    }

    #[test]
    fn extension_leaves_the_parent_untouched() {
        let parent = QueryPath::empty().child_field("hero");
        let a = parent.child_field("name");
        let b = parent.child_index(0);
        assert_eq!(parent.key(), "hero");
        assert_eq!(a.key(), "hero.name");
        assert_eq!(b.key(), "hero.0");
    }

    #[test]
    fn equality_is_structural() {
        let a = hero_friends_2();
        let b: QueryPath = [
            QueryPathSegment::Field("hero".into()),
            QueryPathSegment::Field("friends".into()),
            QueryPathSegment::Index(2),
        ]
        .into_iter()
        .collect();
        assert_eq!(a, b);
        assert_ne!(a, QueryPath::empty().child_field("hero"));
    }

    #[test]
    fn common_prefix() {
        let base = QueryPath::empty().child_field("hero").child_field("friends");
        let a = base.child_index(0);
        let b = base.child_index(1);
        assert_eq!(a.common_prefix(&b), base);
        assert_eq!(a.common_prefix(&a), a);

        let unrelated = QueryPath::empty().child_field("villain");
        assert_eq!(a.common_prefix(&unrelated), QueryPath::empty());

        // A full prefix of the other path.
        assert_eq!(base.common_prefix(&a), base);
    }

    #[test]
    fn serializes_as_a_wire_array() {
        insta::assert_json_snapshot!(hero_friends_2(), @r###"
        [
          "hero",
          "friends",
          2
        ]
        "###);
    }
}
