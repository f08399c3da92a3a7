//! The type hierarchy declared through `x-extends`.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use crate::ld_context::LdContext;

/// Immutable `type → parents` map, keyed by full type id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeHierarchy {
    parents: IndexMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new(parents: IndexMap<String, Vec<String>>) -> Self {
        Self { parents }
    }

    /// Build from `(type, parents)` pairs.
    pub fn from_pairs<I, T, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(t, p)| (t.into(), p.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    /// The direct parents of `type_id`.
    pub fn parents(&self, type_id: &str) -> &[String] {
        self.parents.get(type_id).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// All entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.parents.iter()
    }

    /// `true` if `ancestor` is reachable from `type_id` through parent links.
    /// A type is not its own subtype.
    pub fn is_subtype_of(&self, type_id: &str, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.parents(type_id).iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.parents(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// Every type that has `type_id` as a direct or indirect parent, in
    /// discovery order.
    pub fn subtypes(&self, type_id: &str) -> Vec<&str> {
        let mut found: IndexSet<&str> = IndexSet::new();
        let mut frontier = vec![type_id];
        while let Some(current) = frontier.pop() {
            for (child, parents) in &self.parents {
                if child != type_id
                    && parents.iter().any(|p| p == current)
                    && found.insert(child.as_str())
                {
                    frontier.push(child.as_str());
                }
            }
        }
        found.into_iter().collect()
    }

    /// The broker `type=` query value for `type_id`: its short term followed by
    /// the short terms of all its subtypes, comma separated.
    pub fn subtype_query(&self, type_id: &str, context: &LdContext) -> String {
        std::iter::once(type_id)
            .chain(self.subtypes(type_id))
            .map(|t| context.shorten(t))
            .collect::<Vec<_>>()
            .join(",")
    }
}
