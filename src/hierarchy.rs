//! Hierarchy views over the flat taxonomy
//!
//! The store owns a flat list of categories linked by `parent_id`. This module
//! derives the transient views the API needs from it:
//! - `build_tree`: nested tree rooted at level-1 nodes, children in source order
//! - `flatten`: pre-order walk back to a flat list
//! - `breadcrumbs`: root-first list of ancestor names for one category
//! - `orphans`: records whose parent chain never reaches a root
//!
//! Orphans are left out of the tree but stay in flat queries. Source batches are
//! hand-curated and sometimes reference parents that were never imported, so
//! nothing here tries to repair them.

use crate::db::TargetingCategory;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const UNKNOWN_CATEGORY: &str = "Unknown Category";

/// Deepest level `build_tree` nests. Anything below is left out like an
/// orphan, which bounds recursion when the tree is serialized or dropped.
pub const MAX_TREE_DEPTH: usize = 64;

/// A category with its resolved children
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: TargetingCategory,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Number of nodes in this subtree, self included
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Id lookup over a flat list. Duplicate ids collapse to the last record but
/// keep the position of their first appearance.
pub struct CategoryIndex<'a> {
    by_id: HashMap<&'a str, &'a TargetingCategory>,
    order: Vec<&'a str>,
}

impl<'a> CategoryIndex<'a> {
    pub fn new(categories: &'a [TargetingCategory]) -> Self {
        let mut by_id = HashMap::with_capacity(categories.len());
        let mut order = Vec::with_capacity(categories.len());
        for category in categories {
            if by_id.insert(category.id.as_str(), category).is_none() {
                order.push(category.id.as_str());
            }
        }
        Self { by_id, order }
    }

    pub fn get(&self, id: &str) -> Option<&'a TargetingCategory> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Unique records in source order
    pub fn records(&self) -> impl Iterator<Item = &'a TargetingCategory> + '_ {
        self.order.iter().filter_map(move |id| self.by_id.get(id).copied())
    }

    /// Case-insensitive exact name lookup, first match in source order
    pub fn find_by_name(&self, name: &str) -> Option<&'a TargetingCategory> {
        let wanted = name.trim().to_lowercase();
        self.records().find(|c| c.name.to_lowercase() == wanted)
    }

    /// A node starts a tree when it has no parent, or when it is a level-1
    /// node pointing at a parent that does not exist.
    fn is_root(&self, category: &TargetingCategory) -> bool {
        match category.parent() {
            None => true,
            Some(parent) => category.level <= 1 && !self.contains(parent),
        }
    }

    /// Root-first ancestor names, `["Unknown Category"]` when the id is
    /// unknown or the chain is broken or cyclic.
    pub fn breadcrumbs(&self, id: &str) -> Vec<String> {
        let Some(mut current) = self.get(id) else {
            return vec![UNKNOWN_CATEGORY.to_string()];
        };

        let mut path = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        loop {
            if !seen.insert(current.id.as_str()) {
                return vec![UNKNOWN_CATEGORY.to_string()];
            }
            path.push(current.name.clone());
            if self.is_root(current) {
                break;
            }
            match current.parent().and_then(|p| self.get(p)) {
                Some(parent) => current = parent,
                None => return vec![UNKNOWN_CATEGORY.to_string()],
            }
        }

        path.reverse();
        path
    }

    pub fn build_tree(&self) -> Vec<CategoryNode> {
        let mut children: HashMap<&str, Vec<&TargetingCategory>> = HashMap::new();
        let mut roots = Vec::new();

        for category in self.records() {
            if self.is_root(category) {
                roots.push(category);
            } else if let Some(parent) = category.parent().filter(|p| self.contains(p)) {
                children.entry(parent).or_default().push(category);
            }
            // else: orphan, dropped from the tree
        }

        // Pre-order walk with an explicit stack. Each record has one parent, so
        // a node is reached at most once; records on a parent cycle never are.
        let mut visited: Vec<&TargetingCategory> = Vec::new();
        let mut stack: Vec<(&TargetingCategory, usize)> = roots.iter().rev().map(|r| (*r, 1)).collect();
        while let Some((category, depth)) = stack.pop() {
            visited.push(category);
            if depth >= MAX_TREE_DEPTH {
                continue;
            }
            if let Some(kids) = children.get(category.id.as_str()) {
                stack.extend(kids.iter().rev().map(|kid| (*kid, depth + 1)));
            }
        }

        // Reverse pre-order finishes every child before its parent
        let mut built: HashMap<&str, CategoryNode> = HashMap::with_capacity(visited.len());
        for category in visited.into_iter().rev() {
            let kids = children
                .get(category.id.as_str())
                .map(|list| list.iter().filter_map(|kid| built.remove(kid.id.as_str())).collect())
                .unwrap_or_default();
            built.insert(
                category.id.as_str(),
                CategoryNode {
                    category: category.clone(),
                    children: kids,
                },
            );
        }

        roots
            .into_iter()
            .filter_map(|root| built.remove(root.id.as_str()))
            .collect()
    }
}

/// Nest a flat list under its level-1 roots
pub fn build_tree(categories: &[TargetingCategory]) -> Vec<CategoryNode> {
    CategoryIndex::new(categories).build_tree()
}

/// Pre-order walk back to a flat list
pub fn flatten(tree: &[CategoryNode]) -> Vec<TargetingCategory> {
    let mut out = Vec::new();
    let mut stack: Vec<&CategoryNode> = tree.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node.category.clone());
        stack.extend(node.children.iter().rev());
    }
    out
}

/// Total node count across a forest
pub fn count_nodes(tree: &[CategoryNode]) -> usize {
    tree.iter().map(CategoryNode::size).sum()
}

pub fn breadcrumbs(categories: &[TargetingCategory], id: &str) -> Vec<String> {
    CategoryIndex::new(categories).breadcrumbs(id)
}

/// Records that `build_tree` leaves out
pub fn orphans(categories: &[TargetingCategory]) -> Vec<TargetingCategory> {
    let index = CategoryIndex::new(categories);
    let in_tree: HashSet<String> = flatten(&index.build_tree())
        .into_iter()
        .map(|c| c.id)
        .collect();
    index
        .records()
        .filter(|c| !in_tree.contains(&c.id))
        .cloned()
        .collect()
}
