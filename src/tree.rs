//! Folds a flat key listing into a navigable hierarchy.
//!
//! Keys are split on `/` relative to the listed prefix. Every intermediate
//! segment becomes a folder node (synthesized when no marker object exists),
//! the final segment a leaf carrying the listing row. Folder nodes use the
//! S3 prefix form (`a/b/`) as their full key, so a file `a` and a folder
//! `a/` can coexist under one parent.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::storage::ObjectEntry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub full_key: String,
    /// Present iff this node is a real object, not a folder.
    pub entry: Option<ObjectEntry>,
    children: Vec<TreeNode>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// Children lookup key; folders are suffixed so they never clash with files.
fn slot(name: &str, folder: bool) -> String {
    if folder {
        format!("{}/", name)
    } else {
        name.to_string()
    }
}

impl Default for TreeNode {
    fn default() -> Self {
        Self::root()
    }
}

impl TreeNode {
    pub fn root() -> Self {
        Self::folder(String::new(), String::new())
    }

    fn folder(name: String, full_key: String) -> Self {
        Self {
            name,
            full_key,
            entry: None,
            children: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build the tree for `entries` listed under `prefix`. Entries outside the
    /// prefix are ignored.
    pub fn build(prefix: &str, entries: &[ObjectEntry]) -> Self {
        let mut root = Self::root();
        for entry in entries {
            root.insert(prefix, entry);
        }
        root
    }

    fn insert(&mut self, prefix: &str, entry: &ObjectEntry) {
        let Some(relative) = entry.key.strip_prefix(prefix) else {
            return;
        };
        if relative.is_empty() {
            // Marker object for the listed prefix itself.
            return;
        }

        let (folders, leaf) = if entry.is_prefix || relative.ends_with('/') {
            (relative.trim_end_matches('/'), None)
        } else {
            match relative.rfind('/') {
                Some(idx) => (&relative[..idx], Some(&relative[idx + 1..])),
                None => ("", Some(relative)),
            }
        };

        let mut node = self;
        let mut path = prefix.to_string();
        if !folders.is_empty() {
            for segment in folders.split('/') {
                path.push_str(segment);
                path.push('/');
                node = node.child_folder_mut(segment, &path);
            }
        }

        if let Some(name) = leaf {
            node.put_leaf(name, entry);
        }
    }

    fn child_folder_mut(&mut self, name: &str, full_key: &str) -> &mut TreeNode {
        let key = slot(name, true);
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                self.children
                    .push(Self::folder(name.to_string(), full_key.to_string()));
                let idx = self.children.len() - 1;
                self.index.insert(key, idx);
                idx
            }
        };
        &mut self.children[idx]
    }

    fn put_leaf(&mut self, name: &str, entry: &ObjectEntry) {
        let key = slot(name, false);
        let leaf = TreeNode {
            name: name.to_string(),
            full_key: entry.key.clone(),
            entry: Some(entry.clone()),
            children: Vec::new(),
            index: HashMap::new(),
        };
        match self.index.get(&key) {
            Some(&idx) => self.children[idx] = leaf,
            None => {
                self.children.push(leaf);
                self.index.insert(key, self.children.len() - 1);
            }
        }
    }

    pub fn is_folder(&self) -> bool {
        self.entry.is_none()
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn folder_child(&self, name: &str) -> Option<&TreeNode> {
        self.index.get(&slot(name, true)).map(|&i| &self.children[i])
    }

    pub fn file_child(&self, name: &str) -> Option<&TreeNode> {
        self.index.get(&slot(name, false)).map(|&i| &self.children[i])
    }

    /// Depth-first lookup by full key.
    pub fn find(&self, full_key: &str) -> Option<&TreeNode> {
        if self.full_key == full_key {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|c| full_key.starts_with(c.full_key.as_str()))
            .find_map(|c| c.find(full_key))
    }

    /// Every full key below this node (the node itself excluded).
    pub fn descendant_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut BTreeSet<String>) {
        for child in &self.children {
            keys.insert(child.full_key.clone());
            child.collect_keys(keys);
        }
    }

    /// Number of real objects below this node.
    pub fn file_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| usize::from(c.entry.is_some()) + c.file_count())
            .sum()
    }

    /// Total bytes of real objects below this node.
    pub fn total_size(&self) -> u64 {
        self.children
            .iter()
            .map(|c| c.entry.as_ref().map_or(0, |e| e.size) + c.total_size())
            .sum()
    }
}
