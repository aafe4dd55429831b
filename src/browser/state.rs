//! What is listed, selected and shown. Mutated only by user actions and by
//! finished listings; never performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::sort::{SortDirection, SortKey, SortSpec};
use crate::format::{normalize_prefix, parent_prefix};
use crate::storage::ObjectEntry;
use crate::tree::TreeNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// One level at a time, folders expand in place.
    #[default]
    Tree,
    /// Every object under the current prefix in one table.
    Flat,
}

/// One rendered line of the listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub depth: usize,
    pub name: String,
    pub full_key: String,
    pub is_folder: bool,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub expanded: bool,
}

impl Row {
    fn from_node(node: &TreeNode, depth: usize, expanded: bool) -> Self {
        let entry = node.entry.as_ref();
        Self {
            depth,
            name: node.name.clone(),
            full_key: node.full_key.clone(),
            is_folder: node.is_folder(),
            size: entry.map(|e| e.size),
            last_modified: entry.and_then(|e| e.last_modified),
            etag: entry.and_then(|e| e.etag.clone()),
            expanded,
        }
    }

    fn from_entry(entry: &ObjectEntry, prefix: &str) -> Self {
        Self {
            depth: 0,
            name: entry.key.strip_prefix(prefix).unwrap_or(&entry.key).to_string(),
            full_key: entry.key.clone(),
            is_folder: false,
            size: Some(entry.size),
            last_modified: entry.last_modified,
            etag: entry.etag.clone(),
            expanded: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrowserState {
    bucket: Option<String>,
    prefix: String,
    entries: Vec<ObjectEntry>,
    tree: TreeNode,
    view_mode: ViewMode,
    sort: SortSpec,
    selection: BTreeSet<String>,
    expanded: BTreeSet<String>,
    listed_so_far: Option<usize>,
    truncated: bool,
}

impl BrowserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Current location, `""` or ending in `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn entries(&self) -> &[ObjectEntry] {
        &self.entries
    }

    pub fn tree(&self) -> &TreeNode {
        &self.tree
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn selection(&self) -> &BTreeSet<String> {
        &self.selection
    }

    pub fn selected_keys(&self) -> Vec<String> {
        self.selection.iter().cloned().collect()
    }

    pub fn is_expanded(&self, folder_key: &str) -> bool {
        self.expanded.contains(folder_key)
    }

    /// Entries seen by the listing in flight, if any.
    pub fn listing_progress(&self) -> Option<usize> {
        self.listed_so_far
    }

    /// The last listing stopped early.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Switch bucket: back to the root with nothing listed or selected.
    pub fn set_bucket(&mut self, bucket: Option<&str>) {
        self.bucket = bucket.map(str::to_string).filter(|b| !b.is_empty());
        self.prefix.clear();
        self.entries.clear();
        self.tree = TreeNode::root();
        self.selection.clear();
        self.expanded.clear();
        self.listed_so_far = None;
        self.truncated = false;
    }

    /// Enter `prefix`. Entries already known under it are kept so the view
    /// is not blank until the new listing lands; selection and expansion are
    /// narrowed to the new scope.
    pub fn navigate_into(&mut self, prefix: &str) {
        let prefix = normalize_prefix(prefix);
        self.entries.retain(|e| e.key.starts_with(&prefix));
        self.selection.retain(|k| k.starts_with(&prefix) && k != &prefix);
        self.expanded.retain(|k| k.starts_with(&prefix) && k != &prefix);
        self.tree = TreeNode::build(&prefix, &self.entries);
        self.prefix = prefix;
        self.listed_so_far = None;
        self.truncated = false;
    }

    pub fn navigate_up(&mut self) {
        let parent = parent_prefix(&self.prefix);
        self.navigate_into(&parent);
    }

    pub fn begin_listing(&mut self) {
        self.listed_so_far = Some(0);
    }

    pub fn set_listing_progress(&mut self, count: usize) {
        self.listed_so_far = Some(count);
    }

    /// Replace the snapshot with a listing of `prefix`. Returns `false` and
    /// changes nothing when the listing is for another location.
    pub fn apply_listing(&mut self, prefix: &str, entries: Vec<ObjectEntry>, truncated: bool) -> bool {
        if prefix != self.prefix {
            return false;
        }
        self.entries = entries;
        self.tree = TreeNode::build(&self.prefix, &self.entries);
        self.truncated = truncated;
        self.listed_so_far = None;

        let known = self.tree.descendant_keys();
        self.selection.retain(|k| known.contains(k));
        self.expanded.retain(|k| known.contains(k));
        true
    }

    pub fn toggle_view_mode(&mut self) -> ViewMode {
        self.view_mode = match self.view_mode {
            ViewMode::Tree => ViewMode::Flat,
            ViewMode::Flat => ViewMode::Tree,
        };
        self.view_mode
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    pub fn set_sort(&mut self, key: SortKey, direction: SortDirection) {
        self.sort = SortSpec::new(key, direction);
    }

    /// Expand or collapse a folder of the current tree. Returns the new
    /// state; unknown keys and files stay collapsed.
    pub fn toggle_expanded(&mut self, folder_key: &str) -> bool {
        let is_folder = self
            .tree
            .find(folder_key)
            .is_some_and(|n| n.is_folder() && !n.full_key.is_empty());
        if !is_folder {
            return false;
        }
        if !self.expanded.remove(folder_key) {
            self.expanded.insert(folder_key.to_string());
            return true;
        }
        false
    }

    /// Replace the selection. Keys absent from the snapshot are ignored.
    /// Returns how many were accepted.
    pub fn select<I, S>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known = self.tree.descendant_keys();
        self.selection = keys
            .into_iter()
            .map(Into::<String>::into)
            .filter(|k| known.contains(k))
            .collect();
        self.selection.len()
    }

    /// Returns whether `key` is selected afterwards.
    pub fn toggle_selected(&mut self, key: &str) -> bool {
        if self.selection.remove(key) {
            return false;
        }
        if self.tree.find(key).is_some_and(|n| !n.full_key.is_empty()) {
            self.selection.insert(key.to_string());
            return true;
        }
        false
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Rows for the active view, sorted at render time.
    pub fn visible_rows(&self) -> Vec<Row> {
        match self.view_mode {
            ViewMode::Tree => {
                let mut rows = Vec::new();
                self.push_children(&self.tree, 0, &mut rows);
                rows
            }
            ViewMode::Flat => {
                let mut rows: Vec<Row> = self
                    .entries
                    .iter()
                    .filter(|e| !e.is_prefix && e.key.starts_with(&self.prefix))
                    .map(|e| Row::from_entry(e, &self.prefix))
                    .collect();
                self.sort.sort(&mut rows);
                rows
            }
        }
    }

    fn push_children(&self, node: &TreeNode, depth: usize, rows: &mut Vec<Row>) {
        let mut children: Vec<(Row, &TreeNode)> = node
            .children()
            .iter()
            .map(|child| {
                let expanded = child.is_folder() && self.expanded.contains(&child.full_key);
                (Row::from_node(child, depth, expanded), child)
            })
            .collect();
        children.sort_by(|(a, _), (b, _)| self.sort.compare(a, b));

        for (row, child) in children {
            let expanded = row.expanded;
            rows.push(row);
            if expanded {
                self.push_children(child, depth + 1, rows);
            }
        }
    }
}
