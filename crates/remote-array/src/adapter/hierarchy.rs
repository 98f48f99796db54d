//! In-memory group/dataset tree shared by every adapter.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{Attributes, DatasetDescriptor, GroupDescriptor, SubgroupEntry};

/// Canonical form of a path: leading `/`, no trailing `/`, no empty
/// segments. The root is `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Parent of a canonical path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => Some("/"),
    }
}

/// Last segment of a canonical path, empty for the root.
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Store key prefix of a canonical path: `/a/b` is `a/b`, the root is empty.
pub fn path_to_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[derive(Debug, Default, Clone)]
struct Children {
    groups: BTreeSet<String>,
    datasets: BTreeSet<String>,
}

/// Groups and datasets of one source, with a children-by-parent index built
/// as nodes are inserted.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    groups: HashMap<String, Attributes>,
    datasets: BTreeMap<String, DatasetDescriptor>,
    children: HashMap<String, Children>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    /// A hierarchy holding only an attribute-less root group.
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert("/".to_string(), Attributes::new());
        Self {
            groups,
            datasets: BTreeMap::new(),
            children: HashMap::new(),
        }
    }

    /// Make sure `path` and all its ancestors exist as groups.
    fn ensure_group(&mut self, path: &str) {
        if self.groups.contains_key(path) {
            return;
        }
        self.groups.insert(path.to_string(), Attributes::new());
        if let Some(parent) = parent_path(path) {
            let parent = parent.to_string();
            self.ensure_group(&parent);
            self.children
                .entry(parent)
                .or_default()
                .groups
                .insert(path.to_string());
        }
    }

    /// Add a group, or replace the attributes of an existing one.
    pub fn insert_group(&mut self, path: &str, attrs: Attributes) {
        let path = normalize_path(path);
        self.ensure_group(&path);
        self.groups.insert(path, attrs);
    }

    /// Add a dataset. Missing ancestor groups are created empty.
    pub fn insert_dataset(&mut self, mut descriptor: DatasetDescriptor) {
        let path = normalize_path(&descriptor.path);
        if let Some(parent) = parent_path(&path) {
            let parent = parent.to_string();
            self.ensure_group(&parent);
            self.children
                .entry(parent)
                .or_default()
                .datasets
                .insert(path.clone());
        }
        descriptor.path = path.clone();
        self.datasets.insert(path, descriptor);
    }

    pub fn get_group(&self, path: &str) -> Option<GroupDescriptor> {
        let path = normalize_path(path);
        let attrs = self.groups.get(&path)?;
        let children = self.children.get(&path);

        let subgroups = children
            .map(|c| {
                c.groups
                    .iter()
                    .map(|p| SubgroupEntry {
                        name: leaf_name(p).to_string(),
                        path: p.clone(),
                        attrs: self.groups.get(p).cloned().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let datasets = children
            .map(|c| {
                c.datasets
                    .iter()
                    .filter_map(|p| self.datasets.get(p))
                    .map(|d| d.as_entry(leaf_name(&d.path)))
                    .collect()
            })
            .unwrap_or_default();

        Some(GroupDescriptor {
            path,
            attrs: attrs.clone(),
            subgroups,
            datasets,
        })
    }

    pub fn get_dataset(&self, path: &str) -> Option<&DatasetDescriptor> {
        self.datasets.get(&normalize_path(path))
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_datasets(&self) -> usize {
        self.datasets.len()
    }
}
