//! Batched directory-listing walk used to decide which document paths
//! actually exist in the repository at the target commit.
//!
//! Listing a directory is one round-trip to the caller-supplied
//! `GetChildren` implementation, so the walk is breadth-first over a
//! trie of the directories named by document URIs: one call per depth,
//! covering every directory at that depth.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::cancel::CancelToken;

/// Answers directory listings at a fixed (repository, commit) pair.
/// Every requested directory must appear as a key in the response; an
/// empty child list is allowed. Child values may be full paths or bare
/// names; only the final path segment is significant.
pub trait GetChildren {
    fn get_children(&mut self, dirnames: &[String]) -> Result<BTreeMap<String, Vec<String>>>;
}

impl<F> GetChildren for F
where
    F: FnMut(&[String]) -> Result<BTreeMap<String, Vec<String>>>,
{
    fn get_children(&mut self, dirnames: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        self(dirnames)
    }
}

/// The observed directory contents for every directory reachable from
/// the document set, used to test which documents exist.
#[derive(Debug)]
pub struct ExistenceChecker {
    root: String,
    dir_contents: BTreeMap<String, BTreeSet<String>>,
}

impl ExistenceChecker {
    pub fn new(
        root: &str,
        paths: &[String],
        children: &mut dyn GetChildren,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let dir_contents = get_directory_contents(root, paths, children, cancel)?;
        Ok(ExistenceChecker {
            root: root.to_string(),
            dir_contents,
        })
    }

    /// A document path is kept when its containing directory was
    /// observed and the listing contained the document's filename.
    pub fn should_include(&self, path: &str) -> bool {
        let relative = join_path(&self.root, path);
        let Some(children) = self.dir_contents.get(&dir_without_dot(&relative)) else {
            return false;
        };
        children.contains(base_name(path))
    }
}

fn get_directory_contents(
    root: &str,
    paths: &[String],
    children: &mut dyn GetChildren,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let tree = make_tree(root, paths);
    let mut contents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    // parent path -> nodes at the current depth
    let mut batch: Vec<(String, &[DirTreeNode])> = if root.is_empty() {
        vec![(String::new(), std::slice::from_ref(&tree))]
    } else {
        vec![(String::new(), &tree.children)]
    };

    while !batch.is_empty() {
        cancel.check()?;

        let mut dirnames: Vec<String> = batch
            .iter()
            .flat_map(|(parent, nodes)| nodes.iter().map(|node| join_path(parent, &node.name)))
            .collect();
        dirnames.sort();

        for (directory, names) in children.get_children(&dirnames)? {
            if names.is_empty() {
                continue;
            }
            contents.insert(
                directory,
                names.iter().map(|name| base_name(name).to_string()).collect(),
            );
        }

        let mut next = Vec::new();
        for (parent, nodes) in batch {
            for node in nodes {
                let node_path = join_path(&parent, &node.name);
                // Descend only when this directory's own listing came
                // back non-empty.
                if !node.children.is_empty() && contents.contains_key(&node_path) {
                    next.push((node_path, node.children.as_slice()));
                }
            }
        }
        batch = next;
    }

    Ok(contents)
}

#[derive(Debug, Default)]
struct DirTreeNode {
    name: String,
    children: Vec<DirTreeNode>,
}

/// Build the directory trie for the given document paths, joined under
/// the dump root. Paths escaping the root are left out entirely.
fn make_tree(root: &str, paths: &[String]) -> DirTreeNode {
    let mut directories: BTreeSet<String> = BTreeSet::new();
    for path in paths {
        let dir = dir_without_dot(&join_path(root, path));
        if !dir.starts_with("..") {
            directories.insert(dir);
        }
    }

    let mut tree = DirTreeNode::default();
    for dir in &directories {
        // The empty directory is the walk root itself, which is always
        // listed in the first batch.
        if dir.is_empty() {
            continue;
        }
        insert_path_segments(&mut tree, &mut dir.split('/'));
    }
    tree
}

fn insert_path_segments<'a>(node: &mut DirTreeNode, segments: &mut impl Iterator<Item = &'a str>) {
    let Some(segment) = segments.next() else {
        return;
    };

    if let Some(child) = node.children.iter_mut().find(|c| c.name == segment) {
        insert_path_segments(child, segments);
        return;
    }

    let mut child = DirTreeNode {
        name: segment.to_string(),
        children: Vec::new(),
    };
    insert_path_segments(&mut child, segments);
    node.children.push(child);
}

/// Join two slash-separated path fragments, normalizing `.` segments
/// and collapsing `..` where possible.
pub fn join_path(a: &str, b: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in a.split('/').chain(b.split('/')) {
        match segment {
            "" | "." => {}
            ".." if parts.last().is_some_and(|last| *last != "..") => {
                parts.pop();
            }
            _ => parts.push(segment),
        }
    }
    parts.join("/")
}

/// The directory portion of a path, with `.` mapped to the empty
/// string (the repository root).
fn dir_without_dot(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// The final path segment, ignoring a trailing slash.
fn base_name(path: &str) -> &str {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rsplit_once('/') {
        Some((_, name)) => name,
        None => path,
    }
}
