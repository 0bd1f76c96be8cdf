//! In-memory directory tree mirroring what gets written to the FAT.
//!
//! Built up before any bytes are written so that cluster allocation for a
//! directory's entries can happen before its children are visited, the way
//! the reference implementation's recursive `createDirectory` does it.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct DirNode {
    pub name: String,
    pub cluster: u32,
    pub children: BTreeMap<String, DirNode>,
}

impl DirNode {
    pub fn new_root(cluster: u32) -> Self {
        DirNode {
            name: String::new(),
            cluster,
            children: BTreeMap::new(),
        }
    }

    fn new_child(name: &str, cluster: u32) -> Self {
        DirNode {
            name: name.to_string(),
            cluster,
            children: BTreeMap::new(),
        }
    }

    /// Walks `path` (slash-separated, relative to this node) returning the
    /// deepest node reached and the remaining unresolved components.
    pub fn resolve<'a>(&self, components: &'a [&'a str]) -> (&DirNode, &'a [&'a str]) {
        let mut node = self;
        let mut rest = components;
        while let Some((head, tail)) = rest.split_first() {
            match node.children.get(*head) {
                Some(child) => {
                    node = child;
                    rest = tail;
                }
                None => break,
            }
        }
        (node, rest)
    }

    pub fn resolve_mut<'a>(
        &mut self,
        components: &'a [&'a str],
    ) -> (&mut DirNode, &'a [&'a str]) {
        let mut node = self;
        let mut rest = components;
        while let Some((head, tail)) = rest.split_first() {
            if node.children.contains_key(*head) {
                node = node.children.get_mut(*head).unwrap();
                rest = tail;
            } else {
                break;
            }
        }
        (node, rest)
    }

    /// Inserts a new child directory node, returning it. The caller supplies
    /// the cluster it was just allocated. ".." resolution does not need a
    /// stored parent pointer: the parent's cluster is already in hand at
    /// every call site that creates a child, via the same `resolve` walk
    /// used to find it.
    pub fn insert_child(&mut self, name: &str, cluster: u32) -> &mut DirNode {
        self.children
            .entry(name.to_string())
            .or_insert_with(|| DirNode::new_child(name, cluster))
    }
}

/// Splits an absolute path like `/a/b/c.txt` into its components, rejecting
/// empty segments (`//`) and a bare root.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_ignores_leading_and_repeated_slashes() {
        assert_eq!(split_path("/a/b/c.txt"), vec!["a", "b", "c.txt"]);
        assert_eq!(split_path("//a//b"), vec!["a", "b"]);
        assert_eq!(split_path("/"), Vec::<&str>::new());
    }

    #[test]
    fn resolve_stops_at_first_missing_component() {
        let mut root = DirNode::new_root(2);
        root.insert_child("a", 3);
        let components = ["a", "b", "c.txt"];
        let (node, rest) = root.resolve(&components);
        assert_eq!(node.name, "a");
        assert_eq!(rest, ["b", "c.txt"]);
    }

    #[test]
    fn inserted_child_is_reachable_by_name_with_its_own_cluster() {
        let mut root = DirNode::new_root(2);
        root.insert_child("a", 3);
        let child = root.children.get("a").unwrap();
        assert_eq!(child.cluster, 3);
    }
}
