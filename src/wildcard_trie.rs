//! Level-separated trie with wildcard matching.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

struct TrieNode<T> {
    value: Option<T>,
    children: HashMap<String, TrieNode<T>>,
    /// Depth of this node in levels (root is 0).
    level_index: usize,
}

impl<T> TrieNode<T> {
    fn new(level_index: usize) -> Self {
        Self {
            value: None,
            children: HashMap::new(),
            level_index,
        }
    }
}

/// String-keyed trie with wildcard support.
///
/// Made for MQTT-like topics but reusable: the level separator and the
/// single-/multi-level wildcard tokens are free-form strings, and splitting
/// is literal, so multi-character tokens work the same as single-character
/// ones.
///
/// Patterns (keys with wildcards) live in the trie; queries are literal.
/// Wildcard tokens inside a query are treated as ordinary level text. There
/// is no key validation: a semantically invalid key (e.g. a multi-level
/// wildcard that is not the last level) simply becomes unmatchable.
pub struct WildcardTrie<T> {
    sep: String,
    single_wild: String,
    multi_wild: String,
    root: TrieNode<T>,
}

impl<T> WildcardTrie<T> {
    /// Creates an empty trie.
    ///
    /// Fails with [`Error::InvalidArg`] when any token is empty or two
    /// tokens collide.
    pub fn new(
        level_separator: impl Into<String>,
        single_level_wildcard: impl Into<String>,
        multi_level_wildcard: impl Into<String>,
    ) -> Result<Self> {
        let sep = level_separator.into();
        let single_wild = single_level_wildcard.into();
        let multi_wild = multi_level_wildcard.into();

        if sep.is_empty() || single_wild.is_empty() || multi_wild.is_empty() {
            return Err(Error::InvalidArg);
        }
        if sep == single_wild || sep == multi_wild || single_wild == multi_wild {
            return Err(Error::InvalidArg);
        }

        Ok(Self {
            sep,
            single_wild,
            multi_wild,
            root: TrieNode::new(0),
        })
    }

    fn split<'k>(&self, key: &'k str) -> Vec<&'k str> {
        key.split(self.sep.as_str()).collect()
    }

    /// Inserts (or replaces) the value stored under `key`, creating
    /// intermediate nodes as needed.
    pub fn insert(&mut self, key: &str, value: T) {
        *self.upsert(key) = Some(value);
    }

    /// Value slot for `key`, created empty if missing.
    pub fn upsert(&mut self, key: &str) -> &mut Option<T> {
        let levels = self.split(key);
        let mut cur = &mut self.root;
        for (i, level) in levels.into_iter().enumerate() {
            cur = cur
                .children
                .entry(level.to_string())
                .or_insert_with(|| TrieNode::new(i + 1));
        }
        &mut cur.value
    }

    /// Removes `key` from the trie.
    ///
    /// Only leaf values can be removed; asking for a key with no stored
    /// value returns `false`. Ancestors left with no value and no children
    /// are pruned.
    pub fn remove(&mut self, key: &str) -> bool {
        let levels = self.split(key);
        Self::remove_levels(&mut self.root, &levels).0
    }

    /// Returns `(removed, prune)` where `prune` tells the parent to drop
    /// this now-redundant child.
    fn remove_levels(node: &mut TrieNode<T>, levels: &[&str]) -> (bool, bool) {
        match levels.split_first() {
            None => {
                if node.value.is_none() {
                    return (false, false);
                }
                node.value = None;
                (true, node.children.is_empty())
            }
            Some((level, rest)) => {
                let Some(child) = node.children.get_mut(*level) else {
                    return (false, false);
                };
                let (removed, prune) = Self::remove_levels(child, rest);
                if prune {
                    node.children.remove(*level);
                }
                (
                    removed,
                    removed && node.value.is_none() && node.children.is_empty(),
                )
            }
        }
    }

    /// Matches the literal query `key` against stored patterns.
    ///
    /// Breadth-first walk: at each level descend into the child equal to the
    /// query token and into the single-level-wildcard child; a multi-level
    /// wildcard child that holds a value matches immediately. Returns
    /// matched pattern -> value (empty if nothing matches).
    pub fn find(&self, key: &str) -> HashMap<String, &T> {
        let levels = self.split(key);
        let mut matches = HashMap::new();

        let mut queue: VecDeque<(String, &TrieNode<T>)> = VecDeque::new();
        queue.push_back((String::new(), &self.root));

        while let Some((node_key, node)) = queue.pop_front() {
            if node.level_index == levels.len() {
                if let Some(value) = &node.value {
                    matches.insert(node_key, value);
                }
                continue;
            }
            if node.level_index > levels.len() {
                continue;
            }

            for (child_level, child) in &node.children {
                let child_key = if node_key.is_empty() {
                    child_level.clone()
                } else {
                    format!("{node_key}{}{child_level}", self.sep)
                };

                if child_level.as_str() == levels[node.level_index]
                    || *child_level == self.single_wild
                {
                    queue.push_back((child_key, child));
                } else if *child_level == self.multi_wild {
                    if let Some(value) = &child.value {
                        matches.insert(child_key, value);
                    }
                }
            }
        }

        matches
    }

    /// Calls `f` for every stored key/value pair.
    pub fn for_each(&self, mut f: impl FnMut(&str, &T)) {
        let mut queue: VecDeque<(String, &TrieNode<T>)> = VecDeque::new();
        queue.push_back((String::new(), &self.root));

        while let Some((node_key, node)) = queue.pop_front() {
            if let Some(value) = &node.value {
                f(&node_key, value);
            }
            for (child_level, child) in &node.children {
                let child_key = if node_key.is_empty() {
                    child_level.clone()
                } else {
                    format!("{node_key}{}{child_level}", self.sep)
                };
                queue.push_back((child_key, child));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::new(0);
    }
}
