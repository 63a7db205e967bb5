//! An ordered trie mapping strings to values, one character per level.
//!
//! Besides exact lookups, it answers "which keys start with this?"
//! and "which keys contain these characters, in this order?" (a fuzzy search).
//! Each node keeps a bitmask of the characters found anywhere beneath it,
//! so fuzzy searches can skip subtrees that can't possibly match.
//!
//! Nodes live in an arena and refer to each other by index,
//! which lets a node point back at its parent without any shared ownership.

use std::collections::BTreeMap;

use log::*;

/// Index of the root node, which is always present.
const ROOT: usize = 0;

/// The presence bit for a character.
///
/// 64 bits can't give every character its own bit, so codepoints are folded
/// into 64 buckets. Collisions only weaken pruning: a bucket being set means
/// "maybe present", never a false "absent".
fn symbol_bit(c: char) -> u64 {
    1 << (c as u32 % 64)
}

/// Presence masks of each suffix of `chars`; `masks[i]` covers `chars[i..]`.
/// The extra trailing zero is the (empty) suffix past the end.
fn suffix_masks(chars: &[char]) -> Vec<u64> {
    let mut masks = vec![0; chars.len() + 1];
    for i in (0..chars.len()).rev() {
        masks[i] = masks[i + 1] | symbol_bit(chars[i]);
    }
    masks
}

#[derive(Debug)]
struct Node<T> {
    /// The character this node adds to its parent's key (`'\0'` for the root)
    value: char,
    depth: usize,
    /// Union of `symbol_bit()` for this node's character and every descendant's
    mask: u64,
    parent: Option<usize>,
    children: BTreeMap<char, usize>,
    /// Present iff a key ends at this node
    payload: Option<T>,
}

impl<T> Node<T> {
    fn new(value: char, depth: usize, parent: Option<usize>) -> Self {
        Self {
            value,
            depth,
            mask: 0,
            parent,
            children: BTreeMap::new(),
            payload: None,
        }
    }

    fn own_bit(&self) -> u64 {
        if self.parent.is_some() {
            symbol_bit(self.value)
        } else {
            0
        }
    }
}

/// A map from strings to `T`, searchable by prefix and by subsequence.
#[derive(Debug)]
pub struct PathTrie<T> {
    nodes: Vec<Node<T>>,
    /// Slots of removed nodes, reused by later inserts
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PathTrie<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new('\0', 0, None)],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of keys in the trie
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `key`, returning the payload it previously held, if any.
    ///
    /// Re-adding a key replaces its payload; it's never stored twice.
    pub fn insert(&mut self, key: &str, payload: T) -> Option<T> {
        let chars: Vec<char> = key.chars().collect();
        let masks = suffix_masks(&chars);

        let mut node = ROOT;
        self.nodes[ROOT].mask |= masks[0];
        for (i, &c) in chars.iter().enumerate() {
            node = match self.nodes[node].children.get(&c) {
                Some(&child) => {
                    self.nodes[child].mask |= masks[i];
                    child
                }
                None => self.new_child(node, c, masks[i]),
            };
        }

        let previous = self.nodes[node].payload.replace(payload);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn new_child(&mut self, parent: usize, value: char, mask: u64) -> usize {
        let mut child = Node::new(value, self.nodes[parent].depth + 1, Some(parent));
        child.mask = mask;
        let index = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = child;
                slot
            }
            None => {
                self.nodes.push(child);
                self.nodes.len() - 1
            }
        };
        self.nodes[parent].children.insert(value, index);
        self.nodes[parent].mask |= mask;
        index
    }

    /// Walks child links for each character of `key`.
    fn find_node(&self, key: &str) -> Option<usize> {
        key.chars()
            .try_fold(ROOT, |node, c| self.nodes[node].children.get(&c).copied())
    }

    /// Returns the payload stored under exactly `key`.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.find_node(key)
            .and_then(|node| self.nodes[node].payload.as_ref())
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        let node = self.find_node(key)?;
        self.nodes[node].payload.as_mut()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// True if at least one key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.find_node(prefix).is_some()
    }

    /// All keys, shortest first.
    pub fn keys(&self) -> Vec<String> {
        self.prefix_search("")
    }

    /// All keys starting with `prefix` (including `prefix` itself), shortest first.
    pub fn prefix_search(&self, prefix: &str) -> Vec<String> {
        match self.find_node(prefix) {
            Some(node) => {
                let mut keys = self.collect(node);
                sort_keys(&mut keys);
                keys
            }
            None => Vec::new(),
        }
    }

    /// All keys containing the characters of `pattern` in order,
    /// though not necessarily next to each other. Shortest first.
    pub fn fuzzy_search(&self, pattern: &str) -> Vec<String> {
        let pattern: Vec<char> = pattern.chars().collect();
        if pattern.is_empty() {
            return self.keys();
        }
        // still_needed[i] covers the characters we're looking for
        // once i of them have been matched.
        let still_needed = suffix_masks(&pattern);

        let mut keys = Vec::new();
        let mut potential = vec![(ROOT, 0)];
        while let Some((index, mut matched)) = potential.pop() {
            let node = &self.nodes[index];
            let needed = still_needed[matched];
            if node.mask & needed != needed {
                continue;
            }

            if index != ROOT && node.value == pattern[matched] {
                matched += 1;
                if matched == pattern.len() {
                    keys.extend(self.collect(index));
                    continue;
                }
            }

            potential.extend(node.children.values().map(|&child| (child, matched)));
        }
        sort_keys(&mut keys);
        keys
    }

    /// Removes `key`, returning its payload.
    /// Removing a key that isn't there does nothing and returns `None`.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let found = self.find_node(key)?;
        let payload = self.nodes[found].payload.take()?;
        self.len -= 1;

        // Detach the branch that only existed for this key:
        // climb until we hit a node that still leads somewhere else.
        let mut node = found;
        while let Some(parent) = self.nodes[node].parent {
            let dead_end =
                self.nodes[node].children.is_empty() && self.nodes[node].payload.is_none();
            if !dead_end {
                break;
            }
            let value = self.nodes[node].value;
            self.nodes[parent].children.remove(&value);
            self.release(node);
            node = parent;
        }

        // The characters of the removed key may be gone from the masks
        // of every remaining ancestor. Rebuild them bottom-up.
        let mut cursor = Some(node);
        while let Some(index) = cursor {
            self.recompute_mask(index);
            cursor = self.nodes[index].parent;
        }
        trace!("Removed {:?}, {} keys remain", key, self.len);
        Some(payload)
    }

    fn release(&mut self, index: usize) {
        let released = &mut self.nodes[index];
        released.children.clear();
        released.parent = None;
        released.mask = 0;
        self.free.push(index);
    }

    fn recompute_mask(&mut self, index: usize) {
        let node = &self.nodes[index];
        let mask = node
            .children
            .values()
            .fold(node.own_bit(), |mask, &child| mask | self.nodes[child].mask);
        self.nodes[index].mask = mask;
    }

    /// Every key ending at or below `start`.
    fn collect(&self, start: usize) -> Vec<String> {
        let mut keys = Vec::new();
        let mut nodes = vec![start];
        while let Some(index) = nodes.pop() {
            let node = &self.nodes[index];
            nodes.extend(node.children.values().copied());
            if node.payload.is_some() {
                keys.push(self.key_of(index));
            }
        }
        keys
    }

    /// Rebuilds a node's key by following parent links back to the root.
    fn key_of(&self, index: usize) -> String {
        let mut chars = Vec::with_capacity(self.nodes[index].depth);
        let mut cursor = index;
        while let Some(parent) = self.nodes[cursor].parent {
            chars.push(self.nodes[cursor].value);
            cursor = parent;
        }
        chars.iter().rev().collect()
    }
}

fn sort_keys(keys: &mut [String]) {
    keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
}
