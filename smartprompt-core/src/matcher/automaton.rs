//! Aho–Corasick automaton over `char`s.
//!
//! Nodes live in a flat arena and refer to each other by index. Each node
//! keeps its own outputs plus an output link to the nearest failure
//! ancestor that has outputs, so a scan reports every occurrence exactly
//! once without re-walking failure chains that carry nothing.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;

use crate::error::{EngineError, Result};

/// Identifier of an inserted pattern, dense from zero.
pub type PatternId = u32;

const ROOT: u32 = 0;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<char, u32>,
    fail: u32,
    outputs: Vec<PatternId>,
    output_link: Option<u32>,
}

/// Incremental trie construction with a node budget.
#[derive(Debug)]
pub struct AutomatonBuilder {
    nodes: Vec<Node>,
    patterns: Vec<String>,
    ids: HashMap<String, PatternId>,
    max_nodes: usize,
}

impl AutomatonBuilder {
    /// Start an empty trie that may grow to at most `max_nodes` nodes.
    #[must_use]
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: vec![Node::default()],
            patterns: Vec::new(),
            ids: HashMap::new(),
            max_nodes: max_nodes.max(1),
        }
    }

    /// Insert a pattern, returning its id. Inserting the same text twice
    /// returns the existing id.
    ///
    /// The pattern is matched verbatim; callers normalise case.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BuildFailure`] for an empty pattern or when
    /// the node budget would be exceeded.
    pub fn insert(&mut self, pattern: &str) -> Result<PatternId> {
        if pattern.is_empty() {
            return Err(EngineError::BuildFailure("empty pattern".to_string()));
        }
        if let Some(&id) = self.ids.get(pattern) {
            return Ok(id);
        }

        let mut node = ROOT;
        for ch in pattern.chars() {
            node = match self.nodes[node as usize].children.get(&ch) {
                Some(&next) => next,
                None => {
                    if self.nodes.len() >= self.max_nodes {
                        return Err(EngineError::BuildFailure(format!(
                            "automaton exceeds {} nodes",
                            self.max_nodes
                        )));
                    }
                    let next = u32::try_from(self.nodes.len()).map_err(|_| {
                        EngineError::BuildFailure("automaton node index overflow".to_string())
                    })?;
                    self.nodes.push(Node::default());
                    self.nodes[node as usize].children.insert(ch, next);
                    next
                }
            };
        }

        let id = u32::try_from(self.patterns.len())
            .map_err(|_| EngineError::BuildFailure("pattern index overflow".to_string()))?;
        self.nodes[node as usize].outputs.push(id);
        self.patterns.push(pattern.to_string());
        self.ids.insert(pattern.to_string(), id);
        Ok(id)
    }

    /// Compute failure and output links breadth-first and freeze the trie.
    #[must_use]
    pub fn build(mut self) -> Automaton {
        let mut queue: VecDeque<u32> = VecDeque::new();

        let root_children: Vec<u32> = self.nodes[ROOT as usize].children.values().copied().collect();
        for child in root_children {
            self.nodes[child as usize].fail = ROOT;
            queue.push_back(child);
        }

        while let Some(current) = queue.pop_front() {
            let edges: Vec<(char, u32)> = self.nodes[current as usize]
                .children
                .iter()
                .map(|(&c, &n)| (c, n))
                .collect();

            for (ch, child) in edges {
                let mut fallback = self.nodes[current as usize].fail;
                let fail = loop {
                    if let Some(&next) = self.nodes[fallback as usize].children.get(&ch) {
                        break next;
                    }
                    if fallback == ROOT {
                        break ROOT;
                    }
                    fallback = self.nodes[fallback as usize].fail;
                };

                let fail_node = &self.nodes[fail as usize];
                let output_link = if fail_node.outputs.is_empty() {
                    fail_node.output_link
                } else {
                    Some(fail)
                };

                let node = &mut self.nodes[child as usize];
                node.fail = fail;
                node.output_link = output_link;
                queue.push_back(child);
            }
        }

        Automaton {
            nodes: self.nodes,
            patterns: self.patterns,
        }
    }
}

/// A frozen automaton.
#[derive(Debug)]
pub struct Automaton {
    nodes: Vec<Node>,
    patterns: Vec<String>,
}

impl Default for Automaton {
    fn default() -> Self {
        AutomatonBuilder::new(1).build()
    }
}

impl Automaton {
    /// Number of trie nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of distinct patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Text of a pattern.
    #[must_use]
    pub fn pattern(&self, id: PatternId) -> Option<&str> {
        self.patterns.get(id as usize).map(String::as_str)
    }

    /// Report every pattern occurrence in `text`, in end-position order.
    ///
    /// `on_match` may stop the scan early by returning `ControlFlow::Break`.
    pub fn scan<F>(&self, text: &str, mut on_match: F)
    where
        F: FnMut(PatternId) -> ControlFlow<()>,
    {
        if self.patterns.is_empty() {
            return;
        }

        let mut state = ROOT;
        for ch in text.chars() {
            state = loop {
                if let Some(&next) = self.nodes[state as usize].children.get(&ch) {
                    break next;
                }
                if state == ROOT {
                    break ROOT;
                }
                state = self.nodes[state as usize].fail;
            };

            let mut cursor = Some(state);
            while let Some(node_idx) = cursor {
                let node = &self.nodes[node_idx as usize];
                for &id in &node.outputs {
                    if on_match(id).is_break() {
                        return;
                    }
                }
                cursor = node.output_link;
            }
        }
    }

    /// Whether any pattern occurs in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        let mut found = false;
        self.scan(text, |_| {
            found = true;
            ControlFlow::Break(())
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn automaton(patterns: &[&str]) -> Automaton {
        let mut builder = AutomatonBuilder::new(10_000);
        for p in patterns {
            builder.insert(p).expect("insert");
        }
        builder.build()
    }

    fn hits(a: &Automaton, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        a.scan(text, |id| {
            out.push(a.pattern(id).unwrap_or_default().to_string());
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn overlapping_patterns_all_fire() {
        let a = automaton(&["war", "warfare", "are", "fare"]);
        let mut found = hits(&a, "warfare");
        found.sort();
        assert_eq!(found, vec!["are", "fare", "war", "warfare"]);
    }

    #[test]
    fn classic_he_she_his_hers() {
        let a = automaton(&["he", "she", "his", "hers"]);
        let mut found = hits(&a, "ushers");
        found.sort();
        assert_eq!(found, vec!["he", "hers", "she"]);
    }

    #[test]
    fn repeated_occurrences_counted_each_time() {
        let a = automaton(&["aa"]);
        assert_eq!(hits(&a, "aaaa").len(), 3);
    }

    #[test]
    fn multibyte_patterns() {
        let a = automaton(&["收割", "割"]);
        let mut found = hits(&a, "请收割稻子");
        found.sort();
        assert_eq!(found, vec!["割", "收割"]);
    }

    #[test]
    fn duplicate_insert_reuses_id() {
        let mut builder = AutomatonBuilder::new(100);
        let a = builder.insert("reap").expect("insert");
        let b = builder.insert("reap").expect("insert");
        assert_eq!(a, b);
        assert_eq!(builder.build().pattern_count(), 1);
    }

    #[test]
    fn node_budget_enforced() {
        let mut builder = AutomatonBuilder::new(4);
        builder.insert("abc").expect("root + 3 nodes fits");
        let result = builder.insert("abd");
        assert!(matches!(result, Err(EngineError::BuildFailure(_))));
    }

    #[test]
    fn empty_pattern_rejected() {
        let mut builder = AutomatonBuilder::new(100);
        assert!(builder.insert("").is_err());
    }

    #[test]
    fn early_exit() {
        let a = automaton(&["a"]);
        assert!(a.is_match("banana"));
        assert!(!a.is_match("xyz"));
        assert!(!Automaton::default().is_match("anything"));
    }
}
