//! Dependency graph construction, topological sort, and cycle detection.
//!
//! Used for both levels of the two-level DAG described in spec §2(c): the
//! table DAG (`table_config.depends_on`) and, within one table, the
//! transformer DAG (`transformer_config.depends_on`). Both share the same
//! shape — a node depends on zero or more sibling nodes — so one generic
//! implementation backs both the engine and the table pipeline.
//!
//! # Prior Art
//!
//! Topological sort and cycle detection use Kahn's algorithm:
//! - Kahn, A.B. (1962). "Topological sorting of large networks."
//!   Communications of the ACM, 5(11), 558–562.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::DeidError;

/// A dependency graph over string-named nodes. `add_edge(node, dep)` records
/// that `node` depends on `dep`; `topological_order` returns dependencies
/// before dependents.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    /// Declaration order, used to break ties between nodes with no
    /// dependency relation so that runs stay reproducible (spec §4.6).
    order: Vec<String>,
    seen: HashSet<String>,
    /// node → the nodes it depends on.
    depends_on: HashMap<String, Vec<String>>,
}

impl Dag {
    pub fn new() -> Self {
        Dag::default()
    }

    pub fn add_node(&mut self, node: impl Into<String>) {
        let node = node.into();
        if self.seen.insert(node.clone()) {
            self.order.push(node.clone());
        }
        self.depends_on.entry(node).or_default();
    }

    /// Record that `node` depends on `dep`. Both are added as nodes if not
    /// already present.
    pub fn add_edge(&mut self, node: impl Into<String>, dep: impl Into<String>) {
        let node = node.into();
        let dep = dep.into();
        self.add_node(node.clone());
        self.add_node(dep.clone());
        self.depends_on.get_mut(&node).unwrap().push(dep);
    }

    /// All declared nodes, in declaration order.
    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, node: &str) -> &[String] {
        self.depends_on.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Return nodes in a valid topological order (dependencies first). Ties
    /// between nodes with no dependency relation are broken by declaration
    /// order. Returns an error naming every node still unresolved if the
    /// graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, DeidError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for node in &self.order {
            in_degree.insert(node.as_str(), self.depends_on[node].len());
        }

        // dependents[dep] = nodes that depend on dep, used to decrement
        // in-degree as each dependency is resolved.
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.order {
            for dep in &self.depends_on[node] {
                dependents.entry(dep.as_str()).or_default().push(node.as_str());
            }
        }

        // Ready queue ordered by original declaration index so ties resolve
        // deterministically; a plain VecDeque seeded in declaration order and
        // refilled in that same relative order preserves this.
        let index_of: HashMap<&str, usize> = self.order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .map(|n| n.as_str())
            .filter(|n| in_degree[n] == 0)
            .collect();

        let mut result = Vec::with_capacity(self.order.len());
        while let Some(node) = ready.pop_front() {
            result.push(node.to_string());
            if let Some(deps) = dependents.get(node) {
                let mut newly_ready: Vec<&str> = Vec::new();
                for &d in deps {
                    let deg = in_degree.get_mut(d).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(d);
                    }
                }
                newly_ready.sort_by_key(|n| index_of[n]);
                for n in newly_ready {
                    ready.push_back(n);
                }
            }
        }

        if result.len() != self.order.len() {
            let processed: HashSet<&str> = result.iter().map(|s| s.as_str()).collect();
            let stuck: Vec<String> = self
                .order
                .iter()
                .filter(|n| !processed.contains(n.as_str()))
                .cloned()
                .collect();
            return Err(DeidError::ValidationError(format!(
                "cycle detected among: {}",
                stuck.join(", ")
            )));
        }
        Ok(result)
    }

    /// Whether the graph contains at least one cycle.
    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Enumerate distinct simple cycles, each reported once (spec §4.8
    /// `no-circular-dependencies`: "reported once per cycle"). Found via DFS
    /// with a recursion stack; cycles are deduplicated by their node set.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut seen_sets: Vec<HashSet<String>> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for start in &self.order {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut stack: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            self.dfs_find_cycle(start, &mut stack, &mut on_stack, &mut visited, &mut cycles, &mut seen_sets);
        }
        cycles
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_find_cycle<'a>(
        &'a self,
        node: &'a str,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
        seen_sets: &mut Vec<HashSet<String>>,
    ) {
        stack.push(node);
        on_stack.insert(node);
        visited.insert(node);

        for dep in self.dependencies_of(node) {
            let dep = dep.as_str();
            if let Some(pos) = stack.iter().position(|&n| n == dep) {
                let cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                let set: HashSet<String> = cycle.iter().cloned().collect();
                if !seen_sets.contains(&set) {
                    seen_sets.push(set);
                    cycles.push(cycle);
                }
            } else if !visited.contains(dep) {
                self.dfs_find_cycle(dep, stack, on_stack, visited, cycles, seen_sets);
            }
        }

        stack.pop();
        on_stack.remove(node);
    }
}
