//! Resource dependency graph and apply/destroy ordering.
//!
//! Models resources as nodes in a directed acyclic graph (DAG). An edge
//! `A → B` means "B depends on A": A must exist before B is applied, and B
//! must be gone before A is destroyed.
//!
//! Ordering is computed via Kahn's algorithm. [`ResourceGraph::apply_levels`]
//! keeps the Kahn waves so that resources in the same wave, which have no
//! edge between them, can be applied concurrently.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use envstack_state::{ResourceKey, ResourceRecord};

use crate::error::{DeployError, Result};

/// Directed dependency graph over [`ResourceKey`]s.
///
/// Edges are stored as `dependency → dependents` adjacency sets. Ordered
/// collections keep every traversal deterministic.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeSet<ResourceKey>,
    /// `dependency → {dependent, ...}` (downstream adjacency)
    downstream: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
    /// `dependent → {dependency, ...}` (upstream adjacency)
    upstream: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph over persisted records. Dependencies on keys that are not in
    /// `records` (resources managed outside this state) are ignored.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ResourceRecord>,
    ) -> Result<Self> {
        let records: Vec<&ResourceRecord> = records.into_iter().collect();
        let mut graph = Self::new();
        for r in &records {
            graph.add_node(r.key.clone());
        }
        for r in &records {
            for dep in &r.depends_on {
                if graph.contains(dep) {
                    graph.add_dependency(dep, &r.key)?;
                }
            }
        }
        Ok(graph)
    }

    /// Register a node. Idempotent.
    pub fn add_node(&mut self, key: ResourceKey) {
        self.downstream.entry(key.clone()).or_default();
        self.upstream.entry(key.clone()).or_default();
        self.nodes.insert(key);
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a directed dependency edge: `dependent` depends on `dependency`.
    ///
    /// Both nodes must already be registered. Returns
    /// [`DeployError::DependencyCycle`] if the edge would introduce a cycle
    /// (checked via DFS; the edge is rolled back).
    pub fn add_dependency(
        &mut self,
        dependency: &ResourceKey,
        dependent: &ResourceKey,
    ) -> Result<()> {
        for key in [dependency, dependent] {
            if !self.nodes.contains(key) {
                return Err(DeployError::UnknownResource {
                    key: key.to_string(),
                });
            }
        }

        self.downstream
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        self.upstream
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());

        if let Some(cycle) = self.find_cycle_through(dependent) {
            if let Some(set) = self.downstream.get_mut(dependency) {
                set.remove(dependent);
            }
            if let Some(set) = self.upstream.get_mut(dependent) {
                set.remove(dependency);
            }
            return Err(DeployError::DependencyCycle {
                keys: cycle.iter().map(ToString::to_string).collect(),
            });
        }

        Ok(())
    }

    /// Direct dependents of `key`.
    pub fn dependents_of(&self, key: &ResourceKey) -> Result<Vec<ResourceKey>> {
        self.downstream
            .get(key)
            .map(|deps| deps.iter().cloned().collect())
            .ok_or_else(|| DeployError::UnknownResource {
                key: key.to_string(),
            })
    }

    /// All transitive dependents of `key` (BFS over downstream edges).
    pub fn transitive_dependents_of(&self, key: &ResourceKey) -> Result<Vec<ResourceKey>> {
        if !self.nodes.contains(key) {
            return Err(DeployError::UnknownResource {
                key: key.to_string(),
            });
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([key.clone()]);
        while let Some(current) = queue.pop_front() {
            for dep in self.downstream.get(&current).into_iter().flatten() {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
        Ok(visited.into_iter().collect())
    }

    /// Kahn waves: every key in wave `n` depends only on keys in earlier
    /// waves. Keys within a wave are sorted.
    pub fn apply_levels(&self) -> Result<Vec<Vec<ResourceKey>>> {
        let mut in_degree: BTreeMap<&ResourceKey, usize> = self
            .nodes
            .iter()
            .map(|k| (k, self.upstream.get(k).map_or(0, BTreeSet::len)))
            .collect();

        let mut wave: Vec<&ResourceKey> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&k, _)| k)
            .collect();
        let mut levels = Vec::new();
        let mut visited = 0usize;

        while !wave.is_empty() {
            visited += wave.len();
            let mut next = BTreeSet::new();
            for key in &wave {
                for dep in self.downstream.get(*key).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(dep) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.insert(dep);
                        }
                    }
                }
            }
            levels.push(wave.into_iter().cloned().collect());
            wave = next.into_iter().collect();
        }

        if visited != self.nodes.len() {
            return Err(DeployError::DependencyCycle {
                keys: self.nodes.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(levels)
    }

    /// Keys in topological order (dependencies before dependents).
    pub fn topological_order(&self) -> Result<Vec<ResourceKey>> {
        Ok(self.apply_levels()?.into_iter().flatten().collect())
    }

    /// Keys in teardown order (dependents before dependencies).
    pub fn destroy_order(&self) -> Result<Vec<ResourceKey>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// DFS from `start` to detect cycles. Returns the cycle path if found.
    fn find_cycle_through(&self, start: &ResourceKey) -> Option<Vec<ResourceKey>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle(
        &self,
        node: &ResourceKey,
        visited: &mut BTreeSet<ResourceKey>,
        path: &mut Vec<ResourceKey>,
    ) -> bool {
        if path.contains(node) {
            path.push(node.clone());
            return true;
        }
        if !visited.insert(node.clone()) {
            return false;
        }
        path.push(node.clone());

        for dep in self.downstream.get(node).into_iter().flatten() {
            if self.dfs_cycle(dep, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> ResourceKey {
        ResourceKey::new(k)
    }

    fn deployment_graph() -> ResourceGraph {
        // ns → secret → workload ← env
        let mut g = ResourceGraph::new();
        for k in ["ns", "secret", "env", "workload"] {
            g.add_node(key(k));
        }
        g.add_dependency(&key("ns"), &key("secret")).unwrap();
        g.add_dependency(&key("secret"), &key("workload")).unwrap();
        g.add_dependency(&key("env"), &key("workload")).unwrap();
        g
    }

    fn position(order: &[ResourceKey], k: &str) -> usize {
        order.iter().position(|x| x.as_str() == k).unwrap()
    }

    #[test]
    fn test_topological_order_respects_deps() {
        let order = deployment_graph().topological_order().unwrap();
        assert!(position(&order, "ns") < position(&order, "secret"));
        assert!(position(&order, "secret") < position(&order, "workload"));
        assert!(position(&order, "env") < position(&order, "workload"));
    }

    #[test]
    fn test_apply_levels_group_independent_resources() {
        let levels = deployment_graph().apply_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec![key("env"), key("ns")],
                vec![key("secret")],
                vec![key("workload")],
            ]
        );
    }

    #[test]
    fn test_destroy_order_is_reverse() {
        let order = deployment_graph().destroy_order().unwrap();
        assert_eq!(order.first(), Some(&key("workload")));
        assert!(position(&order, "secret") < position(&order, "ns"));
    }

    #[test]
    fn test_cycle_rejected_and_rolled_back() {
        let mut g = deployment_graph();
        let err = g.add_dependency(&key("workload"), &key("ns")).unwrap_err();
        assert!(matches!(err, DeployError::DependencyCycle { .. }));
        assert!(g.dependents_of(&key("workload")).unwrap().is_empty());
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut g = ResourceGraph::new();
        g.add_node(key("a"));
        let err = g.add_dependency(&key("a"), &key("missing")).unwrap_err();
        assert!(matches!(err, DeployError::UnknownResource { .. }));
    }

    #[test]
    fn test_transitive_dependents() {
        let g = deployment_graph();
        let deps = g.transitive_dependents_of(&key("ns")).unwrap();
        assert_eq!(deps, vec![key("secret"), key("workload")]);
    }

    #[test]
    fn test_empty_graph_has_no_levels() {
        assert!(ResourceGraph::new().apply_levels().unwrap().is_empty());
    }
}
