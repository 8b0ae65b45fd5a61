//! Contract-based DAG construction and validation (spec §4.1).
//!
//! Grounded in `original_source/src/stream_kernel/kernel/dag.py`: index
//! producers/consumers by type in discovery order, require a producer for
//! every consumed type unless every consumer of that type is an external
//! sink, emit deduplicated edges in iteration order, reject self-loops, and
//! run a DFS tri-state cycle check.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::contract::{NodeContract, TypeTag};
use crate::error::DagError;

/// `{ nodes, edges, external_nodes }` from spec §3.
#[derive(Clone, Debug, Default)]
pub struct Dag {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
    pub external_nodes: HashSet<String>,
}

impl Dag {
    /// Deterministic topological order for step naming / execution planning
    /// (spec §4.1 "Topological order ... must be deterministic").
    ///
    /// Kahn's algorithm with a BTreeSet frontier: ties are broken by name so
    /// the same contract set always yields the same plan.
    pub fn build_execution_plan(&self) -> Result<Vec<String>, DagError> {
        let mut indegree: HashMap<&str, usize> = self.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = self.nodes.iter().map(|n| (n.as_str(), Vec::new())).collect();
        for (src, dst) in &self.edges {
            adjacency.entry(src.as_str()).or_default().push(dst.as_str());
            *indegree.entry(dst.as_str()).or_default() += 1;
        }

        let mut frontier: std::collections::BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(&name) = frontier.iter().next() {
            frontier.remove(name);
            order.push(name.to_string());
            if let Some(targets) = adjacency.get(name) {
                for &next in targets {
                    let deg = indegree.get_mut(next).expect("edge target indexed");
                    *deg -= 1;
                    if *deg == 0 {
                        frontier.insert(next);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // A real cycle would already have been rejected at build time;
            // this only fires if edges were mutated after construction.
            return Err(DagError::Cycle("<execution plan>".to_string()));
        }
        Ok(order)
    }
}

/// Build a [`Dag`] from a sequence of [`NodeContract`]s (spec §4.1).
pub fn build_dag(contracts: &[NodeContract]) -> Result<Dag, DagError> {
    if contracts.is_empty() {
        return Ok(Dag::default());
    }

    let mut by_name: HashMap<&str, &NodeContract> = HashMap::new();
    for contract in contracts {
        if by_name.insert(&contract.name, contract).is_some() {
            return Err(DagError::DuplicateNode(contract.name.clone()));
        }
        if contract.consumes.is_empty() && contract.emits.is_empty() {
            return Err(DagError::EmptyContract(contract.name.clone()));
        }
    }

    // Index in discovery order; BTreeMap keeps the type display stable for
    // error messages while iteration order within each Vec is insertion order.
    let mut producers: BTreeMap<TypeTag, Vec<&str>> = BTreeMap::new();
    let mut consumers: BTreeMap<TypeTag, Vec<&str>> = BTreeMap::new();
    for contract in contracts {
        for ty in &contract.emits {
            producers.entry(*ty).or_default().push(&contract.name);
        }
        for ty in &contract.consumes {
            consumers.entry(*ty).or_default().push(&contract.name);
        }
    }

    for (ty, consumer_names) in &consumers {
        if producers.contains_key(ty) {
            continue;
        }
        let all_external_sinks = consumer_names
            .iter()
            .all(|name| by_name.get(name).map(|c| c.is_external_sink()).unwrap_or(false));
        if all_external_sinks {
            continue;
        }
        return Err(DagError::MissingProvider {
            type_name: ty.name(),
            consumers: consumer_names.iter().map(|s| s.to_string()).collect(),
        });
    }

    let mut edge_set: HashSet<(&str, &str)> = HashSet::new();
    let mut edges: Vec<(String, String)> = Vec::new();
    for (ty, consumer_names) in &consumers {
        if let Some(producer_names) = producers.get(ty) {
            for &producer in producer_names {
                for &consumer in consumer_names {
                    if edge_set.insert((producer, consumer)) {
                        edges.push((producer.to_string(), consumer.to_string()));
                    }
                }
            }
        }
    }

    if let Some((src, _)) = edges.iter().find(|(src, dst)| src == dst) {
        return Err(DagError::Cycle(src.clone()));
    }

    assert_acyclic(contracts.iter().map(|c| c.name.as_str()), &edges)?;

    Ok(Dag {
        nodes: contracts.iter().map(|c| c.name.clone()).collect(),
        edges,
        external_nodes: contracts.iter().filter(|c| c.external).map(|c| c.name.clone()).collect(),
    })
}

fn assert_acyclic<'a>(
    nodes: impl Iterator<Item = &'a str>,
    edges: &[(String, String)],
) -> Result<(), DagError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = nodes.map(|n| (n, Vec::new())).collect();
    for (src, dst) in edges {
        adjacency.entry(src.as_str()).or_default().push(dst.as_str());
        adjacency.entry(dst.as_str()).or_default();
    }

    #[derive(PartialEq, Eq)]
    enum Mark {
        Visiting,
        Visited,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), DagError> {
        match marks.get(node) {
            Some(Mark::Visiting) => return Err(DagError::Cycle(node.to_string())),
            Some(Mark::Visited) => return Ok(()),
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(next_nodes) = adjacency.get(node) {
            for &next in next_nodes {
                visit(next, adjacency, marks)?;
            }
        }
        marks.insert(node, Mark::Visited);
        Ok(())
    }

    let names: Vec<&str> = adjacency.keys().copied().collect();
    for name in names {
        if !matches!(marks.get(name), Some(Mark::Visited)) {
            visit(name, &adjacency, &mut marks)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;

    struct A;
    struct B;
    struct C;

    #[test]
    fn empty_contracts_yield_empty_dag() {
        let dag = build_dag(&[]).unwrap();
        assert!(dag.nodes.is_empty());
        assert!(dag.edges.is_empty());
    }

    #[test]
    fn rejects_contract_with_no_consumes_and_no_emits() {
        let contracts = vec![NodeContract::node("noop", vec![], vec![])];
        let err = build_dag(&contracts).unwrap_err();
        assert!(matches!(err, DagError::EmptyContract(name) if name == "noop"));
    }

    #[test]
    fn rejects_missing_provider() {
        let contracts = vec![NodeContract::node("consumer", types![A], vec![])];
        let err = build_dag(&contracts).unwrap_err();
        assert!(matches!(err, DagError::MissingProvider { .. }));
    }

    #[test]
    fn allows_unbound_external_sink() {
        let contracts = vec![NodeContract::external("sink:out", types![A], vec![])];
        let dag = build_dag(&contracts).unwrap();
        assert_eq!(dag.nodes, vec!["sink:out"]);
        assert!(dag.external_nodes.contains("sink:out"));
    }

    #[test]
    fn builds_fan_out_edges_in_discovery_order() {
        let contracts = vec![
            NodeContract::node("producer", vec![], types![A]),
            NodeContract::node("consumer_1", types![A], vec![]),
            NodeContract::node("consumer_2", types![A], vec![]),
        ];
        let dag = build_dag(&contracts).unwrap();
        assert_eq!(
            dag.edges,
            vec![
                ("producer".to_string(), "consumer_1".to_string()),
                ("producer".to_string(), "consumer_2".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_self_loop() {
        let contracts = vec![NodeContract::node("loop", types![A], types![A])];
        let err = build_dag(&contracts).unwrap_err();
        assert!(matches!(err, DagError::Cycle(name) if name == "loop"));
    }

    #[test]
    fn rejects_longer_cycle() {
        let contracts = vec![
            NodeContract::node("n1", types![C], types![A]),
            NodeContract::node("n2", types![A], types![B]),
            NodeContract::node("n3", types![B], types![C]),
        ];
        let err = build_dag(&contracts).unwrap_err();
        assert!(matches!(err, DagError::Cycle(_)));
    }

    #[test]
    fn execution_plan_is_deterministic_topological_order() {
        let contracts = vec![
            NodeContract::node("n2", types![A], types![B]),
            NodeContract::node("n1", vec![], types![A]),
            NodeContract::node("n3", types![B], vec![]),
        ];
        let dag = build_dag(&contracts).unwrap();
        let plan = dag.build_execution_plan().unwrap();
        assert_eq!(plan, vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]);
    }
}
