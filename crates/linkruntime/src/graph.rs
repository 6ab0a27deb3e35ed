//! Flow validation and the executable graph it produces.

use crate::registry::ComponentRegistry;
use linkcore::{Edge, Flow, GraphError, NodeId, PortDirection};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Validated, acyclic flow graph. Node weights are flow node ids, edge
/// weights the flow edges they came from.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: DiGraph<NodeId, Edge>,
    index: HashMap<NodeId, NodeIndex>,
    order: Vec<NodeId>,
}

impl FlowGraph {
    /// Nodes in a topological order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.index.contains_key(&node)
    }

    /// Edges feeding `node`
    pub fn incoming_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.index.get(&node).into_iter().flat_map(move |&idx| {
            self.graph
                .edges_directed(idx, Direction::Incoming)
                .map(|e| e.weight())
        })
    }

    /// Distinct nodes `node` reads from
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Distinct nodes reading from `node`
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// Every node reachable from `node`, excluding `node` itself
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let Some(&start) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                found.push(self.graph[idx]);
            }
        }
        found
    }

    /// Nodes without producers
    pub fn sources(&self) -> Vec<NodeId> {
        self.filter_by_degree(Direction::Incoming)
    }

    /// Nodes without consumers
    pub fn terminals(&self) -> Vec<NodeId> {
        self.filter_by_degree(Direction::Outgoing)
    }

    fn filter_by_degree(&self, direction: Direction) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.neighbors(*id, direction).is_empty())
            .collect()
    }

    fn neighbors(&self, node: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Validates flow definitions against a registry.
///
/// All checks run before any component is instantiated, so a flow that
/// builds never fails on shape at run time.
pub struct GraphBuilder<'a> {
    registry: &'a ComponentRegistry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a ComponentRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, flow: &Flow) -> Result<FlowGraph, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &flow.nodes {
            if index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            self.registry.resolve(&node.component)?;
            index.insert(node.id, graph.add_node(node.id));
        }

        let mut fed: HashSet<(NodeId, String)> = HashSet::new();
        for edge in &flow.edges {
            let from = index
                .get(&edge.from_node)
                .ok_or(GraphError::DanglingEdge(edge.from_node))?;
            let to = index
                .get(&edge.to_node)
                .ok_or(GraphError::DanglingEdge(edge.to_node))?;

            self.check_edge(flow, edge)?;

            if !fed.insert((edge.to_node, edge.to_port.clone())) {
                return Err(GraphError::MultipleProducers {
                    node: edge.to_node,
                    port: edge.to_port.clone(),
                });
            }
            graph.add_edge(*from, *to, edge.clone());
        }

        for node in &flow.nodes {
            let Some(descriptor) = self.registry.descriptor(&node.component) else {
                continue;
            };

            for (port, literal) in &node.inputs {
                let definition = descriptor.input_port(port).ok_or_else(|| {
                    GraphError::UnknownPort {
                        node: node.id,
                        component: node.component.clone(),
                        direction: PortDirection::Input,
                        port: port.clone(),
                    }
                })?;
                if !literal.matches(definition.value_type) {
                    return Err(GraphError::TypeMismatch {
                        node: node.id,
                        port: port.clone(),
                        expected: definition.value_type,
                        actual: literal.value_type(),
                    });
                }
            }

            for port in descriptor.inputs.iter().filter(|p| p.required) {
                let satisfied = fed.contains(&(node.id, port.name.clone()))
                    || node.inputs.get(&port.name).is_some_and(|v| !v.is_null())
                    || port.default.is_some();
                if !satisfied {
                    return Err(GraphError::UnsatisfiedInput {
                        node: node.id,
                        port: port.name.clone(),
                    });
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(sorted) => sorted.into_iter().map(|idx| graph[idx]).collect(),
            Err(_) => return Err(cycle_error(&graph)),
        };

        tracing::debug!(
            "Built graph for flow {}: {} nodes, {} edges",
            flow.id,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(FlowGraph {
            graph,
            index,
            order,
        })
    }

    fn check_edge(&self, flow: &Flow, edge: &Edge) -> Result<(), GraphError> {
        let (producer, consumer) =
            match (flow.find_node(edge.from_node), flow.find_node(edge.to_node)) {
                (Some(p), Some(c)) => (p, c),
                (None, _) => return Err(GraphError::DanglingEdge(edge.from_node)),
                (_, None) => return Err(GraphError::DanglingEdge(edge.to_node)),
            };
        let producer_factory = self.registry.resolve(&producer.component)?;
        let consumer_factory = self.registry.resolve(&consumer.component)?;

        let output = producer_factory
            .descriptor()
            .output_port(&edge.from_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: producer.id,
                component: producer.component.clone(),
                direction: PortDirection::Output,
                port: edge.from_port.clone(),
            })?;
        let input = consumer_factory
            .descriptor()
            .input_port(&edge.to_port)
            .ok_or_else(|| GraphError::UnknownPort {
                node: consumer.id,
                component: consumer.component.clone(),
                direction: PortDirection::Input,
                port: edge.to_port.clone(),
            })?;

        if !output.value_type.compatible_with(input.value_type) {
            return Err(GraphError::TypeMismatch {
                node: consumer.id,
                port: edge.to_port.clone(),
                expected: input.value_type,
                actual: output.value_type,
            });
        }
        Ok(())
    }
}

/// Collect every node that sits on a cycle, self-loops included.
fn cycle_error(graph: &DiGraph<NodeId, Edge>) -> GraphError {
    let mut nodes: Vec<NodeId> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|idx| graph[idx])
        .collect();
    nodes.sort();
    GraphError::CyclicDependency { nodes }
}
