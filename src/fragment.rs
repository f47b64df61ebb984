use std::collections::HashMap;
use std::rc::Rc;

use crate::circuit::{Circuit, Gate};

/// The role a node plays inside the fragment that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Role {
    Source,
    Accept,
    Reject,
    /// A contraction point created by an AND composition, tagged with the
    /// creating gate so the name stays unique across later unions.
    Join(usize),
}

/// A graph node, disambiguated by the gate whose fragment owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId {
    pub(crate) role: Role,
    pub(crate) gate: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    pub(crate) label: bool,
}

/// A directed graph with boolean edge labels and 1-based layer numbers on
/// the nodes that read input.
#[derive(Clone, Debug, Default)]
pub(crate) struct FragmentGraph {
    /// Nodes in insertion order; the topological sort breaks ties by it.
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) edges: Vec<Edge>,
    layers: HashMap<NodeId, usize>,
}

impl FragmentGraph {
    fn add_node(&mut self, node: NodeId) {
        self.nodes.push(node);
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, label: bool) {
        self.edges.push(Edge { from, to, label });
    }

    fn set_layer(&mut self, node: NodeId, layer: usize) {
        self.layers.insert(node, layer);
    }

    /// The layer number of a node, if it reads input.
    pub(crate) fn layer(&self, node: NodeId) -> Option<usize> {
        self.layers.get(&node).copied()
    }

    /// Append the nodes and edges of `other`.
    ///
    /// The node sets must be disjoint; composing a fragment with itself
    /// violates a builder invariant.
    fn union(&mut self, other: FragmentGraph) {
        for node in &other.nodes {
            assert!(
                !self.nodes.contains(node),
                "fragment union requires disjoint graphs (was a gate composed with itself?)"
            );
        }
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
        self.layers.extend(other.layers);
    }

    /// Contract the nodes `a` and `b` into the fresh node `new`.
    ///
    /// Incoming edges of both nodes are redirected to `new`, outgoing edges
    /// of `b` now leave `new`, and outgoing edges of `a` are dropped. The
    /// merged node carries no layer number until one is assigned.
    fn contract(&mut self, a: NodeId, b: NodeId, new: NodeId) {
        self.nodes.retain(|&node| node != a && node != b);
        self.nodes.push(new);
        let mut edges = Vec::with_capacity(self.edges.len());
        for edge in self.edges.drain(..) {
            if edge.from == a {
                continue;
            }
            let from = if edge.from == b { new } else { edge.from };
            let to = if edge.to == a || edge.to == b {
                new
            } else {
                edge.to
            };
            edges.push(Edge {
                from,
                to,
                label: edge.label,
            });
        }
        self.edges = edges;
        self.layers.remove(&a);
        self.layers.remove(&b);
    }

    /// Rename nodes according to `mapping`; unmapped nodes are unchanged.
    fn rename(&mut self, mapping: &HashMap<NodeId, NodeId>) {
        let rename = |node: NodeId| *mapping.get(&node).unwrap_or(&node);
        for node in &mut self.nodes {
            *node = rename(*node);
        }
        for edge in &mut self.edges {
            edge.from = rename(edge.from);
            edge.to = rename(edge.to);
        }
        let layers = std::mem::take(&mut self.layers);
        self.layers = layers
            .into_iter()
            .map(|(node, layer)| (rename(node), layer))
            .collect();
    }

    /// Hand every node to a new owning gate.
    fn relabel(&mut self, gate: usize) {
        for node in &mut self.nodes {
            node.gate = gate;
        }
        for edge in &mut self.edges {
            edge.from.gate = gate;
            edge.to.gate = gate;
        }
        let layers = std::mem::take(&mut self.layers);
        self.layers = layers
            .into_iter()
            .map(|(mut node, layer)| {
                node.gate = gate;
                (node, layer)
            })
            .collect();
    }
}

/// A branching-program fragment for one gate of the formula.
///
/// The graph has exactly one source, one accept and one reject node, all
/// carrying the owning gate's id. Every node is reachable from the source,
/// accept and reject are the only sinks, and every non-sink node carries a
/// layer number.
#[derive(Clone, Debug)]
pub(crate) struct GateFragment {
    pub(crate) graph: FragmentGraph,
    pub(crate) gate: usize,
    /// Layer `l` reads input bit `layer_bits[l - 1]`.
    layer_bits: Vec<usize>,
}

impl GateFragment {
    /// How many input-reading layers the fragment spans.
    pub(crate) fn layer_count(&self) -> usize {
        self.layer_bits.len()
    }

    /// The global input bit read by a 1-based layer number.
    pub(crate) fn layer_to_bit(&self, layer: usize) -> usize {
        assert!(
            layer >= 1 && layer <= self.layer_bits.len(),
            "layer {} outside fragment range 1..={}",
            layer,
            self.layer_bits.len()
        );
        self.layer_bits[layer - 1]
    }

    pub(crate) fn source(&self) -> NodeId {
        NodeId {
            role: Role::Source,
            gate: self.gate,
        }
    }

    pub(crate) fn accept(&self) -> NodeId {
        NodeId {
            role: Role::Accept,
            gate: self.gate,
        }
    }

    pub(crate) fn reject(&self) -> NodeId {
        NodeId {
            role: Role::Reject,
            gate: self.gate,
        }
    }
}

/// Composes gate fragments bottom-up, one declared gate at a time.
///
/// Fragments sit behind shared handles: an ID gate aliases its operand
/// outright, while AND and NOT copy the graphs out of their operands'
/// handles and build a fresh fragment.
pub(crate) struct FragmentBuilder {
    built: Vec<Rc<GateFragment>>,
}

impl FragmentBuilder {
    /// Build the fragment of every gate and return the output gate's.
    pub(crate) fn build(circuit: &Circuit) -> Rc<GateFragment> {
        let mut builder = FragmentBuilder { built: Vec::new() };
        for (id, gate) in circuit.gates().iter().enumerate() {
            let fragment = match *gate {
                Gate::Input { bit } => builder.input(id, bit),
                Gate::And(left, right) => builder.and(id, left, right),
                Gate::Not(operand) => builder.not(id, operand),
                Gate::Id(operand) => Rc::clone(&builder.built[operand]),
            };
            builder.built.push(fragment);
        }
        Rc::clone(&builder.built[circuit.output()])
    }

    fn input(&self, id: usize, bit: usize) -> Rc<GateFragment> {
        let mut graph = FragmentGraph::default();
        let source = NodeId {
            role: Role::Source,
            gate: id,
        };
        let accept = NodeId {
            role: Role::Accept,
            gate: id,
        };
        let reject = NodeId {
            role: Role::Reject,
            gate: id,
        };
        graph.add_node(source);
        graph.add_node(accept);
        graph.add_node(reject);
        graph.add_edge(source, accept, true);
        graph.add_edge(source, reject, false);
        graph.set_layer(source, 1);
        Rc::new(GateFragment {
            graph,
            gate: id,
            layer_bits: vec![bit],
        })
    }

    fn and(&self, id: usize, left: usize, right: usize) -> Rc<GateFragment> {
        let lhs = &self.built[left];
        let rhs = &self.built[right];
        let t1 = lhs.layer_count();
        let t2 = rhs.layer_count();
        let mut graph = lhs.graph.clone();
        graph.union(rhs.graph.clone());
        // Passing through the join requires reaching the left accept state
        // and then running the right subprogram; either reject
        // short-circuits into the shared reject state.
        let join = NodeId {
            role: Role::Join(id),
            gate: id,
        };
        graph.contract(lhs.accept(), rhs.source(), join);
        graph.contract(
            lhs.reject(),
            rhs.reject(),
            NodeId {
                role: Role::Reject,
                gate: id,
            },
        );
        graph.relabel(id);
        graph.set_layer(join, t1 + t2);
        // The right operand's layers are consumed in reverse order relative
        // to the merged fragment's forward numbering.
        let mut layer_bits = lhs.layer_bits.clone();
        layer_bits.extend(rhs.layer_bits.iter().rev().copied());
        Rc::new(GateFragment {
            graph,
            gate: id,
            layer_bits,
        })
    }

    fn not(&self, id: usize, operand: usize) -> Rc<GateFragment> {
        let fragment = &self.built[operand];
        let mut graph = fragment.graph.clone();
        let mut swap = HashMap::new();
        swap.insert(fragment.accept(), fragment.reject());
        swap.insert(fragment.reject(), fragment.accept());
        graph.rename(&swap);
        graph.relabel(id);
        Rc::new(GateFragment {
            graph,
            gate: id,
            layer_bits: fragment.layer_bits.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn build(src: &str) -> Rc<GateFragment> {
        let circuit = Circuit::parse(src).expect("circuit should parse");
        FragmentBuilder::build(&circuit)
    }

    #[test]
    fn test_input_fragment_shape() {
        let fragment = build("0 input\n1 output gate ID 0\n");
        assert_eq!(fragment.graph.nodes.len(), 3);
        assert_eq!(fragment.graph.edges.len(), 2);
        assert_eq!(fragment.layer_count(), 1);
        assert_eq!(fragment.layer_to_bit(1), 0);
        assert_eq!(fragment.graph.layer(fragment.source()), Some(1));
    }

    #[test]
    fn test_id_gate_aliases_its_operand() {
        let mut builder = FragmentBuilder { built: Vec::new() };
        let input = builder.input(0, 0);
        builder.built.push(input);
        // An ID gate shares the handle instead of copying the graph.
        let aliased = Rc::clone(&builder.built[0]);
        builder.built.push(aliased);
        assert!(Rc::ptr_eq(&builder.built[0], &builder.built[1]));
    }

    #[test]
    fn test_not_swaps_accept_and_reject() {
        let fragment = build("0 input\n1 output gate NOT 0\n");
        let one_edge = fragment
            .graph
            .edges
            .iter()
            .find(|edge| edge.label)
            .expect("fragment has a 1-edge");
        assert_eq!(one_edge.to, fragment.reject());
        let zero_edge = fragment
            .graph
            .edges
            .iter()
            .find(|edge| !edge.label)
            .expect("fragment has a 0-edge");
        assert_eq!(zero_edge.to, fragment.accept());
    }

    #[test]
    fn test_and_merges_down_to_one_source_and_two_sinks() {
        let fragment = build("0 input\n1 input\n2 output gate AND 0 1\n");
        // Two 3-node fragments collapse to 4 nodes: src, join, acc, rej.
        assert_eq!(fragment.graph.nodes.len(), 4);
        assert_eq!(fragment.layer_count(), 2);
        let join = NodeId {
            role: Role::Join(2),
            gate: 2,
        };
        assert_eq!(fragment.graph.layer(fragment.source()), Some(1));
        assert_eq!(fragment.graph.layer(join), Some(2));
    }

    #[test]
    fn test_and_reverses_the_right_operand_layers() {
        let src = "\
0 input
1 input
2 input
3 gate AND 1 2
4 output gate AND 0 3
";
        let fragment = build(src);
        assert_eq!(fragment.layer_count(), 3);
        // Left layers first, then the right operand's layers reversed.
        let bits: Vec<usize> = (1..=3).map(|layer| fragment.layer_to_bit(layer)).collect();
        assert_eq!(bits, vec![0, 2, 1]);
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn test_composing_a_gate_with_itself_panics() {
        build("0 input\n1 gate ID 0\n2 output gate AND 0 1\n");
    }

    #[test]
    #[should_panic(expected = "outside fragment range")]
    fn test_layer_out_of_range_panics() {
        let fragment = build("0 input\n1 output gate ID 0\n");
        fragment.layer_to_bit(2);
    }
}
