use std::collections::{HashMap, VecDeque};
use std::fmt;

use bincode::{Decode, Encode};
use log::debug;

use crate::circuit::Circuit;
use crate::field::PrimeField;
use crate::fragment::{FragmentBuilder, GateFragment, NodeId};
use crate::matrix::Matrix;

/// One step of a branching program: the input bit it reads and the two
/// transition matrices it selects between.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Layer {
    /// The global input bit this layer reads.
    pub bit: usize,
    /// The transition matrix applied when the bit is 0.
    pub zero: Matrix,
    /// The transition matrix applied when the bit is 1.
    pub one: Matrix,
}

/// Errors produced when evaluating a program on an input string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// Some layer reads a bit position the input string does not cover.
    InputTooShort { bit: usize, len: usize },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::InputTooShort { bit, len } => write!(
                f,
                "evaluation input too short: a layer reads bit {bit}, input holds {len} characters"
            ),
        }
    }
}

impl std::error::Error for EvalError {}

/// Look up one bit of an evaluation input string.
///
/// The zero branch is chosen exactly when the character is '0'.
pub(crate) fn input_bit(input: &str, bit: usize) -> Result<bool, EvalError> {
    match input.as_bytes().get(bit) {
        Some(&c) => Ok(c != b'0'),
        None => Err(EvalError::InputTooShort {
            bit,
            len: input.len(),
        }),
    }
}

/// The canonical graph form of a compiled program.
///
/// Nodes are dense indices `0..len`, with the source at 0 and the accept
/// state at `len - 1`.
#[derive(Clone, Debug)]
pub(crate) struct BpGraph {
    pub(crate) len: usize,
    pub(crate) edges: Vec<(usize, usize, bool)>,
    /// The layer number of each input-reading node, by node index.
    pub(crate) layer_of: Vec<Option<usize>>,
    pub(crate) reject: usize,
}

impl BpGraph {
    /// Order the fragment's nodes topologically and relabel them to dense
    /// indices, forcing the accept node into the last position.
    pub(crate) fn canonicalize(fragment: &GateFragment) -> Self {
        let graph = &fragment.graph;
        let n = graph.nodes.len();
        // Kahn's algorithm; scanning nodes and edges in insertion order
        // keeps the result deterministic.
        let mut indegree: HashMap<NodeId, usize> =
            graph.nodes.iter().map(|&node| (node, 0)).collect();
        for edge in &graph.edges {
            *indegree
                .get_mut(&edge.to)
                .expect("edge endpoint missing from node list") += 1;
        }
        let mut queue: VecDeque<NodeId> = graph
            .nodes
            .iter()
            .copied()
            .filter(|node| indegree[node] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for edge in &graph.edges {
                if edge.from != node {
                    continue;
                }
                let slot = indegree
                    .get_mut(&edge.to)
                    .expect("edge endpoint missing from node list");
                *slot -= 1;
                if *slot == 0 {
                    queue.push_back(edge.to);
                }
            }
        }
        assert!(order.len() == n, "fragment graph contains a cycle");

        // The builder guarantees accept and reject are the only sinks, so
        // they close every topological order. Check rather than trust it:
        // the swap below is only sound under this property.
        let accept = fragment.accept();
        let reject = fragment.reject();
        let accept_at = position_of(&order, accept);
        let reject_at = position_of(&order, reject);
        assert!(
            accept_at.min(reject_at) == n - 2 && accept_at.max(reject_at) == n - 1,
            "accept and reject must close the topological order"
        );
        if accept_at != n - 1 {
            order.swap(accept_at, reject_at);
        }
        assert!(
            order[0] == fragment.source(),
            "source must open the topological order"
        );

        let index: HashMap<NodeId, usize> = order
            .iter()
            .enumerate()
            .map(|(position, &node)| (node, position))
            .collect();
        let edges = graph
            .edges
            .iter()
            .map(|edge| (index[&edge.from], index[&edge.to], edge.label))
            .collect();
        let layer_of = order.iter().map(|&node| graph.layer(node)).collect();
        BpGraph {
            len: n,
            edges,
            layer_of,
            reject: index[&reject],
        }
    }
}

fn position_of(order: &[NodeId], node: NodeId) -> usize {
    order
        .iter()
        .position(|&other| other == node)
        .expect("node missing from topological order")
}

/// Encode the canonical graph as one pair of GF(2) matrices per layer.
///
/// Both matrices start as the identity, so states not read by a layer are
/// fixed points; the rows that do branch end up holding two ones, one on
/// the diagonal and one for the taken edge.
fn encode_layers(graph: &BpGraph, fragment: &GateFragment) -> Vec<Layer> {
    (1..=fragment.layer_count())
        .map(|layer| {
            let mut zero = Matrix::identity(graph.len);
            let mut one = Matrix::identity(graph.len);
            for &(from, to, label) in &graph.edges {
                if graph.layer_of[from] == Some(layer) {
                    if label {
                        one.set(from, to, 1);
                    } else {
                        zero.set(from, to, 1);
                    }
                }
            }
            Layer {
                bit: fragment.layer_to_bit(layer),
                zero,
                one,
            }
        })
        .collect()
}

/// A compiled, unrandomized branching program.
///
/// Compilation keeps both representations around: the canonical graph, for
/// reachability evaluation, and the relaxed GF(2) matrix layers, for product
/// evaluation and as the input to randomization.
#[derive(Clone, Debug)]
pub struct BranchingProgram {
    pub(crate) graph: BpGraph,
    pub(crate) layers: Vec<Layer>,
}

impl BranchingProgram {
    /// Compile a parsed circuit into its branching program.
    pub fn compile(circuit: &Circuit) -> Self {
        let fragment = FragmentBuilder::build(circuit);
        let graph = BpGraph::canonicalize(&fragment);
        let layers = encode_layers(&graph, &fragment);
        debug!(
            "compiled circuit into {} states and {} layers (reject state {})",
            graph.len,
            layers.len(),
            graph.reject
        );
        BranchingProgram { graph, layers }
    }

    /// The number of states, which is also the dimension of every layer
    /// matrix.
    pub fn length(&self) -> usize {
        self.graph.len
    }

    /// The encoded layers, in evaluation order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Evaluate by pruning the graph and searching for a path from the
    /// source state to the accept state.
    pub fn evaluate_graph(&self, input: &str) -> Result<bool, EvalError> {
        let choices = self.layer_choices(input)?;
        let mut adjacency = vec![Vec::new(); self.graph.len];
        for &(from, to, label) in &self.graph.edges {
            let layer = self.graph.layer_of[from].expect("non-sink node without a layer");
            // Keep only the edges agreeing with this layer's input bit.
            if choices[layer - 1] == label {
                adjacency[from].push(to);
            }
        }
        let accept = self.graph.len - 1;
        let mut seen = vec![false; self.graph.len];
        let mut queue = VecDeque::from([0usize]);
        seen[0] = true;
        while let Some(node) = queue.pop_front() {
            if node == accept {
                return Ok(true);
            }
            for &next in &adjacency[node] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        Ok(false)
    }

    /// Evaluate by multiplying the selected layer matrices over GF(2).
    pub fn evaluate(&self, input: &str) -> Result<bool, EvalError> {
        let field = PrimeField::GF2;
        let choices = self.layer_choices(input)?;
        let mut product = Matrix::identity(self.graph.len);
        for (layer, &choice) in self.layers.iter().zip(&choices) {
            let step = if choice { &layer.one } else { &layer.zero };
            product = product.mul(step, &field);
        }
        Ok(product.get(0, self.graph.len - 1) == 1)
    }

    /// The branch chosen by each layer for this input.
    fn layer_choices(&self, input: &str) -> Result<Vec<bool>, EvalError> {
        self.layers
            .iter()
            .map(|layer| input_bit(input, layer.bit))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::circuit::{test_cases, Gate};
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn compile(src: &str) -> BranchingProgram {
        let circuit = Circuit::parse(src).expect("circuit should parse");
        BranchingProgram::compile(&circuit)
    }

    /// Evaluate the formula directly, as the ground truth.
    fn reference_eval(circuit: &Circuit, input: &str) -> bool {
        fn eval_gate(gates: &[Gate], index: usize, input: &str) -> bool {
            match gates[index] {
                Gate::Input { bit } => input.as_bytes()[bit] != b'0',
                Gate::And(left, right) => {
                    eval_gate(gates, left, input) && eval_gate(gates, right, input)
                }
                Gate::Not(operand) => !eval_gate(gates, operand, input),
                Gate::Id(operand) => eval_gate(gates, operand, input),
            }
        }
        eval_gate(circuit.gates(), circuit.output(), input)
    }

    /// Render a random left-deep formula as circuit text.
    ///
    /// Each step extends the running formula with NOT, ID, or an AND whose
    /// right operand is a fresh (possibly negated) input, so the composition
    /// stays in the shape the builder supports.
    fn circuit_text(steps: &[u8]) -> String {
        let mut lines = vec!["0 input".to_string()];
        let mut last = 0;
        let mut next = 1;
        for &step in steps {
            match step % 4 {
                0 => {
                    lines.push(format!("{next} gate NOT {last}"));
                    last = next;
                    next += 1;
                }
                1 => {
                    lines.push(format!("{next} gate ID {last}"));
                    last = next;
                    next += 1;
                }
                2 => {
                    lines.push(format!("{next} input"));
                    lines.push(format!("{} gate AND {} {}", next + 1, last, next));
                    last = next + 1;
                    next += 2;
                }
                _ => {
                    lines.push(format!("{next} input"));
                    lines.push(format!("{} gate NOT {}", next + 1, next));
                    lines.push(format!("{} gate AND {} {}", next + 2, last, next + 1));
                    last = next + 2;
                    next += 3;
                }
            }
        }
        lines.push(format!("{next} output gate ID {last}"));
        lines.join("\n")
    }

    #[test]
    fn test_single_input_identity() {
        let program = compile("0 input\n1 output gate ID 0\n");
        assert_eq!(program.evaluate("0"), Ok(false));
        assert_eq!(program.evaluate("1"), Ok(true));
        assert_eq!(program.evaluate_graph("0"), Ok(false));
        assert_eq!(program.evaluate_graph("1"), Ok(true));
    }

    #[test]
    fn test_not_inverts() {
        let program = compile("0 input\n1 output gate NOT 0\n");
        assert_eq!(program.evaluate("0"), Ok(true));
        assert_eq!(program.evaluate("1"), Ok(false));
        assert_eq!(program.evaluate_graph("0"), Ok(true));
        assert_eq!(program.evaluate_graph("1"), Ok(false));
    }

    #[test]
    fn test_and_truth_table() {
        let src = "\
# TEST 00 0
# TEST 01 0
# TEST 10 0
# TEST 11 1
0 input
1 input
2 output gate AND 0 1
";
        let program = compile(src);
        for case in test_cases(src) {
            assert_eq!(
                program.evaluate(&case.input),
                Ok(case.expected),
                "matrix evaluation of input {}",
                case.input
            );
            assert_eq!(
                program.evaluate_graph(&case.input),
                Ok(case.expected),
                "graph evaluation of input {}",
                case.input
            );
        }
    }

    #[test]
    fn test_sparse_bit_positions() {
        // The middle input never feeds the output, so its bit is skipped.
        let src = "0 input\n1 input\n2 input\n3 output gate AND 0 2\n";
        let program = compile(src);
        assert_eq!(program.layers().len(), 2);
        assert_eq!(program.evaluate("101"), Ok(true));
        assert_eq!(program.evaluate("111"), Ok(true));
        assert_eq!(program.evaluate("110"), Ok(false));
    }

    #[test]
    fn test_input_too_short_is_an_error() {
        let program = compile("0 input\n1 input\n2 output gate AND 0 1\n");
        assert_eq!(
            program.evaluate("1"),
            Err(EvalError::InputTooShort { bit: 1, len: 1 })
        );
        assert_eq!(
            program.evaluate_graph("1"),
            Err(EvalError::InputTooShort { bit: 1, len: 1 })
        );
    }

    #[test]
    fn test_canonical_form() {
        let sources = [
            "0 input\n1 output gate ID 0\n",
            "0 input\n1 output gate NOT 0\n",
            "0 input\n1 input\n2 output gate AND 0 1\n",
            "0 input\n1 input\n2 gate AND 0 1\n3 output gate NOT 2\n",
        ];
        for src in sources {
            let program = compile(src);
            let accept = program.length() - 1;
            // The accept state is a sink without a layer, and it is not the
            // reject state.
            assert_eq!(program.graph.layer_of[accept], None);
            assert_ne!(program.graph.reject, accept);
            assert!(program.graph.edges.iter().all(|&(from, _, _)| from != accept));
            // The source state is index 0 and nothing enters it.
            assert!(program.graph.edges.iter().all(|&(_, to, _)| to != 0));
            assert_eq!(program.graph.layer_of[0], Some(1));
        }
    }

    #[test]
    fn test_layer_matrices_are_identity_off_the_active_rows() {
        let program = compile("0 input\n1 input\n2 output gate AND 0 1\n");
        for (i, layer) in program.layers().iter().enumerate() {
            for row in 0..program.length() {
                // Only the rows of this layer's nodes may branch.
                if program.graph.layer_of[row] == Some(i + 1) {
                    continue;
                }
                for col in 0..program.length() {
                    let expected = u64::from(row == col);
                    assert_eq!(layer.zero.get(row, col), expected);
                    assert_eq!(layer.one.get(row, col), expected);
                }
            }
        }
    }

    proptest! {
        #[test]
        fn test_compiled_program_matches_the_formula(
            steps in vec(0u8..4, 0..8),
            bits in vec(any::<bool>(), 32),
        ) {
            let src = circuit_text(&steps);
            let input: String = bits.iter().map(|&b| if b { '1' } else { '0' }).collect();
            let circuit = Circuit::parse(&src).unwrap();
            let program = BranchingProgram::compile(&circuit);
            let expected = reference_eval(&circuit, &input);
            prop_assert_eq!(program.evaluate(&input).unwrap(), expected);
            prop_assert_eq!(program.evaluate_graph(&input).unwrap(), expected);
        }
    }

    proptest! {
        #[test]
        fn test_graph_and_matrix_strategies_agree(
            steps in vec(0u8..4, 0..8),
            bits in vec(any::<bool>(), 32),
        ) {
            let src = circuit_text(&steps);
            let input: String = bits.iter().map(|&b| if b { '1' } else { '0' }).collect();
            let program = compile(&src);
            prop_assert_eq!(
                program.evaluate(&input).unwrap(),
                program.evaluate_graph(&input).unwrap()
            );
        }
    }
}
