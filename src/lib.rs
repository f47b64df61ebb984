//! A library for compiling boolean formulas into matrix branching programs,
//! and for blinding those programs with Kilian-style randomization.
//!
//! **This library is experimental Cryptographic Software: use at your own peril.**
//!
//! The idea is that a formula built from INPUT, AND, NOT and ID gates can be
//! rewritten as a *branching program*: a sequence of layers, each reading
//! one input bit and selecting one of two transition matrices, such that the
//! product of the selected matrices decides acceptance. The layers can then
//! be multiplied by random invertible matrices over `Z/pZ` in a telescoping
//! pattern, so that each layer looks random on its own while every input
//! keeps its accept/reject outcome. That randomization step is the
//! mathematical core of matrix-branching-program obfuscation; encrypting
//! the blinded matrices (with a multilinear map or anything else) is a
//! separate concern, and this library stops just short of it.
//!
//! # Example
//!
//! Circuits are declared in a small text format, one gate per line. A line
//! holds the gate's index, an optional `output` flag, and the gate itself;
//! an `input` gate reads the bit of the evaluation string at its own index.
//! Lines starting with `#` or `:` are comments:
//!
//! ```rust
//! use bramble::{BranchingProgram, Circuit, Seed};
//! use rand_core::OsRng;
//!
//! let source = "# conjunction of two bits
//! 0 input
//! 1 input
//! 2 output gate AND 0 1";
//!
//! let circuit = Circuit::parse(source).expect("failed to parse circuit");
//!
//! // Compile the formula into a sequence of layers.
//! let program = BranchingProgram::compile(&circuit);
//! assert_eq!(program.evaluate("11"), Ok(true));
//! assert_eq!(program.evaluate("10"), Ok(false));
//!
//! // Blind the layers. Evaluation results are preserved on every input.
//! let seed = Seed::random(&mut OsRng);
//! let randomized = program.randomize(1_000_003, &seed).expect("failed to randomize");
//! assert_eq!(randomized.evaluate("11"), Ok(true));
//! assert_eq!(randomized.evaluate("10"), Ok(false));
//! ```
//!
//! Note that `randomize` consumes the program: once the layers have been
//! blinded there is no way back, and no way to blind them a second time.
//!
//! # Details
//!
//! The compilation follows the classic layered construction. Every gate
//! becomes a small graph fragment with distinguished source, accept and
//! reject states; AND glues two fragments in sequence by contracting nodes,
//! NOT exchanges the accept and reject states, and ID shares the operand's
//! fragment. The finished graph is put in a canonical form (dense state
//! indices, source first, accept last) and encoded as one pair of GF(2)
//! matrices per layer, in the "relaxed" style where states a layer does not
//! read are fixed points.
//!
//! An unrandomized [`BranchingProgram`] can be evaluated two ways — by
//! pruning the graph and checking reachability, or by multiplying the
//! selected layer matrices — and both agree with the randomized evaluation
//! on every input. The randomness consumed by [`BranchingProgram::randomize`]
//! is drawn from a [`Seed`] through an extendable-output hash, so a
//! randomization run is reproducible given its seed.
mod bp;
mod circuit;
mod field;
mod fragment;
mod matrix;
mod randomize;
mod rng;

pub use bp::{BranchingProgram, EvalError, Layer};
pub use circuit::{test_cases, Circuit, Gate, ParseError, TestCase};
pub use field::PrimeField;
pub use matrix::Matrix;
pub use randomize::{RandomizeError, RandomizedProgram};
pub use rng::Seed;
