use std::fmt;

use bincode::{Decode, Encode};
use log::debug;

use crate::bp::{input_bit, BranchingProgram, EvalError, Layer};
use crate::field::PrimeField;
use crate::matrix::Matrix;
use crate::rng::{invertible_pair, FieldPrng, Seed, MAX_SAMPLE_ATTEMPTS};

/// Errors produced when randomizing a branching program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomizeError {
    /// The modulus was too small to describe a field.
    BadModulus(u64),
    /// Rejection sampling kept drawing singular matrices.
    ///
    /// For any non-trivial modulus this is astronomically unlikely; seeing
    /// it means the field or the entropy source is broken.
    SingularSampling { attempts: usize },
}

impl fmt::Display for RandomizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandomizeError::BadModulus(modulus) => {
                write!(f, "{modulus} is not a valid field modulus")
            }
            RandomizeError::SingularSampling { attempts } => {
                write!(f, "failed to sample an invertible matrix in {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for RandomizeError {}

/// A branching program blinded by Kilian's conjugation technique.
///
/// Every layer matrix has been multiplied by random invertible matrices
/// over `Z/pZ`, so no single layer reveals the unrandomized program. The
/// conjugators telescope away inside the layer product, and the boundary
/// matrices cancel during evaluation, so every input keeps its
/// accept/reject outcome.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RandomizedProgram {
    field: PrimeField,
    layers: Vec<Layer>,
    m0: Matrix,
    m0_inv: Matrix,
    /// One-hot selector for the source state.
    e_first: Vec<u64>,
    /// One-hot selector for the accept state.
    e_last: Vec<u64>,
}

impl BranchingProgram {
    /// Blind the program with random invertible matrices over `Z/pZ`.
    ///
    /// `prime` must be a prime of the caller's choosing; all randomness is
    /// drawn deterministically from `seed`, so a run can be reproduced.
    /// Taking the program by value is what rules out randomizing twice.
    pub fn randomize(self, prime: u64, seed: &Seed) -> Result<RandomizedProgram, RandomizeError> {
        if prime < 2 {
            return Err(RandomizeError::BadModulus(prime));
        }
        let field = PrimeField::new(prime);
        let length = self.length();
        let mut prng = FieldPrng::seeded(seed);
        let sample = |prng: &mut FieldPrng| {
            invertible_pair(prng, &field, length).ok_or(RandomizeError::SingularSampling {
                attempts: MAX_SAMPLE_ATTEMPTS,
            })
        };

        let (m0, m0_inv) = sample(&mut prng)?;
        let BranchingProgram { mut layers, .. } = self;
        mult_left(&mut layers[0], &m0, &field);
        for i in 1..layers.len() {
            let (r, r_inv) = sample(&mut prng)?;
            mult_right(&mut layers[i - 1], &r_inv, &field);
            mult_left(&mut layers[i], &r, &field);
        }
        let last = layers.len() - 1;
        mult_right(&mut layers[last], &m0_inv, &field);

        let mut e_first = vec![0u64; length];
        e_first[0] = 1;
        let mut e_last = vec![0u64; length];
        e_last[length - 1] = 1;
        debug!("randomized {} layers over Z/{}Z", layers.len(), prime);
        Ok(RandomizedProgram {
            field,
            layers,
            m0,
            m0_inv,
            e_first,
            e_last,
        })
    }
}

/// Replace both matrices of a layer with `m * matrix`.
fn mult_left(layer: &mut Layer, m: &Matrix, field: &PrimeField) {
    layer.zero = m.mul(&layer.zero, field);
    layer.one = m.mul(&layer.one, field);
}

/// Replace both matrices of a layer with `matrix * m`.
fn mult_right(layer: &mut Layer, m: &Matrix, field: &PrimeField) {
    layer.zero = layer.zero.mul(m, field);
    layer.one = layer.one.mul(m, field);
}

impl RandomizedProgram {
    /// The modulus the program was randomized over.
    pub fn modulus(&self) -> u64 {
        self.field.modulus()
    }

    /// The blinded layers, in evaluation order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Evaluate the program on an input string.
    ///
    /// Computes `e_first * m0^-1 * product * m0 * e_last`: the interior
    /// conjugators cancel pairwise inside the product and the boundary ones
    /// cancel against `m0`, leaving the unrandomized product's entry at the
    /// source row and accept column.
    pub fn evaluate(&self, input: &str) -> Result<bool, EvalError> {
        let field = &self.field;
        let mut product = Matrix::identity(self.m0.size());
        for layer in &self.layers {
            let step = if input_bit(input, layer.bit)? {
                &layer.one
            } else {
                &layer.zero
            };
            product = product.mul(step, field);
        }
        let v = self.m0_inv.row_mul(&self.e_first, field);
        let v = product.row_mul(&v, field);
        let v = self.m0.row_mul(&v, field);
        let mut scalar = 0;
        for (a, b) in v.iter().zip(&self.e_last) {
            scalar = field.add(scalar, field.mul(*a, *b));
        }
        Ok(scalar == 1)
    }
}
