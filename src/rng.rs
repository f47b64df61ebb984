use blake3;
use rand_core::{CryptoRng, RngCore};

use crate::field::PrimeField;
use crate::matrix::Matrix;

/// The number of bytes in an RNG seed
const SEED_LEN: usize = blake3::KEY_LEN;

/// Represents the seed to a pseudo-random RNG.
///
/// The seed fully determines every matrix the randomizer samples, so a
/// randomization run can be reproduced by holding on to it.
#[derive(Clone)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Generate a random Seed.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SEED_LEN];
        rng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Create a seed from explicit bytes, for reproducible runs.
    pub fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }
}

/// The number of bytes we buffer in our RNG.
///
/// Using 64 is a good match with the XOF output from BLAKE3.
const BUF_LEN: usize = 64;

/// The context string used for our PRNG.
///
/// This provides some level of domain seperation for the random bytes we
/// generate from a seed.
const PRNG_CONTEXT: &[u8] = b"bramble v0.1.0 PRNG context";

/// How many draws to attempt before giving up on an invertible matrix.
///
/// A uniformly random matrix over a non-trivial field is invertible with
/// overwhelming probability, so hitting this bound means something is wrong
/// with the field or the entropy source rather than bad luck.
pub(crate) const MAX_SAMPLE_ATTEMPTS: usize = 100;

/// A Pseudo-Random generator of field elements.
///
/// This is intended to be created from a random seed, providing us with a
/// deterministic source of random field elements. This is what makes a
/// randomization run reproducible.
#[derive(Clone)]
pub(crate) struct FieldPrng {
    reader: blake3::OutputReader,
    /// The buffer holding the next bytes of output from the XOF.
    ///
    /// This will always be initialized to some output.
    buf: [u8; BUF_LEN],
    /// The next byte index within that buffer to read from.
    byte_index: usize,
}

impl FieldPrng {
    fn fill_buf(&mut self) {
        self.reader.fill(&mut self.buf);
    }

    fn next_u64(&mut self) -> u64 {
        if self.byte_index + 8 > BUF_LEN {
            self.byte_index = 0;
            self.fill_buf();
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.buf[self.byte_index..self.byte_index + 8]);
        self.byte_index += 8;
        u64::from_le_bytes(word)
    }
}

impl FieldPrng {
    /// Create a FieldPrng from a seed.
    ///
    /// This seed entirely determines the stream of elements that this RNG
    /// will produce from that point on.
    pub fn seeded(seed: &Seed) -> Self {
        // We extend the seed to an arbitrary stream of bytes, with some domain separation.
        let reader = blake3::Hasher::new_keyed(&seed.0)
            .update(PRNG_CONTEXT)
            .finalize_xof();
        // Create the output with an uninitialized buffer, but fill it immediately
        let mut out = Self {
            reader,
            buf: [0; BUF_LEN],
            byte_index: 0,
        };
        out.fill_buf();
        out
    }

    /// Read a uniformly distributed field element from the stream.
    ///
    /// Raw u64 draws above the largest multiple of the modulus are rejected,
    /// keeping the reduction unbiased.
    pub fn next_element(&mut self, field: &PrimeField) -> u64 {
        let p = field.modulus();
        // 2^64 mod p, computed without leaving u64.
        let rem = ((u64::MAX % p) + 1) % p;
        loop {
            let x = self.next_u64();
            if x <= u64::MAX - rem {
                return x % p;
            }
        }
    }
}

/// Sample a uniformly random matrix entry by entry.
fn random_matrix(prng: &mut FieldPrng, field: &PrimeField, size: usize) -> Matrix {
    let entries = (0..size * size).map(|_| prng.next_element(field)).collect();
    Matrix::from_entries(size, entries)
}

/// Sample a uniformly random invertible matrix, along with its inverse.
///
/// Singular draws are discarded and redrawn. Returns `None` once
/// `MAX_SAMPLE_ATTEMPTS` draws have all come up singular.
pub(crate) fn invertible_pair(
    prng: &mut FieldPrng,
    field: &PrimeField,
    size: usize,
) -> Option<(Matrix, Matrix)> {
    for _ in 0..MAX_SAMPLE_ATTEMPTS {
        let m = random_matrix(prng, field, size);
        if let Some(inv) = m.inverse(field) {
            return Some((m, inv));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seeded_stream_is_deterministic() {
        let seed = Seed::from_bytes([7; SEED_LEN]);
        let field = PrimeField::new(1_000_000_007);
        let mut a = FieldPrng::seeded(&seed);
        let mut b = FieldPrng::seeded(&seed);
        for _ in 0..100 {
            assert_eq!(a.next_element(&field), b.next_element(&field));
        }
    }

    #[test]
    fn test_elements_are_canonical() {
        let seed = Seed::from_bytes([1; SEED_LEN]);
        let field = PrimeField::new(97);
        let mut prng = FieldPrng::seeded(&seed);
        for _ in 0..1000 {
            assert!(prng.next_element(&field) < 97);
        }
    }

    #[test]
    fn test_invertible_pair_multiplies_to_identity() {
        let seed = Seed::from_bytes([3; SEED_LEN]);
        let field = PrimeField::new(101);
        let mut prng = FieldPrng::seeded(&seed);
        let (m, inv) = invertible_pair(&mut prng, &field, 4).expect("sampling should succeed");
        assert_eq!(m.mul(&inv, &field), Matrix::identity(4));
    }
}
