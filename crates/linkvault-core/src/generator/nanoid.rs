use crate::generator::{IdGenerator, ID_LENGTH};
use crate::short_id::ShortId;
use rand::Rng;

/// URL-safe alphabet, 64 symbols: every character carries 6 bits.
const ALPHABET: &[u8; 64] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random id generator in the nanoid style.
///
/// With the default length of 8 every id carries 48 bits of entropy.
#[derive(Debug, Clone, Copy)]
pub struct NanoIdGenerator {
    length: usize,
}

impl NanoIdGenerator {
    pub fn new() -> Self {
        Self::with_length(ID_LENGTH)
    }

    pub fn with_length(length: usize) -> Self {
        Self { length }
    }
}

impl Default for NanoIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for NanoIdGenerator {
    fn generate(&self) -> ShortId {
        let mut rng = rand::rng();
        let id: String = (0..self.length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        ShortId::new_unchecked(id)
    }
}
