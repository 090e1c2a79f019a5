//! Deterministic random keys.
//!
//! A [`Key`] is an immutable 256-bit seed. New keys are derived from old ones
//! by pure functions ([`Key::split`], [`Key::fold_in`]), so a run is fully
//! determined by its root seed and never touches ambient random state.
//! Derivation uses two disjoint ChaCha20 streams of the parent key; draws are
//! made from a ChaCha8 generator seeded by the key itself.

use rand::{RngCore, SeedableRng};
use rand_chacha::{ChaCha20Rng, ChaCha8Rng};
use serde::{Deserialize, Serialize};

const SPLIT_STREAM: u64 = 0;
const FOLD_STREAM: u64 = 1;
/// ChaCha words consumed by one derived key.
const WORDS_PER_KEY: u128 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key([u8; 32]);

impl Key {
    /// Root key for a seed.
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Key(bytes)
    }

    /// Derive `n` independent keys.
    pub fn split(self, n: usize) -> Vec<Key> {
        let mut rng = ChaCha20Rng::from_seed(self.0);
        rng.set_stream(SPLIT_STREAM);
        (0..n)
            .map(|_| {
                let mut bytes = [0u8; 32];
                rng.fill_bytes(&mut bytes);
                Key(bytes)
            })
            .collect()
    }

    /// Split into a carried key and a fresh sub-key.
    pub fn split2(self) -> (Key, Key) {
        let keys = self.split(2);
        (keys[0], keys[1])
    }

    /// Derive the key for an index, e.g. a walker or an execution unit.
    ///
    /// `fold_in(i)` does not depend on how many other indices are folded in,
    /// which is what keeps sampling independent of the device count.
    pub fn fold_in(self, index: u64) -> Key {
        let mut rng = ChaCha20Rng::from_seed(self.0);
        rng.set_stream(FOLD_STREAM);
        rng.set_word_pos(u128::from(index) * WORDS_PER_KEY);
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Key(bytes)
    }

    /// Generator for drawing numbers from this key.
    pub fn rng(self) -> ChaCha8Rng {
        ChaCha8Rng::from_seed(self.0)
    }
}
