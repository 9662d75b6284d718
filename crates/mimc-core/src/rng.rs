//! Seeded generators for samplers: one reproducible stream per level.

use std::collections::BTreeMap;
use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use siphasher::sip::SipHasher13;

use crate::index::MultiIndex;

/// Seeded generator handed to sampling routines.
///
/// Remembers its seed so that independent child streams, per substream or
/// per level, can be derived from it without consuming any of its draws.
#[derive(Debug, Clone)]
pub struct RngHandle {
    seed: u64,
    rng: StdRng,
}

impl RngHandle {
    /// Generator seeded with `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this handle was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generator for substream `stream` of this handle's seed.
    pub fn substream(&self, stream: u64) -> Self {
        Self::from_seed(derive_substream_seed(self.seed, stream))
    }

    /// Generator dedicated to `level`.
    pub fn for_level(&self, level: &MultiIndex) -> Self {
        Self::from_seed(level_seed(self.seed, level))
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Lazily created per-level generators sharing one root seed.
///
/// A level's draws depend only on the root seed, the level and how many
/// samples that level has taken, never on the order in which the controller
/// visits the other levels.
#[derive(Debug, Clone)]
pub struct LevelStreams {
    root: RngHandle,
    streams: BTreeMap<MultiIndex, RngHandle>,
}

impl LevelStreams {
    /// Streams derived from `root`.
    pub fn new(root: RngHandle) -> Self {
        Self {
            root,
            streams: BTreeMap::new(),
        }
    }

    /// Generator of `level`, created on first use.
    pub fn level(&mut self, level: &MultiIndex) -> &mut RngHandle {
        let root = &self.root;
        self.streams
            .entry(level.clone())
            .or_insert_with(|| root.for_level(level))
    }

    /// Number of levels that have drawn so far.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no level has drawn yet.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// SipHash-1-3 of `(master_seed, substream)` under zero keys.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}

/// Seed of `level`'s stream. Hashes the canonical coordinates, so `[2, 0]`
/// and `[2]` share a stream.
pub fn level_seed(master_seed: u64, level: &MultiIndex) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_usize(level.dim());
    for value in level.dense(level.dim()) {
        hasher.write_u32(value);
    }
    hasher.finish()
}
