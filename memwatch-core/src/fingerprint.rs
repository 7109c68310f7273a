//! ## memwatch-core::fingerprint
//! **Call-site fingerprints.**
//!
//! A fingerprint is the first `BACKTRACE_DEPTH` return addresses of the
//! allocating stack. Blocks only keep its 32-bit hash; the frames live once
//! per call site in a [`FingerprintSet`].

use std::collections::HashMap;

use memwatch_protocol::{FingerprintRecord, BACKTRACE_DEPTH};
use nohash_hasher::BuildNoHashHasher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    frames: [usize; BACKTRACE_DEPTH],
}

impl Fingerprint {
    /// Walks the current stack, dropping the `skip` innermost frames below
    /// this function. Never allocates on its own behalf; the unwinder may,
    /// so callers wrap this in an internal scope.
    #[inline(never)]
    pub fn capture(skip: usize) -> Self {
        let mut frames = [0usize; BACKTRACE_DEPTH];
        let mut len = 0;
        // one extra for this function's own frame
        let mut remaining_skip = skip + 1;
        backtrace::trace(|frame| {
            if remaining_skip > 0 {
                remaining_skip -= 1;
                return true;
            }
            frames[len] = frame.ip() as usize;
            len += 1;
            len < BACKTRACE_DEPTH
        });
        Self { frames }
    }

    pub fn from_frames(frames: [usize; BACKTRACE_DEPTH]) -> Self {
        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames[0] == 0
    }

    /// Captured return addresses up to the first empty slot.
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.iter().copied().take_while(|&f| f != 0)
    }

    /// Stable 32-bit key. Never 0, which marks "no fingerprint".
    pub fn hash(&self) -> u32 {
        let mut bytes = [0u8; BACKTRACE_DEPTH * 8];
        for (chunk, frame) in bytes.chunks_exact_mut(8).zip(self.frames) {
            chunk.copy_from_slice(&(frame as u64).to_le_bytes());
        }
        let digest = blake3::hash(&bytes);
        let head = digest.as_bytes();
        match u32::from_le_bytes([head[0], head[1], head[2], head[3]]) {
            0 => 1,
            h => h,
        }
    }

    pub fn to_record(&self, hash: u32) -> FingerprintRecord {
        let mut frames = [0u64; BACKTRACE_DEPTH];
        for (dst, &src) in frames.iter_mut().zip(&self.frames) {
            *dst = src as u64;
        }
        FingerprintRecord { hash, frames }
    }
}

/// Unique fingerprints keyed by hash. Collisions keep the first call site.
#[derive(Default)]
pub struct FingerprintSet {
    entries: HashMap<u32, Fingerprint, BuildNoHashHasher<u32>>,
}

impl FingerprintSet {
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(BuildNoHashHasher::default()),
        }
    }

    /// Returns true when the call site was not seen before.
    pub fn intern(&mut self, hash: u32, fingerprint: Fingerprint) -> bool {
        match self.entries.entry(hash) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(fingerprint);
                true
            }
        }
    }

    pub fn get(&self, hash: u32) -> Option<&Fingerprint> {
        self.entries.get(&hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Fingerprint)> + '_ {
        self.entries.iter().map(|(&hash, fp)| (hash, fp))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}
