//! Hashers with controlled collisions.
//!
//! [`MappedHasher`] passes integer keys through a caller-supplied function,
//! so tests can force shared chunk prefixes or identical full hashes.

use std::hash::{BuildHasher, Hasher};

#[derive(Clone, Copy)]
pub(crate) struct MappedHasher {
    map: fn(u64) -> u64,
}

impl MappedHasher {
    pub(crate) fn new(map: fn(u64) -> u64) -> Self {
        Self { map }
    }
}

impl BuildHasher for MappedHasher {
    type Hasher = MappedState;

    fn build_hasher(&self) -> MappedState {
        MappedState {
            value: 0,
            map: self.map,
        }
    }
}

pub(crate) struct MappedState {
    value: u64,
    map: fn(u64) -> u64,
}

impl Hasher for MappedState {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.value = self.value.rotate_left(8) ^ u64::from(b);
        }
    }

    fn write_u16(&mut self, v: u16) {
        self.value ^= u64::from(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.value ^= u64::from(v);
    }

    fn write_u64(&mut self, v: u64) {
        self.value ^= v;
    }

    fn finish(&self) -> u64 {
        (self.map)(self.value)
    }
}
