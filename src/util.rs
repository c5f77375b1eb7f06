//! Common utility functions.
//!
//! Provides branch prediction hints for the read-loop hot path and the FNV
//! hash used to derive stable session identifiers.

/// Marker function for cold code paths.
///
/// Used with branch prediction hints to inform the compiler about infrequently executed paths.
#[inline(always)]
#[cold]
pub fn cold() {}

/// Branch prediction hint for conditions expected to be false.
#[inline(always)]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}

/// Branch prediction hint for conditions expected to be true.
#[inline(always)]
pub fn likely(b: bool) -> bool {
    if !b {
        cold()
    }
    b
}

/// Milliseconds elapsed on the process-wide monotonic clock.
///
/// Session activity timestamps and event timestamps share this epoch so
/// the watchdog can compare them directly.
pub fn monotonic_millis() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// FNV-1a 64-bit hash constants.
pub mod fnv64 {
    /// Offset basis for FNV-1a 64-bit hash.
    pub const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    /// Prime multiplier for FNV-1a 64-bit hash.
    pub const PRIME: u64 = 0x100000001b3;
}

/// Computes FNV-1a 64-bit hash of one value into the running state.
#[inline(always)]
pub fn fnv1a_hash_u64(mut hash: u64, value: u64) -> u64 {
    hash ^= value;
    hash.wrapping_mul(fnv64::PRIME)
}

/// Computes FNV-1a 64-bit hash for a byte sequence.
#[inline(always)]
pub fn fnv1a_hash_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash = fnv1a_hash_u64(hash, byte as u64);
    }
    hash
}
