//! Stable hash selector.
//!
//! Daily rotation must pick the same item on every server instance, so the
//! hash is fixed here rather than borrowed from `std::hash`, whose output is
//! allowed to change between Rust releases and is seeded per process.

/// Polynomial rolling hash with multiplier 31 over the key's UTF-16 code
/// units, wrapping at 32 bits and reinterpreted as unsigned.
///
/// `stable_hash("") == 0`, `stable_hash("ab") == 3105`.
pub fn stable_hash(key: &str) -> u32 {
    key.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit))) as u32
}

/// Index into a candidate list of length `len`, or `None` when it is empty.
pub fn select_index(key: &str, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(stable_hash(key) as usize % len)
}

/// Pick one candidate for `key`. Callers must pass candidates in a canonical
/// order; the pick is only stable for as long as that order is.
pub fn select<'a, T>(key: &str, candidates: &'a [T]) -> Option<&'a T> {
    select_index(key, candidates.len()).map(|i| &candidates[i])
}
