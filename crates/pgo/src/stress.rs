//! Deterministic pseudo-random block weights for stress testing.
//!
//! About a third of offsets get a zero weight so that downstream
//! procedure-splitting paths are exercised; the rest get a small or
//! occasionally large weight. The constants are load-bearing for test
//! reproducibility.

use tempo_ir::Weight;

/// Weight for `il_offset` under stress seed `seed`. Pure function of its
/// arguments; the entry offset is floored to a non-zero weight.
pub fn stress_weight(method_hash: u32, seed: u32, il_offset: u32) -> Weight {
    let hash = method_hash
        .wrapping_mul(seed)
        ^ il_offset.wrapping_mul(1027);

    let mut weight = if hash % 3 == 0 {
        0.0
    } else if hash % 11 == 0 {
        ((hash % 23) * (hash % 29) * (hash % 31)) as Weight
    } else {
        ((hash % 17) * (hash % 19)) as Weight
    };

    // The first block is never given a weight of zero.
    if il_offset == 0 && weight == 0.0 {
        weight = (1 + hash % 5) as Weight;
    }

    weight
}
