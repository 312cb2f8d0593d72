use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// All energy amounts, capacities and throughput budgets use this type so
/// that distribution is bit-for-bit deterministic.
pub type Fixed64 = I32F32;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// `numerator / denominator` as a ratio, or zero when the denominator is not
/// positive.
#[inline]
pub fn ratio(numerator: Fixed64, denominator: Fixed64) -> Fixed64 {
    if denominator <= Fixed64::ZERO {
        return Fixed64::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or(Fixed64::MAX)
}

/// Fraction `part / whole` of two integer weights, clamped to `[0, 1]`.
///
/// Computed on the raw Q32.32 bits so weights beyond the integer range of
/// `Fixed64` keep their proportions. Rounds toward zero, so the fractions
/// of a split never add up to more than one.
#[inline]
pub fn weight_fraction(part: u64, whole: u64) -> Fixed64 {
    if whole == 0 {
        return Fixed64::ZERO;
    }
    let part = part.min(whole);
    let bits = (u128::from(part) << Fixed64::FRAC_NBITS) / u128::from(whole);
    Fixed64::from_bits(i64::try_from(bits).unwrap_or(i64::MAX))
}

/// Per-tick throughput budget: `throughput * delta_time * game_speed`.
///
/// Saturates instead of overflowing; a high-tier link at high game speed
/// can exceed the Q32.32 range.
#[inline]
pub fn tick_budget(throughput: Fixed64, delta_time: Fixed64, game_speed: Fixed64) -> Fixed64 {
    throughput
        .saturating_mul(delta_time)
        .saturating_mul(game_speed)
        .max(Fixed64::ZERO)
}
