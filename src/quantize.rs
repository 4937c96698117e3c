use rust_decimal::Decimal;

/// Truncate toward zero at `dp` decimal places
///
/// Guarantees `result <= value` for non-negative input, so a sell sized from
/// a held balance can never exceed it. `dp == 0` truncates to an integer.
pub fn truncate_floor(value: Decimal, dp: u32) -> Decimal {
    value.trunc_with_scale(dp)
}

/// Truncate upward at `dp` decimal places
///
/// Guarantees `result >= value` with an excess strictly below `10^-dp`.
/// Used for buy-side quote sizing: a slightly padded amount avoids
/// rejections for falling below the exchange minimum after truncation.
pub fn truncate_ceil(value: Decimal, dp: u32) -> Decimal {
    let floored = value.trunc_with_scale(dp);
    if floored == value {
        floored
    } else {
        floored + Decimal::new(1, dp)
    }
}
