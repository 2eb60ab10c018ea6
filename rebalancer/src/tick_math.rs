// Concentrated-liquidity tick math: price = 1.0001^tick

use crate::error::RebalanceError;

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

const TICK_BASE: f64 = 1.0001;

/// Convert a pool-orientation price to its raw tick via
/// floor(ln(price) / ln(1.0001)).
///
/// powi-then-ln loses a few ulps, so ratios within 1e-8 of an integer snap
/// to it; otherwise tick_to_price followed by price_to_tick would land one
/// tick low.
pub fn price_to_tick(price: f64) -> Result<i32, RebalanceError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(RebalanceError::InvalidRange(format!(
            "cannot derive tick from price {}",
            price
        )));
    }

    let ratio = price.ln() / TICK_BASE.ln();
    let nearest = ratio.round();
    let tick = if (ratio - nearest).abs() < 1e-8 {
        nearest as i32
    } else {
        ratio.floor() as i32
    };

    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(RebalanceError::InvalidRange(format!(
            "tick {} outside [{}, {}]",
            tick, MIN_TICK, MAX_TICK
        )));
    }
    Ok(tick)
}

/// price = 1.0001^tick
pub fn tick_to_price(tick: i32) -> f64 {
    TICK_BASE.powi(tick)
}

/// sqrt(1.0001^tick)
pub fn sqrt_price_at_tick(tick: i32) -> f64 {
    tick_to_price(tick).sqrt()
}

/// Largest multiple of `spacing` that is <= `tick`. Floor division, so
/// negative ticks round away from zero.
pub fn align_down(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

/// Smallest multiple of `spacing` that is >= `tick`.
pub fn align_up(tick: i32, spacing: i32) -> i32 {
    let down = align_down(tick, spacing);
    if down == tick {
        tick
    } else {
        down + spacing
    }
}

/// Token amounts currently backing `liquidity` between the tick bounds, at
/// the given pool-orientation sqrt price. Standard concentrated-liquidity
/// identities:
///   amount0 = L * (1/sqrtP - 1/sqrtU)   for the in-range token0 leg
///   amount1 = L * (sqrtP - sqrtL)       for the in-range token1 leg
/// with the price clamped into [sqrtL, sqrtU] for the out-of-range regimes.
pub fn amounts_for_liquidity(
    liquidity: f64,
    sqrt_price: f64,
    sqrt_lower: f64,
    sqrt_upper: f64,
) -> (f64, f64) {
    if liquidity <= 0.0 || sqrt_lower <= 0.0 || sqrt_upper <= sqrt_lower {
        return (0.0, 0.0);
    }
    let sp = sqrt_price.clamp(sqrt_lower, sqrt_upper);
    let amount0 = liquidity * (1.0 / sp - 1.0 / sqrt_upper);
    let amount1 = liquidity * (sp - sqrt_lower);
    (amount0.max(0.0), amount1.max(0.0))
}
