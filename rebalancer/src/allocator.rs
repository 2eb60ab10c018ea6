// Deposit sizing for a planned range from available token balances

use metrics::counter;
use tracing::{debug, warn};

use crate::error::RebalanceError;
use crate::tick_math::sqrt_price_at_tick;
use crate::types::{AllocationMode, AllocationPlan, PlannedRange};

/// Headroom kept on single-sided deposits.
const SINGLE_SIDE_FACTOR: f64 = 0.99;
/// Safety margin applied to both legs of an in-range deposit.
const SAFETY_MARGIN: f64 = 0.005;
/// Degraded-mode flat fraction of each balance.
const FALLBACK_FACTOR: f64 = 0.95;

pub struct AmountAllocator;

impl AmountAllocator {
    /// Computes the token amounts to deposit for `range` given the current
    /// human-orientation price and the caller's available balances.
    ///
    /// Invariant: neither returned amount exceeds its available balance.
    /// If the concentrated-liquidity math rejects the bounds, the plan
    /// degrades to a flat balance percentage; the degraded mode is marked
    /// on the plan and counted on `rebalancer.allocation_fallback`.
    pub fn allocate(
        current_price: f64,
        range: &PlannedRange,
        available0: f64,
        available1: f64,
    ) -> Result<AllocationPlan, RebalanceError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(RebalanceError::InvalidRange(format!(
                "cannot allocate at price {}",
                current_price
            )));
        }
        if available0 < 0.0 || available1 < 0.0 || !available0.is_finite() || !available1.is_finite()
        {
            return Err(RebalanceError::InvalidRange(format!(
                "negative or non-finite balances: {} / {}",
                available0, available1
            )));
        }

        let plan = match Self::liquidity_math(current_price, range, available0, available1) {
            Ok(plan) => plan,
            Err(reason) => {
                warn!(
                    lower_tick = range.lower_tick,
                    upper_tick = range.upper_tick,
                    reason = reason.as_str(),
                    "liquidity math rejected bounds, using balance-percentage fallback"
                );
                counter!("rebalancer.allocation_fallback").increment(1);
                AllocationPlan {
                    amount0: available0 * FALLBACK_FACTOR,
                    amount1: available1 * FALLBACK_FACTOR,
                    mode: AllocationMode::BalancePercent,
                }
            }
        };

        // Hard invariant, regardless of path
        let plan = AllocationPlan {
            amount0: plan.amount0.min(available0).max(0.0),
            amount1: plan.amount1.min(available1).max(0.0),
            mode: plan.mode,
        };

        debug!(
            amount0 = plan.amount0,
            amount1 = plan.amount1,
            mode = ?plan.mode,
            "allocation plan"
        );
        Ok(plan)
    }

    /// Primary path: equal-liquidity amount ratio at the planned bounds.
    fn liquidity_math(
        current_price: f64,
        range: &PlannedRange,
        available0: f64,
        available1: f64,
    ) -> Result<AllocationPlan, String> {
        // Pool orientation: ticks encode token1-per-token0
        let sqrt_price = (1.0 / current_price).sqrt();
        let sqrt_lower = sqrt_price_at_tick(range.lower_tick);
        let sqrt_upper = sqrt_price_at_tick(range.upper_tick);

        if !(sqrt_lower.is_finite() && sqrt_upper.is_finite()) || sqrt_lower <= 0.0 {
            return Err(format!(
                "non-finite sqrt bounds for ticks [{}, {}]",
                range.lower_tick, range.upper_tick
            ));
        }
        if sqrt_lower >= sqrt_upper {
            return Err(format!(
                "inverted sqrt bounds for ticks [{}, {}]",
                range.lower_tick, range.upper_tick
            ));
        }

        if sqrt_price <= sqrt_lower {
            // Price below range: deposit is entirely token0
            return Ok(AllocationPlan {
                amount0: available0 * SINGLE_SIDE_FACTOR,
                amount1: 0.0,
                mode: AllocationMode::LiquidityMath,
            });
        }
        if sqrt_price >= sqrt_upper {
            // Price above range: deposit is entirely token1
            return Ok(AllocationPlan {
                amount0: 0.0,
                amount1: available1 * SINGLE_SIDE_FACTOR,
                mode: AllocationMode::LiquidityMath,
            });
        }

        // In range: amount0/amount1 ratio implied by equal liquidity at the
        // planned bounds
        let ratio = (sqrt_upper - sqrt_price) / (sqrt_upper * sqrt_price * (sqrt_price - sqrt_lower));
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(format!("degenerate amount ratio {}", ratio));
        }

        // Scale the non-binding balance down to match the ratio
        let (amount0, amount1) = if available0 < available1 * ratio {
            (available0, available0 / ratio)
        } else {
            (available1 * ratio, available1)
        };

        Ok(AllocationPlan {
            amount0: amount0 * (1.0 - SAFETY_MARGIN),
            amount1: amount1 * (1.0 - SAFETY_MARGIN),
            mode: AllocationMode::LiquidityMath,
        })
    }
}
