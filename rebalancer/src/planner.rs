// Range planning: percentage-based parameters -> tick-aligned price range

use tracing::debug;

use crate::error::RebalanceError;
use crate::tick_math;
use crate::types::PlannedRange;

/// Defensive clamp for the advisory half-width, in percent.
const MIN_HALF_WIDTH_PCT: f64 = 0.1;
const MAX_HALF_WIDTH_PCT: f64 = 50.0;

/// Global policy bound on the realized range width, in percent.
const MIN_RANGE_WIDTH_PCT: f64 = 1.0;
const MAX_RANGE_WIDTH_PCT: f64 = 25.0;

pub struct RangePlanner;

impl RangePlanner {
    /// Converts percentage-based range parameters into a validated,
    /// tick-aligned range.
    ///
    /// Runs the full round-trip check for every caller, advisor-sourced
    /// parameters included: tick snapping can silently move a boundary past
    /// the current price, so the snapped ticks are converted back to prices
    /// and re-verified before the range is accepted.
    pub fn build_range(
        current_price: f64,
        half_width_pct: f64,
        center_skew_pct: f64,
        tick_spacing: i32,
    ) -> Result<PlannedRange, RebalanceError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(RebalanceError::InvalidRange(format!(
                "current price {} is not positive",
                current_price
            )));
        }
        if tick_spacing <= 0 {
            return Err(RebalanceError::InvalidRange(format!(
                "tick spacing {} is not positive",
                tick_spacing
            )));
        }
        if !half_width_pct.is_finite() || !center_skew_pct.is_finite() {
            return Err(RebalanceError::InvalidRange(
                "non-finite range parameters".to_string(),
            ));
        }

        let half_width = half_width_pct.clamp(MIN_HALF_WIDTH_PCT, MAX_HALF_WIDTH_PCT) / 100.0;

        // Human orientation: token0 priced in token1
        let center = current_price * (1.0 + center_skew_pct / 100.0);
        let lower_bound = center * (1.0 - half_width);
        let upper_bound = center * (1.0 + half_width);
        if lower_bound <= 0.0 {
            return Err(RebalanceError::InvalidRange(format!(
                "skew {}% pushes the lower bound non-positive",
                center_skew_pct
            )));
        }

        // Pool ticks encode token1-per-token0, so the bounds flip under the
        // reciprocal
        let pool_lower = 1.0 / upper_bound;
        let pool_upper = 1.0 / lower_bound;

        let raw_lower = tick_math::price_to_tick(pool_lower)?;
        let raw_upper = tick_math::price_to_tick(pool_upper)?;
        if raw_lower >= raw_upper {
            return Err(RebalanceError::InvalidRange(format!(
                "range collapsed: raw ticks {} >= {}",
                raw_lower, raw_upper
            )));
        }

        let lower_tick = tick_math::align_down(raw_lower, tick_spacing);
        let upper_tick = tick_math::align_up(raw_upper, tick_spacing);
        if lower_tick < tick_math::MIN_TICK || upper_tick > tick_math::MAX_TICK {
            return Err(RebalanceError::InvalidRange(format!(
                "snapped ticks [{}, {}] exceed the tick domain",
                lower_tick, upper_tick
            )));
        }

        // Round trip: reconstruct prices from the snapped ticks and
        // re-verify in the human orientation
        let human_lower = 1.0 / tick_math::tick_to_price(upper_tick);
        let human_upper = 1.0 / tick_math::tick_to_price(lower_tick);
        if current_price <= human_lower || current_price >= human_upper {
            return Err(RebalanceError::InvalidRange(format!(
                "current price {} outside snapped range [{:.6}, {:.6}]",
                current_price, human_lower, human_upper
            )));
        }

        let width_pct = (human_upper - human_lower) / current_price * 100.0;
        if !(MIN_RANGE_WIDTH_PCT..=MAX_RANGE_WIDTH_PCT).contains(&width_pct) {
            return Err(RebalanceError::InvalidRange(format!(
                "realized width {:.2}% outside [{}%, {}%]",
                width_pct, MIN_RANGE_WIDTH_PCT, MAX_RANGE_WIDTH_PCT
            )));
        }

        debug!(
            lower_tick,
            upper_tick,
            width_pct = format!("{:.2}", width_pct).as_str(),
            "planned range"
        );

        Ok(PlannedRange {
            lower_tick,
            upper_tick,
            width_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick_math::{sqrt_price_at_tick, tick_to_price};

    #[test]
    fn test_build_range_brackets_current_price() {
        let range = RangePlanner::build_range(2000.0, 5.0, 0.0, 60).unwrap();

        assert!(range.lower_tick < range.upper_tick);
        assert_eq!(range.lower_tick % 60, 0);
        assert_eq!(range.upper_tick % 60, 0);

        let human_lower = 1.0 / tick_to_price(range.upper_tick);
        let human_upper = 1.0 / tick_to_price(range.lower_tick);
        assert!(human_lower < 2000.0 && 2000.0 < human_upper);

        // ±5% each side, before spacing rounding, realizes roughly 10%
        assert!((range.width_pct - 10.0).abs() < 1.5, "width {}", range.width_pct);
    }

    #[test]
    fn test_spacing_one_is_tight() {
        let range = RangePlanner::build_range(1.0, 2.0, 0.0, 1).unwrap();
        assert!(range.width_pct >= 1.0 && range.width_pct < 5.0);
    }

    #[test]
    fn test_half_width_is_clamped() {
        // 0.01% requested, clamped to 0.1%; realized width then fails the
        // 1% floor on a fine-spaced pool
        let err = RangePlanner::build_range(2000.0, 0.01, 0.0, 1).unwrap_err();
        assert!(matches!(err, RebalanceError::InvalidRange(_)));
    }

    #[test]
    fn test_too_wide_range_fails_policy_band() {
        // 50% half-width realizes ~100% width, far beyond the 25% cap
        let err = RangePlanner::build_range(2000.0, 50.0, 0.0, 60).unwrap_err();
        assert!(matches!(err, RebalanceError::InvalidRange(_)));
    }

    #[test]
    fn test_coarse_spacing_overshoots_width_cap() {
        // A 2% half-width spans ~400 raw ticks; snapping to a 2000-tick
        // spacing balloons the realized width to ~40%, past the 25% cap
        let err = RangePlanner::build_range(1.0, 2.0, 0.0, 2000).unwrap_err();
        assert!(matches!(err, RebalanceError::InvalidRange(_)));
    }

    #[test]
    fn test_skew_moving_price_out_of_range_fails() {
        // +20% skew with a 5% half-width leaves the current price below the
        // requested interval entirely
        let err = RangePlanner::build_range(2000.0, 5.0, 20.0, 60).unwrap_err();
        assert!(matches!(err, RebalanceError::InvalidRange(_)));
    }

    #[test]
    fn test_skew_shifts_center() {
        let centered = RangePlanner::build_range(2000.0, 5.0, 0.0, 10).unwrap();
        let skewed = RangePlanner::build_range(2000.0, 5.0, 3.0, 10).unwrap();

        // Positive skew moves the human-orientation range up, which moves
        // pool ticks down
        assert!(skewed.lower_tick < centered.lower_tick);
        assert!(skewed.upper_tick < centered.upper_tick);
    }

    #[test]
    fn test_extreme_skew_fails() {
        // Skew past -100% makes the center non-positive
        let err = RangePlanner::build_range(2000.0, 5.0, -150.0, 60).unwrap_err();
        assert!(matches!(err, RebalanceError::InvalidRange(_)));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(RangePlanner::build_range(0.0, 5.0, 0.0, 60).is_err());
        assert!(RangePlanner::build_range(-1.0, 5.0, 0.0, 60).is_err());
        assert!(RangePlanner::build_range(2000.0, 5.0, 0.0, 0).is_err());
        assert!(RangePlanner::build_range(2000.0, f64::NAN, 0.0, 60).is_err());
    }

    #[test]
    fn test_planned_bounds_monotonic_in_sqrt_space() {
        let range = RangePlanner::build_range(1800.0, 8.0, -2.0, 60).unwrap();
        assert!(sqrt_price_at_tick(range.lower_tick) < sqrt_price_at_tick(range.upper_tick));
    }
}
