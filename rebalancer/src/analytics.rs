// Pool analytics: derived health KPIs from a raw pool snapshot
// Missing data degrades individual metrics to 0 instead of erroring

use tracing::debug;

use crate::types::{KpiSet, PoolSnapshot};

/// Trailing window for hourly volatility, in samples.
const DEFAULT_VOLATILITY_WINDOW: usize = 24;

/// Computes the KPI set for one pool snapshot and one position range.
/// Stateless apart from the window size; retry and caching policy belong to
/// the caller.
pub struct PoolAnalyticsEngine {
    volatility_window: usize,
}

impl Default for PoolAnalyticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolAnalyticsEngine {
    pub fn new() -> Self {
        Self {
            volatility_window: DEFAULT_VOLATILITY_WINDOW,
        }
    }

    #[cfg(test)]
    pub fn with_window(volatility_window: usize) -> Self {
        Self { volatility_window }
    }

    pub fn compute_kpis(&self, snapshot: &PoolSnapshot, position_range: (i32, i32)) -> KpiSet {
        let (lower_tick, upper_tick) = position_range;

        let total: f64 = snapshot
            .ticks
            .iter()
            .map(|t| t.liquidity_net.abs())
            .sum();

        let (hhi, gini, top_decile_share) = self.concentration(snapshot, total);
        let liquidity_skew = self.skew(snapshot);
        let utilization_pct = self.utilization(snapshot, lower_tick, upper_tick, total);

        let volatility_token0_pct =
            self.volatility(snapshot.hourly_prices.iter().map(|p| p.token0_price_usd));
        let volatility_token1_pct =
            self.volatility(snapshot.hourly_prices.iter().map(|p| p.token1_price_usd));

        let kpis = KpiSet {
            utilization_pct,
            hhi,
            gini,
            top_decile_share,
            liquidity_skew,
            token_ratio: self.token_ratio(snapshot),
            volatility_token0_pct,
            volatility_token1_pct,
            latest_price_change_pct: self.latest_price_change(snapshot),
            impermanent_loss_pct: self.impermanent_loss(snapshot),
        };

        debug!(
            pool = %format!("{:#x}", snapshot.pool),
            utilization = kpis.utilization_pct,
            hhi = kpis.hhi,
            volatility0 = kpis.volatility_token0_pct,
            "computed KPIs"
        );

        kpis
    }

    /// HHI, Gini, and top-10%-of-ticks share over the normalized absolute
    /// liquidity distribution.
    fn concentration(&self, snapshot: &PoolSnapshot, total: f64) -> (f64, f64, f64) {
        if total <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let mut shares: Vec<f64> = snapshot
            .ticks
            .iter()
            .map(|t| t.liquidity_net.abs() / total)
            .filter(|s| *s > 0.0)
            .collect();
        if shares.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let hhi: f64 = shares.iter().map(|s| s * s).sum();

        // Gini via the sorted-cumulative-share formula
        shares.sort_by(|a, b| a.total_cmp(b));
        let n = shares.len() as f64;
        let weighted: f64 = shares
            .iter()
            .enumerate()
            .map(|(i, s)| (i as f64 + 1.0) * s)
            .sum();
        let gini = (2.0 * weighted / n - (n + 1.0) / n).max(0.0);

        // Share held by the largest 10% of active ticks, at least one tick
        let top_count = ((shares.len() as f64 * 0.1).ceil() as usize).max(1);
        let top_decile_share: f64 = shares.iter().rev().take(top_count).sum();

        (hhi, gini, top_decile_share)
    }

    /// (liquidity above current tick - liquidity below) / (sum of both);
    /// liquidity exactly at the current tick counts to neither side.
    fn skew(&self, snapshot: &PoolSnapshot) -> f64 {
        let mut above = 0.0;
        let mut below = 0.0;
        for t in &snapshot.ticks {
            if t.tick > snapshot.current_tick {
                above += t.liquidity_net.abs();
            } else if t.tick < snapshot.current_tick {
                below += t.liquidity_net.abs();
            }
        }
        if above + below <= 0.0 {
            return 0.0;
        }
        (above - below) / (above + below)
    }

    /// Share of total liquidity sitting at ticks inside the position range,
    /// in percent. Exactly 0 when the pool holds no liquidity.
    fn utilization(&self, snapshot: &PoolSnapshot, lower: i32, upper: i32, total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        let active: f64 = snapshot
            .ticks
            .iter()
            .filter(|t| t.tick >= lower && t.tick <= upper)
            .map(|t| t.liquidity_net.abs())
            .sum();
        (active / total * 100.0).clamp(0.0, 100.0)
    }

    /// Token0 TVL valued in token1 terms, relative to token1 TVL.
    fn token_ratio(&self, snapshot: &PoolSnapshot) -> f64 {
        if snapshot.tvl_token1 <= 0.0 {
            return 0.0;
        }
        snapshot.tvl_token0 * snapshot.current_price / snapshot.tvl_token1
    }

    /// Standard deviation of successive percentage changes over the trailing
    /// window, in percent units.
    fn volatility(&self, prices: impl Iterator<Item = f64>) -> f64 {
        let prices: Vec<f64> = prices.collect();
        let changes = Self::pct_changes(&prices, self.volatility_window);
        if changes.is_empty() {
            return 0.0;
        }
        let mean = changes.iter().sum::<f64>() / changes.len() as f64;
        let variance =
            changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / changes.len() as f64;
        variance.sqrt()
    }

    /// Mean of the two tokens' most recent hourly percentage changes.
    fn latest_price_change(&self, snapshot: &PoolSnapshot) -> f64 {
        let token0: Vec<f64> = snapshot
            .hourly_prices
            .iter()
            .map(|p| p.token0_price_usd)
            .collect();
        let token1: Vec<f64> = snapshot
            .hourly_prices
            .iter()
            .map(|p| p.token1_price_usd)
            .collect();

        let latest: Vec<f64> = [token0, token1]
            .iter()
            .filter_map(|series| Self::pct_changes(series, series.len()).last().copied())
            .collect();
        if latest.is_empty() {
            return 0.0;
        }
        latest.iter().sum::<f64>() / latest.len() as f64
    }

    /// |currentPrice / earliestAvailableHourlyPrice - 1| * 100, using the
    /// pool price ratio implied by the earliest hourly sample.
    fn impermanent_loss(&self, snapshot: &PoolSnapshot) -> f64 {
        let earliest = match snapshot.hourly_prices.first() {
            Some(p) if p.token1_price_usd > 0.0 => p.token0_price_usd / p.token1_price_usd,
            _ => return 0.0,
        };
        if earliest <= 0.0 || snapshot.current_price <= 0.0 {
            return 0.0;
        }
        (snapshot.current_price / earliest - 1.0).abs() * 100.0
    }

    /// Successive percentage changes over the trailing `window` changes,
    /// skipping pairs with a non-positive base price.
    fn pct_changes(prices: &[f64], window: usize) -> Vec<f64> {
        if prices.len() < 2 || window == 0 {
            return Vec::new();
        }
        let start = prices.len().saturating_sub(window + 1);
        prices[start..]
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] / w[0] - 1.0) * 100.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HourlyPricePoint, TickLiquidity};
    use chrono::{TimeZone, Utc};
    use ethers::types::Address;

    fn snapshot_with(ticks: Vec<TickLiquidity>, hourly: Vec<HourlyPricePoint>) -> PoolSnapshot {
        PoolSnapshot {
            pool: Address::zero(),
            current_tick: 0,
            current_price: 1.0,
            tick_spacing: 60,
            ticks,
            tvl_token0: 1000.0,
            tvl_token1: 1000.0,
            hourly_prices: hourly,
            daily_stats: Vec::new(),
        }
    }

    fn hour(i: i64, p0: f64, p1: f64) -> HourlyPricePoint {
        HourlyPricePoint {
            timestamp: Utc.timestamp_opt(1_700_000_000 + i * 3600, 0).unwrap(),
            token0_price_usd: p0,
            token1_price_usd: p1,
        }
    }

    fn tick(tick: i32, liquidity_net: f64) -> TickLiquidity {
        TickLiquidity {
            tick,
            liquidity_net,
        }
    }

    #[test]
    fn test_empty_snapshot_yields_zero_metrics() {
        let engine = PoolAnalyticsEngine::new();
        let kpis = engine.compute_kpis(&snapshot_with(Vec::new(), Vec::new()), (-600, 600));

        assert_eq!(kpis.utilization_pct, 0.0);
        assert_eq!(kpis.hhi, 0.0);
        assert_eq!(kpis.gini, 0.0);
        assert_eq!(kpis.volatility_token0_pct, 0.0);
        assert_eq!(kpis.impermanent_loss_pct, 0.0);
    }

    #[test]
    fn test_single_tick_is_fully_concentrated() {
        let engine = PoolAnalyticsEngine::new();
        let kpis = engine.compute_kpis(
            &snapshot_with(vec![tick(0, 500.0)], Vec::new()),
            (-600, 600),
        );

        assert!((kpis.hhi - 1.0).abs() < 1e-12);
        assert!((kpis.top_decile_share - 1.0).abs() < 1e-12);
        assert_eq!(kpis.utilization_pct, 100.0);
    }

    #[test]
    fn test_uniform_distribution_has_low_gini() {
        let engine = PoolAnalyticsEngine::new();
        let ticks: Vec<TickLiquidity> = (0..10).map(|i| tick(i * 60, 100.0)).collect();
        let kpis = engine.compute_kpis(&snapshot_with(ticks, Vec::new()), (0, 540));

        // Ten equal shares: HHI = 0.1, Gini = 0
        assert!((kpis.hhi - 0.1).abs() < 1e-9);
        assert!(kpis.gini.abs() < 1e-9);
    }

    #[test]
    fn test_utilization_counts_only_range() {
        let engine = PoolAnalyticsEngine::new();
        let ticks = vec![tick(-120, 100.0), tick(0, 100.0), tick(120, 100.0), tick(600, 100.0)];
        let kpis = engine.compute_kpis(&snapshot_with(ticks, Vec::new()), (-120, 120));

        assert!((kpis.utilization_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_skew_signs() {
        let engine = PoolAnalyticsEngine::new();

        let above_heavy = snapshot_with(vec![tick(60, 300.0), tick(-60, 100.0)], Vec::new());
        assert!(engine.compute_kpis(&above_heavy, (-600, 600)).liquidity_skew > 0.0);

        let below_heavy = snapshot_with(vec![tick(60, 100.0), tick(-60, 300.0)], Vec::new());
        assert!(engine.compute_kpis(&below_heavy, (-600, 600)).liquidity_skew < 0.0);

        // Liquidity only at the current tick counts to neither side
        let at_tick = snapshot_with(vec![tick(0, 300.0)], Vec::new());
        assert_eq!(engine.compute_kpis(&at_tick, (-600, 600)).liquidity_skew, 0.0);
    }

    #[test]
    fn test_constant_prices_have_zero_volatility() {
        let engine = PoolAnalyticsEngine::new();
        let hourly: Vec<HourlyPricePoint> = (0..10).map(|i| hour(i, 2000.0, 1.0)).collect();
        let kpis = engine.compute_kpis(&snapshot_with(Vec::new(), hourly), (-600, 600));

        assert_eq!(kpis.volatility_token0_pct, 0.0);
        assert_eq!(kpis.volatility_token1_pct, 0.0);
        assert_eq!(kpis.latest_price_change_pct, 0.0);
    }

    #[test]
    fn test_volatility_window_trails() {
        let engine = PoolAnalyticsEngine::with_window(3);
        // Early spike outside the window must not contribute
        let mut hourly = vec![hour(0, 100.0, 1.0), hour(1, 500.0, 1.0)];
        hourly.extend((2..10).map(|i| hour(i, 500.0, 1.0)));
        let kpis = engine.compute_kpis(&snapshot_with(Vec::new(), hourly), (-600, 600));

        assert_eq!(kpis.volatility_token0_pct, 0.0);
    }

    #[test]
    fn test_latest_price_change_averages_both_tokens() {
        let engine = PoolAnalyticsEngine::new();
        // token0 +10%, token1 -2% in the final hour
        let hourly = vec![hour(0, 100.0, 1.0), hour(1, 110.0, 0.98)];
        let kpis = engine.compute_kpis(&snapshot_with(Vec::new(), hourly), (-600, 600));

        assert!((kpis.latest_price_change_pct - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_impermanent_loss_from_earliest_sample() {
        let engine = PoolAnalyticsEngine::new();
        // Earliest pool price 0.8, current 1.0 -> 25% divergence
        let hourly = vec![hour(0, 0.8, 1.0), hour(1, 1.0, 1.0)];
        let kpis = engine.compute_kpis(&snapshot_with(Vec::new(), hourly), (-600, 600));

        assert!((kpis.impermanent_loss_pct - 25.0).abs() < 1e-9);
    }
}
