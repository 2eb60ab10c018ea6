// Domain model shared across the rebalancing engine

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// One entry of the sparse per-tick liquidity distribution. `liquidity_net`
/// is the signed delta crossing the tick, as reported by the analytics
/// source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickLiquidity {
    pub tick: i32,
    pub liquidity_net: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HourlyPricePoint {
    pub timestamp: DateTime<Utc>,
    pub token0_price_usd: f64,
    pub token1_price_usd: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyPoolStat {
    pub date: DateTime<Utc>,
    pub volume_usd: f64,
    pub fees_usd: f64,
    pub tvl_usd: f64,
}

/// Point-in-time view of a pool. Immutable once assembled; re-fetched every
/// monitoring cycle. `current_price` is token0 denominated in token1 (the
/// human orientation); pool ticks encode the reciprocal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool: Address,
    pub current_tick: i32,
    pub current_price: f64,
    pub tick_spacing: i32,
    pub ticks: Vec<TickLiquidity>,
    pub tvl_token0: f64,
    pub tvl_token1: f64,
    pub hourly_prices: Vec<HourlyPricePoint>,
    pub daily_stats: Vec<DailyPoolStat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pool: Address,
    pub chain_id: u64,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub lower_tick: i32,
    pub upper_tick: i32,
    pub liquidity: f64,
    pub fees_token0: f64,
    pub fees_token1: f64,
}

/// Derived pool/position health metrics. All percentages are in percent
/// units (utilization 37.5 means 37.5%). Metrics whose inputs are missing
/// degrade to 0 rather than erroring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpiSet {
    pub utilization_pct: f64,
    pub hhi: f64,
    pub gini: f64,
    pub top_decile_share: f64,
    pub liquidity_skew: f64,
    pub token_ratio: f64,
    pub volatility_token0_pct: f64,
    pub volatility_token1_pct: f64,
    pub latest_price_change_pct: f64,
    pub impermanent_loss_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Medium,
    Aggressive,
}

impl RiskProfile {
    /// Policy band for the half-width percentage, per profile.
    pub fn half_width_band(&self) -> (f64, f64) {
        match self {
            RiskProfile::Conservative => (2.0, 5.0),
            RiskProfile::Medium => (5.0, 10.0),
            RiskProfile::Aggressive => (10.0, 20.0),
        }
    }

    /// Midpoint of the policy band, used by the heuristic strategy.
    pub fn default_half_width_pct(&self) -> f64 {
        let (lo, hi) = self.half_width_band();
        (lo + hi) / 2.0
    }
}

impl std::str::FromStr for RiskProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "medium" => Ok(RiskProfile::Medium),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(format!("unknown risk profile '{}'", other)),
        }
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskProfile::Conservative => write!(f, "conservative"),
            RiskProfile::Medium => write!(f, "medium"),
            RiskProfile::Aggressive => write!(f, "aggressive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceAction {
    Rebalance,
    Maintain,
    Withdraw,
}

/// Advisory range parameters. Percentage-based by contract: a
/// recommendation never carries ticks, sqrt prices, or raw amounts; the
/// planner converts and re-validates everything downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeRecommendation {
    pub action: RebalanceAction,
    pub confidence: f64,
    pub half_width_pct: f64,
    pub center_skew_pct: f64,
    pub risk_profile: RiskProfile,
    pub reasoning: Option<String>,
    pub expected_outcome: Option<String>,
}

/// Tick-aligned, validated price range produced by the planner.
/// `width_pct` is the realized width of the reconstructed price interval
/// relative to the current price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannedRange {
    pub lower_tick: i32,
    pub upper_tick: i32,
    pub width_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Primary path: concentrated-liquidity ratio math.
    LiquidityMath,
    /// Degraded path: flat percentage of each balance. Taken only when the
    /// liquidity math rejects the bounds; observable via the
    /// `rebalancer.allocation_fallback` counter.
    BalancePercent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub amount0: f64,
    pub amount1: f64,
    pub mode: AllocationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Fetch,
    Analyze,
    Withdraw,
    Swap,
    Supply,
    Done,
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStep::Fetch => "fetch",
            WorkflowStep::Analyze => "analyze",
            WorkflowStep::Withdraw => "withdraw",
            WorkflowStep::Swap => "swap",
            WorkflowStep::Supply => "supply",
            WorkflowStep::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Terminal per-position outcome, one per position per cycle. `action` is
/// the decision reached during analysis; it is absent when the workflow
/// failed before a decision was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub position_id: String,
    pub success: bool,
    pub action: Option<RebalanceAction>,
    pub step: WorkflowStep,
    pub tx_hashes: Vec<H256>,
    pub new_position_id: Option<String>,
    pub error: Option<String>,
}

impl RebalanceResult {
    pub fn failed(
        position_id: impl Into<String>,
        action: Option<RebalanceAction>,
        step: WorkflowStep,
        tx_hashes: Vec<H256>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            success: false,
            action,
            step,
            tx_hashes,
            new_position_id: None,
            error: Some(error.into()),
        }
    }
}
