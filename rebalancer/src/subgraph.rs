// Analytics source: read-only pool queries against a GraphQL endpoint
// The three queries are independent; only the tick distribution is
// load-bearing for a cycle, price/volume history degrade to empty

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::Address;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::error::RebalanceError;
use crate::types::{DailyPoolStat, HourlyPricePoint, PoolSnapshot, TickLiquidity};

/// Core pool state: tick-level liquidity plus the current tick and TVL.
#[derive(Debug, Clone)]
pub struct TickDistribution {
    pub current_tick: i32,
    pub current_price: f64,
    pub tick_spacing: i32,
    pub ticks: Vec<TickLiquidity>,
    pub tvl_token0: f64,
    pub tvl_token1: f64,
}

#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn tick_distribution(&self, pool: Address) -> Result<TickDistribution, RebalanceError>;
    async fn hourly_prices(&self, pool: Address) -> Result<Vec<HourlyPricePoint>, RebalanceError>;
    async fn daily_stats(&self, pool: Address) -> Result<Vec<DailyPoolStat>, RebalanceError>;
}

/// Assembles a pool snapshot from the three analytics queries.
///
/// The tick distribution carries the pool state every later step depends
/// on, so its failure fails the fetch. History queries degrade to empty
/// series, which zeroes their KPI fields downstream.
pub async fn fetch_snapshot(
    source: &dyn AnalyticsSource,
    pool: Address,
) -> Result<PoolSnapshot, RebalanceError> {
    let dist = source.tick_distribution(pool).await?;

    let hourly_prices = match source.hourly_prices(pool).await {
        Ok(points) => points,
        Err(e) => {
            warn!(pool = %format!("{:#x}", pool), "hourly price query degraded: {}", e);
            counter!("rebalancer.analytics_degraded").increment(1);
            Vec::new()
        }
    };
    let daily_stats = match source.daily_stats(pool).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(pool = %format!("{:#x}", pool), "daily stats query degraded: {}", e);
            counter!("rebalancer.analytics_degraded").increment(1);
            Vec::new()
        }
    };

    Ok(PoolSnapshot {
        pool,
        current_tick: dist.current_tick,
        current_price: dist.current_price,
        tick_spacing: dist.tick_spacing,
        ticks: dist.ticks,
        tvl_token0: dist.tvl_token0,
        tvl_token1: dist.tvl_token1,
        hourly_prices,
        daily_stats,
    })
}

const TICKS_QUERY: &str = "query Pool($pool: ID!) { pool(id: $pool) { \
tick tickSpacing token0Price totalValueLockedToken0 totalValueLockedToken1 \
ticks(first: 1000) { tickIdx liquidityNet } } }";

const HOURLY_QUERY: &str = "query PoolHours($pool: ID!) { \
poolHourDatas(first: 48, orderBy: periodStartUnix, orderDirection: desc, \
where: { pool: $pool }) { periodStartUnix token0PriceUsd token1PriceUsd } }";

const DAILY_QUERY: &str = "query PoolDays($pool: ID!) { \
poolDayDatas(first: 30, orderBy: date, orderDirection: desc, \
where: { pool: $pool }) { date volumeUsd feesUsd tvlUsd } }";

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    pool: Option<PoolDto>,
}

// Numeric fields arrive as strings; they are validated into typed values
// at this boundary and nowhere else
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolDto {
    tick: String,
    tick_spacing: String,
    token0_price: String,
    total_value_locked_token0: String,
    total_value_locked_token1: String,
    ticks: Vec<TickDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickDto {
    tick_idx: String,
    liquidity_net: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourlyData {
    pool_hour_datas: Vec<HourDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourDto {
    period_start_unix: i64,
    token0_price_usd: String,
    token1_price_usd: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyData {
    pool_day_datas: Vec<DayDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayDto {
    date: i64,
    volume_usd: String,
    fees_usd: String,
    tvl_usd: String,
}

pub struct SubgraphClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SubgraphClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        pool: Address,
    ) -> Result<T, RebalanceError> {
        // Pools are keyed by normalized lowercased address
        let body = serde_json::json!({
            "query": query,
            "variables": { "pool": format!("{:#x}", pool) },
        });

        let response: GraphQlResponse<T> = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(RebalanceError::UpstreamUnavailable(messages.join("; ")));
        }
        response
            .data
            .ok_or_else(|| RebalanceError::UpstreamUnavailable("empty response data".into()))
    }
}

fn parse_f64(field: &str, value: &str) -> Result<f64, RebalanceError> {
    value.parse().map_err(|_| {
        RebalanceError::ParseError(format!("field {} = '{}' is not numeric", field, value))
    })
}

fn parse_i32(field: &str, value: &str) -> Result<i32, RebalanceError> {
    value.parse().map_err(|_| {
        RebalanceError::ParseError(format!("field {} = '{}' is not an integer", field, value))
    })
}

fn parse_timestamp(secs: i64) -> Result<DateTime<Utc>, RebalanceError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| RebalanceError::ParseError(format!("timestamp {} out of range", secs)))
}

#[async_trait]
impl AnalyticsSource for SubgraphClient {
    async fn tick_distribution(&self, pool: Address) -> Result<TickDistribution, RebalanceError> {
        let data: PoolData = self.query(TICKS_QUERY, pool).await?;
        let dto = data.pool.ok_or_else(|| {
            RebalanceError::UpstreamUnavailable(format!("pool {:#x} not indexed", pool))
        })?;

        let ticks = dto
            .ticks
            .iter()
            .map(|t| {
                Ok(TickLiquidity {
                    tick: parse_i32("tickIdx", &t.tick_idx)?,
                    liquidity_net: parse_f64("liquidityNet", &t.liquidity_net)?,
                })
            })
            .collect::<Result<Vec<_>, RebalanceError>>()?;

        Ok(TickDistribution {
            current_tick: parse_i32("tick", &dto.tick)?,
            current_price: parse_f64("token0Price", &dto.token0_price)?,
            tick_spacing: parse_i32("tickSpacing", &dto.tick_spacing)?,
            ticks,
            tvl_token0: parse_f64("totalValueLockedToken0", &dto.total_value_locked_token0)?,
            tvl_token1: parse_f64("totalValueLockedToken1", &dto.total_value_locked_token1)?,
        })
    }

    async fn hourly_prices(&self, pool: Address) -> Result<Vec<HourlyPricePoint>, RebalanceError> {
        let data: HourlyData = self.query(HOURLY_QUERY, pool).await?;

        // The endpoint serves newest-first; analytics wants oldest-first
        let mut points = data
            .pool_hour_datas
            .iter()
            .map(|h| {
                Ok(HourlyPricePoint {
                    timestamp: parse_timestamp(h.period_start_unix)?,
                    token0_price_usd: parse_f64("token0PriceUsd", &h.token0_price_usd)?,
                    token1_price_usd: parse_f64("token1PriceUsd", &h.token1_price_usd)?,
                })
            })
            .collect::<Result<Vec<_>, RebalanceError>>()?;
        points.reverse();
        Ok(points)
    }

    async fn daily_stats(&self, pool: Address) -> Result<Vec<DailyPoolStat>, RebalanceError> {
        let data: DailyData = self.query(DAILY_QUERY, pool).await?;

        let mut stats = data
            .pool_day_datas
            .iter()
            .map(|d| {
                Ok(DailyPoolStat {
                    date: parse_timestamp(d.date)?,
                    volume_usd: parse_f64("volumeUsd", &d.volume_usd)?,
                    fees_usd: parse_f64("feesUsd", &d.fees_usd)?,
                    tvl_usd: parse_f64("tvlUsd", &d.tvl_usd)?,
                })
            })
            .collect::<Result<Vec<_>, RebalanceError>>()?;
        stats.reverse();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_address() -> Address {
        "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_distribution_parses_string_numerics() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"data": {"pool": {
            "tick": "201450",
            "tickSpacing": "60",
            "token0Price": "1820.55",
            "totalValueLockedToken0": "1500.5",
            "totalValueLockedToken1": "2750000",
            "ticks": [
                {"tickIdx": "201420", "liquidityNet": "1000000"},
                {"tickIdx": "201480", "liquidityNet": "-1000000"}
            ]}}}"#;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = SubgraphClient::new(server.url());
        let dist = client.tick_distribution(pool_address()).await.unwrap();

        assert_eq!(dist.current_tick, 201450);
        assert_eq!(dist.tick_spacing, 60);
        assert_eq!(dist.ticks.len(), 2);
        assert_eq!(dist.ticks[1].liquidity_net, -1000000.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_graphql_errors_surface_as_upstream_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"data": null, "errors": [{"message": "indexer overloaded"}]}"#)
            .create_async()
            .await;

        let client = SubgraphClient::new(server.url());
        let err = client.tick_distribution(pool_address()).await.unwrap_err();
        assert!(matches!(err, RebalanceError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_field_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"data": {"pool": {
                    "tick": "not-a-number", "tickSpacing": "60",
                    "token0Price": "1820.55",
                    "totalValueLockedToken0": "1", "totalValueLockedToken1": "1",
                    "ticks": []}}}"#,
            )
            .create_async()
            .await;

        let client = SubgraphClient::new(server.url());
        let err = client.tick_distribution(pool_address()).await.unwrap_err();
        assert!(matches!(err, RebalanceError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_hourly_prices_are_reordered_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"data": {"poolHourDatas": [
                    {"periodStartUnix": 1700007200, "token0PriceUsd": "1825.0", "token1PriceUsd": "1.0"},
                    {"periodStartUnix": 1700003600, "token0PriceUsd": "1810.0", "token1PriceUsd": "1.0"}
                ]}}"#,
            )
            .create_async()
            .await;

        let client = SubgraphClient::new(server.url());
        let points = client.hourly_prices(pool_address()).await.unwrap();

        assert_eq!(points.len(), 2);
        assert!(points[0].timestamp < points[1].timestamp);
        assert_eq!(points[0].token0_price_usd, 1810.0);
    }

    struct PartialSource;

    #[async_trait]
    impl AnalyticsSource for PartialSource {
        async fn tick_distribution(&self, _: Address) -> Result<TickDistribution, RebalanceError> {
            Ok(TickDistribution {
                current_tick: 0,
                current_price: 1.0,
                tick_spacing: 60,
                ticks: vec![TickLiquidity {
                    tick: 0,
                    liquidity_net: 100.0,
                }],
                tvl_token0: 1.0,
                tvl_token1: 1.0,
            })
        }

        async fn hourly_prices(&self, _: Address) -> Result<Vec<HourlyPricePoint>, RebalanceError> {
            Err(RebalanceError::UpstreamUnavailable("hourly feed down".into()))
        }

        async fn daily_stats(&self, _: Address) -> Result<Vec<DailyPoolStat>, RebalanceError> {
            Err(RebalanceError::UpstreamUnavailable("daily feed down".into()))
        }
    }

    #[tokio::test]
    async fn test_snapshot_degrades_history_queries_independently() {
        let snapshot = fetch_snapshot(&PartialSource, pool_address()).await.unwrap();

        assert_eq!(snapshot.ticks.len(), 1);
        assert!(snapshot.hourly_prices.is_empty());
        assert!(snapshot.daily_stats.is_empty());
    }
}
