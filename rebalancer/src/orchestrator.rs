// Per-position rebalance workflow and the batch cycle driver
//
// The wallet account is the one shared mutable resource. Positions are
// processed strictly sequentially and every on-chain step is attempt-once:
// concurrent submission from one account would race nonce ordering, and
// automatic retries would make on-chain side effects unauditable. Callers
// must not run two cycles concurrently against the same account.

use std::sync::Arc;

use ethers::types::H256;
use metrics::counter;
use serde_json::json;
use tracing::{error, info};

use crate::advisor::RecommendationAdvisor;
use crate::allocator::AmountAllocator;
use crate::analytics::PoolAnalyticsEngine;
use crate::config::RebalancerConfig;
use crate::error::RebalanceError;
use crate::execution::{
    decode_payload, parse_tx_hash, AllowanceSnapshot, BalanceSnapshot, ExecutionClient,
    SupplyReceipt, SwapReceipt, WithdrawReceipt, OP_GET_ALLOWANCE, OP_GET_BALANCES,
    OP_GET_POSITION, OP_SUPPLY, OP_SWAP, OP_WITHDRAW,
};
use crate::notify::Notifier;
use crate::planner::RangePlanner;
use crate::subgraph::{fetch_snapshot, AnalyticsSource};
use crate::tick_math::{amounts_for_liquidity, sqrt_price_at_tick};
use crate::types::{
    AllocationPlan, PlannedRange, Position, RebalanceAction, RebalanceResult, RiskProfile,
    WorkflowStep,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub processed: usize,
    pub rebalanced: usize,
    pub maintained: usize,
    pub withdrawn: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn from_results(results: &[RebalanceResult]) -> Self {
        let mut summary = Self {
            processed: results.len(),
            ..Default::default()
        };
        for result in results {
            if !result.success {
                summary.failed += 1;
                continue;
            }
            match result.action {
                Some(RebalanceAction::Rebalance) => summary.rebalanced += 1,
                Some(RebalanceAction::Withdraw) => summary.withdrawn += 1,
                _ => summary.maintained += 1,
            }
        }
        summary
    }
}

struct StepFailure {
    step: WorkflowStep,
    action: Option<RebalanceAction>,
    tx_hashes: Vec<H256>,
    error: RebalanceError,
}

struct WorkflowCtx {
    tx_hashes: Vec<H256>,
    action: Option<RebalanceAction>,
}

struct SwapPlan {
    sell_token0: bool,
    amount_in: f64,
}

pub struct RebalanceOrchestrator {
    analytics: Arc<dyn AnalyticsSource>,
    execution: Arc<dyn ExecutionClient>,
    notifier: Arc<dyn Notifier>,
    advisor: RecommendationAdvisor,
    engine: PoolAnalyticsEngine,
    risk_profile: RiskProfile,
    swap_imbalance_threshold: f64,
    dry_run: bool,
}

impl RebalanceOrchestrator {
    pub fn new(
        config: &RebalancerConfig,
        analytics: Arc<dyn AnalyticsSource>,
        execution: Arc<dyn ExecutionClient>,
        notifier: Arc<dyn Notifier>,
        advisor: RecommendationAdvisor,
    ) -> Self {
        Self {
            analytics,
            execution,
            notifier,
            advisor,
            engine: PoolAnalyticsEngine::new(),
            risk_profile: config.risk_profile,
            swap_imbalance_threshold: config.swap_imbalance_threshold,
            dry_run: config.dry_run,
        }
    }

    /// Runs one monitoring cycle over the batch. Positions are processed
    /// one at a time; a failure in any position's workflow is captured as
    /// that position's result and never aborts the batch, so the output
    /// always holds exactly one result per input id.
    ///
    /// Takes `&mut self` on purpose: one orchestrator per account, one
    /// cycle in flight.
    pub async fn run_cycle(&mut self, position_ids: &[String]) -> Vec<RebalanceResult> {
        info!(
            positions = position_ids.len(),
            dry_run = self.dry_run,
            "starting rebalance cycle"
        );

        let mut results = Vec::with_capacity(position_ids.len());
        for position_id in position_ids {
            counter!("rebalancer.positions_processed").increment(1);
            let result = self.process_position(position_id).await;
            results.push(result);
        }

        let summary = CycleSummary::from_results(&results);
        counter!("rebalancer.rebalances_completed").increment(summary.rebalanced as u64);
        counter!("rebalancer.positions_maintained").increment(summary.maintained as u64);
        counter!("rebalancer.positions_withdrawn").increment(summary.withdrawn as u64);
        counter!("rebalancer.position_failures").increment(summary.failed as u64);
        info!(
            processed = summary.processed,
            rebalanced = summary.rebalanced,
            maintained = summary.maintained,
            withdrawn = summary.withdrawn,
            failed = summary.failed,
            "cycle complete"
        );

        results
    }

    async fn process_position(&self, position_id: &str) -> RebalanceResult {
        let result = match self.run_workflow(position_id).await {
            Ok(result) => result,
            Err(failure) => {
                // WITHDRAW has already landed when SWAP or SUPPLY fails;
                // the liquidity sits in the wallet and stays there until an
                // operator intervenes. No automatic retry or rollback.
                let error = if matches!(failure.step, WorkflowStep::Swap | WorkflowStep::Supply) {
                    format!(
                        "{}; liquidity withdrawn but not re-supplied, manual intervention required",
                        failure.error
                    )
                } else {
                    failure.error.to_string()
                };
                error!(
                    position = position_id,
                    step = %failure.step,
                    "workflow failed: {}",
                    error
                );
                RebalanceResult::failed(
                    position_id,
                    failure.action,
                    failure.step,
                    failure.tx_hashes,
                    error,
                )
            }
        };

        self.notify_result(&result).await;
        result
    }

    async fn run_workflow(&self, position_id: &str) -> Result<RebalanceResult, StepFailure> {
        let mut ctx = WorkflowCtx {
            tx_hashes: Vec::new(),
            action: None,
        };

        // FETCH: position record plus a fresh pool snapshot
        let position = step(&ctx, WorkflowStep::Fetch, self.fetch_position(position_id).await)?;
        let snapshot = step(
            &ctx,
            WorkflowStep::Fetch,
            fetch_snapshot(self.analytics.as_ref(), position.pool).await,
        )?;

        // ANALYZE: KPIs, recommendation, and the full plan before any
        // on-chain action
        let kpis = self
            .engine
            .compute_kpis(&snapshot, (position.lower_tick, position.upper_tick));
        let recommendation = self
            .advisor
            .recommend(
                &kpis,
                (position.lower_tick, position.upper_tick),
                self.risk_profile,
            )
            .await;
        ctx.action = Some(recommendation.action);
        info!(
            position = position_id,
            action = ?recommendation.action,
            confidence = recommendation.confidence,
            utilization = kpis.utilization_pct,
            "analysis complete"
        );

        if recommendation.action == RebalanceAction::Maintain {
            return Ok(RebalanceResult {
                position_id: position_id.to_string(),
                success: true,
                action: Some(RebalanceAction::Maintain),
                step: WorkflowStep::Done,
                tx_hashes: Vec::new(),
                new_position_id: None,
                error: None,
            });
        }

        // Estimate what the wallet will hold after withdrawing: current
        // balances plus the position's amounts and accrued fees
        let wallet = if self.dry_run {
            BalanceSnapshot {
                balance0: 0.0,
                balance1: 0.0,
            }
        } else {
            step(&ctx, WorkflowStep::Analyze, self.fetch_balances(&position).await)?
        };
        let sqrt_price = (1.0 / snapshot.current_price.max(f64::MIN_POSITIVE)).sqrt();
        let (position0, position1) = amounts_for_liquidity(
            position.liquidity,
            sqrt_price,
            sqrt_price_at_tick(position.lower_tick),
            sqrt_price_at_tick(position.upper_tick),
        );
        let estimated0 = wallet.balance0 + position0 + position.fees_token0;
        let estimated1 = wallet.balance1 + position1 + position.fees_token1;

        if recommendation.action == RebalanceAction::Withdraw {
            let receipt = step(
                &ctx,
                WorkflowStep::Withdraw,
                self.exec_withdraw(&position, (estimated0, estimated1)).await,
            )?;
            push_hash(&mut ctx, WorkflowStep::Withdraw, receipt.tx_hash.as_deref())?;
            return Ok(RebalanceResult {
                position_id: position_id.to_string(),
                success: true,
                action: Some(RebalanceAction::Withdraw),
                step: WorkflowStep::Done,
                tx_hashes: ctx.tx_hashes,
                new_position_id: None,
                error: None,
            });
        }

        // Rebalance: plan the new range and validate the deposit is
        // feasible before touching the chain
        let range = step(
            &ctx,
            WorkflowStep::Analyze,
            RangePlanner::build_range(
                snapshot.current_price,
                recommendation.half_width_pct,
                recommendation.center_skew_pct,
                snapshot.tick_spacing,
            ),
        )?;
        let plan = step(
            &ctx,
            WorkflowStep::Analyze,
            AmountAllocator::allocate(snapshot.current_price, &range, estimated0, estimated1),
        )?;
        info!(
            position = position_id,
            lower_tick = range.lower_tick,
            upper_tick = range.upper_tick,
            width_pct = format!("{:.2}", range.width_pct).as_str(),
            amount0 = plan.amount0,
            amount1 = plan.amount1,
            mode = ?plan.mode,
            "rebalance plan ready"
        );

        // WITHDRAW
        let withdrawn = step(
            &ctx,
            WorkflowStep::Withdraw,
            self.exec_withdraw(&position, (position0 + position.fees_token0, position1 + position.fees_token1))
                .await,
        )?;
        push_hash(&mut ctx, WorkflowStep::Withdraw, withdrawn.tx_hash.as_deref())?;
        let mut balances = BalanceSnapshot {
            balance0: wallet.balance0 + withdrawn.amount0,
            balance1: wallet.balance1 + withdrawn.amount1,
        };

        // SWAP, only when the withdrawn mix is too far from the planned
        // deposit ratio
        let pre_swap_plan = step(
            &ctx,
            WorkflowStep::Swap,
            AmountAllocator::allocate(
                snapshot.current_price,
                &range,
                balances.balance0,
                balances.balance1,
            ),
        )?;
        if let Some(swap) = self.swap_needed(snapshot.current_price, &pre_swap_plan, &balances) {
            let receipt = step(
                &ctx,
                WorkflowStep::Swap,
                self.exec_swap(&position, &swap, snapshot.current_price).await,
            )?;
            push_hash(&mut ctx, WorkflowStep::Swap, receipt.tx_hash.as_deref())?;
            if swap.sell_token0 {
                balances.balance0 -= receipt.amount_in;
                balances.balance1 += receipt.amount_out;
            } else {
                balances.balance1 -= receipt.amount_in;
                balances.balance0 += receipt.amount_out;
            }
        }

        // SUPPLY: re-size from the post-swap balances, re-check
        // preconditions, then deposit
        let final_plan = step(
            &ctx,
            WorkflowStep::Supply,
            AmountAllocator::allocate(
                snapshot.current_price,
                &range,
                balances.balance0,
                balances.balance1,
            ),
        )?;
        if final_plan.amount0 <= 0.0 && final_plan.amount1 <= 0.0 {
            return Err(StepFailure {
                step: WorkflowStep::Supply,
                action: ctx.action,
                tx_hashes: ctx.tx_hashes.clone(),
                error: RebalanceError::InsufficientBalance {
                    token: position.token0.symbol.clone(),
                    needed: plan.amount0,
                    available: balances.balance0,
                },
            });
        }
        if !self.dry_run {
            step(
                &ctx,
                WorkflowStep::Supply,
                self.check_supply_preconditions(&position, &final_plan).await,
            )?;
        }
        let supplied = step(
            &ctx,
            WorkflowStep::Supply,
            self.exec_supply(&position, &range, &final_plan).await,
        )?;
        push_hash(&mut ctx, WorkflowStep::Supply, supplied.tx_hash.as_deref())?;

        // Minted id decoding is best-effort; "unknown" is a valid outcome
        let new_position_id = supplied
            .position_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(RebalanceResult {
            position_id: position_id.to_string(),
            success: true,
            action: Some(RebalanceAction::Rebalance),
            step: WorkflowStep::Done,
            tx_hashes: ctx.tx_hashes,
            new_position_id: Some(new_position_id),
            error: None,
        })
    }

    /// Decide whether the current balance mix is worth swapping toward the
    /// planned deposit ratio: if the leftover value on either side exceeds
    /// the configured share of total value, swap half of that leftover.
    fn swap_needed(
        &self,
        current_price: f64,
        plan: &AllocationPlan,
        balances: &BalanceSnapshot,
    ) -> Option<SwapPlan> {
        let leftover0 = (balances.balance0 - plan.amount0).max(0.0);
        let leftover1 = (balances.balance1 - plan.amount1).max(0.0);
        let value0 = leftover0 * current_price;
        let value1 = leftover1;
        let total_value = balances.balance0 * current_price + balances.balance1;
        if total_value <= 0.0 {
            return None;
        }

        let imbalance = value0.max(value1) / total_value;
        if imbalance <= self.swap_imbalance_threshold {
            return None;
        }

        let sell_token0 = value0 >= value1;
        let amount_in = if sell_token0 {
            leftover0 / 2.0
        } else {
            leftover1 / 2.0
        };
        info!(
            imbalance = format!("{:.3}", imbalance).as_str(),
            sell_token0, amount_in, "balance mix imbalanced, swapping"
        );
        Some(SwapPlan {
            sell_token0,
            amount_in,
        })
    }

    async fn fetch_position(&self, position_id: &str) -> Result<Position, RebalanceError> {
        let envelope = self
            .execution
            .call(OP_GET_POSITION, json!({ "position_id": position_id }))
            .await?;
        decode_payload(&envelope)
    }

    async fn fetch_balances(&self, position: &Position) -> Result<BalanceSnapshot, RebalanceError> {
        let envelope = self
            .execution
            .call(
                OP_GET_BALANCES,
                json!({
                    "chain_id": position.chain_id,
                    "token0": position.token0.address,
                    "token1": position.token1.address,
                }),
            )
            .await?;
        decode_payload(&envelope)
    }

    async fn check_supply_preconditions(
        &self,
        position: &Position,
        plan: &AllocationPlan,
    ) -> Result<(), RebalanceError> {
        let balances = self.fetch_balances(position).await?;
        if balances.balance0 < plan.amount0 {
            return Err(RebalanceError::InsufficientBalance {
                token: position.token0.symbol.clone(),
                needed: plan.amount0,
                available: balances.balance0,
            });
        }
        if balances.balance1 < plan.amount1 {
            return Err(RebalanceError::InsufficientBalance {
                token: position.token1.symbol.clone(),
                needed: plan.amount1,
                available: balances.balance1,
            });
        }

        let envelope = self
            .execution
            .call(
                OP_GET_ALLOWANCE,
                json!({
                    "chain_id": position.chain_id,
                    "token0": position.token0.address,
                    "token1": position.token1.address,
                }),
            )
            .await?;
        let allowance: AllowanceSnapshot = decode_payload(&envelope)?;
        if allowance.allowance0 < plan.amount0 || allowance.allowance1 < plan.amount1 {
            return Err(RebalanceError::ExecutionFailure(format!(
                "token allowance too low for supply ({} {} / {} {})",
                allowance.allowance0,
                position.token0.symbol,
                allowance.allowance1,
                position.token1.symbol
            )));
        }
        Ok(())
    }

    async fn exec_withdraw(
        &self,
        position: &Position,
        estimated: (f64, f64),
    ) -> Result<WithdrawReceipt, RebalanceError> {
        if self.dry_run {
            info!(position = position.id.as_str(), "dry run: skipping withdraw");
            return Ok(WithdrawReceipt {
                success: true,
                tx_hash: None,
                amount0: estimated.0,
                amount1: estimated.1,
                error: None,
            });
        }

        let envelope = self
            .execution
            .call(
                OP_WITHDRAW,
                json!({
                    "position_id": position.id,
                    "chain_id": position.chain_id,
                }),
            )
            .await?;
        let receipt: WithdrawReceipt = decode_payload(&envelope)?;
        if !receipt.success {
            return Err(RebalanceError::ExecutionFailure(
                receipt
                    .error
                    .unwrap_or_else(|| "withdraw reverted".to_string()),
            ));
        }
        Ok(receipt)
    }

    async fn exec_swap(
        &self,
        position: &Position,
        swap: &SwapPlan,
        current_price: f64,
    ) -> Result<SwapReceipt, RebalanceError> {
        if self.dry_run {
            info!(position = position.id.as_str(), "dry run: skipping swap");
            let amount_out = if swap.sell_token0 {
                swap.amount_in * current_price
            } else {
                swap.amount_in / current_price
            };
            return Ok(SwapReceipt {
                success: true,
                tx_hash: None,
                amount_in: swap.amount_in,
                amount_out,
                error: None,
            });
        }

        let (sell, buy) = if swap.sell_token0 {
            (&position.token0, &position.token1)
        } else {
            (&position.token1, &position.token0)
        };
        let envelope = self
            .execution
            .call(
                OP_SWAP,
                json!({
                    "chain_id": position.chain_id,
                    "pool": position.pool,
                    "sell_token": sell.address,
                    "buy_token": buy.address,
                    "amount_in": swap.amount_in,
                }),
            )
            .await?;
        let receipt: SwapReceipt = decode_payload(&envelope)?;
        if !receipt.success {
            return Err(RebalanceError::ExecutionFailure(
                receipt.error.unwrap_or_else(|| "swap reverted".to_string()),
            ));
        }
        Ok(receipt)
    }

    async fn exec_supply(
        &self,
        position: &Position,
        range: &PlannedRange,
        plan: &AllocationPlan,
    ) -> Result<SupplyReceipt, RebalanceError> {
        if self.dry_run {
            info!(position = position.id.as_str(), "dry run: skipping supply");
            return Ok(SupplyReceipt {
                success: true,
                tx_hash: None,
                position_id: None,
                amount0: plan.amount0,
                amount1: plan.amount1,
                error: None,
            });
        }

        let envelope = self
            .execution
            .call(
                OP_SUPPLY,
                json!({
                    "chain_id": position.chain_id,
                    "pool": position.pool,
                    "lower_tick": range.lower_tick,
                    "upper_tick": range.upper_tick,
                    "amount0": plan.amount0,
                    "amount1": plan.amount1,
                }),
            )
            .await?;
        let receipt: SupplyReceipt = decode_payload(&envelope)?;
        if !receipt.success {
            return Err(RebalanceError::ExecutionFailure(
                receipt
                    .error
                    .unwrap_or_else(|| "supply reverted".to_string()),
            ));
        }
        Ok(receipt)
    }

    async fn notify_result(&self, result: &RebalanceResult) {
        let message = if result.success {
            format!(
                "position {}: {} complete ({} txs{})",
                result.position_id,
                result
                    .action
                    .map(|a| format!("{:?}", a).to_lowercase())
                    .unwrap_or_else(|| "cycle".to_string()),
                result.tx_hashes.len(),
                result
                    .new_position_id
                    .as_deref()
                    .map(|id| format!(", new position {}", id))
                    .unwrap_or_default()
            )
        } else {
            format!(
                "position {}: failed at {} - {}",
                result.position_id,
                result.step,
                result.error.as_deref().unwrap_or("unknown error")
            )
        };
        // Best-effort only; a notification failure never reaches the result
        self.notifier.notify(&message).await;
    }
}

fn step<T>(
    ctx: &WorkflowCtx,
    step: WorkflowStep,
    result: Result<T, RebalanceError>,
) -> Result<T, StepFailure> {
    result.map_err(|error| StepFailure {
        step,
        action: ctx.action,
        tx_hashes: ctx.tx_hashes.clone(),
        error,
    })
}

fn push_hash(
    ctx: &mut WorkflowCtx,
    at: WorkflowStep,
    tx_hash: Option<&str>,
) -> Result<(), StepFailure> {
    if let Some(raw) = tx_hash {
        let hash = step(ctx, at, parse_tx_hash(raw))?;
        ctx.tx_hashes.push(hash);
    }
    Ok(())
}
