pub mod advisor;
pub mod allocator;
pub mod analytics;
pub mod config;
pub mod error;
pub mod execution;
pub mod notify;
pub mod orchestrator;
pub mod planner;
pub mod subgraph;
pub mod tick_math;
pub mod types;

pub use advisor::{CompletionClient, OpenAiCompletionClient, RecommendationAdvisor};
pub use allocator::AmountAllocator;
pub use analytics::PoolAnalyticsEngine;
pub use config::RebalancerConfig;
pub use error::RebalanceError;
pub use execution::{ExecutionClient, HttpExecutionClient};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use orchestrator::{CycleSummary, RebalanceOrchestrator};
pub use planner::RangePlanner;
pub use subgraph::{AnalyticsSource, SubgraphClient};
pub use types::{
    AllocationMode, AllocationPlan, KpiSet, PlannedRange, PoolSnapshot, Position,
    RangeRecommendation, RebalanceAction, RebalanceResult, RiskProfile, WorkflowStep,
};
