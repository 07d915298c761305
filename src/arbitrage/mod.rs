pub mod evaluator;
pub mod strategy;
pub mod types;

pub use evaluator::{calculate_gas_cost_usd, canonicalize, evaluate_pairs};
pub use strategy::{ArbitrageStrategy, MarketContext, TwoPoolStrategy};
pub use types::{ArbitrageConfig, PairEvaluation};
