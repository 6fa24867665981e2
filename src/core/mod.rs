mod aggregate;
mod engine;
mod error;
mod historical;
mod mortality;
mod rng;
mod scenarios;
mod solver;
mod types;
mod validation;

pub use aggregate::{aggregate, percentile, percentile_sorted};
pub use engine::{
    Comparison, ComparisonDelta, PathContext, RunControl, RunMode, RunOptions, RunReport, compare,
    generate_sequences, resolve_horizon, run, simulate_path,
};
pub use error::{SimError, SimResult};
pub use historical::{HistoricalTable, YearRange};
pub use mortality::{
    EndAgeResolution, MILESTONE_AGES, MortalityModel, SurvivalMilestone, annual_death_probability,
    base_death_rate, end_age_query, resolve_end_age, survival_probability,
};
pub use rng::derive_seed;
pub use scenarios::{ScenarioSource, Severity, StressScenario, StressScenarioInfo};
pub use solver::{
    GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, LegacyTradeoff,
    SAFE_SUCCESS_RATE, TRADEOFF_MULTIPLES, TradeoffPoint, legacy_tradeoff, solve_goal,
};
pub use types::{
    AggregateResult, EmergencyHustle, EndAgeSource, FinalValueBands, HealthClass,
    HistoricalOutcome, Horizon, IncomeOverlap, IncomePhase, LeanMode, MAX_AGE, MAX_PATHS,
    MortalityConfig, MortalitySummary, OutcomeCounts, PathClass, PathOutcome, ReturnOrigin,
    ReturnSequence, SimulationParameters, SpendingLevel, SpendingRule, TechScenario, Windfall,
    YearBand, YearState,
};
pub use validation::validate_parameters;
