use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use super::error::ApiError;
use super::payload::{EndAgePayload, ModeToken, SimulatePayload, SolvePayload};
use crate::core::{GoalType, HealthClass, StressScenario, TechScenario};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliHealthClass {
    Excellent,
    Average,
    Impaired,
}

impl From<CliHealthClass> for HealthClass {
    fn from(value: CliHealthClass) -> Self {
        match value {
            CliHealthClass::Excellent => HealthClass::Excellent,
            CliHealthClass::Average => HealthClass::Average,
            CliHealthClass::Impaired => HealthClass::Impaired,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTechScenario {
    Conservative,
    Moderate,
    Optimistic,
}

impl From<CliTechScenario> for TechScenario {
    fn from(value: CliTechScenario) -> Self {
        match value {
            CliTechScenario::Conservative => TechScenario::Conservative,
            CliTechScenario::Moderate => TechScenario::Moderate,
            CliTechScenario::Optimistic => TechScenario::Optimistic,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMode {
    MonteCarlo,
    Historical,
    HistoricalMortality,
    Stress,
}

impl From<CliMode> for ModeToken {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::MonteCarlo => ModeToken::MonteCarlo,
            CliMode::Historical => ModeToken::Historical,
            CliMode::HistoricalMortality => ModeToken::HistoricalMortality,
            CliMode::Stress => ModeToken::Stress,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliGoal {
    RequiredPortfolio,
    MaxExpenses,
}

impl From<CliGoal> for GoalType {
    fn from(value: CliGoal) -> Self {
        match value {
            CliGoal::RequiredPortfolio => GoalType::RequiredPortfolio,
            CliGoal::MaxExpenses => GoalType::MaxExpenses,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "firesim",
    version,
    about = "Early-retirement portfolio simulator with mortality-aware horizons"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, short, default_value_t = 8080)]
        port: u16,
    },
    /// Run a simulation and print the report
    Simulate(PlanArgs),
    /// Resolve the planning horizon from mortality
    EndAge(EndAgeArgs),
    /// Search for the portfolio or spending that meets a success target
    Solve(SolveArgs),
    /// Run a plan with and without changes over the same return sequences
    Compare(CompareArgs),
    /// Sweep starting portfolios and report success against money left over
    Tradeoff(TradeoffArgs),
    /// List the stress scenarios
    Scenarios,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long, help = "JSON parameter file, same schema as the HTTP payload")]
    params: Option<PathBuf>,
    #[arg(long)]
    starting_portfolio: Option<f64>,
    #[arg(long)]
    annual_expenses: Option<f64>,
    #[arg(long)]
    start_age: Option<u32>,
    #[arg(long, conflicts_with = "dynamic_end_age")]
    end_age: Option<u32>,
    #[arg(long, help = "Resolve the end age from mortality")]
    dynamic_end_age: bool,
    #[arg(long, help = "Expected nominal return as a fraction, e.g. 0.06")]
    expected_return: Option<f64>,
    #[arg(long)]
    inflation: Option<f64>,
    #[arg(long)]
    volatility: Option<f64>,
    #[arg(long)]
    no_mortality: bool,
    #[arg(long, value_enum)]
    health: Option<CliHealthClass>,
    #[arg(long, value_enum)]
    tech: Option<CliTechScenario>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum)]
    mode: Option<CliMode>,
    #[arg(long)]
    paths: Option<u32>,
    #[arg(long, help = "Stress scenario id, e.g. great-depression")]
    scenario: Option<StressScenario>,
    #[arg(long)]
    first_year: Option<u16>,
    #[arg(long)]
    last_year: Option<u16>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long, help = "Include every path with its yearly trajectory")]
    include_paths: bool,
}

impl PlanArgs {
    /// The parameter file layer (if any) followed by the flag layer.
    pub fn layers(&self) -> Result<Vec<SimulatePayload>, ApiError> {
        let mut layers = Vec::with_capacity(2);
        if let Some(path) = &self.params {
            layers.push(read_params_file(path)?);
        }
        layers.push(self.flag_layer());
        Ok(layers)
    }

    fn flag_layer(&self) -> SimulatePayload {
        SimulatePayload {
            starting_portfolio: self.starting_portfolio,
            annual_expenses: self.annual_expenses,
            start_age: self.start_age,
            end_age: self.end_age,
            dynamic_end_age: self.dynamic_end_age.then_some(true),
            expected_return: self.expected_return,
            inflation: self.inflation,
            volatility: self.volatility,
            mortality_enabled: self.no_mortality.then_some(false),
            health_class: self.health.map(Into::into),
            tech_scenario: self.tech.map(Into::into),
            seed: self.seed,
            mode: self.mode.map(Into::into),
            paths: self.paths,
            scenario: self.scenario,
            first_year: self.first_year,
            last_year: self.last_year,
            timeout_ms: self.timeout_ms,
            include_paths: self.include_paths.then_some(true),
            ..SimulatePayload::default()
        }
    }
}

fn read_params_file(path: &PathBuf) -> Result<SimulatePayload, ApiError> {
    let text = fs::read_to_string(path).map_err(|e| ApiError::ParamsFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ApiError::ParamsFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[derive(Args, Debug)]
pub struct EndAgeArgs {
    #[arg(long)]
    start_age: Option<u32>,
    #[arg(long, value_enum)]
    health: Option<CliHealthClass>,
    #[arg(long, value_enum)]
    tech: Option<CliTechScenario>,
}

impl EndAgeArgs {
    pub fn payload(&self) -> EndAgePayload {
        EndAgePayload {
            start_age: self.start_age,
            health_class: self.health.map(Into::into),
            tech_scenario: self.tech.map(Into::into),
        }
    }
}

#[derive(Args, Debug)]
pub struct SolveArgs {
    #[arg(long, value_enum, default_value_t = CliGoal::RequiredPortfolio)]
    goal: CliGoal,
    #[arg(long, help = "Target success rate as a fraction, e.g. 0.95")]
    target: Option<f64>,
    #[arg(long)]
    search_min: Option<f64>,
    #[arg(long)]
    search_max: Option<f64>,
    #[arg(long)]
    tolerance: Option<f64>,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    final_paths: Option<u32>,
    #[command(flatten)]
    pub plan: PlanArgs,
}

impl SolveArgs {
    pub fn payload(&self) -> SolvePayload {
        SolvePayload {
            goal: Some(self.goal.into()),
            target_success_rate: self.target,
            search_min: self.search_min,
            search_max: self.search_max,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            paths_per_iteration: self.plan.paths,
            final_paths: self.final_paths,
            params: SimulatePayload::default(),
        }
    }
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[arg(long, help = "JSON overrides applied on top of the base plan")]
    variant: PathBuf,
    #[command(flatten)]
    pub plan: PlanArgs,
}

impl CompareArgs {
    pub fn variant_layer(&self) -> Result<SimulatePayload, ApiError> {
        read_params_file(&self.variant)
    }
}

#[derive(Args, Debug)]
pub struct TradeoffArgs {
    #[arg(
        long,
        value_delimiter = ',',
        help = "Portfolio levels to sweep; defaults to 10x..40x annual expenses"
    )]
    levels: Vec<f64>,
    #[command(flatten)]
    pub plan: PlanArgs,
}

impl TradeoffArgs {
    pub fn levels(&self) -> Option<&[f64]> {
        (!self.levels.is_empty()).then_some(self.levels.as_slice())
    }
}
