use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::aggregate::aggregate;
use super::error::{SimError, SimResult};
use super::historical::YearRange;
use super::mortality::{MortalityModel, resolve_end_age};
use super::rng::{Stream, path_rng};
use super::scenarios::{ScenarioSource, StressScenario};
use super::types::{
    AggregateResult, EndAgeSource, Horizon, MAX_PATHS, PathClass, PathOutcome, ReturnSequence,
    SimulationParameters, SpendingLevel, SpendingRule, YearState,
};
use super::validation::validate_parameters;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RunMode {
    MonteCarlo {
        paths: u32,
    },
    Historical {
        range: Option<YearRange>,
    },
    HistoricalWithMortality {
        range: Option<YearRange>,
    },
    Stress {
        scenario: StressScenario,
        paths: u32,
    },
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            RunMode::MonteCarlo { .. } => "monte-carlo",
            RunMode::Historical { .. } => "historical",
            RunMode::HistoricalWithMortality { .. } => "historical-mortality",
            RunMode::Stress { .. } => "stress",
        }
    }

    /// Historical modes fix mortality regardless of the parameters.
    pub fn mortality_enabled(&self, params: &SimulationParameters) -> bool {
        match self {
            RunMode::Historical { .. } => false,
            RunMode::HistoricalWithMortality { .. } => true,
            RunMode::MonteCarlo { .. } | RunMode::Stress { .. } => params.mortality.enabled,
        }
    }

    pub fn with_paths(self, paths: u32) -> Self {
        match self {
            RunMode::MonteCarlo { .. } => RunMode::MonteCarlo { paths },
            RunMode::Stress { scenario, .. } => RunMode::Stress { scenario, paths },
            other => other,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let paths = match self {
            RunMode::MonteCarlo { paths } | RunMode::Stress { paths, .. } => *paths,
            RunMode::Historical { .. } | RunMode::HistoricalWithMortality { .. } => return Ok(()),
        };
        if paths == 0 {
            return Err(SimError::empty("path count is zero"));
        }
        if paths > MAX_PATHS {
            return Err(SimError::config(
                "paths",
                format!("{paths} exceeds the maximum of {MAX_PATHS}"),
            ));
        }
        Ok(())
    }

    pub fn source(&self, params: &SimulationParameters) -> SimResult<ScenarioSource> {
        match *self {
            RunMode::MonteCarlo { paths } => Ok(ScenarioSource::stochastic(params, paths as usize)),
            RunMode::Historical { range } | RunMode::HistoricalWithMortality { range } => {
                ScenarioSource::historical(range)
            }
            RunMode::Stress { scenario, paths } => {
                Ok(ScenarioSource::stress(scenario, params, paths as usize))
            }
        }
    }
}

/// Shared stop signal for a run. Clones observe the same flag and counter.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    path_budget: Option<usize>,
    completed: Arc<AtomicUsize>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    /// Stops once `paths` paths have completed across every run sharing
    /// this control.
    pub fn with_path_budget(mut self, paths: usize) -> Self {
        self.path_budget = Some(paths);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn completed_paths(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn should_stop(&self) -> bool {
        self.is_cancelled()
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.path_budget.is_some_and(|b| self.completed_paths() >= b)
    }

    fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub record_trajectories: bool,
    pub control: RunControl,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub mode: RunMode,
    pub horizon: Horizon,
    pub mortality_applied: bool,
    pub requested_paths: usize,
    pub completed_paths: usize,
    pub aggregate: AggregateResult,
    #[serde(skip)]
    pub outcomes: Vec<PathOutcome>,
}

impl RunReport {
    pub fn interrupted(&self) -> bool {
        self.completed_paths < self.requested_paths
    }
}

pub fn resolve_horizon(params: &SimulationParameters, mortality_enabled: bool) -> SimResult<Horizon> {
    let (end_age, source) = match params.end_age {
        Some(end_age) => (end_age, EndAgeSource::Explicit),
        None if mortality_enabled => (
            resolve_end_age(
                params.start_age,
                params.mortality.health_class,
                params.mortality.tech_scenario,
            )?,
            EndAgeSource::Resolved,
        ),
        None => {
            return Err(SimError::config(
                "endAge",
                "an explicit end age is required when mortality is disabled",
            ));
        }
    };
    if end_age < params.start_age {
        return Err(SimError::config(
            "endAge",
            format!("end age {end_age} is before start age {}", params.start_age),
        ));
    }
    Ok(Horizon {
        start_age: params.start_age,
        end_age,
        source,
    })
}

#[derive(Debug, Clone)]
pub struct PathContext<'a> {
    pub params: &'a SimulationParameters,
    pub horizon: Horizon,
    /// Annual death probability per simulated year; `None` skips death draws.
    pub death_curve: Option<Vec<f64>>,
    pub record_trajectories: bool,
}

impl<'a> PathContext<'a> {
    pub fn new(
        params: &'a SimulationParameters,
        horizon: Horizon,
        mortality_enabled: bool,
        record_trajectories: bool,
    ) -> Self {
        let death_curve = mortality_enabled.then(|| {
            MortalityModel::from_config(horizon.start_age, &params.mortality)
                .death_curve(horizon.ages())
        });
        Self {
            params,
            horizon,
            death_curve,
            record_trajectories,
        }
    }

    fn spending_for(&self, level: SpendingLevel) -> f64 {
        let base = self.params.annual_expenses;
        match (level, self.params.spending_rule) {
            (SpendingLevel::Normal, _) | (_, None) => base,
            (SpendingLevel::Reduced, Some(rule)) => rule.reduced_spending(base),
            (SpendingLevel::Lean, Some(rule)) => match rule.lean {
                Some(lean) => lean.floor,
                None => rule.reduced_spending(base),
            },
        }
    }
}

fn next_spending_level(
    rule: &SpendingRule,
    current: SpendingLevel,
    age: u32,
    balance: f64,
    peak: f64,
    drawdown: f64,
) -> SpendingLevel {
    if drawdown >= rule.drop_drawdown {
        match rule.lean {
            Some(lean) if age >= lean.from_age => SpendingLevel::Lean,
            _ => SpendingLevel::Reduced,
        }
    } else if balance >= rule.recovery_fraction * peak {
        SpendingLevel::Normal
    } else {
        current
    }
}

/// Runs one path year by year. Death draws come from the path's own
/// mortality stream so they never disturb the return sequence.
pub fn simulate_path(ctx: &PathContext<'_>, index: usize, sequence: &ReturnSequence) -> PathOutcome {
    let params = ctx.params;
    let start_age = ctx.horizon.start_age;
    let years = ctx.horizon.years();
    let mut death_rng = ctx
        .death_curve
        .as_ref()
        .map(|_| path_rng(params.seed, Stream::Mortality, index));

    let mut balance = params.starting_portfolio;
    let mut peak = balance;
    let mut min_portfolio = balance;
    let mut level = SpendingLevel::Normal;
    let mut hustle_activation_age = None;
    let mut hustle_remaining = 0u32;
    let mut spending_reduced = false;
    let mut went_lean = false;
    let mut failure_age = None;
    let mut death_age = None;

    let mut balances = Vec::with_capacity(years);
    let mut trajectory = Vec::with_capacity(if ctx.record_trajectories { years } else { 0 });

    for year in 0..years {
        let age = start_age + year as u32;
        let mut spending = 0.0;
        let mut drawdown = 1.0;
        let mut hustle_active = false;

        if failure_age.is_none() {
            let r = sequence.returns.get(year).copied().unwrap_or(0.0);
            balance *= 1.0 + r;
            balance += params.income_at(age) + params.windfall_at(age);
            peak = peak.max(balance);
            drawdown = if peak > 0.0 { 1.0 - balance / peak } else { 0.0 };

            if let Some(hustle) = params.emergency_hustle {
                if hustle_activation_age.is_none()
                    && age - start_age < hustle.window_years
                    && drawdown >= hustle.trigger_drawdown
                {
                    hustle_activation_age = Some(age);
                    hustle_remaining = hustle.duration_years;
                }
                if hustle_remaining > 0 {
                    balance += hustle.extra_income;
                    hustle_remaining -= 1;
                    hustle_active = true;
                }
            }

            if !hustle_active {
                if let Some(rule) = &params.spending_rule {
                    level = next_spending_level(rule, level, age, balance, peak, drawdown);
                }
            }
            match level {
                SpendingLevel::Normal => {}
                SpendingLevel::Reduced => spending_reduced = true,
                SpendingLevel::Lean => {
                    spending_reduced = true;
                    went_lean = true;
                }
            }

            spending = ctx.spending_for(level);
            balance -= spending;
            if balance <= 0.0 {
                balance = 0.0;
                failure_age = Some(age);
            }
            min_portfolio = min_portfolio.min(balance);
        }

        if let (Some(curve), Some(rng)) = (&ctx.death_curve, death_rng.as_mut()) {
            if death_age.is_none() {
                let u: f64 = rng.r#gen();
                if u < curve[year] {
                    death_age = Some(age);
                }
            }
        }

        balances.push(balance);
        if ctx.record_trajectories {
            trajectory.push(YearState {
                age,
                portfolio: balance,
                spending,
                drawdown,
                hustle_active,
                alive: death_age.is_none(),
                spending_level: level,
            });
        }
    }

    let class = match (failure_age, death_age) {
        (None, _) => PathClass::SurvivedWithMoney,
        (Some(failed), Some(died)) if died < failed => PathClass::DepletedAfterDeath,
        (Some(_), _) => PathClass::FailedWhileAlive,
    };

    PathOutcome {
        index,
        origin: sequence.origin,
        final_portfolio: balance,
        min_portfolio,
        class,
        failure_age,
        death_age,
        hustle_activation_age,
        spending_reduced,
        went_lean,
        balances,
        trajectory,
    }
}

/// Runs `simulate` for every index the control still admits. Skipped
/// indices are dropped from the result.
fn for_each_path<T, F>(count: usize, control: &RunControl, simulate: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    let step = |index: usize| {
        if control.should_stop() {
            return None;
        }
        let outcome = simulate(index);
        control.record_completed();
        Some(outcome)
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Option<T>> = (0..count).into_par_iter().map(step).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Option<T>> = (0..count).map(step).collect();

    outcomes.into_iter().flatten().collect()
}

fn warn_on_unreachable_windfalls(params: &SimulationParameters, horizon: &Horizon) {
    for windfall in params.windfalls.iter().filter(|w| w.age >= horizon.end_age) {
        warn!(
            age = windfall.age,
            amount = windfall.amount,
            label = windfall.label.as_deref().unwrap_or(""),
            end_age = horizon.end_age,
            "windfall falls outside the simulated horizon and is ignored"
        );
    }
}

pub fn run(
    params: &SimulationParameters,
    mode: RunMode,
    options: &RunOptions,
) -> SimResult<RunReport> {
    validate_parameters(params)?;
    mode.validate()?;

    let mortality_applied = mode.mortality_enabled(params);
    let horizon = resolve_horizon(params, mortality_applied)?;
    debug!(?horizon, "horizon resolved");
    warn_on_unreachable_windfalls(params, &horizon);

    let source = mode.source(params)?;
    let requested_paths = source.len();
    info!(
        mode = mode.name(),
        paths = requested_paths,
        start_age = horizon.start_age,
        end_age = horizon.end_age,
        mortality = mortality_applied,
        seed = params.seed,
        "starting simulation"
    );

    let started = Instant::now();
    let ctx = PathContext::new(params, horizon, mortality_applied, options.record_trajectories);
    let years = horizon.years();
    let outcomes = for_each_path(requested_paths, &options.control, |index| {
        let sequence = source.sequence(index, years, params.seed);
        simulate_path(&ctx, index, &sequence)
    });

    let completed_paths = outcomes.len();
    if completed_paths == 0 {
        warn!(mode = mode.name(), "simulation cancelled before any path completed");
        return Err(SimError::Cancelled);
    }
    if completed_paths < requested_paths {
        warn!(
            completed = completed_paths,
            requested = requested_paths,
            "simulation interrupted; aggregating completed paths"
        );
    }

    let aggregate = aggregate(
        &outcomes,
        &horizon,
        mortality_applied.then_some(&params.mortality),
    )?;
    info!(
        success_rate = aggregate.success_rate,
        real_failure_rate = aggregate.real_failure_rate,
        median_final = aggregate.median_final,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );

    Ok(RunReport {
        mode,
        horizon,
        mortality_applied,
        requested_paths,
        completed_paths,
        aggregate,
        outcomes,
    })
}

pub fn generate_sequences(
    params: &SimulationParameters,
    mode: RunMode,
) -> SimResult<Vec<ReturnSequence>> {
    validate_parameters(params)?;
    mode.validate()?;
    let horizon = resolve_horizon(params, mode.mortality_enabled(params))?;
    Ok(mode.source(params)?.generate_all(horizon.years(), params.seed))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonDelta {
    pub success_rate: f64,
    pub real_failure_rate: f64,
    pub failure_rate: f64,
    pub median_final: f64,
    pub p10_final: f64,
    pub p90_final: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub horizon: Horizon,
    pub requested_paths: usize,
    /// Paths simulated on both sides; an interrupted comparison drops an
    /// index from base and variant together.
    pub completed_paths: usize,
    pub base: AggregateResult,
    pub variant: AggregateResult,
    pub delta: ComparisonDelta,
}

/// Runs two parameter sets over the same return sequences and, with equal
/// seeds and mortality settings, the same death draws.
pub fn compare(
    base: &SimulationParameters,
    variant: &SimulationParameters,
    sequences: &[ReturnSequence],
    options: &RunOptions,
) -> SimResult<Comparison> {
    validate_parameters(base)?;
    validate_parameters(variant)?;
    if sequences.is_empty() {
        return Err(SimError::empty("no return sequences to compare over"));
    }

    let horizon = resolve_horizon(base, base.mortality.enabled)?;
    let variant_horizon = resolve_horizon(variant, variant.mortality.enabled)?;
    if variant_horizon.start_age != horizon.start_age || variant_horizon.end_age != horizon.end_age
    {
        return Err(SimError::config(
            "variant.endAge",
            format!(
                "variant horizon {}-{} differs from base {}-{}",
                variant_horizon.start_age,
                variant_horizon.end_age,
                horizon.start_age,
                horizon.end_age
            ),
        ));
    }
    if let Some(short) = sequences.iter().position(|s| s.len() < horizon.years()) {
        return Err(SimError::config(
            "sequences",
            format!(
                "sequence {short} has {} years, horizon needs {}",
                sequences[short].len(),
                horizon.years()
            ),
        ));
    }

    let base_ctx = PathContext::new(base, horizon, base.mortality.enabled, false);
    let variant_ctx = PathContext::new(variant, horizon, variant.mortality.enabled, false);
    info!(paths = sequences.len(), end_age = horizon.end_age, "comparing parameter sets");
    let pairs = for_each_path(sequences.len(), &options.control, |index| {
        let sequence = &sequences[index];
        (
            simulate_path(&base_ctx, index, sequence),
            simulate_path(&variant_ctx, index, sequence),
        )
    });
    if pairs.is_empty() {
        warn!("comparison cancelled before any path completed");
        return Err(SimError::Cancelled);
    }
    let completed_paths = pairs.len();
    if completed_paths < sequences.len() {
        warn!(
            completed = completed_paths,
            requested = sequences.len(),
            "comparison interrupted; aggregating completed pairs"
        );
    }
    let (base_outcomes, variant_outcomes): (Vec<PathOutcome>, Vec<PathOutcome>) =
        pairs.into_iter().unzip();

    let base_result = aggregate(
        &base_outcomes,
        &horizon,
        base.mortality.enabled.then_some(&base.mortality),
    )?;
    let variant_result = aggregate(
        &variant_outcomes,
        &horizon,
        variant.mortality.enabled.then_some(&variant.mortality),
    )?;
    let delta = ComparisonDelta {
        success_rate: variant_result.success_rate - base_result.success_rate,
        real_failure_rate: variant_result.real_failure_rate - base_result.real_failure_rate,
        failure_rate: variant_result.failure_rate - base_result.failure_rate,
        median_final: variant_result.median_final - base_result.median_final,
        p10_final: variant_result.final_bands.p10 - base_result.final_bands.p10,
        p90_final: variant_result.final_bands.p90 - base_result.final_bands.p90,
    };

    Ok(Comparison {
        horizon,
        requested_paths: sequences.len(),
        completed_paths,
        base: base_result,
        variant: variant_result,
        delta,
    })
}
