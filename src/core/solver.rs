use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{RunMode, RunOptions, run};
use super::error::{SimError, SimResult};
use super::types::{Horizon, SimulationParameters};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    RequiredPortfolio,
    MaxExpenses,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    pub mode: RunMode,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub paths_per_iteration: u32,
    pub final_paths: u32,
}

impl GoalSolveConfig {
    /// Bounds scaled to the plan: up to 50 years of expenses (or five times
    /// the current portfolio) when solving for a portfolio, and up to a 20%
    /// withdrawal rate when solving for spending.
    pub fn for_goal(goal_type: GoalType, params: &SimulationParameters) -> Self {
        let (search_max, tolerance) = match goal_type {
            GoalType::RequiredPortfolio => (
                (params.annual_expenses * 50.0)
                    .max(params.starting_portfolio * 5.0)
                    .max(2_000_000.0),
                10_000.0,
            ),
            GoalType::MaxExpenses => (
                (params.starting_portfolio * 0.20).max(params.annual_expenses * 2.0).max(10_000.0),
                100.0,
            ),
        };
        Self {
            goal_type,
            mode: RunMode::MonteCarlo { paths: 500 },
            target_success_rate: 0.95,
            search_min: 0.0,
            search_max,
            tolerance,
            max_iterations: 40,
            paths_per_iteration: 500,
            final_paths: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub config: GoalSolveConfig,
    pub solved_value: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

pub fn solve_goal(
    params: &SimulationParameters,
    config: GoalSolveConfig,
    options: &RunOptions,
) -> SimResult<GoalSolveResult> {
    validate_config(config)?;

    let low_eval = evaluate_candidate(params, config, config.search_min, config.paths_per_iteration, options)?;
    let high_eval = evaluate_candidate(params, config, config.search_max, config.paths_per_iteration, options)?;
    let meets = |eval: &CandidateEval| eval.success_rate + 1e-12 >= config.target_success_rate;

    // Success rises with the portfolio and falls with spending; the solver
    // looks for the boundary on the side the goal cares about.
    let ascending = config.goal_type == GoalType::RequiredPortfolio;
    let (feasible_end, infeasible_end) = if ascending {
        (&high_eval, &low_eval)
    } else {
        (&low_eval, &high_eval)
    };

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    if !meets(feasible_end) {
        feasible = false;
        message = match config.goal_type {
            GoalType::RequiredPortfolio => "No portfolio within the search bounds meets the target.",
            GoalType::MaxExpenses => "Even the lowest spending bound misses the target.",
        }
        .to_string();
    } else if meets(infeasible_end) {
        feasible = true;
        converged = true;
        solved_value = Some(if ascending {
            config.search_min
        } else {
            config.search_max
        });
        message = match config.goal_type {
            GoalType::RequiredPortfolio => "Already meets target at the lower portfolio bound.",
            GoalType::MaxExpenses => {
                "Upper spending bound is still feasible; raise searchMax for a tighter answer."
            }
        }
        .to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        for it in 1..=config.max_iterations {
            let mid = (lo + hi) * 0.5;
            let eval = evaluate_candidate(params, config, mid, config.paths_per_iteration, options)?;
            debug!(
                iteration = it,
                candidate = mid,
                success_rate = eval.success_rate,
                "solver iteration"
            );
            iterations.push(GoalSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_value: mid,
                success_rate: eval.success_rate,
                success_ci_half_width: eval.success_ci_half_width,
            });

            match (meets(&eval), ascending) {
                (true, true) | (false, false) => hi = mid,
                (false, true) | (true, false) => lo = mid,
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_value = Some(if ascending { hi } else { lo });
        feasible = true;
        message = if converged {
            match config.goal_type {
                GoalType::RequiredPortfolio => "Solved required starting portfolio.",
                GoalType::MaxExpenses => "Solved maximum sustainable spending.",
            }
            .to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    if let Some(value) = solved_value {
        let final_eval = evaluate_candidate(params, config, value, config.final_paths, options)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
    }

    Ok(GoalSolveResult {
        config,
        solved_value,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

fn evaluate_candidate(
    base: &SimulationParameters,
    config: GoalSolveConfig,
    candidate_value: f64,
    paths: u32,
    options: &RunOptions,
) -> SimResult<CandidateEval> {
    let mut params = base.clone();
    match config.goal_type {
        GoalType::RequiredPortfolio => params.starting_portfolio = candidate_value.max(0.0),
        GoalType::MaxExpenses => {
            params.annual_expenses = candidate_value.max(0.0);
            // Small candidates can push the reduced level under the lean floor.
            if let Some(rule) = params.spending_rule.as_mut() {
                let reduced = rule.reduced_spending(params.annual_expenses);
                if let Some(lean) = rule.lean.as_mut() {
                    lean.floor = lean.floor.min(reduced);
                }
            }
        }
    }

    let report = run(&params, config.mode.with_paths(paths), options)?;
    let n = report.completed_paths as u32;
    Ok(CandidateEval {
        success_rate: report.aggregate.success_rate,
        success_ci_half_width: binomial_ci_half_width(report.aggregate.success_rate, n),
    })
}

pub const TRADEOFF_MULTIPLES: [f64; 11] =
    [10.0, 12.0, 15.0, 18.0, 20.0, 22.0, 25.0, 28.0, 30.0, 35.0, 40.0];
pub const SAFE_SUCCESS_RATE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeoffPoint {
    pub portfolio: f64,
    pub portfolio_multiple: Option<f64>,
    pub success_rate: f64,
    pub real_failure_rate: f64,
    pub median_final: f64,
    pub p5_final: f64,
    pub p95_final: f64,
    pub expected_legacy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTradeoff {
    pub mode: RunMode,
    pub horizon: Horizon,
    pub annual_expenses: f64,
    pub curve: Vec<TradeoffPoint>,
    pub safe_portfolio_95: Option<f64>,
}

/// Sweeps starting portfolios and reports security (success) against the
/// money left at the end (legacy) for each.
pub fn legacy_tradeoff(
    params: &SimulationParameters,
    mode: RunMode,
    levels: Option<&[f64]>,
    options: &RunOptions,
) -> SimResult<LegacyTradeoff> {
    let expenses = params.annual_expenses;
    let levels: Vec<f64> = match levels {
        Some(levels) => levels.to_vec(),
        None if expenses > 0.0 => TRADEOFF_MULTIPLES.iter().map(|m| m * expenses).collect(),
        None => {
            return Err(SimError::config(
                "annualExpenses",
                "must be > 0 to derive default portfolio levels",
            ));
        }
    };
    if levels.is_empty() {
        return Err(SimError::empty("no portfolio levels to sweep"));
    }
    if let Some(bad) = levels.iter().position(|l| !l.is_finite() || *l < 0.0) {
        return Err(SimError::config(
            format!("levels[{bad}]"),
            "must be finite and >= 0",
        ));
    }

    let mut curve = Vec::with_capacity(levels.len());
    let mut horizon = None;
    for &portfolio in &levels {
        let mut candidate = params.clone();
        candidate.starting_portfolio = portfolio;
        let report = run(&candidate, mode, options)?;
        debug!(
            portfolio,
            success_rate = report.aggregate.success_rate,
            "tradeoff level"
        );
        horizon.get_or_insert(report.horizon);
        let result = &report.aggregate;
        curve.push(TradeoffPoint {
            portfolio,
            portfolio_multiple: (expenses > 0.0).then(|| portfolio / expenses),
            success_rate: result.success_rate,
            real_failure_rate: result.real_failure_rate,
            median_final: result.median_final,
            p5_final: result.final_bands.p5,
            p95_final: result.final_bands.p95,
            expected_legacy: result.median_final.max(0.0),
        });
    }

    let safe_portfolio_95 = curve
        .iter()
        .find(|point| point.success_rate >= SAFE_SUCCESS_RATE)
        .map(|point| point.portfolio);
    let horizon = horizon.ok_or_else(|| SimError::empty("no portfolio levels to sweep"))?;

    Ok(LegacyTradeoff {
        mode,
        horizon,
        annual_expenses: expenses,
        curve,
        safe_portfolio_95,
    })
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_config(config: GoalSolveConfig) -> SimResult<()> {
    if !(0.0..=1.0).contains(&config.target_success_rate) {
        return Err(SimError::config(
            "targetSuccessRate",
            "must be between 0 and 1",
        ));
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(SimError::config("searchMin", "search bounds must be finite"));
    }
    if config.search_min < 0.0 {
        return Err(SimError::config("searchMin", "must be >= 0"));
    }
    if config.search_max <= config.search_min {
        return Err(SimError::config(
            "searchMax",
            "must be greater than searchMin",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(SimError::config("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(SimError::config("maxIterations", "must be > 0"));
    }
    if config.paths_per_iteration == 0 {
        return Err(SimError::config("pathsPerIteration", "must be > 0"));
    }
    if config.final_paths == 0 {
        return Err(SimError::config("finalPaths", "must be > 0"));
    }
    Ok(())
}
