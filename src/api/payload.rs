use std::time::Duration;

use serde::Deserialize;

use crate::core::{
    EmergencyHustle, GoalSolveConfig, GoalType, HealthClass, IncomeOverlap, IncomePhase, LeanMode,
    MortalityConfig, RunMode, SimError, SimResult, SimulationParameters, SpendingRule,
    StressScenario, TechScenario, Windfall, YearRange,
};

pub const DEFAULT_PATHS: u32 = 1_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeToken {
    #[serde(alias = "monte_carlo", alias = "montecarlo", alias = "mc")]
    MonteCarlo,
    Historical,
    #[serde(
        alias = "historical_mortality",
        alias = "historical-with-mortality",
        alias = "historical_with_mortality"
    )]
    HistoricalMortality,
    Stress,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HustlePayload {
    pub enabled: Option<bool>,
    #[serde(alias = "trigger_drawdown")]
    pub trigger_drawdown: Option<f64>,
    #[serde(alias = "window_years")]
    pub window_years: Option<u32>,
    #[serde(alias = "extra_income")]
    pub extra_income: Option<f64>,
    #[serde(alias = "duration_years", alias = "duration")]
    pub duration_years: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeanPayload {
    pub enabled: Option<bool>,
    #[serde(alias = "from_age", alias = "lean_age")]
    pub from_age: Option<u32>,
    #[serde(alias = "lean_spending")]
    pub floor: Option<f64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpendingRulePayload {
    pub enabled: Option<bool>,
    #[serde(alias = "drop_drawdown")]
    pub drop_drawdown: Option<f64>,
    #[serde(alias = "recovery_fraction")]
    pub recovery_fraction: Option<f64>,
    #[serde(alias = "cut_fraction")]
    pub cut_fraction: Option<f64>,
    pub lean: Option<LeanPayload>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MortalityPayload {
    pub enabled: Option<bool>,
    #[serde(alias = "health_class")]
    pub health_class: Option<HealthClass>,
    #[serde(alias = "tech_scenario")]
    pub tech_scenario: Option<TechScenario>,
}

/// Overrides for a simulation request. Every field is optional and layers
/// over whatever parameters it is applied to.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulatePayload {
    #[serde(alias = "starting_portfolio")]
    pub starting_portfolio: Option<f64>,
    #[serde(alias = "annual_expenses")]
    pub annual_expenses: Option<f64>,
    #[serde(alias = "start_age")]
    pub start_age: Option<u32>,
    #[serde(alias = "end_age")]
    pub end_age: Option<u32>,
    /// Drop any explicit end age and resolve it from mortality.
    #[serde(alias = "dynamic_end_age")]
    pub dynamic_end_age: Option<bool>,
    #[serde(alias = "expected_return")]
    pub expected_return: Option<f64>,
    pub inflation: Option<f64>,
    pub volatility: Option<f64>,
    #[serde(alias = "income_phases")]
    pub income_phases: Option<Vec<IncomePhase>>,
    pub windfalls: Option<Vec<Windfall>>,
    #[serde(alias = "emergency_hustle")]
    pub emergency_hustle: Option<HustlePayload>,
    #[serde(alias = "spending_rule", alias = "spending_rules", alias = "spendingRules")]
    pub spending_rule: Option<SpendingRulePayload>,
    pub mortality: Option<MortalityPayload>,
    #[serde(alias = "mortality_enabled")]
    pub mortality_enabled: Option<bool>,
    #[serde(alias = "health_class")]
    pub health_class: Option<HealthClass>,
    #[serde(alias = "tech_scenario")]
    pub tech_scenario: Option<TechScenario>,
    #[serde(alias = "income_overlap")]
    pub income_overlap: Option<IncomeOverlap>,
    pub seed: Option<u64>,

    pub mode: Option<ModeToken>,
    #[serde(alias = "num_simulations", alias = "simulations")]
    pub paths: Option<u32>,
    pub scenario: Option<StressScenario>,
    #[serde(alias = "first_year")]
    pub first_year: Option<u16>,
    #[serde(alias = "last_year")]
    pub last_year: Option<u16>,
    #[serde(alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
    #[serde(alias = "include_paths")]
    pub include_paths: Option<bool>,
}

impl SimulatePayload {
    pub fn apply(&self, params: &mut SimulationParameters) -> SimResult<()> {
        if let Some(v) = self.starting_portfolio {
            params.starting_portfolio = v;
        }
        if let Some(v) = self.annual_expenses {
            params.annual_expenses = v;
        }
        if let Some(v) = self.start_age {
            params.start_age = v;
        }
        if let Some(v) = self.end_age {
            params.end_age = Some(v);
        }
        if self.dynamic_end_age == Some(true) {
            if self.end_age.is_some() {
                return Err(SimError::config(
                    "dynamicEndAge",
                    "cannot be combined with an explicit endAge",
                ));
            }
            params.end_age = None;
        }
        if let Some(v) = self.expected_return {
            params.expected_return = v;
        }
        if let Some(v) = self.inflation {
            params.inflation = v;
        }
        if let Some(v) = self.volatility {
            params.volatility = v;
        }
        if let Some(v) = &self.income_phases {
            params.income_phases = v.clone();
        }
        if let Some(v) = &self.windfalls {
            params.windfalls = v.clone();
        }
        if let Some(v) = self.income_overlap {
            params.income_overlap = v;
        }
        if let Some(v) = self.seed {
            params.seed = v;
        }

        if let Some(hustle) = &self.emergency_hustle {
            params.emergency_hustle = merge_hustle(params.emergency_hustle, hustle)?;
        }
        if let Some(rule) = &self.spending_rule {
            params.spending_rule = merge_spending_rule(params.spending_rule, rule)?;
        }

        let nested = self.mortality.clone().unwrap_or_default();
        merge_mortality(
            &mut params.mortality,
            nested.enabled.or(self.mortality_enabled),
            nested.health_class.or(self.health_class),
            nested.tech_scenario.or(self.tech_scenario),
        );
        Ok(())
    }

    pub fn to_parameters(&self) -> SimResult<SimulationParameters> {
        layered_parameters(&[self])
    }
}

/// Defaults overlaid by each layer in order, e.g. a parameter file then flags.
pub fn layered_parameters(layers: &[&SimulatePayload]) -> SimResult<SimulationParameters> {
    let mut params = SimulationParameters::default();
    for layer in layers {
        layer.apply(&mut params)?;
    }
    Ok(params)
}

fn merge_hustle(
    current: Option<EmergencyHustle>,
    payload: &HustlePayload,
) -> SimResult<Option<EmergencyHustle>> {
    if payload.enabled == Some(false) {
        return Ok(None);
    }
    let base = current.or(SimulationParameters::default().emergency_hustle);
    let Some(mut hustle) = base else {
        return Err(SimError::config("emergencyHustle", "no defaults to merge into"));
    };
    if let Some(v) = payload.trigger_drawdown {
        hustle.trigger_drawdown = v;
    }
    if let Some(v) = payload.window_years {
        hustle.window_years = v;
    }
    if let Some(v) = payload.extra_income {
        hustle.extra_income = v;
    }
    if let Some(v) = payload.duration_years {
        hustle.duration_years = v;
    }
    Ok(Some(hustle))
}

fn merge_spending_rule(
    current: Option<SpendingRule>,
    payload: &SpendingRulePayload,
) -> SimResult<Option<SpendingRule>> {
    if payload.enabled == Some(false) {
        return Ok(None);
    }
    let base = current.or(SimulationParameters::default().spending_rule);
    let Some(mut rule) = base else {
        return Err(SimError::config("spendingRule", "no defaults to merge into"));
    };
    if let Some(v) = payload.drop_drawdown {
        rule.drop_drawdown = v;
    }
    if let Some(v) = payload.recovery_fraction {
        rule.recovery_fraction = v;
    }
    if let Some(v) = payload.cut_fraction {
        rule.cut_fraction = v;
    }
    if let Some(lean) = &payload.lean {
        rule.lean = if lean.enabled == Some(false) {
            None
        } else {
            let mut merged = rule.lean.unwrap_or(LeanMode {
                from_age: 60,
                floor: 17_000.0,
            });
            if let Some(v) = lean.from_age {
                merged.from_age = v;
            }
            if let Some(v) = lean.floor {
                merged.floor = v;
            }
            Some(merged)
        };
    }
    Ok(Some(rule))
}

fn merge_mortality(
    config: &mut MortalityConfig,
    enabled: Option<bool>,
    health_class: Option<HealthClass>,
    tech_scenario: Option<TechScenario>,
) {
    if let Some(v) = enabled {
        config.enabled = v;
    }
    if let Some(v) = health_class {
        config.health_class = v;
    }
    if let Some(v) = tech_scenario {
        config.tech_scenario = v;
    }
}

/// Picks each run-selection field from the last layer that sets it.
fn pick<T>(layers: &[&SimulatePayload], field: impl Fn(&SimulatePayload) -> Option<T>) -> Option<T> {
    layers.iter().rev().find_map(|layer| field(*layer))
}

pub fn run_mode(layers: &[&SimulatePayload]) -> SimResult<RunMode> {
    let mode = pick(layers, |p| p.mode).unwrap_or(ModeToken::MonteCarlo);
    let paths = pick(layers, |p| p.paths).unwrap_or(DEFAULT_PATHS);
    let first = pick(layers, |p| p.first_year);
    let last = pick(layers, |p| p.last_year);
    let range = (first.is_some() || last.is_some()).then(|| YearRange {
        first: first.unwrap_or(u16::MIN),
        last: last.unwrap_or(u16::MAX),
    });

    Ok(match mode {
        ModeToken::MonteCarlo => RunMode::MonteCarlo { paths },
        ModeToken::Historical => RunMode::Historical { range },
        ModeToken::HistoricalMortality => RunMode::HistoricalWithMortality { range },
        ModeToken::Stress => {
            let scenario = pick(layers, |p| p.scenario).ok_or_else(|| {
                SimError::config("scenario", "stress mode needs a scenario")
            })?;
            RunMode::Stress { scenario, paths }
        }
    })
}

pub fn timeout(layers: &[&SimulatePayload]) -> Option<Duration> {
    pick(layers, |p| p.timeout_ms).map(Duration::from_millis)
}

pub fn include_paths(layers: &[&SimulatePayload]) -> bool {
    pick(layers, |p| p.include_paths).unwrap_or(false)
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EndAgePayload {
    #[serde(alias = "start_age")]
    pub start_age: Option<u32>,
    #[serde(alias = "health_class")]
    pub health_class: Option<HealthClass>,
    #[serde(alias = "tech_scenario")]
    pub tech_scenario: Option<TechScenario>,
}

impl EndAgePayload {
    pub fn resolve(&self) -> (u32, MortalityConfig) {
        let defaults = SimulationParameters::default();
        let mut mortality = defaults.mortality;
        merge_mortality(&mut mortality, Some(true), self.health_class, self.tech_scenario);
        (self.start_age.unwrap_or(defaults.start_age), mortality)
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SolvePayload {
    #[serde(alias = "goal_type", alias = "goalType")]
    pub goal: Option<GoalType>,
    #[serde(alias = "target_success_rate", alias = "target_certainty")]
    pub target_success_rate: Option<f64>,
    #[serde(alias = "search_min")]
    pub search_min: Option<f64>,
    #[serde(alias = "search_max")]
    pub search_max: Option<f64>,
    pub tolerance: Option<f64>,
    #[serde(alias = "max_iterations")]
    pub max_iterations: Option<u32>,
    #[serde(alias = "paths_per_iteration")]
    pub paths_per_iteration: Option<u32>,
    #[serde(alias = "final_paths")]
    pub final_paths: Option<u32>,
    pub params: SimulatePayload,
}

impl SolvePayload {
    pub fn to_config(&self, params: &SimulationParameters, mode: RunMode) -> GoalSolveConfig {
        let goal = self.goal.unwrap_or(GoalType::RequiredPortfolio);
        let mut config = GoalSolveConfig::for_goal(goal, params);
        config.mode = mode;
        if let Some(v) = self.target_success_rate {
            config.target_success_rate = v;
        }
        if let Some(v) = self.search_min {
            config.search_min = v;
        }
        if let Some(v) = self.search_max {
            config.search_max = v;
        }
        if let Some(v) = self.tolerance {
            config.tolerance = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.paths_per_iteration {
            config.paths_per_iteration = v;
        }
        if let Some(v) = self.final_paths {
            config.final_paths = v;
        }
        config
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradeoffPayload {
    #[serde(alias = "portfolio_levels", alias = "portfolioLevels")]
    pub levels: Option<Vec<f64>>,
    pub params: SimulatePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_from_json(json: &str) -> SimResult<SimulationParameters> {
        let payload: SimulatePayload = serde_json::from_str(json).expect("payload parses");
        payload.to_parameters()
    }

    #[test]
    fn empty_payload_reproduces_defaults() {
        assert_eq!(params_from_json("{}").unwrap(), SimulationParameters::default());
    }

    #[test]
    fn flags_layer_over_a_parameter_file() {
        let file: SimulatePayload =
            serde_json::from_str(r#"{"annualExpenses": 28000, "seed": 7}"#).unwrap();
        let flags: SimulatePayload = serde_json::from_str(r#"{"seed": 9}"#).unwrap();
        let params = layered_parameters(&[&file, &flags]).unwrap();
        assert_eq!(params.annual_expenses, 28_000.0);
        assert_eq!(params.seed, 9);
    }

    #[test]
    fn camel_and_snake_case_keys_are_both_accepted() {
        let camel = params_from_json(r#"{"startingPortfolio": 900000, "annualExpenses": 30000}"#)
            .unwrap();
        let snake = params_from_json(r#"{"starting_portfolio": 900000, "annual_expenses": 30000}"#)
            .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.starting_portfolio, 900_000.0);
    }

    #[test]
    fn nested_rules_merge_into_defaults() {
        let params = params_from_json(
            r#"{
                "emergencyHustle": {"extraIncome": 25000},
                "spending_rules": {"lean": {"floor": 15000}},
                "mortality": {"health_class": "excellent"}
            }"#,
        )
        .unwrap();
        let hustle = params.emergency_hustle.expect("hustle kept");
        assert_eq!(hustle.extra_income, 25_000.0);
        assert_eq!(hustle.duration_years, 3);
        let lean = params.spending_rule.and_then(|r| r.lean).expect("lean kept");
        assert_eq!(lean.floor, 15_000.0);
        assert_eq!(lean.from_age, 60);
        assert_eq!(params.mortality.health_class, HealthClass::Excellent);
        assert!(params.mortality.enabled);
    }

    #[test]
    fn rules_can_be_switched_off() {
        let params = params_from_json(
            r#"{"emergencyHustle": {"enabled": false}, "spendingRule": {"enabled": false},
                "mortalityEnabled": false}"#,
        )
        .unwrap();
        assert!(params.emergency_hustle.is_none());
        assert!(params.spending_rule.is_none());
        assert!(!params.mortality.enabled);
    }

    #[test]
    fn dynamic_end_age_clears_the_default() {
        let params = params_from_json(r#"{"dynamicEndAge": true}"#).unwrap();
        assert_eq!(params.end_age, None);
        let err = params_from_json(r#"{"dynamicEndAge": true, "endAge": 90}"#).unwrap_err();
        assert_eq!(err.field(), Some("dynamicEndAge"));
    }

    #[test]
    fn unknown_tokens_fail_to_parse() {
        assert!(serde_json::from_str::<SimulatePayload>(r#"{"healthClass": "superb"}"#).is_err());
        assert!(serde_json::from_str::<SimulatePayload>(r#"{"mode": "lottery"}"#).is_err());
    }

    #[test]
    fn later_layers_win_for_run_selection() {
        let file: SimulatePayload =
            serde_json::from_str(r#"{"mode": "stress", "scenario": "great_depression", "paths": 200}"#)
                .unwrap();
        let flags: SimulatePayload = serde_json::from_str(r#"{"paths": 50}"#).unwrap();
        assert_eq!(
            run_mode(&[&file, &flags]).unwrap(),
            RunMode::Stress {
                scenario: StressScenario::GreatDepression,
                paths: 50
            }
        );
        assert_eq!(
            run_mode(&[]).unwrap(),
            RunMode::MonteCarlo {
                paths: DEFAULT_PATHS
            }
        );
    }

    #[test]
    fn stress_mode_requires_a_scenario() {
        let payload: SimulatePayload = serde_json::from_str(r#"{"mode": "stress"}"#).unwrap();
        assert_eq!(run_mode(&[&payload]).unwrap_err().field(), Some("scenario"));
    }

    #[test]
    fn historical_year_bounds_build_a_range() {
        let payload: SimulatePayload =
            serde_json::from_str(r#"{"mode": "historical_with_mortality", "firstYear": 1966}"#)
                .unwrap();
        assert_eq!(
            run_mode(&[&payload]).unwrap(),
            RunMode::HistoricalWithMortality {
                range: Some(YearRange {
                    first: 1966,
                    last: u16::MAX
                })
            }
        );
    }

    #[test]
    fn solve_payload_overrides_goal_defaults() {
        let payload: SolvePayload = serde_json::from_str(
            r#"{"goal": "max-expenses", "targetSuccessRate": 0.9,
                "params": {"paths": 300, "annualExpenses": 20000}}"#,
        )
        .unwrap();
        let params = payload.params.to_parameters().unwrap();
        let mode = run_mode(&[&payload.params]).unwrap();
        let config = payload.to_config(&params, mode);
        assert_eq!(config.goal_type, GoalType::MaxExpenses);
        assert_eq!(config.target_success_rate, 0.9);
        assert_eq!(config.mode, RunMode::MonteCarlo { paths: 300 });
        assert_eq!(params.annual_expenses, 20_000.0);
    }
}
