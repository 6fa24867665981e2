use serde::Serialize;

use crate::core::{
    AggregateResult, Comparison, GoalSolveResult, Horizon, PathClass, PathOutcome, ReturnOrigin,
    RunMode, RunReport, SimulationParameters, StressScenarioInfo,
};

/// Paths shown in each of the failure and close-call lists.
pub const EXAMPLE_PATHS: usize = 30;
/// A surviving path whose minimum dipped below this counts as a close call.
pub const CLOSE_CALL_THRESHOLD: f64 = 300_000.0;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSummary {
    pub index: usize,
    pub origin: ReturnOrigin,
    pub class: PathClass,
    pub final_portfolio: f64,
    pub min_portfolio: f64,
    pub failure_age: Option<u32>,
    pub death_age: Option<u32>,
    pub hustle_activation_age: Option<u32>,
    pub balances: Vec<f64>,
}

impl From<&PathOutcome> for PathSummary {
    fn from(outcome: &PathOutcome) -> Self {
        Self {
            index: outcome.index,
            origin: outcome.origin,
            class: outcome.class,
            final_portfolio: outcome.final_portfolio,
            min_portfolio: outcome.min_portfolio,
            failure_age: outcome.failure_age,
            death_age: outcome.death_age,
            hustle_activation_age: outcome.hustle_activation_age,
            balances: outcome.balances.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse<'a> {
    pub parameters: &'a SimulationParameters,
    pub mode: RunMode,
    pub horizon: Horizon,
    pub mortality_applied: bool,
    pub requested_paths: usize,
    pub completed_paths: usize,
    pub interrupted: bool,
    pub aggregate: &'a AggregateResult,
    pub failure_examples: Vec<PathSummary>,
    pub close_calls: Vec<PathSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<&'a [PathOutcome]>,
}

impl<'a> SimulateResponse<'a> {
    pub fn new(params: &'a SimulationParameters, report: &'a RunReport, include_paths: bool) -> Self {
        Self {
            parameters: params,
            mode: report.mode,
            horizon: report.horizon,
            mortality_applied: report.mortality_applied,
            requested_paths: report.requested_paths,
            completed_paths: report.completed_paths,
            interrupted: report.interrupted(),
            aggregate: &report.aggregate,
            failure_examples: failure_examples(&report.outcomes),
            close_calls: close_calls(&report.outcomes),
            paths: include_paths.then_some(report.outcomes.as_slice()),
        }
    }
}

pub fn failure_examples(outcomes: &[PathOutcome]) -> Vec<PathSummary> {
    let mut depleted: Vec<&PathOutcome> = outcomes.iter().filter(|o| o.depleted()).collect();
    depleted.sort_by_key(|o| (o.failure_age, o.index));
    depleted.into_iter().take(EXAMPLE_PATHS).map(PathSummary::from).collect()
}

pub fn close_calls(outcomes: &[PathOutcome]) -> Vec<PathSummary> {
    let mut close: Vec<&PathOutcome> = outcomes
        .iter()
        .filter(|o| !o.depleted() && o.min_portfolio < CLOSE_CALL_THRESHOLD)
        .collect();
    close.sort_by(|a, b| {
        a.min_portfolio
            .total_cmp(&b.min_portfolio)
            .then(a.index.cmp(&b.index))
    });
    close.into_iter().take(EXAMPLE_PATHS).map(PathSummary::from).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressScenariosResponse {
    pub scenarios: Vec<StressScenarioInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResponse<'a> {
    pub parameters: &'a SimulationParameters,
    #[serde(flatten)]
    pub result: GoalSolveResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub mode: RunMode,
    pub paths: usize,
    #[serde(flatten)]
    pub comparison: Comparison,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunOptions, run};

    fn outcome(index: usize, min_portfolio: f64, failure_age: Option<u32>) -> PathOutcome {
        PathOutcome {
            index,
            origin: ReturnOrigin::Synthetic {
                mean: 0.06,
                volatility: 0.15,
            },
            final_portfolio: if failure_age.is_some() { 0.0 } else { min_portfolio },
            min_portfolio: if failure_age.is_some() { 0.0 } else { min_portfolio },
            class: if failure_age.is_some() {
                PathClass::FailedWhileAlive
            } else {
                PathClass::SurvivedWithMoney
            },
            failure_age,
            death_age: None,
            hustle_activation_age: None,
            spending_reduced: false,
            went_lean: false,
            balances: vec![min_portfolio],
            trajectory: Vec::new(),
        }
    }

    #[test]
    fn failure_examples_are_ordered_by_failure_age() {
        let outcomes = vec![
            outcome(0, 500_000.0, None),
            outcome(1, 0.0, Some(80)),
            outcome(2, 0.0, Some(71)),
            outcome(3, 0.0, Some(80)),
        ];
        let examples = failure_examples(&outcomes);
        let order: Vec<usize> = examples.iter().map(|e| e.index).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn close_calls_skip_comfortable_and_depleted_paths() {
        let outcomes = vec![
            outcome(0, 450_000.0, None),
            outcome(1, 120_000.0, None),
            outcome(2, 0.0, Some(70)),
            outcome(3, 40_000.0, None),
        ];
        let calls = close_calls(&outcomes);
        let order: Vec<usize> = calls.iter().map(|e| e.index).collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn example_lists_are_capped() {
        let outcomes: Vec<PathOutcome> = (0..100).map(|i| outcome(i, 0.0, Some(60))).collect();
        assert_eq!(failure_examples(&outcomes).len(), EXAMPLE_PATHS);
    }

    #[test]
    fn simulate_response_serializes_camel_case() {
        let params = SimulationParameters::default();
        let report = run(&params, RunMode::MonteCarlo { paths: 50 }, &RunOptions::default())
            .expect("default run succeeds");
        let response = SimulateResponse::new(&params, &report, false);
        let json = serde_json::to_value(&response).expect("serializes");

        assert_eq!(json["mode"]["mode"], "monte-carlo");
        assert_eq!(json["completedPaths"], 50);
        assert_eq!(json["interrupted"], false);
        assert!(json["aggregate"]["successRate"].is_number());
        assert!(json["failureExamples"].is_array());
        assert!(json.get("paths").is_none());
        assert_eq!(json["parameters"]["startingPortfolio"], 1_200_000.0);
    }
}
