use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SimError;
use super::scenarios::StressScenario;

pub const MAX_PATHS: u32 = 100_000;
/// Oldest age the life table covers; no horizon extends past it.
pub const MAX_AGE: u32 = 110;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthClass {
    Excellent,
    Average,
    Impaired,
}

impl HealthClass {
    pub const ALL: [HealthClass; 3] = [
        HealthClass::Excellent,
        HealthClass::Average,
        HealthClass::Impaired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HealthClass::Excellent => "excellent",
            HealthClass::Average => "average",
            HealthClass::Impaired => "impaired",
        }
    }
}

impl fmt::Display for HealthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthClass {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excellent" => Ok(HealthClass::Excellent),
            "average" => Ok(HealthClass::Average),
            "impaired" => Ok(HealthClass::Impaired),
            other => Err(SimError::config(
                "mortality.healthClass",
                format!("unknown health class `{other}` (expected excellent, average or impaired)"),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TechScenario {
    Conservative,
    Moderate,
    Optimistic,
}

impl TechScenario {
    pub const ALL: [TechScenario; 3] = [
        TechScenario::Conservative,
        TechScenario::Moderate,
        TechScenario::Optimistic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TechScenario::Conservative => "conservative",
            TechScenario::Moderate => "moderate",
            TechScenario::Optimistic => "optimistic",
        }
    }
}

impl fmt::Display for TechScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TechScenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(TechScenario::Conservative),
            "moderate" => Ok(TechScenario::Moderate),
            "optimistic" => Ok(TechScenario::Optimistic),
            other => Err(SimError::config(
                "mortality.techScenario",
                format!(
                    "unknown tech scenario `{other}` (expected conservative, moderate or optimistic)"
                ),
            )),
        }
    }
}

/// How the engine treats income phases whose age ranges intersect.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncomeOverlap {
    #[default]
    Reject,
    Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomePhase {
    #[serde(alias = "start_age")]
    pub start_age: u32,
    #[serde(alias = "end_age")]
    pub end_age: u32,
    pub amount: f64,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl IncomePhase {
    pub fn covers(&self, age: u32) -> bool {
        self.start_age <= age && age <= self.end_age
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Windfall {
    pub age: u32,
    pub amount: f64,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyHustle {
    /// Drawdown from the running peak at or beyond which the hustle starts.
    pub trigger_drawdown: f64,
    /// The hustle can only start while `age - start_age < window_years`.
    pub window_years: u32,
    pub extra_income: f64,
    pub duration_years: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeanMode {
    pub from_age: u32,
    /// Lowest spending a cut may reach once `from_age` is reached.
    pub floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingRule {
    pub drop_drawdown: f64,
    /// Share of the running peak the portfolio must regain to restore full spending.
    pub recovery_fraction: f64,
    pub cut_fraction: f64,
    pub lean: Option<LeanMode>,
}

impl SpendingRule {
    pub fn reduced_spending(&self, base_expenses: f64) -> f64 {
        base_expenses * (1.0 - self.cut_fraction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MortalityConfig {
    pub enabled: bool,
    pub health_class: HealthClass,
    pub tech_scenario: TechScenario,
}

impl Default for MortalityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_class: HealthClass::Average,
            tech_scenario: TechScenario::Moderate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub starting_portfolio: f64,
    pub annual_expenses: f64,
    pub start_age: u32,
    pub end_age: Option<u32>,
    pub expected_return: f64,
    pub inflation: f64,
    pub volatility: f64,
    pub income_phases: Vec<IncomePhase>,
    pub windfalls: Vec<Windfall>,
    pub emergency_hustle: Option<EmergencyHustle>,
    pub spending_rule: Option<SpendingRule>,
    pub mortality: MortalityConfig,
    pub income_overlap: IncomeOverlap,
    pub seed: u64,
}

impl SimulationParameters {
    pub fn income_at(&self, age: u32) -> f64 {
        self.income_phases
            .iter()
            .filter(|phase| phase.covers(age))
            .map(|phase| phase.amount)
            .sum()
    }

    pub fn windfall_at(&self, age: u32) -> f64 {
        self.windfalls
            .iter()
            .filter(|w| w.age == age)
            .map(|w| w.amount)
            .sum()
    }

    /// Real mean return implied by the nominal expectation and inflation.
    pub fn real_expected_return(&self) -> f64 {
        (1.0 + self.expected_return) / (1.0 + self.inflation) - 1.0
    }
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            starting_portfolio: 1_200_000.0,
            annual_expenses: 32_500.0,
            start_age: 47,
            end_age: Some(95),
            expected_return: 0.06,
            inflation: 0.02,
            volatility: 0.15,
            income_phases: vec![
                IncomePhase {
                    start_age: 47,
                    end_age: 57,
                    amount: 17_000.0,
                    label: Some("Rental + trading".to_string()),
                },
                IncomePhase {
                    start_age: 58,
                    end_age: 64,
                    amount: 10_000.0,
                    label: Some("Trading only".to_string()),
                },
                IncomePhase {
                    start_age: 65,
                    end_age: 95,
                    amount: 8_400.0,
                    label: Some("State pension".to_string()),
                },
            ],
            windfalls: vec![
                Windfall {
                    age: 55,
                    amount: 200_000.0,
                    label: Some("Inheritance".to_string()),
                },
                Windfall {
                    age: 58,
                    amount: 60_000.0,
                    label: Some("Rental liquidation".to_string()),
                },
            ],
            emergency_hustle: Some(EmergencyHustle {
                trigger_drawdown: 0.30,
                window_years: 5,
                extra_income: 40_000.0,
                duration_years: 3,
            }),
            spending_rule: Some(SpendingRule {
                drop_drawdown: 0.50,
                recovery_fraction: 0.60,
                // 32.5k -> 25k
                cut_fraction: 1.0 - 25_000.0 / 32_500.0,
                lean: Some(LeanMode {
                    from_age: 60,
                    floor: 17_000.0,
                }),
            }),
            mortality: MortalityConfig::default(),
            income_overlap: IncomeOverlap::Reject,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReturnOrigin {
    #[serde(rename_all = "camelCase")]
    Synthetic { mean: f64, volatility: f64 },
    #[serde(rename_all = "camelCase")]
    Historical { start_year: u16, wrapped: bool },
    #[serde(rename_all = "camelCase")]
    Stress { scenario: StressScenario },
}

/// Annual real returns, one per simulated year.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSequence {
    pub origin: ReturnOrigin,
    pub returns: Vec<f64>,
}

impl ReturnSequence {
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendingLevel {
    #[default]
    Normal,
    Reduced,
    Lean,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearState {
    pub age: u32,
    pub portfolio: f64,
    pub spending: f64,
    pub drawdown: f64,
    pub hustle_active: bool,
    pub alive: bool,
    pub spending_level: SpendingLevel,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathClass {
    FailedWhileAlive,
    DepletedAfterDeath,
    SurvivedWithMoney,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathOutcome {
    pub index: usize,
    pub origin: ReturnOrigin,
    pub final_portfolio: f64,
    pub min_portfolio: f64,
    pub class: PathClass,
    pub failure_age: Option<u32>,
    pub death_age: Option<u32>,
    pub hustle_activation_age: Option<u32>,
    pub spending_reduced: bool,
    pub went_lean: bool,
    #[serde(skip)]
    pub balances: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trajectory: Vec<YearState>,
}

impl PathOutcome {
    pub fn depleted(&self) -> bool {
        self.failure_age.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FinalValueBands {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearBand {
    pub age: u32,
    pub p5: f64,
    pub p10: f64,
    pub p15: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub survived_to_end: usize,
    pub died_with_money: usize,
    pub ran_out_of_money: usize,
    pub depleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MortalitySummary {
    pub health_class: HealthClass,
    pub tech_scenario: TechScenario,
    pub avg_death_age: Option<f64>,
    pub death_before_end_rate: f64,
    pub theoretical_survival_to_end: f64,
    pub life_expectancy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalOutcome {
    pub start_year: u16,
    pub wrapped: bool,
    pub class: PathClass,
    pub final_portfolio: f64,
    pub failure_age: Option<u32>,
    pub death_age: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub paths: usize,
    pub success_rate: f64,
    pub real_failure_rate: f64,
    pub failure_rate: f64,
    pub median_final: f64,
    pub final_bands: FinalValueBands,
    pub yearly_bands: Vec<YearBand>,
    pub counts: OutcomeCounts,
    pub avg_failure_age: Option<f64>,
    pub hustle_activation_rate: f64,
    pub avg_hustle_activation_age: Option<f64>,
    pub spending_reduction_rate: f64,
    pub lean_mode_rate: f64,
    pub mortality: Option<MortalitySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical: Option<Vec<HistoricalOutcome>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndAgeSource {
    Explicit,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Horizon {
    pub start_age: u32,
    pub end_age: u32,
    pub source: EndAgeSource,
}

impl Horizon {
    pub fn years(&self) -> usize {
        self.end_age.saturating_sub(self.start_age) as usize
    }

    pub fn ages(&self) -> std::ops::Range<u32> {
        self.start_age..self.end_age
    }
}
