use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand_distr::StandardNormal;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use super::error::{SimError, SimResult};
use super::historical::{self, HistoricalTable, YearRange};
use super::rng::{Stream, path_rng};
use super::types::{ReturnOrigin, ReturnSequence, SimulationParameters};

pub const RETURN_FLOOR: f64 = -0.95;
pub const RETURN_CEILING: f64 = 2.5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StressScenario {
    #[serde(alias = "japan_lost_decades")]
    JapanLostDecades,
    #[serde(alias = "sequence_risk_early_crash")]
    SequenceRiskEarlyCrash,
    #[serde(alias = "climate_transition_shock")]
    ClimateTransitionShock,
    #[serde(rename = "stagflation-1970s", alias = "stagflation_1970s")]
    Stagflation1970s,
    #[serde(alias = "great_depression")]
    GreatDepression,
    #[serde(alias = "secular_stagnation")]
    SecularStagnation,
    #[serde(alias = "rising_rates_regime")]
    RisingRatesRegime,
    #[serde(alias = "euro-crisis-finland", alias = "euro_crisis_finland")]
    EuroCrisis,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressScenarioInfo {
    pub id: StressScenario,
    pub name: &'static str,
    pub description: &'static str,
    pub likelihood: &'static str,
    pub historical_precedent: &'static str,
    pub severity: Severity,
}

impl StressScenario {
    pub const ALL: [StressScenario; 8] = [
        StressScenario::JapanLostDecades,
        StressScenario::SequenceRiskEarlyCrash,
        StressScenario::ClimateTransitionShock,
        StressScenario::Stagflation1970s,
        StressScenario::GreatDepression,
        StressScenario::SecularStagnation,
        StressScenario::RisingRatesRegime,
        StressScenario::EuroCrisis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StressScenario::JapanLostDecades => "japan-lost-decades",
            StressScenario::SequenceRiskEarlyCrash => "sequence-risk-early-crash",
            StressScenario::ClimateTransitionShock => "climate-transition-shock",
            StressScenario::Stagflation1970s => "stagflation-1970s",
            StressScenario::GreatDepression => "great-depression",
            StressScenario::SecularStagnation => "secular-stagnation",
            StressScenario::RisingRatesRegime => "rising-rates-regime",
            StressScenario::EuroCrisis => "euro-crisis",
        }
    }

    pub fn info(self) -> StressScenarioInfo {
        let (name, description, likelihood, historical_precedent, severity) = match self {
            StressScenario::JapanLostDecades => (
                "Japan Lost Decades",
                "A 35-45% crash, then near-zero real returns for two decades before a slow recovery",
                "Low for diversified global equity",
                "Japan 1989-2023",
                Severity::Extreme,
            ),
            StressScenario::SequenceRiskEarlyCrash => (
                "Sequence of Returns Risk (Early Crash)",
                "Crash of -35%, -15%, -10% in the first three years, then normal returns",
                "Moderate (every 20-30 years)",
                "1929, 2000 dot-com, 2008 GFC",
                Severity::High,
            ),
            StressScenario::ClimateTransitionShock => (
                "Climate Transition Shock",
                "Ten normal years, then a permanent shift to 2-3% real returns",
                "Unknown but increasing concern",
                "Novel scenario",
                Severity::High,
            ),
            StressScenario::Stagflation1970s => (
                "1970s Stagflation Redux",
                "A decade of near-zero real returns under high inflation, then recovery",
                "Low-moderate (policy dependent)",
                "1966-1982 US markets",
                Severity::High,
            ),
            StressScenario::GreatDepression => (
                "Great Depression Sequence",
                "-50% then -30%, eight years of 0-3% recovery, then normal returns",
                "Very low (banking and regulatory changes)",
                "1929-1939",
                Severity::Extreme,
            ),
            StressScenario::SecularStagnation => (
                "Secular Stagnation",
                "Permanently lower 3-4% real returns from the first year",
                "Moderate (demographics, debt)",
                "Japan post-1990, some EU economies",
                Severity::Moderate,
            ),
            StressScenario::RisingRatesRegime => (
                "Rising Rates Regime Shift",
                "Five years of returns 3 points lower with 30% more volatility, then normal",
                "Moderate-high near term",
                "1970s, 2022 onward",
                Severity::Moderate,
            ),
            StressScenario::EuroCrisis => (
                "Euro Crisis / Currency Collapse",
                "A -30% shock and five years of inflation-eroded returns, then a volatile recovery",
                "Low but non-zero for the eurozone",
                "Greece 2010-2015, Argentina 2001",
                Severity::High,
            ),
        };
        StressScenarioInfo {
            id: self,
            name,
            description,
            likelihood,
            historical_precedent,
            severity,
        }
    }
}

impl fmt::Display for StressScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressScenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase().replace('_', "-");
        if token == "euro-crisis-finland" {
            return Ok(StressScenario::EuroCrisis);
        }
        StressScenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == token)
            .ok_or_else(|| SimError::config("scenario", format!("unknown stress scenario `{s}`")))
    }
}

/// Per-path regime values drawn once before the yearly returns.
#[derive(Debug, Clone, Copy)]
struct Regime {
    crash: f64,
    shifted_mean: f64,
}

impl Regime {
    fn draw(scenario: StressScenario, rng: &mut Pcg64Mcg) -> Self {
        let (crash, shifted_mean) = match scenario {
            StressScenario::JapanLostDecades => (rng.gen_range(-0.45..-0.35), 0.0),
            StressScenario::ClimateTransitionShock => (0.0, rng.gen_range(0.02..0.03)),
            StressScenario::SecularStagnation => (0.0, rng.gen_range(0.03..0.04)),
            _ => (0.0, 0.0),
        };
        Self {
            crash,
            shifted_mean,
        }
    }
}

fn normal(rng: &mut Pcg64Mcg, mean: f64, sd: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + sd * z
}

/// Real return for `year` of a stress path. `mean` and `sd` are the
/// investor's own real expectations, used by the scenarios that revert to them.
fn stress_year(
    scenario: StressScenario,
    year: usize,
    regime: Regime,
    mean: f64,
    sd: f64,
    rng: &mut Pcg64Mcg,
) -> f64 {
    let r = match scenario {
        StressScenario::JapanLostDecades => match year {
            0 => regime.crash,
            1..20 => normal(rng, 0.01, 0.18),
            _ => normal(rng, 0.035, 0.15),
        },
        StressScenario::SequenceRiskEarlyCrash => match year {
            0 => normal(rng, -0.35, 0.05),
            1 => normal(rng, -0.15, 0.05),
            2 => normal(rng, -0.10, 0.05),
            _ => normal(rng, mean, sd),
        },
        StressScenario::ClimateTransitionShock => match year {
            0..10 => normal(rng, mean, sd),
            _ => normal(rng, regime.shifted_mean, 0.12),
        },
        StressScenario::Stagflation1970s => match year {
            0..10 => normal(rng, 0.005, 0.16),
            _ => normal(rng, 0.055, 0.15),
        },
        StressScenario::GreatDepression => match year {
            0 => normal(rng, -0.50, 0.10),
            1 => normal(rng, -0.30, 0.10),
            2..10 => normal(rng, 0.015, 0.12),
            _ => normal(rng, 0.06, 0.15),
        },
        StressScenario::SecularStagnation => normal(rng, regime.shifted_mean, 0.14),
        StressScenario::RisingRatesRegime => match year {
            0..5 => normal(rng, mean - 0.03, sd * 1.3),
            _ => normal(rng, mean, sd),
        },
        StressScenario::EuroCrisis => match year {
            0 => normal(rng, -0.30, 0.05),
            1..6 => normal(rng, -0.03, 0.18),
            _ => normal(rng, mean * 0.9, sd * 1.1),
        },
    };
    r.clamp(RETURN_FLOOR, RETURN_CEILING)
}

/// Where a run's return sequences come from. Sequences are produced on
/// demand by path index so generation can run inside the path workers.
#[derive(Debug, Clone)]
pub enum ScenarioSource {
    Stochastic {
        mean: f64,
        volatility: f64,
        inflation: f64,
        paths: usize,
    },
    Historical {
        table: &'static HistoricalTable,
        start_indices: Vec<usize>,
    },
    Stress {
        scenario: StressScenario,
        real_mean: f64,
        volatility: f64,
        paths: usize,
    },
}

impl ScenarioSource {
    pub fn stochastic(params: &SimulationParameters, paths: usize) -> Self {
        ScenarioSource::Stochastic {
            mean: params.expected_return,
            volatility: params.volatility,
            inflation: params.inflation,
            paths,
        }
    }

    pub fn historical(range: Option<YearRange>) -> SimResult<Self> {
        let table = historical::table()?;
        let range = match range {
            Some(range) if range.first > range.last => {
                return Err(SimError::config(
                    "range",
                    format!("first year {} is after last year {}", range.first, range.last),
                ));
            }
            Some(range) => range,
            None => table.full_range(),
        };

        let start_indices: Vec<usize> = table
            .years
            .iter()
            .enumerate()
            .filter(|(_, year)| range.contains(**year))
            .map(|(index, _)| index)
            .collect();
        if start_indices.is_empty() {
            return Err(SimError::empty(format!(
                "no historical start years between {} and {} (data covers {}-{})",
                range.first,
                range.last,
                table.first_year(),
                table.last_year()
            )));
        }

        Ok(ScenarioSource::Historical {
            table,
            start_indices,
        })
    }

    pub fn stress(scenario: StressScenario, params: &SimulationParameters, paths: usize) -> Self {
        ScenarioSource::Stress {
            scenario,
            real_mean: params.real_expected_return(),
            volatility: params.volatility,
            paths,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ScenarioSource::Stochastic { paths, .. } | ScenarioSource::Stress { paths, .. } => {
                *paths
            }
            ScenarioSource::Historical { start_indices, .. } => start_indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sequence(&self, index: usize, years: usize, seed: u64) -> ReturnSequence {
        match self {
            ScenarioSource::Stochastic {
                mean,
                volatility,
                inflation,
                ..
            } => {
                let mut rng = path_rng(seed, Stream::Returns, index);
                let returns = (0..years)
                    .map(|_| {
                        let nominal =
                            normal(&mut rng, *mean, *volatility).clamp(RETURN_FLOOR, RETURN_CEILING);
                        (1.0 + nominal) / (1.0 + inflation) - 1.0
                    })
                    .collect();
                ReturnSequence {
                    origin: ReturnOrigin::Synthetic {
                        mean: *mean,
                        volatility: *volatility,
                    },
                    returns,
                }
            }
            ScenarioSource::Historical {
                table,
                start_indices,
            } => {
                let start_index = start_indices[index];
                let (returns, wrapped) = table.window(start_index, years);
                ReturnSequence {
                    origin: ReturnOrigin::Historical {
                        start_year: table.years[start_index],
                        wrapped,
                    },
                    returns,
                }
            }
            ScenarioSource::Stress {
                scenario,
                real_mean,
                volatility,
                ..
            } => {
                let regime = Regime::draw(*scenario, &mut path_rng(seed, Stream::StressRegime, index));
                let mut rng = path_rng(seed, Stream::Returns, index);
                let returns = (0..years)
                    .map(|year| stress_year(*scenario, year, regime, *real_mean, *volatility, &mut rng))
                    .collect();
                ReturnSequence {
                    origin: ReturnOrigin::Stress {
                        scenario: *scenario,
                    },
                    returns,
                }
            }
        }
    }

    pub fn generate_all(&self, years: usize, seed: u64) -> Vec<ReturnSequence> {
        (0..self.len())
            .map(|index| self.sequence(index, years, seed))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> SimulationParameters {
        SimulationParameters::default()
    }

    #[test]
    fn stochastic_paths_are_reproducible_and_distinct() {
        let source = ScenarioSource::stochastic(&params(), 4);
        let first = source.generate_all(48, 42);
        let second = source.generate_all(48, 42);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|s| s.len() == 48));
        assert_ne!(first[0].returns, first[1].returns);
        assert_ne!(first[0].returns, source.sequence(0, 48, 43).returns);
    }

    #[test]
    fn zero_volatility_yields_the_deflated_mean() {
        let mut p = params();
        p.volatility = 0.0;
        let seq = ScenarioSource::stochastic(&p, 1).sequence(0, 5, 1);
        let expected = 1.06 / 1.02 - 1.0;
        assert!(seq.returns.iter().all(|r| (r - expected).abs() < 1e-12));
    }

    #[test]
    fn stochastic_nominal_draws_are_clamped_before_deflation() {
        let mut p = params();
        p.volatility = 50.0;
        p.inflation = 0.0;
        let seq = ScenarioSource::stochastic(&p, 1).sequence(0, 200, 9);
        assert!(seq.returns.iter().all(|r| (RETURN_FLOOR..=RETURN_CEILING).contains(r)));
        assert!(seq.returns.iter().any(|r| *r == RETURN_FLOOR));
    }

    #[test]
    fn historical_source_yields_one_sequence_per_start_year() {
        let source = ScenarioSource::historical(None).expect("embedded data");
        assert_eq!(source.len(), 151);
        let sequences = source.generate_all(48, 0);
        let wrapped = sequences
            .iter()
            .filter(|s| matches!(s.origin, ReturnOrigin::Historical { wrapped: true, .. }))
            .count();
        // Start years after 1975 need more than the remaining data.
        assert_eq!(wrapped, 47);
    }

    #[test]
    fn historical_range_filters_and_rejects_empty_selections() {
        let source = ScenarioSource::historical(Some(YearRange {
            first: 1929,
            last: 1933,
        }))
        .expect("years in range");
        assert_eq!(source.len(), 5);
        let seq = source.sequence(0, 10, 0);
        assert_eq!(
            seq.origin,
            ReturnOrigin::Historical {
                start_year: 1929,
                wrapped: false
            }
        );

        let err = ScenarioSource::historical(Some(YearRange {
            first: 1800,
            last: 1850,
        }))
        .expect_err("no data before 1872");
        assert!(matches!(err, SimError::EmptyInput(_)));

        let err = ScenarioSource::historical(Some(YearRange {
            first: 1950,
            last: 1940,
        }))
        .expect_err("inverted range");
        assert_eq!(err.field(), Some("range"));
    }

    #[test]
    fn japan_scenario_opens_with_a_crash_in_band() {
        let source = ScenarioSource::stress(StressScenario::JapanLostDecades, &params(), 32);
        for seq in source.generate_all(30, 5) {
            assert!((-0.45..-0.35).contains(&seq.returns[0]), "{}", seq.returns[0]);
        }
    }

    #[test]
    fn every_scenario_token_round_trips_and_has_metadata() {
        for scenario in StressScenario::ALL {
            assert_eq!(scenario.as_str().parse::<StressScenario>(), Ok(scenario));
            let json = serde_json::to_string(&scenario).expect("serializes");
            assert_eq!(json, format!("\"{}\"", scenario.as_str()));
            assert!(!scenario.info().name.is_empty());
        }
        assert_eq!(
            "euro_crisis_finland".parse::<StressScenario>(),
            Ok(StressScenario::EuroCrisis)
        );
        assert!("dotcom".parse::<StressScenario>().is_err());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_stress_paths_are_bounded_and_seeded(
            scenario_index in 0usize..8,
            seed in any::<u64>(),
            years in 1usize..70,
        ) {
            let scenario = StressScenario::ALL[scenario_index];
            let source = ScenarioSource::stress(scenario, &params(), 3);
            let a = source.sequence(2, years, seed);
            let b = source.sequence(2, years, seed);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), years);
            prop_assert!(a.returns.iter().all(|r| (RETURN_FLOOR..=RETURN_CEILING).contains(r)));
        }
    }
}
