use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use super::error::{SimError, SimResult};
use super::types::{HealthClass, MAX_AGE, MortalityConfig, TechScenario};

const TABLE_FIRST_AGE: u32 = 47;

/// Deaths per 1000, ages 47..=110. Ages 96 onward are an extrapolated plateau.
const BASE_DEATHS_PER_1000: [f64; 64] = [
    3.8, 4.1, 4.4, 4.8, 5.2, 5.7, 6.2, 6.8, 7.5, 8.3, // 47-56
    9.2, 10.2, 11.3, 12.5, 13.9, 15.4, 17.1, 19.0, 21.1, 23.4, // 57-66
    26.0, 28.9, 32.1, 35.7, 39.7, 44.2, 49.2, 54.8, 61.1, 68.1, // 67-76
    75.9, 84.6, 94.3, 105.1, 117.1, 130.5, 145.4, 162.0, 180.5, 201.0, // 77-86
    223.8, 249.2, 277.5, 308.9, 343.8, 382.4, 425.2, 472.5, 525.0, 550.0, // 87-96
    572.0, 592.0, 610.0, 625.0, 638.0, 650.0, 660.0, 668.0, 675.0, 680.0, // 97-106
    683.0, 685.0, 685.0, 685.0, // 107-110
];

const BEYOND_TABLE_RATE: f64 = 0.5;

const HEALTH_CONVERGENCE_START: u32 = 45;
const HEALTH_CONVERGENCE_END: u32 = 100;

/// Resolution stops at the first age whose cumulative survival falls below this.
pub const SURVIVAL_CUTOFF: f64 = 0.01;
pub const MIN_HORIZON_YEARS: u32 = 10;
pub const MILESTONE_AGES: [u32; 8] = [75, 80, 85, 90, 95, 100, 105, 110];

pub fn base_death_rate(age: u32) -> f64 {
    if age > MAX_AGE {
        return BEYOND_TABLE_RATE;
    }
    let index = age.saturating_sub(TABLE_FIRST_AGE) as usize;
    BASE_DEATHS_PER_1000[index] / 1000.0
}

impl HealthClass {
    /// Mortality ratio against the table at age 45 and below.
    pub fn base_ratio(self) -> f64 {
        match self {
            HealthClass::Excellent => 0.30,
            HealthClass::Average => 1.0,
            HealthClass::Impaired => 1.50,
        }
    }

    /// Ratio converges linearly to 1.0 by age 100.
    pub fn ratio_at(self, age: u32) -> f64 {
        let base = self.base_ratio();
        let span = (HEALTH_CONVERGENCE_END - HEALTH_CONVERGENCE_START) as f64;
        let progress = (age.saturating_sub(HEALTH_CONVERGENCE_START) as f64 / span).min(1.0);
        base + (1.0 - base) * progress
    }
}

impl TechScenario {
    pub fn improvement_multiplier(self) -> f64 {
        match self {
            TechScenario::Conservative => 0.5,
            TechScenario::Moderate => 1.0,
            TechScenario::Optimistic => 1.5,
        }
    }

    pub fn annual_improvement(self, age: u32) -> f64 {
        let band = match age {
            0..65 => 0.015,
            65..85 => 0.012,
            85..100 => 0.006,
            _ => 0.003,
        };
        band * self.improvement_multiplier()
    }
}

/// Mortality for one person, with medical progress compounded from `anchor_age`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MortalityModel {
    pub anchor_age: u32,
    pub health_class: HealthClass,
    pub tech_scenario: TechScenario,
}

impl MortalityModel {
    pub fn new(anchor_age: u32, health_class: HealthClass, tech_scenario: TechScenario) -> Self {
        Self {
            anchor_age,
            health_class,
            tech_scenario,
        }
    }

    pub fn from_config(anchor_age: u32, config: &MortalityConfig) -> Self {
        Self::new(anchor_age, config.health_class, config.tech_scenario)
    }

    pub fn death_probability(&self, age: u32) -> f64 {
        let elapsed = age.saturating_sub(self.anchor_age) as i32;
        let tech = (1.0 - self.tech_scenario.annual_improvement(age)).powi(elapsed);
        (base_death_rate(age) * self.health_class.ratio_at(age) * tech).clamp(0.0, 1.0)
    }

    /// Probability of being alive at `target_age` given alive at `from_age`.
    pub fn survival(&self, from_age: u32, target_age: u32) -> f64 {
        (from_age..target_age)
            .map(|age| 1.0 - self.death_probability(age))
            .product()
    }

    pub fn death_curve(&self, ages: Range<u32>) -> Vec<f64> {
        ages.map(|age| self.death_probability(age)).collect()
    }

    /// Expected years lived within `from_age..to_age`.
    pub fn life_expectancy(&self, from_age: u32, to_age: u32) -> f64 {
        let mut survival = 1.0;
        let mut total = 0.0;
        for age in from_age..to_age {
            total += survival;
            survival *= 1.0 - self.death_probability(age);
        }
        total
    }
}

/// Anchored at `age` itself, so `tech_scenario` contributes no elapsed-year
/// improvement. Use [`MortalityModel`] to compound improvement from a start age.
pub fn annual_death_probability(
    age: u32,
    health_class: HealthClass,
    tech_scenario: TechScenario,
) -> f64 {
    MortalityModel::new(age, health_class, tech_scenario).death_probability(age)
}

pub fn survival_probability(
    start_age: u32,
    target_age: u32,
    health_class: HealthClass,
    tech_scenario: TechScenario,
) -> f64 {
    MortalityModel::new(start_age, health_class, tech_scenario).survival(start_age, target_age)
}

pub fn resolve_end_age(
    start_age: u32,
    health_class: HealthClass,
    tech_scenario: TechScenario,
) -> SimResult<u32> {
    if start_age >= MAX_AGE {
        return Err(SimError::config(
            "startAge",
            format!("start age {start_age} leaves no horizon below {MAX_AGE}"),
        ));
    }

    let model = MortalityModel::new(start_age, health_class, tech_scenario);
    let mut survival = 1.0;
    let mut crossing = MAX_AGE;
    for age in start_age..MAX_AGE {
        survival *= 1.0 - model.death_probability(age);
        if survival < SURVIVAL_CUTOFF {
            crossing = age + 1;
            break;
        }
    }

    let end_age = crossing.max(start_age + MIN_HORIZON_YEARS).min(MAX_AGE);
    debug!(
        start_age,
        %health_class,
        %tech_scenario,
        crossing,
        end_age,
        "resolved end age"
    );
    Ok(end_age)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurvivalMilestone {
    pub age: u32,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndAgeResolution {
    pub start_age: u32,
    pub end_age: u32,
    pub health_class: HealthClass,
    pub tech_scenario: TechScenario,
    pub life_expectancy: f64,
    pub survival_at_end: f64,
    pub milestones: Vec<SurvivalMilestone>,
}

pub fn end_age_query(start_age: u32, mortality: &MortalityConfig) -> SimResult<EndAgeResolution> {
    let end_age = resolve_end_age(start_age, mortality.health_class, mortality.tech_scenario)?;
    let model = MortalityModel::from_config(start_age, mortality);

    let milestones = MILESTONE_AGES
        .iter()
        .filter(|&&age| age > start_age)
        .map(|&age| SurvivalMilestone {
            age,
            probability: model.survival(start_age, age),
        })
        .collect();

    Ok(EndAgeResolution {
        start_age,
        end_age,
        health_class: mortality.health_class,
        tech_scenario: mortality.tech_scenario,
        life_expectancy: model.life_expectancy(start_age, end_age),
        survival_at_end: model.survival(start_age, end_age),
        milestones,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-12;

    fn health_strategy() -> impl Strategy<Value = HealthClass> {
        prop::sample::select(HealthClass::ALL.to_vec())
    }

    fn tech_strategy() -> impl Strategy<Value = TechScenario> {
        prop::sample::select(TechScenario::ALL.to_vec())
    }

    #[test]
    fn base_rates_extend_flat_below_and_jump_above_the_table() {
        assert!((base_death_rate(30) - 0.0038).abs() < EPS);
        assert!((base_death_rate(47) - 0.0038).abs() < EPS);
        assert!((base_death_rate(95) - 0.525).abs() < EPS);
        assert!((base_death_rate(110) - 0.685).abs() < EPS);
        assert!((base_death_rate(111) - 0.5).abs() < EPS);
    }

    #[test]
    fn health_ratio_converges_to_table_at_one_hundred() {
        assert!((HealthClass::Excellent.ratio_at(40) - 0.30).abs() < EPS);
        assert!((HealthClass::Excellent.ratio_at(45) - 0.30).abs() < EPS);
        assert!((HealthClass::Impaired.ratio_at(100) - 1.0).abs() < EPS);
        assert!((HealthClass::Impaired.ratio_at(105) - 1.0).abs() < EPS);
        let midway = HealthClass::Excellent.ratio_at(72);
        assert!((midway - (0.30 + 0.70 * 27.0 / 55.0)).abs() < EPS);
    }

    #[test]
    fn three_argument_contract_has_no_elapsed_improvement() {
        let q = annual_death_probability(70, HealthClass::Average, TechScenario::Optimistic);
        assert!((q - base_death_rate(70)).abs() < EPS);
    }

    #[test]
    fn anchored_model_compounds_improvement_since_start() {
        let model = MortalityModel::new(60, HealthClass::Average, TechScenario::Moderate);
        let expected = base_death_rate(70) * (1.0 - 0.012f64).powi(10);
        assert!((model.death_probability(70) - expected).abs() < EPS);
    }

    #[test]
    fn resolved_end_age_for_excellent_moderate_from_47() {
        let end_age = resolve_end_age(47, HealthClass::Excellent, TechScenario::Moderate)
            .expect("valid start age");
        assert!((98..=100).contains(&end_age), "got {end_age}");
    }

    #[test]
    fn average_and_impaired_resolve_earlier() {
        let average = resolve_end_age(47, HealthClass::Average, TechScenario::Moderate).unwrap();
        let impaired = resolve_end_age(47, HealthClass::Impaired, TechScenario::Moderate).unwrap();
        assert_eq!(average, 97);
        assert_eq!(impaired, 96);
    }

    #[test]
    fn late_start_hits_the_minimum_horizon_and_the_cap() {
        let end_age = resolve_end_age(104, HealthClass::Impaired, TechScenario::Conservative)
            .expect("valid start age");
        assert_eq!(end_age, MAX_AGE);
    }

    #[test]
    fn start_at_table_end_is_a_configuration_error() {
        let err = resolve_end_age(110, HealthClass::Average, TechScenario::Moderate)
            .expect_err("no horizon left");
        assert_eq!(err.field(), Some("startAge"));
    }

    #[test]
    fn query_reports_milestones_after_start() {
        let config = MortalityConfig {
            enabled: true,
            health_class: HealthClass::Average,
            tech_scenario: TechScenario::Moderate,
        };
        let resolution = end_age_query(82, &config).expect("valid start age");
        let ages: Vec<u32> = resolution.milestones.iter().map(|m| m.age).collect();
        assert_eq!(ages, vec![85, 90, 95, 100, 105, 110]);
        assert_eq!(resolution.end_age, 96);
        assert!(resolution.survival_at_end < SURVIVAL_CUTOFF);
        assert!(resolution.life_expectancy > 0.0);
        assert!(resolution.life_expectancy <= (resolution.end_age - 82) as f64);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_death_probability_is_a_probability(
            anchor in 0u32..120,
            offset in 0u32..60,
            health in health_strategy(),
            tech in tech_strategy(),
        ) {
            let q = MortalityModel::new(anchor, health, tech).death_probability(anchor + offset);
            prop_assert!((0.0..=1.0).contains(&q));
        }

        #[test]
        fn prop_survival_starts_at_one_and_never_increases(
            start in 20u32..110,
            span in 0u32..40,
            health in health_strategy(),
            tech in tech_strategy(),
        ) {
            prop_assert_eq!(survival_probability(start, start, health, tech), 1.0);
            let mut previous = 1.0;
            for target in start..=start + span {
                let s = survival_probability(start, target, health, tech);
                prop_assert!(s <= previous + EPS);
                prop_assert!(s >= 0.0);
                previous = s;
            }
        }

        #[test]
        fn prop_end_age_is_ordered_by_health_and_tech(start in 20u32..110, tech in tech_strategy()) {
            let excellent = resolve_end_age(start, HealthClass::Excellent, tech).unwrap();
            let average = resolve_end_age(start, HealthClass::Average, tech).unwrap();
            let impaired = resolve_end_age(start, HealthClass::Impaired, tech).unwrap();
            prop_assert!(excellent >= average && average >= impaired);
            prop_assert!(excellent <= MAX_AGE);
            prop_assert!(impaired >= (start + MIN_HORIZON_YEARS).min(MAX_AGE));
        }

        #[test]
        fn prop_end_age_is_ordered_by_tech(start in 20u32..110, health in health_strategy()) {
            let optimistic = resolve_end_age(start, health, TechScenario::Optimistic).unwrap();
            let moderate = resolve_end_age(start, health, TechScenario::Moderate).unwrap();
            let conservative = resolve_end_age(start, health, TechScenario::Conservative).unwrap();
            prop_assert!(optimistic >= moderate && moderate >= conservative);
        }
    }
}
