use super::error::{SimError, SimResult};
use super::mortality::MortalityModel;
use super::types::{
    AggregateResult, FinalValueBands, HistoricalOutcome, Horizon, MortalityConfig,
    MortalitySummary, OutcomeCounts, PathClass, PathOutcome, ReturnOrigin, YearBand,
};

/// Reduces completed paths to run-level statistics.
///
/// `mortality` is the configuration the paths were simulated with, `None`
/// when no death draws were made. Yearly bands are only produced when every
/// path carries a full balance column.
pub fn aggregate(
    outcomes: &[PathOutcome],
    horizon: &Horizon,
    mortality: Option<&MortalityConfig>,
) -> SimResult<AggregateResult> {
    if outcomes.is_empty() {
        return Err(SimError::empty("no completed paths to aggregate"));
    }
    let n = outcomes.len();
    let total = n as f64;

    let mut counts = OutcomeCounts::default();
    let mut depleted_after_death = 0usize;
    for outcome in outcomes {
        if outcome.depleted() {
            counts.depleted += 1;
        }
        match outcome.class {
            PathClass::FailedWhileAlive => counts.ran_out_of_money += 1,
            PathClass::DepletedAfterDeath => {
                depleted_after_death += 1;
                counts.died_with_money += 1;
            }
            PathClass::SurvivedWithMoney if outcome.death_age.is_some() => {
                counts.died_with_money += 1
            }
            PathClass::SurvivedWithMoney => counts.survived_to_end += 1,
        }
    }
    let survived_with_money = n - counts.depleted;

    let success_rate = match mortality {
        Some(_) => (survived_with_money + depleted_after_death) as f64 / total,
        None => survived_with_money as f64 / total,
    };

    let mut finals: Vec<f64> = outcomes.iter().map(|o| o.final_portfolio).collect();
    finals.sort_by(|a, b| a.total_cmp(b));
    let final_bands = FinalValueBands {
        p5: percentile_sorted(&finals, 5.0),
        p10: percentile_sorted(&finals, 10.0),
        p25: percentile_sorted(&finals, 25.0),
        p50: percentile_sorted(&finals, 50.0),
        p75: percentile_sorted(&finals, 75.0),
        p90: percentile_sorted(&finals, 90.0),
        p95: percentile_sorted(&finals, 95.0),
    };

    let hustle_ages: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| o.hustle_activation_age)
        .collect();
    let failure_ages: Vec<u32> = outcomes.iter().filter_map(|o| o.failure_age).collect();

    let mortality = mortality.map(|config| {
        let death_ages: Vec<u32> = outcomes.iter().filter_map(|o| o.death_age).collect();
        let model = MortalityModel::from_config(horizon.start_age, config);
        MortalitySummary {
            health_class: config.health_class,
            tech_scenario: config.tech_scenario,
            avg_death_age: mean_age(&death_ages),
            death_before_end_rate: death_ages.len() as f64 / total,
            theoretical_survival_to_end: model.survival(horizon.start_age, horizon.end_age),
            life_expectancy: model.life_expectancy(horizon.start_age, horizon.end_age),
        }
    });

    let historical = outcomes
        .iter()
        .map(|o| match o.origin {
            ReturnOrigin::Historical {
                start_year,
                wrapped,
            } => Some(HistoricalOutcome {
                start_year,
                wrapped,
                class: o.class,
                final_portfolio: o.final_portfolio,
                failure_age: o.failure_age,
                death_age: o.death_age,
            }),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();

    Ok(AggregateResult {
        paths: n,
        success_rate,
        real_failure_rate: counts.ran_out_of_money as f64 / total,
        failure_rate: counts.depleted as f64 / total,
        median_final: final_bands.p50,
        final_bands,
        yearly_bands: yearly_bands(outcomes, horizon),
        counts,
        avg_failure_age: mean_age(&failure_ages),
        hustle_activation_rate: hustle_ages.len() as f64 / total,
        avg_hustle_activation_age: mean_age(&hustle_ages),
        spending_reduction_rate: outcomes.iter().filter(|o| o.spending_reduced).count() as f64
            / total,
        lean_mode_rate: outcomes.iter().filter(|o| o.went_lean).count() as f64 / total,
        mortality,
        historical,
    })
}

fn yearly_bands(outcomes: &[PathOutcome], horizon: &Horizon) -> Vec<YearBand> {
    let years = horizon.years();
    if years == 0 || outcomes.iter().any(|o| o.balances.len() != years) {
        return Vec::new();
    }

    let mut column = vec![0.0; outcomes.len()];
    (0..years)
        .map(|year| {
            for (slot, outcome) in column.iter_mut().zip(outcomes) {
                *slot = outcome.balances[year];
            }
            column.sort_by(|a, b| a.total_cmp(b));
            YearBand {
                age: horizon.start_age + year as u32,
                p5: percentile_sorted(&column, 5.0),
                p10: percentile_sorted(&column, 10.0),
                p15: percentile_sorted(&column, 15.0),
                p25: percentile_sorted(&column, 25.0),
                p50: percentile_sorted(&column, 50.0),
                p75: percentile_sorted(&column, 75.0),
                p95: percentile_sorted(&column, 95.0),
            }
        })
        .collect()
}

fn mean_age(ages: &[u32]) -> Option<f64> {
    if ages.is_empty() {
        return None;
    }
    Some(ages.iter().map(|&a| a as f64).sum::<f64>() / ages.len() as f64)
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }

    let rank = (p / 100.0).clamp(0.0, 1.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
