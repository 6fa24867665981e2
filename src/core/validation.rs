use super::error::{SimError, SimResult};
use super::types::{IncomeOverlap, MAX_AGE, SimulationParameters};

/// Checks every invariant that does not depend on the run mode.
pub fn validate_parameters(params: &SimulationParameters) -> SimResult<()> {
    non_negative("startingPortfolio", params.starting_portfolio)?;
    non_negative("annualExpenses", params.annual_expenses)?;
    finite("expectedReturn", params.expected_return)?;
    finite("inflation", params.inflation)?;
    if params.inflation <= -1.0 {
        return Err(SimError::config("inflation", "must be greater than -1"));
    }
    non_negative("volatility", params.volatility)?;

    if let Some(end_age) = params.end_age {
        if end_age < params.start_age {
            return Err(SimError::config(
                "endAge",
                format!(
                    "end age {end_age} is before start age {}",
                    params.start_age
                ),
            ));
        }
        if end_age > MAX_AGE {
            return Err(SimError::config(
                "endAge",
                format!("end age {end_age} is beyond {MAX_AGE}"),
            ));
        }
    }

    for (i, phase) in params.income_phases.iter().enumerate() {
        non_negative(&format!("incomePhases[{i}].amount"), phase.amount)?;
        if phase.end_age < phase.start_age {
            return Err(SimError::config(
                format!("incomePhases[{i}]"),
                format!(
                    "end age {} is before start age {}",
                    phase.end_age, phase.start_age
                ),
            ));
        }
    }

    if params.income_overlap == IncomeOverlap::Reject {
        for (i, a) in params.income_phases.iter().enumerate() {
            for (j, b) in params.income_phases.iter().enumerate().skip(i + 1) {
                if a.start_age <= b.end_age && b.start_age <= a.end_age {
                    return Err(SimError::config(
                        format!("incomePhases[{j}]"),
                        format!(
                            "ages {}-{} overlap phase {i} ({}-{}); set incomeOverlap to `sum` to add them",
                            b.start_age, b.end_age, a.start_age, a.end_age
                        ),
                    ));
                }
            }
        }
    }

    for (i, windfall) in params.windfalls.iter().enumerate() {
        non_negative(&format!("windfalls[{i}].amount"), windfall.amount)?;
        if windfall.age < params.start_age {
            return Err(SimError::config(
                format!("windfalls[{i}].age"),
                format!(
                    "age {} is before start age {}",
                    windfall.age, params.start_age
                ),
            ));
        }
    }

    if let Some(hustle) = params.emergency_hustle {
        fraction("emergencyHustle.triggerDrawdown", hustle.trigger_drawdown)?;
        non_negative("emergencyHustle.extraIncome", hustle.extra_income)?;
    }

    if let Some(rule) = params.spending_rule {
        fraction("spendingRule.dropDrawdown", rule.drop_drawdown)?;
        fraction("spendingRule.recoveryFraction", rule.recovery_fraction)?;
        fraction("spendingRule.cutFraction", rule.cut_fraction)?;
        // Recovery must sit strictly above the breach level or the rule flaps.
        if rule.recovery_fraction <= 1.0 - rule.drop_drawdown {
            return Err(SimError::config(
                "spendingRule.recoveryFraction",
                format!(
                    "{} must exceed 1 - dropDrawdown ({})",
                    rule.recovery_fraction,
                    1.0 - rule.drop_drawdown
                ),
            ));
        }
        if let Some(lean) = rule.lean {
            non_negative("spendingRule.lean.floor", lean.floor)?;
            let reduced = rule.reduced_spending(params.annual_expenses);
            if lean.floor > reduced {
                return Err(SimError::config(
                    "spendingRule.lean.floor",
                    format!("{} exceeds the reduced spending level {reduced}", lean.floor),
                ));
            }
        }
    }

    Ok(())
}

fn finite(field: &str, value: f64) -> SimResult<()> {
    if !value.is_finite() {
        return Err(SimError::config(field, "must be a finite number"));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> SimResult<()> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(SimError::config(field, "must be >= 0"));
    }
    Ok(())
}

fn fraction(field: &str, value: f64) -> SimResult<()> {
    finite(field, value)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(SimError::config(field, "must be between 0 and 1"));
    }
    Ok(())
}
