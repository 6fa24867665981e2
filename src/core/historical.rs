use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::error::{SimError, SimResult};

const EMBEDDED_TABLE: &str = include_str!("../../data/historical_returns.json");

static TABLE: OnceLock<SimResult<HistoricalTable>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct RawTable {
    source: String,
    years: Vec<u16>,
    nominal_returns: Vec<f64>,
    inflation: Vec<f64>,
    real_returns: Vec<f64>,
}

/// Annual real market returns, one entry per calendar year, contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalTable {
    pub source: String,
    pub years: Vec<u16>,
    pub nominal_returns: Vec<f64>,
    pub inflation: Vec<f64>,
    pub real_returns: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRange {
    pub first: u16,
    pub last: u16,
}

impl YearRange {
    pub fn contains(&self, year: u16) -> bool {
        self.first <= year && year <= self.last
    }
}

pub fn table() -> SimResult<&'static HistoricalTable> {
    TABLE
        .get_or_init(|| HistoricalTable::parse(EMBEDDED_TABLE))
        .as_ref()
        .map_err(Clone::clone)
}

impl HistoricalTable {
    pub fn parse(json: &str) -> SimResult<Self> {
        let raw: RawTable = serde_json::from_str(json)
            .map_err(|err| SimError::config("historicalData", err.to_string()))?;

        let n = raw.years.len();
        if n == 0 {
            return Err(SimError::empty("historical table has no years"));
        }
        if raw.real_returns.len() != n || raw.nominal_returns.len() != n || raw.inflation.len() != n
        {
            return Err(SimError::config(
                "historicalData",
                "years and return columns differ in length",
            ));
        }
        if raw.years.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(SimError::config(
                "historicalData",
                "years must be contiguous and ascending",
            ));
        }
        if raw.real_returns.iter().any(|r| !r.is_finite() || *r <= -1.0) {
            return Err(SimError::config(
                "historicalData",
                "real returns must be finite and above -100%",
            ));
        }

        Ok(Self {
            source: raw.source,
            years: raw.years,
            nominal_returns: raw.nominal_returns,
            inflation: raw.inflation,
            real_returns: raw.real_returns,
        })
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn first_year(&self) -> u16 {
        self.years.first().copied().unwrap_or_default()
    }

    pub fn last_year(&self) -> u16 {
        self.years.last().copied().unwrap_or_default()
    }

    pub fn full_range(&self) -> YearRange {
        YearRange {
            first: self.first_year(),
            last: self.last_year(),
        }
    }

    /// `years` consecutive returns from `start_index`, continuing from the
    /// first year once the table runs out. The flag reports whether it did.
    pub fn window(&self, start_index: usize, years: usize) -> (Vec<f64>, bool) {
        let n = self.real_returns.len();
        let returns = (0..years)
            .map(|offset| self.real_returns[(start_index + offset) % n])
            .collect();
        (returns, start_index + years > n)
    }
}
