//! Usage accounting for backend round-trips.
//!
//! Adapters report input/output unit counts per round-trip; the executor
//! folds them into one [`UsageInfo`] per call, across every tool round and
//! every attempt (failed ones included).

use serde::{Deserialize, Serialize};

/// Per-backend pricing for cost estimation (USD per 1M units).
///
/// Adapters that know their rates pass them to [`UsageInfo::priced`]. The
/// default prices nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Estimate cost for the given unit counts.
    pub fn estimate_cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1_000_000.0) * self.input_per_million
            + (output_units as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Units consumed and cost incurred by one or more backend round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Backend identifier. Merged usage from several backends joins the
    /// distinct ids with `+`.
    pub backend: String,
    pub input_units: u64,
    pub output_units: u64,
    /// Cost in USD.
    pub cost: f64,
}

impl UsageInfo {
    /// Unit counts with no cost attached.
    pub fn new(backend: impl Into<String>, input_units: u64, output_units: u64) -> Self {
        Self {
            backend: backend.into(),
            input_units,
            output_units,
            cost: 0.0,
        }
    }

    /// Usage with the cost derived from explicit pricing.
    pub fn priced(
        backend: impl Into<String>,
        input_units: u64,
        output_units: u64,
        pricing: &Pricing,
    ) -> Self {
        Self {
            backend: backend.into(),
            input_units,
            output_units,
            cost: pricing.estimate_cost(input_units, output_units),
        }
    }

    /// Replace the derived cost with an adapter-reported one.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Add another round-trip's usage into this one.
    pub fn merge(&mut self, other: &UsageInfo) {
        self.input_units = self.input_units.saturating_add(other.input_units);
        self.output_units = self.output_units.saturating_add(other.output_units);
        self.cost += other.cost;
        if other.backend.is_empty() || self.backend.split('+').any(|b| b == other.backend) {
            return;
        }
        if self.backend.is_empty() {
            self.backend = other.backend.clone();
        } else {
            self.backend.push('+');
            self.backend.push_str(&other.backend);
        }
    }

    pub fn total_units(&self) -> u64 {
        self.input_units.saturating_add(self.output_units)
    }

    pub fn is_empty(&self) -> bool {
        self.total_units() == 0 && self.cost == 0.0
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "units: {} in + {} out = {} total, est. cost: ${:.4}",
            self.input_units,
            self.output_units,
            self.total_units(),
            self.cost,
        )
    }
}
