use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::GroupSizes;
use crate::error::SimError;

const DIVISIBILITY_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborMode {
    #[default]
    None,
    Random,
}

impl NeighborMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NeighborMode::None => "none",
            NeighborMode::Random => "random",
        }
    }
}

impl FromStr for NeighborMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            m if m.eq_ignore_ascii_case("none") => Ok(NeighborMode::None),
            m if m.eq_ignore_ascii_case("random") => Ok(NeighborMode::Random),
            other => Err(SimError::InvalidArgument(format!(
                "unrecognized neighbor mode '{}' (expected 'none' or 'random')",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub total_cells: usize,
    pub n_samples: usize,
    pub n_timepoints: usize,
    pub hours_per_timepoint: f64,
    pub dt: f64,
    pub n_lineages: usize,
    pub tfs_per_lineage: usize,
    pub lineage_threshold: f64,
    pub dropout_mid: f64,
    pub dropout_scale: f64,
    pub x_max: f64,
    pub hill_k: f64,
    pub hill_n: f64,
    pub morphogen_scale: f64,
    pub neighbor_mode: NeighborMode,
    pub neighbor_k: usize,
    pub neighbor_mix: f64,
    pub n_random_edges: usize,
    pub dispersion_mean: f64,
    pub dispersion_sigma: f64,
    pub group_sizes: GroupSizes,
    pub n_threads: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            total_cells: 500_000,
            n_samples: 30,
            n_timepoints: 12,
            hours_per_timepoint: 2.0,
            dt: 1.0,
            n_lineages: 6,
            tfs_per_lineage: 2,
            lineage_threshold: 1.2,
            dropout_mid: 1.0,
            dropout_scale: 0.6,
            x_max: 6.0,
            hill_k: 1.0,
            hill_n: 2.0,
            morphogen_scale: 0.6,
            neighbor_mode: NeighborMode::None,
            neighbor_k: 10,
            neighbor_mix: 1.0,
            n_random_edges: 200,
            dispersion_mean: 1.0,
            dispersion_sigma: 0.3,
            group_sizes: GroupSizes::default(),
            n_threads: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        self.steps_per_timepoint()?;
        if self.n_timepoints == 0 {
            return Err(SimError::InvalidArgument(
                "n_timepoints must be greater than zero".into(),
            ));
        }
        if self.n_samples == 0 {
            return Err(SimError::InvalidArgument(
                "n_samples must be greater than zero".into(),
            ));
        }
        if self.n_lineages == 0 || self.tfs_per_lineage == 0 {
            return Err(SimError::InvalidArgument(
                "n_lineages and tfs_per_lineage must be positive".into(),
            ));
        }
        let required = self
            .n_lineages
            .checked_mul(self.tfs_per_lineage)
            .ok_or_else(|| SimError::InvalidArgument("lineage block size overflows".into()))?;
        if required > self.group_sizes.lineage {
            return Err(SimError::InvalidArgument(format!(
                "{} lineages × {} TFs need {} lineage genes but only {} are configured",
                self.n_lineages, self.tfs_per_lineage, required, self.group_sizes.lineage
            )));
        }
        for (name, value) in [
            ("x_max", self.x_max),
            ("hill_k", self.hill_k),
            ("hill_n", self.hill_n),
            ("dropout_scale", self.dropout_scale),
            ("dispersion_sigma", self.dispersion_sigma),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::InvalidArgument(format!(
                    "{name} must be a positive finite number (got {value})"
                )));
            }
        }
        for (name, value) in [
            ("lineage_threshold", self.lineage_threshold),
            ("dropout_mid", self.dropout_mid),
            ("morphogen_scale", self.morphogen_scale),
            ("dispersion_mean", self.dispersion_mean),
        ] {
            if !value.is_finite() {
                return Err(SimError::InvalidArgument(format!(
                    "{name} must be finite (got {value})"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.neighbor_mix) {
            return Err(SimError::InvalidArgument(format!(
                "neighbor_mix must lie in [0, 1] (got {})",
                self.neighbor_mix
            )));
        }
        if self.n_threads == Some(0) {
            return Err(SimError::InvalidArgument(
                "n_threads must be greater than zero when given".into(),
            ));
        }
        if self.n_random_edges > 0 && self.group_sizes.total() < 2 {
            return Err(SimError::InvalidArgument(
                "random edges need at least two genes".into(),
            ));
        }
        Ok(())
    }

    /// Integration steps between consecutive snapshots. Rejects step sizes
    /// that do not evenly divide the timepoint spacing.
    pub fn steps_per_timepoint(&self) -> Result<usize, SimError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SimError::InvalidArgument(format!(
                "dt must be a positive finite number (got {})",
                self.dt
            )));
        }
        if !(self.hours_per_timepoint.is_finite() && self.hours_per_timepoint > 0.0) {
            return Err(SimError::InvalidArgument(format!(
                "hours_per_timepoint must be a positive finite number (got {})",
                self.hours_per_timepoint
            )));
        }
        let steps = (self.hours_per_timepoint / self.dt).round();
        if (steps * self.dt - self.hours_per_timepoint).abs() > DIVISIBILITY_TOLERANCE {
            return Err(SimError::InvalidArgument(format!(
                "hours_per_timepoint {} must be divisible by dt {}",
                self.hours_per_timepoint, self.dt
            )));
        }
        if steps < 1.0 {
            return Err(SimError::InvalidArgument(
                "hours_per_timepoint must span at least one step".into(),
            ));
        }
        Ok(steps as usize)
    }

    pub fn timepoints(&self) -> Vec<f64> {
        (0..self.n_timepoints)
            .map(|idx| idx as f64 * self.hours_per_timepoint)
            .collect()
    }

    /// Trajectory count per sample. The remainder of the split goes one
    /// trajectory each to the leading samples.
    pub fn trajectories_per_sample(&self) -> Vec<usize> {
        if self.n_samples == 0 || self.n_timepoints == 0 {
            return Vec::new();
        }
        let total = self.total_cells / self.n_timepoints;
        let base = total / self.n_samples;
        let remainder = total % self.n_samples;
        (0..self.n_samples)
            .map(|idx| base + usize::from(idx < remainder))
            .collect()
    }
}
