//! Euler–Maruyama integration of one sample of independent cell trajectories.
//!
//! Drift per gene is
//!
//! ```text
//! Σ_s hill(x_s)·w(s→g) + bias_g − decay_g·x_g + Σ_p B[g,p]·signal_p + morphogen_g
//! ```
//!
//! where `signal_p = hill(x_receptor(p)) · ligand_availability_p`. The state
//! is clipped to `[0, x_max]` after every step.
//!
//! Every random draw goes through the single sample RNG in a fixed order
//! (initial state, neighbourhoods, then per-step noise cell by cell, gene by
//! gene). Only RNG-free work (Hill transform, regulatory input, signalling)
//! is spread over the rayon pool, so results do not depend on thread count.

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::SimRng;
use crate::catalog::{GeneCatalog, GeneGroup};
use crate::config::{NeighborMode, SimulationConfig};
use crate::error::SimError;
use crate::network::Network;
use crate::signaling::SignalingModel;

/// Added to the Hill denominator so a zero half-saturation constant never
/// divides by zero.
pub const HILL_EPSILON: f64 = 1e-8;

/// `max(v,0)^n / (k^n + max(v,0)^n + ε)`.
#[inline]
pub fn hill(value: f64, k: f64, n: f64) -> f64 {
    Hill::new(k, n).apply(value)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hill {
    hill_n: f64,
    k_half_pow_n: f64,
}

impl Hill {
    pub fn new(k_half: f64, hill_n: f64) -> Self {
        Self {
            hill_n,
            k_half_pow_n: k_half.powf(hill_n),
        }
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        let power = value.max(0.0).powf(self.hill_n);
        power / (self.k_half_pow_n + power + HILL_EPSILON)
    }
}

pub fn initial_distribution(group: GeneGroup) -> (f64, f64) {
    match group {
        GeneGroup::Program => (1.5, 0.1),
        GeneGroup::Lineage => (0.1, 0.05),
        GeneGroup::Ligand => (0.2, 0.05),
        GeneGroup::Receptor => (0.2, 0.05),
        GeneGroup::Target => (0.1, 0.05),
        GeneGroup::Housekeeping => (1.0, 0.1),
        GeneGroup::Other => (0.1, 0.05),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StepParams {
    pub dt: f64,
    pub steps_per_timepoint: usize,
    pub n_timepoints: usize,
    pub x_max: f64,
    pub hill: Hill,
    pub neighbor_mode: NeighborMode,
    pub neighbor_k: usize,
    pub neighbor_mix: f64,
}

impl StepParams {
    pub fn from_config(config: &SimulationConfig) -> Result<Self, SimError> {
        Ok(Self {
            dt: config.dt,
            steps_per_timepoint: config.steps_per_timepoint()?,
            n_timepoints: config.n_timepoints,
            x_max: config.x_max,
            hill: Hill::new(config.hill_k, config.hill_n),
            neighbor_mode: config.neighbor_mode,
            neighbor_k: config.neighbor_k,
            neighbor_mix: config.neighbor_mix,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.n_timepoints.saturating_sub(1) * self.steps_per_timepoint
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighborhoods {
    k: usize,
    indices: Vec<usize>,
}

impl Neighborhoods {
    /// `None` when the sample cannot form neighbourhoods (`k == 0` or a single
    /// cell); callers then fall back to the population mean-field.
    pub fn sample(rng: &mut SimRng, n_cells: usize, neighbor_k: usize) -> Option<Self> {
        if neighbor_k == 0 || n_cells <= 1 {
            return None;
        }
        let k = neighbor_k.min(n_cells - 1);
        let mut indices = Vec::with_capacity(n_cells * k);
        for cell in 0..n_cells {
            let picks = rand::seq::index::sample(rng, n_cells - 1, k);
            indices.extend(
                picks
                    .into_iter()
                    .map(|other| if other >= cell { other + 1 } else { other }),
            );
        }
        Some(Self { k, indices })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn of(&self, cell: usize) -> &[usize] {
        &self.indices[cell * self.k..(cell + 1) * self.k]
    }
}

/// Latent snapshots of one sample, laid out `(cell, timepoint, gene)`.
/// Row `cell * n_timepoints + t` of the flattened view is one observation.
#[derive(Clone, Debug, PartialEq)]
pub struct LatentSnapshots {
    n_cells: usize,
    n_timepoints: usize,
    n_genes: usize,
    data: Vec<f64>,
}

impl LatentSnapshots {
    pub fn zeros(n_cells: usize, n_timepoints: usize, n_genes: usize) -> Self {
        Self {
            n_cells,
            n_timepoints,
            n_genes,
            data: vec![0.0; n_cells * n_timepoints * n_genes],
        }
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_timepoints(&self) -> usize {
        self.n_timepoints
    }

    pub fn n_genes(&self) -> usize {
        self.n_genes
    }

    pub fn n_rows(&self) -> usize {
        self.n_cells * self.n_timepoints
    }

    pub fn get(&self, cell: usize, timepoint: usize, gene: usize) -> f64 {
        self.data[(cell * self.n_timepoints + timepoint) * self.n_genes + gene]
    }

    pub fn row(&self, cell: usize, timepoint: usize) -> &[f64] {
        let start = (cell * self.n_timepoints + timepoint) * self.n_genes;
        &self.data[start..start + self.n_genes]
    }

    pub fn as_rows(&self) -> &[f64] {
        &self.data
    }

    fn record(&mut self, timepoint: usize, state: &[f64]) {
        let n_genes = self.n_genes;
        let n_timepoints = self.n_timepoints;
        for (cell, values) in state.chunks_exact(n_genes).enumerate() {
            let start = (cell * n_timepoints + timepoint) * n_genes;
            self.data[start..start + n_genes].copy_from_slice(values);
        }
    }
}

#[derive(Default)]
struct StepScratch {
    activity: Vec<f64>,
    drift: Vec<f64>,
    signal: Vec<f64>,
    ligand_global: Vec<f64>,
    ligand_local: Vec<f64>,
}

impl StepScratch {
    fn ensure(&mut self, n_cells: usize, n_genes: usize, n_pairs: usize, local: bool) {
        self.activity.resize(n_cells * n_genes, 0.0);
        self.drift.resize(n_cells * n_genes, 0.0);
        self.signal.resize(n_cells * n_pairs.max(1), 0.0);
        self.ligand_global.resize(n_pairs, 0.0);
        if local {
            self.ligand_local.resize(n_cells * n_pairs, 0.0);
        }
    }
}

pub struct Simulator<'a> {
    catalog: &'a GeneCatalog,
    network: &'a Network,
    signaling: &'a SignalingModel,
    params: StepParams,
}

impl<'a> Simulator<'a> {
    pub fn new(
        catalog: &'a GeneCatalog,
        network: &'a Network,
        signaling: &'a SignalingModel,
        params: StepParams,
    ) -> Self {
        Self {
            catalog,
            network,
            signaling,
            params,
        }
    }

    pub fn initial_state(&self, rng: &mut SimRng, n_cells: usize) -> Result<Vec<f64>, SimError> {
        let n_genes = self.catalog.n_genes();
        let mut state = vec![0.0; n_cells * n_genes];
        for group in GeneGroup::ALL {
            let genes = self.catalog.indices(group);
            if genes.is_empty() {
                continue;
            }
            let (mean, std) = initial_distribution(group);
            let normal =
                Normal::new(mean, std).map_err(|e| SimError::distribution("initial state", e))?;
            for cell in 0..n_cells {
                let row = &mut state[cell * n_genes..(cell + 1) * n_genes];
                for gene in genes.clone() {
                    row[gene] = normal.sample(rng).clamp(0.0, self.params.x_max);
                }
            }
        }
        Ok(state)
    }

    /// Simulates `n_cells` trajectories under the per-sample `morphogen` bias
    /// and returns the snapshot at every timepoint, the initial state being
    /// timepoint 0.
    #[instrument(skip_all, fields(n_cells = n_cells))]
    pub fn run(
        &self,
        rng: &mut SimRng,
        n_cells: usize,
        morphogen: &[f64],
    ) -> Result<LatentSnapshots, SimError> {
        let n_genes = self.catalog.n_genes();
        if n_genes == 0 {
            return Err(SimError::Shape("the gene catalog is empty".into()));
        }
        if morphogen.len() != n_genes {
            return Err(SimError::Shape(format!(
                "morphogen length {} does not match number of genes {}",
                morphogen.len(),
                n_genes
            )));
        }
        let params = self.params;
        if params.steps_per_timepoint == 0 {
            return Err(SimError::InvalidArgument(
                "steps_per_timepoint must be greater than zero".into(),
            ));
        }
        let mut snapshots = LatentSnapshots::zeros(n_cells, params.n_timepoints, n_genes);
        if n_cells == 0 || params.n_timepoints == 0 {
            return Ok(snapshots);
        }

        let mut state = self.initial_state(rng, n_cells)?;
        snapshots.record(0, &state);

        let neighbors = match params.neighbor_mode {
            NeighborMode::Random => Neighborhoods::sample(rng, n_cells, params.neighbor_k),
            NeighborMode::None => None,
        };
        if params.neighbor_mode == NeighborMode::Random && neighbors.is_none() {
            debug!(
                neighbor_k = params.neighbor_k,
                "neighbourhoods unavailable, using mean-field signalling"
            );
        }

        let n_pairs = self.signaling.n_pairs();
        let mut scratch = StepScratch::default();
        scratch.ensure(n_cells, n_genes, n_pairs, neighbors.is_some());

        let sqrt_dt = params.dt.sqrt();
        let mut snapshot_idx = 1;
        for step in 0..params.total_steps() {
            self.ligand_availability(&state, n_cells, neighbors.as_ref(), &mut scratch);
            self.compute_drift(&state, morphogen, neighbors.is_some(), &mut scratch);

            for (cell_state, cell_drift) in state
                .chunks_exact_mut(n_genes)
                .zip(scratch.drift.chunks_exact(n_genes))
            {
                for ((x, &drift), &amplitude) in cell_state
                    .iter_mut()
                    .zip(cell_drift)
                    .zip(&self.network.noise)
                {
                    let z: f64 = rng.sample(StandardNormal);
                    let next = *x + params.dt * drift + amplitude * z * sqrt_dt;
                    *x = next.clamp(0.0, params.x_max);
                }
            }

            if (step + 1) % params.steps_per_timepoint == 0 {
                snapshots.record(snapshot_idx, &state);
                snapshot_idx += 1;
            }
        }

        debug!(
            n_cells,
            n_steps = params.total_steps(),
            "sample integration finished"
        );
        Ok(snapshots)
    }

    fn ligand_availability(
        &self,
        state: &[f64],
        n_cells: usize,
        neighbors: Option<&Neighborhoods>,
        scratch: &mut StepScratch,
    ) {
        let n_genes = self.catalog.n_genes();
        let pairs = self.signaling.pairs();
        let inv_cells = 1.0 / n_cells as f64;
        for (slot, pair) in scratch.ligand_global.iter_mut().zip(pairs) {
            let total: f64 = state
                .chunks_exact(n_genes)
                .map(|row| row[pair.ligand].max(0.0))
                .sum();
            *slot = total * inv_cells;
        }

        let Some(neighbors) = neighbors else {
            return;
        };
        let n_pairs = pairs.len();
        if n_pairs == 0 {
            return;
        }
        let mix = self.params.neighbor_mix;
        let inv_k = 1.0 / neighbors.k() as f64;
        let global = &scratch.ligand_global;
        scratch
            .ligand_local
            .par_chunks_mut(n_pairs)
            .enumerate()
            .for_each(|(cell, local)| {
                for ((slot, pair), &global_mean) in local.iter_mut().zip(pairs).zip(global) {
                    let total: f64 = neighbors
                        .of(cell)
                        .iter()
                        .map(|&other| state[other * n_genes + pair.ligand].max(0.0))
                        .sum();
                    *slot = mix * (total * inv_k) + (1.0 - mix) * global_mean;
                }
            });
    }

    fn compute_drift(
        &self,
        state: &[f64],
        morphogen: &[f64],
        local_ligands: bool,
        scratch: &mut StepScratch,
    ) {
        let n_genes = self.catalog.n_genes();
        let n_pairs = self.signaling.n_pairs();
        let hill = self.params.hill;
        let network = self.network;
        let signaling = self.signaling;
        let pairs = signaling.pairs();
        let StepScratch {
            activity,
            drift,
            signal,
            ligand_global,
            ligand_local,
        } = scratch;
        let ligand_global: &[f64] = ligand_global;
        let ligand_local: &[f64] = ligand_local;

        drift
            .par_chunks_mut(n_genes)
            .zip(state.par_chunks(n_genes))
            .zip(activity.par_chunks_mut(n_genes))
            .zip(signal.par_chunks_mut(n_pairs.max(1)))
            .enumerate()
            .for_each(|(cell, (((out, x), h), sig))| {
                for (hv, &xv) in h.iter_mut().zip(x) {
                    *hv = hill.apply(xv);
                }
                network.adjacency.propagate(h, out);
                for (gene, value) in out.iter_mut().enumerate() {
                    *value += network.bias[gene] - network.decay[gene] * x[gene];
                }

                let availability = if local_ligands {
                    &ligand_local[cell * n_pairs..(cell + 1) * n_pairs]
                } else {
                    ligand_global
                };
                let sig = &mut sig[..n_pairs];
                for ((s, pair), &ligand) in sig.iter_mut().zip(pairs).zip(availability) {
                    *s = hill.apply(x[pair.receptor]) * ligand;
                }
                signaling.accumulate(sig, out);

                for (value, &bias) in out.iter_mut().zip(morphogen) {
                    *value += bias;
                }
            });
    }
}
