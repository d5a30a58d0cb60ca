//! Draw order on the single RNG stream: network construction, dispersion,
//! then per sample the lineage weights, initial state, neighbourhoods,
//! per-step noise, count draws and dropout draws.

use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::SimRng;
use crate::catalog::GeneCatalog;
use crate::config::SimulationConfig;
use crate::counts::{CountMatrix, CountModel, draw_dispersion};
use crate::error::SimError;
use crate::lineage::{LineageAssigner, LineageCalls, cell_type};
use crate::network::{EdgeRecord, Network, NetworkBuilder};
use crate::signaling::{PairRecord, SignalingModel};
use crate::simulator::{LatentSnapshots, Simulator, StepParams};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    pub sample: String,
    pub timepoint_idx: usize,
    pub timepoint: f64,
    pub pseudotime: f64,
    pub lineage_id: u32,
    pub cell_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEdge {
    pub src: usize,
    pub tgt: usize,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrnExport {
    pub gene_names: Vec<String>,
    pub edges: Vec<EdgeRecord>,
    pub ligand_receptor_pairs: Vec<PairRecord>,
}

impl GrnExport {
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationInfo {
    pub seed: u64,
    pub n_genes: usize,
    pub n_samples: usize,
    pub n_timepoints: usize,
    pub timepoints: Vec<f64>,
    pub total_cells_requested: usize,
    pub total_cells_generated: usize,
    pub neighbor_mode: String,
    pub neighbor_k: usize,
    pub neighbor_mix: f64,
}

/// Per-sample view handed to [`simulate_dataset_with`] callbacks before the
/// latent tensor is discarded.
pub struct SampleOutput<'a> {
    pub sample_idx: usize,
    pub lineage_weights: &'a [f64],
    pub latent: &'a LatentSnapshots,
    pub counts: &'a CountMatrix,
    pub calls: &'a LineageCalls,
}

#[derive(Clone, Debug)]
pub struct SimulatedDataset {
    pub counts: CountMatrix,
    pub obs: Vec<CellMetadata>,
    pub fate_probabilities: Vec<f64>,
    pub n_lineages: usize,
    pub transitions: Vec<TrajectoryEdge>,
    pub gene_names: Vec<String>,
    pub grn: GrnExport,
    pub info: SimulationInfo,
}

impl SimulatedDataset {
    pub fn n_obs(&self) -> usize {
        self.obs.len()
    }

    pub fn obs_names(&self) -> Vec<String> {
        (0..self.obs.len()).map(cell_name).collect()
    }

    pub fn fate_row(&self, row: usize) -> &[f64] {
        &self.fate_probabilities[row * self.n_lineages..(row + 1) * self.n_lineages]
    }
}

pub fn cell_name(idx: usize) -> String {
    format!("cell_{idx:07}")
}

pub struct RunModel {
    pub catalog: GeneCatalog,
    pub network: Network,
    pub signaling: SignalingModel,
    pub count_model: CountModel,
    pub lineage: LineageAssigner,
    pub step_params: StepParams,
    n_lineages: usize,
    tfs_per_lineage: usize,
    morphogen_scale: f64,
}

impl RunModel {
    pub fn build(config: &SimulationConfig, rng: &mut SimRng) -> Result<Self, SimError> {
        config.validate()?;
        let catalog = GeneCatalog::new(&config.group_sizes);
        let network = NetworkBuilder::new(&catalog, config.n_lineages, config.tfs_per_lineage)
            .with_random_edges(config.n_random_edges)
            .build(rng)?;
        let signaling = SignalingModel::new(&catalog, config.n_lineages, config.tfs_per_lineage)?;
        let dispersion = draw_dispersion(
            rng,
            catalog.n_genes(),
            config.dispersion_mean,
            config.dispersion_sigma,
        )?;
        let count_model = CountModel::new(dispersion, config.dropout_mid, config.dropout_scale)?;
        let lineage = LineageAssigner::new(
            &catalog,
            config.n_lineages,
            config.tfs_per_lineage,
            config.lineage_threshold,
        )?;
        let step_params = StepParams::from_config(config)?;
        Ok(Self {
            catalog,
            network,
            signaling,
            count_model,
            lineage,
            step_params,
            n_lineages: config.n_lineages,
            tfs_per_lineage: config.tfs_per_lineage,
            morphogen_scale: config.morphogen_scale,
        })
    }

    pub fn simulator(&self) -> Simulator<'_> {
        Simulator::new(&self.catalog, &self.network, &self.signaling, self.step_params)
    }

    /// Constant per-sample bias: every TF of lineage `l` receives
    /// `morphogen_scale * weights[l]`.
    pub fn morphogen(&self, weights: &[f64]) -> Result<Vec<f64>, SimError> {
        if weights.len() != self.n_lineages {
            return Err(SimError::Shape(format!(
                "{} lineage weights given for {} lineages",
                weights.len(),
                self.n_lineages
            )));
        }
        let mut morphogen = vec![0.0; self.catalog.n_genes()];
        for (lineage, &weight) in weights.iter().enumerate() {
            for tf in self.catalog.lineage_block(lineage, self.tfs_per_lineage)? {
                morphogen[tf] = self.morphogen_scale * weight;
            }
        }
        Ok(morphogen)
    }

    pub fn grn_export(&self) -> GrnExport {
        GrnExport {
            gene_names: self.catalog.names().to_vec(),
            edges: self.network.edge_records(&self.catalog),
            ligand_receptor_pairs: self.signaling.pair_records(&self.catalog),
        }
    }
}

pub fn draw_lineage_weights(rng: &mut SimRng, n: usize) -> Result<Vec<f64>, SimError> {
    let gamma = Gamma::new(1.0, 1.0).map_err(|e| SimError::distribution("lineage weights", e))?;
    let mut weights: Vec<f64> = (0..n).map(|_| gamma.sample(rng)).collect();
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    } else if n > 0 {
        weights.fill(1.0 / n as f64);
    }
    Ok(weights)
}

pub fn simulate_dataset(config: &SimulationConfig) -> Result<SimulatedDataset, SimError> {
    simulate_dataset_with(config, |_| {})
}

pub fn simulate_dataset_with<F>(
    config: &SimulationConfig,
    mut on_sample: F,
) -> Result<SimulatedDataset, SimError>
where
    F: FnMut(SampleOutput<'_>) + Send,
{
    config.validate()?;
    match config.n_threads {
        Some(n) => ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| SimError::ThreadPool(e.to_string()))?
            .install(|| run_dataset(config, &mut on_sample)),
        None => run_dataset(config, &mut on_sample),
    }
}

fn run_dataset<F>(
    config: &SimulationConfig,
    on_sample: &mut F,
) -> Result<SimulatedDataset, SimError>
where
    F: FnMut(SampleOutput<'_>),
{
    let mut rng = SimRng::seed_from_u64(config.seed);
    let model = RunModel::build(config, &mut rng)?;
    let n_genes = model.catalog.n_genes();
    let n_timepoints = config.n_timepoints;
    let timepoints = config.timepoints();
    let budget = config.trajectories_per_sample();

    info!(
        n_genes,
        n_edges = model.network.edges.len(),
        n_pairs = model.signaling.n_pairs(),
        n_samples = config.n_samples,
        "simulation model built"
    );

    let simulator = model.simulator();
    let mut counts = CountMatrix::empty(n_genes);
    let mut obs = Vec::new();
    let mut fate_probabilities = Vec::new();
    let mut transitions = Vec::new();
    let mut offset = 0usize;

    for (sample_idx, &n_cells) in budget.iter().enumerate() {
        let weights = draw_lineage_weights(&mut rng, config.n_lineages)?;
        let morphogen = model.morphogen(&weights)?;
        let latent = simulator.run(&mut rng, n_cells, &morphogen)?;
        let sample_counts = model.count_model.sample(&mut rng, latent.as_rows())?;
        let calls = model.lineage.assign(latent.as_rows(), n_genes)?;

        on_sample(SampleOutput {
            sample_idx,
            lineage_weights: &weights,
            latent: &latent,
            counts: &sample_counts,
            calls: &calls,
        });

        counts.append(&sample_counts)?;
        let sample_name = format!("sample_{sample_idx}");
        for cell in 0..n_cells {
            for (t, &time) in timepoints.iter().enumerate() {
                let row = cell * n_timepoints + t;
                let label = calls.labels[row];
                obs.push(CellMetadata {
                    sample: sample_name.clone(),
                    timepoint_idx: t,
                    timepoint: time,
                    pseudotime: time,
                    lineage_id: label,
                    cell_type: cell_type(label),
                });
                if t + 1 < n_timepoints {
                    transitions.push(TrajectoryEdge {
                        src: offset + row,
                        tgt: offset + row + 1,
                        weight: 1.0,
                    });
                }
            }
        }
        fate_probabilities.extend(calls.fate_probabilities);
        offset += latent.n_rows();

        debug!(sample_idx, n_cells, n_rows = latent.n_rows(), "sample simulated");
    }

    let info = SimulationInfo {
        seed: config.seed,
        n_genes,
        n_samples: config.n_samples,
        n_timepoints,
        timepoints,
        total_cells_requested: config.total_cells,
        total_cells_generated: offset,
        neighbor_mode: config.neighbor_mode.as_str().to_owned(),
        neighbor_k: config.neighbor_k,
        neighbor_mix: config.neighbor_mix,
    };
    info!(
        total_cells_generated = offset,
        nnz = counts.nnz(),
        "simulation finished"
    );

    Ok(SimulatedDataset {
        counts,
        obs,
        fate_probabilities,
        n_lineages: config.n_lineages,
        transitions,
        gene_names: model.catalog.names().to_vec(),
        grn: model.grn_export(),
        info,
    })
}
