use std::collections::HashMap;

use numpy::{Element, IxDyn, PyArrayDyn, PyArrayMethods};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::catalog::GroupSizes;
use crate::config::{NeighborMode, SimulationConfig};
use crate::dataset::{SimulatedDataset, simulate_dataset as run_simulation};
use crate::simulator;

fn export_array<'py, T: Copy + Element>(
    py: Python<'py>,
    dims: &[usize],
    data: &[T],
) -> PyResult<Bound<'py, PyArrayDyn<T>>> {
    let array = unsafe { PyArrayDyn::<T>::new(py, IxDyn(dims), false) };
    unsafe {
        array
            .as_slice_mut()
            .map_err(|_| PyValueError::new_err("failed to export data"))?
            .copy_from_slice(data);
    }
    Ok(array)
}

fn to_i64(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}

impl SimulatedDataset {
    fn into_py_dict(self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let out = PyDict::new(py);
        let (n_rows, n_cols) = self.counts.shape();

        out.set_item(
            "counts_data",
            export_array(py, &[self.counts.nnz()], self.counts.data())?,
        )?;
        let indices = to_i64(self.counts.indices());
        out.set_item("counts_indices", export_array(py, &[indices.len()], &indices)?)?;
        let indptr = to_i64(self.counts.indptr());
        out.set_item("counts_indptr", export_array(py, &[indptr.len()], &indptr)?)?;
        out.set_item("counts_shape", (n_rows, n_cols))?;

        out.set_item(
            "fate_probabilities",
            export_array(
                py,
                &[self.obs.len(), self.n_lineages],
                &self.fate_probabilities,
            )?,
        )?;

        let n_obs = self.obs.len();
        let lineage_id: Vec<u32> = self.obs.iter().map(|o| o.lineage_id).collect();
        let timepoint_idx: Vec<i64> = self.obs.iter().map(|o| o.timepoint_idx as i64).collect();
        let timepoint: Vec<f64> = self.obs.iter().map(|o| o.timepoint).collect();
        let pseudotime: Vec<f64> = self.obs.iter().map(|o| o.pseudotime).collect();
        out.set_item("lineage_id", export_array(py, &[n_obs], &lineage_id)?)?;
        out.set_item("timepoint_idx", export_array(py, &[n_obs], &timepoint_idx)?)?;
        out.set_item("timepoint", export_array(py, &[n_obs], &timepoint)?)?;
        out.set_item("pseudotime", export_array(py, &[n_obs], &pseudotime)?)?;
        out.set_item("obs_names", self.obs_names())?;
        let samples: Vec<&str> = self.obs.iter().map(|o| o.sample.as_str()).collect();
        out.set_item("sample", samples)?;
        let cell_types: Vec<&str> = self.obs.iter().map(|o| o.cell_type.as_str()).collect();
        out.set_item("cell_type", cell_types)?;

        let n_edges = self.transitions.len();
        let src: Vec<i64> = self.transitions.iter().map(|e| e.src as i64).collect();
        let tgt: Vec<i64> = self.transitions.iter().map(|e| e.tgt as i64).collect();
        let weight: Vec<f64> = self.transitions.iter().map(|e| e.weight).collect();
        out.set_item("transition_src", export_array(py, &[n_edges], &src)?)?;
        out.set_item("transition_tgt", export_array(py, &[n_edges], &tgt)?)?;
        out.set_item("transition_weight", export_array(py, &[n_edges], &weight)?)?;

        out.set_item("gene_names", self.gene_names.clone())?;
        out.set_item("grn_json", self.grn.to_json()?)?;
        out.set_item(
            "simulation_info_json",
            serde_json::to_string(&self.info)
                .map_err(|e| PyValueError::new_err(e.to_string()))?,
        )?;
        Ok(out.into_any().unbind())
    }
}

#[pyfunction(signature = (
    seed=0,
    total_cells=500_000,
    n_samples=30,
    n_timepoints=12,
    hours_per_timepoint=2.0,
    dt=1.0,
    n_lineages=6,
    tfs_per_lineage=2,
    lineage_threshold=1.2,
    dropout_mid=1.0,
    dropout_scale=0.6,
    x_max=6.0,
    hill_k=1.0,
    hill_n=2.0,
    morphogen_scale=0.6,
    neighbor_mode="none",
    neighbor_k=10,
    neighbor_mix=1.0,
    n_random_edges=200,
    dispersion_mean=1.0,
    dispersion_sigma=0.3,
    group_sizes=None,
    n_threads=None
))]
#[allow(clippy::too_many_arguments)]
pub fn simulate_dataset(
    py: Python<'_>,
    seed: u64,
    total_cells: usize,
    n_samples: usize,
    n_timepoints: usize,
    hours_per_timepoint: f64,
    dt: f64,
    n_lineages: usize,
    tfs_per_lineage: usize,
    lineage_threshold: f64,
    dropout_mid: f64,
    dropout_scale: f64,
    x_max: f64,
    hill_k: f64,
    hill_n: f64,
    morphogen_scale: f64,
    neighbor_mode: &str,
    neighbor_k: i64,
    neighbor_mix: f64,
    n_random_edges: usize,
    dispersion_mean: f64,
    dispersion_sigma: f64,
    group_sizes: Option<HashMap<String, usize>>,
    n_threads: Option<usize>,
) -> PyResult<Py<PyAny>> {
    let group_sizes = GroupSizes::default().with_overrides(group_sizes.unwrap_or_default())?;
    let config = SimulationConfig {
        seed,
        total_cells,
        n_samples,
        n_timepoints,
        hours_per_timepoint,
        dt,
        n_lineages,
        tfs_per_lineage,
        lineage_threshold,
        dropout_mid,
        dropout_scale,
        x_max,
        hill_k,
        hill_n,
        morphogen_scale,
        neighbor_mode: neighbor_mode.parse::<NeighborMode>()?,
        // Non-positive counts fall back to mean-field signalling.
        neighbor_k: neighbor_k.max(0) as usize,
        neighbor_mix,
        n_random_edges,
        dispersion_mean,
        dispersion_sigma,
        group_sizes,
        n_threads,
    };
    let dataset = py.detach(move || run_simulation(&config))?;
    dataset.into_py_dict(py)
}

#[pyfunction]
pub fn hill(value: f64, k: f64, n: f64) -> f64 {
    simulator::hill(value, k, n)
}

#[pymodule]
fn grnsim(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(simulate_dataset, module)?)?;
    module.add_function(wrap_pyfunction!(hill, module)?)?;
    Ok(())
}
