//! Synthetic time-series single-cell counts from a scripted gene-regulatory network.

pub mod catalog;
pub mod config;
pub mod counts;
pub mod dataset;
pub mod error;
pub mod lineage;
pub mod network;
pub mod signaling;
pub mod simulator;

#[cfg(feature = "python")]
mod python;

pub type SimRng = rand_chacha::ChaCha8Rng;

pub use catalog::{GeneCatalog, GeneGroup, GroupSizes};
pub use config::{NeighborMode, SimulationConfig};
pub use counts::{CountMatrix, CountModel};
pub use dataset::{SimulatedDataset, simulate_dataset, simulate_dataset_with};
pub use error::SimError;
pub use lineage::LineageAssigner;
pub use network::{Network, NetworkBuilder};
pub use signaling::SignalingModel;
pub use simulator::{LatentSnapshots, Simulator, hill};

#[cfg(test)]
mod tests;
