use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SimRng;
use crate::catalog::{GeneCatalog, GeneGroup, split_contiguous};
use crate::error::SimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ProgSelf,
    ProgMutual,
    ProgToLineage,
    LineageSelf,
    LineagePartner,
    LineageInhibit,
    LineageRepressProg,
    LineageToTarget,
    LineageToLigand,
    ProgToReceptor,
    Random,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::ProgSelf => "prog_self",
            EdgeKind::ProgMutual => "prog_mutual",
            EdgeKind::ProgToLineage => "prog_to_lineage",
            EdgeKind::LineageSelf => "lineage_self",
            EdgeKind::LineagePartner => "lineage_partner",
            EdgeKind::LineageInhibit => "lineage_inhibit",
            EdgeKind::LineageRepressProg => "lineage_repress_prog",
            EdgeKind::LineageToTarget => "lineage_to_target",
            EdgeKind::LineageToLigand => "lineage_to_ligand",
            EdgeKind::ProgToReceptor => "prog_to_receptor",
            EdgeKind::Random => "random",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegulatoryEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
    pub kind: EdgeKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

/// Compressed adjacency indexed by target gene. Row `g` lists every source
/// regulating `g` with the summed weight of all edges `(source, g)`.
#[derive(Clone, Debug, Default)]
pub struct SparseAdjacency {
    n_genes: usize,
    row_ptr: Vec<usize>,
    sources: Vec<usize>,
    weights: Vec<f64>,
}

impl SparseAdjacency {
    /// Materializes a coordinate edge list. Edges sharing `(source, target)`
    /// accumulate their weights.
    pub fn from_edges(n_genes: usize, edges: &[RegulatoryEdge]) -> Result<Self, SimError> {
        let mut coords = Vec::with_capacity(edges.len());
        for edge in edges {
            if edge.source >= n_genes || edge.target >= n_genes {
                return Err(SimError::Shape(format!(
                    "edge {} -> {} out of range for {} genes",
                    edge.source, edge.target, n_genes
                )));
            }
            coords.push((edge.target, edge.source, edge.weight));
        }
        // Stable sort keeps insertion order within a key so sums are reproducible.
        coords.sort_by_key(|&(target, source, _)| (target, source));

        let mut row_ptr = vec![0usize; n_genes + 1];
        let mut sources: Vec<usize> = Vec::with_capacity(coords.len());
        let mut weights: Vec<f64> = Vec::with_capacity(coords.len());
        let mut last_key = None;
        for (target, source, weight) in coords {
            if last_key == Some((target, source)) {
                if let Some(acc) = weights.last_mut() {
                    *acc += weight;
                }
                continue;
            }
            last_key = Some((target, source));
            sources.push(source);
            weights.push(weight);
            row_ptr[target + 1] += 1;
        }
        for idx in 0..n_genes {
            row_ptr[idx + 1] += row_ptr[idx];
        }
        Ok(Self {
            n_genes,
            row_ptr,
            sources,
            weights,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.n_genes
    }

    pub fn nnz(&self) -> usize {
        self.sources.len()
    }

    /// Accumulated weight of `source -> target`, zero when absent.
    pub fn weight(&self, source: usize, target: usize) -> f64 {
        let row = self.row_ptr[target]..self.row_ptr[target + 1];
        self.sources[row.clone()]
            .binary_search(&source)
            .map(|pos| self.weights[row.start + pos])
            .unwrap_or(0.0)
    }

    /// `out[g] = Σ_s activity[s] * w(s → g)`.
    pub fn propagate(&self, activity: &[f64], out: &mut [f64]) {
        debug_assert_eq!(activity.len(), self.n_genes);
        debug_assert_eq!(out.len(), self.n_genes);
        for (target, dst) in out.iter_mut().enumerate() {
            let row = self.row_ptr[target]..self.row_ptr[target + 1];
            *dst = self.sources[row.clone()]
                .iter()
                .zip(&self.weights[row])
                .map(|(&source, &weight)| activity[source] * weight)
                .sum();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kinetics {
    pub bias: f64,
    pub decay: f64,
    pub noise: f64,
}

impl Kinetics {
    pub fn for_group(group: GeneGroup) -> Self {
        let (bias, decay, noise) = match group {
            GeneGroup::Housekeeping => (0.6, 0.1, 0.05),
            GeneGroup::Ligand => (0.2, 0.2, 0.06),
            GeneGroup::Receptor => (0.2, 0.2, 0.06),
            GeneGroup::Target => (0.05, 0.2, 0.08),
            GeneGroup::Program => (0.05, 0.3, 0.1),
            GeneGroup::Lineage => (0.05, 0.3, 0.1),
            GeneGroup::Other => (0.1, 0.2, 0.08),
        };
        Self { bias, decay, noise }
    }
}

#[derive(Clone, Debug)]
pub struct Network {
    pub adjacency: SparseAdjacency,
    pub bias: Vec<f64>,
    pub decay: Vec<f64>,
    pub noise: Vec<f64>,
    pub edges: Vec<RegulatoryEdge>,
}

impl Network {
    pub fn n_genes(&self) -> usize {
        self.bias.len()
    }

    pub fn edge_records(&self, catalog: &GeneCatalog) -> Vec<EdgeRecord> {
        self.edges
            .iter()
            .map(|edge| EdgeRecord {
                source: catalog.name(edge.source).to_owned(),
                target: catalog.name(edge.target).to_owned(),
                weight: edge.weight,
                kind: edge.kind,
            })
            .collect()
    }
}

const PROG_SELF: f64 = 0.2;
const PROG_MUTUAL_LOW: f64 = 0.35;
const PROG_MUTUAL_HIGH: f64 = 0.45;
const PROG_TO_LINEAGE: f64 = 0.15;
const LINEAGE_SELF: f64 = 0.6;
const LINEAGE_PARTNER: f64 = 0.4;
const LINEAGE_INHIBIT: f64 = -0.5;
const LINEAGE_REPRESS_PROG: f64 = -0.3;
const LINEAGE_TO_TARGET: f64 = 0.7;
const LINEAGE_TO_LIGAND: f64 = 0.6;
const PROG_TO_RECEPTOR: f64 = 0.2;
const RANDOM_WEIGHT_BOUND: f64 = 0.05;

pub struct NetworkBuilder<'a> {
    catalog: &'a GeneCatalog,
    n_lineages: usize,
    tfs_per_lineage: usize,
    n_random_edges: usize,
    edges: Vec<RegulatoryEdge>,
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(catalog: &'a GeneCatalog, n_lineages: usize, tfs_per_lineage: usize) -> Self {
        Self {
            catalog,
            n_lineages,
            tfs_per_lineage,
            n_random_edges: 200,
            edges: Vec::new(),
        }
    }

    pub fn with_random_edges(mut self, n_random_edges: usize) -> Self {
        self.n_random_edges = n_random_edges;
        self
    }

    fn add_edge(&mut self, source: usize, target: usize, weight: f64, kind: EdgeKind) {
        self.edges.push(RegulatoryEdge {
            source,
            target,
            weight,
            kind,
        });
    }

    pub fn build(mut self, rng: &mut SimRng) -> Result<Network, SimError> {
        let catalog = self.catalog;
        let n_genes = catalog.n_genes();
        let prog = catalog.indices(GeneGroup::Program);
        let blocks = catalog.lineage_blocks(self.n_lineages, self.tfs_per_lineage)?;

        for i in prog.clone() {
            self.add_edge(i, i, PROG_SELF, EdgeKind::ProgSelf);
            for j in prog.clone().filter(|&j| j != i) {
                let weight = rng.random_range(PROG_MUTUAL_LOW..PROG_MUTUAL_HIGH);
                self.add_edge(j, i, weight, EdgeKind::ProgMutual);
            }
        }

        for lin in catalog.indices(GeneGroup::Lineage) {
            for p in prog.clone() {
                self.add_edge(p, lin, PROG_TO_LINEAGE, EdgeKind::ProgToLineage);
            }
        }

        for (block_idx, block) in blocks.iter().enumerate() {
            for tf in block.clone() {
                self.add_edge(tf, tf, LINEAGE_SELF, EdgeKind::LineageSelf);
            }
            if block.len() == 2 {
                let (a, b) = (block.start, block.start + 1);
                self.add_edge(a, b, LINEAGE_PARTNER, EdgeKind::LineagePartner);
                self.add_edge(b, a, LINEAGE_PARTNER, EdgeKind::LineagePartner);
            }
            for tf in block.clone() {
                for (other_idx, other) in blocks.iter().enumerate() {
                    if other_idx == block_idx {
                        continue;
                    }
                    for other_tf in other.clone() {
                        self.add_edge(other_tf, tf, LINEAGE_INHIBIT, EdgeKind::LineageInhibit);
                    }
                }
            }
            for tf in block.clone() {
                for p in prog.clone() {
                    self.add_edge(tf, p, LINEAGE_REPRESS_PROG, EdgeKind::LineageRepressProg);
                }
            }
        }

        let target_splits = split_contiguous(catalog.indices(GeneGroup::Target), self.n_lineages);
        for (block, subset) in blocks.iter().zip(target_splits) {
            for tf in block.clone() {
                for tgt in subset.clone() {
                    self.add_edge(tf, tgt, LINEAGE_TO_TARGET, EdgeKind::LineageToTarget);
                }
            }
        }

        let ligand_splits = split_contiguous(catalog.indices(GeneGroup::Ligand), self.n_lineages);
        for (block, subset) in blocks.iter().zip(ligand_splits) {
            for tf in block.clone() {
                for lig in subset.clone() {
                    self.add_edge(tf, lig, LINEAGE_TO_LIGAND, EdgeKind::LineageToLigand);
                }
            }
        }

        for p in prog.clone() {
            for rec in catalog.indices(GeneGroup::Receptor) {
                self.add_edge(p, rec, PROG_TO_RECEPTOR, EdgeKind::ProgToReceptor);
            }
        }

        if self.n_random_edges > 0 && n_genes < 2 {
            return Err(SimError::InvalidArgument(
                "random edges need at least two genes".into(),
            ));
        }
        let mut placed = 0;
        while placed < self.n_random_edges {
            let source = rng.random_range(0..n_genes);
            let target = rng.random_range(0..n_genes);
            if source == target {
                continue;
            }
            let weight = rng.random_range(-RANDOM_WEIGHT_BOUND..RANDOM_WEIGHT_BOUND);
            self.add_edge(source, target, weight, EdgeKind::Random);
            placed += 1;
        }

        let adjacency = SparseAdjacency::from_edges(n_genes, &self.edges)?;
        let mut bias = vec![0.0; n_genes];
        let mut decay = vec![0.0; n_genes];
        let mut noise = vec![0.0; n_genes];
        for group in GeneGroup::ALL {
            let kinetics = Kinetics::for_group(group);
            for gene in catalog.indices(group) {
                bias[gene] = kinetics.bias;
                decay[gene] = kinetics.decay;
                noise[gene] = kinetics.noise;
            }
        }

        debug!(
            n_genes,
            n_edges = self.edges.len(),
            nnz = adjacency.nnz(),
            "regulatory network built"
        );

        Ok(Network {
            adjacency,
            bias,
            decay,
            noise,
            edges: self.edges,
        })
    }
}
