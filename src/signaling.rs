use serde::{Deserialize, Serialize};

use crate::catalog::{GeneCatalog, GeneGroup};
use crate::error::SimError;

const PAIR_EFFECT: f64 = 0.6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LigandReceptorPair {
    pub pair_id: usize,
    pub ligand: usize,
    pub receptor: usize,
    pub lineage: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub pair_id: usize,
    pub ligand: usize,
    pub receptor: usize,
    pub ligand_name: String,
    pub receptor_name: String,
    pub lineage: usize,
}

#[derive(Clone, Debug)]
pub struct SignalingModel {
    n_genes: usize,
    pairs: Vec<LigandReceptorPair>,
    effects: Vec<Vec<(usize, f64)>>,
}

impl SignalingModel {
    pub fn new(
        catalog: &GeneCatalog,
        n_lineages: usize,
        tfs_per_lineage: usize,
    ) -> Result<Self, SimError> {
        if n_lineages == 0 {
            return Err(SimError::InvalidArgument(
                "signaling needs at least one lineage".into(),
            ));
        }
        let ligands = catalog.indices(GeneGroup::Ligand);
        let receptors = catalog.indices(GeneGroup::Receptor);
        let n_pairs = ligands.len().min(receptors.len());

        let mut pairs = Vec::with_capacity(n_pairs);
        let mut effects = Vec::with_capacity(n_pairs);
        for (pair_id, (ligand, receptor)) in ligands.zip(receptors).enumerate() {
            let lineage = pair_id % n_lineages;
            let block = catalog.lineage_block(lineage, tfs_per_lineage)?;
            pairs.push(LigandReceptorPair {
                pair_id,
                ligand,
                receptor,
                lineage,
            });
            effects.push(block.map(|tf| (tf, PAIR_EFFECT)).collect());
        }
        Ok(Self {
            n_genes: catalog.n_genes(),
            pairs,
            effects,
        })
    }

    pub fn n_pairs(&self) -> usize {
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[LigandReceptorPair] {
        &self.pairs
    }

    pub fn effect(&self, gene: usize, pair: usize) -> f64 {
        self.effects[pair]
            .iter()
            .find(|&&(g, _)| g == gene)
            .map(|&(_, w)| w)
            .unwrap_or(0.0)
    }

    /// Adds `B · signal` onto `out`, one entry per gene.
    pub fn accumulate(&self, signal: &[f64], out: &mut [f64]) {
        debug_assert_eq!(signal.len(), self.pairs.len());
        debug_assert_eq!(out.len(), self.n_genes);
        for (entries, &s) in self.effects.iter().zip(signal) {
            if s == 0.0 {
                continue;
            }
            for &(gene, weight) in entries {
                out[gene] += weight * s;
            }
        }
    }

    pub fn pair_records(&self, catalog: &GeneCatalog) -> Vec<PairRecord> {
        self.pairs
            .iter()
            .map(|pair| PairRecord {
                pair_id: pair.pair_id,
                ligand: pair.ligand,
                receptor: pair.receptor,
                ligand_name: catalog.name(pair.ligand).to_owned(),
                receptor_name: catalog.name(pair.receptor).to_owned(),
                lineage: pair.lineage,
            })
            .collect()
    }
}
