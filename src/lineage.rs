use std::ops::Range;

use rayon::prelude::*;

use crate::catalog::GeneCatalog;
use crate::error::SimError;

pub const PROGENITOR_LABEL: u32 = 0;

pub fn cell_type(label: u32) -> String {
    if label == PROGENITOR_LABEL {
        "progenitor".to_owned()
    } else {
        format!("lin{label}")
    }
}

pub fn softmax_into(scores: &[f64], out: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for (dst, &score) in out.iter_mut().zip(scores) {
        *dst = (score - max).exp();
        total += *dst;
    }
    for dst in out.iter_mut() {
        *dst /= total;
    }
}

/// 1-based index of the first maximal score, or [`PROGENITOR_LABEL`] when
/// that maximum is below `threshold`.
pub fn label_from_scores(scores: &[f64], threshold: f64) -> u32 {
    let mut best = 0usize;
    for (idx, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = idx;
        }
    }
    match scores.get(best) {
        Some(&max) if max >= threshold => best as u32 + 1,
        _ => PROGENITOR_LABEL,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineageCalls {
    pub labels: Vec<u32>,
    pub fate_probabilities: Vec<f64>,
    pub n_lineages: usize,
}

impl LineageCalls {
    pub fn fate_row(&self, row: usize) -> &[f64] {
        &self.fate_probabilities[row * self.n_lineages..(row + 1) * self.n_lineages]
    }
}

#[derive(Clone, Debug)]
pub struct LineageAssigner {
    blocks: Vec<Range<usize>>,
    threshold: f64,
}

impl LineageAssigner {
    pub fn new(
        catalog: &GeneCatalog,
        n_lineages: usize,
        tfs_per_lineage: usize,
        threshold: f64,
    ) -> Result<Self, SimError> {
        Ok(Self {
            blocks: catalog.lineage_blocks(n_lineages, tfs_per_lineage)?,
            threshold,
        })
    }

    pub fn n_lineages(&self) -> usize {
        self.blocks.len()
    }

    pub fn scores_into(&self, row: &[f64], out: &mut [f64]) {
        for (dst, block) in out.iter_mut().zip(&self.blocks) {
            let total: f64 = row[block.clone()].iter().sum();
            *dst = total / block.len() as f64;
        }
    }

    /// Labels and fate probabilities for a row-major `rows × n_genes` block.
    pub fn assign(&self, latent: &[f64], n_genes: usize) -> Result<LineageCalls, SimError> {
        let n_lineages = self.n_lineages();
        if n_genes == 0 || latent.len() % n_genes != 0 {
            return Err(SimError::Shape(format!(
                "latent length {} is not a multiple of {} genes",
                latent.len(),
                n_genes
            )));
        }
        if n_lineages == 0 {
            return Err(SimError::InvalidArgument(
                "lineage assignment needs at least one lineage".into(),
            ));
        }
        let n_rows = latent.len() / n_genes;
        let mut labels = vec![PROGENITOR_LABEL; n_rows];
        let mut fate_probabilities = vec![0.0; n_rows * n_lineages];
        labels
            .par_iter_mut()
            .zip(fate_probabilities.par_chunks_mut(n_lineages))
            .zip(latent.par_chunks(n_genes))
            .for_each(|((label, probs), row)| {
                let mut scores = vec![0.0; n_lineages];
                self.scores_into(row, &mut scores);
                *label = label_from_scores(&scores, self.threshold);
                softmax_into(&scores, probs);
            });
        Ok(LineageCalls {
            labels,
            fate_probabilities,
            n_lineages,
        })
    }
}
