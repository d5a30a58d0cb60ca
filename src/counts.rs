use rand::Rng;
use rand_distr::{Distribution, Gamma, LogNormal, Poisson};
use tracing::debug;

use crate::SimRng;
use crate::error::SimError;

/// `log(1 + e^v)`, evaluated without overflow for large `v`.
#[inline]
pub fn softplus(value: f64) -> f64 {
    value.max(0.0) + (-value.abs()).exp().ln_1p()
}

pub fn draw_dispersion(
    rng: &mut SimRng,
    n_genes: usize,
    mean: f64,
    sigma: f64,
) -> Result<Vec<f64>, SimError> {
    let lognormal =
        LogNormal::new(mean, sigma).map_err(|e| SimError::distribution("dispersion", e))?;
    Ok((0..n_genes).map(|_| lognormal.sample(rng)).collect())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<u32>,
}

impl CountMatrix {
    pub fn empty(n_cols: usize) -> Self {
        Self {
            n_rows: 0,
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn from_dense(n_rows: usize, n_cols: usize, dense: &[u32]) -> Result<Self, SimError> {
        if dense.len() != n_rows * n_cols {
            return Err(SimError::Shape(format!(
                "dense counts length {} does not match {} × {}",
                dense.len(),
                n_rows,
                n_cols
            )));
        }
        let mut matrix = Self::empty(n_cols);
        matrix.push_dense_rows(dense);
        Ok(matrix)
    }

    fn push_dense_rows(&mut self, dense: &[u32]) {
        if self.n_cols == 0 {
            return;
        }
        for row in dense.chunks_exact(self.n_cols) {
            for (col, &value) in row.iter().enumerate() {
                if value != 0 {
                    self.indices.push(col);
                    self.data.push(value);
                }
            }
            self.indptr.push(self.indices.len());
            self.n_rows += 1;
        }
    }

    pub fn append(&mut self, other: &CountMatrix) -> Result<(), SimError> {
        if other.n_cols != self.n_cols {
            return Err(SimError::Shape(format!(
                "cannot stack a matrix with {} columns onto one with {}",
                other.n_cols, self.n_cols
            )));
        }
        let offset = self.indices.len();
        self.indices.extend_from_slice(&other.indices);
        self.data.extend_from_slice(&other.data);
        self.indptr
            .extend(other.indptr.iter().skip(1).map(|&ptr| ptr + offset));
        self.n_rows += other.n_rows;
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[u32] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        let span = self.indptr[row]..self.indptr[row + 1];
        self.indices[span.clone()]
            .binary_search(&col)
            .map(|pos| self.data[span.start + pos])
            .unwrap_or(0)
    }

    pub fn to_dense(&self) -> Vec<u32> {
        let mut dense = vec![0u32; self.n_rows * self.n_cols];
        for row in 0..self.n_rows {
            for pos in self.indptr[row]..self.indptr[row + 1] {
                dense[row * self.n_cols + self.indices[pos]] = self.data[pos];
            }
        }
        dense
    }
}

#[derive(Clone, Debug)]
pub struct CountDraw {
    pub counts: Vec<u32>,
    pub dropped: Vec<bool>,
}

#[derive(Clone, Debug)]
pub struct CountModel {
    dispersion: Vec<f64>,
    dropout_mid: f64,
    dropout_scale: f64,
}

impl CountModel {
    pub fn new(
        dispersion: Vec<f64>,
        dropout_mid: f64,
        dropout_scale: f64,
    ) -> Result<Self, SimError> {
        if let Some(bad) = dispersion.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            return Err(SimError::InvalidArgument(format!(
                "dispersion values must be positive and finite (got {bad})"
            )));
        }
        if !(dropout_scale.is_finite() && dropout_scale > 0.0) {
            return Err(SimError::InvalidArgument(format!(
                "dropout_scale must be positive (got {dropout_scale})"
            )));
        }
        Ok(Self {
            dispersion,
            dropout_mid,
            dropout_scale,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.dispersion.len()
    }

    #[inline]
    pub fn dropout_probability(&self, mu: f64) -> f64 {
        1.0 / (1.0 + ((mu - self.dropout_mid) / self.dropout_scale).exp())
    }

    /// Draws counts for a row-major `rows × genes` latent block. All Gamma
    /// rates are drawn first, then all Poisson counts, then all dropout
    /// uniforms.
    pub fn draw(&self, rng: &mut SimRng, latent: &[f64]) -> Result<CountDraw, SimError> {
        let n_genes = self.n_genes();
        if n_genes == 0 || latent.len() % n_genes != 0 {
            return Err(SimError::Shape(format!(
                "latent length {} is not a multiple of {} genes",
                latent.len(),
                n_genes
            )));
        }

        let means: Vec<f64> = latent.iter().map(|&v| softplus(v)).collect();

        let mut rates = Vec::with_capacity(means.len());
        for row in means.chunks_exact(n_genes) {
            for (&mu, &shape) in row.iter().zip(&self.dispersion) {
                let gamma = Gamma::new(shape, mu / shape)
                    .map_err(|e| SimError::distribution("gamma rate", e))?;
                rates.push(gamma.sample(rng));
            }
        }

        let mut counts = Vec::with_capacity(rates.len());
        for &lambda in &rates {
            if lambda > 0.0 {
                let poisson =
                    Poisson::new(lambda).map_err(|e| SimError::distribution("poisson count", e))?;
                let value: f64 = poisson.sample(rng);
                if value > f64::from(u32::MAX) {
                    return Err(SimError::distribution(
                        "poisson count",
                        format!("{value} exceeds the u32 count range (rate {lambda})"),
                    ));
                }
                counts.push(value as u32);
            } else {
                counts.push(0);
            }
        }

        let mut dropped = Vec::with_capacity(counts.len());
        for (count, &mu) in counts.iter_mut().zip(&means) {
            let drop = rng.random::<f64>() < self.dropout_probability(mu);
            if drop {
                *count = 0;
            }
            dropped.push(drop);
        }

        debug!(
            n_rows = latent.len() / n_genes,
            n_dropped = dropped.iter().filter(|&&d| d).count(),
            "counts drawn"
        );
        Ok(CountDraw { counts, dropped })
    }

    pub fn sample(&self, rng: &mut SimRng, latent: &[f64]) -> Result<CountMatrix, SimError> {
        let draw = self.draw(rng, latent)?;
        let n_genes = self.n_genes();
        CountMatrix::from_dense(draw.counts.len() / n_genes, n_genes, &draw.counts)
    }
}
