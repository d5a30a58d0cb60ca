use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneGroup {
    Program,
    Lineage,
    Ligand,
    Receptor,
    Target,
    Housekeeping,
    Other,
}

impl GeneGroup {
    /// Catalog order. Gene indices are assigned group by group in this order.
    pub const ALL: [GeneGroup; 7] = [
        GeneGroup::Program,
        GeneGroup::Lineage,
        GeneGroup::Ligand,
        GeneGroup::Receptor,
        GeneGroup::Target,
        GeneGroup::Housekeeping,
        GeneGroup::Other,
    ];

    pub fn name_prefix(&self) -> &'static str {
        match self {
            GeneGroup::Program => "TF_PROG_",
            GeneGroup::Lineage => "TF_LIN",
            GeneGroup::Ligand => "LIG_",
            GeneGroup::Receptor => "REC_",
            GeneGroup::Target => "TARG_",
            GeneGroup::Housekeeping => "HK_",
            GeneGroup::Other => "OTHER_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneGroup::Program => "program",
            GeneGroup::Lineage => "lineage",
            GeneGroup::Ligand => "ligand",
            GeneGroup::Receptor => "receptor",
            GeneGroup::Target => "target",
            GeneGroup::Housekeeping => "housekeeping",
            GeneGroup::Other => "other",
        }
    }

    fn slot(&self) -> usize {
        match self {
            GeneGroup::Program => 0,
            GeneGroup::Lineage => 1,
            GeneGroup::Ligand => 2,
            GeneGroup::Receptor => 3,
            GeneGroup::Target => 4,
            GeneGroup::Housekeeping => 5,
            GeneGroup::Other => 6,
        }
    }
}

impl FromStr for GeneGroup {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GeneGroup::ALL
            .into_iter()
            .find(|group| group.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                SimError::InvalidArgument(format!("unrecognized gene group '{s}'"))
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSizes {
    pub program: usize,
    pub lineage: usize,
    pub ligand: usize,
    pub receptor: usize,
    pub target: usize,
    pub housekeeping: usize,
    pub other: usize,
}

impl Default for GroupSizes {
    fn default() -> Self {
        Self {
            program: 4,
            lineage: 12,
            ligand: 20,
            receptor: 20,
            target: 80,
            housekeeping: 50,
            other: 14,
        }
    }
}

impl GroupSizes {
    pub fn get(&self, group: GeneGroup) -> usize {
        match group {
            GeneGroup::Program => self.program,
            GeneGroup::Lineage => self.lineage,
            GeneGroup::Ligand => self.ligand,
            GeneGroup::Receptor => self.receptor,
            GeneGroup::Target => self.target,
            GeneGroup::Housekeeping => self.housekeeping,
            GeneGroup::Other => self.other,
        }
    }

    pub fn set(&mut self, group: GeneGroup, size: usize) {
        let slot = match group {
            GeneGroup::Program => &mut self.program,
            GeneGroup::Lineage => &mut self.lineage,
            GeneGroup::Ligand => &mut self.ligand,
            GeneGroup::Receptor => &mut self.receptor,
            GeneGroup::Target => &mut self.target,
            GeneGroup::Housekeeping => &mut self.housekeeping,
            GeneGroup::Other => &mut self.other,
        };
        *slot = size;
    }

    pub fn with_overrides<I, S>(mut self, overrides: I) -> Result<Self, SimError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: AsRef<str>,
    {
        for (name, size) in overrides {
            self.set(name.as_ref().parse()?, size);
        }
        Ok(self)
    }

    pub fn total(&self) -> usize {
        GeneGroup::ALL.iter().map(|&group| self.get(group)).sum()
    }
}

#[derive(Clone, Debug)]
pub struct GeneCatalog {
    names: Vec<String>,
    ranges: [Range<usize>; 7],
}

impl GeneCatalog {
    pub fn new(sizes: &GroupSizes) -> Self {
        let mut names = Vec::with_capacity(sizes.total());
        let mut ranges: [Range<usize>; 7] = Default::default();
        for group in GeneGroup::ALL {
            let start = names.len();
            let count = sizes.get(group);
            names.extend((1..=count).map(|i| format!("{}{}", group.name_prefix(), i)));
            ranges[group.slot()] = start..names.len();
        }
        Self { names, ranges }
    }

    pub fn n_genes(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, gene: usize) -> &str {
        &self.names[gene]
    }

    pub fn indices(&self, group: GeneGroup) -> Range<usize> {
        self.ranges[group.slot()].clone()
    }

    pub fn group_of(&self, gene: usize) -> Option<GeneGroup> {
        GeneGroup::ALL
            .into_iter()
            .find(|group| self.ranges[group.slot()].contains(&gene))
    }

    /// Gene indices of lineage block `block` (0-based), i.e. the
    /// `tfs_per_lineage` consecutive lineage TFs belonging to that lineage.
    pub fn lineage_block(
        &self,
        block: usize,
        tfs_per_lineage: usize,
    ) -> Result<Range<usize>, SimError> {
        let lineage = self.indices(GeneGroup::Lineage);
        let start = lineage.start + block * tfs_per_lineage;
        let end = start + tfs_per_lineage;
        if end > lineage.end {
            return Err(SimError::InvalidArgument(format!(
                "lineage block {} with {} TFs exceeds the {} lineage genes",
                block,
                tfs_per_lineage,
                lineage.len()
            )));
        }
        Ok(start..end)
    }

    pub fn lineage_blocks(
        &self,
        n_lineages: usize,
        tfs_per_lineage: usize,
    ) -> Result<Vec<Range<usize>>, SimError> {
        (0..n_lineages)
            .map(|block| self.lineage_block(block, tfs_per_lineage))
            .collect()
    }
}

/// Splits `range` into `parts` contiguous, disjoint pieces whose lengths
/// differ by at most one; the longer pieces come first.
pub fn split_contiguous(range: Range<usize>, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let len = range.len();
    let base = len / parts;
    let extra = len % parts;
    let mut start = range.start;
    (0..parts)
        .map(|idx| {
            let size = base + usize::from(idx < extra);
            let piece = start..start + size;
            start += size;
            piece
        })
        .collect()
}
