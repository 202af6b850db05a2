//! Core value types shared by every pipeline stage: genomic regions,
//! alleles, variants, haplotypes, genotypes, aligned reads, pedigrees and
//! ploidy maps.

pub mod allele;
pub mod genotype;
pub mod haplotype;
pub mod pedigree;
pub mod ploidy;
pub mod read;
pub mod region;
pub mod variant;

pub use allele::Allele;
pub use genotype::{CancerGenotype, Genotype};
pub use haplotype::Haplotype;
pub use pedigree::{Pedigree, Sex, Trio};
pub use ploidy::PloidyMap;
pub use read::{AlignedRead, Cigar, CigarOp};
pub use region::{GenomicRegion, Position};
pub use variant::Variant;

/// Index of a registered sample.
pub type SampleId = usize;

/// Owner of all sample names for a run. Components refer to samples by
/// [`SampleId`] so names are never copied after registration.
#[derive(Debug, Default, Clone)]
pub struct SampleRegistry {
    names: Vec<String>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sample name, returning its id. Re-registering an existing
    /// name returns the previously assigned id.
    pub fn register<S: Into<String>>(&mut self, name: S) -> SampleId {
        let name = name.into();
        if let Some(id) = self.id_of(&name) {
            return id;
        }
        self.names.push(name);
        self.names.len() - 1
    }

    pub fn id_of(&self, name: &str) -> Option<SampleId> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name(&self, id: SampleId) -> &str {
        &self.names[id]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SampleId> {
        0..self.names.len()
    }
}
