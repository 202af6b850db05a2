//! Haplotype-based variant calling: candidate generation from alignments,
//! haplotype enumeration over active regions, pair-HMM read likelihoods, and
//! Bayesian genotype models for individual, population, trio, cancer,
//! polyclone and single-cell samples.

pub mod basics;
pub mod calling;
pub mod candidates;
pub mod cli;
pub mod errors;
pub mod genotype;
pub mod haplotypes;
pub mod likelihood;
pub mod readpipe;
pub mod reference;
pub mod utils;

pub use basics::{
    AlignedRead, Allele, CancerGenotype, GenomicRegion, Genotype, Haplotype, Pedigree,
    PloidyMap, Position, SampleId, SampleRegistry, Trio, Variant,
};
pub use calling::{BlockCalls, GenotypePosteriors, RefCall, SampleCall, VariantCall};
pub use errors::{Error, ProgramError, SystemError, UserError};
