//! The call data model, the phaser, the per-contig scheduler and the output
//! writer.

pub mod output;
pub mod phaser;
pub mod progress;
pub mod scheduler;

use bio::stats::{LogProb, PHREDProb};

use crate::basics::genotype::Genotype;
use crate::basics::region::{GenomicRegion, Position};
use crate::basics::variant::Variant;
use crate::basics::SampleId;

/// One sample's genotype at one called site.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCall {
    pub sample: SampleId,
    /// Allele index per haplotype copy at this site: 0 = reference, 1 = alt.
    pub genotype: Vec<u8>,
    pub genotype_quality: PHREDProb,
}

/// A called variant with per-sample genotypes and posterior quality.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantCall {
    pub variant: Variant,
    /// PHRED-scaled posterior that the variant is present at all.
    pub quality: PHREDProb,
    pub samples: Vec<SampleCall>,
    /// Posterior that the child allele arose de novo (trio calling).
    pub denovo_posterior: Option<LogProb>,
    /// Flagged as a somatic mutation (cancer calling).
    pub somatic: bool,
    /// Expected somatic allele frequency of the winning model.
    pub somatic_frequency: Option<f64>,
    /// Identifier of the phase set containing this call.
    pub phase_set: Option<Position>,
}

impl VariantCall {
    pub fn new(variant: Variant, quality: PHREDProb, samples: Vec<SampleCall>) -> Self {
        VariantCall {
            variant,
            quality,
            samples,
            denovo_posterior: None,
            somatic: false,
            somatic_frequency: None,
            phase_set: None,
        }
    }
}

/// A region confidently matching the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RefCall {
    pub region: GenomicRegion,
    pub quality: PHREDProb,
    pub sample_depths: Vec<(SampleId, u32)>,
}

/// Per-sample genotype posterior over the block's haplotypes; the phaser
/// reads these to score phase configurations.
#[derive(Debug, Clone)]
pub struct GenotypePosteriors {
    pub sample: SampleId,
    /// Normalized (genotype, posterior) pairs.
    pub distribution: Vec<(Genotype<usize>, LogProb)>,
    pub map_genotype: Genotype<usize>,
}

impl GenotypePosteriors {
    pub fn posterior_of(&self, genotype: &Genotype<usize>) -> LogProb {
        self.distribution
            .iter()
            .find(|(g, _)| g == genotype)
            .map(|(_, p)| *p)
            .unwrap_or_else(LogProb::ln_zero)
    }
}

/// Everything one haplotype block produced.
#[derive(Debug, Clone)]
pub struct BlockCalls {
    pub region: GenomicRegion,
    pub variant_calls: Vec<VariantCall>,
    pub refcalls: Vec<RefCall>,
    pub posteriors: Vec<GenotypePosteriors>,
    /// Per haplotype: does it carry each of the block's variants?
    /// `haplotype_content[h][v]` is indexed like `variants`.
    pub haplotype_content: Vec<Vec<bool>>,
    /// The block's variants, in the order `haplotype_content` uses.
    pub variants: Vec<Variant>,
}
