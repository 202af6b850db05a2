//! Genotype posterior models: one capability trait, five caller flavors
//! behind a tagged sum, and the shared enumeration, prior and refcall
//! machinery they build on.

pub mod cancer;
pub mod cell;
pub mod individual;
pub mod polyclone;
pub mod priors;
pub mod trio;
pub mod vb;

use anyhow::Result;
use bio::stats::{LogProb, PHREDProb, Prob};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::basics::genotype::Genotype;
use crate::basics::haplotype::Haplotype;
use crate::basics::region::GenomicRegion;
use crate::basics::variant::Variant;
use crate::calling::{BlockCalls, GenotypePosteriors, RefCall};
use crate::haplotypes::HaplotypeBlock;
use crate::likelihood::{LikelihoodMatrix, SampleLikelihoods};
use crate::reference;

pub use cancer::CancerCaller;
pub use cell::CellCaller;
pub use individual::IndividualCaller;
pub use polyclone::PolycloneCaller;
pub use priors::GenotypePrior;
pub use trio::TrioCaller;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum RefCallType {
    None,
    Positional,
    Blocked,
}

/// Parameters shared by every caller flavor.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub snv_heterozygosity: f64,
    pub indel_heterozygosity: f64,
    pub max_genotypes: usize,
    /// PHRED-scaled emission threshold for variant calls.
    pub min_variant_posterior: f64,
    /// PHRED-scaled emission threshold for refcalls.
    pub min_refcall_posterior: f64,
    pub refcall_type: RefCallType,
    pub refcall_block_merge_threshold: f64,
    pub sites_only: bool,
    pub model_based_haplotype_dedup: bool,
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            snv_heterozygosity: 1e-3,
            indel_heterozygosity: 1e-4,
            max_genotypes: 5000,
            min_variant_posterior: 2.0,
            min_refcall_posterior: 2.0,
            refcall_type: RefCallType::None,
            refcall_block_merge_threshold: 10.0,
            sites_only: false,
            model_based_haplotype_dedup: false,
            seed: 0x6f63_746f,
        }
    }
}

impl ModelParams {
    pub fn prior(&self) -> GenotypePrior {
        GenotypePrior {
            snv_heterozygosity: self.snv_heterozygosity,
            indel_heterozygosity: self.indel_heterozygosity,
        }
    }
}

/// One haplotype block's worth of evidence for a caller.
pub struct CallInput<'a> {
    pub block: &'a HaplotypeBlock,
    pub likelihoods: &'a LikelihoodMatrix,
    pub reference: &'a reference::Slice,
}

/// The capability surface shared by all caller flavors.
pub trait CallerModel {
    /// Posterior over genotype assignments per sample.
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>>;

    /// Variant calls, refcalls and phasing inputs for the block.
    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls>;

    /// Names of the parameters this flavor requires beyond the shared set.
    fn required_params(&self) -> &'static [&'static str];
}

/// The caller flavors as a tagged sum; construction happens in `cli`.
pub enum Caller {
    Individual(IndividualCaller),
    Population(IndividualCaller),
    Trio(TrioCaller),
    Cancer(CancerCaller),
    Polyclone(PolycloneCaller),
    Cell(CellCaller),
}

impl CallerModel for Caller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        match self {
            Caller::Individual(c) | Caller::Population(c) => c.score_genotypes(input),
            Caller::Trio(c) => c.score_genotypes(input),
            Caller::Cancer(c) => c.score_genotypes(input),
            Caller::Polyclone(c) => c.score_genotypes(input),
            Caller::Cell(c) => c.score_genotypes(input),
        }
    }

    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls> {
        match self {
            Caller::Individual(c) | Caller::Population(c) => c.emit_calls(input),
            Caller::Trio(c) => c.emit_calls(input),
            Caller::Cancer(c) => c.emit_calls(input),
            Caller::Polyclone(c) => c.emit_calls(input),
            Caller::Cell(c) => c.emit_calls(input),
        }
    }

    fn required_params(&self) -> &'static [&'static str] {
        match self {
            Caller::Individual(c) | Caller::Population(c) => c.required_params(),
            Caller::Trio(c) => c.required_params(),
            Caller::Cancer(c) => c.required_params(),
            Caller::Polyclone(c) => c.required_params(),
            Caller::Cell(c) => c.required_params(),
        }
    }
}

/// Haplotype indices eligible for genotype enumeration: all of them, or the
/// fused set when model-based deduplication is on.
pub fn candidate_haplotypes(input: &CallInput, params: &ModelParams) -> Vec<usize> {
    if params.model_based_haplotype_dedup {
        crate::likelihood::fuse_indistinguishable(
            input.likelihoods,
            input.block.haplotypes.len(),
        )
    } else {
        (0..input.block.haplotypes.len()).collect()
    }
}

/// Enumerate genotypes over the eligible haplotypes, mapped back onto the
/// block's haplotype indices.
pub fn enumerate_over(
    input: &CallInput,
    params: &ModelParams,
    ploidy: usize,
) -> Vec<Genotype<usize>> {
    let kept = candidate_haplotypes(input, params);
    crate::basics::genotype::enumerate_genotypes(kept.len(), ploidy, params.max_genotypes)
        .into_iter()
        .map(|g| Genotype::new(g.iter().map(|&i| kept[i])))
        .collect()
}

/// Which block variants each haplotype carries; rows parallel the block's
/// haplotypes, columns the returned variant order.
pub fn haplotype_content(block: &HaplotypeBlock) -> (Vec<Variant>, Vec<Vec<bool>>) {
    let variants = block.variants.clone();
    let content = block
        .haplotypes
        .iter()
        .map(|h| {
            variants
                .iter()
                .map(|v| h.contains(&v.alt_allele()))
                .collect()
        })
        .collect();
    (variants, content)
}

/// ln P(reads | genotype): per read, the average over haplotype copies.
pub fn ln_genotype_likelihood(
    sample: &SampleLikelihoods,
    genotype: &Genotype<usize>,
) -> LogProb {
    let ln_ploidy = (genotype.ploidy() as f64).ln();
    let mut total = LogProb::ln_one();
    for row in sample.informative_rows() {
        let copies: Vec<LogProb> = genotype.iter().map(|&h| row[h]).collect();
        total = total + LogProb(*LogProb::ln_sum_exp(&copies) - ln_ploidy);
    }
    total
}

/// Normalized genotype posterior for one sample over an enumeration.
pub fn genotype_distribution(
    sample: &SampleLikelihoods,
    genotypes: &[Genotype<usize>],
    prior: &GenotypePrior,
    haplotypes: &[Haplotype],
) -> Vec<(Genotype<usize>, LogProb)> {
    let joints: Vec<LogProb> = genotypes
        .iter()
        .map(|g| prior.ln_prior(g, haplotypes) + ln_genotype_likelihood(sample, g))
        .collect();
    let norm = LogProb::ln_sum_exp(&joints);
    genotypes
        .iter()
        .cloned()
        .zip(joints.into_iter().map(|j| (j - norm).cap_numerical_overshoot(1e-9)))
        .collect()
}

pub fn map_genotype(distribution: &[(Genotype<usize>, LogProb)]) -> Genotype<usize> {
    distribution
        .iter()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).expect("posteriors are comparable"))
        .map(|(g, _)| g.clone())
        .expect("non-empty genotype distribution")
}

/// PHRED quality of "this is not the case": `p` is the posterior of the
/// called event.
pub fn quality_from_posterior(posterior: LogProb) -> PHREDProb {
    PHREDProb::from(posterior.ln_one_minus_exp().cap_numerical_overshoot(1e-9))
}

/// Marginal posterior that the sample carries `variant` on any haplotype.
pub fn variant_marginal(
    distribution: &[(Genotype<usize>, LogProb)],
    content: &[Vec<bool>],
    variant_index: usize,
) -> LogProb {
    let supporting: Vec<LogProb> = distribution
        .iter()
        .filter(|(g, _)| g.iter().any(|&h| content[h][variant_index]))
        .map(|(_, p)| *p)
        .collect();
    if supporting.is_empty() {
        LogProb::ln_zero()
    } else {
        LogProb::ln_sum_exp(&supporting).cap_numerical_overshoot(1e-9)
    }
}

/// Reference-call engine shared by the caller flavors: per-position
/// hom-ref posterior from base agreement, optionally merged into blocks.
pub fn make_refcalls(
    input: &CallInput,
    params: &ModelParams,
    called: &[GenomicRegion],
) -> Vec<RefCall> {
    if params.refcall_type == RefCallType::None {
        return Vec::new();
    }
    let region = &input.block.region;
    let het_prior = LogProb::from(Prob(
        (params.snv_heterozygosity + params.indel_heterozygosity).min(0.5),
    ));
    let mut positions = Vec::new();
    for pos in region.begin()..region.end() {
        if called.iter().any(|r| r.contains_position(pos)) {
            continue;
        }
        let ref_base = match input.reference.base_at(pos) {
            Some(base) => base.to_ascii_uppercase(),
            None => continue,
        };
        let mut ln_ref = LogProb::ln_one();
        let mut ln_het = LogProb::ln_one();
        let mut depths: Vec<(usize, u32)> = Vec::new();
        // stable sample order keeps the float accumulation reproducible
        for (&sample, likelihoods) in input.likelihoods.iter().sorted_by_key(|(&s, _)| s) {
            let mut sample_depth = 0u32;
            for read in &likelihoods.reads {
                if let Some((base, quality)) = base_at_position(read, pos) {
                    sample_depth += 1;
                    let miscall = LogProb::from(PHREDProb(f64::from(quality)));
                    if base.to_ascii_uppercase() == ref_base {
                        ln_ref = ln_ref + miscall.ln_one_minus_exp();
                    } else {
                        ln_ref = ln_ref + miscall;
                    }
                    // heterozygous alternative: half the reads mismatch
                    ln_het = ln_het + LogProb::from(Prob(0.5));
                }
            }
            depths.push((sample, sample_depth));
        }
        depths.sort_unstable();
        let joint_ref = ln_ref + het_prior.ln_one_minus_exp();
        let joint_het = ln_het + het_prior;
        let posterior_ref = joint_ref - joint_ref.ln_add_exp(joint_het);
        let quality = PHREDProb::from(
            posterior_ref.ln_one_minus_exp().cap_numerical_overshoot(1e-9),
        );
        positions.push((pos, quality, depths));
    }

    match params.refcall_type {
        RefCallType::None => Vec::new(),
        RefCallType::Positional => positions
            .into_iter()
            .filter(|(_, quality, _)| **quality >= params.min_refcall_posterior)
            .map(|(pos, quality, depths)| RefCall {
                region: GenomicRegion::new(region.contig(), pos, pos + 1),
                quality,
                sample_depths: depths,
            })
            .collect(),
        RefCallType::Blocked => merge_refcall_blocks(region.contig(), positions, params),
    }
}

type PositionCall = (u64, PHREDProb, Vec<(usize, u32)>);

/// Adjacent qualifying positions merge into one block while each clears the
/// block-merge threshold; the block's quality is its weakest member.
fn merge_refcall_blocks(
    contig: &str,
    positions: Vec<PositionCall>,
    params: &ModelParams,
) -> Vec<RefCall> {
    let mut result = Vec::new();
    let mut open: Option<RefCall> = None;
    let mut close = |open: &mut Option<RefCall>, result: &mut Vec<RefCall>| {
        if let Some(call) = open.take() {
            result.push(call);
        }
    };
    for (pos, quality, depths) in positions {
        if *quality < params.min_refcall_posterior {
            close(&mut open, &mut result);
            continue;
        }
        let mergeable = *quality >= params.refcall_block_merge_threshold;
        match open.as_mut() {
            Some(call)
                if call.region.end() == pos
                    && mergeable
                    && *call.quality >= params.refcall_block_merge_threshold =>
            {
                call.region =
                    GenomicRegion::new(contig, call.region.begin(), pos + 1);
                if *quality < *call.quality {
                    call.quality = quality;
                }
            }
            _ => {
                close(&mut open, &mut result);
                open = Some(RefCall {
                    region: GenomicRegion::new(contig, pos, pos + 1),
                    quality,
                    sample_depths: depths,
                });
            }
        }
    }
    close(&mut open, &mut result);
    result
}

/// Base and quality a read reports at a reference position, if it aligns one
/// there (indels walk the CIGAR).
pub fn base_at_position(
    read: &crate::basics::read::AlignedRead,
    pos: u64,
) -> Option<(u8, u8)> {
    use crate::basics::read::CigarOp;
    if !read.region.contains_position(pos) {
        return None;
    }
    let mut ref_pos = read.region.begin();
    let mut read_pos = 0usize;
    for op in read.cigar.iter() {
        match *op {
            CigarOp::Match(n) | CigarOp::Equal(n) | CigarOp::Diff(n) => {
                if pos < ref_pos + u64::from(n) {
                    let offset = (pos - ref_pos) as usize;
                    return Some((
                        read.sequence[read_pos + offset],
                        read.base_qualities[read_pos + offset],
                    ));
                }
                ref_pos += u64::from(n);
                read_pos += n as usize;
            }
            CigarOp::Del(n) | CigarOp::RefSkip(n) => {
                if pos < ref_pos + u64::from(n) {
                    return None;
                }
                ref_pos += u64::from(n);
            }
            CigarOp::Ins(n) | CigarOp::SoftClip(n) => {
                read_pos += n as usize;
            }
            CigarOp::HardClip(_) | CigarOp::Pad(_) => {}
        }
    }
    None
}
