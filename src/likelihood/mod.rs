//! Per-(read, haplotype) log-likelihoods: a pair HMM over each pair, with
//! mapping-quality integration and optional flank trimming.

pub mod error_model;
pub mod pairhmm;

use std::collections::HashMap;

use bio::stats::{LogProb, PHREDProb, Prob};

use crate::basics::read::AlignedRead;
use crate::basics::region::GenomicRegion;
use crate::basics::SampleId;
use crate::haplotypes::HaplotypeBlock;
use crate::reference;

pub use error_model::ErrorModel;
pub use pairhmm::{Alignment, PairHmm};

/// Reads at least this long get a loosened mapping-quality cap.
const LONG_READ_LENGTH: usize = 200;
/// Exponent cap of the uniform mismapping floor.
const MISMAP_FLOOR_BASES: usize = 50;
const LONG_READ_MISMAP_FLOOR_BASES: usize = 100;

#[derive(Debug, Clone)]
pub struct LikelihoodModelConfig {
    pub use_mapping_quality: bool,
    /// Score read flanks hanging over the explicit-allele span; disabled in
    /// very-fast mode, where reads are clipped to the core region instead.
    pub use_flank_state: bool,
    /// Minimum flanking context required around every explicit allele.
    pub pad_requirement: u64,
}

impl Default for LikelihoodModelConfig {
    fn default() -> Self {
        LikelihoodModelConfig {
            use_mapping_quality: true,
            use_flank_state: true,
            pad_requirement: 8,
        }
    }
}

/// Likelihoods of one sample's reads against every block haplotype.
#[derive(Debug, Clone)]
pub struct SampleLikelihoods {
    pub reads: Vec<AlignedRead>,
    /// `matrix[read][haplotype]`
    pub matrix: Vec<Vec<LogProb>>,
    /// Reads whose footprint no haplotype could carry.
    pub ambiguous: Vec<bool>,
}

impl SampleLikelihoods {
    pub fn num_haplotypes(&self) -> usize {
        self.matrix.first().map_or(0, |row| row.len())
    }

    /// Rows of informative (non-ambiguous) reads.
    pub fn informative_rows(&self) -> impl Iterator<Item = &Vec<LogProb>> {
        self.matrix
            .iter()
            .zip(&self.ambiguous)
            .filter(|(_, &ambiguous)| !ambiguous)
            .map(|(row, _)| row)
    }
}

pub type LikelihoodMatrix = HashMap<SampleId, SampleLikelihoods>;

pub struct HaplotypeLikelihoodModel {
    error_model: ErrorModel,
    config: LikelihoodModelConfig,
    hmm: PairHmm,
}

impl HaplotypeLikelihoodModel {
    pub fn new(error_model: ErrorModel, config: LikelihoodModelConfig) -> Self {
        HaplotypeLikelihoodModel {
            error_model,
            config,
            hmm: PairHmm::new(),
        }
    }

    pub fn config(&self) -> &LikelihoodModelConfig {
        &self.config
    }

    /// Evaluate every (read, haplotype) pair for every sample.
    pub fn compute(
        &mut self,
        block: &HaplotypeBlock,
        reads_by_sample: &HashMap<SampleId, Vec<AlignedRead>>,
        reference: &reference::Slice,
    ) -> LikelihoodMatrix {
        let sequences: Vec<_> = block
            .haplotypes
            .iter()
            .map(|h| h.sequence(reference))
            .collect();
        let penalties: Vec<Vec<LogProb>> = sequences
            .iter()
            .map(|seq| self.error_model.gap_open_penalties(seq))
            .collect();
        let core = explicit_allele_span(block).map(|span| {
            span.expanded(self.config.pad_requirement)
        });

        let mut result = LikelihoodMatrix::new();
        for (&sample, reads) in reads_by_sample {
            let reads: Vec<AlignedRead> = reads
                .iter()
                .filter(|r| r.region.overlaps(&block.region))
                .cloned()
                .collect();
            let mode_mq = mode_mapping_quality(&reads);
            let mut matrix = Vec::with_capacity(reads.len());
            let mut ambiguous = Vec::with_capacity(reads.len());
            for read in &reads {
                let (seq, quals) = self.read_window(read, core.as_ref());
                let mut row = Vec::with_capacity(sequences.len());
                for (haplotype_seq, gap_open) in sequences.iter().zip(&penalties) {
                    let mut likelihood = self.hmm.prob_related(&Alignment {
                        read: seq,
                        base_qualities: quals,
                        haplotype: haplotype_seq,
                        gap_open,
                        gap_extend: self.error_model.gap_extend_prob(),
                        snv_error: self.error_model.snv_error,
                    });
                    if self.config.use_mapping_quality {
                        likelihood =
                            integrate_mapping_quality(likelihood, read, seq.len(), mode_mq);
                    }
                    row.push(likelihood);
                }
                ambiguous.push(row.iter().all(|&l| l == LogProb::ln_zero()));
                matrix.push(row);
            }
            result.insert(
                sample,
                SampleLikelihoods {
                    reads,
                    matrix,
                    ambiguous,
                },
            );
        }
        result
    }

    /// The scored read window: the full read with flank state, otherwise the
    /// read clipped to the core region around the explicit alleles.
    fn read_window<'a>(
        &self,
        read: &'a AlignedRead,
        core: Option<&GenomicRegion>,
    ) -> (&'a [u8], &'a [u8]) {
        if self.config.use_flank_state {
            return (&read.sequence, &read.base_qualities);
        }
        let core = match core {
            Some(core) => core,
            None => return (&read.sequence, &read.base_qualities),
        };
        // approximate clipping by reference offsets; indels inside the read
        // shift this by at most their length
        let begin = core.begin().saturating_sub(read.region.begin()) as usize;
        let end = (core.end().saturating_sub(read.region.begin()) as usize).min(read.len());
        if begin >= end {
            return (&read.sequence, &read.base_qualities);
        }
        (&read.sequence[begin..end], &read.base_qualities[begin..end])
    }
}

/// Mix the alignment likelihood with a uniform mismapping floor weighted by
/// the read's mapping quality. Reads above the batch's modal mapping quality
/// are trusted as mapped; long reads get a deeper floor.
fn integrate_mapping_quality(
    likelihood: LogProb,
    read: &AlignedRead,
    scored_len: usize,
    mode_mq: u8,
) -> LogProb {
    if likelihood == LogProb::ln_zero() || read.mapping_quality > mode_mq {
        return likelihood;
    }
    let prob_mismapped = LogProb::from(PHREDProb(f64::from(read.mapping_quality)));
    let prob_mapped = prob_mismapped.ln_one_minus_exp();
    let floor_bases = if read.len() >= LONG_READ_LENGTH {
        LONG_READ_MISMAP_FLOOR_BASES
    } else {
        MISMAP_FLOOR_BASES
    };
    let uniform = LogProb(*LogProb::from(Prob(0.25)) * scored_len.min(floor_bases) as f64);
    (prob_mapped + likelihood).ln_add_exp(prob_mismapped + uniform)
}

fn mode_mapping_quality(reads: &[AlignedRead]) -> u8 {
    let mut counts = [0usize; 256];
    for read in reads {
        counts[read.mapping_quality as usize] += 1;
    }
    counts
        .iter()
        .enumerate()
        .max_by_key(|(_, &count)| count)
        .map(|(mq, _)| mq as u8)
        .unwrap_or(60)
}

fn explicit_allele_span(block: &HaplotypeBlock) -> Option<GenomicRegion> {
    block
        .variants
        .iter()
        .map(|v| v.region().clone())
        .reduce(|a, b| a.encompass(&b))
}

/// Model-based haplotype deduplication: haplotypes whose likelihood columns
/// are indistinguishable across all samples fuse into one. Returns the kept
/// haplotype indices.
pub fn fuse_indistinguishable(matrix: &LikelihoodMatrix, num_haplotypes: usize) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    'outer: for candidate in 0..num_haplotypes {
        for &existing in &kept {
            let mut distinguishable = false;
            for sample in matrix.values() {
                for row in &sample.matrix {
                    if (*row[candidate] - *row[existing]).abs() > 1e-9 {
                        distinguishable = true;
                        break;
                    }
                }
            }
            if !distinguishable {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}
