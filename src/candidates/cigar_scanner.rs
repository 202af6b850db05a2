use std::collections::BTreeMap;

use anyhow::Result;

use crate::basics::read::{AlignedRead, CigarOp};
use crate::basics::region::Position;
use crate::basics::variant::Variant;
use crate::basics::SampleId;

use super::{CandidateObservation, CandidateVariantGenerator, GenerationContext, InclusionPredicate};

/// Parameters of the per-read misalignment test: reads whose mismatch
/// pattern is implausible under the expected mutation rate contribute depth
/// but not support.
#[derive(Debug, Clone)]
pub struct MisalignmentParameters {
    pub max_expected_mutation_rate: f64,
    pub snv_threshold: u8,
    pub indel_penalty: f64,
    pub clip_penalty: f64,
    pub min_ln_prob_correctly_aligned: f64,
}

impl Default for MisalignmentParameters {
    fn default() -> Self {
        MisalignmentParameters {
            max_expected_mutation_rate: 0.02,
            snv_threshold: 20,
            indel_penalty: 1.0,
            clip_penalty: 1.0,
            min_ln_prob_correctly_aligned: (0.0005f64).ln(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CigarScannerOptions {
    pub min_base_quality: u8,
    pub include: InclusionPredicate,
    pub misalignment: MisalignmentParameters,
    /// Sample whose observations count as "normal" in somatic predicates.
    pub normal_sample: Option<SampleId>,
}

impl Default for CigarScannerOptions {
    fn default() -> Self {
        CigarScannerOptions {
            min_base_quality: 20,
            include: InclusionPredicate::Germline {
                min_support: 2,
                max_expected_mutation_rate: 0.1,
            },
            misalignment: MisalignmentParameters::default(),
            normal_sample: None,
        }
    }
}

/// Proposes SNVs, insertions and deletions read by read from CIGAR strings.
pub struct CigarScanner {
    options: CigarScannerOptions,
}

impl CigarScanner {
    pub fn new(options: CigarScannerOptions) -> Self {
        CigarScanner { options }
    }

    /// Walk one read's CIGAR against the reference, appending every variant
    /// it implies.
    fn scan_read(&self, read: &AlignedRead, ctx: &GenerationContext, out: &mut Vec<Variant>) {
        let contig = read.region.contig();
        let mut ref_pos = read.region.begin();
        let mut read_pos = 0usize;
        for op in read.cigar.iter() {
            match *op {
                CigarOp::Match(n) | CigarOp::Diff(n) => {
                    for i in 0..n as usize {
                        let pos = ref_pos + i as Position;
                        let read_base = read.sequence[read_pos + i].to_ascii_uppercase();
                        let quality = read.base_qualities[read_pos + i];
                        if quality < self.options.min_base_quality {
                            continue;
                        }
                        if let Some(ref_base) = ctx.reference.base_at(pos) {
                            let ref_base = ref_base.to_ascii_uppercase();
                            if ref_base != read_base && read_base != b'N' && ref_base != b'N' {
                                out.push(Variant::snv(contig, pos, ref_base, read_base));
                            }
                        }
                    }
                    ref_pos += u64::from(n);
                    read_pos += n as usize;
                }
                CigarOp::Equal(n) => {
                    ref_pos += u64::from(n);
                    read_pos += n as usize;
                }
                CigarOp::Ins(n) => {
                    let inserted =
                        read.sequence[read_pos..read_pos + n as usize].to_ascii_uppercase();
                    out.push(Variant::insertion(contig, ref_pos, inserted));
                    read_pos += n as usize;
                }
                CigarOp::Del(n) => {
                    let deleted = (ref_pos..ref_pos + u64::from(n))
                        .map(|pos| {
                            ctx.reference
                                .base_at(pos)
                                .unwrap_or(b'N')
                                .to_ascii_uppercase()
                        })
                        .collect();
                    out.push(Variant::deletion(contig, ref_pos, deleted));
                    ref_pos += u64::from(n);
                }
                CigarOp::RefSkip(n) => {
                    ref_pos += u64::from(n);
                }
                CigarOp::SoftClip(n) => {
                    read_pos += n as usize;
                }
                CigarOp::HardClip(_) | CigarOp::Pad(_) => {}
            }
        }
    }

    /// Log-probability that the read is correctly aligned, judged from its
    /// mismatches, indels and clips under the expected mutation rate.
    fn ln_prob_correctly_aligned(&self, read: &AlignedRead, ctx: &GenerationContext) -> f64 {
        let params = &self.options.misalignment;
        let ln_rate = params.max_expected_mutation_rate.ln();
        let mut ln_prob = 0.0;
        let mut ref_pos = read.region.begin();
        let mut read_pos = 0usize;
        for op in read.cigar.iter() {
            match *op {
                CigarOp::Match(n) | CigarOp::Diff(n) => {
                    for i in 0..n as usize {
                        let read_base = read.sequence[read_pos + i].to_ascii_uppercase();
                        let quality = read.base_qualities[read_pos + i];
                        match ctx.reference.base_at(ref_pos + i as Position) {
                            Some(ref_base)
                                if ref_base.to_ascii_uppercase() != read_base
                                    && quality >= params.snv_threshold =>
                            {
                                ln_prob += ln_rate;
                            }
                            _ => {}
                        }
                    }
                    ref_pos += u64::from(n);
                    read_pos += n as usize;
                }
                CigarOp::Equal(n) => {
                    ref_pos += u64::from(n);
                    read_pos += n as usize;
                }
                CigarOp::Ins(n) => {
                    ln_prob += params.indel_penalty * ln_rate;
                    read_pos += n as usize;
                }
                CigarOp::Del(n) => {
                    ln_prob += params.indel_penalty * ln_rate;
                    ref_pos += u64::from(n);
                }
                CigarOp::RefSkip(n) => {
                    ref_pos += u64::from(n);
                }
                CigarOp::SoftClip(n) => {
                    ln_prob += params.clip_penalty * ln_rate;
                    read_pos += n as usize;
                }
                CigarOp::HardClip(_) | CigarOp::Pad(_) => {}
            }
        }
        ln_prob
    }
}

impl CandidateVariantGenerator for CigarScanner {
    fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>> {
        let mut observations: BTreeMap<Variant, CandidateObservation> = BTreeMap::new();
        for (&sample, reads) in ctx.reads {
            let is_normal = self.options.normal_sample == Some(sample);
            for read in reads {
                let misaligned = self.ln_prob_correctly_aligned(read, ctx)
                    < self.options.misalignment.min_ln_prob_correctly_aligned;
                let mut proposals = Vec::new();
                self.scan_read(read, ctx, &mut proposals);
                for variant in proposals {
                    let variant = variant
                        .canonicalized(ctx.reference.bytes(), ctx.reference.offset());
                    let entry = observations.entry(variant).or_default();
                    if !misaligned {
                        entry.support += 1;
                        if is_normal {
                            entry.normal_support += 1;
                        }
                    }
                }
            }
        }
        // depth at each candidate's anchor
        for (variant, observation) in observations.iter_mut() {
            for (&sample, reads) in ctx.reads {
                let depth = reads
                    .iter()
                    .filter(|r| r.region.overlaps(variant.region()))
                    .count();
                observation.depth += depth;
                if self.options.normal_sample == Some(sample) {
                    observation.normal_depth = depth;
                }
            }
        }
        Ok(observations
            .into_iter()
            .filter(|(_, observation)| self.options.include.includes(observation))
            .map(|(variant, _)| variant)
            .collect())
    }
}
