use anyhow::Result;

use crate::basics::read::CigarOp;
use crate::basics::region::{GenomicRegion, Position};
use crate::basics::variant::Variant;

use super::{CandidateVariantGenerator, GenerationContext};

#[derive(Debug, Clone)]
pub struct RepeatScannerOptions {
    /// Longest repeat motif considered.
    pub max_period: usize,
    /// Minimum tract length in bases.
    pub min_tract_length: usize,
    /// Minimum number of reads with an indel inside the tract before
    /// proposals are made.
    pub min_indel_observations: usize,
}

impl Default for RepeatScannerOptions {
    fn default() -> Self {
        RepeatScannerOptions {
            max_period: 6,
            min_tract_length: 4,
            min_indel_observations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RepeatTract {
    region: GenomicRegion,
    motif: Vec<u8>,
}

/// Proposes one-unit expansions and contractions of short tandem repeats
/// that show indel evidence in the reads.
pub struct RepeatScanner {
    options: RepeatScannerOptions,
}

impl RepeatScanner {
    pub fn new(options: RepeatScannerOptions) -> Self {
        RepeatScanner { options }
    }

    fn find_tracts(&self, ctx: &GenerationContext) -> Vec<RepeatTract> {
        let seq = ctx.reference.bytes();
        let offset = ctx.reference.offset();
        let contig = ctx.reference.contig();
        let mut result = Vec::new();
        for period in 1..=self.options.max_period {
            let mut run_start = 0usize;
            let mut i = 0usize;
            while i + period < seq.len() {
                if seq[i].eq_ignore_ascii_case(&seq[i + period]) {
                    i += 1;
                    continue;
                }
                let run_len = i + period - run_start;
                if run_len >= self.options.min_tract_length.max(2 * period)
                    && run_len > period
                {
                    result.push(RepeatTract {
                        region: GenomicRegion::new(
                            contig,
                            offset + run_start as Position,
                            offset + (run_start + run_len) as Position,
                        ),
                        motif: seq[run_start..run_start + period].to_ascii_uppercase(),
                    });
                }
                i += 1;
                run_start = i;
            }
            let run_len = seq.len() - run_start;
            if run_len >= self.options.min_tract_length.max(2 * period) && run_len > period {
                result.push(RepeatTract {
                    region: GenomicRegion::new(
                        contig,
                        offset + run_start as Position,
                        offset + seq.len() as Position,
                    ),
                    motif: seq[run_start..run_start + period].to_ascii_uppercase(),
                });
            }
        }
        result
    }

    fn indel_evidence(&self, tract: &RepeatTract, ctx: &GenerationContext) -> usize {
        ctx.reads
            .values()
            .flatten()
            .filter(|read| read.region.overlaps(&tract.region))
            .filter(|read| {
                let mut ref_pos = read.region.begin();
                for op in read.cigar.iter() {
                    match *op {
                        CigarOp::Ins(_) if tract.region.contains_position(ref_pos) => {
                            return true;
                        }
                        CigarOp::Del(n) => {
                            let del =
                                GenomicRegion::new(read.region.contig(), ref_pos, ref_pos + u64::from(n));
                            if del.overlaps(&tract.region) {
                                return true;
                            }
                            ref_pos += u64::from(n);
                        }
                        op if op.consumes_reference() => ref_pos += u64::from(op.len()),
                        _ => {}
                    }
                }
                false
            })
            .count()
    }
}

impl CandidateVariantGenerator for RepeatScanner {
    fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>> {
        let mut result = Vec::new();
        for tract in self.find_tracts(ctx) {
            if self.indel_evidence(&tract, ctx) < self.options.min_indel_observations {
                continue;
            }
            let begin = tract.region.begin();
            let contig = tract.region.contig().to_owned();
            result.push(Variant::insertion(contig.clone(), begin, tract.motif.clone()));
            if tract.region.size() >= 2 * tract.motif.len() as u64 {
                result.push(Variant::deletion(contig, begin, tract.motif.clone()));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{AlignedRead, Cigar, ReadFlags};
    use crate::reference;
    use std::collections::HashMap;

    fn indel_read(begin: Position) -> AlignedRead {
        // 4M2I4M over the repeat
        AlignedRead {
            name: "r".into(),
            region: GenomicRegion::new("c", begin, begin + 8),
            sequence: b"ATATATATAT".to_vec(),
            base_qualities: vec![30; 10],
            cigar: Cigar(vec![CigarOp::Match(4), CigarOp::Ins(2), CigarOp::Match(4)]),
            mapping_quality: 60,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn proposes_unit_expansion_and_contraction() {
        //                                          0123456789
        let reference = reference::Slice::new("c", 0, b"GCATATATGC".to_vec());
        let mut reads = HashMap::new();
        reads.insert(0usize, vec![indel_read(1)]);
        let region = reference.region();
        let ctx = GenerationContext {
            reference: &reference,
            reads: &reads,
            region: &region,
        };
        let mut scanner = RepeatScanner::new(RepeatScannerOptions::default());
        let candidates = scanner.generate(&ctx).unwrap();
        assert!(candidates
            .iter()
            .any(|v| v.kind() == crate::basics::variant::VariantKind::Insertion
                && v.alt_sequence() == b"AT"));
        assert!(candidates
            .iter()
            .any(|v| v.kind() == crate::basics::variant::VariantKind::Deletion
                && v.ref_sequence() == b"AT"));
    }

    #[test]
    fn silent_repeats_are_skipped() {
        let reference = reference::Slice::new("c", 0, b"GCATATATGC".to_vec());
        let reads = HashMap::new();
        let region = reference.region();
        let ctx = GenerationContext {
            reference: &reference,
            reads: &reads,
            region: &region,
        };
        let mut scanner = RepeatScanner::new(RepeatScannerOptions::default());
        assert!(scanner.generate(&ctx).unwrap().is_empty());
    }
}
