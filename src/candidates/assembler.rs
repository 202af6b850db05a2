use std::collections::{HashMap, HashSet};

use anyhow::Result;
use itertools::Itertools;
use log::trace;
use ordered_float::NotNan;

use crate::basics::region::{GenomicRegion, Position};
use crate::basics::variant::Variant;

use super::{CandidateVariantGenerator, GenerationContext};

#[derive(Debug, Clone)]
pub struct ReassemblerOptions {
    /// Primary kmer sizes, tried in order.
    pub kmer_sizes: Vec<usize>,
    /// Extra kmer sizes tried when a primary size yields a cyclic graph.
    pub num_fallbacks: usize,
    /// Gap between successive fallback kmer sizes.
    pub fallback_interval_size: usize,
    /// Bases below this quality are masked out of the graph.
    pub mask_threshold: u8,
    /// Kmers observed fewer times than this are pruned.
    pub min_kmer_observations: usize,
    /// Bubbles explored per assembled bin.
    pub max_bubbles: usize,
    /// Minimum bubble score (min kmer multiplicity along the alternative path).
    pub min_bubble_score: f64,
    pub max_variant_size: usize,
    pub bin_size: u64,
    pub bin_overlap: u64,
}

impl Default for ReassemblerOptions {
    fn default() -> Self {
        ReassemblerOptions {
            kmer_sizes: vec![10, 15, 20],
            num_fallbacks: 6,
            fallback_interval_size: 10,
            mask_threshold: 3,
            min_kmer_observations: 2,
            max_bubbles: 30,
            min_bubble_score: 2.0,
            max_variant_size: 2000,
            bin_size: 400,
            bin_overlap: 200,
        }
    }
}

/// Assembles reads into a de Bruijn graph per bin and reports the variants
/// implied by bubbles diverging from the reference path.
pub struct LocalReassembler {
    options: ReassemblerOptions,
}

#[derive(Debug)]
struct CyclicGraph;

impl LocalReassembler {
    pub fn new(options: ReassemblerOptions) -> Self {
        LocalReassembler { options }
    }

    fn kmer_size_sequence(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.options.kmer_sizes.iter().copied().sorted().collect();
        if let Some(&largest) = sizes.last() {
            for i in 1..=self.options.num_fallbacks {
                sizes.push(largest + i * self.options.fallback_interval_size);
            }
        }
        sizes
    }

    fn assemble_bin(
        &self,
        bin: &GenomicRegion,
        ctx: &GenerationContext,
        out: &mut Vec<Variant>,
    ) {
        let ref_seq = match ctx.reference.subsequence(bin) {
            Some(seq) => seq.to_ascii_uppercase(),
            None => return,
        };
        let read_seqs: Vec<Vec<u8>> = ctx
            .reads
            .values()
            .flatten()
            .filter(|read| read.region.overlaps(bin))
            .map(|read| {
                read.sequence
                    .iter()
                    .zip(&read.base_qualities)
                    .map(|(&base, &quality)| {
                        if quality < self.options.mask_threshold {
                            b'N'
                        } else {
                            base.to_ascii_uppercase()
                        }
                    })
                    .collect()
            })
            .collect();
        if read_seqs.is_empty() {
            return;
        }
        for k in self.kmer_size_sequence() {
            match self.assemble_with(k, &ref_seq, &read_seqs, bin) {
                Ok(variants) => {
                    out.extend(variants);
                    return;
                }
                Err(CyclicGraph) => {
                    trace!("cyclic assembly graph in {} with k={}, falling back", bin, k);
                }
            }
        }
    }

    fn assemble_with(
        &self,
        k: usize,
        ref_seq: &[u8],
        read_seqs: &[Vec<u8>],
        bin: &GenomicRegion,
    ) -> std::result::Result<Vec<Variant>, CyclicGraph> {
        if ref_seq.len() <= k {
            return Ok(Vec::new());
        }
        // the reference must spell a unique path
        let ref_kmers: Vec<&[u8]> = ref_seq.windows(k).collect();
        let mut ref_index: HashMap<&[u8], usize> = HashMap::with_capacity(ref_kmers.len());
        for (i, kmer) in ref_kmers.iter().enumerate() {
            if ref_index.insert(kmer, i).is_some() {
                return Err(CyclicGraph);
            }
        }

        let mut counts: HashMap<Vec<u8>, usize> = HashMap::new();
        for seq in read_seqs {
            for kmer in seq.windows(k) {
                if kmer.contains(&b'N') {
                    continue;
                }
                *counts.entry(kmer.to_vec()).or_insert(0) += 1;
            }
        }
        counts.retain(|_, &mut count| count >= self.options.min_kmer_observations);

        let mut bubbles: Vec<(f64, Vec<Variant>)> = Vec::new();
        for (i, ref_kmer) in ref_kmers.iter().enumerate() {
            for &branch in b"ACGT" {
                if i + k < ref_seq.len() && branch == ref_seq[i + k] {
                    continue;
                }
                let mut candidate = ref_kmer[1..].to_vec();
                candidate.push(branch);
                let count = match counts.get(&candidate) {
                    Some(&count) => count,
                    None => continue,
                };
                if let Some((score, variants)) =
                    self.walk_bubble(i, candidate, count, &ref_index, &counts, ref_seq, bin, k)
                {
                    bubbles.push((score, variants));
                }
                if bubbles.len() >= 4 * self.options.max_bubbles {
                    break;
                }
            }
        }
        bubbles.sort_by_key(|(score, _)| std::cmp::Reverse(NotNan::new(*score).unwrap()));
        Ok(bubbles
            .into_iter()
            .take(self.options.max_bubbles)
            .filter(|(score, _)| *score >= self.options.min_bubble_score)
            .flat_map(|(_, variants)| variants)
            .collect())
    }

    /// Follow an off-reference branch until it rejoins the reference path,
    /// returning the bubble's score and implied variants.
    #[allow(clippy::too_many_arguments)]
    fn walk_bubble(
        &self,
        branch_at: usize,
        first: Vec<u8>,
        first_count: usize,
        ref_index: &HashMap<&[u8], usize>,
        counts: &HashMap<Vec<u8>, usize>,
        ref_seq: &[u8],
        bin: &GenomicRegion,
        k: usize,
    ) -> Option<(f64, Vec<Variant>)> {
        let max_steps = self.options.max_variant_size + 2 * k;
        let mut current = first;
        let mut appended = Vec::with_capacity(max_steps);
        let mut min_count = first_count;
        let mut visited: HashSet<Vec<u8>> = HashSet::new();
        for _ in 0..max_steps {
            appended.push(*current.last().unwrap());
            if let Some(&rejoin) = ref_index.get(current.as_slice()) {
                if rejoin > branch_at {
                    // spell out both paths between the anchors
                    let ref_segment = &ref_seq[branch_at..rejoin + k];
                    let mut alt_segment = ref_seq[branch_at..branch_at + k].to_vec();
                    alt_segment.extend_from_slice(&appended);
                    let begin = bin.begin() + branch_at as Position;
                    let variants =
                        align_segments(ref_segment, &alt_segment, bin.contig(), begin);
                    if variants.is_empty() {
                        return None;
                    }
                    return Some((min_count as f64, variants));
                }
            }
            if !visited.insert(current.clone()) {
                return None;
            }
            // greedy extension along the heaviest edge
            let mut best: Option<(usize, u8)> = None;
            for &base in b"ACGT" {
                let mut next = current[1..].to_vec();
                next.push(base);
                if let Some(&count) = counts.get(&next) {
                    if best.map_or(true, |(best_count, _)| count > best_count) {
                        best = Some((count, base));
                    }
                }
            }
            let (count, base) = best?;
            min_count = min_count.min(count);
            current = {
                let mut next = current[1..].to_vec();
                next.push(base);
                next
            };
        }
        None
    }
}

impl CandidateVariantGenerator for LocalReassembler {
    fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>> {
        let mut result = Vec::new();
        let mut begin = ctx.region.begin();
        loop {
            let end = (begin + self.options.bin_size).min(ctx.region.end());
            let bin = GenomicRegion::new(ctx.region.contig(), begin, end);
            self.assemble_bin(&bin, ctx, &mut result);
            if end >= ctx.region.end() {
                break;
            }
            begin = end - self.options.bin_overlap.min(self.options.bin_size / 2);
        }
        result = result
            .into_iter()
            .map(|v| v.canonicalized(ctx.reference.bytes(), ctx.reference.offset()))
            .collect();
        result.sort();
        result.dedup();
        Ok(result)
    }
}

/// Global alignment of two segments sharing their end anchors, decomposed
/// into SNVs and indels.
fn align_segments(
    ref_segment: &[u8],
    alt_segment: &[u8],
    contig: &str,
    ref_begin: Position,
) -> Vec<Variant> {
    let n = ref_segment.len();
    let m = alt_segment.len();
    // edit DP with unit costs and mismatch allowed
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i as u32;
    }
    for j in 0..=m {
        dp[0][j] = j as u32;
    }
    for i in 1..=n {
        for j in 1..=m {
            let sub = dp[i - 1][j - 1] + u32::from(ref_segment[i - 1] != alt_segment[j - 1]);
            let del = dp[i - 1][j] + 1;
            let ins = dp[i][j - 1] + 1;
            dp[i][j] = sub.min(del).min(ins);
        }
    }
    // traceback; an open gap keeps extending so indels come out in one piece
    let mut variants = Vec::new();
    let (mut i, mut j) = (n, m);
    let mut pending_del: Vec<u8> = Vec::new();
    let mut pending_ins: Vec<u8> = Vec::new();
    let mut flush =
        |pos: usize, pending_del: &mut Vec<u8>, pending_ins: &mut Vec<u8>, out: &mut Vec<Variant>| {
            if !pending_del.is_empty() {
                pending_del.reverse();
                out.push(Variant::deletion(
                    contig,
                    ref_begin + pos as Position,
                    std::mem::take(pending_del),
                ));
            }
            if !pending_ins.is_empty() {
                pending_ins.reverse();
                out.push(Variant::insertion(
                    contig,
                    ref_begin + pos as Position,
                    std::mem::take(pending_ins),
                ));
            }
        };
    while i > 0 || j > 0 {
        let diag_ok = i > 0
            && j > 0
            && dp[i][j] == dp[i - 1][j - 1] + u32::from(ref_segment[i - 1] != alt_segment[j - 1]);
        let del_ok = i > 0 && dp[i][j] == dp[i - 1][j] + 1;
        let ins_ok = j > 0 && dp[i][j] == dp[i][j - 1] + 1;
        let extend_ins = ins_ok && !pending_ins.is_empty();
        let extend_del = del_ok && !pending_del.is_empty();
        if !extend_ins && !extend_del && diag_ok {
            flush(i, &mut pending_del, &mut pending_ins, &mut variants);
            if ref_segment[i - 1] != alt_segment[j - 1] {
                variants.push(Variant::snv(
                    contig,
                    ref_begin + (i - 1) as Position,
                    ref_segment[i - 1],
                    alt_segment[j - 1],
                ));
            }
            i -= 1;
            j -= 1;
        } else if extend_del || (!extend_ins && del_ok) {
            pending_del.push(ref_segment[i - 1]);
            i -= 1;
        } else {
            pending_ins.push(alt_segment[j - 1]);
            j -= 1;
        }
    }
    flush(0, &mut pending_del, &mut pending_ins, &mut variants);
    variants.reverse();
    variants
}
