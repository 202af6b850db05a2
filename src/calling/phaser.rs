use bio::stats::LogProb;
use derive_new::new;
use itertools::Itertools;

use crate::basics::genotype::Genotype;
use crate::basics::region::Position;

use super::{BlockCalls, GenotypePosteriors, RefCall, VariantCall};

#[derive(Debug, Clone)]
pub struct PhaserConfig {
    /// PHRED-scaled minimum pairwise phase score for two adjacent calls to
    /// share a phase set.
    pub min_phase_score: f64,
}

impl Default for PhaserConfig {
    fn default() -> Self {
        PhaserConfig {
            min_phase_score: 10.0,
        }
    }
}

/// Assembles phase sets from per-block genotype posteriors and releases
/// calls once the active region has moved past them.
#[derive(new)]
pub struct Phaser {
    config: PhaserConfig,
    #[new(default)]
    buffered_variants: Vec<VariantCall>,
    #[new(default)]
    buffered_refcalls: Vec<RefCall>,
}

impl Phaser {
    /// Take a block's calls, assign phase sets, and return every previously
    /// buffered call that the new block's region proves complete.
    pub fn add_block(&mut self, mut block: BlockCalls) -> (Vec<VariantCall>, Vec<RefCall>) {
        self.phase_block(&mut block);
        // the incoming block starts at or right of everything buffered, so
        // buffered calls left of it belong to finished phase sets
        let boundary = block.region.begin();
        let mut ready: Vec<VariantCall> = Vec::new();
        let mut waiting = Vec::new();
        for call in self.buffered_variants.drain(..) {
            if call.variant.region().end() <= boundary {
                ready.push(call);
            } else {
                waiting.push(call);
            }
        }
        self.buffered_variants = waiting;
        self.buffered_variants.extend(block.variant_calls);

        let mut ready_refcalls: Vec<RefCall> = Vec::new();
        let mut waiting_refcalls = Vec::new();
        for call in self.buffered_refcalls.drain(..) {
            if call.region.end() <= boundary {
                ready_refcalls.push(call);
            } else {
                waiting_refcalls.push(call);
            }
        }
        self.buffered_refcalls = waiting_refcalls;
        self.buffered_refcalls.extend(block.refcalls);

        ready.sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        ready_refcalls.sort_by(|a, b| a.region.cmp(&b.region));
        (ready, ready_refcalls)
    }

    /// Flush everything still buffered; used at contig end and on
    /// cancellation.
    pub fn finish(&mut self) -> (Vec<VariantCall>, Vec<RefCall>) {
        let mut variants = std::mem::take(&mut self.buffered_variants);
        variants.sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        let mut refcalls = std::mem::take(&mut self.buffered_refcalls);
        refcalls.sort_by(|a, b| a.region.cmp(&b.region));
        (variants, refcalls)
    }

    /// Assign phase-set identifiers within the block: consecutive calls stay
    /// in the open set while every sample's pairwise phase score clears the
    /// threshold.
    fn phase_block(&self, block: &mut BlockCalls) {
        if block.variant_calls.is_empty() {
            return;
        }
        block
            .variant_calls
            .sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        let indices: Vec<Option<usize>> = block
            .variant_calls
            .iter()
            .map(|call| {
                block
                    .variants
                    .iter()
                    .position(|v| v == &call.variant)
            })
            .collect();

        let mut current_set: Position = block.variant_calls[0].variant.region().begin();
        let mut previous: Option<usize> = indices[0];
        for i in 0..block.variant_calls.len() {
            if i > 0 {
                let score = match (previous, indices[i]) {
                    (Some(a), Some(b)) => self.pair_phase_score(block, a, b),
                    _ => 0.0,
                };
                if score < self.config.min_phase_score {
                    current_set = block.variant_calls[i].variant.region().begin();
                }
                previous = indices[i];
            }
            block.variant_calls[i].phase_set = Some(current_set);
        }
    }

    /// PHRED-scaled posterior that the MAP phase configuration of variants
    /// `a` and `b` is correct, minimized over samples.
    fn pair_phase_score(&self, block: &BlockCalls, a: usize, b: usize) -> f64 {
        let mut worst = f64::INFINITY;
        for sample in &block.posteriors {
            let map_pattern =
                phase_pattern(&sample.map_genotype, &block.haplotype_content, a, b);
            let agreeing: Vec<LogProb> = sample
                .distribution
                .iter()
                .filter(|(g, _)| {
                    phase_pattern(g, &block.haplotype_content, a, b) == map_pattern
                })
                .map(|(_, p)| *p)
                .collect();
            let agreement = LogProb::ln_sum_exp(&agreeing).cap_numerical_overshoot(1e-9);
            let score = *bio::stats::PHREDProb::from(agreement.ln_one_minus_exp());
            worst = worst.min(score);
        }
        if worst.is_finite() {
            worst
        } else {
            // no disagreement mass at all
            1e4
        }
    }
}

/// The per-copy (carries a, carries b) pattern of a genotype, as a sorted
/// multiset so equal phasings compare equal.
fn phase_pattern(
    genotype: &Genotype<usize>,
    content: &[Vec<bool>],
    a: usize,
    b: usize,
) -> Vec<(bool, bool)> {
    genotype
        .iter()
        .map(|&h| (content[h][a], content[h][b]))
        .sorted()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::region::GenomicRegion;
    use crate::basics::variant::Variant;
    use bio::stats::{PHREDProb, Prob};

    fn call(pos: Position) -> VariantCall {
        VariantCall::new(
            Variant::snv("c", pos, b'A', b'T'),
            PHREDProb(50.0),
            vec![],
        )
    }

    fn posterior(p: f64) -> LogProb {
        LogProb::from(Prob(p))
    }

    fn two_site_block(confident: bool) -> BlockCalls {
        let variants = vec![
            Variant::snv("c", 10, b'A', b'T'),
            Variant::snv("c", 15, b'A', b'G'),
        ];
        // haplotypes: 0 = ref, 1 = both alts (cis), 2 = only first,
        // 3 = only second
        let content = vec![
            vec![false, false],
            vec![true, true],
            vec![true, false],
            vec![false, true],
        ];
        let cis = Genotype::new(vec![0usize, 1]);
        let trans = Genotype::new(vec![2usize, 3]);
        let distribution = if confident {
            vec![(cis.clone(), posterior(0.999)), (trans, posterior(0.001))]
        } else {
            vec![(cis.clone(), posterior(0.6)), (trans, posterior(0.4))]
        };
        BlockCalls {
            region: GenomicRegion::new("c", 0, 30),
            variant_calls: vec![call(10), call(15)],
            refcalls: vec![],
            posteriors: vec![GenotypePosteriors {
                sample: 0,
                distribution,
                map_genotype: cis,
            }],
            haplotype_content: content,
            variants,
        }
    }

    #[test]
    fn confident_pair_shares_a_phase_set() {
        let mut phaser = Phaser::new(PhaserConfig::default());
        phaser.add_block(two_site_block(true));
        let (calls, _) = phaser.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].phase_set, Some(10));
        assert_eq!(calls[1].phase_set, Some(10));
    }

    #[test]
    fn uncertain_pair_splits_phase_sets() {
        let mut phaser = Phaser::new(PhaserConfig::default());
        phaser.add_block(two_site_block(false));
        let (calls, _) = phaser.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].phase_set, Some(10));
        assert_eq!(calls[1].phase_set, Some(15));
    }

    #[test]
    fn calls_release_once_the_region_advances() {
        let mut phaser = Phaser::new(PhaserConfig::default());
        let (ready, _) = phaser.add_block(two_site_block(true));
        assert!(ready.is_empty());
        // a later block proves the first one's phase sets complete
        let later = BlockCalls {
            region: GenomicRegion::new("c", 40, 60),
            variant_calls: vec![call(45)],
            refcalls: vec![],
            posteriors: vec![],
            haplotype_content: vec![],
            variants: vec![],
        };
        let (ready, _) = phaser.add_block(later);
        assert_eq!(ready.len(), 2);
        let (rest, _) = phaser.finish();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn phase_sets_never_share_an_id_across_sets() {
        let mut phaser = Phaser::new(PhaserConfig::default());
        phaser.add_block(two_site_block(false));
        let (calls, _) = phaser.finish();
        let ids: Vec<_> = calls.iter().filter_map(|c| c.phase_set).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
