use std::collections::VecDeque;

use anyhow::Result;
use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::basics::haplotype::Haplotype;
use crate::basics::region::GenomicRegion;
use crate::basics::variant::Variant;
use crate::reference;

/// How many upstream alleles survive as indicators conditioning the next
/// active region. `None` disables lagging entirely (the fast mode).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum LaggingPolicy {
    None,
    Conservative,
    Moderate,
    Normal,
    Aggressive,
}

/// How far the active region absorbs upcoming candidates before emitting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ExtensionPolicy {
    Conservative,
    Normal,
    Optimistic,
    Aggressive,
}

#[derive(Debug, Clone)]
pub struct HaplotypeGeneratorConfig {
    pub max_haplotypes: usize,
    pub haplotype_holdout_threshold: usize,
    pub max_holdout_depth: usize,
    pub lagging: LaggingPolicy,
    pub extension: ExtensionPolicy,
    /// Flanking context the likelihood model needs around every explicit
    /// allele.
    pub pad_requirement: u64,
}

impl Default for HaplotypeGeneratorConfig {
    fn default() -> Self {
        HaplotypeGeneratorConfig {
            max_haplotypes: 200,
            haplotype_holdout_threshold: 2500,
            max_holdout_depth: 20,
            lagging: LaggingPolicy::Normal,
            extension: ExtensionPolicy::Normal,
            pad_requirement: 8,
        }
    }
}

impl HaplotypeGeneratorConfig {
    /// Furthest apart two sites can be and still join one active region via
    /// an indicator.
    pub fn max_indicator_join_distance(&self) -> u64 {
        2 * self.pad_requirement - 1
    }

    /// Reference context added on both sides of an emitted active region.
    pub fn min_flank_pad(&self) -> u64 {
        2 * self.max_indicator_join_distance()
    }

    fn extension_distance(&self) -> u64 {
        let factor = match self.extension {
            ExtensionPolicy::Conservative => 1,
            ExtensionPolicy::Normal => 2,
            ExtensionPolicy::Optimistic => 3,
            ExtensionPolicy::Aggressive => 4,
        };
        factor * self.max_indicator_join_distance()
    }

    fn lag_distance(&self) -> u64 {
        let join = self.max_indicator_join_distance();
        match self.lagging {
            LaggingPolicy::None => 0,
            LaggingPolicy::Conservative => join / 2,
            LaggingPolicy::Moderate => join,
            LaggingPolicy::Normal => join + join / 2,
            LaggingPolicy::Aggressive => 2 * join,
        }
    }
}

/// One emitted unit of work: every haplotype tiles `region` exactly.
#[derive(Debug, Clone)]
pub struct HaplotypeBlock {
    pub region: GenomicRegion,
    pub haplotypes: Vec<Haplotype>,
    /// All variants realized by the haplotypes, indicators included.
    pub variants: Vec<Variant>,
    /// Variants carried over from the previous block for conditioning only;
    /// their calls were already emitted.
    pub indicators: Vec<Variant>,
}

impl HaplotypeBlock {
    /// Variants that still need calling.
    pub fn novel_variants(&self) -> Vec<Variant> {
        self.variants
            .iter()
            .filter(|v| !self.indicators.contains(v))
            .cloned()
            .collect()
    }
}

/// Mutually exclusive alternatives over one overlap-connected span.
#[derive(Debug, Clone)]
struct Site {
    region: GenomicRegion,
    variants: Vec<Variant>,
}

/// Enumerates haplotype sets block by block over a sorted candidate stream.
pub struct HaplotypeGenerator {
    queue: VecDeque<Variant>,
    indicators: Vec<Variant>,
    holdouts: Vec<Vec<Variant>>,
    config: HaplotypeGeneratorConfig,
}

impl HaplotypeGenerator {
    pub fn new(mut candidates: Vec<Variant>, config: HaplotypeGeneratorConfig) -> Self {
        candidates.sort();
        candidates.dedup();
        HaplotypeGenerator {
            queue: candidates.into(),
            indicators: Vec::new(),
            holdouts: Vec::new(),
            config,
        }
    }

    pub fn is_done(&self) -> bool {
        self.queue.is_empty() && self.holdouts.is_empty()
    }

    /// Produce the next (haplotypes, active region) pair, or `None` once all
    /// candidates are consumed. `reference` must cover the candidate span
    /// plus flank pad.
    pub fn next_block(&mut self, reference: &reference::Slice) -> Result<Option<HaplotypeBlock>> {
        // deferred alleles come back first, as their own block
        if let Some(holdout) = self.holdouts.pop() {
            let sites = group_sites(holdout);
            return Ok(Some(self.compose(sites, reference, &[])?));
        }
        if self.queue.is_empty() {
            return Ok(None);
        }

        let retained: Vec<Variant> = self.indicators.drain(..).collect();
        let first = self.queue.pop_front().expect("queue checked non-empty");
        let join = self.config.max_indicator_join_distance();
        let carried: Vec<Variant> = retained
            .into_iter()
            .filter(|v| {
                v.region().same_contig(first.region())
                    && v.region().distance_to(first.region()) <= join
            })
            .collect();
        let mut pending = carried.clone();
        pending.push(first);
        let mut sites = group_sites(pending);
        let mut projected: usize = sites.iter().map(|s| s.variants.len() + 1).product();

        // absorb nearby candidates up to the haplotype budget
        while let Some(next) = self.queue.front() {
            let span = sites
                .last()
                .expect("at least one site")
                .region
                .clone();
            if !span.same_contig(next.region())
                || span.distance_to(next.region()) > self.config.extension_distance()
            {
                break;
            }
            // alternatives at an overlapping span join the open site
            let overlaps_last = span.overlaps(next.region());
            let growth = if overlaps_last {
                let site = sites.last().expect("at least one site");
                projected / (site.variants.len() + 1) * (site.variants.len() + 2)
            } else {
                projected * 2
            };
            if growth > self.config.max_haplotypes {
                break;
            }
            let next = self.queue.pop_front().expect("front checked");
            if overlaps_last {
                let site = sites.last_mut().expect("at least one site");
                site.region = site.region.encompass(next.region());
                site.variants.push(next);
            } else {
                sites.push(Site {
                    region: next.region().clone(),
                    variants: vec![next],
                });
            }
            projected = sites.iter().map(|s| s.variants.len() + 1).product();
        }

        // a single oversized site sheds its costliest alternatives
        if projected > self.config.haplotype_holdout_threshold {
            self.apply_holdout(&mut sites);
        }

        let block = self.compose(sites, reference, &carried)?;
        self.retain_indicators(&block);
        Ok(Some(block))
    }

    /// Move excess alternatives of the densest site onto the holdout stack.
    fn apply_holdout(&mut self, sites: &mut Vec<Site>) {
        let densest = sites
            .iter_mut()
            .max_by_key(|s| s.variants.len())
            .expect("holdout requires at least one site");
        let keep = (self.config.max_haplotypes.saturating_sub(1)).max(1);
        if densest.variants.len() <= keep {
            return;
        }
        let held: Vec<Variant> = densest.variants.split_off(keep);
        densest.region = densest
            .variants
            .iter()
            .map(|v| v.region().clone())
            .reduce(|a, b| a.encompass(&b))
            .expect("site keeps at least one variant");
        if self.holdouts.len() >= self.config.max_holdout_depth {
            warn!(
                "holdout stack overflow ({} entries): emitting current haplotypes and dropping the oldest holdout",
                self.holdouts.len()
            );
            self.holdouts.remove(0);
        }
        self.holdouts.push(held);
    }

    /// Cartesian composition of sites into concrete haplotypes.
    fn compose(
        &self,
        sites: Vec<Site>,
        reference: &reference::Slice,
        carried: &[Variant],
    ) -> Result<HaplotypeBlock> {
        let core = sites
            .iter()
            .map(|s| s.region.clone())
            .reduce(|a, b| a.encompass(&b))
            .expect("compose requires at least one site");
        let region = core
            .expanded(self.config.min_flank_pad())
            .intersect(&reference.region())
            .unwrap_or(core);

        // ref-first option lists; the all-reference combination is always kept
        let option_lists: Vec<Vec<Option<&Variant>>> = sites
            .iter()
            .map(|s| {
                let mut options: Vec<Option<&Variant>> = vec![None];
                options.extend(s.variants.iter().map(Some));
                options
            })
            .collect();
        let mut haplotypes = Vec::new();
        for combination in option_lists
            .into_iter()
            .multi_cartesian_product()
            .take(self.config.max_haplotypes)
        {
            let alleles = combination
                .into_iter()
                .flatten()
                .sorted_by(|a, b| a.region().cmp(b.region()))
                .map(|v| v.alt_allele());
            haplotypes.push(Haplotype::with_alleles(region.clone(), alleles)?);
        }

        let variants: Vec<Variant> = sites.into_iter().flat_map(|s| s.variants).sorted().collect();
        let indicators = variants
            .iter()
            .filter(|v| carried.contains(v))
            .cloned()
            .collect();
        Ok(HaplotypeBlock {
            region,
            haplotypes,
            variants,
            indicators,
        })
    }

    /// Keep trailing variants of the emitted block as indicators for the
    /// next one, per the lagging policy.
    fn retain_indicators(&mut self, block: &HaplotypeBlock) {
        let lag = self.config.lag_distance();
        if lag == 0 {
            self.indicators.clear();
            return;
        }
        let right_edge = block
            .variants
            .iter()
            .map(|v| v.region().end())
            .max()
            .unwrap_or(block.region.end());
        self.indicators = block
            .variants
            .iter()
            .filter(|v| right_edge.saturating_sub(v.region().end()) <= lag)
            .cloned()
            .collect();
    }
}

/// Group sorted variants into overlap-connected sites.
fn group_sites(mut variants: Vec<Variant>) -> Vec<Site> {
    variants.sort();
    variants.dedup();
    let mut sites: Vec<Site> = Vec::new();
    for variant in variants {
        match sites.last_mut() {
            Some(site) if site.region.overlaps(variant.region()) => {
                site.region = site.region.encompass(variant.region());
                site.variants.push(variant);
            }
            _ => sites.push(Site {
                region: variant.region().clone(),
                variants: vec![variant],
            }),
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> reference::Slice {
        reference::Slice::new("c", 0, vec![b'A'; 200])
    }

    fn snv(pos: u64, alt: u8) -> Variant {
        Variant::snv("c", pos, b'A', alt)
    }

    #[test]
    fn every_haplotype_tiles_the_active_region() {
        let reference = reference();
        let candidates = vec![snv(50, b'T'), snv(55, b'G')];
        let mut generator =
            HaplotypeGenerator::new(candidates, HaplotypeGeneratorConfig::default());
        let block = generator.next_block(&reference).unwrap().unwrap();
        assert_eq!(block.haplotypes.len(), 4);
        for haplotype in &block.haplotypes {
            assert_eq!(haplotype.region(), &block.region);
            assert_eq!(
                haplotype.sequence(&reference).len() as i64,
                block.region.size() as i64
                    + haplotype
                        .explicit_alleles()
                        .map(|a| a.length_change())
                        .sum::<i64>()
            );
        }
        assert!(block.haplotypes.iter().any(|h| h.is_reference()));
        assert!(generator.next_block(&reference).unwrap().is_none());
    }

    #[test]
    fn distant_candidates_split_into_blocks() {
        let reference = reference();
        let candidates = vec![snv(10, b'T'), snv(150, b'G')];
        let mut generator =
            HaplotypeGenerator::new(candidates, HaplotypeGeneratorConfig::default());
        let first = generator.next_block(&reference).unwrap().unwrap();
        assert_eq!(first.variants, vec![snv(10, b'T')]);
        let second = generator.next_block(&reference).unwrap().unwrap();
        assert_eq!(
            second.novel_variants(),
            vec![snv(150, b'G')]
        );
        assert!(generator.next_block(&reference).unwrap().is_none());
    }

    #[test]
    fn haplotype_budget_limits_extension() {
        let reference = reference();
        // 8 adjacent-but-separate SNV sites; budget of 8 haplotypes allows 3
        let candidates: Vec<Variant> = (0..8).map(|i| snv(50 + 2 * i, b'T')).collect();
        let config = HaplotypeGeneratorConfig {
            max_haplotypes: 8,
            ..Default::default()
        };
        let mut generator = HaplotypeGenerator::new(candidates, config);
        let block = generator.next_block(&reference).unwrap().unwrap();
        let novel = block.novel_variants().len();
        assert!(novel <= 3, "got {} sites in one block", novel);
        assert!(block.haplotypes.len() <= 8);
    }

    #[test]
    fn oversized_site_spills_into_holdout() {
        let reference = reference();
        // many alternatives at one overlapping span
        let candidates: Vec<Variant> = (b'B'..=b'Z')
            .filter(|&b| b != b'A')
            .map(|b| {
                Variant::new(
                    GenomicRegion::new("c", 50, 52),
                    b"AA".to_vec(),
                    vec![b, b],
                )
            })
            .collect();
        let total = candidates.len();
        let config = HaplotypeGeneratorConfig {
            max_haplotypes: 4,
            haplotype_holdout_threshold: 4,
            ..Default::default()
        };
        let mut generator = HaplotypeGenerator::new(candidates, config);
        let mut seen = std::collections::BTreeSet::new();
        while let Some(block) = generator.next_block(&reference).unwrap() {
            assert!(block.haplotypes.len() <= 4);
            for v in block.novel_variants() {
                seen.insert(v);
            }
        }
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn lagging_none_retains_no_indicators() {
        let reference = reference();
        let candidates = vec![snv(50, b'T'), snv(52, b'G'), snv(80, b'C')];
        let config = HaplotypeGeneratorConfig {
            lagging: LaggingPolicy::None,
            ..Default::default()
        };
        let mut generator = HaplotypeGenerator::new(candidates, config);
        while let Some(block) = generator.next_block(&reference).unwrap() {
            assert!(block.indicators.is_empty());
        }
    }
}
