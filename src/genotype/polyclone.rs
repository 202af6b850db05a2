use anyhow::Result;
use bio::stats::LogProb;
use itertools::Itertools;
use ordered_float::NotNan;

use crate::basics::genotype::Genotype;
use crate::calling::{BlockCalls, GenotypePosteriors, SampleCall, VariantCall};

use super::vb::{self, VbConfig};
use super::{
    haplotype_content, make_refcalls, quality_from_posterior, CallInput, CallerModel,
    ModelParams,
};

/// A mixture of up to `max_clones` haploid clones with a symmetric Dirichlet
/// prior on clone fractions; the clone count is selected by ELBO.
pub struct PolycloneCaller {
    pub max_clones: usize,
    pub min_clone_frequency: f64,
    pub clone_concentration: f64,
    pub max_vb_seeds: usize,
    pub params: ModelParams,
}

pub(crate) struct MixtureFit {
    /// Haplotype index of each clone.
    pub clones: Vec<usize>,
    pub fractions: Vec<f64>,
    pub elbo: f64,
}

impl PolycloneCaller {
    fn vb_config(&self) -> VbConfig {
        VbConfig {
            seeds: self.max_vb_seeds,
            seed: self.params.seed,
            ..VbConfig::default()
        }
    }

    /// Fit 1..=max_clones mixtures over the pooled reads and keep the ELBO
    /// winner. Clones are drawn from the haplotypes ranked by solo fit.
    pub(crate) fn fit(
        &self,
        rows: &[Vec<LogProb>],
        num_haplotypes: usize,
    ) -> Option<MixtureFit> {
        if rows.is_empty() || num_haplotypes == 0 {
            return None;
        }
        // rank haplotypes by their likelihood as the sole clone
        let ranked: Vec<usize> = (0..num_haplotypes)
            .sorted_by_key(|&h| {
                let total: f64 = rows.iter().map(|row| *row[h]).sum();
                std::cmp::Reverse(NotNan::new(total).expect("finite likelihood"))
            })
            .collect();
        let mut best: Option<MixtureFit> = None;
        for k in 1..=self.max_clones.min(num_haplotypes) {
            let clones: Vec<usize> = ranked[..k].to_vec();
            let likelihoods: Vec<Vec<LogProb>> = rows
                .iter()
                .map(|row| clones.iter().map(|&h| row[h]).collect())
                .collect();
            let alpha0 = vec![self.clone_concentration; k];
            let solution = vb::maximize(&likelihoods, &alpha0, &self.vb_config());
            // one free fraction parameter per extra clone
            let penalized = solution.elbo - (k as f64 - 1.0);
            if best.as_ref().map_or(true, |b| penalized > b.elbo) {
                best = Some(MixtureFit {
                    clones,
                    fractions: solution.expected_fractions,
                    elbo: penalized,
                });
            }
        }
        best
    }
}

impl CallerModel for PolycloneCaller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        // clone assignments expressed as a haploid-per-clone genotype
        let mut result = Vec::new();
        for (&sample, likelihoods) in input.likelihoods.iter().sorted_by_key(|(&s, _)| s) {
            let rows: Vec<Vec<LogProb>> = likelihoods.informative_rows().cloned().collect();
            let fit = self.fit(&rows, input.block.haplotypes.len());
            let genotype = match &fit {
                Some(fit) => Genotype::new(
                    fit.clones
                        .iter()
                        .zip(&fit.fractions)
                        .filter(|(_, &f)| f >= self.min_clone_frequency)
                        .map(|(&h, _)| h)
                        .collect::<Vec<_>>(),
                ),
                None => Genotype::new(vec![0usize]),
            };
            let distribution = vec![(genotype.clone(), LogProb::ln_one())];
            result.push(GenotypePosteriors {
                sample,
                distribution,
                map_genotype: genotype,
            });
        }
        Ok(result)
    }

    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls> {
        let (variants, content) = haplotype_content(input.block);
        let novel = input.block.novel_variants();
        let posteriors = self.score_genotypes(input)?;

        let mut variant_calls = Vec::new();
        for (index, variant) in variants.iter().enumerate() {
            if !novel.contains(variant) {
                continue;
            }
            let mut samples = Vec::new();
            let mut called = false;
            for sample_posteriors in &posteriors {
                let clones = &sample_posteriors.map_genotype;
                let carried = clones.iter().any(|&h| content[h][index]);
                called |= carried;
                samples.push(SampleCall {
                    sample: sample_posteriors.sample,
                    genotype: clones
                        .iter()
                        .map(|&h| u8::from(content[h][index]))
                        .sorted()
                        .collect(),
                    genotype_quality: bio::stats::PHREDProb(
                        self.params.min_variant_posterior,
                    ),
                });
            }
            if !called {
                continue;
            }
            // confidence from the clone fractions carrying the variant
            let carried_fraction: f64 = posteriors
                .iter()
                .filter_map(|p| {
                    let fit_rows: Vec<Vec<LogProb>> = input.likelihoods[&p.sample]
                        .informative_rows()
                        .cloned()
                        .collect();
                    self.fit(&fit_rows, input.block.haplotypes.len())
                })
                .flat_map(|fit| {
                    fit.clones
                        .iter()
                        .zip(fit.fractions.clone())
                        .filter(|(&h, _)| content[h][index])
                        .map(|(_, f)| f)
                        .collect::<Vec<_>>()
                })
                .sum();
            if carried_fraction < self.min_clone_frequency {
                continue;
            }
            let support = LogProb::from(bio::stats::Prob(
                carried_fraction.min(0.999_999),
            ));
            variant_calls.push(VariantCall::new(
                variant.clone(),
                quality_from_posterior(support),
                samples,
            ));
        }

        let called_regions: Vec<_> = variant_calls
            .iter()
            .map(|c| c.variant.region().clone())
            .collect();
        let refcalls = make_refcalls(input, &self.params, &called_regions);
        Ok(BlockCalls {
            region: input.block.region.clone(),
            variant_calls,
            refcalls,
            posteriors,
            haplotype_content: content,
            variants,
        })
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["max-clones", "min-clone-frequency", "max-vb-seeds"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{AlignedRead, Cigar, CigarOp, ReadFlags};
    use crate::basics::region::GenomicRegion;
    use crate::basics::variant::Variant;
    use crate::haplotypes::HaplotypeBlock;
    use crate::likelihood::{
        ErrorModel, HaplotypeLikelihoodModel, LikelihoodMatrix, LikelihoodModelConfig,
    };
    use crate::reference;

    fn read(begin: u64, seq: &[u8]) -> AlignedRead {
        AlignedRead {
            name: "r".into(),
            region: GenomicRegion::new("c", begin, begin + seq.len() as u64),
            sequence: seq.to_vec(),
            base_qualities: vec![30; seq.len()],
            cigar: Cigar(vec![CigarOp::Match(seq.len() as u32)]),
            mapping_quality: 60,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn minor_clone_is_recovered() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let variant = Variant::snv("c", 20, b'A', b'T');
        let region = GenomicRegion::new("c", 5, 35);
        let block = HaplotypeBlock {
            region: region.clone(),
            haplotypes: vec![
                crate::basics::haplotype::Haplotype::reference(region.clone()),
                crate::basics::haplotype::Haplotype::with_alleles(
                    region,
                    vec![variant.alt_allele()],
                )
                .unwrap(),
            ],
            variants: vec![variant.clone()],
            indicators: vec![],
        };
        let mut by_sample = std::collections::HashMap::new();
        by_sample.insert(
            0usize,
            (0..30)
                .map(|i| {
                    if i < 9 {
                        read(15, b"AAAAATAAAA")
                    } else {
                        read(15, b"AAAAAAAAAA")
                    }
                })
                .collect::<Vec<_>>(),
        );
        let mut model = HaplotypeLikelihoodModel::new(
            ErrorModel::from_name_or_path("PCR").unwrap(),
            LikelihoodModelConfig::default(),
        );
        let matrix = model.compute(&block, &by_sample, &reference);
        let mut caller = PolycloneCaller {
            max_clones: 3,
            min_clone_frequency: 0.1,
            clone_concentration: 1.0,
            max_vb_seeds: 3,
            params: ModelParams::default(),
        };
        let calls = caller
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert_eq!(calls.variant_calls.len(), 1);
        assert_eq!(calls.variant_calls[0].variant, variant);
    }
}
