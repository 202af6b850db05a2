use anyhow::Result;
use bio::stats::LogProb;
use itertools::Itertools;

use crate::calling::{BlockCalls, GenotypePosteriors, SampleCall, VariantCall};

use super::{
    enumerate_over, genotype_distribution, haplotype_content, make_refcalls, map_genotype,
    quality_from_posterior, variant_marginal, CallInput, CallerModel, ModelParams,
};

/// Germline calling for one or more independent samples: genotypes are
/// enumerated up to the budget and scored against a Dirichlet-multinomial
/// heterozygosity prior. With several samples this is the population caller;
/// sample posteriors share the prior but factorize.
pub struct IndividualCaller {
    pub ploidy: usize,
    pub params: ModelParams,
}

impl IndividualCaller {
    pub fn new(ploidy: usize, params: ModelParams) -> Self {
        IndividualCaller { ploidy, params }
    }
}

impl CallerModel for IndividualCaller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        let genotypes = enumerate_over(input, &self.params, self.ploidy);
        let prior = self.params.prior();
        let mut result = Vec::new();
        for (&sample, likelihoods) in input.likelihoods.iter().sorted_by_key(|(&s, _)| s) {
            let distribution = genotype_distribution(
                likelihoods,
                &genotypes,
                &prior,
                &input.block.haplotypes,
            );
            let map = map_genotype(&distribution);
            result.push(GenotypePosteriors {
                sample,
                distribution,
                map_genotype: map,
            });
        }
        Ok(result)
    }

    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls> {
        let posteriors = self.score_genotypes(input)?;
        let (variants, content) = haplotype_content(input.block);
        let novel = input.block.novel_variants();

        let mut variant_calls = Vec::new();
        for (index, variant) in variants.iter().enumerate() {
            if !novel.contains(variant) {
                continue;
            }
            // site is variant when any sample carries it
            let mut ln_not_variant = LogProb::ln_one();
            let mut samples = Vec::new();
            for sample_posteriors in &posteriors {
                let marginal =
                    variant_marginal(&sample_posteriors.distribution, &content, index);
                ln_not_variant = ln_not_variant + marginal.ln_one_minus_exp();
                let map = &sample_posteriors.map_genotype;
                let genotype: Vec<u8> = map
                    .iter()
                    .map(|&h| u8::from(content[h][index]))
                    .sorted()
                    .collect();
                // confidence in the genotype pattern at this site
                let pattern_posterior: Vec<LogProb> = sample_posteriors
                    .distribution
                    .iter()
                    .filter(|(g, _)| {
                        let pattern: Vec<u8> = g
                            .iter()
                            .map(|&h| u8::from(content[h][index]))
                            .sorted()
                            .collect();
                        pattern == genotype
                    })
                    .map(|(_, p)| *p)
                    .collect();
                let genotype_quality = quality_from_posterior(
                    LogProb::ln_sum_exp(&pattern_posterior).cap_numerical_overshoot(1e-9),
                );
                samples.push(SampleCall {
                    sample: sample_posteriors.sample,
                    genotype,
                    genotype_quality,
                });
            }
            let quality = bio::stats::PHREDProb::from(ln_not_variant);
            if *quality < self.params.min_variant_posterior {
                continue;
            }
            if samples.iter().all(|s| s.genotype.iter().all(|&a| a == 0)) {
                continue;
            }
            variant_calls.push(VariantCall::new(variant.clone(), quality, samples));
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
        &["organism-ploidy", "snp-heterozygosity", "indel-heterozygosity"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::haplotype::Haplotype;
    use crate::basics::read::{AlignedRead, Cigar, CigarOp, ReadFlags};
    use crate::basics::region::GenomicRegion;
    use crate::basics::variant::Variant;
    use crate::haplotypes::HaplotypeBlock;
    use crate::likelihood::{
        ErrorModel, HaplotypeLikelihoodModel, LikelihoodMatrix, LikelihoodModelConfig,
    };
    use crate::reference;
    use std::collections::HashMap;

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

    fn snv_input(
        reads: Vec<AlignedRead>,
        reference: &reference::Slice,
    ) -> (HaplotypeBlock, LikelihoodMatrix) {
        let variant = Variant::snv("c", 20, b'A', b'T');
        let region = GenomicRegion::new("c", 5, 35);
        let block = HaplotypeBlock {
            region: region.clone(),
            haplotypes: vec![
                Haplotype::reference(region.clone()),
                Haplotype::with_alleles(region, vec![variant.alt_allele()]).unwrap(),
            ],
            variants: vec![variant],
            indicators: vec![],
        };
        let mut by_sample = HashMap::new();
        by_sample.insert(0usize, reads);
        let mut model = HaplotypeLikelihoodModel::new(
            ErrorModel::from_name_or_path("PCR").unwrap(),
            LikelihoodModelConfig::default(),
        );
        let matrix = model.compute(&block, &by_sample, reference);
        (block, matrix)
    }

    #[test]
    fn heterozygous_snv_is_called() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        // half the reads carry the SNV
        let mut reads = Vec::new();
        for i in 0..10 {
            let begin = 15 + (i % 2);
            if i % 2 == 0 {
                reads.push(read(begin, b"AAAAATAAAA"));
            } else {
                reads.push(read(begin, b"AAAAAAAAAA"));
            }
        }
        let (block, matrix) = snv_input(reads, &reference);
        let mut caller = IndividualCaller::new(2, ModelParams::default());
        let calls = caller
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert_eq!(calls.variant_calls.len(), 1);
        let call = &calls.variant_calls[0];
        assert_eq!(call.samples[0].genotype, vec![0, 1]);
        assert!(*call.quality > 10.0);
    }

    #[test]
    fn genotype_posteriors_sum_to_one() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let reads = (0..6).map(|_| read(15, b"AAAAATAAAA")).collect();
        let (block, matrix) = snv_input(reads, &reference);
        let mut caller = IndividualCaller::new(2, ModelParams::default());
        let posteriors = caller
            .score_genotypes(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        let total: f64 = posteriors[0]
            .distribution
            .iter()
            .map(|(_, p)| p.exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn all_reference_reads_call_nothing() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let reads = (0..10).map(|_| read(15, b"AAAAAAAAAA")).collect();
        let (block, matrix) = snv_input(reads, &reference);
        let mut caller = IndividualCaller::new(2, ModelParams::default());
        let calls = caller
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert!(calls.variant_calls.is_empty());
    }
}
