use anyhow::Result;
use bio::stats::LogProb;
use derive_builder::Builder;
use itertools::Itertools;
use statrs::distribution::{Beta, ContinuousCDF};

use crate::basics::genotype::{CancerGenotype, Genotype};
use crate::basics::haplotype::Haplotype;
use crate::basics::SampleId;
use crate::calling::{BlockCalls, GenotypePosteriors, SampleCall, VariantCall};
use crate::likelihood::SampleLikelihoods;

use super::vb::{self, VbConfig};
use super::{
    haplotype_content, ln_genotype_likelihood, make_refcalls, map_genotype,
    quality_from_posterior, CallInput, CallerModel, ModelParams,
};

/// Tumour(-normal) calling: a variational-Bayes mixture over
/// (germline genotype, somatic haplotypes) hypotheses, with the normal
/// sample anchoring the germline fraction.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct CancerCaller {
    pub normal: Option<SampleId>,
    pub ploidy: usize,
    pub max_somatic_haplotypes: usize,
    pub somatic_snv_mutation_rate: f64,
    pub somatic_indel_mutation_rate: f64,
    pub min_expected_somatic_frequency: f64,
    pub min_credible_somatic_frequency: f64,
    pub credible_mass: f64,
    pub tumour_germline_concentration: f64,
    pub max_vb_seeds: usize,
    pub params: ModelParams,
}

struct Hypothesis {
    genotype: CancerGenotype,
    posterior: LogProb,
    /// Expected mixture fraction of each somatic haplotype, aligned with
    /// `genotype.somatic`.
    somatic_fractions: Vec<f64>,
    /// One-sided lower credible bound of the total somatic fraction.
    credible_somatic_fraction: f64,
}

impl CancerCaller {
    fn vb_config(&self) -> VbConfig {
        VbConfig {
            seeds: self.max_vb_seeds,
            seed: self.params.seed,
            ..VbConfig::default()
        }
    }

    fn ln_somatic_prior(&self, somatic: &[usize], germline: &Genotype<usize>, haplotypes: &[Haplotype]) -> LogProb {
        let mut result = 0.0;
        for &h in somatic {
            if germline.contains(&h) {
                return LogProb::ln_zero();
            }
            // pay for the mutations distinguishing the somatic haplotype
            // from its closest germline carrier
            let novel = germline
                .iter()
                .map(|&g| haplotypes[h].difference(&haplotypes[g]))
                .min_by_key(|d| d.len())
                .unwrap_or_default();
            if novel.is_empty() {
                return LogProb::ln_zero();
            }
            for allele in &novel {
                let rate = if allele.is_snv() {
                    self.somatic_snv_mutation_rate
                } else {
                    self.somatic_indel_mutation_rate
                };
                if rate <= 0.0 {
                    return LogProb::ln_zero();
                }
                result += rate.ln();
            }
        }
        LogProb(result)
    }

    /// Pool the likelihood rows of every non-normal sample.
    fn tumour_rows(&self, input: &CallInput) -> Vec<Vec<LogProb>> {
        input
            .likelihoods
            .iter()
            .sorted_by_key(|(&s, _)| s)
            .filter(|(&s, _)| Some(s) != self.normal)
            .flat_map(|(_, sample)| sample.informative_rows().cloned())
            .collect()
    }

    fn evaluate(&self, input: &CallInput) -> Result<Vec<Hypothesis>> {
        let haplotypes = &input.block.haplotypes;
        let prior = self.params.prior();
        let tumour_rows = self.tumour_rows(input);
        let normal: Option<&SampleLikelihoods> =
            self.normal.and_then(|s| input.likelihoods.get(&s));
        let germline_genotypes = super::enumerate_over(input, &self.params, self.ploidy);

        let mut hypotheses = Vec::new();
        let mut joints = Vec::new();
        for germline in &germline_genotypes {
            let ln_germline_prior = prior.ln_prior(germline, haplotypes);
            let ln_normal = normal
                .map(|n| ln_genotype_likelihood(n, germline))
                .unwrap_or_else(LogProb::ln_one);

            let somatic_choices: Vec<Vec<usize>> = std::iter::once(Vec::new())
                .chain(
                    (1..=self.max_somatic_haplotypes).flat_map(|k| {
                        (0..haplotypes.len())
                            .filter(|h| !germline.contains(h))
                            .combinations(k)
                    }),
                )
                .collect();
            for somatic in somatic_choices {
                let ln_somatic_prior = if somatic.is_empty() {
                    LogProb::ln_one()
                } else {
                    self.ln_somatic_prior(&somatic, germline, haplotypes)
                };
                if ln_somatic_prior == LogProb::ln_zero() && !somatic.is_empty() {
                    continue;
                }
                let genotype = CancerGenotype::new(germline.clone(), somatic);
                let components = genotype.components();
                let (elbo, somatic_fractions, credible) = if tumour_rows.is_empty() {
                    (0.0, vec![0.0; genotype.somatic.len()], 0.0)
                } else {
                    let likelihoods: Vec<Vec<LogProb>> = tumour_rows
                        .iter()
                        .map(|row| components.iter().map(|&h| row[h]).collect())
                        .collect();
                    let num_germline = genotype.num_germline_components();
                    let alpha0: Vec<f64> = components
                        .iter()
                        .enumerate()
                        .map(|(i, _)| {
                            if i < num_germline {
                                self.tumour_germline_concentration
                            } else {
                                1.0
                            }
                        })
                        .collect();
                    let solution = vb::maximize(&likelihoods, &alpha0, &self.vb_config());
                    let fractions: Vec<f64> = solution.expected_fractions
                        [num_germline..]
                        .to_vec();
                    let alpha_somatic: f64 =
                        solution.alpha[num_germline..].iter().sum();
                    let alpha_total: f64 = solution.alpha.iter().sum();
                    let credible = if alpha_somatic > 0.0 && alpha_total > alpha_somatic {
                        Beta::new(alpha_somatic, alpha_total - alpha_somatic)
                            .map(|beta| beta.inverse_cdf(1.0 - self.credible_mass))
                            .unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    (solution.elbo, fractions, credible)
                };
                let joint =
                    LogProb(elbo) + ln_normal + ln_germline_prior + ln_somatic_prior;
                joints.push(joint);
                hypotheses.push(Hypothesis {
                    genotype,
                    posterior: joint,
                    somatic_fractions,
                    credible_somatic_fraction: credible,
                });
            }
        }
        let norm = LogProb::ln_sum_exp(&joints);
        for hypothesis in &mut hypotheses {
            hypothesis.posterior =
                (hypothesis.posterior - norm).cap_numerical_overshoot(1e-9);
        }
        Ok(hypotheses)
    }

    fn germline_distribution(
        hypotheses: &[Hypothesis],
    ) -> Vec<(Genotype<usize>, LogProb)> {
        let mut by_genotype: Vec<(Genotype<usize>, Vec<LogProb>)> = Vec::new();
        for hypothesis in hypotheses {
            match by_genotype
                .iter_mut()
                .find(|(g, _)| g == &hypothesis.genotype.germline)
            {
                Some((_, terms)) => terms.push(hypothesis.posterior),
                None => by_genotype.push((
                    hypothesis.genotype.germline.clone(),
                    vec![hypothesis.posterior],
                )),
            }
        }
        by_genotype
            .into_iter()
            .map(|(g, terms)| {
                (
                    g,
                    LogProb::ln_sum_exp(&terms).cap_numerical_overshoot(1e-9),
                )
            })
            .collect()
    }
}

impl CallerModel for CancerCaller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        let hypotheses = self.evaluate(input)?;
        let distribution = Self::germline_distribution(&hypotheses);
        let map = map_genotype(&distribution);
        Ok(input
            .likelihoods
            .keys()
            .sorted()
            .map(|&sample| GenotypePosteriors {
                sample,
                distribution: distribution.clone(),
                map_genotype: map.clone(),
            })
            .collect())
    }

    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls> {
        let hypotheses = self.evaluate(input)?;
        let (variants, content) = haplotype_content(input.block);
        let novel = input.block.novel_variants();
        let posteriors = self.score_genotypes(input)?;
        let samples: Vec<SampleId> = input.likelihoods.keys().copied().sorted().collect();

        let mut variant_calls = Vec::new();
        for (index, variant) in variants.iter().enumerate() {
            if !novel.contains(variant) {
                continue;
            }
            let mut somatic_terms = Vec::new();
            let mut germline_terms = Vec::new();
            let mut best_somatic: Option<&Hypothesis> = None;
            for hypothesis in &hypotheses {
                let germline_carries = hypothesis
                    .genotype
                    .germline
                    .iter()
                    .any(|&h| content[h][index]);
                let somatic_carries = hypothesis
                    .genotype
                    .somatic
                    .iter()
                    .any(|&h| content[h][index]);
                if germline_carries {
                    germline_terms.push(hypothesis.posterior);
                } else if somatic_carries {
                    somatic_terms.push(hypothesis.posterior);
                    if best_somatic
                        .map_or(true, |b| hypothesis.posterior > b.posterior)
                    {
                        best_somatic = Some(hypothesis);
                    }
                }
            }
            let p_somatic = if somatic_terms.is_empty() {
                LogProb::ln_zero()
            } else {
                LogProb::ln_sum_exp(&somatic_terms).cap_numerical_overshoot(1e-9)
            };
            let p_germline = if germline_terms.is_empty() {
                LogProb::ln_zero()
            } else {
                LogProb::ln_sum_exp(&germline_terms).cap_numerical_overshoot(1e-9)
            };

            let somatic_quality = quality_from_posterior(p_somatic);
            let germline_quality = quality_from_posterior(p_germline);

            // somatic call: posterior plus the frequency credibility tests
            if *somatic_quality >= self.params.min_variant_posterior {
                if let Some(winner) = best_somatic {
                    let expected: f64 = winner
                        .genotype
                        .somatic
                        .iter()
                        .zip(&winner.somatic_fractions)
                        .filter(|(&h, _)| content[h][index])
                        .map(|(_, &f)| f)
                        .sum();
                    if expected >= self.min_expected_somatic_frequency
                        && winner.credible_somatic_fraction
                            >= self.min_credible_somatic_frequency
                    {
                        let sample_calls = samples
                            .iter()
                            .map(|&sample| SampleCall {
                                sample,
                                genotype: vec![0; self.ploidy],
                                genotype_quality: somatic_quality,
                            })
                            .collect();
                        let mut call = VariantCall::new(
                            variant.clone(),
                            somatic_quality,
                            sample_calls,
                        );
                        call.somatic = true;
                        call.somatic_frequency = Some(expected);
                        variant_calls.push(call);
                        continue;
                    }
                }
            }

            // germline call at the full posterior threshold; unlike the
            // other callers the regenotype path is not clamped to phred 1
            if *germline_quality >= self.params.min_variant_posterior {
                let germline_map = &posteriors[0].map_genotype;
                let genotype: Vec<u8> = germline_map
                    .iter()
                    .map(|&h| u8::from(content[h][index]))
                    .sorted()
                    .collect();
                if genotype.iter().any(|&a| a != 0) {
                    let sample_calls = samples
                        .iter()
                        .map(|&sample| SampleCall {
                            sample,
                            genotype: genotype.clone(),
                            genotype_quality: germline_quality,
                        })
                        .collect();
                    variant_calls.push(VariantCall::new(
                        variant.clone(),
                        germline_quality,
                        sample_calls,
                    ));
                }
            }
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
        &[
            "normal-sample",
            "max-somatic-haplotypes",
            "somatic-snv-mutation-rate",
            "somatic-indel-mutation-rate",
            "min-expected-somatic-frequency",
            "min-credible-somatic-frequency",
            "credible-mass",
            "tumour-germline-concentration",
            "max-vb-seeds",
        ]
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

    fn tumour_normal_input(
        tumour_alt_reads: usize,
        tumour_depth: usize,
        reference: &reference::Slice,
    ) -> (HaplotypeBlock, LikelihoodMatrix) {
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
            variants: vec![variant],
            indicators: vec![],
        };
        let mut by_sample = std::collections::HashMap::new();
        // sample 0 = normal (40x all ref), sample 1 = tumour
        by_sample.insert(
            0usize,
            (0..40).map(|_| read(15, b"AAAAAAAAAA")).collect::<Vec<_>>(),
        );
        by_sample.insert(
            1usize,
            (0..tumour_depth)
                .map(|i| {
                    if i < tumour_alt_reads {
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
        let matrix = model.compute(&block, &by_sample, reference);
        (block, matrix)
    }

    fn caller() -> CancerCaller {
        CancerCaller {
            normal: Some(0),
            ploidy: 2,
            max_somatic_haplotypes: 2,
            somatic_snv_mutation_rate: 1e-4,
            somatic_indel_mutation_rate: 1e-5,
            min_expected_somatic_frequency: 0.03,
            min_credible_somatic_frequency: 0.05,
            credible_mass: 0.9,
            tumour_germline_concentration: 5.0,
            max_vb_seeds: 3,
            params: ModelParams::default(),
        }
    }

    #[test]
    fn subclonal_snv_is_called_somatic() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        // 20% allele fraction in the tumour, clean normal
        let (block, matrix) = tumour_normal_input(8, 40, &reference);
        let mut cancer = caller();
        let calls = cancer
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert_eq!(calls.variant_calls.len(), 1);
        let call = &calls.variant_calls[0];
        assert!(call.somatic);
        let frequency = call.somatic_frequency.unwrap();
        assert!(frequency > 0.05 && frequency < 0.5, "frequency {}", frequency);
    }

    #[test]
    fn clean_tumour_calls_nothing() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let (block, matrix) = tumour_normal_input(0, 40, &reference);
        let mut cancer = caller();
        let calls = cancer
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert!(calls.variant_calls.is_empty());
    }
}
