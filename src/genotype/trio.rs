use std::collections::HashMap;

use anyhow::Result;
use bio::stats::LogProb;
use itertools::Itertools;

use crate::basics::genotype::Genotype;
use crate::basics::haplotype::Haplotype;
use crate::basics::SampleId;
use crate::calling::{BlockCalls, GenotypePosteriors, SampleCall, VariantCall};
use crate::errors::ProgramError;

use super::{
    haplotype_content, ln_genotype_likelihood, make_refcalls, quality_from_posterior,
    CallInput, CallerModel, ModelParams,
};

/// Joint (mother, father, child) posterior with a Mendelian transmission
/// prior perturbed by de novo mutation rates.
pub struct TrioCaller {
    pub mother: SampleId,
    pub father: SampleId,
    pub child: SampleId,
    pub ploidy: usize,
    pub denovo_snv_mutation_rate: f64,
    pub denovo_indel_mutation_rate: f64,
    pub min_denovo_posterior: f64,
    pub params: ModelParams,
}

struct JointState {
    mother: usize,
    father: usize,
    child: usize,
    posterior: LogProb,
    denovo: bool,
}

impl TrioCaller {
    /// ln probability the child haplotype descends from the given parental
    /// haplotype, paying the configured rate per de novo mutation.
    fn ln_transmission_one(&self, parent: &Haplotype, child: &Haplotype) -> LogProb {
        let mut differences = parent.difference(child);
        differences.extend(child.difference(parent));
        let mut result = 0.0;
        for allele in &differences {
            let rate = if allele.is_snv() {
                self.denovo_snv_mutation_rate
            } else {
                self.denovo_indel_mutation_rate
            };
            if rate <= 0.0 {
                return LogProb::ln_zero();
            }
            result += rate.ln();
        }
        LogProb(result)
    }

    /// ln P(child genotype | parental genotypes) for diploid children:
    /// uniform over transmitted haplotype pairs, mutation-perturbed.
    fn ln_transmission(
        &self,
        mother: &Genotype<usize>,
        father: &Genotype<usize>,
        child: &Genotype<usize>,
        haplotypes: &[Haplotype],
    ) -> (LogProb, bool) {
        let child_haps = child.elements();
        if child_haps.len() != 2 {
            // non-diploid children fall back to independent inheritance
            return (LogProb::ln_one(), false);
        }
        let (a, b) = (child_haps[0], child_haps[1]);
        let mut terms = Vec::new();
        let mut exact_possible = false;
        for &hm in mother.iter() {
            for &hf in father.iter() {
                for (to_a, to_b) in [(a, b), (b, a)] {
                    let t = self.ln_transmission_one(&haplotypes[hm], &haplotypes[to_a])
                        + self.ln_transmission_one(&haplotypes[hf], &haplotypes[to_b]);
                    if hm == to_a && hf == to_b {
                        exact_possible = true;
                    }
                    terms.push(t);
                }
            }
        }
        let choices = (mother.ploidy() * father.ploidy() * 2) as f64;
        let total = LogProb(*LogProb::ln_sum_exp(&terms) - choices.ln());
        (total, !exact_possible)
    }

    fn joint_states(
        &self,
        input: &CallInput,
        genotypes: &[Genotype<usize>],
    ) -> Result<Vec<JointState>> {
        let haplotypes = &input.block.haplotypes;
        let prior = self.params.prior();
        let mut sample_scores: HashMap<SampleId, Vec<LogProb>> = HashMap::new();
        for &sample in [self.mother, self.father, self.child].iter() {
            let likelihoods = input.likelihoods.get(&sample).ok_or_else(|| {
                ProgramError::InvariantViolated {
                    what: format!("trio sample {} missing from likelihoods", sample),
                }
            })?;
            let scores = genotypes
                .iter()
                .map(|g| prior.ln_prior(g, haplotypes) + ln_genotype_likelihood(likelihoods, g))
                .collect();
            sample_scores.insert(sample, scores);
        }

        let mother_scores = &sample_scores[&self.mother];
        let father_scores = &sample_scores[&self.father];
        let child_likelihoods = &input.likelihoods[&self.child];

        let mut states = Vec::new();
        let mut joints = Vec::new();
        for (gm, &ln_m) in mother_scores.iter().enumerate() {
            for (gf, &ln_f) in father_scores.iter().enumerate() {
                for (gc, genotype_c) in genotypes.iter().enumerate() {
                    let (transmission, denovo) = self.ln_transmission(
                        &genotypes[gm],
                        &genotypes[gf],
                        genotype_c,
                        haplotypes,
                    );
                    if transmission == LogProb::ln_zero() {
                        continue;
                    }
                    let joint = ln_m
                        + ln_f
                        + ln_genotype_likelihood(child_likelihoods, genotype_c)
                        + transmission;
                    joints.push(joint);
                    states.push(JointState {
                        mother: gm,
                        father: gf,
                        child: gc,
                        posterior: joint,
                        denovo,
                    });
                }
            }
        }
        let norm = LogProb::ln_sum_exp(&joints);
        for state in &mut states {
            state.posterior = (state.posterior - norm).cap_numerical_overshoot(1e-9);
        }
        Ok(states)
    }

    fn marginal(
        states: &[JointState],
        genotypes: &[Genotype<usize>],
        pick: impl Fn(&JointState) -> usize,
    ) -> Vec<(Genotype<usize>, LogProb)> {
        let mut by_genotype: Vec<Vec<LogProb>> = vec![Vec::new(); genotypes.len()];
        for state in states {
            by_genotype[pick(state)].push(state.posterior);
        }
        genotypes
            .iter()
            .cloned()
            .zip(by_genotype.into_iter().map(|terms| {
                if terms.is_empty() {
                    LogProb::ln_zero()
                } else {
                    LogProb::ln_sum_exp(&terms).cap_numerical_overshoot(1e-9)
                }
            }))
            .collect()
    }
}

impl CallerModel for TrioCaller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        let genotypes = super::enumerate_over(input, &self.params, self.ploidy);
        let states = self.joint_states(input, &genotypes)?;
        let mut result = Vec::new();
        for (sample, pick) in [
            (self.mother, 0usize),
            (self.father, 1),
            (self.child, 2),
        ] {
            let distribution = Self::marginal(&states, &genotypes, |s| match pick {
                0 => s.mother,
                1 => s.father,
                _ => s.child,
            });
            let map = super::map_genotype(&distribution);
            result.push(GenotypePosteriors {
                sample,
                distribution,
                map_genotype: map,
            });
        }
        Ok(result)
    }

    fn emit_calls(&mut self, input: &CallInput) -> Result<BlockCalls> {
        let genotypes = super::enumerate_over(input, &self.params, self.ploidy);
        let states = self.joint_states(input, &genotypes)?;
        let (variants, content) = haplotype_content(input.block);
        let novel = input.block.novel_variants();

        let posteriors: Vec<GenotypePosteriors> = {
            let mut result = Vec::new();
            for (sample, which) in
                [(self.mother, 0usize), (self.father, 1), (self.child, 2)]
            {
                let distribution = Self::marginal(&states, &genotypes, |s| match which {
                    0 => s.mother,
                    1 => s.father,
                    _ => s.child,
                });
                let map = super::map_genotype(&distribution);
                result.push(GenotypePosteriors {
                    sample,
                    distribution,
                    map_genotype: map,
                });
            }
            result
        };

        let carries = |genotype: &Genotype<usize>, index: usize| {
            genotype.iter().any(|&h| content[h][index])
        };

        let mut variant_calls = Vec::new();
        for (index, variant) in variants.iter().enumerate() {
            if !novel.contains(variant) {
                continue;
            }
            // present in any family member
            let mut present_terms = Vec::new();
            let mut denovo_terms = Vec::new();
            for state in &states {
                let anywhere = carries(&genotypes[state.mother], index)
                    || carries(&genotypes[state.father], index)
                    || carries(&genotypes[state.child], index);
                if anywhere {
                    present_terms.push(state.posterior);
                }
                // de novo in the child: carried by the child, absent from
                // both parents, and the state needs a mutation
                if state.denovo
                    && carries(&genotypes[state.child], index)
                    && !carries(&genotypes[state.mother], index)
                    && !carries(&genotypes[state.father], index)
                {
                    denovo_terms.push(state.posterior);
                }
            }
            let present = if present_terms.is_empty() {
                LogProb::ln_zero()
            } else {
                LogProb::ln_sum_exp(&present_terms).cap_numerical_overshoot(1e-9)
            };
            let denovo = if denovo_terms.is_empty() {
                LogProb::ln_zero()
            } else {
                LogProb::ln_sum_exp(&denovo_terms).cap_numerical_overshoot(1e-9)
            };

            let quality = quality_from_posterior(present);
            let denovo_quality = quality_from_posterior(denovo);
            if *quality < self.params.min_variant_posterior
                && *denovo_quality < self.min_denovo_posterior
            {
                continue;
            }

            let mut samples = Vec::new();
            for sample_posteriors in &posteriors {
                let map = &sample_posteriors.map_genotype;
                let genotype: Vec<u8> = map
                    .iter()
                    .map(|&h| u8::from(content[h][index]))
                    .sorted()
                    .collect();
                samples.push(SampleCall {
                    sample: sample_posteriors.sample,
                    genotype,
                    genotype_quality: quality_from_posterior(
                        sample_posteriors.posterior_of(map),
                    ),
                });
            }
            if samples.iter().all(|s| s.genotype.iter().all(|&a| a == 0)) {
                continue;
            }
            let mut call = VariantCall::new(variant.clone(), quality, samples);
            call.denovo_posterior = Some(denovo);
            variant_calls.push(call);
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
            "maternal-sample",
            "paternal-sample",
            "denovo-snv-mutation-rate",
            "denovo-indel-mutation-rate",
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

    fn trio_input(
        child_alt_fraction: usize,
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
        // samples 0 = mother, 1 = father, 2 = child; parents at 30x
        for parent in 0..2usize {
            by_sample.insert(
                parent,
                (0..30).map(|_| read(15, b"AAAAAAAAAA")).collect::<Vec<_>>(),
            );
        }
        let child_reads = (0..12)
            .map(|i| {
                if i % 2 == 0 && i / 2 < child_alt_fraction {
                    read(15, b"AAAAATAAAA")
                } else {
                    read(15, b"AAAAAAAAAA")
                }
            })
            .collect();
        by_sample.insert(2usize, child_reads);
        let mut model = HaplotypeLikelihoodModel::new(
            ErrorModel::from_name_or_path("PCR").unwrap(),
            LikelihoodModelConfig::default(),
        );
        let matrix = model.compute(&block, &by_sample, reference);
        (block, matrix)
    }

    fn caller(snv_rate: f64) -> TrioCaller {
        TrioCaller {
            mother: 0,
            father: 1,
            child: 2,
            ploidy: 2,
            denovo_snv_mutation_rate: snv_rate,
            denovo_indel_mutation_rate: snv_rate / 10.0,
            min_denovo_posterior: 3.0,
            params: ModelParams::default(),
        }
    }

    #[test]
    fn denovo_snv_is_flagged() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let (block, matrix) = trio_input(6, &reference);
        let mut trio = caller(1e-8);
        let calls = trio
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        assert_eq!(calls.variant_calls.len(), 1);
        let call = &calls.variant_calls[0];
        let denovo = call.denovo_posterior.unwrap();
        assert!(denovo.exp() > 0.5, "de novo posterior {:?}", denovo);
    }

    #[test]
    fn zero_mutation_rate_kills_the_denovo_posterior() {
        let reference = reference::Slice::new("c", 0, vec![b'A'; 50]);
        let (block, matrix) = trio_input(6, &reference);
        let mut trio = caller(0.0);
        let calls = trio
            .emit_calls(&CallInput {
                block: &block,
                likelihoods: &matrix,
                reference: &reference,
            })
            .unwrap();
        // the variant may still be called as an inherited het, but every
        // surviving joint state is Mendelian-consistent
        for call in &calls.variant_calls {
            assert!(call.denovo_posterior.unwrap().exp() <= 1e-9);
        }
    }
}
