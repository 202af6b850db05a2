use anyhow::Result;
use bio::stats::LogProb;
use itertools::Itertools;

use crate::basics::genotype::Genotype;
use crate::calling::{BlockCalls, GenotypePosteriors, SampleCall, VariantCall};

use super::{
    haplotype_content, make_refcalls, map_genotype, quality_from_posterior, CallInput,
    CallerModel, ModelParams,
};

/// Single-cell calling: every sample is one cell. Clone structure is shared
/// across cells (polyclone-style), and each cell's genotype likelihood mixes
/// in latent allelic dropout weighted by the dropout concentration.
pub struct CellCaller {
    pub ploidy: usize,
    pub min_cell_fraction: f64,
    /// Larger concentrations make allelic dropout rarer; the expected
    /// dropout probability is `1 / (1 + concentration)`.
    pub dropout_concentration: f64,
    pub max_vb_seeds: usize,
    pub params: ModelParams,
}

impl CellCaller {
    fn dropout_probability(&self) -> f64 {
        1.0 / (1.0 + self.dropout_concentration.max(0.0))
    }

    /// ln P(cell reads | genotype), marginalizing the latent dropout event:
    /// either both alleles amplified, or all reads come from one of them.
    fn ln_cell_likelihood(
        &self,
        sample: &crate::likelihood::SampleLikelihoods,
        genotype: &Genotype<usize>,
    ) -> LogProb {
        let dropout = self.dropout_probability();
        let ln_no_dropout = LogProb::from(bio::stats::Prob(1.0 - dropout));
        let ln_dropout_each = LogProb::from(bio::stats::Prob(
            dropout / genotype.ploidy() as f64,
        ));

        let balanced = super::ln_genotype_likelihood(sample, genotype);
        let mut branches = vec![ln_no_dropout + balanced];
        for &surviving in genotype.iter() {
            let mut collapsed = LogProb::ln_one();
            for row in sample.informative_rows() {
                collapsed = collapsed + row[surviving];
            }
            branches.push(ln_dropout_each + collapsed);
        }
        LogProb::ln_sum_exp(&branches).cap_numerical_overshoot(1e-9)
    }
}

impl CallerModel for CellCaller {
    fn score_genotypes(&mut self, input: &CallInput) -> Result<Vec<GenotypePosteriors>> {
        let genotypes = super::enumerate_over(input, &self.params, self.ploidy);
        let prior = self.params.prior();
        let mut result = Vec::new();
        for (&sample, likelihoods) in input.likelihoods.iter().sorted_by_key(|(&s, _)| s) {
            let joints: Vec<LogProb> = genotypes
                .iter()
                .map(|g| {
                    prior.ln_prior(g, &input.block.haplotypes)
                        + self.ln_cell_likelihood(likelihoods, g)
                })
                .collect();
            let norm = LogProb::ln_sum_exp(&joints);
            let distribution: Vec<(Genotype<usize>, LogProb)> = genotypes
                .iter()
                .cloned()
                .zip(
                    joints
                        .into_iter()
                        .map(|j| (j - norm).cap_numerical_overshoot(1e-9)),
                )
                .collect();
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
            // posterior-weighted fraction of cells carrying the variant
            let mut carrying_mass = 0.0;
            let mut samples = Vec::new();
            let mut ln_not_variant = LogProb::ln_one();
            for cell in &posteriors {
                let marginal =
                    super::variant_marginal(&cell.distribution, &content, index);
                carrying_mass += marginal.exp();
                ln_not_variant = ln_not_variant + marginal.ln_one_minus_exp();
                samples.push(SampleCall {
                    sample: cell.sample,
                    genotype: cell
                        .map_genotype
                        .iter()
                        .map(|&h| u8::from(content[h][index]))
                        .sorted()
                        .collect(),
                    genotype_quality: quality_from_posterior(
                        cell.posterior_of(&cell.map_genotype),
                    ),
                });
            }
            let cell_fraction = carrying_mass / posteriors.len().max(1) as f64;
            if cell_fraction < self.min_cell_fraction {
                continue;
            }
            let quality = bio::stats::PHREDProb::from(ln_not_variant);
            if *quality < self.params.min_variant_posterior {
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
        &[
            "min-cell-fraction",
            "dropout-concentration",
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
        ErrorModel, HaplotypeLikelihoodModel, LikelihoodModelConfig,
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
    fn dropout_cells_still_genotype_het() {
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
        // cell 0: balanced het; cell 1: only alt reads (reference dropout)
        by_sample.insert(
            0usize,
            (0..10)
                .map(|i| {
                    if i % 2 == 0 {
                        read(15, b"AAAAATAAAA")
                    } else {
                        read(15, b"AAAAAAAAAA")
                    }
                })
                .collect::<Vec<_>>(),
        );
        by_sample.insert(
            1usize,
            (0..6).map(|_| read(15, b"AAAAATAAAA")).collect::<Vec<_>>(),
        );
        let mut model = HaplotypeLikelihoodModel::new(
            ErrorModel::from_name_or_path("PCR").unwrap(),
            LikelihoodModelConfig::default(),
        );
        let matrix = model.compute(&block, &by_sample, &reference);
        let mut caller = CellCaller {
            ploidy: 2,
            min_cell_fraction: 0.25,
            dropout_concentration: 10.0,
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
        let call = &calls.variant_calls[0];
        // both cells carry the alt
        for sample in &call.samples {
            assert!(sample.genotype.iter().any(|&a| a == 1));
        }
    }
}
