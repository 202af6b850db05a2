use bio::stats::LogProb;
use statrs::function::gamma::ln_gamma;

use crate::basics::genotype::Genotype;
use crate::basics::haplotype::Haplotype;

/// Dirichlet-multinomial-style genotype prior built from SNV and indel
/// heterozygosities: each distinct non-reference haplotype pays for the
/// mutations it carries, extra copies pay a halving penalty, and the
/// multiset multiplicity enters through the multinomial coefficient.
#[derive(Debug, Clone)]
pub struct GenotypePrior {
    pub snv_heterozygosity: f64,
    pub indel_heterozygosity: f64,
}

impl Default for GenotypePrior {
    fn default() -> Self {
        GenotypePrior {
            snv_heterozygosity: 1e-3,
            indel_heterozygosity: 1e-4,
        }
    }
}

impl GenotypePrior {
    /// Unnormalized log-prior of a genotype over the block's haplotypes.
    pub fn ln_prior(&self, genotype: &Genotype<usize>, haplotypes: &[Haplotype]) -> LogProb {
        let mut ln_prior = 0.0;
        let mut seen: Vec<usize> = Vec::with_capacity(genotype.ploidy());
        for &h in genotype.iter() {
            if seen.contains(&h) {
                // another copy of an already-introduced haplotype
                ln_prior += (0.5f64).ln();
                continue;
            }
            seen.push(h);
            ln_prior += self.ln_haplotype_novelty(&haplotypes[h]);
        }
        ln_prior += ln_multinomial_coefficient(genotype);
        LogProb(ln_prior)
    }

    fn ln_haplotype_novelty(&self, haplotype: &Haplotype) -> f64 {
        haplotype
            .explicit_alleles()
            .map(|allele| {
                if allele.is_snv() {
                    self.snv_heterozygosity.ln()
                } else {
                    self.indel_heterozygosity.ln()
                }
            })
            .sum()
    }
}

fn ln_multinomial_coefficient(genotype: &Genotype<usize>) -> f64 {
    let ploidy = genotype.ploidy() as f64;
    let mut result = ln_gamma(ploidy + 1.0);
    let mut i = 0;
    let elements = genotype.elements();
    while i < elements.len() {
        let mut j = i;
        while j < elements.len() && elements[j] == elements[i] {
            j += 1;
        }
        result -= ln_gamma((j - i) as f64 + 1.0);
        i = j;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::region::GenomicRegion;
    use crate::basics::variant::Variant;

    fn haplotypes() -> Vec<Haplotype> {
        let region = GenomicRegion::new("c", 0, 20);
        let reference = Haplotype::reference(region.clone());
        let snv = Haplotype::with_alleles(
            region.clone(),
            vec![Variant::snv("c", 10, b'A', b'T').alt_allele()],
        )
        .unwrap();
        let indel = Haplotype::with_alleles(
            region,
            vec![Variant::insertion("c", 10, b"TT".to_vec()).alt_allele()],
        )
        .unwrap();
        vec![reference, snv, indel]
    }

    #[test]
    fn reference_is_most_likely() {
        let prior = GenotypePrior::default();
        let haplotypes = haplotypes();
        let hom_ref = prior.ln_prior(&Genotype::new(vec![0usize, 0]), &haplotypes);
        let het = prior.ln_prior(&Genotype::new(vec![0usize, 1]), &haplotypes);
        let hom_alt = prior.ln_prior(&Genotype::new(vec![1usize, 1]), &haplotypes);
        assert!(hom_ref > het);
        assert!(het > hom_alt);
    }

    #[test]
    fn indels_are_rarer_than_snvs() {
        let prior = GenotypePrior::default();
        let haplotypes = haplotypes();
        let het_snv = prior.ln_prior(&Genotype::new(vec![0usize, 1]), &haplotypes);
        let het_indel = prior.ln_prior(&Genotype::new(vec![0usize, 2]), &haplotypes);
        assert!(het_snv > het_indel);
    }
}
