use std::fmt;

use itertools::Itertools;

/// A ploidy-sized multiset of haplotypes (usually referenced by index into
/// the active block's haplotype set). Equality is multiset equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Genotype<H: Ord + Clone> {
    elements: Vec<H>,
}

impl<H: Ord + Clone> Genotype<H> {
    pub fn new<I: IntoIterator<Item = H>>(elements: I) -> Self {
        let mut elements: Vec<H> = elements.into_iter().collect();
        elements.sort();
        Genotype { elements }
    }

    pub fn ploidy(&self) -> usize {
        self.elements.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.elements.iter()
    }

    pub fn contains(&self, element: &H) -> bool {
        self.elements.binary_search(element).is_ok()
    }

    pub fn count(&self, element: &H) -> usize {
        self.elements.iter().filter(|e| *e == element).count()
    }

    /// All copies equal?
    pub fn is_homozygous(&self) -> bool {
        self.elements.windows(2).all(|w| w[0] == w[1])
    }

    pub fn elements(&self) -> &[H] {
        &self.elements
    }
}

impl<H: Ord + Clone> IntoIterator for Genotype<H> {
    type Item = H;
    type IntoIter = std::vec::IntoIter<H>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<H: Ord + Clone + fmt::Display> fmt::Display for Genotype<H> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.elements.iter().join("/"))
    }
}

/// A germline genotype paired with the extra haplotypes attributed to
/// somatic mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancerGenotype {
    pub germline: Genotype<usize>,
    pub somatic: Vec<usize>,
}

impl CancerGenotype {
    pub fn new(germline: Genotype<usize>, mut somatic: Vec<usize>) -> Self {
        somatic.sort_unstable();
        CancerGenotype { germline, somatic }
    }

    /// Germline and somatic haplotypes flattened into mixture components.
    pub fn components(&self) -> Vec<usize> {
        let mut result: Vec<usize> = self.germline.iter().copied().unique().collect();
        result.extend(self.somatic.iter().copied());
        result
    }

    pub fn num_germline_components(&self) -> usize {
        self.germline.iter().copied().unique().count()
    }
}

impl fmt::Display for CancerGenotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}+{}", self.germline, self.somatic.iter().join(","))
    }
}

/// Enumerate all genotypes of the given ploidy over `num_haplotypes`
/// haplotypes, in lexicographic order, stopping at `max_genotypes`.
pub fn enumerate_genotypes(
    num_haplotypes: usize,
    ploidy: usize,
    max_genotypes: usize,
) -> Vec<Genotype<usize>> {
    (0..num_haplotypes)
        .combinations_with_replacement(ploidy)
        .take(max_genotypes)
        .map(Genotype::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiset_equality() {
        let a = Genotype::new(vec![2usize, 0]);
        let b = Genotype::new(vec![0usize, 2]);
        assert_eq!(a, b);
        assert!(!a.is_homozygous());
        assert!(Genotype::new(vec![1usize, 1]).is_homozygous());
    }

    #[test]
    fn enumeration_counts() {
        // C(n + p - 1, p) multisets
        assert_eq!(enumerate_genotypes(3, 2, usize::MAX).len(), 6);
        assert_eq!(enumerate_genotypes(4, 3, usize::MAX).len(), 20);
        assert_eq!(enumerate_genotypes(4, 3, 5).len(), 5);
    }

    #[test]
    fn count_and_contains() {
        let g = Genotype::new(vec![1usize, 1, 3]);
        assert_eq!(g.count(&1), 2);
        assert!(g.contains(&3));
        assert!(!g.contains(&0));
        assert_eq!(g.ploidy(), 3);
    }

    #[test]
    fn cancer_genotype_components() {
        let g = CancerGenotype::new(Genotype::new(vec![0usize, 0]), vec![2]);
        assert_eq!(g.components(), vec![0, 2]);
        assert_eq!(g.num_germline_components(), 1);
    }
}
