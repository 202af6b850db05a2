use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::reference;

use super::allele::Allele;
use super::region::GenomicRegion;

/// An ordered sequence of explicit alleles tiling an active region.
///
/// Reference filler between explicit alleles is materialized lazily from a
/// reference slice; the materialized sequence and its hash are cached and
/// invalidated by a generation counter bumped on every push.
#[derive(Debug)]
pub struct Haplotype {
    region: GenomicRegion,
    explicit_alleles: VecDeque<Allele>,
    generation: Cell<u64>,
    cache: RefCell<SequenceCache>,
}

#[derive(Debug, Default)]
struct SequenceCache {
    generation: u64,
    sequence: Option<Arc<Vec<u8>>>,
    hash: Option<u64>,
}

impl Haplotype {
    /// The reference haplotype over `region`.
    pub fn reference(region: GenomicRegion) -> Self {
        Haplotype {
            region,
            explicit_alleles: VecDeque::new(),
            generation: Cell::new(0),
            cache: RefCell::new(SequenceCache::default()),
        }
    }

    /// Build from alleles already in left-to-right order.
    pub fn with_alleles<I>(region: GenomicRegion, alleles: I) -> Result<Self>
    where
        I: IntoIterator<Item = Allele>,
    {
        let mut result = Haplotype::reference(region);
        for allele in alleles {
            result.push_back(allele)?;
        }
        Ok(result)
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn explicit_alleles(&self) -> impl Iterator<Item = &Allele> {
        self.explicit_alleles.iter()
    }

    pub fn is_reference(&self) -> bool {
        self.explicit_alleles.is_empty()
    }

    /// Append an allele to the right of all existing ones. The enclosing
    /// region grows to absorb it; out-of-order or overlapping pushes are
    /// rejected.
    pub fn push_back(&mut self, allele: Allele) -> Result<()> {
        if let Some(last) = self.explicit_alleles.back() {
            if !last.region().same_contig(allele.region())
                || allele.region().begin() < last.region().end()
            {
                bail!(
                    "haplotype allele pushed out of order: {} after {}",
                    allele,
                    last
                );
            }
        }
        self.region = self.region.encompass(allele.region());
        self.explicit_alleles.push_back(allele);
        self.generation.set(self.generation.get() + 1);
        Ok(())
    }

    /// Does this haplotype carry exactly this allele?
    pub fn contains(&self, allele: &Allele) -> bool {
        self.explicit_alleles.iter().any(|a| a == allele)
    }

    /// Alleles carried by `self` but not by `other`.
    pub fn difference(&self, other: &Haplotype) -> Vec<Allele> {
        self.explicit_alleles
            .iter()
            .filter(|a| !other.contains(a))
            .cloned()
            .collect()
    }

    /// The materialized sequence over the haplotype region: explicit alleles
    /// concatenated with reference fillers. `reference` must cover the
    /// region.
    pub fn sequence(&self, reference: &reference::Slice) -> Arc<Vec<u8>> {
        {
            let cache = self.cache.borrow();
            if cache.generation == self.generation.get() {
                if let Some(seq) = &cache.sequence {
                    return Arc::clone(seq);
                }
            }
        }
        let seq = Arc::new(self.build_sequence(reference));
        let mut cache = self.cache.borrow_mut();
        if cache.generation != self.generation.get() {
            *cache = SequenceCache::default();
            cache.generation = self.generation.get();
        }
        cache.sequence = Some(Arc::clone(&seq));
        seq
    }

    fn build_sequence(&self, reference: &reference::Slice) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.region.size() as usize + 16);
        let mut cursor = self.region.begin();
        for allele in &self.explicit_alleles {
            if allele.region().begin() > cursor {
                let filler = GenomicRegion::new(
                    self.region.contig().to_owned(),
                    cursor,
                    allele.region().begin(),
                );
                result.extend_from_slice(
                    reference
                        .subsequence(&filler)
                        .expect("reference slice does not cover haplotype region"),
                );
            }
            result.extend_from_slice(allele.sequence());
            cursor = allele.region().end();
        }
        if cursor < self.region.end() {
            let tail = GenomicRegion::new(self.region.contig().to_owned(), cursor, self.region.end());
            result.extend_from_slice(
                reference
                    .subsequence(&tail)
                    .expect("reference slice does not cover haplotype region"),
            );
        }
        result
    }

    /// Hash of the materialized sequence, cached alongside it.
    pub fn sequence_hash(&self, reference: &reference::Slice) -> u64 {
        {
            let cache = self.cache.borrow();
            if cache.generation == self.generation.get() {
                if let Some(hash) = cache.hash {
                    return hash;
                }
            }
        }
        let seq = self.sequence(reference);
        let mut hasher = DefaultHasher::new();
        seq.hash(&mut hasher);
        let hash = hasher.finish();
        self.cache.borrow_mut().hash = Some(hash);
        hash
    }

    /// Number of explicit alleles; used to rank haplotype complexity when
    /// choosing holdouts.
    pub fn complexity(&self) -> usize {
        self.explicit_alleles.len()
    }
}

impl Clone for Haplotype {
    fn clone(&self) -> Self {
        Haplotype {
            region: self.region.clone(),
            explicit_alleles: self.explicit_alleles.clone(),
            generation: Cell::new(self.generation.get()),
            cache: RefCell::new(SequenceCache::default()),
        }
    }
}

impl PartialEq for Haplotype {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.explicit_alleles == other.explicit_alleles
    }
}

impl Eq for Haplotype {}

impl PartialOrd for Haplotype {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Haplotype {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| self.explicit_alleles.cmp(&other.explicit_alleles))
    }
}

impl Hash for Haplotype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.region.hash(state);
        for allele in &self.explicit_alleles {
            allele.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::region::GenomicRegion;

    fn slice() -> reference::Slice {
        //                          0123456789
        reference::Slice::new("c", 0, b"ACGTACGTAC".to_vec())
    }

    #[test]
    fn reference_haplotype_materializes_reference() {
        let hap = Haplotype::reference(GenomicRegion::new("c", 2, 8));
        assert_eq!(*hap.sequence(&slice()), b"GTACGT".to_vec());
    }

    #[test]
    fn snv_and_deletion_tile_region() {
        let mut hap = Haplotype::reference(GenomicRegion::new("c", 0, 10));
        hap.push_back(Allele::new(GenomicRegion::new("c", 2, 3), b"T".to_vec()))
            .unwrap();
        hap.push_back(Allele::new(GenomicRegion::new("c", 5, 7), vec![]))
            .unwrap();
        // ref ACGTACGTAC with G2T and del[5,7) => AC T TA   TAC
        assert_eq!(*hap.sequence(&slice()), b"ACTTATAC".to_vec());
    }

    #[test]
    fn insertion_at_point() {
        let mut hap = Haplotype::reference(GenomicRegion::new("c", 0, 4));
        hap.push_back(Allele::new(GenomicRegion::point("c", 2), b"GG".to_vec()))
            .unwrap();
        assert_eq!(*hap.sequence(&slice()), b"ACGGGT".to_vec());
    }

    #[test]
    fn out_of_order_push_is_rejected() {
        let mut hap = Haplotype::reference(GenomicRegion::new("c", 0, 10));
        hap.push_back(Allele::new(GenomicRegion::new("c", 5, 6), b"A".to_vec()))
            .unwrap();
        assert!(hap
            .push_back(Allele::new(GenomicRegion::new("c", 3, 4), b"A".to_vec()))
            .is_err());
    }

    #[test]
    fn cache_invalidates_on_push() {
        let reference = slice();
        let mut hap = Haplotype::reference(GenomicRegion::new("c", 0, 4));
        let before = hap.sequence_hash(&reference);
        hap.push_back(Allele::new(GenomicRegion::new("c", 1, 2), b"A".to_vec()))
            .unwrap();
        let after = hap.sequence_hash(&reference);
        assert_ne!(before, after);
        assert_eq!(*hap.sequence(&reference), b"AAGT".to_vec());
    }

    #[test]
    fn region_grows_to_absorb_pushed_alleles() {
        let mut hap = Haplotype::reference(GenomicRegion::new("c", 2, 4));
        hap.push_back(Allele::new(GenomicRegion::new("c", 6, 7), b"C".to_vec()))
            .unwrap();
        assert_eq!(hap.region(), &GenomicRegion::new("c", 2, 7));
    }
}
