use crate::basics::read::AlignedRead;

pub trait ReadFilter: Send + Sync {
    fn passes(&self, read: &AlignedRead) -> bool;
}

/// Conjunction of filters. The mandatory well-formedness checks are always
/// installed first.
pub struct ReadFilterer {
    filters: Vec<Box<dyn ReadFilter>>,
}

impl Default for ReadFilterer {
    fn default() -> Self {
        let mut result = ReadFilterer {
            filters: Vec::new(),
        };
        result.add(HasWellFormedCigar);
        result.add(HasValidBaseQualities);
        result
    }
}

impl ReadFilterer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F: ReadFilter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn passes(&self, read: &AlignedRead) -> bool {
        self.filters.iter().all(|f| f.passes(read))
    }
}

pub struct HasWellFormedCigar;

impl ReadFilter for HasWellFormedCigar {
    fn passes(&self, read: &AlignedRead) -> bool {
        read.is_well_formed()
    }
}

pub struct HasValidBaseQualities;

impl ReadFilter for HasValidBaseQualities {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.base_qualities.is_empty() && read.base_qualities.iter().all(|&q| q <= 125)
    }
}

pub struct HasSufficientMappingQuality(pub u8);

impl ReadFilter for HasSufficientMappingQuality {
    fn passes(&self, read: &AlignedRead) -> bool {
        read.mapping_quality >= self.0
    }
}

/// At least `min_good_bases` bases with quality >= `good_base_quality`.
pub struct HasSufficientGoodBases {
    pub good_base_quality: u8,
    pub min_good_bases: usize,
}

impl ReadFilter for HasSufficientGoodBases {
    fn passes(&self, read: &AlignedRead) -> bool {
        read.count_good_bases(self.good_base_quality) >= self.min_good_bases
    }
}

pub struct IsLongerThan(pub usize);

impl ReadFilter for IsLongerThan {
    fn passes(&self, read: &AlignedRead) -> bool {
        read.len() > self.0
    }
}

pub struct IsShorterThan(pub usize);

impl ReadFilter for IsShorterThan {
    fn passes(&self, read: &AlignedRead) -> bool {
        read.len() < self.0
    }
}

pub struct IsNotDuplicate;

impl ReadFilter for IsNotDuplicate {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.flags.is_duplicate
    }
}

pub struct IsNotSecondary;

impl ReadFilter for IsNotSecondary {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.flags.is_secondary
    }
}

pub struct IsNotSupplementary;

impl ReadFilter for IsNotSupplementary {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.flags.is_supplementary
    }
}

pub struct IsNotMarkedQcFail;

impl ReadFilter for IsNotMarkedQcFail {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.flags.is_qc_fail
    }
}

/// Drop paired reads whose mate never mapped.
pub struct HasMappedMate;

impl ReadFilter for HasMappedMate {
    fn passes(&self, read: &AlignedRead) -> bool {
        !read.flags.is_paired || !read.flags.mate_unmapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{Cigar, CigarOp, ReadFlags};
    use crate::basics::region::GenomicRegion;

    fn read() -> AlignedRead {
        AlignedRead {
            name: "r".into(),
            region: GenomicRegion::new("c", 0, 4),
            sequence: b"ACGT".to_vec(),
            base_qualities: vec![30, 30, 5, 30],
            cigar: Cigar(vec![CigarOp::Match(4)]),
            mapping_quality: 40,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn mandatory_filters_reject_malformed_reads() {
        let filterer = ReadFilterer::new();
        let mut bad = read();
        bad.cigar = Cigar(vec![CigarOp::Match(3)]);
        assert!(!filterer.passes(&bad));
        assert!(filterer.passes(&read()));
    }

    #[test]
    fn optional_filters() {
        let mut filterer = ReadFilterer::new();
        filterer.add(HasSufficientMappingQuality(50));
        assert!(!filterer.passes(&read()));

        let mut filterer = ReadFilterer::new();
        filterer.add(HasSufficientGoodBases {
            good_base_quality: 20,
            min_good_bases: 3,
        });
        assert!(filterer.passes(&read()));

        let mut dup = read();
        dup.flags.is_duplicate = true;
        let mut filterer = ReadFilterer::new();
        filterer.add(IsNotDuplicate);
        assert!(!filterer.passes(&dup));
    }
}
