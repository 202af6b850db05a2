use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};

use super::region::GenomicRegion;

/// A concrete sequence hypothesis over a region.
///
/// Deletions have an empty sequence over a non-empty region; insertions a
/// non-empty sequence over an empty region anchored at the insertion point.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new,
)]
pub struct Allele {
    region: GenomicRegion,
    sequence: Vec<u8>,
}

impl Allele {
    /// The reference allele over `region`, i.e. the reference bases themselves.
    pub fn reference(region: GenomicRegion, reference_bases: &[u8]) -> Self {
        assert_eq!(region.size() as usize, reference_bases.len());
        Allele {
            region,
            sequence: reference_bases.to_vec(),
        }
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn is_insertion(&self) -> bool {
        self.region.is_empty() && !self.sequence.is_empty()
    }

    pub fn is_deletion(&self) -> bool {
        !self.region.is_empty() && self.sequence.is_empty()
    }

    pub fn is_indel(&self) -> bool {
        self.is_insertion() || self.is_deletion() || self.region.size() as usize != self.sequence.len()
    }

    pub fn is_snv(&self) -> bool {
        self.region.size() == 1 && self.sequence.len() == 1
    }

    /// Net length change this allele introduces relative to the reference.
    pub fn length_change(&self) -> i64 {
        self.sequence.len() as i64 - self.region.size() as i64
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let seq = if self.sequence.is_empty() {
            "<DEL>".to_owned()
        } else {
            String::from_utf8_lossy(&self.sequence).into_owned()
        };
        write!(f, "{}={}", self.region, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let snv = Allele::new(GenomicRegion::new("1", 5, 6), b"T".to_vec());
        assert!(snv.is_snv());
        assert!(!snv.is_indel());

        let ins = Allele::new(GenomicRegion::point("1", 5), b"TT".to_vec());
        assert!(ins.is_insertion());
        assert_eq!(ins.length_change(), 2);

        let del = Allele::new(GenomicRegion::new("1", 5, 8), vec![]);
        assert!(del.is_deletion());
        assert_eq!(del.length_change(), -3);
    }
}
