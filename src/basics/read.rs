use std::fmt;

use serde::{Deserialize, Serialize};

use super::region::{GenomicRegion, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CigarOp {
    Match(u32),
    Equal(u32),
    Diff(u32),
    Ins(u32),
    Del(u32),
    RefSkip(u32),
    SoftClip(u32),
    HardClip(u32),
    Pad(u32),
}

impl CigarOp {
    pub fn len(self) -> u32 {
        match self {
            CigarOp::Match(n)
            | CigarOp::Equal(n)
            | CigarOp::Diff(n)
            | CigarOp::Ins(n)
            | CigarOp::Del(n)
            | CigarOp::RefSkip(n)
            | CigarOp::SoftClip(n)
            | CigarOp::HardClip(n)
            | CigarOp::Pad(n) => n,
        }
    }

    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Equal(_)
                | CigarOp::Diff(_)
                | CigarOp::Ins(_)
                | CigarOp::SoftClip(_)
        )
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Equal(_)
                | CigarOp::Diff(_)
                | CigarOp::Del(_)
                | CigarOp::RefSkip(_)
        )
    }

    pub fn char(self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Equal(_) => '=',
            CigarOp::Diff(_) => 'X',
            CigarOp::Ins(_) => 'I',
            CigarOp::Del(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Pad(_) => 'P',
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cigar(pub Vec<CigarOp>);

impl Cigar {
    pub fn iter(&self) -> impl Iterator<Item = &CigarOp> {
        self.0.iter()
    }

    pub fn query_len(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.consumes_query())
            .map(|op| op.len())
            .sum()
    }

    pub fn reference_len(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.consumes_reference())
            .map(|op| op.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn leading_soft_clip(&self) -> u32 {
        match self.0.first() {
            Some(CigarOp::SoftClip(n)) => *n,
            Some(CigarOp::HardClip(_)) => match self.0.get(1) {
                Some(CigarOp::SoftClip(n)) => *n,
                _ => 0,
            },
            _ => 0,
        }
    }

    pub fn trailing_soft_clip(&self) -> u32 {
        match self.0.last() {
            Some(CigarOp::SoftClip(n)) => *n,
            Some(CigarOp::HardClip(_)) => match self.0.iter().rev().nth(1) {
                Some(CigarOp::SoftClip(n)) => *n,
                _ => 0,
            },
            _ => 0,
        }
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for op in &self.0 {
            write!(f, "{}{}", op.len(), op.char())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFlags {
    pub is_paired: bool,
    pub is_reverse: bool,
    pub is_duplicate: bool,
    pub is_secondary: bool,
    pub is_supplementary: bool,
    pub is_qc_fail: bool,
    pub mate_unmapped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MateInfo {
    pub contig: String,
    pub begin: Position,
    pub insert_size: i64,
}

/// An aligned sequencing read, decoupled from any backing archive record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedRead {
    pub name: String,
    pub region: GenomicRegion,
    pub sequence: Vec<u8>,
    pub base_qualities: Vec<u8>,
    pub cigar: Cigar,
    pub mapping_quality: u8,
    pub flags: ReadFlags,
    pub mate: Option<MateInfo>,
}

impl AlignedRead {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Footprint in bytes when retained in a read buffer.
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.name.len()
            + self.sequence.len()
            + self.base_qualities.len()
            + self.cigar.0.len() * std::mem::size_of::<CigarOp>()
    }

    /// Sequence length matches the CIGAR query span, qualities match the
    /// sequence, and the region matches the CIGAR reference span.
    pub fn is_well_formed(&self) -> bool {
        !self.cigar.is_empty()
            && self.cigar.query_len() as usize == self.sequence.len()
            && self.base_qualities.len() == self.sequence.len()
            && u64::from(self.cigar.reference_len()) == self.region.size()
    }

    /// Number of bases with quality at least `threshold`.
    pub fn count_good_bases(&self, threshold: u8) -> usize {
        self.base_qualities
            .iter()
            .filter(|&&q| q >= threshold)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn simple_read(begin: Position, seq: &[u8]) -> AlignedRead {
        AlignedRead {
            name: "read".into(),
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
    fn cigar_spans() {
        let cigar = Cigar(vec![
            CigarOp::SoftClip(3),
            CigarOp::Match(10),
            CigarOp::Ins(2),
            CigarOp::Del(4),
            CigarOp::Match(5),
        ]);
        assert_eq!(cigar.query_len(), 20);
        assert_eq!(cigar.reference_len(), 19);
        assert_eq!(cigar.leading_soft_clip(), 3);
        assert_eq!(cigar.trailing_soft_clip(), 0);
        assert_eq!(cigar.to_string(), "3S10M2I4D5M");
    }

    #[test]
    fn well_formedness() {
        let mut read = simple_read(10, b"ACGTACGTAC");
        assert!(read.is_well_formed());
        read.cigar = Cigar(vec![CigarOp::Match(9)]);
        assert!(!read.is_well_formed());
        read.cigar = Cigar(vec![]);
        assert!(!read.is_well_formed());
    }
}
