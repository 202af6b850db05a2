use ordered_float::NotNan;

use crate::basics::read::AlignedRead;
use crate::basics::region::Position;

const UTILITY_BASE_QUALITY: u8 = 20;

/// Caps pileup depth by evicting the least useful reads first.
///
/// Eviction is deterministic so repeated runs on the same input produce
/// identical read sets.
#[derive(Debug, Clone, Copy)]
pub struct Downsampler {
    max_coverage: u32,
    target_coverage: u32,
}

impl Downsampler {
    pub fn new(max_coverage: u32, target_coverage: u32) -> Self {
        assert!(target_coverage <= max_coverage);
        Downsampler {
            max_coverage,
            target_coverage,
        }
    }

    /// Reduce `reads` in place; returns the number of evicted reads.
    pub fn downsample(&self, reads: &mut Vec<AlignedRead>) -> usize {
        if reads.is_empty() {
            return 0;
        }
        let begin = reads.iter().map(|r| r.region.begin()).min().unwrap();
        let end = reads.iter().map(|r| r.region.end()).max().unwrap();
        let mut depths = vec![0u32; (end - begin) as usize];
        for read in reads.iter() {
            add_depth(&mut depths, read, begin, 1);
        }
        if depths.iter().all(|&d| d <= self.max_coverage) {
            return 0;
        }
        let mut evicted = 0;
        while let Some(peak) = depths
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > self.target_coverage)
            .max_by_key(|(_, &d)| d)
            .map(|(i, _)| begin + i as Position)
        {
            let victim = reads
                .iter()
                .enumerate()
                .filter(|(_, r)| r.region.contains_position(peak))
                .min_by_key(|(_, r)| {
                    NotNan::new(utility(r)).expect("read utility is finite")
                })
                .map(|(i, _)| i);
            match victim {
                Some(i) => {
                    let read = reads.remove(i);
                    add_depth_signed(&mut depths, &read, begin);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

fn utility(read: &AlignedRead) -> f64 {
    read.count_good_bases(UTILITY_BASE_QUALITY) as f64 / read.len().max(1) as f64
}

fn add_depth(depths: &mut [u32], read: &AlignedRead, offset: Position, sign: i32) {
    let from = (read.region.begin() - offset) as usize;
    let to = (read.region.end() - offset) as usize;
    for d in &mut depths[from..to] {
        *d = (*d as i64 + sign as i64) as u32;
    }
}

fn add_depth_signed(depths: &mut [u32], read: &AlignedRead, offset: Position) {
    add_depth(depths, read, offset, -1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{Cigar, CigarOp, ReadFlags};
    use crate::basics::region::GenomicRegion;

    fn read(begin: Position, len: usize, qual: u8) -> AlignedRead {
        AlignedRead {
            name: format!("r{}q{}", begin, qual),
            region: GenomicRegion::new("c", begin, begin + len as u64),
            sequence: vec![b'A'; len],
            base_qualities: vec![qual; len],
            cigar: Cigar(vec![CigarOp::Match(len as u32)]),
            mapping_quality: 60,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn leaves_shallow_pileups_alone() {
        let mut reads = vec![read(0, 10, 30), read(2, 10, 30)];
        assert_eq!(Downsampler::new(10, 5).downsample(&mut reads), 0);
        assert_eq!(reads.len(), 2);
    }

    #[test]
    fn evicts_low_utility_reads_first() {
        let mut reads: Vec<AlignedRead> = (0..6).map(|_| read(0, 10, 30)).collect();
        reads.push(read(0, 10, 2));
        let evicted = Downsampler::new(6, 6).downsample(&mut reads);
        assert_eq!(evicted, 1);
        assert!(reads.iter().all(|r| r.base_qualities[0] == 30));
    }

    #[test]
    fn reaches_target_coverage() {
        let mut reads: Vec<AlignedRead> = (0..20).map(|_| read(5, 10, 30)).collect();
        Downsampler::new(10, 8).downsample(&mut reads);
        assert_eq!(reads.len(), 8);
    }
}
