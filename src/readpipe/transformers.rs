use crate::basics::read::AlignedRead;

/// Masked bases keep their sequence but drop to quality zero, so downstream
/// stages ignore them without re-slicing the read.
pub const MASKED_QUALITY: u8 = 0;

pub trait ReadTransform: Send + Sync {
    fn transform(&self, read: &mut AlignedRead);
}

/// An ordered pipeline of transforms applied before filtering.
#[derive(Default)]
pub struct ReadTransformer {
    transforms: Vec<Box<dyn ReadTransform>>,
}

impl ReadTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: ReadTransform + 'static>(&mut self, transform: T) -> &mut Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn apply(&self, read: &mut AlignedRead) {
        for transform in &self.transforms {
            transform.transform(read);
        }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

pub struct CapitaliseBases;

impl ReadTransform for CapitaliseBases {
    fn transform(&self, read: &mut AlignedRead) {
        read.sequence.make_ascii_uppercase();
    }
}

pub struct CapBaseQualities(pub u8);

impl ReadTransform for CapBaseQualities {
    fn transform(&self, read: &mut AlignedRead) {
        for q in &mut read.base_qualities {
            if *q > self.0 {
                *q = self.0;
            }
        }
    }
}

/// Mask a fixed number of bases at the 3' end.
pub struct MaskTail(pub usize);

impl ReadTransform for MaskTail {
    fn transform(&self, read: &mut AlignedRead) {
        let len = read.base_qualities.len();
        let masked = self.0.min(len);
        let range = if read.flags.is_reverse {
            0..masked
        } else {
            len - masked..len
        };
        for q in &mut read.base_qualities[range] {
            *q = MASKED_QUALITY;
        }
    }
}

/// Mask the 3' tail while its qualities stay below a threshold.
pub struct MaskLowQualityTail(pub u8);

impl ReadTransform for MaskLowQualityTail {
    fn transform(&self, read: &mut AlignedRead) {
        if read.flags.is_reverse {
            for q in read.base_qualities.iter_mut() {
                if *q >= self.0 {
                    break;
                }
                *q = MASKED_QUALITY;
            }
        } else {
            for q in read.base_qualities.iter_mut().rev() {
                if *q >= self.0 {
                    break;
                }
                *q = MASKED_QUALITY;
            }
        }
    }
}

/// Mask all soft-clipped bases, or only those below a quality threshold.
pub struct MaskSoftClipped {
    pub threshold: Option<u8>,
}

impl ReadTransform for MaskSoftClipped {
    fn transform(&self, read: &mut AlignedRead) {
        let head = read.cigar.leading_soft_clip() as usize;
        let tail = read.cigar.trailing_soft_clip() as usize;
        let len = read.base_qualities.len();
        let mask = |q: &mut u8| match self.threshold {
            Some(threshold) if *q >= threshold => {}
            _ => *q = MASKED_QUALITY,
        };
        read.base_qualities[..head.min(len)].iter_mut().for_each(&mask);
        read.base_qualities[len - tail.min(len)..]
            .iter_mut()
            .for_each(&mask);
    }
}

/// Mask template overrun into adapter sequence: with a fragment shorter than
/// the read, bases past the mate's end are adapter.
pub struct MaskAdapters;

impl ReadTransform for MaskAdapters {
    fn transform(&self, read: &mut AlignedRead) {
        let insert = match &read.mate {
            Some(mate) if read.flags.is_paired => mate.insert_size.unsigned_abs() as usize,
            _ => return,
        };
        let len = read.sequence.len();
        if insert == 0 || insert >= len {
            return;
        }
        let range = if read.flags.is_reverse {
            0..len - insert
        } else {
            insert..len
        };
        for q in &mut read.base_qualities[range] {
            *q = MASKED_QUALITY;
        }
    }
}

/// Mask soft-clipped read ends whose sequence is the reverse complement of
/// the adjacent aligned bases, a signature of inverted duplication artifacts.
pub struct MaskInvertedSoftClippedEnds {
    pub min_clip_length: usize,
}

fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|b| match b.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

impl ReadTransform for MaskInvertedSoftClippedEnds {
    fn transform(&self, read: &mut AlignedRead) {
        let len = read.sequence.len();
        let head = read.cigar.leading_soft_clip() as usize;
        if head >= self.min_clip_length && head * 2 <= len {
            let clip = &read.sequence[..head];
            let adjacent = &read.sequence[head..2 * head];
            if revcomp(clip) == adjacent {
                for q in &mut read.base_qualities[..head] {
                    *q = MASKED_QUALITY;
                }
            }
        }
        let tail = read.cigar.trailing_soft_clip() as usize;
        if tail >= self.min_clip_length && tail * 2 <= len {
            let clip = &read.sequence[len - tail..];
            let adjacent = &read.sequence[len - 2 * tail..len - tail];
            if revcomp(clip) == adjacent {
                for q in &mut read.base_qualities[len - tail..] {
                    *q = MASKED_QUALITY;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{Cigar, CigarOp, MateInfo, ReadFlags};
    use crate::basics::region::GenomicRegion;

    fn read_with(seq: &[u8], quals: Vec<u8>, cigar: Vec<CigarOp>) -> AlignedRead {
        let cigar = Cigar(cigar);
        AlignedRead {
            name: "r".into(),
            region: GenomicRegion::new("c", 0, u64::from(cigar.reference_len())),
            sequence: seq.to_vec(),
            base_qualities: quals,
            cigar,
            mapping_quality: 60,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn caps_and_capitalises() {
        let mut read = read_with(b"acgt", vec![126, 40, 126, 10], vec![CigarOp::Match(4)]);
        let mut pipeline = ReadTransformer::new();
        pipeline.add(CapitaliseBases);
        pipeline.add(CapBaseQualities(125));
        pipeline.apply(&mut read);
        assert_eq!(read.sequence, b"ACGT");
        assert_eq!(read.base_qualities, vec![125, 40, 125, 10]);
    }

    #[test]
    fn masks_low_quality_tail_until_good_base() {
        let mut read = read_with(b"ACGTAC", vec![30, 30, 30, 30, 2, 2], vec![CigarOp::Match(6)]);
        MaskLowQualityTail(10).transform(&mut read);
        assert_eq!(read.base_qualities, vec![30, 30, 30, 30, 0, 0]);
    }

    #[test]
    fn masks_soft_clips_only() {
        let mut read = read_with(
            b"ACGTAC",
            vec![30; 6],
            vec![CigarOp::SoftClip(2), CigarOp::Match(3), CigarOp::SoftClip(1)],
        );
        read.region = GenomicRegion::new("c", 0, 3);
        MaskSoftClipped { threshold: None }.transform(&mut read);
        assert_eq!(read.base_qualities, vec![0, 0, 30, 30, 30, 0]);
    }

    #[test]
    fn masks_adapter_overrun() {
        let mut read = read_with(b"ACGTACGT", vec![30; 8], vec![CigarOp::Match(8)]);
        read.flags.is_paired = true;
        read.mate = Some(MateInfo {
            contig: "c".into(),
            begin: 0,
            insert_size: 5,
        });
        MaskAdapters.transform(&mut read);
        assert_eq!(read.base_qualities, vec![30, 30, 30, 30, 30, 0, 0, 0]);
    }
}
