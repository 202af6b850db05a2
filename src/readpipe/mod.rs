//! The read pipe: fetch, transform, filter and downsample reads for an
//! active region, grouped by sample.

pub mod downsampler;
pub mod filters;
pub mod manager;
pub mod transformers;

use std::collections::HashMap;

use anyhow::Result;

use crate::basics::read::AlignedRead;
use crate::basics::region::GenomicRegion;
use crate::basics::SampleId;

pub use downsampler::Downsampler;
pub use filters::ReadFilterer;
pub use manager::ReadManager;
pub use transformers::ReadTransformer;

/// Anything that can hand out reads by region: the archive-backed manager in
/// production, an in-memory map in tests and small tools.
pub trait ReadProvider: Send {
    fn fetch(&mut self, region: &GenomicRegion) -> Result<HashMap<SampleId, Vec<AlignedRead>>>;
}

impl ReadProvider for ReadManager {
    fn fetch(&mut self, region: &GenomicRegion) -> Result<HashMap<SampleId, Vec<AlignedRead>>> {
        ReadManager::fetch(self, region)
    }
}

/// A fixed read set, served region by region.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReads {
    by_sample: HashMap<SampleId, Vec<AlignedRead>>,
}

impl InMemoryReads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample: SampleId, reads: Vec<AlignedRead>) {
        let entry = self.by_sample.entry(sample).or_default();
        entry.extend(reads);
        entry.sort_by(|a, b| a.region.cmp(&b.region));
    }
}

impl ReadProvider for InMemoryReads {
    fn fetch(&mut self, region: &GenomicRegion) -> Result<HashMap<SampleId, Vec<AlignedRead>>> {
        Ok(self
            .by_sample
            .iter()
            .map(|(&sample, reads)| {
                (
                    sample,
                    reads
                        .iter()
                        .filter(|r| r.region.overlaps(region))
                        .cloned()
                        .collect(),
                )
            })
            .collect())
    }
}

/// Transform, filter and downsample reads fetched from a provider.
pub struct ReadPipe {
    source: Box<dyn ReadProvider>,
    prefilter_transformer: ReadTransformer,
    filterer: ReadFilterer,
    downsampler: Option<Downsampler>,
}

impl ReadPipe {
    pub fn new(
        source: Box<dyn ReadProvider>,
        prefilter_transformer: ReadTransformer,
        filterer: ReadFilterer,
        downsampler: Option<Downsampler>,
    ) -> Self {
        ReadPipe {
            source,
            prefilter_transformer,
            filterer,
            downsampler,
        }
    }

    pub fn fetch_reads(
        &mut self,
        region: &GenomicRegion,
    ) -> Result<HashMap<SampleId, Vec<AlignedRead>>> {
        let mut result = self.source.fetch(region)?;
        for reads in result.values_mut() {
            for read in reads.iter_mut() {
                self.prefilter_transformer.apply(read);
            }
            reads.retain(|read| self.filterer.passes(read));
            if let Some(downsampler) = &self.downsampler {
                downsampler.downsample(reads);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::read::{Cigar, CigarOp, ReadFlags};

    fn read(begin: u64, qual: u8) -> AlignedRead {
        AlignedRead {
            name: "r".into(),
            region: GenomicRegion::new("c", begin, begin + 4),
            sequence: b"acgt".to_vec(),
            base_qualities: vec![qual; 4],
            cigar: Cigar(vec![CigarOp::Match(4)]),
            mapping_quality: 60,
            flags: ReadFlags::default(),
            mate: None,
        }
    }

    #[test]
    fn pipe_applies_stages_in_order() {
        let mut source = InMemoryReads::new();
        source.insert(0, vec![read(0, 30), read(2, 126)]);

        let mut transformer = ReadTransformer::new();
        transformer.add(transformers::CapitaliseBases);
        transformer.add(transformers::CapBaseQualities(125));

        let mut pipe = ReadPipe::new(
            Box::new(source),
            transformer,
            ReadFilterer::new(),
            None,
        );
        let reads = pipe
            .fetch_reads(&GenomicRegion::new("c", 0, 10))
            .unwrap()
            .remove(&0)
            .unwrap();
        assert_eq!(reads.len(), 2);
        assert!(reads.iter().all(|r| r.sequence == b"ACGT"));
        assert!(reads.iter().all(|r| r.base_qualities.iter().all(|&q| q <= 125)));
    }
}
