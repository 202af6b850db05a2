use std::fs;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::Arc;
use std::sync::{Mutex, RwLock};

use anyhow::Result;
use bio::io::fasta;
use log::warn;
use lru_time_cache::LruCache;

use crate::basics::region::{GenomicRegion, Position};

/// Reference cache footprints below this are coerced to zero.
const MIN_NON_ZERO_CACHE_FOOTPRINT: usize = 1_000;
/// Footprints below this work, but poorly.
const MIN_WARN_CACHE_FOOTPRINT: usize = 1_000_000;

/// Contig identifier and length, as reported by the reference index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    pub name: String,
    pub length: u64,
}

/// A window of reference bytes handed down into the calling core.
///
/// Carries its own coordinates so haplotypes and scanners never touch the
/// backing reader. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Slice {
    contig: String,
    offset: Position,
    bytes: Arc<Vec<u8>>,
}

impl Slice {
    pub fn new<C: Into<String>>(contig: C, offset: Position, bytes: Vec<u8>) -> Self {
        Slice {
            contig: contig.into(),
            offset,
            bytes: Arc::new(bytes),
        }
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    pub fn offset(&self) -> Position {
        self.offset
    }

    pub fn region(&self) -> GenomicRegion {
        GenomicRegion::new(
            self.contig.clone(),
            self.offset,
            self.offset + self.bytes.len() as u64,
        )
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bases over `region`, or `None` when the slice does not cover it.
    pub fn subsequence(&self, region: &GenomicRegion) -> Option<&[u8]> {
        if region.contig() != self.contig
            || region.begin() < self.offset
            || region.end() > self.offset + self.bytes.len() as u64
        {
            return None;
        }
        let from = (region.begin() - self.offset) as usize;
        let to = (region.end() - self.offset) as usize;
        Some(&self.bytes[from..to])
    }

    pub fn base_at(&self, pos: Position) -> Option<u8> {
        if pos < self.offset {
            return None;
        }
        self.bytes.get((pos - self.offset) as usize).copied()
    }
}

/// The reference access surface the calling core needs; implemented by the
/// indexed-FASTA buffer and by in-memory references in tools and tests.
pub trait ReferenceProvider: Send + Sync {
    fn contigs(&self) -> Vec<Contig>;
    fn slice(&self, region: &GenomicRegion) -> Result<Slice>;
}

/// A fixed in-memory reference.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    sequences: Vec<(String, Arc<Vec<u8>>)>,
}

impl InMemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contig<C: Into<String>>(mut self, name: C, sequence: Vec<u8>) -> Self {
        self.sequences.push((name.into(), Arc::new(sequence)));
        self
    }
}

impl ReferenceProvider for InMemoryReference {
    fn contigs(&self) -> Vec<Contig> {
        self.sequences
            .iter()
            .map(|(name, seq)| Contig {
                name: name.clone(),
                length: seq.len() as u64,
            })
            .collect()
    }

    fn slice(&self, region: &GenomicRegion) -> Result<Slice> {
        let (_, seq) = self
            .sequences
            .iter()
            .find(|(name, _)| name == region.contig())
            .ok_or_else(|| anyhow::anyhow!("unknown contig {}", region.contig()))?;
        let begin = (region.begin() as usize).min(seq.len());
        let end = (region.end() as usize).min(seq.len());
        Ok(Slice::new(
            region.contig(),
            begin as Position,
            seq[begin..end].to_vec(),
        ))
    }
}

/// A lazy buffer for reference sequences.
///
/// Whole contigs are loaded on first touch and retired in LRU order once the
/// configured footprint is exceeded. A zero footprint disables retention
/// entirely; every fetch then reads straight from the indexed file.
pub struct Buffer {
    reader: RwLock<fasta::IndexedReader<fs::File>>,
    sequences: Mutex<LruCache<String, Arc<Vec<u8>>>>,
    footprint: usize,
    reference_path: PathBuf,
}

impl Buffer {
    /// Open an indexed FASTA. `cache_footprint` is a soft cap in bytes on
    /// retained contig sequences; tiny values are coerced with a warning.
    pub fn from_path<P: AsRef<Path> + std::fmt::Debug>(path: P, cache_footprint: usize) -> Result<Self> {
        let footprint = Self::coerce_footprint(cache_footprint);
        let fasta: fasta::IndexedReader<fs::File> = fasta::IndexedReader::from_file(&path)?;
        // LruCache is entry-counted; approximate the byte budget with an
        // entry budget assuming human-sized contigs.
        let capacity = if footprint == 0 {
            1
        } else {
            (footprint / 50_000_000).max(1)
        };
        Ok(Buffer {
            reader: RwLock::new(fasta),
            sequences: Mutex::new(LruCache::with_capacity(capacity)),
            footprint,
            reference_path: path.as_ref().to_path_buf(),
        })
    }

    fn coerce_footprint(requested: usize) -> usize {
        if requested > 0 && requested < MIN_NON_ZERO_CACHE_FOOTPRINT {
            warn!(
                "Ignoring reference cache footprint of {} bytes as this is too small; \
                 the maximum cache size will be set to zero",
                requested
            );
            return 0;
        }
        if requested > 0 && requested < MIN_WARN_CACHE_FOOTPRINT {
            warn!(
                "The reference cache footprint of {} bytes is very small and may hurt performance",
                requested
            );
        }
        requested
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    pub fn contigs(&self) -> Vec<Contig> {
        self.reader
            .read()
            .unwrap()
            .index
            .sequences()
            .iter()
            .map(|seq| Contig {
                name: seq.name.clone(),
                length: seq.len,
            })
            .collect()
    }

    /// The given chromosome's bases: O(1) on a cache hit, one indexed read
    /// on a miss. The cache lock is not held across the file read, so two
    /// threads may race to load the same contig; the loser's copy is simply
    /// dropped.
    pub fn seq(&self, chrom: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(sequence) = self.sequences.lock().unwrap().get(chrom) {
            return Ok(Arc::clone(sequence));
        }
        let sequence = Arc::new(self.read_contig(chrom)?);
        if self.footprint > 0 {
            self.sequences
                .lock()
                .unwrap()
                .insert(chrom.to_owned(), Arc::clone(&sequence));
        }
        Ok(sequence)
    }

    fn read_contig(&self, chrom: &str) -> Result<Vec<u8>> {
        let mut reader = self.reader.write().unwrap();
        reader.fetch_all(chrom)?;
        let mut bases = Vec::new();
        reader.read(&mut bases)?;
        Ok(bases)
    }

    /// A self-contained window of reference bytes over `region`, clamped to
    /// the contig end.
    pub fn slice(&self, region: &GenomicRegion) -> Result<Slice> {
        let seq = self.seq(region.contig())?;
        let begin = (region.begin() as usize).min(seq.len());
        let end = (region.end() as usize).min(seq.len());
        Ok(Slice::new(
            region.contig(),
            begin as Position,
            seq[begin..end].to_vec(),
        ))
    }
}

impl ReferenceProvider for Buffer {
    fn contigs(&self) -> Vec<Contig> {
        Buffer::contigs(self)
    }

    fn slice(&self, region: &GenomicRegion) -> Result<Slice> {
        Buffer::slice(self, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_subsequence() {
        let slice = Slice::new("c", 10, b"ACGTACGT".to_vec());
        assert_eq!(
            slice.subsequence(&GenomicRegion::new("c", 12, 16)).unwrap(),
            b"GTAC"
        );
        assert!(slice.subsequence(&GenomicRegion::new("c", 8, 12)).is_none());
        assert!(slice.subsequence(&GenomicRegion::new("d", 12, 16)).is_none());
        assert_eq!(slice.base_at(17), Some(b'T'));
        assert_eq!(slice.base_at(18), None);
    }
}
