use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;
use rust_htslib::bam::{self, Read};

use crate::basics::read::{AlignedRead, Cigar, CigarOp, MateInfo, ReadFlags};
use crate::basics::region::GenomicRegion;
use crate::basics::{SampleId, SampleRegistry};
use crate::errors::UserError;

/// Random access over one or more indexed read archives, translating
/// archive records into owned [`AlignedRead`]s tagged with their sample.
pub struct ReadManager {
    readers: Vec<ArchiveReader>,
}

struct ArchiveReader {
    reader: bam::IndexedReader,
    path: PathBuf,
    contig_names: Vec<String>,
    sample_by_read_group: HashMap<Vec<u8>, SampleId>,
    only_sample: Option<SampleId>,
}

impl ReadManager {
    /// Open archives and register every sample found in their `@RG` headers.
    /// Missing `@RG` or an `@RG` without `SM` is fatal.
    pub fn open<P: AsRef<Path>>(paths: &[P], registry: &mut SampleRegistry) -> Result<Self> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                return Err(UserError::MissingReadFile {
                    path: path.to_owned(),
                }
                .into());
            }
            let reader = bam::IndexedReader::from_path(path)?;
            let header = bam::Header::from_template(reader.header());
            let mut sample_by_read_group = HashMap::new();
            for (record_type, records) in header.to_hashmap() {
                if record_type != "RG" {
                    continue;
                }
                for record in records {
                    let id = record.get("ID").cloned().unwrap_or_default();
                    match record.get("SM") {
                        Some(sample) => {
                            let sample_id = registry.register(sample.clone());
                            sample_by_read_group.insert(id.into_bytes(), sample_id);
                        }
                        None => {
                            return Err(UserError::MissingSampleTag {
                                read_group: id,
                                path: path.to_owned(),
                            }
                            .into());
                        }
                    }
                }
            }
            if sample_by_read_group.is_empty() {
                return Err(UserError::MissingReadGroups {
                    path: path.to_owned(),
                }
                .into());
            }
            let only_sample = {
                let mut samples: Vec<SampleId> =
                    sample_by_read_group.values().copied().collect();
                samples.sort_unstable();
                samples.dedup();
                if samples.len() == 1 {
                    Some(samples[0])
                } else {
                    None
                }
            };
            let contig_names = reader
                .header()
                .target_names()
                .iter()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect();
            readers.push(ArchiveReader {
                reader,
                path: path.to_owned(),
                contig_names,
                sample_by_read_group,
                only_sample,
            });
        }
        Ok(ReadManager { readers })
    }

    /// Fetch all reads overlapping `region`, grouped by sample. Corrupt
    /// records are logged and dropped; the fetch continues.
    pub fn fetch(&mut self, region: &GenomicRegion) -> Result<HashMap<SampleId, Vec<AlignedRead>>> {
        let mut result: HashMap<SampleId, Vec<AlignedRead>> = HashMap::new();
        for archive in &mut self.readers {
            if !archive.contig_names.iter().any(|c| c == region.contig()) {
                continue;
            }
            archive.reader.fetch((
                region.contig(),
                region.begin() as i64,
                region.end() as i64,
            ))?;
            let mut record = bam::Record::new();
            while let Some(outcome) = archive.reader.read(&mut record) {
                if let Err(e) = outcome {
                    debug!("dropping unreadable record in {:?}: {}", archive.path, e);
                    continue;
                }
                if record.is_unmapped() || record.tid() < 0 {
                    continue;
                }
                let sample = match archive.sample_of(&record) {
                    Some(sample) => sample,
                    None => continue,
                };
                match convert_record(&record, &archive.contig_names) {
                    Some(read) => result.entry(sample).or_default().push(read),
                    None => {
                        debug!(
                            "dropping malformed record {} in {:?}",
                            String::from_utf8_lossy(record.qname()),
                            archive.path
                        );
                    }
                }
            }
        }
        for reads in result.values_mut() {
            reads.sort_by(|a, b| a.region.cmp(&b.region));
        }
        Ok(result)
    }

    pub fn num_archives(&self) -> usize {
        self.readers.len()
    }
}

impl ArchiveReader {
    fn sample_of(&self, record: &bam::Record) -> Option<SampleId> {
        if let Some(sample) = self.only_sample {
            return Some(sample);
        }
        match record.aux(b"RG") {
            Ok(bam::record::Aux::String(rg)) => {
                self.sample_by_read_group.get(rg.as_bytes()).copied()
            }
            _ => None,
        }
    }
}

fn convert_record(record: &bam::Record, contig_names: &[String]) -> Option<AlignedRead> {
    let cigar = Cigar(
        record
            .cigar()
            .iter()
            .map(|op| convert_cigar_op(op))
            .collect(),
    );
    if cigar.is_empty() {
        return None;
    }
    let contig = contig_names.get(record.tid() as usize)?.clone();
    let begin = record.pos() as u64;
    let region = GenomicRegion::new(contig, begin, begin + u64::from(cigar.reference_len()));
    let mate = if record.is_paired() && record.mtid() >= 0 {
        contig_names.get(record.mtid() as usize).map(|c| MateInfo {
            contig: c.clone(),
            begin: record.mpos().max(0) as u64,
            insert_size: record.insert_size(),
        })
    } else {
        None
    };
    let read = AlignedRead {
        name: String::from_utf8_lossy(record.qname()).into_owned(),
        region,
        sequence: record.seq().as_bytes(),
        base_qualities: record.qual().to_vec(),
        cigar,
        mapping_quality: record.mapq(),
        flags: ReadFlags {
            is_paired: record.is_paired(),
            is_reverse: record.is_reverse(),
            is_duplicate: record.is_duplicate(),
            is_secondary: record.is_secondary(),
            is_supplementary: record.is_supplementary(),
            is_qc_fail: record.is_quality_check_failed(),
            mate_unmapped: record.is_paired() && record.is_mate_unmapped(),
        },
        mate,
    };
    if read.sequence.is_empty() {
        return None;
    }
    Some(read)
}

fn convert_cigar_op(op: &bam::record::Cigar) -> CigarOp {
    use bam::record::Cigar as Htslib;
    match *op {
        Htslib::Match(n) => CigarOp::Match(n),
        Htslib::Equal(n) => CigarOp::Equal(n),
        Htslib::Diff(n) => CigarOp::Diff(n),
        Htslib::Ins(n) => CigarOp::Ins(n),
        Htslib::Del(n) => CigarOp::Del(n),
        Htslib::RefSkip(n) => CigarOp::RefSkip(n),
        Htslib::SoftClip(n) => CigarOp::SoftClip(n),
        Htslib::HardClip(n) => CigarOp::HardClip(n),
        Htslib::Pad(n) => CigarOp::Pad(n),
    }
}
