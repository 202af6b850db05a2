use std::path::PathBuf;

use anyhow::Result;
use log::debug;
use rust_htslib::bcf::{self, Read};

use crate::basics::region::GenomicRegion;
use crate::basics::variant::Variant;

use super::{CandidateVariantGenerator, GenerationContext};

#[derive(Debug, Clone, Default)]
pub struct VcfExtractorOptions {
    /// Records below this QUAL are skipped.
    pub min_source_quality: Option<f32>,
    /// Alleles longer than this are skipped.
    pub max_variant_size: Option<usize>,
}

/// Pulls candidates out of an external VCF/BCF, splitting multi-allelic
/// records and ignoring symbolic alleles.
pub struct VcfExtractor {
    path: PathBuf,
    options: VcfExtractorOptions,
}

impl VcfExtractor {
    pub fn new(path: PathBuf, options: VcfExtractorOptions) -> Self {
        VcfExtractor { path, options }
    }

    fn convert_record(
        &self,
        record: &bcf::Record,
        contig: &str,
        region: &GenomicRegion,
    ) -> Vec<Variant> {
        if let Some(min_quality) = self.options.min_source_quality {
            let quality = record.qual();
            if quality.is_finite() && quality < min_quality {
                return Vec::new();
            }
        }
        let alleles = record.alleles();
        if alleles.len() < 2 {
            return Vec::new();
        }
        let ref_allele = alleles[0].to_ascii_uppercase();
        let pos = record.pos().max(0) as u64;
        let mut result = Vec::new();
        for alt in &alleles[1..] {
            if alt.starts_with(b"<") || alt.contains(&b'[') || alt.contains(&b']') {
                continue;
            }
            let alt = alt.to_ascii_uppercase();
            if alt == b"*" {
                continue;
            }
            if let Some(max_size) = self.options.max_variant_size {
                if ref_allele.len() > max_size || alt.len() > max_size {
                    continue;
                }
            }
            let end = pos + ref_allele.len() as u64;
            let variant = Variant::new(
                GenomicRegion::new(contig, pos, end),
                ref_allele.clone(),
                alt.to_vec(),
            )
            // trim the VCF anchor base without shifting past the record start
            .canonicalized(&ref_allele, pos);
            if region.overlaps(variant.region()) {
                result.push(variant);
            }
        }
        result
    }
}

impl CandidateVariantGenerator for VcfExtractor {
    fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>> {
        let mut reader = bcf::Reader::from_path(&self.path)?;
        let header = reader.header().clone();
        let mut result = Vec::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    debug!("skipping unreadable record in {:?}: {}", self.path, e);
                    continue;
                }
            };
            let rid = match record.rid() {
                Some(rid) => rid,
                None => continue,
            };
            let contig = String::from_utf8_lossy(header.rid2name(rid)?).into_owned();
            if contig != ctx.region.contig() {
                continue;
            }
            result.extend(self.convert_record(&record, &contig, ctx.region));
        }
        Ok(result)
    }
}
