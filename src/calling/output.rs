use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use rust_htslib::bcf::{self, record::GenotypeAllele, Format};

use crate::basics::region::Position;
use crate::basics::variant::Variant;
use crate::reference::ReferenceProvider;

use super::{RefCall, VariantCall};

/// Output sink for calls; the htslib writer in production, a vector in
/// tests.
pub trait CallSink {
    fn write_variant(&mut self, call: &VariantCall) -> Result<()>;
    fn write_refcall(&mut self, call: &RefCall) -> Result<()>;
}

/// Collects calls in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub variants: Vec<VariantCall>,
    pub refcalls: Vec<RefCall>,
}

impl CallSink for MemorySink {
    fn write_variant(&mut self, call: &VariantCall) -> Result<()> {
        self.variants.push(call.clone());
        Ok(())
    }

    fn write_refcall(&mut self, call: &RefCall) -> Result<()> {
        self.refcalls.push(call.clone());
        Ok(())
    }
}

/// Derived sibling paths: `<out>.unfiltered.<ext>` and `<out>.legacy.<ext>`.
pub fn sibling_path(out: &Path, tag: &str) -> PathBuf {
    let name = out
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = match name.find('.') {
        Some(dot) => (name[..dot].to_owned(), name[dot..].to_owned()),
        None => (name, String::new()),
    };
    out.with_file_name(format!("{}.{}{}", stem, tag, ext))
}

/// VCF/BCF writer for calls. Positions are written 1-based by htslib from
/// the crate's internal 0-based coordinates; indels get their VCF anchor
/// base from the reference.
pub struct VcfWriter {
    writer: bcf::Writer,
    reference: Arc<dyn ReferenceProvider>,
    sites_only: bool,
    num_samples: usize,
}

impl VcfWriter {
    pub fn new(
        path: Option<&Path>,
        reference: Arc<dyn ReferenceProvider>,
        samples: &[String],
        sites_only: bool,
    ) -> Result<Self> {
        let mut header = bcf::Header::new();
        for contig in reference.contigs() {
            header.push_record(
                format!("##contig=<ID={},length={}>", contig.name, contig.length).as_bytes(),
            );
        }
        header.push_record(b"##INFO=<ID=SOMATIC,Number=0,Type=Flag,Description=\"Somatic mutation\">");
        header.push_record(
            b"##INFO=<ID=PDN,Number=1,Type=Float,Description=\"Posterior probability the variant is de novo\">",
        );
        header.push_record(
            b"##INFO=<ID=SF,Number=1,Type=Float,Description=\"Expected somatic allele frequency\">",
        );
        header.push_record(
            b"##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position of a reference block\">",
        );
        if !sites_only {
            header.push_record(b"##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">");
            header.push_record(
                b"##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">",
            );
            header.push_record(
                b"##FORMAT=<ID=PS,Number=1,Type=Integer,Description=\"Phase set\">",
            );
            for sample in samples {
                header.push_sample(sample.as_bytes());
            }
        }
        let writer = match path {
            Some(path) => {
                let bcf_output = path
                    .extension()
                    .map(|e| e == "bcf")
                    .unwrap_or(false);
                let uncompressed = !bcf_output
                    && !path.to_string_lossy().ends_with(".vcf.gz");
                let format = if bcf_output { Format::Bcf } else { Format::Vcf };
                bcf::Writer::from_path(path, &header, uncompressed, format)?
            }
            None => bcf::Writer::from_stdout(&header, true, Format::Vcf)?,
        };
        Ok(VcfWriter {
            writer,
            reference,
            sites_only,
            num_samples: samples.len(),
        })
    }

    /// VCF representation of the variant: anchored alleles and 0-based
    /// anchor position.
    fn vcf_alleles(&self, variant: &Variant) -> Result<(Position, Vec<u8>, Vec<u8>)> {
        let region = variant.region();
        if !variant.ref_sequence().is_empty() && !variant.alt_sequence().is_empty() {
            return Ok((
                region.begin(),
                variant.ref_sequence().to_vec(),
                variant.alt_sequence().to_vec(),
            ));
        }
        // indel: anchor on the preceding base
        let anchor_pos = region.begin().saturating_sub(1);
        let anchor_region = crate::basics::region::GenomicRegion::new(
            region.contig(),
            anchor_pos,
            anchor_pos + 1,
        );
        let slice = self.reference.slice(&anchor_region)?;
        let anchor = slice.bytes().first().copied().unwrap_or(b'N');
        let mut ref_allele = vec![anchor];
        ref_allele.extend_from_slice(variant.ref_sequence());
        let mut alt_allele = vec![anchor];
        alt_allele.extend_from_slice(variant.alt_sequence());
        Ok((anchor_pos, ref_allele, alt_allele))
    }
}

impl CallSink for VcfWriter {
    fn write_variant(&mut self, call: &VariantCall) -> Result<()> {
        let mut record = self.writer.empty_record();
        let rid = self
            .writer
            .header()
            .name2rid(call.variant.region().contig().as_bytes())?;
        record.set_rid(Some(rid));
        let (pos, ref_allele, alt_allele) = self.vcf_alleles(&call.variant)?;
        record.set_pos(pos as i64);
        record.set_alleles(&[&ref_allele, &alt_allele])?;
        record.set_qual(*call.quality as f32);
        if call.somatic {
            record.push_info_flag(b"SOMATIC")?;
        }
        if let Some(denovo) = call.denovo_posterior {
            record.push_info_float(b"PDN", &[denovo.exp() as f32])?;
        }
        if let Some(frequency) = call.somatic_frequency {
            record.push_info_float(b"SF", &[frequency as f32])?;
        }
        if !self.sites_only {
            let phased = call.phase_set.is_some();
            let mut genotypes: Vec<GenotypeAllele> = Vec::new();
            for sample in &call.samples {
                for (i, &allele) in sample.genotype.iter().enumerate() {
                    if phased && i > 0 {
                        genotypes.push(GenotypeAllele::Phased(i32::from(allele)));
                    } else {
                        genotypes.push(GenotypeAllele::Unphased(i32::from(allele)));
                    }
                }
            }
            record.push_genotypes(&genotypes)?;
            let quals: Vec<i32> = call
                .samples
                .iter()
                .map(|s| (*s.genotype_quality).round() as i32)
                .collect();
            record.push_format_integer(b"GQ", &quals)?;
            if let Some(phase_set) = call.phase_set {
                // VCF phase sets are 1-based position identifiers
                let ps = vec![phase_set as i32 + 1; self.num_samples];
                record.push_format_integer(b"PS", &ps)?;
            }
        }
        self.writer.write(&record)?;
        Ok(())
    }

    fn write_refcall(&mut self, call: &RefCall) -> Result<()> {
        let mut record = self.writer.empty_record();
        let rid = self
            .writer
            .header()
            .name2rid(call.region.contig().as_bytes())?;
        record.set_rid(Some(rid));
        record.set_pos(call.region.begin() as i64);
        let anchor_region = crate::basics::region::GenomicRegion::new(
            call.region.contig(),
            call.region.begin(),
            call.region.begin() + 1,
        );
        let slice = self.reference.slice(&anchor_region)?;
        let ref_base = slice.bytes().first().copied().unwrap_or(b'N');
        record.set_alleles(&[&[ref_base][..], b"<NON_REF>"])?;
        record.set_qual(*call.quality as f32);
        record.push_info_integer(b"END", &[call.region.end() as i32])?;
        if !self.sites_only {
            let mut genotypes = Vec::new();
            for _ in 0..self.num_samples.max(call.sample_depths.len()) {
                genotypes.push(GenotypeAllele::Unphased(0));
                genotypes.push(GenotypeAllele::Unphased(0));
            }
            record.push_genotypes(&genotypes)?;
        }
        self.writer.write(&record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_are_derived_from_the_stem() {
        assert_eq!(
            sibling_path(Path::new("/tmp/calls.vcf.gz"), "unfiltered"),
            PathBuf::from("/tmp/calls.unfiltered.vcf.gz")
        );
        assert_eq!(
            sibling_path(Path::new("out.bcf"), "legacy"),
            PathBuf::from("out.legacy.bcf")
        );
    }
}
