//! Candidate variant generation: the union of CIGAR scanning, tandem-repeat
//! proposals, local reassembly and external VCF sources, behind one sorted
//! and de-duplicated stream.

pub mod assembler;
pub mod cigar_scanner;
pub mod repeat_scanner;
pub mod source_file;

use std::collections::HashMap;

use anyhow::Result;

use crate::basics::read::AlignedRead;
use crate::basics::region::GenomicRegion;
use crate::basics::variant::Variant;
use crate::basics::SampleId;
use crate::reference;

pub use assembler::{LocalReassembler, ReassemblerOptions};
pub use cigar_scanner::{CigarScanner, CigarScannerOptions, MisalignmentParameters};
pub use repeat_scanner::{RepeatScanner, RepeatScannerOptions};
pub use source_file::{VcfExtractor, VcfExtractorOptions};

/// Everything a sub-generator may look at for one active region.
pub struct GenerationContext<'a> {
    pub reference: &'a reference::Slice,
    pub reads: &'a HashMap<SampleId, Vec<AlignedRead>>,
    pub region: &'a GenomicRegion,
}

pub trait CandidateVariantGenerator: Send {
    fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>>;
}

/// Per-candidate evidence the inclusion predicates decide on.
#[derive(Debug, Clone, Default)]
pub struct CandidateObservation {
    /// Supporting reads across all case samples.
    pub support: usize,
    /// Reads overlapping the site across all case samples.
    pub depth: usize,
    /// Supporting reads in the designated normal sample.
    pub normal_support: usize,
    /// Reads overlapping the site in the designated normal sample.
    pub normal_depth: usize,
}

impl CandidateObservation {
    pub fn frequency(&self) -> f64 {
        if self.depth == 0 {
            0.0
        } else {
            self.support as f64 / self.depth as f64
        }
    }

    pub fn normal_frequency(&self) -> f64 {
        if self.normal_depth == 0 {
            0.0
        } else {
            self.normal_support as f64 / self.normal_depth as f64
        }
    }
}

/// Calling-mode-specific candidate inclusion rules.
#[derive(Debug, Clone)]
pub enum InclusionPredicate {
    Germline {
        min_support: usize,
        max_expected_mutation_rate: f64,
    },
    Somatic {
        min_support: usize,
        min_somatic_frequency: f64,
        has_normal: bool,
    },
    Polyclone {
        min_support: usize,
        min_clone_frequency: f64,
    },
    Cell {
        min_support: usize,
        min_cell_fraction: f64,
    },
}

impl InclusionPredicate {
    pub fn includes(&self, observation: &CandidateObservation) -> bool {
        match *self {
            InclusionPredicate::Germline {
                min_support,
                max_expected_mutation_rate,
            } => {
                observation.support >= min_support
                    && observation.frequency() > max_expected_mutation_rate
            }
            InclusionPredicate::Somatic {
                min_support,
                min_somatic_frequency,
                has_normal,
            } => {
                observation.support >= min_support
                    && observation.frequency() >= min_somatic_frequency
                    && (!has_normal
                        || observation.normal_frequency() <= 2.0 * min_somatic_frequency)
            }
            InclusionPredicate::Polyclone {
                min_support,
                min_clone_frequency,
            } => {
                observation.support >= min_support
                    && observation.frequency() >= min_clone_frequency
            }
            InclusionPredicate::Cell {
                min_support,
                min_cell_fraction,
            } => {
                observation.support >= min_support
                    && observation.frequency() >= min_cell_fraction
            }
        }
    }
}

/// The union of all configured sub-generators.
pub struct CandidateGenerator {
    components: Vec<Box<dyn CandidateVariantGenerator>>,
    max_variant_size: usize,
}

impl CandidateGenerator {
    /// Sorted, de-duplicated candidates over the context region.
    pub fn generate(&mut self, ctx: &GenerationContext) -> Result<Vec<Variant>> {
        let mut result = Vec::new();
        for component in &mut self.components {
            result.extend(component.generate(ctx)?);
        }
        result.retain(|v| {
            v.ref_sequence().len() <= self.max_variant_size
                && v.alt_sequence().len() <= self.max_variant_size
                && ctx.region.overlaps(v.region())
        });
        result.sort();
        result.dedup();
        Ok(result)
    }
}

/// Assembles the generator from the enabled sub-generators.
#[derive(Default)]
pub struct CandidateGeneratorBuilder {
    cigar_scanner: Option<CigarScannerOptions>,
    repeat_scanner: Option<RepeatScannerOptions>,
    reassembler: Option<ReassemblerOptions>,
    vcf_sources: Vec<(std::path::PathBuf, VcfExtractorOptions)>,
    max_variant_size: usize,
}

impl CandidateGeneratorBuilder {
    pub fn new() -> Self {
        CandidateGeneratorBuilder {
            max_variant_size: 2000,
            ..Default::default()
        }
    }

    pub fn max_variant_size(mut self, size: usize) -> Self {
        self.max_variant_size = size;
        self
    }

    pub fn cigar_scanner(mut self, options: CigarScannerOptions) -> Self {
        self.cigar_scanner = Some(options);
        self
    }

    pub fn repeat_scanner(mut self, options: RepeatScannerOptions) -> Self {
        self.repeat_scanner = Some(options);
        self
    }

    pub fn local_reassembler(mut self, options: ReassemblerOptions) -> Self {
        self.reassembler = Some(options);
        self
    }

    pub fn vcf_source(
        mut self,
        path: std::path::PathBuf,
        options: VcfExtractorOptions,
    ) -> Self {
        self.vcf_sources.push((path, options));
        self
    }

    pub fn build(self) -> CandidateGenerator {
        let mut components: Vec<Box<dyn CandidateVariantGenerator>> = Vec::new();
        if let Some(options) = self.cigar_scanner {
            components.push(Box::new(CigarScanner::new(options)));
        }
        if let Some(options) = self.repeat_scanner {
            components.push(Box::new(RepeatScanner::new(options)));
        }
        if let Some(options) = self.reassembler {
            components.push(Box::new(LocalReassembler::new(options)));
        }
        for (path, options) in self.vcf_sources {
            components.push(Box::new(VcfExtractor::new(path, options)));
        }
        CandidateGenerator {
            components,
            max_variant_size: self.max_variant_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn somatic_predicate_rejects_normal_contamination() {
        let predicate = InclusionPredicate::Somatic {
            min_support: 2,
            min_somatic_frequency: 0.05,
            has_normal: true,
        };
        let somatic = CandidateObservation {
            support: 8,
            depth: 40,
            normal_support: 1,
            normal_depth: 40,
        };
        assert!(predicate.includes(&somatic));
        let contaminated = CandidateObservation {
            support: 8,
            depth: 40,
            normal_support: 8,
            normal_depth: 40,
        };
        assert!(!predicate.includes(&contaminated));
    }

    #[test]
    fn germline_predicate_requires_support_and_frequency() {
        let predicate = InclusionPredicate::Germline {
            min_support: 2,
            max_expected_mutation_rate: 0.1,
        };
        assert!(predicate.includes(&CandidateObservation {
            support: 10,
            depth: 20,
            ..Default::default()
        }));
        assert!(!predicate.includes(&CandidateObservation {
            support: 1,
            depth: 2,
            ..Default::default()
        }));
        assert!(!predicate.includes(&CandidateObservation {
            support: 2,
            depth: 100,
            ..Default::default()
        }));
    }
}
