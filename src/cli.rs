//! Option collation: turn the raw command line into validated pipeline
//! components, applying the caller promotion rules on the way.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::basics::pedigree::{Pedigree, Sex, Trio};
use crate::basics::ploidy::{ContigPloidy, PloidyMap};
use crate::basics::region::{GenomicRegion, Position};
use crate::basics::{SampleId, SampleRegistry};
use crate::calling::output::{sibling_path, CallSink, VcfWriter};
use crate::calling::phaser::PhaserConfig;
use crate::calling::progress::ProgressMeter;
use crate::calling::scheduler::{
    consolidate_regions, ComponentFactory, ContigOutputOrder, Scheduler, SchedulerConfig,
};
use crate::candidates::{
    CandidateGenerator, CandidateGeneratorBuilder, CigarScannerOptions, InclusionPredicate,
    MisalignmentParameters, ReassemblerOptions, RepeatScannerOptions, VcfExtractorOptions,
};
use crate::errors::UserError;
use crate::genotype::{
    cancer::CancerCallerBuilder, Caller, CellCaller, IndividualCaller, ModelParams,
    PolycloneCaller, RefCallType, TrioCaller,
};
use crate::haplotypes::{ExtensionPolicy, HaplotypeGeneratorConfig, LaggingPolicy};
use crate::likelihood::{ErrorModel, HaplotypeLikelihoodModel, LikelihoodModelConfig};
use crate::readpipe::{
    downsampler::Downsampler, filters, transformers, ReadFilterer, ReadManager, ReadPipe,
    ReadTransformer,
};
use crate::reference;
use crate::utils::{parse_memory_footprint, ScopedTempDir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallerKind {
    Individual,
    Population,
    Trio,
    Cancer,
    Polyclone,
    Cell,
}

impl FromStr for CallerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "individual" => Ok(CallerKind::Individual),
            "population" => Ok(CallerKind::Population),
            "trio" => Ok(CallerKind::Trio),
            "cancer" => Ok(CallerKind::Cancer),
            "polyclone" => Ok(CallerKind::Polyclone),
            "cell" => Ok(CallerKind::Cell),
            other => Err(format!("unknown caller {}", other)),
        }
    }
}

#[derive(Debug, StructOpt, Serialize, Deserialize, Clone)]
#[structopt(
    name = "octopus",
    about = "Haplotype-based variant calling for germline, trio, cancer, polyclone and single-cell samples."
)]
pub struct Options {
    /// Indexed FASTA reference.
    #[structopt(short = "R", long, parse(from_os_str))]
    pub reference: PathBuf,

    /// Indexed BAM/CRAM read archives.
    #[structopt(short = "I", long = "reads", parse(from_os_str))]
    pub reads: Vec<PathBuf>,

    /// File of read archive paths, one per line; relative entries resolve
    /// against the file's directory first.
    #[structopt(long = "reads-file", parse(from_os_str))]
    pub reads_file: Option<PathBuf>,

    /// Restrict calling to these samples.
    #[structopt(long)]
    pub samples: Vec<String>,

    /// Soft cap on simultaneously open read archives.
    #[structopt(long, default_value = "250")]
    pub max_open_read_files: usize,

    /// Output VCF/BCF path; stdout when omitted.
    #[structopt(short = "o", long, parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Also write the unfiltered sibling `<out>.unfiltered.<ext>`.
    #[structopt(long)]
    pub keep_unfiltered_calls: bool,

    /// Also write a legacy-format sibling `<out>.legacy.<ext>`.
    #[structopt(long)]
    pub legacy: bool,

    /// Regions to call, e.g. `chr1` or `chr1:100-200`.
    #[structopt(short = "T", long)]
    pub regions: Vec<String>,

    /// File of regions to call, one per line.
    #[structopt(long, parse(from_os_str))]
    pub regions_file: Option<PathBuf>,

    /// Regions to skip.
    #[structopt(long)]
    pub skip_regions: Vec<String>,

    /// File of regions to skip, one per line.
    #[structopt(long, parse(from_os_str))]
    pub skip_regions_file: Option<PathBuf>,

    /// Treat region inputs as one-based inclusive.
    #[structopt(long)]
    pub one_based_indexing: bool,

    /// individual | population | trio | cancer | polyclone | cell
    #[structopt(long, default_value = "population")]
    pub caller: CallerKind,

    #[structopt(short = "P", long, default_value = "2")]
    pub organism_ploidy: usize,

    /// Contig ploidy overrides, `contig=ploidy` or `sample:contig=ploidy`.
    #[structopt(long = "contig-ploidies")]
    pub contig_ploidies: Vec<String>,

    #[structopt(long)]
    pub maternal_sample: Option<String>,

    #[structopt(long)]
    pub paternal_sample: Option<String>,

    #[structopt(long)]
    pub normal_sample: Option<String>,

    /// PED pedigree file.
    #[structopt(long, parse(from_os_str))]
    pub pedigree: Option<PathBuf>,

    /// Worker threads; 0 means all cores.
    #[structopt(long, default_value = "1")]
    pub threads: usize,

    /// e.g. 6GB
    #[structopt(long, default_value = "6GB")]
    pub target_read_buffer_footprint: String,

    /// e.g. 16GB
    #[structopt(long, default_value = "16GB")]
    pub target_working_memory: String,

    /// e.g. 500MB
    #[structopt(long, default_value = "500MB")]
    pub max_reference_cache_footprint: String,

    /// Disable haplotype lagging.
    #[structopt(long)]
    pub fast: bool,

    /// Disable lagging and flank scoring.
    #[structopt(long)]
    pub very_fast: bool,

    #[structopt(long, default_value = "200")]
    pub max_haplotypes: usize,

    #[structopt(long, default_value = "2500")]
    pub haplotype_holdout_threshold: usize,

    #[structopt(long, default_value = "20")]
    pub max_holdout_depth: usize,

    #[structopt(long, default_value = "normal")]
    pub lagging_level: LaggingPolicy,

    #[structopt(long, default_value = "normal")]
    pub extension_level: ExtensionPolicy,

    /// Error model profile name, parameter string or file.
    #[structopt(long, default_value = "PCR")]
    pub error_model: String,

    #[structopt(long)]
    pub disable_mapping_quality_integration: bool,

    #[structopt(long, default_value = "1e-3")]
    pub snp_heterozygosity: f64,

    #[structopt(long, default_value = "1e-4")]
    pub indel_heterozygosity: f64,

    #[structopt(long, default_value = "5000")]
    pub max_genotypes: usize,

    /// PHRED-scaled.
    #[structopt(long, default_value = "2.0")]
    pub min_variant_posterior: f64,

    /// none | positional | blocked
    #[structopt(long, default_value = "none")]
    pub refcall: RefCallType,

    #[structopt(long, default_value = "2.0")]
    pub min_refcall_posterior: f64,

    #[structopt(long, default_value = "10.0")]
    pub refcall_block_merge_threshold: f64,

    #[structopt(long)]
    pub sites_only: bool,

    #[structopt(long)]
    pub model_based_haplotype_dedup: bool,

    #[structopt(long, default_value = "10.0")]
    pub min_phase_score: f64,

    #[structopt(long, default_value = "2")]
    pub min_supporting_reads: usize,

    #[structopt(long, default_value = "20")]
    pub min_base_quality: u8,

    #[structopt(long = "kmer-sizes", default_value = "10,15,20")]
    pub kmer_sizes: String,

    #[structopt(long, default_value = "6")]
    pub num_fallback_kmers: usize,

    #[structopt(long, default_value = "10")]
    pub fallback_kmer_gap: usize,

    #[structopt(long, default_value = "3")]
    pub assembler_mask_base_quality: u8,

    #[structopt(long, default_value = "2")]
    pub min_kmer_prune: usize,

    #[structopt(long, default_value = "30")]
    pub max_bubbles: usize,

    #[structopt(long, default_value = "2.0")]
    pub min_bubble_score: f64,

    #[structopt(long, default_value = "2000")]
    pub max_variant_size: usize,

    #[structopt(long)]
    pub disable_repeat_candidate_generator: bool,

    #[structopt(long)]
    pub disable_assembly_candidate_generator: bool,

    /// External VCFs of candidate variants.
    #[structopt(long = "source-candidates", parse(from_os_str))]
    pub source_candidates: Vec<PathBuf>,

    #[structopt(long)]
    pub min_source_candidate_quality: Option<f32>,

    #[structopt(long)]
    pub disable_read_filtering: bool,

    #[structopt(long, default_value = "20")]
    pub min_mapping_quality: u8,

    #[structopt(long, default_value = "20")]
    pub good_base_quality: u8,

    #[structopt(long, default_value = "20")]
    pub min_good_bases: usize,

    #[structopt(long)]
    pub allow_marked_duplicates: bool,

    #[structopt(long)]
    pub allow_secondary_alignments: bool,

    #[structopt(long)]
    pub allow_supplementary_alignments: bool,

    #[structopt(long)]
    pub allow_qc_fails: bool,

    #[structopt(long)]
    pub no_reads_with_unmapped_segments: bool,

    #[structopt(long)]
    pub disable_downsampling: bool,

    #[structopt(long, default_value = "1000")]
    pub downsample_above: u32,

    #[structopt(long, default_value = "500")]
    pub downsample_target: u32,

    /// Mask this many 3' bases.
    #[structopt(long)]
    pub mask_tails: Option<usize>,

    #[structopt(long)]
    pub mask_low_quality_tails: Option<u8>,

    #[structopt(long)]
    pub soft_clip_masking: bool,

    #[structopt(long)]
    pub soft_clip_mask_threshold: Option<u8>,

    #[structopt(long)]
    pub adapter_masking: bool,

    #[structopt(long)]
    pub mask_inverted_soft_clipping: bool,

    #[structopt(long, default_value = "1e-8")]
    pub denovo_snv_mutation_rate: f64,

    #[structopt(long, default_value = "1e-9")]
    pub denovo_indel_mutation_rate: f64,

    #[structopt(long, default_value = "3.0")]
    pub min_denovo_posterior: f64,

    #[structopt(long, default_value = "2")]
    pub max_somatic_haplotypes: usize,

    #[structopt(long, default_value = "1e-4")]
    pub somatic_snv_mutation_rate: f64,

    #[structopt(long, default_value = "1e-5")]
    pub somatic_indel_mutation_rate: f64,

    #[structopt(long, default_value = "0.03")]
    pub min_expected_somatic_frequency: f64,

    #[structopt(long, default_value = "0.01")]
    pub min_credible_somatic_frequency: f64,

    #[structopt(long, default_value = "0.9")]
    pub credible_mass: f64,

    #[structopt(long, default_value = "5.0")]
    pub tumour_germline_concentration: f64,

    #[structopt(long, default_value = "5")]
    pub max_vb_seeds: usize,

    #[structopt(long, default_value = "3")]
    pub max_clones: usize,

    #[structopt(long, default_value = "0.05")]
    pub min_clone_frequency: f64,

    #[structopt(long, default_value = "0.25")]
    pub min_cell_fraction: f64,

    #[structopt(long, default_value = "100.0")]
    pub dropout_concentration: f64,

    #[structopt(long, default_value = "as-in-reference-index")]
    pub contig_output_order: ContigOutputOrder,

    #[structopt(long, parse(from_os_str))]
    pub working_directory: Option<PathBuf>,

    /// Keep the temporary directory for post-mortem inspection.
    #[structopt(long)]
    pub keep_temp: bool,

    /// RNG seed for the stochastic model components.
    #[structopt(long, default_value = "42")]
    pub seed: u64,
}

/// Parse `contig`, `contig:pos` or `contig:begin-end`, shifting one-based
/// inputs to the internal zero-based half-open convention.
pub fn parse_region(
    expression: &str,
    one_based: bool,
    reference: &dyn reference::ReferenceProvider,
) -> Result<GenomicRegion, UserError> {
    let malformed = |why: &str| UserError::MalformedRegion {
        expression: expression.to_owned(),
        why: why.to_owned(),
    };
    let contig_length = |contig: &str| {
        reference
            .contigs()
            .into_iter()
            .find(|c| c.name == contig)
            .map(|c| c.length)
    };
    let (contig, range) = match expression.rfind(':') {
        Some(colon) => (&expression[..colon], Some(&expression[colon + 1..])),
        None => (expression, None),
    };
    let length = contig_length(contig).ok_or_else(|| UserError::UnmatchedReferenceContigs {
        contigs: vec![contig.to_owned()],
    })?;
    let shift = |value: Position| -> Position {
        if one_based && value > 0 {
            value - 1
        } else {
            value
        }
    };
    match range {
        None => Ok(GenomicRegion::new(contig, 0, length)),
        Some(range) => {
            let mut parts = range.splitn(2, '-');
            let begin: Position = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| malformed("missing begin"))?
                .replace(',', "")
                .parse()
                .map_err(|_| malformed("begin is not a number"))?;
            let begin = shift(begin);
            let end = match parts.next() {
                Some(end) => end
                    .replace(',', "")
                    .parse()
                    .map_err(|_| malformed("end is not a number"))?,
                // a bare position means a single base
                None => begin + 1,
            };
            if end < begin {
                return Err(malformed("end precedes begin"));
            }
            Ok(GenomicRegion::new(contig, begin, end.min(length)))
        }
    }
}

pub fn parse_contig_ploidy(expression: &str) -> Result<ContigPloidy, UserError> {
    let malformed = || UserError::MalformedContigPloidy {
        expression: expression.to_owned(),
    };
    let (scope, ploidy) = expression.split_once('=').ok_or_else(malformed)?;
    let ploidy: usize = ploidy.trim().parse().map_err(|_| malformed())?;
    match scope.split_once(':') {
        Some((sample, contig)) => Ok(ContigPloidy {
            sample: Some(sample.trim().to_owned()),
            contig: contig.trim().to_owned(),
            ploidy,
        }),
        None => Ok(ContigPloidy {
            sample: None,
            contig: scope.trim().to_owned(),
            ploidy,
        }),
    }
}

/// Resolve the caller flavor from the raw option plus the promotion rules.
pub fn resolve_caller(
    requested: CallerKind,
    samples: &[String],
    maternal: Option<&str>,
    paternal: Option<&str>,
    normal: Option<&str>,
    pedigree: Option<&Pedigree>,
) -> CallerKind {
    if let Some(pedigree) = pedigree {
        if pedigree.is_trio(samples) {
            if maternal.is_some() || paternal.is_some() {
                warn!(
                    "both a pedigree and explicit parent samples were given; using the pedigree"
                );
            }
            return CallerKind::Trio;
        }
    }
    if maternal.is_some() || paternal.is_some() {
        return CallerKind::Trio;
    }
    if normal.is_some() {
        return CallerKind::Cancer;
    }
    if requested == CallerKind::Population && samples.len() == 1 {
        return CallerKind::Individual;
    }
    requested
}

/// Read a PED file: FID IID PAT MAT SEX [PHENO].
pub fn read_pedigree(path: &Path) -> Result<Pedigree> {
    let content = fs::read_to_string(path)?;
    let mut pedigree = Pedigree::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let (name, father, mother, sex) = (fields[1], fields[2], fields[3], fields[4]);
        let sex = match sex {
            "1" => Sex::Male,
            "2" => Sex::Female,
            _ => Sex::Unknown,
        };
        if father == "0" || mother == "0" {
            pedigree.add_founder(name, sex);
        } else {
            pedigree.add_descendant(name, sex, mother, father);
        }
    }
    Ok(pedigree)
}

/// Resolve the entries of a paths file: relative paths try the file's
/// parent directory first, then the working directory.
pub fn read_paths_file(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut result = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = PathBuf::from(line);
        if entry.is_absolute() || entry.exists() {
            result.push(entry);
            continue;
        }
        let relative_to_parent = parent.join(&entry);
        if relative_to_parent.exists() {
            result.push(relative_to_parent);
        } else {
            return Err(UserError::UnresolvablePathEntry {
                path: entry,
                tried_against: parent.to_owned(),
            }
            .into());
        }
    }
    Ok(result)
}

/// Remove the skip regions from the search regions.
pub fn subtract_regions(
    regions: Vec<GenomicRegion>,
    skips: &[GenomicRegion],
) -> Vec<GenomicRegion> {
    let mut result = Vec::new();
    for region in regions {
        let mut remaining = vec![region];
        for skip in skips {
            let mut next = Vec::new();
            for piece in remaining {
                match piece.intersect(skip) {
                    None => next.push(piece),
                    Some(overlap) => {
                        if piece.begin() < overlap.begin() {
                            next.push(GenomicRegion::new(
                                piece.contig(),
                                piece.begin(),
                                overlap.begin(),
                            ));
                        }
                        if overlap.end() < piece.end() {
                            next.push(GenomicRegion::new(
                                piece.contig(),
                                overlap.end(),
                                piece.end(),
                            ));
                        }
                    }
                }
            }
            remaining = next;
        }
        result.extend(remaining);
    }
    result.retain(|r| !r.is_empty());
    result
}

/// Everything `run` collates before the pipeline starts.
pub struct CollatedInputs {
    pub registry: SampleRegistry,
    pub read_paths: Vec<PathBuf>,
    pub caller_kind: CallerKind,
    pub ploidies: PloidyMap,
    pub search_regions: Vec<GenomicRegion>,
    pub trio: Option<Trio>,
}

pub fn collate(
    options: &Options,
    reference: &dyn reference::ReferenceProvider,
) -> Result<CollatedInputs> {
    // read archives
    let mut read_paths = options.reads.clone();
    if let Some(reads_file) = &options.reads_file {
        read_paths.extend(read_paths_file(reads_file)?);
    }
    if read_paths.is_empty() {
        return Err(UserError::NoReadFiles.into());
    }
    if read_paths.len() > options.max_open_read_files {
        warn!(
            "{} read files exceed --max-open-read-files {}; expect file-handle pressure",
            read_paths.len(),
            options.max_open_read_files
        );
    }
    let mut registry = SampleRegistry::new();
    ReadManager::open(&read_paths, &mut registry)?;
    let mut sample_names: Vec<String> = registry.names().to_vec();
    if !options.samples.is_empty() {
        for requested in &options.samples {
            if registry.id_of(requested).is_none() {
                return Err(UserError::UnknownSample {
                    sample: requested.clone(),
                }
                .into());
            }
        }
        sample_names.retain(|name| options.samples.contains(name));
    }

    // ploidies
    let declarations: Vec<ContigPloidy> = options
        .contig_ploidies
        .iter()
        .map(|e| parse_contig_ploidy(e))
        .collect::<std::result::Result<_, _>>()?;
    let ploidies = PloidyMap::from_declarations(options.organism_ploidy, &declarations)?;

    // caller selection
    let pedigree = match &options.pedigree {
        Some(path) => Some(read_pedigree(path)?),
        None => None,
    };
    let caller_kind = resolve_caller(
        options.caller,
        &sample_names,
        options.maternal_sample.as_deref(),
        options.paternal_sample.as_deref(),
        options.normal_sample.as_deref(),
        pedigree.as_ref(),
    );
    let trio = match caller_kind {
        CallerKind::Trio => Some(match (&pedigree, &options.maternal_sample) {
            (Some(pedigree), _) if pedigree.is_trio(&sample_names) => pedigree
                .extract_trio(&sample_names)
                .expect("is_trio checked"),
            _ => {
                let maternal = options.maternal_sample.as_deref().unwrap_or_default();
                let paternal = options.paternal_sample.as_deref().unwrap_or_default();
                Trio::from_parent_options(&sample_names, maternal, paternal)?
            }
        }),
        _ => None,
    };
    if caller_kind == CallerKind::Polyclone && sample_names.len() != 1 {
        return Err(UserError::BadPolycloneSampleCount {
            num_samples: sample_names.len(),
        }
        .into());
    }
    if let Some(normal) = &options.normal_sample {
        if !sample_names.iter().any(|s| s == normal) {
            return Err(UserError::NormalSampleNotInSampleSet {
                sample: normal.clone(),
            }
            .into());
        }
    }

    // conflicting candidate sources
    if let Some(output) = &options.output {
        for source in &options.source_candidates {
            if source == output {
                return Err(UserError::ConflictingSourceVariantFile {
                    source_path: source.clone(),
                    output: output.clone(),
                }
                .into());
            }
        }
    }

    // search regions
    let mut search_regions = Vec::new();
    let mut region_expressions = options.regions.clone();
    if let Some(file) = &options.regions_file {
        let content = fs::read_to_string(file)?;
        let entries: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect();
        if entries.is_empty() {
            warn!("the regions file {:?} is empty; continuing with all contigs", file);
        }
        region_expressions.extend(entries);
    }
    if region_expressions.is_empty() {
        for contig in reference.contigs() {
            search_regions.push(GenomicRegion::new(contig.name, 0, contig.length));
        }
    } else {
        for expression in &region_expressions {
            search_regions.push(parse_region(
                expression,
                options.one_based_indexing,
                reference,
            )?);
        }
    }
    let mut skip_expressions = options.skip_regions.clone();
    if let Some(file) = &options.skip_regions_file {
        let content = fs::read_to_string(file)?;
        skip_expressions.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_owned),
        );
    }
    let skips: Vec<GenomicRegion> = skip_expressions
        .iter()
        .map(|e| parse_region(e, options.one_based_indexing, reference))
        .collect::<std::result::Result<_, _>>()?;
    let search_regions =
        consolidate_regions(subtract_regions(consolidate_regions(search_regions), &skips));

    Ok(CollatedInputs {
        registry,
        read_paths,
        caller_kind,
        ploidies,
        search_regions,
        trio,
    })
}

/// Builds fresh per-worker components from collated options.
pub struct PipelineFactory {
    options: Options,
    registry: SampleRegistry,
    read_paths: Vec<PathBuf>,
    caller_kind: CallerKind,
    ploidies: PloidyMap,
    trio: Option<Trio>,
    normal: Option<SampleId>,
}

impl PipelineFactory {
    fn model_params(&self) -> ModelParams {
        ModelParams {
            snv_heterozygosity: self.options.snp_heterozygosity,
            indel_heterozygosity: self.options.indel_heterozygosity,
            max_genotypes: self.options.max_genotypes,
            min_variant_posterior: self.options.min_variant_posterior,
            min_refcall_posterior: self.options.min_refcall_posterior,
            refcall_type: self.options.refcall,
            refcall_block_merge_threshold: self.options.refcall_block_merge_threshold,
            sites_only: self.options.sites_only,
            model_based_haplotype_dedup: self.options.model_based_haplotype_dedup,
            seed: self.options.seed,
        }
    }

    fn inclusion_predicate(&self) -> InclusionPredicate {
        let min_somatic_frequency = {
            let credible = self.options.min_credible_somatic_frequency;
            let expected = self.options.min_expected_somatic_frequency;
            if credible.min(expected) <= 1.0 {
                credible.max(expected)
            } else {
                credible.min(expected)
            }
        };
        match self.caller_kind {
            CallerKind::Cancer => InclusionPredicate::Somatic {
                min_support: self.options.min_supporting_reads,
                min_somatic_frequency,
                has_normal: self.normal.is_some(),
            },
            CallerKind::Polyclone => InclusionPredicate::Polyclone {
                min_support: self.options.min_supporting_reads,
                min_clone_frequency: self.options.min_clone_frequency,
            },
            CallerKind::Cell => InclusionPredicate::Cell {
                min_support: self.options.min_supporting_reads,
                min_cell_fraction: self.options.min_cell_fraction,
            },
            _ => InclusionPredicate::Germline {
                min_support: self.options.min_supporting_reads,
                max_expected_mutation_rate: if self.ploidies.default_ploidy() < 4 {
                    0.1
                } else {
                    0.05
                },
            },
        }
    }
}

impl ComponentFactory for PipelineFactory {
    fn read_pipe(&self) -> Result<ReadPipe> {
        let mut registry = self.registry.clone();
        let manager = ReadManager::open(&self.read_paths, &mut registry)?;

        let mut transformer = ReadTransformer::new();
        transformer.add(transformers::CapitaliseBases);
        transformer.add(transformers::CapBaseQualities(125));
        if let Some(length) = self.options.mask_tails {
            transformer.add(transformers::MaskTail(length));
        }
        if let Some(threshold) = self.options.mask_low_quality_tails {
            transformer.add(transformers::MaskLowQualityTail(threshold));
        }
        if self.options.soft_clip_masking {
            transformer.add(transformers::MaskSoftClipped {
                threshold: self.options.soft_clip_mask_threshold,
            });
        }
        if self.options.adapter_masking {
            transformer.add(transformers::MaskAdapters);
        }
        if self.options.mask_inverted_soft_clipping {
            transformer.add(transformers::MaskInvertedSoftClippedEnds {
                min_clip_length: 10,
            });
        }

        let mut filterer = ReadFilterer::new();
        if !self.options.disable_read_filtering {
            filterer.add(filters::HasSufficientMappingQuality(
                self.options.min_mapping_quality,
            ));
            filterer.add(filters::HasSufficientGoodBases {
                good_base_quality: self.options.good_base_quality,
                min_good_bases: self.options.min_good_bases,
            });
            if !self.options.allow_marked_duplicates {
                filterer.add(filters::IsNotDuplicate);
            }
            if !self.options.allow_secondary_alignments {
                filterer.add(filters::IsNotSecondary);
            }
            if !self.options.allow_supplementary_alignments {
                filterer.add(filters::IsNotSupplementary);
            }
            if !self.options.allow_qc_fails {
                filterer.add(filters::IsNotMarkedQcFail);
            }
            if self.options.no_reads_with_unmapped_segments {
                filterer.add(filters::HasMappedMate);
            }
        }

        let downsampler = if self.options.disable_downsampling
            || self.options.disable_read_filtering
        {
            None
        } else {
            Some(Downsampler::new(
                self.options.downsample_above,
                self.options.downsample_target,
            ))
        };
        Ok(ReadPipe::new(
            Box::new(manager),
            transformer,
            filterer,
            downsampler,
        ))
    }

    fn candidate_generator(&self) -> CandidateGenerator {
        let mut builder = CandidateGeneratorBuilder::new()
            .max_variant_size(self.options.max_variant_size)
            .cigar_scanner(CigarScannerOptions {
                min_base_quality: self.options.min_base_quality,
                include: self.inclusion_predicate(),
                misalignment: MisalignmentParameters {
                    // heterozygosity plus two standard deviations
                    max_expected_mutation_rate: (self.options.snp_heterozygosity
                        + self.options.indel_heterozygosity
                        + 0.02)
                        .min(0.9999),
                    snv_threshold: self.options.min_base_quality,
                    indel_penalty: if self.options.disable_assembly_candidate_generator {
                        1.0
                    } else {
                        1.5
                    },
                    clip_penalty: if self.options.disable_assembly_candidate_generator {
                        1.0
                    } else {
                        2.0
                    },
                    min_ln_prob_correctly_aligned: (0.005f64).ln(),
                },
                normal_sample: self.normal,
            });
        if !self.options.disable_repeat_candidate_generator {
            builder = builder.repeat_scanner(RepeatScannerOptions::default());
        }
        if !self.options.disable_assembly_candidate_generator {
            builder = builder.local_reassembler(ReassemblerOptions {
                kmer_sizes: self
                    .options
                    .kmer_sizes
                    .split(',')
                    .filter_map(|k| k.trim().parse().ok())
                    .collect(),
                num_fallbacks: self.options.num_fallback_kmers,
                fallback_interval_size: self.options.fallback_kmer_gap,
                mask_threshold: self.options.assembler_mask_base_quality,
                min_kmer_observations: self.options.min_kmer_prune,
                max_bubbles: self.options.max_bubbles,
                min_bubble_score: self.options.min_bubble_score,
                max_variant_size: self.options.max_variant_size,
                ..Default::default()
            });
        }
        for source in &self.options.source_candidates {
            builder = builder.vcf_source(
                source.clone(),
                VcfExtractorOptions {
                    min_source_quality: self.options.min_source_candidate_quality,
                    max_variant_size: Some(self.options.max_variant_size),
                },
            );
        }
        builder.build()
    }

    fn likelihood_model(&self) -> HaplotypeLikelihoodModel {
        let error_model = ErrorModel::from_name_or_path(&self.options.error_model)
            .unwrap_or_else(|_| {
                warn!(
                    "could not resolve error model {:?}; using the PCR profile",
                    self.options.error_model
                );
                ErrorModel::from_name_or_path("PCR").expect("built-in profile resolves")
            });
        HaplotypeLikelihoodModel::new(
            error_model,
            LikelihoodModelConfig {
                use_mapping_quality: !self.options.disable_mapping_quality_integration,
                use_flank_state: !self.options.very_fast,
                pad_requirement: 8,
            },
        )
    }

    fn caller(&self, contig: &str) -> Result<Caller> {
        let params = self.model_params();
        // ploidy of the contig at hand; sample-specific overrides only
        // affect validation
        let ploidy = self.ploidies.of("", contig);
        let caller = match self.caller_kind {
            CallerKind::Individual => {
                Caller::Individual(IndividualCaller::new(ploidy, params))
            }
            CallerKind::Population => {
                Caller::Population(IndividualCaller::new(ploidy, params))
            }
            CallerKind::Trio => {
                let trio = self.trio.as_ref().expect("trio collated for trio caller");
                Caller::Trio(TrioCaller {
                    mother: self.registry.id_of(&trio.mother).expect("registered"),
                    father: self.registry.id_of(&trio.father).expect("registered"),
                    child: self.registry.id_of(&trio.child).expect("registered"),
                    ploidy,
                    denovo_snv_mutation_rate: self.options.denovo_snv_mutation_rate,
                    denovo_indel_mutation_rate: self.options.denovo_indel_mutation_rate,
                    min_denovo_posterior: self.options.min_denovo_posterior,
                    params,
                })
            }
            CallerKind::Cancer => Caller::Cancer(
                CancerCallerBuilder::default()
                    .normal(self.normal)
                    .ploidy(ploidy)
                    .max_somatic_haplotypes(self.options.max_somatic_haplotypes)
                    .somatic_snv_mutation_rate(self.options.somatic_snv_mutation_rate)
                    .somatic_indel_mutation_rate(self.options.somatic_indel_mutation_rate)
                    .min_expected_somatic_frequency(
                        self.options.min_expected_somatic_frequency,
                    )
                    .min_credible_somatic_frequency(
                        self.options.min_credible_somatic_frequency,
                    )
                    .credible_mass(self.options.credible_mass)
                    .tumour_germline_concentration(
                        self.options.tumour_germline_concentration,
                    )
                    .max_vb_seeds(self.options.max_vb_seeds)
                    .params(params)
                    .build()?,
            ),
            CallerKind::Polyclone => Caller::Polyclone(PolycloneCaller {
                max_clones: self.options.max_clones,
                min_clone_frequency: self.options.min_clone_frequency,
                clone_concentration: 1.0,
                max_vb_seeds: self.options.max_vb_seeds,
                params,
            }),
            CallerKind::Cell => Caller::Cell(CellCaller {
                ploidy,
                min_cell_fraction: self.options.min_cell_fraction,
                dropout_concentration: self.options.dropout_concentration,
                max_vb_seeds: self.options.max_vb_seeds,
                params,
            }),
        };
        Ok(caller)
    }

    fn haplotype_config(&self) -> HaplotypeGeneratorConfig {
        HaplotypeGeneratorConfig {
            max_haplotypes: self.options.max_haplotypes,
            haplotype_holdout_threshold: self.options.haplotype_holdout_threshold,
            max_holdout_depth: self.options.max_holdout_depth,
            lagging: if self.options.fast || self.options.very_fast {
                LaggingPolicy::None
            } else {
                self.options.lagging_level
            },
            extension: self.options.extension_level,
            pad_requirement: 8,
        }
    }

    fn phaser_config(&self) -> PhaserConfig {
        PhaserConfig {
            min_phase_score: self.options.min_phase_score,
        }
    }
}

/// Run the whole pipeline from parsed options.
pub fn run(options: Options) -> Result<()> {
    let cache_footprint = parse_memory_footprint(&options.max_reference_cache_footprint)
        .unwrap_or(500_000_000);
    let reference: Arc<dyn reference::ReferenceProvider> = Arc::new(
        reference::Buffer::from_path(&options.reference, cache_footprint)?,
    );

    let collated = collate(&options, reference.as_ref())?;
    let working_directory = options
        .working_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    if !working_directory.is_dir() {
        return Err(UserError::InvalidWorkingDirectory {
            path: working_directory,
        }
        .into());
    }
    let mut temp_dir = ScopedTempDir::new(&working_directory, "octopus-temp")?;
    if options.keep_temp {
        temp_dir.keep();
    }

    let scheduler = Scheduler::new(SchedulerConfig {
        threads: options.threads,
        read_buffer_footprint: parse_memory_footprint(&options.target_read_buffer_footprint)
            .unwrap_or(6_000_000_000),
        target_working_memory: parse_memory_footprint(&options.target_working_memory)
            .unwrap_or(16_000_000_000),
        contig_output_order: options.contig_output_order,
    });

    let normal = options
        .normal_sample
        .as_ref()
        .and_then(|name| collated.registry.id_of(name));
    let factory = PipelineFactory {
        ploidies: collated.ploidies.clone(),
        options: options.clone(),
        registry: collated.registry.clone(),
        read_paths: collated.read_paths.clone(),
        caller_kind: collated.caller_kind,
        trio: collated.trio.clone(),
        normal,
    };

    let mut writer = VcfWriter::new(
        options.output.as_deref(),
        Arc::clone(&reference),
        collated.registry.names(),
        options.sites_only,
    )?;
    let mut unfiltered_writer = match (&options.output, options.keep_unfiltered_calls) {
        (Some(output), true) => Some(VcfWriter::new(
            Some(&sibling_path(output, "unfiltered")),
            Arc::clone(&reference),
            collated.registry.names(),
            options.sites_only,
        )?),
        _ => None,
    };
    let mut legacy_writer = match (&options.output, options.legacy) {
        (Some(output), true) => Some(VcfWriter::new(
            Some(&sibling_path(output, "legacy")),
            Arc::clone(&reference),
            collated.registry.names(),
            options.sites_only,
        )?),
        _ => None,
    };

    let progress = Arc::new(ProgressMeter::new(&collated.search_regions));
    let cancel = Arc::new(AtomicBool::new(false));
    scheduler.run(
        Arc::clone(&reference),
        &factory,
        &collated.search_regions,
        cancel,
        progress,
        |contig_calls| {
            for call in &contig_calls.variants {
                writer.write_variant(call)?;
                if let Some(w) = unfiltered_writer.as_mut() {
                    w.write_variant(call)?;
                }
                if let Some(w) = legacy_writer.as_mut() {
                    w.write_variant(call)?;
                }
            }
            for call in &contig_calls.refcalls {
                writer.write_refcall(call)?;
                if let Some(w) = unfiltered_writer.as_mut() {
                    w.write_refcall(call)?;
                }
            }
            Ok(())
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::InMemoryReference;

    fn reference() -> InMemoryReference {
        InMemoryReference::new().with_contig("chr1", vec![b'A'; 1000])
    }

    #[test]
    fn one_based_regions_shift_to_zero_based() {
        let reference = reference();
        let region = parse_region("chr1:100-200", true, &reference).unwrap();
        assert_eq!(region, GenomicRegion::new("chr1", 99, 200));
        let zero_based = parse_region("chr1:100-200", false, &reference).unwrap();
        assert_eq!(zero_based, GenomicRegion::new("chr1", 100, 200));
    }

    #[test]
    fn bare_contig_covers_everything() {
        let reference = reference();
        let region = parse_region("chr1", false, &reference).unwrap();
        assert_eq!(region, GenomicRegion::new("chr1", 0, 1000));
    }

    #[test]
    fn unknown_contig_is_a_user_error() {
        let reference = reference();
        assert!(matches!(
            parse_region("chrX:1-10", false, &reference),
            Err(UserError::UnmatchedReferenceContigs { .. })
        ));
    }

    #[test]
    fn contig_ploidy_expressions() {
        let parsed = parse_contig_ploidy("X=1").unwrap();
        assert_eq!(parsed.sample, None);
        assert_eq!(parsed.contig, "X");
        assert_eq!(parsed.ploidy, 1);
        let parsed = parse_contig_ploidy("tumour:Y=1").unwrap();
        assert_eq!(parsed.sample.as_deref(), Some("tumour"));
        assert!(parse_contig_ploidy("nonsense").is_err());
    }

    #[test]
    fn caller_promotion_rules() {
        let samples = |n: usize| -> Vec<String> {
            (0..n).map(|i| format!("s{}", i)).collect()
        };
        assert_eq!(
            resolve_caller(CallerKind::Population, &samples(1), None, None, None, None),
            CallerKind::Individual
        );
        assert_eq!(
            resolve_caller(CallerKind::Population, &samples(3), None, None, None, None),
            CallerKind::Population
        );
        assert_eq!(
            resolve_caller(
                CallerKind::Population,
                &samples(3),
                Some("s0"),
                Some("s1"),
                None,
                None
            ),
            CallerKind::Trio
        );
        assert_eq!(
            resolve_caller(CallerKind::Population, &samples(2), None, None, Some("s0"), None),
            CallerKind::Cancer
        );
    }

    #[test]
    fn pedigree_wins_over_explicit_parents() {
        let mut pedigree = Pedigree::new();
        pedigree.add_founder("mum", Sex::Female);
        pedigree.add_founder("dad", Sex::Male);
        pedigree.add_descendant("kid", Sex::Unknown, "mum", "dad");
        let samples = vec!["mum".to_owned(), "dad".to_owned(), "kid".to_owned()];
        assert_eq!(
            resolve_caller(
                CallerKind::Population,
                &samples,
                Some("kid"),
                Some("dad"),
                None,
                Some(&pedigree)
            ),
            CallerKind::Trio
        );
    }

    #[test]
    fn skip_regions_are_subtracted() {
        let regions = vec![GenomicRegion::new("chr1", 0, 100)];
        let skips = vec![GenomicRegion::new("chr1", 20, 30)];
        let result = subtract_regions(regions, &skips);
        assert_eq!(
            result,
            vec![
                GenomicRegion::new("chr1", 0, 20),
                GenomicRegion::new("chr1", 30, 100),
            ]
        );
    }
}
