//! Synthetic-data builders and a ready-made pipeline harness for the
//! end-to-end scenarios.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use octopus::basics::read::{AlignedRead, Cigar, CigarOp, ReadFlags};
use octopus::basics::region::GenomicRegion;
use octopus::basics::SampleId;
use octopus::calling::phaser::PhaserConfig;
use octopus::calling::progress::ProgressMeter;
use octopus::calling::scheduler::{
    ComponentFactory, Scheduler, SchedulerConfig,
};
use octopus::calling::{RefCall, VariantCall};
use octopus::candidates::{
    CandidateGenerator, CandidateGeneratorBuilder, CigarScannerOptions,
};
use octopus::genotype::Caller;
use octopus::haplotypes::HaplotypeGeneratorConfig;
use octopus::likelihood::{ErrorModel, HaplotypeLikelihoodModel, LikelihoodModelConfig};
use octopus::readpipe::{InMemoryReads, ReadFilterer, ReadPipe, ReadTransformer};
use octopus::reference::InMemoryReference;

pub fn read_with(
    contig: &str,
    begin: u64,
    sequence: &[u8],
    cigar: Vec<CigarOp>,
    quality: u8,
    mapping_quality: u8,
) -> AlignedRead {
    let cigar = Cigar(cigar);
    AlignedRead {
        name: format!("r{}", begin),
        region: GenomicRegion::new(contig, begin, begin + u64::from(cigar.reference_len())),
        sequence: sequence.to_vec(),
        base_qualities: vec![quality; sequence.len()],
        cigar,
        mapping_quality,
        flags: ReadFlags::default(),
        mate: None,
    }
}

pub fn simple_read(contig: &str, begin: u64, sequence: &[u8]) -> AlignedRead {
    read_with(
        contig,
        begin,
        sequence,
        vec![CigarOp::Match(sequence.len() as u32)],
        30,
        60,
    )
}

/// A fixed-component factory driving the scheduler over in-memory reads.
pub struct TestFactory {
    pub reads: InMemoryReads,
    pub scanner: CigarScannerOptions,
    pub haplotype_config: HaplotypeGeneratorConfig,
    pub make_caller: Box<dyn Fn() -> Caller + Send + Sync>,
}

impl TestFactory {
    pub fn new(
        reads: InMemoryReads,
        make_caller: Box<dyn Fn() -> Caller + Send + Sync>,
    ) -> Self {
        TestFactory {
            reads,
            scanner: CigarScannerOptions::default(),
            haplotype_config: HaplotypeGeneratorConfig::default(),
            make_caller,
        }
    }
}

impl ComponentFactory for TestFactory {
    fn read_pipe(&self) -> Result<ReadPipe> {
        Ok(ReadPipe::new(
            Box::new(self.reads.clone()),
            ReadTransformer::new(),
            ReadFilterer::new(),
            None,
        ))
    }

    fn candidate_generator(&self) -> CandidateGenerator {
        CandidateGeneratorBuilder::new()
            .cigar_scanner(self.scanner.clone())
            .build()
    }

    fn likelihood_model(&self) -> HaplotypeLikelihoodModel {
        HaplotypeLikelihoodModel::new(
            ErrorModel::from_name_or_path("PCR").unwrap(),
            LikelihoodModelConfig::default(),
        )
    }

    fn caller(&self, _contig: &str) -> Result<Caller> {
        Ok((self.make_caller)())
    }

    fn haplotype_config(&self) -> HaplotypeGeneratorConfig {
        self.haplotype_config.clone()
    }

    fn phaser_config(&self) -> PhaserConfig {
        PhaserConfig::default()
    }
}

/// Run the pipeline single-threaded over the whole reference and collect the
/// emitted calls.
pub fn run_pipeline(
    reference: InMemoryReference,
    factory: &TestFactory,
    regions: Vec<GenomicRegion>,
) -> (Vec<VariantCall>, Vec<RefCall>) {
    let scheduler = Scheduler::new(SchedulerConfig {
        threads: 1,
        ..Default::default()
    });
    let progress = Arc::new(ProgressMeter::new(&regions));
    let mut variants = Vec::new();
    let mut refcalls = Vec::new();
    scheduler
        .run(
            Arc::new(reference),
            factory,
            &regions,
            Arc::new(AtomicBool::new(false)),
            progress,
            |calls| {
                variants.extend(calls.variants);
                refcalls.extend(calls.refcalls);
                Ok(())
            },
        )
        .unwrap();
    (variants, refcalls)
}

/// Reads grouped into one in-memory source.
pub fn read_source(groups: Vec<(SampleId, Vec<AlignedRead>)>) -> InMemoryReads {
    let mut source = InMemoryReads::new();
    for (sample, reads) in groups {
        source.insert(sample, reads);
    }
    source
}
