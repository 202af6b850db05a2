use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use crossbeam::channel::unbounded;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::basics::region::GenomicRegion;
use crate::candidates::{CandidateGenerator, GenerationContext};
use crate::genotype::{CallInput, Caller, CallerModel};
use crate::haplotypes::{HaplotypeGenerator, HaplotypeGeneratorConfig};
use crate::likelihood::HaplotypeLikelihoodModel;
use crate::readpipe::ReadPipe;
use crate::reference::ReferenceProvider;
use crate::utils::worker_pool::{worker_pool, Orderable};

use super::phaser::{Phaser, PhaserConfig};
use super::progress::ProgressMeter;
use super::{RefCall, VariantCall};

/// Order in which per-contig results are committed to the writer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ContigOutputOrder {
    LexicographicalAscending,
    LexicographicalDescending,
    AsInReferenceIndex,
    AsInReferenceIndexReversed,
    SizeAscending,
    SizeDescending,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 0 means all cores, 1 means sequential.
    pub threads: usize,
    /// Total bytes of reads retained across threads.
    pub read_buffer_footprint: usize,
    pub target_working_memory: usize,
    pub contig_output_order: ContigOutputOrder,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            threads: 1,
            read_buffer_footprint: 6_000_000_000,
            target_working_memory: 16_000_000_000,
            contig_output_order: ContigOutputOrder::AsInReferenceIndex,
        }
    }
}

/// Per-thread working memory never drops below this.
const MIN_WORKING_MEMORY_PER_THREAD: usize = 100_000_000;
/// Reference slack fetched around each batch so haplotype flanks resolve.
const BATCH_REFERENCE_PAD: u64 = 1_000;

/// Builds the per-worker pipeline components. Each worker owns its own set,
/// so only the reference cache, progress meter and output queue are shared.
pub trait ComponentFactory: Sync {
    fn read_pipe(&self) -> Result<ReadPipe>;
    fn candidate_generator(&self) -> CandidateGenerator;
    fn likelihood_model(&self) -> HaplotypeLikelihoodModel;
    fn caller(&self, contig: &str) -> Result<Caller>;
    fn haplotype_config(&self) -> HaplotypeGeneratorConfig;
    fn phaser_config(&self) -> PhaserConfig;
}

/// One contig's completed calls, tagged with its output position.
pub struct ContigCalls {
    pub order_index: usize,
    pub contig: String,
    pub variants: Vec<VariantCall>,
    pub refcalls: Vec<RefCall>,
}

impl Orderable for ContigCalls {
    fn index(&self) -> usize {
        self.order_index
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler { config }
    }

    fn num_threads(&self) -> usize {
        match self.config.threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Base pairs per read batch, derived from the read-buffer budget.
    fn batch_span(&self) -> u64 {
        let per_thread = self.config.read_buffer_footprint / self.num_threads().max(1);
        // a deeply covered human-like window holds ~100 bytes of reads per bp
        ((per_thread / 100) as u64).clamp(10_000, 5_000_000)
    }

    fn working_memory_per_thread(&self) -> usize {
        (self.config.target_working_memory / self.num_threads().max(1))
            .max(MIN_WORKING_MEMORY_PER_THREAD)
    }

    /// Order contigs for output and group the search regions per contig.
    fn plan(
        &self,
        reference: &dyn ReferenceProvider,
        search_regions: &[GenomicRegion],
    ) -> Vec<(String, Vec<GenomicRegion>)> {
        let mut by_contig: BTreeMap<String, Vec<GenomicRegion>> = BTreeMap::new();
        for region in search_regions {
            by_contig
                .entry(region.contig().to_owned())
                .or_default()
                .push(region.clone());
        }
        for regions in by_contig.values_mut() {
            regions.sort();
        }
        let index_of: BTreeMap<String, usize> = reference
            .contigs()
            .into_iter()
            .enumerate()
            .map(|(i, contig)| (contig.name, i))
            .collect();
        let size_of = |regions: &[GenomicRegion]| -> u64 {
            regions.iter().map(|r| r.size()).sum()
        };
        let mut contigs: Vec<(String, Vec<GenomicRegion>)> = by_contig.into_iter().collect();
        match self.config.contig_output_order {
            ContigOutputOrder::LexicographicalAscending => {
                contigs.sort_by(|a, b| a.0.cmp(&b.0))
            }
            ContigOutputOrder::LexicographicalDescending => {
                contigs.sort_by(|a, b| b.0.cmp(&a.0))
            }
            ContigOutputOrder::AsInReferenceIndex => {
                contigs.sort_by_key(|(name, _)| index_of.get(name).copied().unwrap_or(usize::MAX))
            }
            ContigOutputOrder::AsInReferenceIndexReversed => {
                contigs.sort_by_key(|(name, _)| {
                    std::cmp::Reverse(index_of.get(name).copied().unwrap_or(0))
                })
            }
            ContigOutputOrder::SizeAscending => {
                contigs.sort_by_key(|(_, regions)| size_of(regions))
            }
            ContigOutputOrder::SizeDescending => {
                contigs.sort_by_key(|(_, regions)| std::cmp::Reverse(size_of(regions)))
            }
        }
        contigs
    }

    /// Run the full pipeline: contigs fan out over worker threads, results
    /// commit to `sink` in the configured contig order.
    pub fn run<F, S>(
        &self,
        reference: Arc<dyn ReferenceProvider>,
        factory: &F,
        search_regions: &[GenomicRegion],
        cancel: Arc<AtomicBool>,
        progress: Arc<ProgressMeter>,
        mut sink: S,
    ) -> Result<()>
    where
        F: ComponentFactory,
        S: FnMut(ContigCalls) -> Result<()> + Send,
    {
        let plan = self.plan(reference.as_ref(), search_regions);
        if plan.is_empty() {
            return Ok(());
        }
        let threads = self.num_threads().min(plan.len());
        debug!(
            "scheduling {} contigs over {} threads ({} bp batches, {} MB working memory each)",
            plan.len(),
            threads,
            self.batch_span(),
            self.working_memory_per_thread() / 1_000_000
        );
        progress.start();

        let (sender, receiver) = unbounded();
        for (order_index, (contig, regions)) in plan.into_iter().enumerate() {
            sender.send((order_index, contig, regions))?;
        }
        drop(sender);

        let batch_span = self.batch_span();
        let reference = &reference;
        let progress = &progress;
        let cancel = &cancel;
        worker_pool(
            threads,
            threads * 2,
            receiver,
            move |(order_index, contig, regions): (usize, String, Vec<GenomicRegion>)| {
                process_contig(
                    order_index,
                    &contig,
                    &regions,
                    batch_span,
                    reference.as_ref(),
                    factory,
                    cancel.as_ref(),
                    progress.as_ref(),
                )
            },
            |calls| sink(calls),
        )?;
        progress.done();
        Ok(())
    }
}

/// Sequential window loop over one contig; phase-set continuity is kept by
/// the contig-local phaser.
#[allow(clippy::too_many_arguments)]
fn process_contig(
    order_index: usize,
    contig: &str,
    regions: &[GenomicRegion],
    batch_span: u64,
    reference: &dyn ReferenceProvider,
    factory: &dyn ComponentFactory,
    cancel: &AtomicBool,
    progress: &ProgressMeter,
) -> Result<ContigCalls> {
    let mut pipe = factory.read_pipe()?;
    let mut generator = factory.candidate_generator();
    let mut likelihood_model = factory.likelihood_model();
    let mut caller = factory.caller(contig)?;
    let mut phaser = Phaser::new(factory.phaser_config());
    let haplotype_config = factory.haplotype_config();

    let mut variants = Vec::new();
    let mut refcalls = Vec::new();
    let mut cancelled = false;

    'regions: for region in regions {
        let mut begin = region.begin();
        while begin < region.end() {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break 'regions;
            }
            let end = (begin + batch_span).min(region.end());
            let window = GenomicRegion::new(contig, begin, end);
            let slice = reference.slice(&window.expanded(BATCH_REFERENCE_PAD))?;
            let reads = pipe.fetch_reads(&window)?;

            let candidates = generator.generate(&GenerationContext {
                reference: &slice,
                reads: &reads,
                region: &window,
            })?;
            let mut haplotype_generator =
                HaplotypeGenerator::new(candidates, haplotype_config.clone());
            let mut block_seen = false;
            while let Some(block) = haplotype_generator.next_block(&slice)? {
                block_seen = true;
                let likelihoods = likelihood_model.compute(&block, &reads, &slice);
                let calls = caller.emit_calls(&CallInput {
                    block: &block,
                    likelihoods: &likelihoods,
                    reference: &slice,
                })?;
                let (ready_variants, ready_refcalls) = phaser.add_block(calls);
                variants.extend(ready_variants);
                refcalls.extend(ready_refcalls);
                if cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }
            if !block_seen {
                // no candidates: the whole window may still emit refcalls;
                // a trivial likelihood matrix avoids a pointless HMM sweep
                let block = crate::haplotypes::HaplotypeBlock {
                    region: window.clone(),
                    haplotypes: vec![crate::basics::haplotype::Haplotype::reference(
                        window.clone(),
                    )],
                    variants: vec![],
                    indicators: vec![],
                };
                let likelihoods: crate::likelihood::LikelihoodMatrix = reads
                    .iter()
                    .map(|(&sample, sample_reads)| {
                        (
                            sample,
                            crate::likelihood::SampleLikelihoods {
                                reads: sample_reads.clone(),
                                matrix: sample_reads
                                    .iter()
                                    .map(|_| vec![bio::stats::LogProb::ln_one()])
                                    .collect(),
                                ambiguous: vec![false; sample_reads.len()],
                            },
                        )
                    })
                    .collect();
                let calls = caller.emit_calls(&CallInput {
                    block: &block,
                    likelihoods: &likelihoods,
                    reference: &slice,
                })?;
                let (ready_variants, ready_refcalls) = phaser.add_block(calls);
                variants.extend(ready_variants);
                refcalls.extend(ready_refcalls);
            }
            progress.notify_completed(&window);
            begin = end;
        }
    }

    // mid-window cancellation still flushes the open phase set
    let (rest_variants, rest_refcalls) = phaser.finish();
    variants.extend(rest_variants);
    refcalls.extend(rest_refcalls);
    if cancelled {
        info!("cancelled while processing {}; flushed open phase sets", contig);
    }

    variants.sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
    variants.dedup_by(|a, b| a.variant == b.variant);
    refcalls.sort_by(|a, b| a.region.cmp(&b.region));
    Ok(ContigCalls {
        order_index,
        contig: contig.to_owned(),
        variants,
        refcalls,
    })
}

/// Merge overlapping or adjacent search regions per contig.
pub fn consolidate_regions(mut regions: Vec<GenomicRegion>) -> Vec<GenomicRegion> {
    regions.sort();
    regions
        .into_iter()
        .coalesce(|a, b| {
            if a.same_contig(&b) && b.begin() <= a.end() {
                Ok(a.encompass(&b))
            } else {
                Err((a, b))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::InMemoryReference;

    #[test]
    fn consolidation_merges_overlaps() {
        let regions = vec![
            GenomicRegion::new("a", 0, 10),
            GenomicRegion::new("a", 5, 20),
            GenomicRegion::new("a", 30, 40),
            GenomicRegion::new("b", 0, 5),
        ];
        let merged = consolidate_regions(regions);
        assert_eq!(
            merged,
            vec![
                GenomicRegion::new("a", 0, 20),
                GenomicRegion::new("a", 30, 40),
                GenomicRegion::new("b", 0, 5),
            ]
        );
    }

    #[test]
    fn contig_plan_honours_output_order() {
        let reference = InMemoryReference::new()
            .with_contig("chr2", vec![b'A'; 100])
            .with_contig("chr10", vec![b'A'; 50]);
        let regions = vec![
            GenomicRegion::new("chr10", 0, 50),
            GenomicRegion::new("chr2", 0, 100),
        ];
        let lexicographic = Scheduler::new(SchedulerConfig {
            contig_output_order: ContigOutputOrder::LexicographicalAscending,
            ..Default::default()
        });
        let plan = lexicographic.plan(&reference, &regions);
        assert_eq!(plan[0].0, "chr10");

        let by_index = Scheduler::new(SchedulerConfig {
            contig_output_order: ContigOutputOrder::AsInReferenceIndex,
            ..Default::default()
        });
        let plan = by_index.plan(&reference, &regions);
        assert_eq!(plan[0].0, "chr2");

        let by_size = Scheduler::new(SchedulerConfig {
            contig_output_order: ContigOutputOrder::SizeDescending,
            ..Default::default()
        });
        let plan = by_size.plan(&reference, &regions);
        assert_eq!(plan[0].0, "chr2");
    }
}
