//! Cross-cutting pipeline properties.

mod common;

use common::{read_source, run_pipeline, simple_read, TestFactory};

use std::sync::Arc;

use octopus::basics::haplotype::Haplotype;
use octopus::basics::region::GenomicRegion;
use octopus::basics::variant::Variant;
use octopus::calling::output::{CallSink, VcfWriter};
use octopus::calling::{SampleCall, VariantCall};
use octopus::genotype::{Caller, IndividualCaller, ModelParams};
use octopus::haplotypes::{HaplotypeGenerator, HaplotypeGeneratorConfig};
use octopus::reference::{InMemoryReference, ReferenceProvider, Slice};

/// Property 1: haplotypes tile their active region exactly.
#[test]
fn emitted_haplotypes_tile_the_active_region() {
    let bytes: Vec<u8> = b"ACGT".iter().cycle().take(200).copied().collect();
    let reference = Slice::new("c", 0, bytes.clone());
    let candidates = vec![
        Variant::snv("c", 50, bytes[50], b'T'),
        Variant::deletion("c", 60, bytes[60..62].to_vec()),
        Variant::insertion("c", 70, b"GG".to_vec()),
    ];
    let mut generator =
        HaplotypeGenerator::new(candidates, HaplotypeGeneratorConfig::default());
    let mut blocks = 0;
    while let Some(block) = generator.next_block(&reference).unwrap() {
        blocks += 1;
        for haplotype in &block.haplotypes {
            let sequence = haplotype.sequence(&reference);
            // manual substitution over the region
            let mut expected = Vec::new();
            let mut cursor = block.region.begin();
            for allele in haplotype.explicit_alleles() {
                expected.extend_from_slice(
                    &bytes[cursor as usize..allele.region().begin() as usize],
                );
                expected.extend_from_slice(allele.sequence());
                cursor = allele.region().end();
            }
            expected.extend_from_slice(&bytes[cursor as usize..block.region.end() as usize]);
            assert_eq!(*sequence, expected, "haplotype does not tile its region");
        }
        assert!(block.haplotypes.iter().any(Haplotype::is_reference));
    }
    assert!(blocks > 0);
}

/// Property 5: identical inputs and seeds give identical calls.
#[test]
fn calling_is_deterministic() {
    let run_once = || {
        let reference = InMemoryReference::new().with_contig("c", vec![b'A'; 60]);
        let mut reads = Vec::new();
        for i in 0..14 {
            if i % 2 == 0 {
                reads.push(simple_read("c", 10 + (i % 3), b"AAAAATAAAAGG"));
            } else {
                reads.push(simple_read("c", 10 + (i % 3), b"AAAAAAAAAAGG"));
            }
        }
        let factory = TestFactory::new(
            read_source(vec![(0, reads)]),
            Box::new(|| {
                Caller::Individual(IndividualCaller::new(2, ModelParams::default()))
            }),
        );
        run_pipeline(reference, &factory, vec![GenomicRegion::new("c", 0, 60)])
    };
    let (first_variants, first_refcalls) = run_once();
    let (second_variants, second_refcalls) = run_once();
    assert_eq!(first_variants, second_variants);
    assert_eq!(first_refcalls, second_refcalls);
}

/// Property 6: every call carries a phase set containing it.
#[test]
fn phase_sets_contain_their_calls() {
    let reference = InMemoryReference::new().with_contig("c", vec![b'A'; 80]);
    let reads = (0..20)
        .map(|i| {
            if i % 2 == 0 {
                simple_read("c", 15, b"AAAAATAAATAAAA")
            } else {
                simple_read("c", 15, b"AAAAAAAAAAAAAA")
            }
        })
        .collect();
    let factory = TestFactory::new(
        read_source(vec![(0, reads)]),
        Box::new(|| Caller::Individual(IndividualCaller::new(2, ModelParams::default()))),
    );
    let (variants, _) = run_pipeline(
        reference,
        &factory,
        vec![GenomicRegion::new("c", 0, 80)],
    );
    assert!(!variants.is_empty());
    for call in &variants {
        let phase_set = call.phase_set.expect("all calls are phased");
        assert!(phase_set <= call.variant.region().begin());
    }
    // the two cis SNVs share one set
    if variants.len() == 2 {
        assert_eq!(variants[0].phase_set, variants[1].phase_set);
    }
}

/// Property 7: internal coordinates are zero-based, VCF output is one-based.
#[test]
fn vcf_output_positions_are_one_based() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("calls.vcf");
    let reference: Arc<dyn ReferenceProvider> = Arc::new(
        InMemoryReference::new().with_contig("c", vec![b'A'; 100]),
    );
    {
        let mut writer = VcfWriter::new(
            Some(&out),
            Arc::clone(&reference),
            &["sample".to_owned()],
            false,
        )
        .unwrap();
        let call = VariantCall::new(
            Variant::snv("c", 20, b'A', b'T'),
            bio::stats::PHREDProb(50.0),
            vec![SampleCall {
                sample: 0,
                genotype: vec![0, 1],
                genotype_quality: bio::stats::PHREDProb(40.0),
            }],
        );
        writer.write_variant(&call).unwrap();
    }
    let content = std::fs::read_to_string(&out).unwrap();
    let record = content
        .lines()
        .find(|l| !l.starts_with('#'))
        .expect("one record written");
    let fields: Vec<&str> = record.split('\t').collect();
    assert_eq!(fields[0], "c");
    // zero-based 20 renders as POS 21
    assert_eq!(fields[1], "21");
    assert_eq!(fields[3], "A");
    assert_eq!(fields[4], "T");
}
