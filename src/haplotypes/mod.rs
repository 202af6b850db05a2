//! Haplotype enumeration over expanding active regions, under the
//! haplotype-count budget, with lagging and holdout policies.

pub mod generator;

pub use generator::{
    ExtensionPolicy, HaplotypeBlock, HaplotypeGenerator, HaplotypeGeneratorConfig, LaggingPolicy,
};
