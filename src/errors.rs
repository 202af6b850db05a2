use std::path::PathBuf;

use thiserror::Error;

/// Mistakes in the invocation or inputs; the run aborts with a structured
/// message telling the user where the problem was detected, why it is a
/// problem, and what to do about it.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("the working directory {path} does not exist or is not writable; specify an existing writable directory with --working-directory")]
    InvalidWorkingDirectory { path: PathBuf },
    #[error("the read file {path} does not exist; check the --reads paths")]
    MissingReadFile { path: PathBuf },
    #[error("no read files were given; supply at least one with --reads or --reads-file")]
    NoReadFiles,
    #[error("the file {path} given in a paths file could not be resolved against {tried_against}; use absolute paths or paths relative to the paths file")]
    UnresolvablePathEntry { path: PathBuf, tried_against: PathBuf },
    #[error("the contigs {contigs:?} requested in the search regions are not in the reference; check that reads and regions match the given reference")]
    UnmatchedReferenceContigs { contigs: Vec<String> },
    #[error("there are contigs with ambiguous ploidy: {entries}; remove the duplicate --contig-ploidies declarations")]
    AmbiguousPloidy { entries: String },
    #[error("trio calling requires exactly 3 samples but {num_samples} were given; provide mother, father and child samples")]
    BadTrioSampleCount { num_samples: usize },
    #[error("the sample {sample} was given as both maternal and paternal; a trio needs one sample per parent role")]
    SameTrioParents { sample: String },
    #[error("the given parent samples {unmatched:?} are not in the read sample set; check --maternal-sample/--paternal-sample against the read groups")]
    TrioParentNotInSampleSet { unmatched: Vec<String> },
    #[error("polyclone calling requires exactly 1 sample but {num_samples} were given")]
    BadPolycloneSampleCount { num_samples: usize },
    #[error("the normal sample {sample} is not in the read sample set")]
    NormalSampleNotInSampleSet { sample: String },
    #[error("the source variant file {source_path} conflicts with the output file {output}; specify a unique output file")]
    ConflictingSourceVariantFile { source_path: PathBuf, output: PathBuf },
    #[error("the read group {read_group} in {path} has no SM tag; sample identity cannot be inferred")]
    MissingSampleTag { read_group: String, path: PathBuf },
    #[error("the read file {path} has no @RG header entries; sample identity cannot be inferred")]
    MissingReadGroups { path: PathBuf },
    #[error("could not parse region {expression}: {why}; expected contig[:begin[-end]]")]
    MalformedRegion { expression: String, why: String },
    #[error("could not parse contig ploidy {expression}; expected contig=ploidy or sample:contig=ploidy")]
    MalformedContigPloidy { expression: String },
    #[error("the requested sample {sample} is not present in any read file")]
    UnknownSample { sample: String },
    #[error("the error model profile {name} is not known and is not a readable file")]
    UnknownErrorModelProfile { name: String },
}

/// Bugs: internal invariants violated or unimplemented paths requested.
#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("the caller flavor {name} is not implemented")]
    UnimplementedCaller { name: String },
    #[error("internal invariant violated: {what}")]
    InvariantViolated { what: String },
}

/// Failures of the environment the run cannot control.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("could not create a temporary directory under {parent}: permission denied")]
    TempDirPermissionDenied { parent: PathBuf },
    #[error("could not create a temporary directory under {parent}: read-only file system")]
    TempDirReadOnlyFileSystem { parent: PathBuf },
    #[error("could not create a temporary directory under {parent}: not enough memory")]
    TempDirNotEnoughMemory { parent: PathBuf },
    #[error("could not create a temporary directory under {parent}: file name too long")]
    TempDirFilenameTooLong { parent: PathBuf },
    #[error("could not create a temporary directory under {parent} after {attempts} attempts: {source}")]
    TempDirExhausted {
        parent: PathBuf,
        attempts: u32,
        source: std::io::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    System(#[from] SystemError),
}

impl Error {
    /// Process exit code for the error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::User(_) => 2,
            Error::Program(_) => 3,
            Error::System(_) => 4,
        }
    }
}
