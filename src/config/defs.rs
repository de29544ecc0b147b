use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const MASH_TAG: &str = "mash";
pub const BWA_TAG: &str = "bwa";
pub const BOWTIE2_TAG: &str = "bowtie2";
pub const BOWTIE2_BUILD_TAG: &str = "bowtie2-build";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const REFORMAT_TAG: &str = "reformat.sh";
pub const BBDUK_TAG: &str = "bbduk.sh";
pub const SKESA_TAG: &str = "skesa";
pub const QUALIMAP_TAG: &str = "qualimap";
pub const FREEBAYES_PARALLEL_TAG: &str = "freebayes-parallel";
pub const FASTA_REGIONS_TAG: &str = "fasta_generate_regions.py";
pub const MAKE_EXAMPLES_TAG: &str = "make_examples";
pub const CALL_VARIANTS_TAG: &str = "call_variants";
pub const POSTPROCESS_VARIANTS_TAG: &str = "postprocess_variants";
pub const MLST_TAG: &str = "MLSTsippr";


lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(SAMTOOLS_TAG, 1.9);
        m.insert(MASH_TAG, 2.1);
        m.insert(BOWTIE2_TAG, 2.3);
        m.insert(SKESA_TAG, 2.3);
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Sort,
    Index,
    Fastq,
    Faidx,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MashSubcommand {
    Sketch,
    Dist,
}

// Static Filenames
pub const RUN_LOG: &str = "log";
pub const REPORT_DIR: &str = "reports";
pub const VCF_DIR: &str = "vcf_files";
pub const VCF_REPORT: &str = "vcf_report.csv";
pub const MLST_REPORT: &str = "mlst.csv";
pub const QUALIMAP_DIR: &str = "qualimap";
pub const QUALIMAP_REPORT: &str = "genome_results.txt";
pub const REFERENCE_SKETCH: &str = "mash/vsnp_reference.msh";
pub const SPECIES_ACCESSIONS: &str = "mash/species_accessions.csv";
pub const SPOLIGO_SPACERS: &str = "mycobacterium/spacers.fasta";
pub const SPOLIGO_DB: &str = "spoligotype_db.txt";
pub const BRUCELLA_MLST_DB: &str = "brucella/MLST";
pub const SCRIPT_DEPENDENTS: &str = "script_dependents";

// Static Parameters
pub const MASH_MIN_KMER_COPIES: u32 = 2;
pub const FREEBAYES_REGION_SIZE: u64 = 100_000;
pub const HIGH_QUALITY_SNP_QUAL: f64 = 150.0;
pub const QUALITY_THRESHOLD: u32 = 30;
pub const SPOLIGO_SPACER_COUNT: usize = 43;
pub const QUALIMAP_JAVA_MEM: &str = "4G";
pub const NOT_DETERMINED: &str = "ND";
pub const SBCODE_NOT_FOUND: &str = "Not Found";
pub const MYCOBACTERIUM_GENUS: &str = "mycobacterium";
pub const BRUCELLA_GENUS: &str = "brucella";

pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];

/// Per-strain map. Ordered so that every stage, log, and report iterates
/// strains the same way.
pub type StrainMap<T> = BTreeMap<String, T>;


pub struct RunConfig {
    pub cwd: PathBuf,
    /// Folder holding the input FASTQ files and the strain working dirs.
    pub path: PathBuf,
    pub dependency_path: PathBuf,
    pub report_path: PathBuf,
    pub vcf_path: PathBuf,
    pub log_file: PathBuf,
    pub threads: usize,
    pub args: Arguments,
    pub start_time: DateTime<Local>,
    pub run_start: Instant,
}


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Failed to execute {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    ToolExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Empty output artifact: {0}")]
    EmptyOutput(PathBuf),

    #[error("Failed to parse {file}: {msg}")]
    Parse { file: PathBuf, msg: String },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

impl PipelineError {
    pub fn parse(file: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        PipelineError::Parse {
            file: file.into(),
            msg: msg.into(),
        }
    }
}
