// De novo assembly of unmapped reads and contig counting
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use seq_io::fasta::Reader as FastaReader;
use seq_io::fastq::Reader as FastqReader;

use crate::config::defs::{PipelineError, RunConfig, StrainMap};
use crate::utils::command::run_tool;
use crate::utils::command::skesa::SkesaConfig;
use crate::utils::file::{file_path_manipulator, file_reader};
use crate::utils::strain::Strain;


/// Number of FASTQ records in a plain or gzipped file.
pub fn fastq_record_count(path: &Path) -> Result<u64, PipelineError> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = FastqReader::new(file_reader(path)?);
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        record.map_err(|e| PipelineError::parse(path, e.to_string()))?;
        count += 1;
    }
    Ok(count)
}

/// Number of FASTA records in a plain or gzipped file; 0 for an empty file.
pub fn fasta_record_count(path: &Path) -> Result<u64, PipelineError> {
    let mut reader = FastaReader::new(file_reader(path)?);
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        record.map_err(|e| PipelineError::parse(path, e.to_string()))?;
        count += 1;
    }
    Ok(count)
}


/// Assembles each strain's unmapped reads with skesa.
///
/// A strain without unmapped reads gets an empty contig file and skesa is not run.
///
/// # Returns
/// strain -> `<strain>_unmapped.fasta`
pub async fn assemble_unmapped_reads(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    unmapped_reads: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut assemblies = StrainMap::new();
    for (name, reads) in unmapped_reads {
        let strain = strains
            .get(name)
            .ok_or_else(|| PipelineError::MissingInput(format!("working directory for {}", name)))?;
        let contigs = file_path_manipulator(Path::new(name), Some(&strain.working_dir), None, Some("unmapped.fasta"), "_");

        if fastq_record_count(reads)? == 0 {
            warn!("{}: no unmapped reads to assemble", name);
            File::create(&contigs)?;
        } else {
            let call = SkesaConfig {
                reads: reads.clone(),
                contigs_out: contigs.clone(),
                threads: config.threads,
                paired: strain.is_paired(),
            };
            run_tool(&call, &config.log_file).await?;
        }
        assemblies.insert(name.clone(), contigs);
    }
    Ok(assemblies)
}


/// Contig count of every unmapped-read assembly.
pub fn assembly_stats(assemblies: &StrainMap<PathBuf>) -> Result<StrainMap<u64>, PipelineError> {
    let mut contigs = StrainMap::new();
    for (name, fasta) in assemblies {
        let count = if fasta.exists() { fasta_record_count(fasta)? } else { 0 };
        info!("{}: {} unmapped contigs", name, count);
        contigs.insert(name.clone(), count);
    }
    Ok(contigs)
}
