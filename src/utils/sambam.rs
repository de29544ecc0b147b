// Read alignment, BAM sorting/indexing and unmapped read extraction
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::cli::ReferenceMapper;
use crate::config::defs::{PipelineError, RunConfig, SamtoolsSubcommand, StrainMap, SAMTOOLS_TAG};
use crate::utils::command::bowtie2::Bowtie2Config;
use crate::utils::command::bwa::BwaMemConfig;
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::command::{append_to_log, exit_error, run_tool, run_tool_to_file, spawn_tool, ToolCall};
use crate::utils::file::{file_path_manipulator, require_non_empty};
use crate::utils::strain::Strain;
use crate::utils::streams::{join_with_error_handling, pipe_child_to_cmd, spawn_stderr_collector};
use crate::utils::system::fan_out;


/// Aligner invocation for one strain.
pub fn aligner_call(
    mapper: ReferenceMapper,
    strain: &Strain,
    index: &Path,
    threads: usize,
) -> Box<dyn ToolCall + Send + Sync> {
    match mapper {
        ReferenceMapper::Bwa => Box::new(BwaMemConfig {
            index: index.to_path_buf(),
            reads: strain.fastq_files.clone(),
            threads,
            strain: strain.name.clone(),
        }),
        ReferenceMapper::Bowtie2 => Box::new(Bowtie2Config {
            bt2_index_path: index.to_path_buf(),
            reads: strain.fastq_files.clone(),
            threads,
            strain: strain.name.clone(),
        }),
    }
}

/// `samtools sort` reading SAM from stdin.
pub fn sort_call(bam: &Path, threads: usize) -> SamtoolsConfig {
    SamtoolsConfig {
        subcommand: SamtoolsSubcommand::Sort,
        threads: Some(threads),
        subcommand_fields: vec![
            ("-o".to_string(), Some(bam.to_string_lossy().into_owned())),
            ("-".to_string(), None),
        ],
        inputs: vec![],
    }
}

/// `samtools fastq` keeping only unmapped reads.
///
/// No `-0/-1/-2/-s` outputs are named, so READ1, READ2 and single reads all land on stdout.
pub fn unmapped_call(bam: &Path, threads: usize) -> SamtoolsConfig {
    SamtoolsConfig {
        subcommand: SamtoolsSubcommand::Fastq,
        threads: Some(threads),
        subcommand_fields: vec![("-f".to_string(), Some("4".to_string()))],
        inputs: vec![bam.to_path_buf()],
    }
}


async fn collect_stderr(task: Option<JoinHandle<anyhow::Result<Vec<String>>>>) -> Result<String, PipelineError> {
    match task {
        Some(task) => Ok(join_with_error_handling(task).await?.join("\n")),
        None => Ok(String::new()),
    }
}


/// Aligns one strain and sorts the alignments: `aligner ... | samtools sort -o <bam> -`.
async fn align_and_sort(
    config: &RunConfig,
    strain: &Strain,
    index: &Path,
    mapper: ReferenceMapper,
) -> Result<PathBuf, PipelineError> {
    let bam = file_path_manipulator(Path::new(&strain.name), Some(&strain.working_dir), None, Some("sorted.bam"), "_");
    let align = aligner_call(mapper, strain, index, config.threads);
    let sort = sort_call(&bam, config.threads);

    let mut aligner = spawn_tool(align.as_ref())?;
    let aligner_err = spawn_stderr_collector(&mut aligner);
    let (mut sorter, copy_task) = pipe_child_to_cmd(&mut aligner, SAMTOOLS_TAG, &sort.args()).await?;
    let sorter_err = spawn_stderr_collector(&mut sorter);

    // A dying sorter closes the pipe; the copy task then drops the aligner's stdout so it can exit too.
    let sort_status = sorter.wait().await?;
    let align_status = aligner.wait().await?;
    let copied = copy_task.await;
    let align_stderr = collect_stderr(aligner_err).await?;
    let sort_stderr = collect_stderr(sorter_err).await?;

    let command_line = format!("{} | {}", align.command_line(), sort.command_line());
    append_to_log(&config.log_file, &command_line, "", &format!("{}\n{}", align_stderr, sort_stderr)).await?;

    // An aligner killed by SIGPIPE has no exit code; the sorter is then the real failure.
    if align_status.code().is_some_and(|code| code != 0) {
        return Err(exit_error(align.tool(), align_status.code(), &align_stderr));
    }
    if !sort_status.success() {
        return Err(exit_error(sort.tool(), sort_status.code(), &sort_stderr));
    }
    if !align_status.success() {
        return Err(exit_error(align.tool(), align_status.code(), &align_stderr));
    }
    match copied {
        Ok(Ok(bytes)) => debug!("{}: piped {} bytes into samtools sort", strain.name, bytes),
        Ok(Err(e)) => return Err(PipelineError::Other(e)),
        Err(e) => return Err(PipelineError::Other(anyhow!("Task failed: {}", e))),
    }
    require_non_empty(&bam)?;
    Ok(bam)
}


/// Maps each strain's reads onto its reference index.
///
/// # Arguments
///
/// * `config` - Run configuration.
/// * `strains` - Strains to map.
/// * `indices` - strain -> index prefix. Strains without an entry are skipped.
/// * `mapper` - Aligner.
///
/// # Returns
/// strain -> `<strain>_sorted.bam`
pub async fn map_ref_genome(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    indices: &StrainMap<PathBuf>,
    mapper: ReferenceMapper,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut bams = StrainMap::new();
    for (name, index) in indices {
        let strain = strains
            .get(name)
            .ok_or_else(|| PipelineError::MissingInput(format!("reads for {}", name)))?;
        info!("Mapping {} with {:?}", name, mapper);
        let bam = align_and_sort(config, strain, index, mapper).await?;
        debug!("{}: {}", name, bam.display());
        bams.insert(name.clone(), bam);
    }
    Ok(bams)
}


/// Indexes every sorted BAM.
///
/// # Returns
/// strain -> `<bam>.bai`
pub async fn samtools_index(
    config: &RunConfig,
    bams: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    fan_out(bams.clone(), config.threads, |_name, bam| async move {
        let call = SamtoolsConfig {
            subcommand: SamtoolsSubcommand::Index,
            threads: None,
            subcommand_fields: vec![],
            inputs: vec![bam.clone()],
        };
        run_tool(&call, &config.log_file).await?;
        let bai = PathBuf::from(format!("{}.bai", bam.to_string_lossy()));
        require_non_empty(&bai)?;
        Ok(bai)
    })
        .await
}


/// Writes the reads that failed to map to `<strain>_unmapped.fastq`.
pub async fn extract_unmapped_reads(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    bams: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut unmapped = StrainMap::new();
    for (name, bam) in bams {
        let strain = strains
            .get(name)
            .ok_or_else(|| PipelineError::MissingInput(format!("working directory for {}", name)))?;
        let fastq = file_path_manipulator(Path::new(name), Some(&strain.working_dir), None, Some("unmapped.fastq"), "_");
        let written = run_tool_to_file(&unmapped_call(bam, config.threads), &fastq, &config.log_file).await?;
        debug!("{}: {} bytes of unmapped reads", name, written);
        unmapped.insert(name.clone(), fastq);
    }
    Ok(unmapped)
}
