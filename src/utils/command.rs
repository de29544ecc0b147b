/// Functions and structs for building external tool command lines and running them

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::defs::{PipelineError, TOOL_VERSIONS, MASH_TAG, SAMTOOLS_TAG, BOWTIE2_TAG};
use crate::utils::streams::{child_stdout_to_file, read_child_output_to_vec, spawn_stderr_collector, ChildStream};

lazy_static! {
    // Serialises appends to the run log when strains fan out.
    static ref RUN_LOG_LOCK: Mutex<()> = Mutex::new(());
}

/// A fully specified invocation of one external tool.
pub trait ToolCall {
    fn tool(&self) -> &'static str;
    fn args(&self) -> Vec<String>;

    fn command_line(&self) -> String {
        format!("{} {}", self.tool(), self.args().join(" "))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}


pub mod mash {
    use std::path::PathBuf;
    use crate::config::defs::{MashSubcommand, MASH_MIN_KMER_COPIES, MASH_TAG};
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct MashConfig {
        pub subcommand: MashSubcommand,
        pub threads: usize,
        /// Sketch: output prefix. Dist: reference sketch.
        pub target: PathBuf,
        pub inputs: Vec<PathBuf>,
    }

    impl ToolCall for MashConfig {
        fn tool(&self) -> &'static str {
            MASH_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec: Vec<String> = Vec::new();
            match self.subcommand {
                MashSubcommand::Sketch => {
                    args_vec.push("sketch".to_string());
                    args_vec.push("-m".to_string());
                    args_vec.push(MASH_MIN_KMER_COPIES.to_string());
                    args_vec.push("-p".to_string());
                    args_vec.push(self.threads.to_string());
                    args_vec.push("-o".to_string());
                    args_vec.push(path_arg(&self.target));
                }
                MashSubcommand::Dist => {
                    args_vec.push("dist".to_string());
                    args_vec.push("-p".to_string());
                    args_vec.push(self.threads.to_string());
                    args_vec.push(path_arg(&self.target));
                }
            }
            args_vec.extend(self.inputs.iter().map(|p| path_arg(p)));
            args_vec
        }
    }
}


pub mod reformat {
    use std::path::PathBuf;
    use crate::config::defs::REFORMAT_TAG;
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct ReformatConfig {
        pub input: PathBuf,
        pub qchist: PathBuf,
        pub lhist: PathBuf,
    }

    impl ToolCall for ReformatConfig {
        fn tool(&self) -> &'static str {
            REFORMAT_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                format!("in={}", path_arg(&self.input)),
                format!("qchist={}", path_arg(&self.qchist)),
                format!("lhist={}", path_arg(&self.lhist)),
                "overwrite=t".to_string(),
            ]
        }
    }
}


pub mod bwa {
    use std::path::PathBuf;
    use crate::config::defs::BWA_TAG;
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct BwaIndexConfig {
        pub reference: PathBuf,
    }

    impl ToolCall for BwaIndexConfig {
        fn tool(&self) -> &'static str {
            BWA_TAG
        }

        fn args(&self) -> Vec<String> {
            vec!["index".to_string(), path_arg(&self.reference)]
        }
    }

    #[derive(Debug, Clone)]
    pub struct BwaMemConfig {
        pub index: PathBuf,
        pub reads: Vec<PathBuf>,
        pub threads: usize,
        pub strain: String,
    }

    impl ToolCall for BwaMemConfig {
        fn tool(&self) -> &'static str {
            BWA_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec = vec![
                "mem".to_string(),
                "-M".to_string(),
                "-t".to_string(),
                self.threads.to_string(),
                "-R".to_string(),
                format!("@RG\\tID:{0}\\tSM:{0}\\tPL:ILLUMINA", self.strain),
                path_arg(&self.index),
            ];
            args_vec.extend(self.reads.iter().map(|p| path_arg(p)));
            args_vec
        }
    }
}


pub mod bowtie2 {
    use std::path::PathBuf;
    use crate::config::defs::{BOWTIE2_BUILD_TAG, BOWTIE2_TAG};
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct Bowtie2BuildConfig {
        pub reference: PathBuf,
        pub index_base: PathBuf,
    }

    impl ToolCall for Bowtie2BuildConfig {
        fn tool(&self) -> &'static str {
            BOWTIE2_BUILD_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![path_arg(&self.reference), path_arg(&self.index_base)]
        }
    }

    #[derive(Debug, Clone)]
    pub struct Bowtie2Config {
        pub bt2_index_path: PathBuf,
        pub reads: Vec<PathBuf>,
        pub threads: usize,
        pub strain: String,
    }

    impl ToolCall for Bowtie2Config {
        fn tool(&self) -> &'static str {
            BOWTIE2_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec = vec![
                "-x".to_string(),
                path_arg(&self.bt2_index_path),
            ];
            match self.reads.as_slice() {
                [r1, r2] => {
                    args_vec.push("-1".to_string());
                    args_vec.push(path_arg(r1));
                    args_vec.push("-2".to_string());
                    args_vec.push(path_arg(r2));
                }
                reads => {
                    args_vec.push("-U".to_string());
                    args_vec.push(reads.iter().map(|p| path_arg(p)).collect::<Vec<_>>().join(","));
                }
            }
            args_vec.push("-p".to_string());
            args_vec.push(self.threads.to_string());
            args_vec.push("--very-sensitive-local".to_string());
            args_vec.push("--rg-id".to_string());
            args_vec.push(self.strain.clone());
            args_vec.push("--rg".to_string());
            args_vec.push(format!("SM:{}", self.strain));
            args_vec.push("--rg".to_string());
            args_vec.push("PL:ILLUMINA".to_string());
            args_vec
        }
    }
}


pub mod samtools {
    use std::path::PathBuf;
    use crate::config::defs::{SamtoolsSubcommand, SAMTOOLS_TAG};
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        pub threads: Option<usize>,
        /// Ordered flags and their optional values.
        pub subcommand_fields: Vec<(String, Option<String>)>,
        pub inputs: Vec<PathBuf>,
    }

    impl ToolCall for SamtoolsConfig {
        fn tool(&self) -> &'static str {
            SAMTOOLS_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec: Vec<String> = Vec::new();
            let sub = match self.subcommand {
                SamtoolsSubcommand::Sort => "sort",
                SamtoolsSubcommand::Index => "index",
                SamtoolsSubcommand::Fastq => "fastq",
                SamtoolsSubcommand::Faidx => "faidx",
            };
            args_vec.push(sub.to_string());
            if let Some(threads) = self.threads {
                args_vec.push("-@".to_string());
                args_vec.push(threads.to_string());
            }
            for (flag, value) in &self.subcommand_fields {
                args_vec.push(flag.clone());
                if let Some(value) = value {
                    args_vec.push(value.clone());
                }
            }
            args_vec.extend(self.inputs.iter().map(|p| path_arg(p)));
            args_vec
        }
    }
}


pub mod skesa {
    use std::path::PathBuf;
    use crate::config::defs::SKESA_TAG;
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct SkesaConfig {
        pub reads: PathBuf,
        pub contigs_out: PathBuf,
        pub threads: usize,
        pub paired: bool,
    }

    impl ToolCall for SkesaConfig {
        fn tool(&self) -> &'static str {
            SKESA_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec = vec![
                "--fastq".to_string(),
                path_arg(&self.reads),
                "--cores".to_string(),
                self.threads.to_string(),
            ];
            if self.paired {
                args_vec.push("--use_paired_ends".to_string());
            }
            args_vec.extend([
                "--vector_percent".to_string(),
                "1".to_string(),
                "--contigs_out".to_string(),
                path_arg(&self.contigs_out),
            ]);
            args_vec
        }
    }
}


pub mod qualimap {
    use std::path::PathBuf;
    use crate::config::defs::{QUALIMAP_JAVA_MEM, QUALIMAP_TAG};
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct QualimapConfig {
        pub bam: PathBuf,
        pub outdir: PathBuf,
        pub threads: usize,
    }

    impl ToolCall for QualimapConfig {
        fn tool(&self) -> &'static str {
            QUALIMAP_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                "bamqc".to_string(),
                "-bam".to_string(),
                path_arg(&self.bam),
                "-outdir".to_string(),
                path_arg(&self.outdir),
                "-nt".to_string(),
                self.threads.to_string(),
                format!("--java-mem-size={}", QUALIMAP_JAVA_MEM),
            ]
        }
    }
}


pub mod freebayes {
    use std::path::PathBuf;
    use crate::config::defs::{FASTA_REGIONS_TAG, FREEBAYES_PARALLEL_TAG};
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct FastaRegionsConfig {
        pub fai: PathBuf,
        pub region_size: u64,
    }

    impl ToolCall for FastaRegionsConfig {
        fn tool(&self) -> &'static str {
            FASTA_REGIONS_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![path_arg(&self.fai), self.region_size.to_string()]
        }
    }

    #[derive(Debug, Clone)]
    pub struct FreebayesConfig {
        pub regions: PathBuf,
        pub threads: usize,
        pub reference: PathBuf,
        pub bam: PathBuf,
    }

    impl ToolCall for FreebayesConfig {
        fn tool(&self) -> &'static str {
            FREEBAYES_PARALLEL_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                path_arg(&self.regions),
                self.threads.to_string(),
                "-f".to_string(),
                path_arg(&self.reference),
                path_arg(&self.bam),
            ]
        }
    }
}


pub mod deepvariant {
    use std::path::PathBuf;
    use crate::config::defs::{CALL_VARIANTS_TAG, MAKE_EXAMPLES_TAG, POSTPROCESS_VARIANTS_TAG};
    use super::{path_arg, ToolCall};

    /// Sharded tfrecord path in the `<base>@<shards>.gz` form the DeepVariant binaries expect.
    pub fn sharded(base: &PathBuf, shards: usize) -> String {
        format!("{}@{}.gz", base.to_string_lossy(), shards)
    }

    #[derive(Debug, Clone)]
    pub struct MakeExamplesConfig {
        pub reference: PathBuf,
        pub bam: PathBuf,
        pub examples: PathBuf,
        pub gvcf: PathBuf,
        pub task: usize,
        pub shards: usize,
    }

    impl ToolCall for MakeExamplesConfig {
        fn tool(&self) -> &'static str {
            MAKE_EXAMPLES_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                "--mode".to_string(),
                "calling".to_string(),
                "--ref".to_string(),
                path_arg(&self.reference),
                "--reads".to_string(),
                path_arg(&self.bam),
                "--examples".to_string(),
                sharded(&self.examples, self.shards),
                "--gvcf".to_string(),
                sharded(&self.gvcf, self.shards),
                "--task".to_string(),
                self.task.to_string(),
            ]
        }
    }

    #[derive(Debug, Clone)]
    pub struct CallVariantsConfig {
        pub outfile: PathBuf,
        pub examples: PathBuf,
        pub shards: usize,
        pub checkpoint: PathBuf,
    }

    impl ToolCall for CallVariantsConfig {
        fn tool(&self) -> &'static str {
            CALL_VARIANTS_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                "--outfile".to_string(),
                path_arg(&self.outfile),
                "--examples".to_string(),
                sharded(&self.examples, self.shards),
                "--checkpoint".to_string(),
                path_arg(&self.checkpoint),
            ]
        }
    }

    #[derive(Debug, Clone)]
    pub struct PostprocessVariantsConfig {
        pub reference: PathBuf,
        pub infile: PathBuf,
        pub outfile: PathBuf,
        pub gvcf_records: PathBuf,
        pub shards: usize,
        pub gvcf_outfile: PathBuf,
    }

    impl ToolCall for PostprocessVariantsConfig {
        fn tool(&self) -> &'static str {
            POSTPROCESS_VARIANTS_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                "--ref".to_string(),
                path_arg(&self.reference),
                "--infile".to_string(),
                path_arg(&self.infile),
                "--outfile".to_string(),
                path_arg(&self.outfile),
                "--nonvariant_site_tfrecord_path".to_string(),
                sharded(&self.gvcf_records, self.shards),
                "--gvcf_outfile".to_string(),
                path_arg(&self.gvcf_outfile),
            ]
        }
    }
}


pub mod bbduk {
    use std::path::PathBuf;
    use crate::config::defs::BBDUK_TAG;
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct BbdukConfig {
        pub spacers: PathBuf,
        pub reads: Vec<PathBuf>,
        pub kmer: u32,
        pub stats: PathBuf,
        pub threads: usize,
    }

    impl ToolCall for BbdukConfig {
        fn tool(&self) -> &'static str {
            BBDUK_TAG
        }

        fn args(&self) -> Vec<String> {
            let mut args_vec = vec![format!("ref={}", path_arg(&self.spacers))];
            if let Some(r1) = self.reads.first() {
                args_vec.push(format!("in={}", path_arg(r1)));
            }
            if let Some(r2) = self.reads.get(1) {
                args_vec.push(format!("in2={}", path_arg(r2)));
            }
            args_vec.push(format!("k={}", self.kmer));
            args_vec.push("rcomp=t".to_string());
            args_vec.push("ordered=t".to_string());
            args_vec.push(format!("stats={}", path_arg(&self.stats)));
            args_vec.push(format!("threads={}", self.threads));
            args_vec
        }
    }
}


pub mod mlst {
    use std::path::PathBuf;
    use crate::config::defs::MLST_TAG;
    use super::{path_arg, ToolCall};

    #[derive(Debug, Clone)]
    pub struct MlstConfig {
        pub sequence_path: PathBuf,
        pub target_path: PathBuf,
        pub report_path: PathBuf,
    }

    impl ToolCall for MlstConfig {
        fn tool(&self) -> &'static str {
            MLST_TAG
        }

        fn args(&self) -> Vec<String> {
            vec![
                "-s".to_string(),
                path_arg(&self.sequence_path),
                "-t".to_string(),
                path_arg(&self.target_path),
                "-r".to_string(),
                path_arg(&self.report_path),
            ]
        }
    }
}


/// Appends one invocation and its output to the run log.
pub async fn append_to_log(log_file: &Path, command_line: &str, stdout: &str, stderr: &str) -> Result<()> {
    let _guard = RUN_LOG_LOCK.lock().await;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .await
        .map_err(|e| anyhow!("Failed to open log {}: {}", log_file.display(), e))?;
    let block = format!("{}\nstdout:\n{}\nstderr:\n{}\n", command_line, stdout, stderr);
    file.write_all(block.as_bytes()).await?;
    Ok(())
}

pub fn exit_error(tool: &str, code: Option<i32>, stderr: &str) -> PipelineError {
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    PipelineError::ToolExit {
        tool: tool.to_string(),
        code,
        stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
    }
}


/// Runs a tool to completion, logging it and checking the exit status.
///
/// # Arguments
///
/// * `call` - Tool invocation.
/// * `log_file` - Run log receiving the command line and output.
///
/// Output only goes to the run log; tools called this way write their artifacts themselves.
pub async fn run_tool(call: &dyn ToolCall, log_file: &Path) -> Result<(), PipelineError> {
    let tool = call.tool();
    let command_line = call.command_line();
    debug!("Running: {}", command_line);

    let output = Command::new(tool)
        .args(call.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}. Is {} installed?", e, tool),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    append_to_log(log_file, &command_line, &stdout, &stderr).await?;

    if !output.status.success() {
        return Err(exit_error(tool, output.status.code(), &stderr));
    }
    Ok(())
}


/// Spawns a tool with stdout and stderr piped, leaving the caller to drain them.
pub fn spawn_tool(call: &dyn ToolCall) -> Result<Child, PipelineError> {
    let tool = call.tool();
    Command::new(tool)
        .args(call.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}. Is {} installed?", e, tool),
        })
}


/// Runs a tool whose stdout is the artifact, streaming it into `out_path`.
///
/// # Arguments
///
/// * `call` - Tool invocation.
/// * `out_path` - File receiving stdout.
/// * `log_file` - Run log.
///
/// # Returns
/// Bytes written to `out_path`.
pub async fn run_tool_to_file(call: &dyn ToolCall, out_path: &Path, log_file: &Path) -> Result<u64, PipelineError> {
    let tool = call.tool();
    let command_line = format!("{} > {}", call.command_line(), out_path.display());
    debug!("Running: {}", command_line);

    let mut child = spawn_tool(call)?;

    let err_task = spawn_stderr_collector(&mut child);
    let written = child_stdout_to_file(&mut child, out_path).await?;
    let status = child.wait().await?;
    let stderr = match err_task {
        Some(task) => task.await.map_err(|e| anyhow!("stderr task failed: {}", e))??.join("\n"),
        None => String::new(),
    };
    append_to_log(log_file, &command_line, "", &stderr).await?;

    if !status.success() {
        return Err(exit_error(tool, status.code(), &stderr));
    }
    Ok(written)
}


async fn version_output(tool: &str, flag: &str) -> Result<Vec<String>> {
    let mut child = Command::new(tool)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn: {}. Is {} installed?", e, tool))?;
    let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
    child.wait().await?;
    Ok(lines)
}

/// Pulls the version token out of a tool's `--version` output.
pub fn parse_version(tool: &str, lines: &[String]) -> Result<String> {
    let first_line = lines
        .first()
        .ok_or_else(|| anyhow!("No output from {} --version", tool))?;
    let version = match tool {
        MASH_TAG => first_line.split_whitespace().next(),
        SAMTOOLS_TAG => first_line.split_whitespace().nth(1),
        BOWTIE2_TAG => first_line.split_whitespace().last(),
        _ => first_line.split_whitespace().last(),
    }
        .ok_or_else(|| anyhow!("Invalid {} --version output: {}", tool, first_line))?
        .to_string();
    if version.is_empty() {
        return Err(anyhow!("Empty version number in {} --version output: {}", tool, first_line));
    }
    Ok(version)
}

/// Leading `major.minor` of a version string.
fn major_minor(version: &str) -> Option<f32> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor: String = parts.next().unwrap_or("0").chars().take_while(|c| c.is_ascii_digit()).collect();
    format!("{}.{}", major, if minor.is_empty() { "0" } else { &minor }).parse().ok()
}


pub async fn check_version(tool: &str) -> Result<String> {
    let lines = version_output(tool, "--version").await?;
    let version = parse_version(tool, &lines)?;
    if let (Some(minimum), Some(found)) = (TOOL_VERSIONS.get(tool), major_minor(&version)) {
        if found < *minimum {
            warn!("{} version {} is older than the tested minimum {}", tool, version, minimum);
        }
    }
    Ok(version)
}

/// Confirms an executable can be spawned; exit status is irrelevant.
pub async fn check_presence(tool: &str) -> Result<()> {
    let mut child = Command::new(tool)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn: {}. Is {} installed?", e, tool))?;
    let _ = child.kill().await;
    Ok(())
}


/// Verifies every tool a run needs before any work starts.
pub async fn check_versions(tools: Vec<&str>) -> Result<(), PipelineError> {
    for tool in tools {
        if TOOL_VERSIONS.contains_key(tool) {
            let version = check_version(tool)
                .await
                .map_err(|e| PipelineError::MissingInput(format!("{}: {}", tool, e)))?;
            info!("{} version {}", tool, version);
        } else {
            check_presence(tool)
                .await
                .map_err(|e| PipelineError::MissingInput(format!("{}: {}", tool, e)))?;
            debug!("{} found", tool);
        }
    }
    Ok(())
}
