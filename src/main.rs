use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use snptyper::cli::{parse, Arguments};
use snptyper::config::defs::{PipelineError, RunConfig, REPORT_DIR, RUN_LOG, VCF_DIR};
use snptyper::pipelines::strain_typing;
use snptyper::utils::file::{make_path, resolve_path, validate_dir};
use snptyper::utils::system::detect_cores_and_load;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();
    let start_time = Local::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n snptyper\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    debug!("Using {} threads; CPU load {}%", max_cores, cpu_load);

    let run_config = match build_run_config(args, dir, max_cores, start_time, run_start) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid run configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Processing FASTQ files in {}", run_config.path.display());
    info!("Dependencies: {}", run_config.dependency_path.display());

    if let Err(e) = strain_typing::run(run_config).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Resolves the sequence, dependency, report and VCF folders against `cwd`.
///
/// # Arguments
/// * `args` - Parsed command line.
/// * `cwd` - The current working directory.
/// * `threads` - Usable cores.
///
/// # Returns
/// RunConfig with the report folder created.
fn build_run_config(
    args: Arguments,
    cwd: PathBuf,
    threads: usize,
    start_time: chrono::DateTime<Local>,
    run_start: Instant,
) -> Result<RunConfig, PipelineError> {
    let path = validate_dir(&resolve_path(&args.path, &cwd))?;
    let dependency_path = validate_dir(&resolve_path(&args.dependency_path, &cwd))?;
    let report_path = optional_dir(args.report_path.as_deref(), &path, REPORT_DIR, &cwd);
    let vcf_path = optional_dir(args.vcf_path.as_deref(), &path, VCF_DIR, &cwd);
    make_path(&report_path)?;

    Ok(RunConfig {
        log_file: path.join(RUN_LOG),
        cwd,
        path,
        dependency_path,
        report_path,
        vcf_path,
        threads,
        args,
        start_time,
        run_start,
    })
}

fn optional_dir(raw: Option<&str>, path: &Path, default: &str, cwd: &Path) -> PathBuf {
    match raw {
        Some(raw) => resolve_path(raw, cwd),
        None => path.join(default),
    }
}
