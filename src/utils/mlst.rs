// Brucella MLST with MLSTsippr and parsing of its mlst.csv report
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::{PipelineError, RunConfig, StrainMap, MLST_REPORT, NOT_DETERMINED};
use crate::utils::command::mlst::MlstConfig;
use crate::utils::command::run_tool;
use crate::utils::file::{make_path, require_non_empty};


#[derive(Debug, Clone, PartialEq)]
pub struct MlstResult {
    pub sequence_type: String,
    pub matches: String,
}

impl Default for MlstResult {
    fn default() -> Self {
        Self {
            sequence_type: NOT_DETERMINED.to_string(),
            matches: NOT_DETERMINED.to_string(),
        }
    }
}


/// Runs MLSTsippr over the sequence folder.
///
/// # Arguments
///
/// * `seqpath` - Folder holding the FASTQ files.
/// * `mlst_db_path` - Allele and profile database.
/// * `report_path` - Folder receiving `mlst.csv`.
///
/// # Returns
/// Path of `mlst.csv`.
pub async fn brucella_mlst(
    config: &RunConfig,
    seqpath: &Path,
    mlst_db_path: &Path,
    report_path: &Path,
) -> Result<PathBuf, PipelineError> {
    if !mlst_db_path.is_dir() {
        return Err(PipelineError::MissingInput(format!("MLST database {}", mlst_db_path.display())));
    }
    make_path(report_path)?;
    let call = MlstConfig {
        sequence_path: seqpath.to_path_buf(),
        target_path: mlst_db_path.to_path_buf(),
        report_path: report_path.to_path_buf(),
    };
    run_tool(&call, &config.log_file).await?;
    let report = report_path.join(MLST_REPORT);
    require_non_empty(&report)?;
    Ok(report)
}


/// Extracts sequence type and allele matches per strain from MLST CSV text.
pub fn parse_mlst_csv(content: &str) -> Result<StrainMap<MlstResult>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());
    let header = reader.headers().map_err(|e| e.to_string())?.clone();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| format!("missing '{}' column", name))
    };
    let (strain_col, st_col, matches_col) = (column("Strain")?, column("SequenceType")?, column("Matches")?);

    let mut results = StrainMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let field = |i: usize| record.get(i).filter(|f| !f.is_empty());
        let strain = match field(strain_col) {
            Some(strain) => strain.to_string(),
            None => continue,
        };
        // Allele rows following a strain row leave the Strain column empty.
        results.entry(strain).or_insert_with(|| MlstResult {
            sequence_type: field(st_col).unwrap_or(NOT_DETERMINED).to_string(),
            matches: field(matches_col).unwrap_or(NOT_DETERMINED).to_string(),
        });
    }
    Ok(results)
}


/// MLST result for every strain; strains absent from the report are `ND`.
pub fn parse_mlst_report<'a, I>(strain_names: I, mlst_report: &Path) -> Result<StrainMap<MlstResult>, PipelineError>
where
    I: IntoIterator<Item = &'a String>,
{
    let content = std::fs::read_to_string(mlst_report)?;
    let reported = parse_mlst_csv(&content).map_err(|msg| PipelineError::parse(mlst_report, msg))?;
    let mut results = StrainMap::new();
    for name in strain_names {
        let result = match reported.get(name) {
            Some(result) => result.clone(),
            None => {
                warn!("{}: not in {}", name, mlst_report.display());
                MlstResult::default()
            }
        };
        info!("{}: MLST sequence type {}", name, result.sequence_type);
        results.insert(name.clone(), result);
    }
    Ok(results)
}
