/// Read QC: reformat.sh histograms, their parsing, and FASTQ sizes
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::defs::{PipelineError, RunConfig, StrainMap, QUALITY_THRESHOLD};
use crate::utils::command::reformat::ReformatConfig;
use crate::utils::command::run_tool;
use crate::utils::file::{extension_remover, file_path_manipulator, file_size_mb, require_non_empty};
use crate::utils::strain::Strain;
use crate::utils::system::fan_out;


/// Base quality summary from one quality-count histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySummary {
    pub average_quality: f64,
    pub percent_over_threshold: f64,
}


/// Parses a BBTools `qchist` (quality value -> base count) table.
///
/// # Arguments
///
/// * `content` - File body; `#` lines are headers.
/// * `threshold` - Quality at or above which bases count as high quality.
///
/// # Returns
/// Mean base quality and percent of bases at or above `threshold`.
pub fn parse_qchist(content: &str, threshold: u32) -> Result<QualitySummary, String> {
    let mut total_bases: u64 = 0;
    let mut weighted: f64 = 0.0;
    let mut over_threshold: u64 = 0;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split('\t');
        let quality: u32 = fields
            .next()
            .and_then(|q| q.trim().parse().ok())
            .ok_or_else(|| format!("Invalid quality in line: '{}'", line))?;
        let count: u64 = fields
            .next()
            .and_then(|c| c.trim().parse().ok())
            .ok_or_else(|| format!("Invalid count in line: '{}'", line))?;
        total_bases += count;
        weighted += quality as f64 * count as f64;
        if quality >= threshold {
            over_threshold += count;
        }
    }

    if total_bases == 0 {
        return Ok(QualitySummary { average_quality: 0.0, percent_over_threshold: 0.0 });
    }
    Ok(QualitySummary {
        average_quality: weighted / total_bases as f64,
        percent_over_threshold: over_threshold as f64 / total_bases as f64 * 100.0,
    })
}


/// Parses a BBTools `lhist` (read length -> read count) table.
///
/// # Returns
/// (sum of read lengths, number of reads)
pub fn parse_lhist(content: &str) -> Result<(u64, u64), String> {
    let mut total_length: u64 = 0;
    let mut reads: u64 = 0;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < 2 {
            return Err(format!("Expected length and count, found '{}'", line));
        }
        let length: u64 = fields[0].trim().parse().map_err(|_| format!("Invalid length in '{}'", line))?;
        let count: u64 = fields[1].trim().parse().map_err(|_| format!("Invalid count in '{}'", line))?;
        total_length += length * count;
        reads += count;
    }
    Ok((total_length, reads))
}


fn histogram_paths(strain: &Strain, fastq: &Path) -> (PathBuf, PathBuf) {
    let (stem, _) = extension_remover(fastq);
    let qchist = file_path_manipulator(&stem, Some(&strain.working_dir), None, Some("qchist.csv"), "_");
    let lhist = file_path_manipulator(&stem, Some(&strain.working_dir), None, Some("lhist.csv"), "_");
    (qchist, lhist)
}

/// Runs reformat.sh once per FASTQ file to produce quality and length histograms.
///
/// # Returns
/// (strain -> qchist paths, strain -> lhist paths), both in FASTQ order.
pub async fn run_reformat_reads(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
) -> Result<(StrainMap<Vec<PathBuf>>, StrainMap<Vec<PathBuf>>), PipelineError> {
    let histograms = fan_out(
        strains.iter().map(|(name, strain)| (name.clone(), strain)),
        config.threads,
        |name, strain| async move {
            let mut qchists = Vec::new();
            let mut lhists = Vec::new();
            for fastq in &strain.fastq_files {
                let (qchist, lhist) = histogram_paths(strain, fastq);
                if qchist.exists() && lhist.exists() {
                    debug!("{}: reusing {}", name, qchist.display());
                } else {
                    let call = ReformatConfig {
                        input: fastq.clone(),
                        qchist: qchist.clone(),
                        lhist: lhist.clone(),
                    };
                    run_tool(&call, &config.log_file).await?;
                }
                require_non_empty(&qchist)?;
                require_non_empty(&lhist)?;
                qchists.push(qchist);
                lhists.push(lhist);
            }
            Ok((qchists, lhists))
        },
    )
        .await?;

    let mut qhist_map = StrainMap::new();
    let mut lhist_map = StrainMap::new();
    for (name, (qchists, lhists)) in histograms {
        qhist_map.insert(name.clone(), qchists);
        lhist_map.insert(name, lhists);
    }
    info!("Read quality histograms created for {} strains", qhist_map.len());
    Ok((qhist_map, lhist_map))
}


/// Average base quality and percent of bases >= Q30 for each of a strain's histograms.
pub fn parse_quality_histogram(
    strain_qhist_dict: &StrainMap<Vec<PathBuf>>,
) -> Result<(StrainMap<Vec<f64>>, StrainMap<Vec<f64>>), PipelineError> {
    let mut average_quality = StrainMap::new();
    let mut qual_over_thirty = StrainMap::new();
    for (name, qchists) in strain_qhist_dict {
        let mut averages = Vec::with_capacity(qchists.len());
        let mut over = Vec::with_capacity(qchists.len());
        for qchist in qchists {
            let content = std::fs::read_to_string(qchist)?;
            let summary = parse_qchist(&content, QUALITY_THRESHOLD)
                .map_err(|msg| PipelineError::parse(qchist, msg))?;
            averages.push(summary.average_quality);
            over.push(summary.percent_over_threshold);
        }
        average_quality.insert(name.clone(), averages);
        qual_over_thirty.insert(name.clone(), over);
    }
    Ok((average_quality, qual_over_thirty))
}


/// Mean read length over all of a strain's length histograms.
pub fn parse_length_histograms(
    strain_lhist_dict: &StrainMap<Vec<PathBuf>>,
) -> Result<StrainMap<f64>, PipelineError> {
    let mut avg_read_lengths = StrainMap::new();
    for (name, lhists) in strain_lhist_dict {
        let mut total_length = 0u64;
        let mut reads = 0u64;
        for lhist in lhists {
            let content = std::fs::read_to_string(lhist)?;
            let (length, count) = parse_lhist(&content).map_err(|msg| PipelineError::parse(lhist, msg))?;
            total_length += length;
            reads += count;
        }
        let average = if reads == 0 { 0.0 } else { total_length as f64 / reads as f64 };
        avg_read_lengths.insert(name.clone(), average);
    }
    Ok(avg_read_lengths)
}


/// FASTQ sizes in MiB, following symlinks to the original files.
pub fn find_fastq_size(strains: &StrainMap<Strain>) -> Result<StrainMap<Vec<f64>>, PipelineError> {
    let mut sizes = StrainMap::new();
    for (name, strain) in strains {
        let strain_sizes = strain
            .fastq_files
            .iter()
            .map(|f| file_size_mb(f))
            .collect::<std::io::Result<Vec<f64>>>()?;
        sizes.insert(name.clone(), strain_sizes);
    }
    Ok(sizes)
}
