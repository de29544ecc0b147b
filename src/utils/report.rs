// vcf_report.csv: one row per strain merging QC, reference, variant and typing results
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;

use crate::config::defs::{PipelineError, StrainMap, NOT_DETERMINED, VCF_REPORT};
use crate::utils::file::make_path;
use crate::utils::mlst::MlstResult;
use crate::utils::spoligo::SpoligoCode;

pub const REPORT_HEADER: [&str; 18] = [
    "Strain",
    "Species",
    "ReferenceGenome",
    "ReferenceMatchingHashes",
    "FastqSize(MB)",
    "AverageQuality",
    "PercentQ30",
    "AverageReadLength",
    "MappedReads",
    "MeanCoverage",
    "UnmappedContigs",
    "HighQualitySNPs",
    "MLST_SequenceType",
    "MLST_Matches",
    "SpoligoOctal",
    "SBCode",
    "SpoligoHexadecimal",
    "SpoligoBinary",
];


#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportRow {
    pub species: Option<String>,
    pub reference_genome: Option<String>,
    pub matching_hashes: Option<u32>,
    pub fastq_sizes: Vec<f64>,
    pub average_quality: Vec<f64>,
    pub percent_q30: Vec<f64>,
    pub average_read_length: Option<f64>,
    pub mapped_reads: Option<String>,
    pub mean_coverage: Option<String>,
    pub unmapped_contigs: Option<u64>,
    pub high_quality_snps: Option<u64>,
    pub mlst: Option<MlstResult>,
    pub spoligo: Option<SpoligoCode>,
    pub sbcode: Option<String>,
}

fn or_nd<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| NOT_DETERMINED.to_string())
}

fn joined(values: &[f64]) -> String {
    if values.is_empty() {
        return NOT_DETERMINED.to_string();
    }
    values.iter().map(|v| format!("{:.2}", v)).collect::<Vec<_>>().join(";")
}

impl ReportRow {
    /// Report fields in `REPORT_HEADER` order.
    pub fn fields(&self, strain: &str) -> Vec<String> {
        let spoligo = self.spoligo.as_ref();
        vec![
            strain.to_string(),
            or_nd(self.species.as_ref()),
            or_nd(self.reference_genome.as_ref()),
            or_nd(self.matching_hashes),
            joined(&self.fastq_sizes),
            joined(&self.average_quality),
            joined(&self.percent_q30),
            or_nd(self.average_read_length.map(|l| format!("{:.2}", l))),
            or_nd(self.mapped_reads.as_ref()),
            or_nd(self.mean_coverage.as_ref()),
            or_nd(self.unmapped_contigs),
            or_nd(self.high_quality_snps),
            or_nd(self.mlst.as_ref().map(|m| &m.sequence_type)),
            or_nd(self.mlst.as_ref().map(|m| &m.matches)),
            or_nd(spoligo.map(|s| &s.octal)),
            or_nd(self.sbcode.as_ref()),
            or_nd(spoligo.map(|s| &s.hexadecimal)),
            or_nd(spoligo.map(|s| &s.binary)),
        ]
    }
}


/// Writes `<report_path>/vcf_report.csv`.
///
/// # Arguments
///
/// * `rows` - strain -> merged results.
/// * `report_path` - Output folder, created if needed.
/// * `start_time` - Run start, logged with the elapsed time.
///
/// # Returns
/// Path of the report.
pub fn create_vcf_report(
    rows: &StrainMap<ReportRow>,
    report_path: &Path,
    start_time: DateTime<Local>,
) -> Result<PathBuf, PipelineError> {
    make_path(report_path)?;
    let report = report_path.join(VCF_REPORT);
    let mut writer = csv::Writer::from_path(&report)?;
    writer.write_record(REPORT_HEADER)?;
    for (strain, row) in rows {
        writer.write_record(row.fields(strain))?;
    }
    writer.flush()?;

    let elapsed = Local::now().signed_duration_since(start_time);
    info!(
        "Report written to {}; run started {} ({} s elapsed)",
        report.display(),
        start_time.format("%Y-%m-%d %H:%M:%S"),
        elapsed.num_seconds()
    );
    Ok(report)
}
