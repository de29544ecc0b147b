// Mapping QC with qualimap bamqc and parsing of its genome_results.txt
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{PipelineError, RunConfig, StrainMap, QUALIMAP_DIR, QUALIMAP_REPORT};
use crate::utils::command::qualimap::QualimapConfig;
use crate::utils::command::run_tool;
use crate::utils::file::{make_path, require_non_empty};
use crate::utils::strain::Strain;

pub const MAPPED_READS_KEY: &str = "MappedReads";
pub const MEAN_COVERAGE_KEY: &str = "MeanCoveragedata";

/// Normalised report key -> value.
pub type QualimapEntries = BTreeMap<String, String>;


/// Capitalises the first letter of every alphabetic run and lowercases the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(c);
            previous_alpha = false;
        }
    }
    out
}

/// `number of mapped reads = 1,234 (98.5%)` -> (`MappedReads`, `1234(98.5%)`)
pub fn normalise_entry(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(" = ")?;
    let key = key.trim().replace("number of ", "").replace('\'', "");
    let key: String = title_case(&key).chars().filter(|c| !c.is_whitespace()).collect();
    let value: String = value.chars().filter(|&c| c != ',' && !c.is_whitespace()).collect();
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Every `key = value` line of a qualimap report.
pub fn parse_qualimap_report(content: &str) -> QualimapEntries {
    content.lines().filter_map(normalise_entry).collect()
}


/// Runs qualimap bamqc on every sorted BAM.
///
/// # Returns
/// strain -> `<wd>/qualimap/genome_results.txt`
pub async fn run_qualimap(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    bams: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut reports = StrainMap::new();
    for (name, bam) in bams {
        let strain = strains
            .get(name)
            .ok_or_else(|| PipelineError::MissingInput(format!("working directory for {}", name)))?;
        let outdir = strain.working_dir.join(QUALIMAP_DIR);
        let report = outdir.join(QUALIMAP_REPORT);
        if report.exists() {
            debug!("{}: reusing {}", name, report.display());
        } else {
            make_path(&outdir)?;
            let call = QualimapConfig {
                bam: bam.clone(),
                outdir,
                threads: config.threads,
            };
            run_tool(&call, &config.log_file).await?;
        }
        require_non_empty(&report)?;
        reports.insert(name.clone(), report);
    }
    Ok(reports)
}


/// Parses every strain's qualimap report.
///
/// # Returns
/// strain -> (normalised key -> value)
pub fn parse_qualimap(
    reports: &StrainMap<PathBuf>,
) -> Result<StrainMap<QualimapEntries>, PipelineError> {
    let mut outputs = StrainMap::new();
    for (name, report) in reports {
        outputs.insert(name.clone(), parse_qualimap_file(report)?);
    }
    Ok(outputs)
}

fn parse_qualimap_file(report: &Path) -> Result<QualimapEntries, PipelineError> {
    let content = std::fs::read_to_string(report)?;
    let entries = parse_qualimap_report(&content);
    if entries.is_empty() {
        return Err(PipelineError::parse(report, "no 'key = value' lines"));
    }
    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "BamQC report\n\
                          -----------------------------------\n\
                          >>>>>>> Input\n\
                          \x20    bam file = /w/13-1950/13-1950_sorted.bam\n\
                          >>>>>>> Reference\n\
                          \x20    number of bases = 4,349,904 bp\n\
                          \x20    number of contigs = 1\n\
                          >>>>>>> Globals\n\
                          \x20    number of reads = 380,312\n\
                          \x20    number of mapped reads = 374,946 (98.59%)\n\
                          \x20    mean mapping quality = 41.2\n\
                          >>>>>>> Coverage\n\
                          \x20    mean coverageData = 22.67X\n\
                          \x20    std coverageData = 8.0X\n\
                          \x20    There is a 97.1% of reference with a coverageData >= 5X\n";

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("mapped reads"), "Mapped Reads");
        assert_eq!(title_case("mean coverageData"), "Mean Coveragedata");
        assert_eq!(title_case("gc percentage"), "Gc Percentage");
    }

    #[test]
    fn test_normalise_entry() {
        assert_eq!(
            normalise_entry("     number of mapped reads = 1,234 (98.5%)"),
            Some(("MappedReads".to_string(), "1234(98.5%)".to_string()))
        );
        assert_eq!(normalise_entry(">>>>>>> Globals"), None);
    }

    #[test]
    fn test_parse_report() {
        let entries = parse_qualimap_report(REPORT);
        assert_eq!(entries[MAPPED_READS_KEY], "374946(98.59%)");
        assert_eq!(entries[MEAN_COVERAGE_KEY], "22.67X");
        assert_eq!(entries["Bases"], "4349904bp");
        assert_eq!(entries["BamFile"], "/w/13-1950/13-1950_sorted.bam");
        let mapped: u64 = entries[MAPPED_READS_KEY].split('(').next().unwrap().parse().unwrap();
        assert!(mapped >= 370_000);
    }

    #[test]
    fn test_parse_qualimap_files() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("genome_results.txt");
        std::fs::write(&good, REPORT)?;
        let parsed = parse_qualimap(&StrainMap::from([("13-1950".to_string(), good)]))?;
        assert_eq!(parsed["13-1950"]["Contigs"], "1");

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, "nothing here\n")?;
        assert!(parse_qualimap(&StrainMap::from([("x".to_string(), bad)])).is_err());
        Ok(())
    }
}
