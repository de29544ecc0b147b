// High-quality SNP counting for freebayes VCFs and DeepVariant gVCFs, and VCF collection
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::{PipelineError, StrainMap, HIGH_QUALITY_SNP_QUAL};
use crate::utils::file::{line_reader, make_path};


/// The fixed leading columns of a VCF data line.
#[derive(Debug, Clone, PartialEq)]
pub struct VcfRecord<'a> {
    pub chrom: &'a str,
    pub pos: &'a str,
    pub reference: &'a str,
    pub alt: &'a str,
    pub qual: Option<f64>,
    pub filter: &'a str,
    pub info: &'a str,
}

impl<'a> VcfRecord<'a> {
    /// None for headers, blank lines and lines with fewer than 8 columns.
    pub fn parse(line: &'a str) -> Option<Self> {
        if line.starts_with('#') || line.trim().is_empty() {
            return None;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return None;
        }
        Some(Self {
            chrom: fields[0],
            pos: fields[1],
            reference: fields[3],
            alt: fields[4],
            qual: fields[5].parse().ok(),
            filter: fields[6],
            info: fields[7],
        })
    }

    fn info_has(&self, entry: &str) -> bool {
        self.info.split(';').any(|e| e == entry)
    }
}


/// High-quality homozygous SNP as freebayes reports it: QUAL > 150, `AC=2`, single-base REF and ALT.
pub fn is_high_quality_snp(record: &VcfRecord) -> bool {
    record.qual.map(|q| q > HIGH_QUALITY_SNP_QUAL).unwrap_or(false)
        && record.info_has("AC=2")
        && record.reference.len() == 1
        && record.alt.len() == 1
}

/// Passing single-base substitution in a DeepVariant gVCF; the `<*>` placeholder allele is ignored.
pub fn is_passing_gvcf_snp(record: &VcfRecord) -> bool {
    if record.filter != "PASS" || record.reference.len() != 1 {
        return false;
    }
    let alts: Vec<&str> = record.alt.split(',').filter(|a| *a != "<*>").collect();
    alts.len() == 1 && alts[0].len() == 1
}


fn count_records<F>(path: &Path, keep: F) -> Result<u64, PipelineError>
where
    F: Fn(&VcfRecord) -> bool,
{
    let mut count = 0u64;
    for line in line_reader(path)?.lines() {
        let line = line?;
        if let Some(record) = VcfRecord::parse(&line) {
            if keep(&record) {
                count += 1;
            }
        }
    }
    Ok(count)
}


/// Counts high-quality SNPs in each freebayes VCF.
pub fn parse_vcf(vcfs: &StrainMap<PathBuf>) -> Result<StrainMap<u64>, PipelineError> {
    let mut snps = StrainMap::new();
    for (name, vcf) in vcfs {
        let count = count_records(vcf, is_high_quality_snp)?;
        info!("{}: {} high quality SNPs", name, count);
        snps.insert(name.clone(), count);
    }
    Ok(snps)
}


/// Counts passing SNPs in each DeepVariant gVCF (plain or gzipped).
/// A missing or unreadable file counts as 0.
pub fn parse_gvcf(gvcfs: &StrainMap<PathBuf>) -> StrainMap<u64> {
    let mut snps = StrainMap::new();
    for (name, gvcf) in gvcfs {
        let count = match count_records(gvcf, is_passing_gvcf_snp) {
            Ok(count) => count,
            Err(e) => {
                warn!("{}: could not read {}: {}", name, gvcf.display(), e);
                0
            }
        };
        info!("{}: {} high quality SNPs", name, count);
        snps.insert(name.clone(), count);
    }
    snps
}


/// Copies each strain's variant file into `vcf_path`.
///
/// # Returns
/// strain -> copied file
pub fn copy_vcf_files(vcfs: &StrainMap<PathBuf>, vcf_path: &Path) -> Result<StrainMap<PathBuf>, PipelineError> {
    make_path(vcf_path)?;
    let mut copies = StrainMap::new();
    for (name, vcf) in vcfs {
        let file_name = vcf.file_name().ok_or_else(|| PipelineError::InvalidPath(vcf.clone()))?;
        let target = vcf_path.join(file_name);
        fs::copy(vcf, &target)
            .map_err(|e| PipelineError::IOError(format!("copy {} to {}: {}", vcf.display(), target.display(), e)))?;
        copies.insert(name.clone(), target);
    }
    Ok(copies)
}
