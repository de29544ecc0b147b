// In silico spoligotyping: spacer baiting with bbduk, binary/octal/hexadecimal codes, SB code lookup
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::defs::{PipelineError, RunConfig, StrainMap, SBCODE_NOT_FOUND, SPOLIGO_DB, SPOLIGO_SPACER_COUNT};
use crate::utils::command::bbduk::BbdukConfig;
use crate::utils::command::run_tool;
use crate::utils::file::{file_path_manipulator, require_non_empty};
use crate::utils::strain::Strain;

// Bit widths of the dash-separated hexadecimal spoligotype fields.
const HEX_GROUPS: [usize; 6] = [7, 7, 7, 7, 8, 7];


#[derive(Debug, Clone, PartialEq)]
pub struct SpoligoCode {
    pub binary: String,
    pub octal: String,
    pub hexadecimal: String,
}

impl SpoligoCode {
    pub fn from_binary(binary: &str) -> Result<Self, String> {
        if binary.len() != SPOLIGO_SPACER_COUNT || binary.chars().any(|c| c != '0' && c != '1') {
            return Err(format!("Expected {} binary digits, found '{}'", SPOLIGO_SPACER_COUNT, binary));
        }
        Ok(Self {
            binary: binary.to_string(),
            octal: octal_code(binary),
            hexadecimal: hexadecimal_code(binary),
        })
    }
}

fn bits_value(bits: &[u8]) -> u32 {
    bits.iter().fold(0, |acc, &b| (acc << 1) | u32::from(b == b'1'))
}

/// 14 three-bit digits followed by the final spacer bit.
pub fn octal_code(binary: &str) -> String {
    let (body, last) = binary.split_at(binary.len() - 1);
    let mut octal: String = body
        .as_bytes()
        .chunks(3)
        .map(|chunk| char::from(b'0' + bits_value(chunk) as u8))
        .collect();
    octal.push_str(last);
    octal
}

pub fn hexadecimal_code(binary: &str) -> String {
    let bits = binary.as_bytes();
    let mut start = 0;
    let mut groups = Vec::with_capacity(HEX_GROUPS.len());
    for width in HEX_GROUPS {
        let end = (start + width).min(bits.len());
        groups.push(format!("{:X}", bits_value(&bits[start..end])));
        start = end;
    }
    groups.join("-")
}


/// Reads per spacer from a bbduk stats file; spacers bbduk did not report stay at 0.
pub fn spacer_counts(content: &str) -> Result<Vec<u64>, String> {
    let mut counts = vec![0u64; SPOLIGO_SPACER_COUNT];
    for line in content.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            return Err(format!("Expected name and read count in '{}'", line));
        }
        let digits: String = fields[0].chars().filter(|c| c.is_ascii_digit()).collect();
        let spacer: usize = match digits.parse() {
            Ok(n) if (1..=SPOLIGO_SPACER_COUNT).contains(&n) => n,
            _ => {
                debug!("Ignoring bbduk stats entry '{}'", fields[0]);
                continue;
            }
        };
        counts[spacer - 1] = fields[1].trim().parse().map_err(|_| format!("Invalid read count in '{}'", line))?;
    }
    Ok(counts)
}

pub fn binary_code(counts: &[u64], min_count: u64) -> String {
    counts.iter().map(|&c| if c >= min_count { '1' } else { '0' }).collect()
}


/// Baits spacer-containing reads from each strain.
///
/// # Returns
/// strain -> `<strain>_spoligo_stats.txt`
pub async fn bait_spoligo(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    spoligo_file: &Path,
    kmer: u32,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    if !spoligo_file.is_file() {
        return Err(PipelineError::MissingInput(format!("spacer sequences {}", spoligo_file.display())));
    }
    let mut stats = StrainMap::new();
    for (name, strain) in strains {
        let stats_file = file_path_manipulator(Path::new(name), Some(&strain.working_dir), None, Some("spoligo_stats.txt"), "_");
        let call = BbdukConfig {
            spacers: spoligo_file.to_path_buf(),
            reads: strain.fastq_files.clone(),
            kmer,
            stats: stats_file.clone(),
            threads: config.threads,
        };
        run_tool(&call, &config.log_file).await?;
        require_non_empty(&stats_file)?;
        stats.insert(name.clone(), stats_file);
    }
    Ok(stats)
}


/// Spoligotype codes for every strain's bbduk stats.
pub fn parse_spoligo(
    stats: &StrainMap<PathBuf>,
    min_count: u64,
) -> Result<StrainMap<SpoligoCode>, PipelineError> {
    let mut codes = StrainMap::new();
    for (name, stats_file) in stats {
        let content = std::fs::read_to_string(stats_file)?;
        let counts = spacer_counts(&content).map_err(|msg| PipelineError::parse(stats_file, msg))?;
        let code = SpoligoCode::from_binary(&binary_code(&counts, min_count))
            .map_err(|msg| PipelineError::parse(stats_file, msg))?;
        info!("{}: spoligotype {}", name, code.octal);
        codes.insert(name.clone(), code);
    }
    Ok(codes)
}


/// Finds `spoligotype_db.txt` in `start` or the nearest ancestor still inside `root`.
pub fn find_spoligo_db(start: &Path, root: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take_while(|dir| dir.starts_with(root))
        .map(|dir| dir.join(SPOLIGO_DB))
        .find(|candidate| candidate.is_file())
}

/// SB code whose line lists `octal`, from `SBcode octal` lines.
pub fn lookup_sbcode(db: &str, octal: &str) -> Option<String> {
    db.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        let code = tokens.next()?;
        tokens.any(|t| t == octal).then(|| code.to_string())
    })
}


/// Looks up the SB code of every strain's octal spoligotype.
///
/// # Arguments
///
/// * `dep_dirs` - strain -> folder holding the strain's reference.
/// * `octals` - strain -> octal code.
/// * `dependency_root` - Upper bound of the database search.
///
/// # Returns
/// strain -> SB code, `Not Found` when absent.
pub fn extract_sbcode(
    dep_dirs: &StrainMap<PathBuf>,
    octals: &StrainMap<String>,
    dependency_root: &Path,
) -> Result<StrainMap<String>, PipelineError> {
    let mut sbcodes = StrainMap::new();
    for (name, octal) in octals {
        let sbcode = match dep_dirs.get(name).and_then(|dir| find_spoligo_db(dir, dependency_root)) {
            Some(db) => {
                let content = std::fs::read_to_string(&db)?;
                lookup_sbcode(&content, octal)
            }
            None => {
                warn!("{}: no {} found", name, SPOLIGO_DB);
                None
            }
        };
        sbcodes.insert(name.clone(), sbcode.unwrap_or_else(|| SBCODE_NOT_FOUND.to_string()));
    }
    Ok(sbcodes)
}
