// Reference selection: mash sketch/dist of each strain against the reference sketch database
use std::path::{Path, PathBuf};

use fxhash::FxHashMap as HashMap;
use log::{debug, info, warn};

use crate::config::defs::{MashSubcommand, PipelineError, RunConfig, StrainMap, NOT_DETERMINED};
use crate::utils::command::mash::MashConfig;
use crate::utils::command::{run_tool, run_tool_to_file};
use crate::utils::file::{file_path_manipulator, require_non_empty};
use crate::utils::strain::Strain;


/// One row of `mash dist` tabular output.
#[derive(Debug, Clone, PartialEq)]
pub struct MashDistRecord {
    pub reference: String,
    pub query: String,
    pub distance: f64,
    pub p_value: f64,
    pub matching_hashes: u32,
    pub total_hashes: u32,
}

impl MashDistRecord {
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            return Err(format!("Expected 5 columns, found {} in line: '{}'", fields.len(), line));
        }
        let reference = Path::new(fields[0])
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| fields[0].to_string());
        let distance: f64 = fields[2].trim().parse().map_err(|_| format!("Invalid distance '{}'", fields[2]))?;
        let p_value: f64 = fields[3].trim().parse().map_err(|_| format!("Invalid p-value '{}'", fields[3]))?;
        let (matching, total) = fields[4]
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("Invalid shared-hashes field '{}'", fields[4]))?;
        Ok(Self {
            reference,
            query: fields[1].to_string(),
            distance,
            p_value,
            matching_hashes: matching.parse().map_err(|_| format!("Invalid shared hashes '{}'", matching))?,
            total_hashes: total.parse().map_err(|_| format!("Invalid total hashes '{}'", total))?,
        })
    }
}


/// Sketches each strain's reads.
///
/// # Returns
/// strain -> `<strain>_sketch.msh`
pub async fn call_mash_sketch(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut sketches = StrainMap::new();
    for (name, strain) in strains {
        let prefix = file_path_manipulator(Path::new(name), Some(&strain.working_dir), None, Some("sketch"), "_");
        let sketch = PathBuf::from(format!("{}.msh", prefix.to_string_lossy()));
        if !sketch.exists() {
            let call = MashConfig {
                subcommand: MashSubcommand::Sketch,
                threads: config.threads,
                target: prefix,
                inputs: strain.fastq_files.clone(),
            };
            run_tool(&call, &config.log_file).await?;
        }
        require_non_empty(&sketch)?;
        sketches.insert(name.clone(), sketch);
    }
    info!("Sketched {} strains", sketches.len());
    Ok(sketches)
}


/// Computes distances from each strain sketch to every reference in `ref_sketch_file`.
///
/// # Returns
/// strain -> `<strain>_distances.tab`
pub async fn call_mash_dist(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    fastq_sketch_dict: &StrainMap<PathBuf>,
    ref_sketch_file: &Path,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    if !ref_sketch_file.is_file() {
        return Err(PipelineError::MissingInput(format!("reference sketch {}", ref_sketch_file.display())));
    }
    let mut dists = StrainMap::new();
    for (name, sketch) in fastq_sketch_dict {
        let strain = strains
            .get(name)
            .ok_or_else(|| PipelineError::MissingInput(format!("working directory for {}", name)))?;
        let tab = file_path_manipulator(Path::new(name), Some(&strain.working_dir), None, Some("distances.tab"), "_");
        let call = MashConfig {
            subcommand: MashSubcommand::Dist,
            threads: config.threads,
            target: ref_sketch_file.to_path_buf(),
            inputs: vec![sketch.clone()],
        };
        run_tool_to_file(&call, &tab, &config.log_file).await?;
        require_non_empty(&tab)?;
        dists.insert(name.clone(), tab);
    }
    Ok(dists)
}


/// Parses `accession,species` lines.
pub fn parse_mash_accession_species(mash_species_file: &Path) -> Result<HashMap<String, String>, PipelineError> {
    let content = std::fs::read_to_string(mash_species_file)
        .map_err(|_| PipelineError::MissingInput(format!("species accessions {}", mash_species_file.display())))?;
    Ok(parse_accession_species(&content))
}

pub fn parse_accession_species(content: &str) -> HashMap<String, String> {
    let mut accession_species = HashMap::default();
    for line in content.lines() {
        let mut fields = line.trim().splitn(2, ',');
        if let (Some(accession), Some(species)) = (fields.next(), fields.next()) {
            if !accession.is_empty() {
                accession_species.insert(accession.trim().to_string(), species.trim().to_string());
            }
        }
    }
    accession_species
}


/// Picks the closest reference with at least `min_matches` shared hashes.
/// Ties on distance go to more shared hashes, then to the reference name.
pub fn best_reference(records: &[MashDistRecord], min_matches: u32) -> Option<&MashDistRecord> {
    records
        .iter()
        .filter(|r| r.matching_hashes >= min_matches)
        .min_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(b.matching_hashes.cmp(&a.matching_hashes))
                .then(a.reference.cmp(&b.reference))
        })
}


/// Best reference, its shared-hash count, and its species for every strain.
/// Strains without a qualifying reference are left out of all three maps.
pub fn mash_best_ref(
    mash_dist_dict: &StrainMap<PathBuf>,
    accession_species_dict: &HashMap<String, String>,
    min_matches: u32,
) -> Result<(StrainMap<String>, StrainMap<u32>, StrainMap<String>), PipelineError> {
    let mut best_refs = StrainMap::new();
    let mut ref_matches = StrainMap::new();
    let mut species = StrainMap::new();

    for (name, tab) in mash_dist_dict {
        let content = std::fs::read_to_string(tab)?;
        let records = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(MashDistRecord::parse_line)
            .collect::<Result<Vec<_>, String>>()
            .map_err(|msg| PipelineError::parse(tab, msg))?;

        match best_reference(&records, min_matches) {
            Some(best) => {
                debug!("{}: {} ({} matching hashes, distance {})", name, best.reference, best.matching_hashes, best.distance);
                let strain_species = accession_species_dict
                    .get(&best.reference)
                    .cloned()
                    .unwrap_or_else(|| NOT_DETERMINED.to_string());
                best_refs.insert(name.clone(), best.reference.clone());
                ref_matches.insert(name.clone(), best.matching_hashes);
                species.insert(name.clone(), strain_species);
            }
            None => warn!("{}: no reference genome shares at least {} hashes; skipping strain", name, min_matches),
        }
    }
    Ok((best_refs, ref_matches, species))
}


#[cfg(test)]
mod tests {
    use super::*;

    const DIST: &str = "refs/NC_002945v4.fasta\t13-1950_sketch.msh\t0.0012\t0\t916/1000\n\
                        refs/NC_017251-NC_017250.fasta\t13-1950_sketch.msh\t0.2\t1e-10\t12/1000\n\
                        refs/NC_000962.fasta\t13-1950_sketch.msh\t0.0040\t0\t800/1000\n";

    #[test]
    fn test_parse_line() {
        let rec = MashDistRecord::parse_line("refs/NC_002945v4.fasta\tq.msh\t0.0012\t0\t916/1000").unwrap();
        assert_eq!(rec.reference, "NC_002945v4.fasta");
        assert_eq!(rec.matching_hashes, 916);
        assert_eq!(rec.total_hashes, 1000);
        assert!(MashDistRecord::parse_line("a\tb\t0.1").is_err());
        assert!(MashDistRecord::parse_line("a\tb\t0.1\t0\t916").is_err());
    }

    #[test]
    fn test_best_reference_threshold() {
        let records: Vec<MashDistRecord> = DIST.lines().map(|l| MashDistRecord::parse_line(l).unwrap()).collect();
        let best = best_reference(&records, 500).unwrap();
        assert_eq!(best.reference, "NC_002945v4.fasta");
        assert!(best_reference(&records, 950).is_none());
    }

    #[test]
    fn test_best_reference_tie() {
        let records = vec![
            MashDistRecord::parse_line("b.fasta\tq\t0.01\t0\t900/1000").unwrap(),
            MashDistRecord::parse_line("a.fasta\tq\t0.01\t0\t950/1000").unwrap(),
        ];
        assert_eq!(best_reference(&records, 0).unwrap().reference, "a.fasta");
    }

    #[test]
    fn test_accession_species() {
        let map = parse_accession_species("NC_002945v4.fasta,af\nNC_017251-NC_017250.fasta,suis1\n\nbad\n");
        assert_eq!(map.get("NC_002945v4.fasta").map(String::as_str), Some("af"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_mash_best_ref() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir()?;
        let tab1 = dir.path().join("13-1950_distances.tab");
        let tab2 = dir.path().join("X_distances.tab");
        std::fs::write(&tab1, DIST)?;
        std::fs::write(&tab2, "refs/NC_002945v4.fasta\tx\t0.3\t0.5\t3/1000\n")?;
        let dists = StrainMap::from([("13-1950".to_string(), tab1), ("X".to_string(), tab2)]);
        let species = parse_accession_species("NC_002945v4.fasta,af\n");

        let (best, matches, strain_species) = mash_best_ref(&dists, &species, 500)?;
        assert_eq!(best["13-1950"], "NC_002945v4.fasta");
        assert_eq!(matches["13-1950"], 916);
        assert_eq!(strain_species["13-1950"], "af");
        assert!(!best.contains_key("X"));
        Ok(())
    }
}
