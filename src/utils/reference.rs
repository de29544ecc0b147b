// Reference lookup in the dependency tree and aligner index building
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::glob;
use log::{debug, info};

use crate::cli::ReferenceMapper;
use crate::config::defs::{PipelineError, RunConfig, StrainMap, SCRIPT_DEPENDENTS};
use crate::utils::command::bowtie2::Bowtie2BuildConfig;
use crate::utils::command::bwa::BwaIndexConfig;
use crate::utils::command::run_tool;


/// Finds `reference` anywhere below `dependency_path`.
///
/// # Returns
/// Path relative to `dependency_path`. Matches under `script_dependents` win,
/// otherwise the lexically first match.
pub fn find_reference(reference: &str, dependency_path: &Path) -> Result<PathBuf, PipelineError> {
    let pattern = dependency_path.join("**").join(reference);
    let pattern = pattern.to_string_lossy();
    let mut matches: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| PipelineError::InvalidConfig(format!("bad reference pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .filter_map(|p| p.strip_prefix(dependency_path).ok().map(Path::to_path_buf))
        .collect();
    matches.sort();

    let preferred = matches
        .iter()
        .find(|p| p.components().any(|c| c.as_os_str() == SCRIPT_DEPENDENTS))
        .or_else(|| matches.first());
    preferred
        .cloned()
        .ok_or_else(|| PipelineError::MissingInput(format!("reference {} under {}", reference, dependency_path.display())))
}


/// Locates every strain's best reference inside the dependency tree.
///
/// # Arguments
///
/// * `best_refs` - strain -> reference file name.
/// * `dependency_path` - Root of the dependency tree.
///
/// # Returns
/// strain -> reference path relative to `dependency_path`.
pub fn reference_folder(
    best_refs: &StrainMap<String>,
    dependency_path: &Path,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut found: StrainMap<PathBuf> = StrainMap::new();
    let mut cache: StrainMap<PathBuf> = StrainMap::new();
    for (name, reference) in best_refs {
        let rel = match cache.get(reference) {
            Some(rel) => rel.clone(),
            None => {
                let rel = find_reference(reference, dependency_path)?;
                debug!("{} found at {}", reference, rel.display());
                cache.insert(reference.clone(), rel.clone());
                rel
            }
        };
        found.insert(name.clone(), rel);
    }
    Ok(found)
}


/// Index prefix the mapper is invoked with for `fasta`.
pub fn index_base(fasta: &Path, mapper: ReferenceMapper) -> PathBuf {
    match mapper {
        ReferenceMapper::Bwa => fasta.to_path_buf(),
        ReferenceMapper::Bowtie2 => fasta.with_extension(""),
    }
}

fn index_exists(fasta: &Path, mapper: ReferenceMapper) -> bool {
    let base = index_base(fasta, mapper).to_string_lossy().into_owned();
    match mapper {
        ReferenceMapper::Bwa => Path::new(&format!("{}.bwt", base)).exists(),
        ReferenceMapper::Bowtie2 => Path::new(&format!("{}.1.bt2", base)).exists(),
    }
}


/// Builds aligner indices for each distinct reference, skipping existing ones.
///
/// # Arguments
///
/// * `config` - Run configuration.
/// * `ref_links` - strain -> reference path relative to the dependency root.
/// * `mapper` - Aligner whose index is needed.
///
/// # Returns
/// (strain -> index prefix, strain -> absolute reference FASTA,
///  strain -> folder holding the reference)
pub async fn index_ref_genome(
    config: &RunConfig,
    ref_links: &StrainMap<PathBuf>,
    mapper: ReferenceMapper,
) -> Result<(StrainMap<PathBuf>, StrainMap<PathBuf>, StrainMap<PathBuf>), PipelineError> {
    let distinct: BTreeSet<&PathBuf> = ref_links.values().collect();
    for rel in distinct {
        let fasta = config.dependency_path.join(rel);
        if index_exists(&fasta, mapper) {
            debug!("Reusing {:?} index for {}", mapper, fasta.display());
            continue;
        }
        info!("Indexing {} for {:?}", fasta.display(), mapper);
        match mapper {
            ReferenceMapper::Bwa => {
                run_tool(&BwaIndexConfig { reference: fasta.clone() }, &config.log_file).await?;
            }
            ReferenceMapper::Bowtie2 => {
                let call = Bowtie2BuildConfig {
                    reference: fasta.clone(),
                    index_base: index_base(&fasta, mapper),
                };
                run_tool(&call, &config.log_file).await?;
            }
        }
    }

    let mut indices = StrainMap::new();
    let mut fastas = StrainMap::new();
    let mut dep_dirs = StrainMap::new();
    for (name, rel) in ref_links {
        let fasta = config.dependency_path.join(rel);
        let dir = fasta.parent().map(Path::to_path_buf).unwrap_or_else(|| config.dependency_path.clone());
        indices.insert(name.clone(), index_base(&fasta, mapper));
        fastas.insert(name.clone(), fasta);
        dep_dirs.insert(name.clone(), dir);
    }
    Ok((indices, fastas, dep_dirs))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_reference_prefers_script_dependents() -> Result<(), PipelineError> {
        let dep = tempfile::tempdir()?;
        let plain = dep.path().join("mycobacterium/tbc/af2122");
        let scripted = dep.path().join("mycobacterium/tbc/af2122/script_dependents");
        fs::create_dir_all(&scripted)?;
        fs::write(plain.join("NC_002945v4.fasta"), ">NC\nACGT\n")?;
        fs::write(scripted.join("NC_002945v4.fasta"), ">NC\nACGT\n")?;

        let rel = find_reference("NC_002945v4.fasta", dep.path())?;
        assert_eq!(rel, PathBuf::from("mycobacterium/tbc/af2122/script_dependents/NC_002945v4.fasta"));
        assert!(rel.starts_with("mycobacterium"));
        Ok(())
    }

    #[test]
    fn test_reference_folder_missing() -> Result<(), PipelineError> {
        let dep = tempfile::tempdir()?;
        let refs = StrainMap::from([("s1".to_string(), "NC_000000.fasta".to_string())]);
        assert!(matches!(reference_folder(&refs, dep.path()), Err(PipelineError::MissingInput(_))));
        Ok(())
    }

    #[test]
    fn test_reference_folder_shared() -> Result<(), PipelineError> {
        let dep = tempfile::tempdir()?;
        let dir = dep.path().join("brucella/suis1");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("NC_017251-NC_017250.fasta"), ">a\nA\n")?;
        let refs = StrainMap::from([
            ("s1".to_string(), "NC_017251-NC_017250.fasta".to_string()),
            ("s2".to_string(), "NC_017251-NC_017250.fasta".to_string()),
        ]);
        let found = reference_folder(&refs, dep.path())?;
        assert_eq!(found["s1"], found["s2"]);
        assert_eq!(found["s1"], PathBuf::from("brucella/suis1/NC_017251-NC_017250.fasta"));
        Ok(())
    }

    #[test]
    fn test_index_base() {
        let fasta = Path::new("/dep/brucella/NC_017251-NC_017250.fasta");
        assert_eq!(index_base(fasta, ReferenceMapper::Bwa), fasta.to_path_buf());
        assert_eq!(index_base(fasta, ReferenceMapper::Bowtie2), PathBuf::from("/dep/brucella/NC_017251-NC_017250"));
        // Only the last extension goes, so versioned accessions keep distinct index bases.
        let versioned = Path::new("/dep/brucella/NC_017250.1.fasta");
        assert_eq!(index_base(versioned, ReferenceMapper::Bowtie2), PathBuf::from("/dep/brucella/NC_017250.1"));
        assert_ne!(
            index_base(versioned, ReferenceMapper::Bowtie2),
            index_base(Path::new("/dep/brucella/NC_017250.2.fasta"), ReferenceMapper::Bowtie2)
        );
    }
}
