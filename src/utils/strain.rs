// Strain discovery: FASTQ listing, strain naming from file name conventions, working dirs
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::config::defs::{PipelineError, StrainMap, FASTQ_EXTS};
use crate::utils::file::{extension_remover, make_path};

lazy_static! {
    // Tried in order; the strain name is everything before the first hit.
    static ref STRAIN_NAME_PATTERNS: Vec<Regex> = vec![
        // Raw Illumina: <strain>_S10_L001_R1_001.fastq.gz
        Regex::new(r"_S\d+_L001").unwrap(),
        Regex::new(r"_R\d_001").unwrap(),
        Regex::new(r"_R\d\.f(ast)?q").unwrap(),
        Regex::new(r"[-_]\d\.f(ast)?q").unwrap(),
        Regex::new(r"\.f(ast)?q").unwrap(),
    ];
}

/// A strain, its private working directory and its linked read files.
#[derive(Debug, Clone, PartialEq)]
pub struct Strain {
    pub name: String,
    pub working_dir: PathBuf,
    pub fastq_files: Vec<PathBuf>,
}

impl Strain {
    pub fn is_paired(&self) -> bool {
        self.fastq_files.len() == 2
    }
}


fn is_fastq(path: &Path) -> bool {
    let (_, extensions) = extension_remover(path);
    extensions
        .iter()
        .any(|ext| FASTQ_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)))
}

/// Lists the FASTQ files directly inside `path`, sorted.
///
/// # Arguments
///
/// * `path` - Sequence folder.
///
/// # Returns
/// Sorted FASTQ paths; `MissingInput` when there are none.
pub fn file_list(path: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut fastq_files: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|_| PipelineError::InvalidPath(path.to_path_buf()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_fastq(p))
        .collect();
    if fastq_files.is_empty() {
        return Err(PipelineError::MissingInput(format!(
            "no FASTQ files found in {}",
            path.display()
        )));
    }
    fastq_files.sort();
    Ok(fastq_files)
}


/// Derives a strain name from a FASTQ file name.
///
/// `03-1057_S10_L001_R1_001.fastq.gz`, `03-1057_R1.fastq.gz`, `03-1057_1.fastq`
/// and `03-1057.fastq.gz` all yield `03-1057`.
pub fn strain_name(file_name: &str) -> String {
    for pattern in STRAIN_NAME_PATTERNS.iter() {
        if let Some(m) = pattern.find(file_name) {
            return file_name[..m.start()].to_string();
        }
    }
    file_name.to_string()
}

/// Groups file names by strain name.
pub fn group_strains(file_names: &[String]) -> StrainMap<Vec<String>> {
    let mut grouped: StrainMap<Vec<String>> = StrainMap::new();
    for file_name in file_names {
        grouped
            .entry(strain_name(file_name))
            .or_default()
            .push(file_name.clone());
    }
    grouped
}

/// Distinct strain names present in `file_names`.
pub fn strain_set(file_names: &[String]) -> BTreeSet<String> {
    file_names.iter().map(|f| strain_name(f)).collect()
}


/// Groups FASTQ files into per-strain folders `<parent>/<strain>`.
///
/// # Returns
/// strain folder -> FASTQ files of that strain (the folders are not created here).
pub fn strain_list(fastq_files: &[PathBuf]) -> StrainMap<Vec<PathBuf>> {
    let mut strain_folders: StrainMap<Vec<PathBuf>> = StrainMap::new();
    for fastq in fastq_files {
        let file_name = match fastq.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let parent = fastq.parent().unwrap_or_else(|| Path::new("."));
        let folder = parent.join(strain_name(&file_name));
        strain_folders
            .entry(folder.to_string_lossy().into_owned())
            .or_default()
            .push(fastq.clone());
    }
    strain_folders
}

/// Maps each strain name to its working folder.
pub fn strain_namer(strain_folders: &StrainMap<Vec<PathBuf>>) -> StrainMap<PathBuf> {
    strain_folders
        .keys()
        .filter_map(|folder| {
            let folder = PathBuf::from(folder);
            let name = folder.file_name()?.to_string_lossy().into_owned();
            Some((name, folder))
        })
        .collect()
}


/// Creates each strain working folder and symlinks the strain's FASTQ files into it.
///
/// # Arguments
///
/// * `strain_folders` - Output of `strain_list`.
/// * `strain_names` - Output of `strain_namer`.
///
/// # Returns
/// strain -> Strain with the linked FASTQ paths.
pub fn file_link(
    strain_folders: &StrainMap<Vec<PathBuf>>,
    strain_names: &StrainMap<PathBuf>,
) -> Result<StrainMap<Strain>, PipelineError> {
    let mut strains: StrainMap<Strain> = StrainMap::new();
    for (name, working_dir) in strain_names {
        let key = working_dir.to_string_lossy().into_owned();
        let fastq_files = strain_folders
            .get(&key)
            .ok_or_else(|| PipelineError::MissingInput(format!("no FASTQ files for strain {}", name)))?;
        make_path(working_dir)?;

        let mut links = Vec::with_capacity(fastq_files.len());
        for fastq in fastq_files {
            let file_name = fastq
                .file_name()
                .ok_or_else(|| PipelineError::InvalidPath(fastq.clone()))?;
            let link = working_dir.join(file_name);
            if fs::symlink_metadata(&link).is_err() {
                let target = fs::canonicalize(fastq)?;
                symlink(&target, &link)?;
                debug!("Linked {} -> {}", link.display(), target.display());
            }
            links.push(link);
        }
        links.sort();
        strains.insert(
            name.clone(),
            Strain {
                name: name.clone(),
                working_dir: working_dir.clone(),
                fastq_files: links,
            },
        );
    }
    info!("Found {} strains", strains.len());
    Ok(strains)
}

/// Removes every strain working directory unless `keep` is set.
pub fn cleanup(strains: &StrainMap<Strain>, keep: bool) -> Result<(), PipelineError> {
    if keep {
        info!("Keeping {} strain working directories", strains.len());
        return Ok(());
    }
    for strain in strains.values() {
        if strain.working_dir.is_dir() {
            fs::remove_dir_all(&strain.working_dir)
                .map_err(|e| PipelineError::IOError(format!("{}: {}", strain.working_dir.display(), e)))?;
            debug!("Removed {}", strain.working_dir.display());
        }
    }
    Ok(())
}


#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<(), PipelineError> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| PipelineError::IOError(format!("symlink {}: {}", link.display(), e)))
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<(), PipelineError> {
    fs::copy(target, link)
        .map(|_| ())
        .map_err(|e| PipelineError::IOError(format!("copy {}: {}", link.display(), e)))
}
