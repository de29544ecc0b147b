// File helpers: gzip-aware readers, extension handling, path resolution, artifact checks
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::config::defs::PipelineError;


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Either an uncompressed or a gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Opens a file for reading, transparently decompressing gzip (bgzip included).
pub fn file_reader(path: &Path) -> io::Result<FileReader> {
    let gzipped = is_gzipped(path)?;
    let file = File::open(path)?;
    if gzipped {
        Ok(FileReader::Gzipped(MultiGzDecoder::new(file)))
    } else {
        Ok(FileReader::Uncompressed(BufReader::new(file)))
    }
}

/// Line reader over a possibly gzipped text file.
pub fn line_reader(path: &Path) -> io::Result<BufReader<FileReader>> {
    Ok(BufReader::new(file_reader(path)?))
}

/// Reads every line of a possibly gzipped text file.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    line_reader(path)?.lines().collect()
}


/// Splits a path into its stem and the list of its extensions.
/// `a/b.fastq.gz` -> (`a/b`, ["fastq", "gz"])
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();
    while let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        if ext.is_empty() || ext.chars().any(|c| !c.is_ascii_alphanumeric()) {
            break;
        }
        extensions.push(ext);
        stem.set_extension("");
    }
    extensions.reverse();
    (stem, extensions)
}


/// Builds `<dir>/<prefix><delimiter><stem><delimiter><suffix>`, skipping absent parts.
///
/// # Arguments
///
/// * `base` - Path whose file stem names the output.
/// * `dir` - Parent directory; defaults to `base`'s own parent.
/// * `prefix` - Optional leading token.
/// * `suffix` - Optional trailing token (usually carries the extension).
/// * `delimiter` - Joins the parts.
///
/// # Returns
/// New PathBuf
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let stem = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut parts: Vec<&str> = Vec::new();
    if let Some(prefix) = prefix {
        parts.push(prefix);
    }
    if !stem.is_empty() {
        parts.push(&stem);
    }
    if let Some(suffix) = suffix {
        parts.push(suffix);
    }
    let file_name = parts.join(delimiter);
    match dir {
        Some(dir) => dir.join(file_name),
        None => base.parent().map(|p| p.join(&file_name)).unwrap_or_else(|| PathBuf::from(file_name)),
    }
}


/// Resolves a user supplied directory: `~` expands to `$HOME`, relative paths are joined onto `cwd`.
pub fn resolve_path(raw: &str, cwd: &Path) -> PathBuf {
    let expanded = if raw == "~" || raw.starts_with("~/") {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(raw.trim_start_matches('~').trim_start_matches('/')),
            None => PathBuf::from(raw),
        }
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

/// Confirms an input directory exists.
pub fn validate_dir(path: &Path) -> Result<PathBuf, PipelineError> {
    if path.is_dir() {
        Ok(path.to_path_buf())
    } else {
        Err(PipelineError::InvalidPath(path.to_path_buf()))
    }
}


pub fn make_path(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::IOError(format!("{}: {}", dir.display(), e)))
}


/// File size in MiB.
pub fn file_size_mb(path: &Path) -> io::Result<f64> {
    Ok(fs::metadata(path)?.len() as f64 / 1_048_576.0)
}

pub fn is_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

/// Fails with `EmptyOutput` unless `path` exists and has content.
pub fn require_non_empty(path: &Path) -> Result<(), PipelineError> {
    if is_empty_file(path) {
        Err(PipelineError::EmptyOutput(path.to_path_buf()))
    } else {
        Ok(())
    }
}
