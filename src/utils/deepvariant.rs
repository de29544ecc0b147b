// DeepVariant as three native stages: sharded make_examples, call_variants, postprocess_variants
use std::path::{Path, PathBuf};

use log::info;

use crate::config::defs::{PipelineError, RunConfig, StrainMap};
use crate::utils::command::deepvariant::{CallVariantsConfig, MakeExamplesConfig, PostprocessVariantsConfig};
use crate::utils::command::run_tool;
use crate::utils::file::{file_path_manipulator, require_non_empty};
use crate::utils::strain::Strain;
use crate::utils::system::fan_out;


/// Intermediate and final files of one strain's DeepVariant run.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepVariantPaths {
    pub examples: PathBuf,
    pub gvcf_records: PathBuf,
    pub call_output: PathBuf,
    pub vcf: PathBuf,
    pub gvcf: PathBuf,
}

impl DeepVariantPaths {
    pub fn new(strain: &Strain) -> Self {
        let in_wd = |suffix: &str| {
            file_path_manipulator(Path::new(&strain.name), Some(&strain.working_dir), None, Some(suffix), "_")
        };
        Self {
            examples: in_wd("make_examples.tfrecord"),
            gvcf_records: in_wd("gvcf.tfrecord"),
            call_output: in_wd("call_variants_output.tfrecord.gz"),
            vcf: strain.working_dir.join(format!("{}.vcf.gz", strain.name)),
            gvcf: strain.working_dir.join(format!("{}.gvcf.gz", strain.name)),
        }
    }
}


/// Runs every make_examples shard for one strain, `shards` at a time.
async fn make_examples(
    config: &RunConfig,
    paths: &DeepVariantPaths,
    reference: &Path,
    bam: &Path,
    shards: usize,
) -> Result<(), PipelineError> {
    let tasks = (0..shards).map(|task| (task.to_string(), task));
    fan_out(tasks, shards, |_label, task| async move {
        let call = MakeExamplesConfig {
            reference: reference.to_path_buf(),
            bam: bam.to_path_buf(),
            examples: paths.examples.clone(),
            gvcf: paths.gvcf_records.clone(),
            task,
            shards,
        };
        run_tool(&call, &config.log_file).await
    })
        .await?;
    Ok(())
}


/// Calls variants for every strain with DeepVariant.
///
/// # Arguments
///
/// * `config` - Run configuration; `threads` sets the number of make_examples shards.
/// * `strains` - Strain working directories.
/// * `fastas` - strain -> reference FASTA.
/// * `bams` - strain -> sorted, indexed BAM.
/// * `model` - call_variants model checkpoint.
///
/// # Returns
/// strain -> `<wd>/<strain>.gvcf.gz`
pub async fn deepvariant(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    fastas: &StrainMap<PathBuf>,
    bams: &StrainMap<PathBuf>,
    model: &Path,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let shards = config.threads.max(1);
    let mut gvcfs = StrainMap::new();
    for (name, bam) in bams {
        let missing = |what: &str| PipelineError::MissingInput(format!("{} for {}", what, name));
        let strain = strains.get(name).ok_or_else(|| missing("working directory"))?;
        let reference = fastas.get(name).ok_or_else(|| missing("reference genome"))?;
        let paths = DeepVariantPaths::new(strain);

        info!("Calling variants for {} with DeepVariant ({} shards)", name, shards);
        make_examples(config, &paths, reference, bam, shards).await?;

        let call = CallVariantsConfig {
            outfile: paths.call_output.clone(),
            examples: paths.examples.clone(),
            shards,
            checkpoint: model.to_path_buf(),
        };
        run_tool(&call, &config.log_file).await?;
        require_non_empty(&paths.call_output)?;

        let post = PostprocessVariantsConfig {
            reference: reference.clone(),
            infile: paths.call_output.clone(),
            outfile: paths.vcf.clone(),
            gvcf_records: paths.gvcf_records.clone(),
            shards,
            gvcf_outfile: paths.gvcf.clone(),
        };
        run_tool(&post, &config.log_file).await?;
        require_non_empty(&paths.gvcf)?;
        gvcfs.insert(name.clone(), paths.gvcf);
    }
    Ok(gvcfs)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::ToolCall;

    #[test]
    fn test_paths() {
        let strain = Strain {
            name: "13-1950".to_string(),
            working_dir: PathBuf::from("/w/13-1950"),
            fastq_files: vec![],
        };
        let paths = DeepVariantPaths::new(&strain);
        assert_eq!(paths.examples, PathBuf::from("/w/13-1950/13-1950_make_examples.tfrecord"));
        assert_eq!(paths.gvcf, PathBuf::from("/w/13-1950/13-1950.gvcf.gz"));

        let post = PostprocessVariantsConfig {
            reference: PathBuf::from("/dep/NC_1.fasta"),
            infile: paths.call_output.clone(),
            outfile: paths.vcf.clone(),
            gvcf_records: paths.gvcf_records.clone(),
            shards: 4,
            gvcf_outfile: paths.gvcf.clone(),
        };
        let args = post.args();
        assert!(args.contains(&"/w/13-1950/13-1950_gvcf.tfrecord@4.gz".to_string()));
        assert!(args.contains(&"/w/13-1950/13-1950_call_variants_output.tfrecord.gz".to_string()));
    }
}
