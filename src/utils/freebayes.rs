// Region-parallel variant calling with freebayes-parallel
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::defs::{PipelineError, RunConfig, SamtoolsSubcommand, StrainMap, FREEBAYES_REGION_SIZE};
use crate::utils::command::freebayes::{FastaRegionsConfig, FreebayesConfig};
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::command::{run_tool, run_tool_to_file};
use crate::utils::file::require_non_empty;
use crate::utils::strain::Strain;


fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.to_string_lossy(), suffix))
}

/// Splits each distinct reference into regions for freebayes-parallel.
///
/// # Returns
/// strain -> `<reference>.regions`
pub async fn reference_regions(
    config: &RunConfig,
    fastas: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let distinct: BTreeSet<&PathBuf> = fastas.values().collect();
    for fasta in distinct {
        let fai = sibling_with_suffix(fasta, "fai");
        if !fai.exists() {
            let call = SamtoolsConfig {
                subcommand: SamtoolsSubcommand::Faidx,
                threads: None,
                subcommand_fields: vec![],
                inputs: vec![fasta.clone()],
            };
            run_tool(&call, &config.log_file).await?;
        }
        let regions = sibling_with_suffix(fasta, "regions");
        if regions.exists() {
            debug!("Reusing {}", regions.display());
        } else {
            let call = FastaRegionsConfig { fai, region_size: FREEBAYES_REGION_SIZE };
            run_tool_to_file(&call, &regions, &config.log_file).await?;
        }
        require_non_empty(&regions)?;
    }

    Ok(fastas
        .iter()
        .map(|(name, fasta)| (name.clone(), sibling_with_suffix(fasta, "regions")))
        .collect())
}


/// Calls variants for every strain.
///
/// # Returns
/// strain -> `<wd>/<strain>.vcf`
pub async fn freebayes(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    regions: &StrainMap<PathBuf>,
    fastas: &StrainMap<PathBuf>,
    bams: &StrainMap<PathBuf>,
) -> Result<StrainMap<PathBuf>, PipelineError> {
    let mut vcfs = StrainMap::new();
    for (name, bam) in bams {
        let missing = |what: &str| PipelineError::MissingInput(format!("{} for {}", what, name));
        let strain = strains.get(name).ok_or_else(|| missing("working directory"))?;
        let call = FreebayesConfig {
            regions: regions.get(name).ok_or_else(|| missing("reference regions"))?.clone(),
            threads: config.threads,
            reference: fastas.get(name).ok_or_else(|| missing("reference genome"))?.clone(),
            bam: bam.clone(),
        };
        let vcf = strain.working_dir.join(format!("{}.vcf", name));
        info!("Calling variants for {} with freebayes", name);
        run_tool_to_file(&call, &vcf, &config.log_file).await?;
        require_non_empty(&vcf)?;
        vcfs.insert(name.clone(), vcf);
    }
    Ok(vcfs)
}
