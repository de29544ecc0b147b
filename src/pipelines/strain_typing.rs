use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::cli::{ReferenceMapper, VariantCaller};
use crate::config::defs::{
    PipelineError, RunConfig, StrainMap, BBDUK_TAG, BOWTIE2_BUILD_TAG, BOWTIE2_TAG, BRUCELLA_GENUS,
    BRUCELLA_MLST_DB, BWA_TAG, CALL_VARIANTS_TAG, FASTA_REGIONS_TAG, FREEBAYES_PARALLEL_TAG, MAKE_EXAMPLES_TAG,
    MASH_TAG, MLST_TAG, MYCOBACTERIUM_GENUS, POSTPROCESS_VARIANTS_TAG, QUALIMAP_TAG, REFERENCE_SKETCH,
    REFORMAT_TAG, SAMTOOLS_TAG, SKESA_TAG, SPECIES_ACCESSIONS, SPOLIGO_SPACERS,
};
use crate::utils::assembly::{assemble_unmapped_reads, assembly_stats};
use crate::utils::command::check_versions;
use crate::utils::deepvariant::deepvariant;
use crate::utils::file::{make_path, resolve_path};
use crate::utils::freebayes::{freebayes, reference_regions};
use crate::utils::mash::{call_mash_dist, call_mash_sketch, mash_best_ref, parse_mash_accession_species};
use crate::utils::mlst::{brucella_mlst, parse_mlst_report, MlstResult};
use crate::utils::qualimap::{parse_qualimap, run_qualimap, QualimapEntries, MAPPED_READS_KEY, MEAN_COVERAGE_KEY};
use crate::utils::reference::{index_ref_genome, reference_folder};
use crate::utils::report::{create_vcf_report, ReportRow};
use crate::utils::sambam::{extract_unmapped_reads, map_ref_genome, samtools_index};
use crate::utils::spoligo::{bait_spoligo, extract_sbcode, parse_spoligo, SpoligoCode};
use crate::utils::stats::{find_fastq_size, parse_length_histograms, parse_quality_histogram, run_reformat_reads};
use crate::utils::strain::{cleanup, file_link, file_list, strain_list, strain_namer, Strain};
use crate::utils::vcf::{copy_vcf_files, parse_gvcf, parse_vcf};


/// Tools every run needs for the chosen mapper and caller.
pub fn required_tools(mapper: ReferenceMapper, caller: VariantCaller) -> Vec<&'static str> {
    let mut tools = vec![REFORMAT_TAG, MASH_TAG, SAMTOOLS_TAG, SKESA_TAG, QUALIMAP_TAG];
    match mapper {
        ReferenceMapper::Bwa => tools.push(BWA_TAG),
        ReferenceMapper::Bowtie2 => tools.extend([BOWTIE2_TAG, BOWTIE2_BUILD_TAG]),
    }
    match caller {
        VariantCaller::Freebayes => tools.extend([FASTA_REGIONS_TAG, FREEBAYES_PARALLEL_TAG]),
        VariantCaller::Deepvariant => tools.extend([MAKE_EXAMPLES_TAG, CALL_VARIANTS_TAG, POSTPROCESS_VARIANTS_TAG]),
    }
    tools
}


/// Model checkpoint for DeepVariant runs; `None` for freebayes.
pub fn deepvariant_model(config: &RunConfig) -> Result<Option<PathBuf>, PipelineError> {
    match config.args.variant_caller {
        VariantCaller::Freebayes => Ok(None),
        VariantCaller::Deepvariant => {
            let model = config.args.deepvariant_model.as_deref().ok_or_else(|| {
                PipelineError::InvalidConfig("--deepvariant-model is required with --variant-caller deepvariant".to_string())
            })?;
            Ok(Some(resolve_path(model, &config.cwd)))
        }
    }
}


/// Runs the selected caller over every BAM.
///
/// # Returns
/// (strain -> VCF or gVCF, strain -> high-quality SNP count)
pub async fn call_variants(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    fastas: &StrainMap<PathBuf>,
    bams: &StrainMap<PathBuf>,
    model: Option<&Path>,
) -> Result<(StrainMap<PathBuf>, StrainMap<u64>), PipelineError> {
    match config.args.variant_caller {
        VariantCaller::Deepvariant => {
            let model = model.ok_or_else(|| {
                PipelineError::InvalidConfig("DeepVariant needs a model checkpoint".to_string())
            })?;
            let gvcfs = deepvariant(config, strains, fastas, bams, model).await?;
            let snps = parse_gvcf(&gvcfs);
            Ok((gvcfs, snps))
        }
        VariantCaller::Freebayes => {
            let regions = reference_regions(config, fastas).await?;
            let vcfs = freebayes(config, strains, &regions, fastas, bams).await?;
            let snps = parse_vcf(&vcfs)?;
            Ok((vcfs, snps))
        }
    }
}


/// Strains whose reference sits under the `genus` folder of the dependency tree.
pub fn genus_strains(
    strains: &StrainMap<Strain>,
    ref_links: &StrainMap<PathBuf>,
    genus: &str,
) -> StrainMap<Strain> {
    strains
        .iter()
        .filter(|(name, _)| ref_links.get(*name).map(|rel| rel.starts_with(genus)).unwrap_or(false))
        .map(|(name, strain)| (name.clone(), strain.clone()))
        .collect()
}


/// Spoligotype and SB code for the Mycobacterium strains.
async fn spoligotyping(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    dep_dirs: &StrainMap<PathBuf>,
) -> Result<(StrainMap<SpoligoCode>, StrainMap<String>), PipelineError> {
    if strains.is_empty() {
        return Ok((StrainMap::new(), StrainMap::new()));
    }
    check_versions(vec![BBDUK_TAG]).await?;
    let spacers = config.dependency_path.join(SPOLIGO_SPACERS);
    let stats = bait_spoligo(config, strains, &spacers, config.args.spoligo_kmer).await?;
    let codes = parse_spoligo(&stats, config.args.spoligo_min_count)?;
    let octals: StrainMap<String> = codes.iter().map(|(name, code)| (name.clone(), code.octal.clone())).collect();
    let sbcodes = extract_sbcode(dep_dirs, &octals, &config.dependency_path)?;
    Ok((codes, sbcodes))
}


/// Brucella MLST over the whole sequence folder, run when any strain maps to a Brucella reference.
async fn mlst_typing(
    config: &RunConfig,
    strains: &StrainMap<Strain>,
    brucella: &StrainMap<Strain>,
) -> Result<StrainMap<MlstResult>, PipelineError> {
    if brucella.is_empty() {
        return Ok(StrainMap::new());
    }
    check_versions(vec![MLST_TAG]).await?;
    let db = config.dependency_path.join(BRUCELLA_MLST_DB);
    let report = brucella_mlst(config, &config.path, &db, &config.report_path).await?;
    parse_mlst_report(strains.keys(), &report)
}


/// Per-strain results gathered by the stages, in report order.
#[derive(Default)]
struct Collected {
    species: StrainMap<String>,
    best_refs: StrainMap<String>,
    ref_matches: StrainMap<u32>,
    sizes: StrainMap<Vec<f64>>,
    average_quality: StrainMap<Vec<f64>>,
    q30: StrainMap<Vec<f64>>,
    read_lengths: StrainMap<f64>,
    qualimap: StrainMap<QualimapEntries>,
    contigs: StrainMap<u64>,
    snps: StrainMap<u64>,
    mlst: StrainMap<MlstResult>,
    spoligo: StrainMap<SpoligoCode>,
    sbcodes: StrainMap<String>,
}

impl Collected {
    fn rows(&self, strains: &StrainMap<Strain>) -> StrainMap<ReportRow> {
        strains
            .keys()
            .map(|name| {
                let qualimap = self.qualimap.get(name);
                let row = ReportRow {
                    species: self.species.get(name).cloned(),
                    reference_genome: self.best_refs.get(name).cloned(),
                    matching_hashes: self.ref_matches.get(name).copied(),
                    fastq_sizes: self.sizes.get(name).cloned().unwrap_or_default(),
                    average_quality: self.average_quality.get(name).cloned().unwrap_or_default(),
                    percent_q30: self.q30.get(name).cloned().unwrap_or_default(),
                    average_read_length: self.read_lengths.get(name).copied(),
                    mapped_reads: qualimap.and_then(|q| q.get(MAPPED_READS_KEY)).cloned(),
                    mean_coverage: qualimap.and_then(|q| q.get(MEAN_COVERAGE_KEY)).cloned(),
                    unmapped_contigs: self.contigs.get(name).copied(),
                    high_quality_snps: self.snps.get(name).copied(),
                    mlst: self.mlst.get(name).cloned(),
                    spoligo: self.spoligo.get(name).cloned(),
                    sbcode: self.sbcodes.get(name).cloned(),
                };
                (name.clone(), row)
            })
            .collect()
    }
}


/// Runs strain discovery, read QC, reference selection, mapping, assembly, variant calling,
/// typing and reporting over every FASTQ in `config.path`.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let model = deepvariant_model(&config)?;
    check_versions(required_tools(args.reference_mapper, args.variant_caller)).await?;
    make_path(&config.report_path)?;

    let mut collected = Collected::default();

    // Strain discovery
    let fastq_files = file_list(&config.path)?;
    let strain_folders = strain_list(&fastq_files);
    let strain_names = strain_namer(&strain_folders);
    let strains = file_link(&strain_folders, &strain_names)?;

    // Read QC
    let (qhists, lhists) = run_reformat_reads(&config, &strains).await?;
    (collected.average_quality, collected.q30) = parse_quality_histogram(&qhists)?;
    collected.read_lengths = parse_length_histograms(&lhists)?;
    collected.sizes = find_fastq_size(&strains)?;

    // Reference selection
    let sketches = call_mash_sketch(&config, &strains).await?;
    let ref_sketch = config.dependency_path.join(REFERENCE_SKETCH);
    let distances = call_mash_dist(&config, &strains, &sketches, &ref_sketch).await?;
    let accession_species = parse_mash_accession_species(&config.dependency_path.join(SPECIES_ACCESSIONS))?;
    (collected.best_refs, collected.ref_matches, collected.species) =
        mash_best_ref(&distances, &accession_species, args.matching_hashes)?;
    if collected.best_refs.is_empty() {
        warn!("No strain matched a reference genome with at least {} hashes", args.matching_hashes);
    }

    // Mapping
    let ref_links = reference_folder(&collected.best_refs, &config.dependency_path)?;
    let (indices, fastas, dep_dirs) = index_ref_genome(&config, &ref_links, args.reference_mapper).await?;
    let bams = map_ref_genome(&config, &strains, &indices, args.reference_mapper).await?;
    samtools_index(&config, &bams).await?;

    // Unmapped reads
    let unmapped = extract_unmapped_reads(&config, &strains, &bams).await?;
    let assemblies = assemble_unmapped_reads(&config, &strains, &unmapped).await?;
    collected.contigs = assembly_stats(&assemblies)?;

    // Mapping QC
    let qualimap_reports = run_qualimap(&config, &strains, &bams).await?;
    collected.qualimap = parse_qualimap(&qualimap_reports)?;

    // Variant calling
    let (variant_files, snps) = call_variants(&config, &strains, &fastas, &bams, model.as_deref()).await?;
    collected.snps = snps;
    copy_vcf_files(&variant_files, &config.vcf_path)?;

    // Typing
    let mycobacteria = genus_strains(&strains, &ref_links, MYCOBACTERIUM_GENUS);
    (collected.spoligo, collected.sbcodes) = spoligotyping(&config, &mycobacteria, &dep_dirs).await?;
    let brucella = genus_strains(&strains, &ref_links, BRUCELLA_GENUS);
    collected.mlst = mlst_typing(&config, &strains, &brucella).await?;

    // Report
    let report = create_vcf_report(&collected.rows(&strains), &config.report_path, config.start_time)?;
    info!("{} strains reported in {}", strains.len(), report.display());

    cleanup(&strains, args.debug)?;
    info!("Strain typing finished in {:.1} s", config.run_start.elapsed().as_secs_f64());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use chrono::Local;
    use crate::cli::Arguments;

    fn test_config(args: Arguments) -> RunConfig {
        RunConfig {
            cwd: PathBuf::from("/cwd"),
            path: PathBuf::from("/cwd/reads"),
            dependency_path: PathBuf::from("/cwd/dependencies"),
            report_path: PathBuf::from("/cwd/reads/reports"),
            vcf_path: PathBuf::from("/cwd/reads/vcf_files"),
            log_file: PathBuf::from("/cwd/reads/log"),
            threads: 1,
            args,
            start_time: Local::now(),
            run_start: Instant::now(),
        }
    }

    #[test]
    fn test_required_tools() {
        let tools = required_tools(ReferenceMapper::Bowtie2, VariantCaller::Freebayes);
        assert!(tools.contains(&BOWTIE2_BUILD_TAG));
        assert!(tools.contains(&FREEBAYES_PARALLEL_TAG));
        assert!(!tools.contains(&BWA_TAG));

        let tools = required_tools(ReferenceMapper::Bwa, VariantCaller::Deepvariant);
        assert!(tools.contains(&BWA_TAG));
        assert!(tools.contains(&CALL_VARIANTS_TAG));
        assert!(!tools.contains(&FREEBAYES_PARALLEL_TAG));
    }

    #[test]
    fn test_deepvariant_model() {
        let freebayes = test_config(Arguments::default());
        assert_eq!(deepvariant_model(&freebayes).unwrap(), None);

        let mut args = Arguments { variant_caller: VariantCaller::Deepvariant, ..Arguments::default() };
        assert!(matches!(deepvariant_model(&test_config(args.clone())), Err(PipelineError::InvalidConfig(_))));

        args.deepvariant_model = Some("models/model.ckpt".to_string());
        assert_eq!(
            deepvariant_model(&test_config(args)).unwrap(),
            Some(PathBuf::from("/cwd/models/model.ckpt"))
        );
    }

    #[tokio::test]
    async fn test_call_variants_keeps_selected_caller() {
        let args = Arguments { variant_caller: VariantCaller::Deepvariant, ..Arguments::default() };
        let config = test_config(args);
        let empty = StrainMap::new();
        let result = call_variants(&config, &StrainMap::new(), &empty, &empty, None).await;
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));

        let config = test_config(Arguments::default());
        let (vcfs, snps) = call_variants(&config, &StrainMap::new(), &empty, &empty, None).await.unwrap();
        assert!(vcfs.is_empty() && snps.is_empty());
    }

    #[test]
    fn test_genus_strains() {
        let strain = |name: &str| Strain {
            name: name.to_string(),
            working_dir: PathBuf::from(format!("/r/{}", name)),
            fastq_files: vec![],
        };
        let strains = StrainMap::from([
            ("13-1950".to_string(), strain("13-1950")),
            ("B13-0234".to_string(), strain("B13-0234")),
            ("unmatched".to_string(), strain("unmatched")),
        ]);
        let links = StrainMap::from([
            ("13-1950".to_string(), PathBuf::from("mycobacterium/tbc/af2122/script_dependents/NC_002945v4.fasta")),
            ("B13-0234".to_string(), PathBuf::from("brucella/suis1/script_dependents/NC_017251-NC_017250.fasta")),
        ]);
        let myco = genus_strains(&strains, &links, MYCOBACTERIUM_GENUS);
        assert_eq!(myco.keys().collect::<Vec<_>>(), vec!["13-1950"]);
        let brucella = genus_strains(&strains, &links, BRUCELLA_GENUS);
        assert_eq!(brucella.keys().collect::<Vec<_>>(), vec!["B13-0234"]);
    }

    #[test]
    fn test_rows_cover_every_strain() {
        let strains = StrainMap::from([(
            "s1".to_string(),
            Strain { name: "s1".to_string(), working_dir: PathBuf::from("/r/s1"), fastq_files: vec![] },
        )]);
        let mut collected = Collected::default();
        collected.snps.insert("s1".to_string(), 7);
        collected.qualimap.insert(
            "s1".to_string(),
            QualimapEntries::from([(MAPPED_READS_KEY.to_string(), "10(100%)".to_string())]),
        );
        let rows = collected.rows(&strains);
        assert_eq!(rows["s1"].high_quality_snps, Some(7));
        assert_eq!(rows["s1"].mapped_reads.as_deref(), Some("10(100%)"));
        assert_eq!(rows["s1"].mean_coverage, None);
    }
}
