use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use tempfile::TempDir;

use snptyper::config::defs::{PipelineError, RunConfig, StrainMap, MLST_REPORT};
use snptyper::utils::assembly::{assemble_unmapped_reads, assembly_stats, fastq_record_count};
use snptyper::utils::deepvariant::deepvariant;
use snptyper::utils::freebayes::{freebayes, reference_regions};
use snptyper::utils::mash::{call_mash_dist, call_mash_sketch, mash_best_ref, parse_accession_species};
use snptyper::utils::mlst::{brucella_mlst, parse_mlst_report};
use snptyper::utils::sambam::{extract_unmapped_reads, map_ref_genome, samtools_index};
use snptyper::utils::spoligo::{bait_spoligo, parse_spoligo};
use snptyper::utils::strain::Strain;
use snptyper::utils::vcf::parse_vcf;
use snptyper::{Arguments, ReferenceMapper};


// Stand-ins for the external tools. Each one understands just enough of its
// command line to write the artifact the pipeline expects.
const FAKE_TOOLS: &[(&str, &str)] = &[
    ("bwa", r#"case "$1" in
  index) for last; do :; done; printf 'BWT' > "$last.bwt" ;;
  mem) printf '@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:NC_1\tLN:8\n' ;;
esac
"#),
    ("samtools", r#"sub=$1; shift
case "$sub" in
  sort)
    out=""
    while [ $# -gt 0 ]; do
      if [ "$1" = "-o" ]; then out=$2; shift; fi
      shift
    done
    case "$out" in
      *failsort*) echo 'sort: cannot write output' >&2; exit 3 ;;
    esac
    cat > "$out" ;;
  index) for last; do :; done; printf 'BAI' > "$last.bai" ;;
  fastq) printf '@r1/1\nACGT\n+\nIIII\n@r1/2\nTTGA\n+\nIIII\n@r2\nGGCC\n+\nIIII\n' ;;
  faidx) for last; do :; done; printf 'NC_1\t8\t6\t8\t9\n' > "$last.fai" ;;
esac
"#),
    ("mash", r#"case "$1" in
  sketch)
    while [ $# -gt 0 ]; do
      if [ "$1" = "-o" ]; then out=$2; fi
      shift
    done
    printf 'MSH' > "$out.msh" ;;
  dist) printf 'NC_002945v4.fasta\tq.msh\t0.0011\t0\t933/1000\nNC_017250.fasta\tq.msh\t0.2\t1\t4/1000\n' ;;
esac
"#),
    ("skesa", r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--contigs_out" ]; then out=$2; fi
  shift
done
printf '>Contig_1\nACGTACGT\n>Contig_2\nTTTTGGGG\n' > "$out"
"#),
    ("fasta_generate_regions.py", r#"printf 'NC_1:0-8\n'
"#),
    ("freebayes-parallel", r#"for last; do :; done
case "$last" in
  *novariants*) exit 0 ;;
esac
printf '##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n'
printf 'NC_1\t3\t.\tG\tA\t812.3\t.\tAB=0;AC=2;AF=1\n'
printf 'NC_1\t5\t.\tA\tG\t90.1\t.\tAB=0;AC=2;AF=1\n'
"#),
    ("bbduk.sh", r#"for arg; do
  case "$arg" in
    stats=*) out=${arg#stats=} ;;
  esac
done
printf '#Name\tReads\tReadsPct\nspacer01\t30\t50.0%%\nspacer02\t2\t5.0%%\n' > "$out"
"#),
    ("MLSTsippr", r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-r" ]; then report=$2; fi
  shift
done
printf 'Strain,Genus,SequenceType,Matches\nB13-0234,Brucella,14,9\n' > "$report/mlst.csv"
"#),
    ("make_examples", r#"echo "make_examples $*"
"#),
    ("call_variants", r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--outfile" ]; then out=$2; fi
  shift
done
printf 'CALLS' > "$out"
"#),
    ("postprocess_variants", r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--gvcf_outfile" ]; then out=$2; fi
  shift
done
printf '##fileformat=VCFv4.2\nNC_1\t3\t.\tG\tA,<*>\t40\tPASS\t.\n' > "$out"
"#),
];

static TOOLBOX: OnceLock<TempDir> = OnceLock::new();

/// Installs the fake tools and puts them first on PATH, once per test binary.
fn toolbox() -> &'static Path {
    TOOLBOX
        .get_or_init(|| {
            let dir = tempfile::tempdir().expect("toolbox dir");
            for (name, body) in FAKE_TOOLS {
                let script = dir.path().join(name);
                fs::write(&script, format!("#!/bin/sh\n{}", body)).expect("write fake tool");
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
            }
            let path = std::env::var("PATH").unwrap_or_default();
            // Every test calls toolbox() before spawning anything, so no child reads PATH concurrently.
            unsafe { std::env::set_var("PATH", format!("{}:{}", dir.path().display(), path)) };
            dir
        })
        .path()
}

fn run_config(root: &Path, threads: usize) -> RunConfig {
    RunConfig {
        cwd: root.to_path_buf(),
        path: root.to_path_buf(),
        dependency_path: root.join("dependencies"),
        report_path: root.join("reports"),
        vcf_path: root.join("vcf_files"),
        log_file: root.join("log"),
        threads,
        args: Arguments::default(),
        start_time: Local::now(),
        run_start: Instant::now(),
    }
}

fn paired_strain(root: &Path, name: &str) -> Result<Strain> {
    let working_dir = root.join(name);
    fs::create_dir_all(&working_dir)?;
    let mut fastq_files = Vec::new();
    for read in ["R1", "R2"] {
        let fastq = working_dir.join(format!("{}_{}.fastq", name, read));
        fs::write(&fastq, "@r1\nACGT\n+\nIIII\n")?;
        fastq_files.push(fastq);
    }
    Ok(Strain { name: name.to_string(), working_dir, fastq_files })
}

fn strain_map(strains: Vec<Strain>) -> StrainMap<Strain> {
    strains.into_iter().map(|s| (s.name.clone(), s)).collect()
}

fn single(name: &str, path: PathBuf) -> StrainMap<PathBuf> {
    StrainMap::from([(name.to_string(), path)])
}


#[tokio::test]
async fn test_map_sort_index_and_assemble_unmapped() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 2);
    let strains = strain_map(vec![paired_strain(dir.path(), "13-1950")?]);
    let wd = dir.path().join("13-1950");

    let indices = single("13-1950", dir.path().join("NC_1.fasta"));
    let bams = map_ref_genome(&config, &strains, &indices, ReferenceMapper::Bwa).await?;
    let bam = &bams["13-1950"];
    assert_eq!(bam, &wd.join("13-1950_sorted.bam"));
    assert!(fs::read_to_string(bam)?.starts_with("@HD"));

    let bais = samtools_index(&config, &bams).await?;
    assert_eq!(bais["13-1950"], wd.join("13-1950_sorted.bam.bai"));

    let unmapped = extract_unmapped_reads(&config, &strains, &bams).await?;
    let fastq = &unmapped["13-1950"];
    assert_eq!(fastq, &wd.join("13-1950_unmapped.fastq"));
    // READ1, READ2 and the single read all reach the artifact.
    assert_eq!(fastq_record_count(fastq)?, 3);

    let assemblies = assemble_unmapped_reads(&config, &strains, &unmapped).await?;
    assert_eq!(assemblies["13-1950"], wd.join("13-1950_unmapped.fasta"));
    assert_eq!(assembly_stats(&assemblies)?["13-1950"], 2);

    let log = fs::read_to_string(&config.log_file)?;
    assert!(log.contains("bwa mem"));
    assert!(log.contains("| samtools sort"));
    assert!(log.contains("--use_paired_ends"));
    Ok(())
}


#[tokio::test]
async fn test_failed_sort_reports_samtools_exit() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 1);
    let strains = strain_map(vec![paired_strain(dir.path(), "failsort")?]);
    let indices = single("failsort", dir.path().join("NC_1.fasta"));

    match map_ref_genome(&config, &strains, &indices, ReferenceMapper::Bwa).await {
        Err(PipelineError::ToolExit { tool, code, stderr }) => {
            assert_eq!(tool, "samtools");
            assert_eq!(code, Some(3));
            assert!(stderr.contains("cannot write output"));
        }
        other => panic!("expected samtools ToolExit, got {:?}", other),
    }
    assert!(fs::read_to_string(&config.log_file)?.contains("samtools sort"));
    Ok(())
}


#[tokio::test]
async fn test_mash_sketch_dist_and_best_reference() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 2);
    let strains = strain_map(vec![paired_strain(dir.path(), "13-1950")?]);

    let sketches = call_mash_sketch(&config, &strains).await?;
    assert_eq!(sketches["13-1950"], dir.path().join("13-1950/13-1950_sketch.msh"));

    let ref_sketch = dir.path().join("vsnp_reference.msh");
    let missing = call_mash_dist(&config, &strains, &sketches, &ref_sketch).await;
    assert!(matches!(missing, Err(PipelineError::MissingInput(_))));

    fs::write(&ref_sketch, "MSH")?;
    let dists = call_mash_dist(&config, &strains, &sketches, &ref_sketch).await?;
    assert_eq!(dists["13-1950"], dir.path().join("13-1950/13-1950_distances.tab"));

    let species = parse_accession_species("NC_002945v4.fasta,af\n");
    let (best_refs, matches, species) = mash_best_ref(&dists, &species, 150)?;
    assert_eq!(best_refs["13-1950"], "NC_002945v4.fasta");
    assert_eq!(matches["13-1950"], 933);
    assert_eq!(species["13-1950"], "af");
    Ok(())
}


#[tokio::test]
async fn test_freebayes_regions_and_calls() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 2);
    let fasta = dir.path().join("NC_1.fasta");
    fs::write(&fasta, ">NC_1\nACGTACGT\n")?;
    let strains = strain_map(vec![
        paired_strain(dir.path(), "13-1950")?,
        paired_strain(dir.path(), "novariants")?,
    ]);
    let fastas: StrainMap<PathBuf> = strains.keys().map(|n| (n.clone(), fasta.clone())).collect();

    let regions = reference_regions(&config, &fastas).await?;
    assert_eq!(regions["13-1950"], dir.path().join("NC_1.fasta.regions"));
    assert!(dir.path().join("NC_1.fasta.fai").is_file());

    let bams = single("13-1950", dir.path().join("13-1950/13-1950_sorted.bam"));
    let vcfs = freebayes(&config, &strains, &regions, &fastas, &bams).await?;
    assert_eq!(vcfs["13-1950"], dir.path().join("13-1950/13-1950.vcf"));
    assert_eq!(parse_vcf(&vcfs)?["13-1950"], 1);

    let empty_bams = single("novariants", dir.path().join("novariants/novariants_sorted.bam"));
    match freebayes(&config, &strains, &regions, &fastas, &empty_bams).await {
        Err(PipelineError::EmptyOutput(path)) => assert_eq!(path, dir.path().join("novariants/novariants.vcf")),
        other => panic!("expected EmptyOutput, got {:?}", other),
    }
    Ok(())
}


#[tokio::test]
async fn test_deepvariant_shards_and_gvcf() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 2);
    let strains = strain_map(vec![paired_strain(dir.path(), "13-1950")?]);
    let fastas = single("13-1950", dir.path().join("NC_1.fasta"));
    let bams = single("13-1950", dir.path().join("13-1950/13-1950_sorted.bam"));

    let gvcfs = deepvariant(&config, &strains, &fastas, &bams, &dir.path().join("model.ckpt")).await?;
    assert_eq!(gvcfs["13-1950"], dir.path().join("13-1950/13-1950.gvcf.gz"));

    let log = fs::read_to_string(&config.log_file)?;
    assert!(log.contains("--task 0"));
    assert!(log.contains("--task 1"));
    assert!(log.contains("call_variants --outfile"));
    Ok(())
}


#[tokio::test]
async fn test_spoligo_baiting() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 2);
    let strains = strain_map(vec![paired_strain(dir.path(), "13-1950")?]);
    let spacers = dir.path().join("spacers.fasta");

    let missing = bait_spoligo(&config, &strains, &spacers, 25).await;
    assert!(matches!(missing, Err(PipelineError::MissingInput(_))));

    fs::write(&spacers, ">spacer01\nACGT\n")?;
    let stats = bait_spoligo(&config, &strains, &spacers, 25).await?;
    assert_eq!(stats["13-1950"], dir.path().join("13-1950/13-1950_spoligo_stats.txt"));

    let codes = parse_spoligo(&stats, 5)?;
    assert!(codes["13-1950"].binary.starts_with("10"));
    assert!(fs::read_to_string(&config.log_file)?.contains("in2="));
    Ok(())
}


#[tokio::test]
async fn test_brucella_mlst() -> Result<()> {
    toolbox();
    let dir = tempfile::tempdir()?;
    let config = run_config(dir.path(), 1);
    let db = dir.path().join("dependencies/brucella/MLST");
    let reports = dir.path().join("reports");

    let missing = brucella_mlst(&config, dir.path(), &db, &reports).await;
    assert!(matches!(missing, Err(PipelineError::MissingInput(_))));

    fs::create_dir_all(&db)?;
    let report = brucella_mlst(&config, dir.path(), &db, &reports).await?;
    assert_eq!(report, reports.join(MLST_REPORT));

    let names = vec!["B13-0234".to_string(), "13-1950".to_string()];
    let results = parse_mlst_report(&names, &report)?;
    assert_eq!(results["B13-0234"].sequence_type, "14");
    assert_eq!(results["13-1950"].sequence_type, "ND");
    Ok(())
}
