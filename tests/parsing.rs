use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;

use snptyper::config::defs::StrainMap;
use snptyper::utils::mash::{best_reference, parse_accession_species, MashDistRecord};
use snptyper::utils::qualimap::{parse_qualimap_report, MAPPED_READS_KEY};
use snptyper::utils::report::{create_vcf_report, ReportRow, REPORT_HEADER};
use snptyper::utils::spoligo::{binary_code, lookup_sbcode, spacer_counts, SpoligoCode};
use snptyper::utils::strain::{file_link, file_list, group_strains, strain_list, strain_namer};


#[test]
fn test_strain_discovery_to_links() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for name in [
        "03-1057_S10_L001_R1_001.fastq.gz",
        "03-1057_S10_L001_R2_001.fastq.gz",
        "13-1941_S4_L001_R1_001.fastq.gz",
        "B13-0234.fastq.gz",
    ] {
        fs::write(dir.path().join(name), b"")?;
    }

    let files = file_list(dir.path())?;
    let names: Vec<String> = files
        .iter()
        .filter_map(|f| f.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    let grouped = group_strains(&names);
    assert_eq!(grouped.len(), 3);
    assert_eq!(grouped["03-1057"].len(), 2);

    let folders = strain_list(&files);
    let strains = file_link(&folders, &strain_namer(&folders))?;
    assert!(strains["03-1057"].is_paired());
    assert!(!strains["13-1941"].is_paired());
    assert_eq!(strains["B13-0234"].working_dir, dir.path().join("B13-0234"));
    Ok(())
}


#[test]
fn test_reference_choice_and_species() {
    let dist = "/dep/mash/NC_002945v4.fasta\ts_sketch.msh\t0.0011\t0\t933/1000\n\
                /dep/mash/NC_017251-NC_017250.fasta\ts_sketch.msh\t0.25\t1\t4/1000";
    let records: Vec<MashDistRecord> = dist.lines().filter_map(|l| MashDistRecord::parse_line(l).ok()).collect();
    let species = parse_accession_species("NC_002945v4.fasta,af\nNC_017251-NC_017250.fasta,suis1\n");

    let best = best_reference(&records, 150).map(|r| r.reference.clone());
    assert_eq!(best.as_deref(), Some("NC_002945v4.fasta"));
    assert_eq!(species.get("NC_002945v4.fasta").map(String::as_str), Some("af"));
    assert!(best_reference(&records, 1000).is_none());
}


#[test]
fn test_report_from_parsed_outputs() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let binary = "1101000000000010111111111111111111111100000";
    let mut stats = String::from("#Name\tReads\tReadsPct\n");
    for (i, bit) in binary.chars().enumerate() {
        stats.push_str(&format!("spacer{:02}\t{}\t0%\n", i + 1, if bit == '1' { 30 } else { 1 }));
    }
    let counts = spacer_counts(&stats).map_err(anyhow::Error::msg)?;
    let code = SpoligoCode::from_binary(&binary_code(&counts, 5)).map_err(anyhow::Error::msg)?;
    let sbcode = lookup_sbcode("SB0145 640013777777600\n", &code.octal);

    let qualimap = parse_qualimap_report("     number of mapped reads = 374,946 (98.59%)\n");

    let row = ReportRow {
        species: Some("af".to_string()),
        reference_genome: Some("NC_002945v4.fasta".to_string()),
        mapped_reads: qualimap.get(MAPPED_READS_KEY).cloned(),
        spoligo: Some(code),
        sbcode,
        ..ReportRow::default()
    };
    let report_dir: PathBuf = dir.path().join("reports");
    let report = create_vcf_report(&StrainMap::from([("13-1950".to_string(), row)]), &report_dir, Local::now())?;

    let content = fs::read_to_string(report)?;
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(REPORT_HEADER.join(",").as_str()));
    let fields: Vec<&str> = lines.next().unwrap_or_default().split(',').collect();
    assert_eq!(fields[0], "13-1950");
    assert_eq!(fields[8], "374946(98.59%)");
    assert_eq!(fields[14], "640013777777600");
    assert_eq!(fields[15], "SB0145");
    assert_eq!(fields[16], "68-0-5F-7F-FF-60");
    Ok(())
}
