use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum ReferenceMapper {
    Bwa,
    #[default]
    Bowtie2,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum VariantCaller {
    #[default]
    Freebayes,
    Deepvariant,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "snptyper", version, about = "Reference selection, variant calling and typing of bacterial isolates")]
pub struct Arguments {

    #[arg(short = 'p', long = "path", help = "Folder containing the FASTQ files to process. Strain working directories are created here.")]
    pub path: String,

    #[arg(short = 't', long, default_value_t = 64)]
    pub threads: usize,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'd', long = "debug", action, help = "Keep the strain working directories after the run")]
    pub debug: bool,

    #[arg(long = "reference-mapper", default_value = "bowtie2", value_enum)]
    pub reference_mapper: ReferenceMapper,

    #[arg(long = "variant-caller", default_value = "freebayes", value_enum)]
    pub variant_caller: VariantCaller,

    #[arg(long = "matching-hashes", default_value_t = 150, help = "Minimum number of shared mash hashes for a reference genome to be considered")]
    pub matching_hashes: u32,

    #[arg(long = "dependency-path", default_value = "dependencies")]
    pub dependency_path: String,

    #[arg(long = "spoligo-kmer", default_value_t = 25)]
    pub spoligo_kmer: u32,

    #[arg(long = "spoligo-min-count", default_value_t = 5, help = "Baited reads needed to call a spacer present")]
    pub spoligo_min_count: u64,

    #[arg(long = "deepvariant-model", help = "call_variants model checkpoint; required with --variant-caller deepvariant")]
    pub deepvariant_model: Option<String>,

    #[arg(long = "report-path", help = "Report folder. Defaults to '<path>/reports'.")]
    pub report_path: Option<String>,

    #[arg(long = "vcf-path", help = "Folder receiving a copy of every variant file. Defaults to '<path>/vcf_files'.")]
    pub vcf_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Arguments::parse_from(["snptyper", "-p", "reads"]);
        assert_eq!(args.path, "reads");
        assert_eq!(args.reference_mapper, ReferenceMapper::Bowtie2);
        assert_eq!(args.variant_caller, VariantCaller::Freebayes);
        assert_eq!(args.matching_hashes, 150);
        assert_eq!(args.spoligo_kmer, 25);
        assert!(!args.debug);
    }

    #[test]
    fn test_value_enums() {
        let args = Arguments::parse_from([
            "snptyper",
            "--path", "reads",
            "--reference-mapper", "bwa",
            "--variant-caller", "deepvariant",
            "--matching-hashes", "500",
        ]);
        assert_eq!(args.reference_mapper, ReferenceMapper::Bwa);
        assert_eq!(args.variant_caller, VariantCaller::Deepvariant);
        assert_eq!(args.matching_hashes, 500);
    }

    #[test]
    fn test_path_required() {
        assert!(Arguments::try_parse_from(["snptyper"]).is_err());
    }
}
