pub mod assembly;
pub mod command;
pub mod deepvariant;
pub mod file;
pub mod freebayes;
pub mod mash;
pub mod mlst;
pub mod qualimap;
pub mod reference;
pub mod report;
pub mod sambam;
pub mod spoligo;
pub mod stats;
pub mod strain;
pub mod streams;
pub mod system;
pub mod vcf;
