pub mod args;

pub use args::{Arguments, ReferenceMapper, VariantCaller};

use clap::Parser;

pub fn parse() -> Arguments {
    Arguments::parse()
}
