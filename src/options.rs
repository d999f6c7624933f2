use std::path::PathBuf;

use clap::{AppSettings, Clap};

use crate::c::{DataSegmentMode, WriteOptions};

#[derive(Clap, Debug)]
#[clap(
    author = clap::crate_authors!(),
    version = clap::crate_version!(),
    about = clap::crate_description!(),
    setting = AppSettings::DeriveDisplayOrder
)]
pub struct Options {

    // Arguments:

    /// Path of the WebAssembly module in binary format.
    #[clap(value_name = "MODULE")]
    pub module: PathBuf,

    /// Path of the output implementation file. The header, the data blob,
    /// and any partition files are named after it.
    #[clap(value_name = "OUTPUT")]
    pub output: PathBuf,

    // Options:

    /// Number of worker threads for function emission [default: number of online CPUs].
    #[clap(long, short, value_name = "N")]
    threads: Option<usize>,

    /// Number of functions per output file. 0 (default) writes all functions into one file.
    #[clap(long, short, default_value = "0", value_name = "N")]
    pub functions_per_file: u32,

    /// Data segment mode. Use 'help' to print available modes.
    #[clap(long, short, arg_enum, default_value = "arrays", value_name = "MODE")]
    data_segment_mode: DataSegmentModeOption,

    /// Generate debug information (function names using asm(); #line directives based on DWARF, if available).
    #[clap(long, short)]
    pub generate_debug: bool,

    /// Generate pretty code.
    #[clap(long, short)]
    pub pretty: bool,

    /// Support multiple modules (prefixes function names).
    #[clap(long, short)]
    pub multiple_modules: bool,

    /// Remove implementation files of previous partitioned runs ([sd]NNNN.c) before writing.
    #[clap(long, short)]
    pub clean: bool,

    /// Reference module for static/dynamic function partitioning.
    #[clap(long, short, value_name = "PATH")]
    pub reference: Option<PathBuf>,

    /// Print also debug output.
    #[clap(long, short)]
    pub verbose: bool,
}

#[derive(Clap, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataSegmentModeOption {
    Arrays,
    GnuLd,
    Sectcreate1,
    Sectcreate2,
    Help,
}

impl Options {
    pub fn thread_count(&self) -> usize {
        match self.threads {
            Some(threads) if threads > 0 => threads,
            _ => num_cpus::get(),
        }
    }

    /// `None` when the user asked for the mode listing.
    pub fn data_segment_mode(&self) -> Option<DataSegmentMode> {
        match self.data_segment_mode {
            DataSegmentModeOption::Arrays => Some(DataSegmentMode::Arrays),
            DataSegmentModeOption::GnuLd => Some(DataSegmentMode::GnuLd),
            DataSegmentModeOption::Sectcreate1 => Some(DataSegmentMode::Sectcreate1),
            DataSegmentModeOption::Sectcreate2 => Some(DataSegmentMode::Sectcreate2),
            DataSegmentModeOption::Help => None,
        }
    }

    pub fn write_options(&self, data_segment_mode: DataSegmentMode) -> WriteOptions {
        WriteOptions {
            output_path: self.output.clone(),
            thread_count: self.thread_count(),
            functions_per_file: self.functions_per_file,
            pretty: self.pretty,
            debug: self.generate_debug,
            multiple_modules: self.multiple_modules,
            data_segment_mode,
        }
    }
}
