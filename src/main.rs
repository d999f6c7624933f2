use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Clap;
use log::LevelFilter;
use simplelog::{LevelPadding, TermLogger, TerminalMode};

mod c;
mod dwarf;
mod error;
mod options;
mod wasm;

use error::CompileError;
use options::Options;
use wasm::decode::{decode, DecodeOptions};
use wasm::fingerprint::{sorted_function_ids, split_static_dynamic, Partition};

fn main() -> anyhow::Result<()> {
    let options: Options = Options::parse();

    // Print debug messages if verbose option is given.
    let log_level = if options.verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let log_config = simplelog::ConfigBuilder::new()
        .set_time_to_local(true)
        .set_time_format_str("%F %T")
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_level_padding(LevelPadding::Right)
        .build();
    TermLogger::init(log_level, log_config, TerminalMode::Stderr)?;

    log::debug!("{:#?}", options);

    let data_segment_mode = match options.data_segment_mode() {
        Some(mode) => mode,
        None => {
            print_data_segment_modes();
            return Ok(());
        }
    };

    let output_dir = options.output.parent().filter(|parent| !parent.as_os_str().is_empty());
    if options.clean {
        clean_implementation_files(output_dir.unwrap_or_else(|| Path::new(".")));
    }

    // Fingerprints are only needed for reference partitioning; skip the
    // SHA-1 pass otherwise.
    let decode_options = DecodeOptions {
        fingerprint: options.reference.is_some(),
        debug_info: options.generate_debug,
    };

    let bytes = fs::read(&options.module).map_err(|err| CompileError::Io {
        path: options.module.clone(),
        message: err.to_string(),
    })?;
    let module = decode(&bytes, decode_options)
        .with_context(|| format!("failed to read module {}", options.module.display()))?;
    log::debug!(
        "decoded {} function(s) ({} imported), {} export(s), {} data segment(s)",
        module.function_count(),
        module.imported_function_count(),
        module.exports.len(),
        module.data.len()
    );

    let partition = match &options.reference {
        None => None,
        Some(reference_path) => {
            let reference_bytes = fs::read(reference_path).map_err(|err| CompileError::Io {
                path: reference_path.clone(),
                message: err.to_string(),
            })?;
            let reference = decode(&reference_bytes, DecodeOptions { fingerprint: true, debug_info: false })
                .with_context(|| format!("failed to read reference module {}", reference_path.display()))?;

            let ids = sorted_function_ids(&module);
            let reference_ids = sorted_function_ids(&reference);
            let partition = split_static_dynamic(&ids, &reference_ids);
            log_partition(&partition);
            Some(partition)
        }
    };

    let module_name = c::names::module_name_from_path(&options.module);
    let write_options = options.write_options(data_segment_mode);

    c::write_module(&module, &module_name, &write_options, partition.as_ref())
        .context("failed to compile")?;

    Ok(())
}

fn log_partition(partition: &Partition) {
    let total = partition.static_ids.len() + partition.dynamic_ids.len();
    let percent = if total == 0 {
        0.0
    } else {
        partition.dynamic_ids.len() as f64 / total as f64 * 100.0
    };
    log::info!("{} of {} functions are dynamic ({:.2}%)", partition.dynamic_ids.len(), total, percent);
}

fn print_data_segment_modes() {
    eprintln!(
        "Supported data segment modes are:\n\
         arrays         Writes each data segment as a C array\n\
         gnu-ld         All data segments are embedded into a data section using GNU LD\n\
         sectcreate1    All data segments are embedded into a data section using sectcreate\n\
         \x20              and accessed using asm (modern Mach-O LD)\n\
         sectcreate2    All data segments are embedded into a data section using sectcreate\n\
         \x20              and accessed using Mach-O getsectdata (older Mach-O LD)"
    );
}

/// Remove `s0001.c` / `d0001.c` style files of a previous partitioned run.
/// Failures to remove a single file are reported and skipped.
fn clean_implementation_files(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::error!("{}: could not list files to clean, {}", dir.display(), err);
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("{}: could not list files to clean, {}", dir.display(), err);
                continue;
            }
        };
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let is_partition_file = file_name.len() == 7
            && file_name.is_ascii()
            && (file_name.starts_with('s') || file_name.starts_with('d'))
            && file_name.ends_with(".c")
            && file_name[1..5].chars().all(|c| c.is_ascii_digit());
        if !is_partition_file {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("removed {}", path.display()),
            Err(err) => log::error!("{}: could not remove file, {}", path.display(), err),
        }
    }
}
