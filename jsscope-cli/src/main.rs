mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // Show jsscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("jsscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Detect { path, recursive } => commands::detect::run(path, *recursive, &cli.global),
        Command::Deobfuscate {
            path,
            output,
            suffix,
            recursive,
            rename,
            aggressive,
            aggressive_vm,
            extract_instructions,
            no_decrypt_strings,
            no_control_flow,
            max_iterations,
            detailed,
            report,
        } => commands::deobfuscate::run(
            path,
            &commands::deobfuscate::DeobfuscateArgs {
                output: output.as_deref(),
                suffix,
                recursive: *recursive,
                rename: *rename,
                aggressive: *aggressive,
                aggressive_vm: *aggressive_vm,
                extract_instructions: *extract_instructions,
                decrypt_strings: !*no_decrypt_strings,
                restore_control_flow: !*no_control_flow,
                max_iterations: *max_iterations,
                detailed: *detailed,
                report: report.as_deref(),
                global: &cli.global,
            },
        ),
    }
}
