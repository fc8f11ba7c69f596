use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jsscope - static JavaScript deobfuscation and obfuscation detection
#[derive(Debug, Parser)]
#[command(name = "jsscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Identify obfuscation techniques without writing any output.
    Detect {
        /// Path to the script (or directory with --recursive).
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Recursively scan directory for .js/.mjs/.cjs files.
        #[arg(long)]
        recursive: bool,
    },

    /// Deobfuscate a script.
    Deobfuscate {
        /// Path to the script (or directory with --recursive).
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Output file or directory. Use `-` to print the code to stdout.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Output filename suffix (default: ".deobfuscated").
        #[arg(long, default_value = ".deobfuscated")]
        suffix: String,

        /// Recursively process directory for .js/.mjs/.cjs files.
        #[arg(long)]
        recursive: bool,

        /// Rename `_0x...` style identifiers.
        #[arg(long)]
        rename: bool,

        /// Remove scaffolding and rewrite `obj["name"]` to `obj.name`.
        #[arg(long)]
        aggressive: bool,

        /// Attempt to restore programs hidden behind a bytecode interpreter.
        #[arg(long)]
        aggressive_vm: bool,

        /// Include classified interpreter instructions in the report.
        #[arg(long)]
        extract_instructions: bool,

        /// Leave decrypt-helper calls in place.
        #[arg(long)]
        no_decrypt_strings: bool,

        /// Leave flattened control flow in place.
        #[arg(long)]
        no_control_flow: bool,

        /// Maximum fixed-point iterations of the generic passes.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Show every transformation record.
        #[arg(long)]
        detailed: bool,

        /// Write detailed JSON report.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}
