use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use jsscope::deobfuscation::{
    DeobfuscateOptions, DeobfuscationEngine, DeobfuscationResult, EngineConfig,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{collect_scripts, file_display_name, read_script},
    output::{confidence_label, emit, transformation_table},
};

#[derive(Debug, Serialize)]
struct DeobfuscationReport {
    file: String,
    output: String,
    #[serde(flatten)]
    result: Arc<DeobfuscationResult>,
}

pub struct DeobfuscateArgs<'a> {
    pub output: Option<&'a Path>,
    pub suffix: &'a str,
    pub recursive: bool,
    pub rename: bool,
    pub aggressive: bool,
    pub aggressive_vm: bool,
    pub extract_instructions: bool,
    pub decrypt_strings: bool,
    pub restore_control_flow: bool,
    pub max_iterations: Option<usize>,
    pub detailed: bool,
    pub report: Option<&'a Path>,
    pub global: &'a GlobalOptions,
}

pub fn run(path: &Path, args: &DeobfuscateArgs) -> anyhow::Result<()> {
    let engine = DeobfuscationEngine::new(build_config(args));
    if args.recursive {
        run_recursive(&engine, path, args)
    } else {
        run_single(&engine, path, args)
    }
}

fn run_single(engine: &DeobfuscationEngine, path: &Path, args: &DeobfuscateArgs) -> anyhow::Result<()> {
    let options = build_options(read_script(path)?, args);
    let result = engine
        .deobfuscate(&options)
        .with_context(|| format!("deobfuscation failed: {}", path.display()))?;

    let to_stdout = args.output.is_some_and(|o| o == Path::new("-"));
    let output_path = if to_stdout {
        PathBuf::from("-")
    } else {
        let output_path = resolve_output_path(path, args.output, args.suffix);
        std::fs::write(&output_path, &result.code)
            .with_context(|| format!("failed to write output: {}", output_path.display()))?;
        output_path
    };

    let report = DeobfuscationReport {
        file: file_display_name(path),
        output: file_display_name(&output_path),
        result,
    };
    write_report(args.report, &report)?;

    emit(&report, args.global, |report| {
        if to_stdout {
            println!("{}", report.result.code);
        }
        display_report(report, args.detailed);
    })
}

fn run_recursive(engine: &DeobfuscationEngine, dir: &Path, args: &DeobfuscateArgs) -> anyhow::Result<()> {
    let files = collect_scripts(dir)?;
    let mut requests = Vec::with_capacity(files.len());
    for file in &files {
        requests.push(build_options(read_script(file)?, args));
    }

    let mut reports = Vec::new();
    let mut fail_count = 0;
    for (file, result) in files.iter().zip(engine.deobfuscate_batch(&requests)) {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log::warn!("{}: {e}", file.display());
                fail_count += 1;
                continue;
            }
        };

        let out_path = if let Some(out_dir) = args.output {
            std::fs::create_dir_all(out_dir).with_context(|| {
                format!("failed to create output directory: {}", out_dir.display())
            })?;
            out_dir.join(suffixed_filename(file, args.suffix))
        } else {
            file.parent()
                .unwrap_or(Path::new("."))
                .join(suffixed_filename(file, args.suffix))
        };
        std::fs::write(&out_path, &result.code)
            .with_context(|| format!("failed to write output: {}", out_path.display()))?;

        if !args.global.json {
            eprintln!(
                "{}: {} applied, confidence {:.2}",
                file_display_name(file),
                result.applied_count(),
                result.confidence
            );
        }
        reports.push(DeobfuscationReport {
            file: file_display_name(file),
            output: file_display_name(&out_path),
            result,
        });
    }

    write_report(args.report, &reports)?;

    emit(&reports, args.global, |reports| {
        eprintln!();
        eprintln!(
            "Processed {} files: {} succeeded, {} failed",
            reports.len() + fail_count,
            reports.len(),
            fail_count
        );
    })
}

fn build_config(args: &DeobfuscateArgs) -> EngineConfig {
    let config = EngineConfig::default();
    match args.max_iterations {
        Some(iterations) => config.with_max_iterations(iterations),
        None => config,
    }
}

fn build_options(code: String, args: &DeobfuscateArgs) -> DeobfuscateOptions {
    DeobfuscateOptions::new(code)
        .rename_variables(args.rename)
        .aggressive(args.aggressive)
        .aggressive_vm(args.aggressive_vm)
        .extract_instructions(args.extract_instructions)
        .decrypt_strings(args.decrypt_strings)
        .restore_control_flow(args.restore_control_flow)
}

fn write_report<T: Serialize>(path: Option<&Path>, report: &T) -> anyhow::Result<()> {
    if let Some(report_file) = path {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(report_file, json)
            .with_context(|| format!("failed to write report: {}", report_file.display()))?;
        eprintln!("Report written to {}", report_file.display());
    }
    Ok(())
}

fn resolve_output_path(input: &Path, output: Option<&Path>, suffix: &str) -> PathBuf {
    if let Some(out) = output {
        if out.is_dir() {
            return out.join(suffixed_filename(input, suffix));
        }
        return out.to_path_buf();
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(suffixed_filename(input, suffix))
}

fn suffixed_filename(input: &Path, suffix: &str) -> String {
    let stem = input
        .file_stem()
        .map_or("output", |s| s.to_str().unwrap_or("output"));
    let ext = input.extension().map_or("", |e| e.to_str().unwrap_or(""));

    if ext.is_empty() {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}{suffix}.{ext}")
    }
}

fn display_report(report: &DeobfuscationReport, detailed: bool) {
    let result = &report.result;
    eprintln!("Deobfuscation complete: {} -> {}", report.file, report.output);

    let techniques: Vec<&str> = result.detected_techniques.iter().map(|t| t.name()).collect();
    if techniques.is_empty() {
        eprintln!("  Techniques:  none detected");
    } else {
        eprintln!("  Techniques:  {}", techniques.join(", "));
    }
    eprintln!(
        "  Confidence:  {:.2} ({})",
        result.confidence,
        confidence_label(result.confidence)
    );
    eprintln!(
        "  Changes:     {} applied, {} failed",
        result.applied_count(),
        result.failed_count()
    );
    if let Some(analysis) = &result.analysis {
        eprintln!("  Iterations:  {}", analysis.iterations);
    }
    if let Some(vm) = &result.vm_detected {
        eprintln!(
            "  Interpreter: {} at {} ({})",
            vm.profile.vm_type,
            vm.profile.interpreter_location,
            if vm.deobfuscated { "restored" } else { "not restored" }
        );
    }

    if detailed && !result.transformations.is_empty() {
        eprintln!("{}", transformation_table(&result.transformations));
    }

    if !result.warnings.is_empty() {
        eprintln!("  Warnings:    {}", result.warnings.len());
        for w in &result.warnings {
            eprintln!("    - {w}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_filename() {
        assert_eq!(
            suffixed_filename(Path::new("dir/app.min.js"), ".deobfuscated"),
            "app.min.deobfuscated.js"
        );
        assert_eq!(suffixed_filename(Path::new("script"), "_out"), "script_out");
    }
}
