use std::path::Path;

use jsscope::deobfuscation::{DeobfuscationEngine, DetectionReport};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{collect_scripts, file_display_name, read_script},
    output::{emit, signature_table},
};

#[derive(Debug, Serialize)]
struct DetectionInfo {
    file: String,
    #[serde(flatten)]
    report: DetectionReport,
}

#[derive(Debug, Serialize)]
struct BatchDetectionInfo {
    results: Vec<DetectionInfo>,
    total_files: usize,
    detected_count: usize,
    failed_count: usize,
}

pub fn run(path: &Path, recursive: bool, opts: &GlobalOptions) -> anyhow::Result<()> {
    let engine = DeobfuscationEngine::with_defaults();
    if recursive {
        run_recursive(&engine, path, opts)
    } else {
        run_single(&engine, path, opts)
    }
}

fn run_single(engine: &DeobfuscationEngine, path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let info = detect_file(engine, path)?;
    emit(&info, opts, display_detection)
}

fn run_recursive(
    engine: &DeobfuscationEngine,
    dir: &Path,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut results = Vec::new();
    let mut failed_count = 0;
    for file in collect_scripts(dir)? {
        match detect_file(engine, &file) {
            Ok(info) => results.push(info),
            Err(e) => {
                log::warn!("{e:#}");
                failed_count += 1;
            }
        }
    }

    let detected_count = results
        .iter()
        .filter(|r| !r.report.detected_techniques.is_empty())
        .count();
    let batch = BatchDetectionInfo {
        total_files: results.len() + failed_count,
        detected_count,
        failed_count,
        results,
    };

    emit(&batch, opts, |batch| {
        for info in &batch.results {
            let techniques: Vec<&str> = info
                .report
                .detected_techniques
                .iter()
                .map(|t| t.name())
                .collect();
            if techniques.is_empty() {
                println!("{}: no obfuscation detected", info.file);
            } else {
                println!("{}: {}", info.file, techniques.join(", "));
            }
        }
        println!();
        println!(
            "Scanned {} files, {} with obfuscation detected, {} unreadable",
            batch.total_files, batch.detected_count, batch.failed_count
        );
    })
}

fn detect_file(engine: &DeobfuscationEngine, path: &Path) -> anyhow::Result<DetectionInfo> {
    let code = read_script(path)?;
    let report = engine.detect(&code)?;
    Ok(DetectionInfo {
        file: file_display_name(path),
        report,
    })
}

fn display_detection(info: &DetectionInfo) {
    let report = &info.report;
    if !report.parsed {
        println!("{}: does not parse, text-level detection only", info.file);
    }
    if report.signatures.is_empty() {
        println!("{}: no obfuscation detected", info.file);
        return;
    }

    match &report.vendor {
        Some(vendor) => println!("{}: {vendor}", info.file),
        None => println!("{}: no known vendor", info.file),
    }

    println!("{}", signature_table(&report.signatures));

    if let Some(vm) = &report.vm_detected {
        let profile = &vm.profile;
        println!(
            "  Interpreter: {} ({} tier) at {}, {} cases, {} complexity",
            profile.vm_type,
            vm.tier,
            profile.interpreter_location,
            profile.instruction_count,
            profile.complexity
        );
    }
}
