//! Rendering of command results, as JSON or as terminal tables.

use std::io::Write;

use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use jsscope::deobfuscation::{DetectionSignature, TransformationRecord};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Indent applied to tables nested under a per-file heading.
const TABLE_INDENT: &str = "  ";

/// Writes `data` to stdout as pretty JSON under `--json`, otherwise calls `human`.
pub fn emit<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if !opts.json {
        human(data);
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, data)?;
    writeln!(stdout)?;
    Ok(())
}

/// Human label for a confidence in `[0, 1]`.
pub fn confidence_label(confidence: f64) -> &'static str {
    match confidence {
        c if c <= 0.2 => "very low",
        c if c <= 0.5 => "low",
        c if c <= 0.75 => "medium",
        c if c <= 0.9 => "high",
        _ => "very high",
    }
}

/// One row per detected technique, strongest first.
pub fn signature_table(signatures: &[DetectionSignature]) -> String {
    let mut sorted: Vec<&DetectionSignature> = signatures.iter().collect();
    sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut table = borderless(&["TECHNIQUE", "CONFIDENCE", "", "EVIDENCE"]);
    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    for signature in sorted {
        table.add_row(vec![
            signature.technique.to_string(),
            format!("{:.2}", signature.confidence),
            confidence_label(signature.confidence).to_string(),
            signature.evidence.join("; "),
        ]);
    }
    indented(&table)
}

/// One row per transformation record, in the order they were logged.
pub fn transformation_table(records: &[TransformationRecord]) -> String {
    let mut table = borderless(&["KIND", "OK", "DETAIL"]);
    for record in records {
        table.add_row(vec![
            record.kind.to_string(),
            if record.succeeded { "yes" } else { "no" }.to_string(),
            record.detail.clone(),
        ]);
    }
    indented(&table)
}

/// A table with no borders and a two-space gap between columns.
fn borderless(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());

    let last = headers.len().saturating_sub(1);
    for (i, column) in table.column_iter_mut().enumerate() {
        column.set_padding((u16::from(i != 0), u16::from(i != last)));
    }
    table
}

fn indented(table: &Table) -> String {
    table
        .lines()
        .map(|line| format!("{TABLE_INDENT}{}", line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use jsscope::deobfuscation::{Technique, TransformationKind};

    use super::*;

    #[test]
    fn test_confidence_labels() {
        assert_eq!(confidence_label(0.0), "very low");
        assert_eq!(confidence_label(0.3), "low");
        assert_eq!(confidence_label(0.75), "medium");
        assert_eq!(confidence_label(1.0), "very high");
    }

    #[test]
    fn test_signature_table_orders_by_confidence() {
        let signatures = vec![
            DetectionSignature::new(Technique::HexIdentifiers, vec!["_0x1f".to_string()], 0.3),
            DetectionSignature::new(Technique::StringArray, vec!["_0xa".to_string()], 0.9),
        ];
        let text = signature_table(&signatures);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.starts_with(TABLE_INDENT)));
        assert!(lines[0].contains("TECHNIQUE"));
        assert!(lines[1].contains("0.90"));
        assert!(lines[2].contains("0.30"));
        assert!(lines[2].contains("low"));
    }

    #[test]
    fn test_transformation_table_marks_failures() {
        let records = vec![
            TransformationRecord::success(TransformationKind::ConstantFolding, "folded 2"),
            TransformationRecord::failure(TransformationKind::ControlFlowRestoration, "cycle"),
        ];
        let text = transformation_table(&records);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("yes"));
        assert!(lines[2].contains("no"));
        assert!(lines[2].contains("cycle"));
    }
}
