use std::path::{Path, PathBuf};

use anyhow::Context;

/// Read a script as UTF-8 text.
pub fn read_script(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script: {}", path.display()))
}

/// Collect all script files recursively from a directory.
pub fn collect_scripts(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_scripts_recursive(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_scripts_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_scripts_recursive(&path, files)?;
        } else if is_script_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Returns true if the path has a `.js`, `.mjs` or `.cjs` extension.
pub fn is_script_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js" | "mjs" | "cjs")
    )
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_extensions() {
        assert!(is_script_file(Path::new("a/b.js")));
        assert!(is_script_file(Path::new("b.mjs")));
        assert!(!is_script_file(Path::new("b.ts")));
        assert!(!is_script_file(Path::new("js")));
    }
}
