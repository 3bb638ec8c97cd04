//! Parts discovery. Given a base recording file, enumerate its numbered
//! continuation parts in ascending order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PartsError {
    #[error("no recording parts found")]
    NotFound,
}

/// Discover continuation parts of `base`. Two patterns, tried in order for
/// each directory entry: `P.N` then `stem(P)_N.ext(P)`. If the same index
/// is matched by both patterns, the `P.N` match wins. `base` itself is
/// prepended if it exists and is a regular file.
pub async fn discover_parts(base: &Path) -> Result<Vec<PathBuf>, PartsError> {
    let dir = base.parent().unwrap_or_else(|| Path::new("."));
    let base_name = match base.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_string(),
        None => return Err(PartsError::NotFound),
    };
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or(&base_name).to_string();
    let ext = base
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let mut entries = Vec::new();
    if let Ok(mut rd) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = rd.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                entries.push((name.to_string(), entry.path()));
            }
        }
    }

    let mut by_index: BTreeMap<u64, PathBuf> = BTreeMap::new();

    // Pass 1: `P.N`
    let dot_prefix = format!("{base_name}.");
    for (name, path) in &entries {
        if let Some(digits) = name.strip_prefix(&dot_prefix) {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = digits.parse::<u64>() {
                    by_index.entry(n).or_insert_with(|| path.clone());
                }
            }
        }
    }

    // Pass 2: `stem_N.ext`, only where pattern 1 didn't already claim the index.
    let seg_prefix = format!("{stem}_");
    for (name, path) in &entries {
        if let Some(rest) = name.strip_prefix(&seg_prefix) {
            let digits = if ext.is_empty() {
                rest
            } else {
                match rest.strip_suffix(&ext) {
                    Some(d) => d,
                    None => continue,
                }
            };
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = digits.parse::<u64>() {
                    by_index.entry(n).or_insert_with(|| path.clone());
                }
            }
        }
    }

    let base_exists = tokio::fs::metadata(base)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    let mut result = Vec::new();
    if base_exists {
        result.push(base.to_path_buf());
    }
    result.extend(by_index.into_values());

    if result.is_empty() {
        Err(PartsError::NotFound)
    } else {
        Ok(result)
    }
}

/// The last part of a multi-part recording, used for stability checks.
pub fn last_part(parts: &[PathBuf]) -> Option<&PathBuf> {
    parts.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    #[tokio::test]
    async fn single_file_no_parts() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");
        fs::write(&base, b"x").await.unwrap();
        let parts = discover_parts(&base).await.unwrap();
        assert_eq!(parts, vec![base]);
    }

    #[tokio::test]
    async fn dot_number_parts_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");
        fs::write(&base, b"x").await.unwrap();
        fs::write(dir.path().join("rec.ts.2"), b"x").await.unwrap();
        fs::write(dir.path().join("rec.ts.10"), b"x").await.unwrap();
        fs::write(dir.path().join("rec.ts.1"), b"x").await.unwrap();
        let parts = discover_parts(&base).await.unwrap();
        assert_eq!(
            parts,
            vec![
                base.clone(),
                dir.path().join("rec.ts.1"),
                dir.path().join("rec.ts.2"),
                dir.path().join("rec.ts.10"),
            ]
        );
    }

    #[tokio::test]
    async fn stem_underscore_parts_when_base_missing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");
        fs::write(dir.path().join("rec_1.ts"), b"x").await.unwrap();
        fs::write(dir.path().join("rec_2.ts"), b"x").await.unwrap();
        let parts = discover_parts(&base).await.unwrap();
        assert_eq!(
            parts,
            vec![dir.path().join("rec_1.ts"), dir.path().join("rec_2.ts")]
        );
    }

    #[tokio::test]
    async fn not_found_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("missing.ts");
        assert!(matches!(discover_parts(&base).await, Err(PartsError::NotFound)));
    }

    #[tokio::test]
    async fn dot_pattern_wins_over_stem_pattern_for_same_index() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");
        fs::write(&base, b"x").await.unwrap();
        fs::write(dir.path().join("rec.ts.1"), b"dot").await.unwrap();
        fs::write(dir.path().join("rec_1.ts"), b"stem").await.unwrap();
        let parts = discover_parts(&base).await.unwrap();
        assert_eq!(parts, vec![base, dir.path().join("rec.ts.1")]);
    }
}
