//! Canonical runbook formatting.
//!
//! Reorders top-level keys to `desc, runners, vars, steps`; any other
//! keys keep their relative order after those. Formatting is idempotent,
//! so a canonical book round-trips byte-identically.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::errors::{Error, Result};

const CANONICAL_ORDER: [&str; 4] = ["desc", "runners", "vars", "steps"];

pub fn format_str(src: &str) -> Result<String> {
    let doc: Value = serde_yaml::from_str(src)?;
    let map = match doc {
        Value::Mapping(m) => m,
        other => {
            return Err(Error::Build(format!(
                "runbook must be a mapping, got {other:?}"
            )))
        }
    };

    let mut out = Mapping::new();
    for key in CANONICAL_ORDER {
        if let Some(v) = map.get(&Value::from(key)) {
            out.insert(Value::from(key), v.clone());
        }
    }
    for (k, v) in &map {
        if !matches!(k.as_str(), Some(key) if CANONICAL_ORDER.contains(&key)) {
            out.insert(k.clone(), v.clone());
        }
    }
    serde_yaml::to_string(&Value::Mapping(out)).map_err(Error::from)
}

/// Format a file; with `write`, rewrite it in place. Returns the
/// formatted text and whether it differs from the input.
pub fn format_file(path: impl AsRef<Path>, write: bool) -> Result<(String, bool)> {
    let path = path.as_ref();
    let src = std::fs::read_to_string(path)
        .map_err(|e| Error::Build(format!("cannot read {}: {e}", path.display())))?;
    let formatted = format_str(&src)?;
    let changed = formatted != src;
    if write && changed {
        std::fs::write(path, &formatted)?;
    }
    Ok((formatted, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn reorders_top_level_keys() {
        let src = indoc! {r#"
            steps:
              - exec:
                  command: echo hi
            desc: out of order
            runners:
              req: http://localhost:8080
        "#};
        let out = format_str(src).unwrap();
        let desc_pos = out.find("desc:").unwrap();
        let runners_pos = out.find("runners:").unwrap();
        let steps_pos = out.find("steps:").unwrap();
        assert!(desc_pos < runners_pos);
        assert!(runners_pos < steps_pos);
    }

    #[test]
    fn formatting_is_idempotent() {
        let src = indoc! {r#"
            vars:
              a: 1
            desc: x
            steps: []
        "#};
        let once = format_str(src).unwrap();
        let twice = format_str(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_keys_follow_canonical_ones() {
        let src = "if: vars.go\ndesc: x\nsteps: []\n";
        let out = format_str(src).unwrap();
        assert!(out.find("desc:").unwrap() < out.find("if:").unwrap());
        assert!(out.find("steps:").unwrap() < out.find("if:").unwrap());
    }

    #[test]
    fn rejects_non_mapping() {
        assert!(format_str("- 1\n- 2\n").is_err());
    }

    #[test]
    fn write_rewrites_file_only_when_changed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("book.yml");
        std::fs::write(&path, "steps: []\ndesc: x\n").unwrap();

        let (formatted, changed) = format_file(&path, true).unwrap();
        assert!(changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), formatted);

        let (_, changed) = format_file(&path, true).unwrap();
        assert!(!changed);
    }
}
