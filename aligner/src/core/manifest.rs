//! The canonical dependency manifest (`pyproject.toml`).
//!
//! Parsing goes through `toml`; rewriting edits the raw text so comments,
//! ordering and every untouched entry survive byte for byte.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::core::dependency::{PinnedDependency, normalize_name, parse_pinned};
use crate::core::types::AlignmentPlan;

/// Exact pins from `project.dependencies`, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    dependencies: Vec<PinnedDependency>,
}

impl Manifest {
    pub fn dependencies(&self) -> &[PinnedDependency] {
        &self.dependencies
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Look up a dependency by (normalized) name.
    pub fn get(&self, package: &str) -> Option<&PinnedDependency> {
        let key = normalize_name(package);
        self.dependencies.iter().find(|dep| dep.key == key)
    }
}

/// Parse manifest text. A document without `project.dependencies` has no
/// dependencies; any entry that is not a single `name==version` pin is an error.
pub fn parse_manifest(text: &str) -> Result<Manifest, String> {
    let doc: toml::Table = toml::from_str(text).map_err(|err| format!("invalid toml: {err}"))?;
    let Some(project) = doc.get("project") else {
        return Ok(Manifest::default());
    };
    let project = project
        .as_table()
        .ok_or_else(|| "`project` is not a table".to_string())?;
    let Some(deps) = project.get("dependencies") else {
        return Ok(Manifest::default());
    };
    let deps = deps
        .as_array()
        .ok_or_else(|| "`project.dependencies` is not an array".to_string())?;

    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::with_capacity(deps.len());
    for item in deps {
        let entry = item
            .as_str()
            .ok_or_else(|| format!("dependency entry {item} is not a string"))?;
        let dep = parse_pinned(entry)?;
        if !seen.insert(dep.key.clone()) {
            return Err(format!("dependency `{}` is declared twice", dep.name));
        }
        dependencies.push(dep);
    }
    if !dependencies.is_empty() && dependencies_span(text).is_none() {
        return Err(
            "`project.dependencies` must be a plain array under `[project]` or a \
             `project.dependencies` key to be rewritten"
                .to_string(),
        );
    }
    Ok(Manifest { dependencies })
}

/// Apply `plan` to the raw manifest text.
///
/// Only the quoted `name==old` literal of each planned package inside
/// `project.dependencies` changes. The result is parsed again and must declare
/// exactly the planned versions with every other entry untouched. Returns the
/// new text and the applied `name==version` entries in plan order.
pub fn rewrite_manifest(
    text: &str,
    manifest: &Manifest,
    plan: &AlignmentPlan,
) -> Result<(String, Vec<String>), String> {
    let span = dependencies_span(text)
        .ok_or_else(|| "cannot locate `project.dependencies` array".to_string())?;

    let mut edits: Vec<(Range<usize>, String)> = Vec::with_capacity(plan.len());
    let mut applied = Vec::with_capacity(plan.len());
    for (key, upgrade) in plan.iter() {
        let dep = manifest
            .get(key)
            .ok_or_else(|| format!("`{}` is not declared in the manifest", upgrade.package))?;
        if dep.version != upgrade.from {
            return Err(format!(
                "`{}` is at {} but the plan expects {}",
                dep.name, dep.version, upgrade.from
            ));
        }
        let range = locate_literal(text, span.clone(), &dep.raw)?;
        let pin = dep.pin(&upgrade.to);
        edits.push((range, pin.clone()));
        applied.push(pin);
    }

    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(text.len() + 16 * edits.len());
    let mut cursor = 0;
    for (range, replacement) in &edits {
        out.push_str(&text[cursor..range.start]);
        out.push_str(replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    check_rewrite(&out, manifest, plan)?;
    Ok((out, applied))
}

/// Byte range of the literal's contents (quotes excluded); must occur exactly once.
fn locate_literal(text: &str, span: Range<usize>, raw: &str) -> Result<Range<usize>, String> {
    let haystack = &text[span.clone()];
    let mut found = Vec::new();
    for quote in ['"', '\''] {
        let needle = format!("{quote}{raw}{quote}");
        found.extend(
            haystack
                .match_indices(&needle)
                .map(|(idx, _)| span.start + idx + 1),
        );
    }
    match found.as_slice() {
        [start] => Ok(*start..*start + raw.len()),
        [] => Err(format!("entry `{raw}` not found in `project.dependencies`")),
        _ => Err(format!("entry `{raw}` appears more than once")),
    }
}

fn check_rewrite(text: &str, before: &Manifest, plan: &AlignmentPlan) -> Result<(), String> {
    let after = parse_manifest(text).map_err(|err| format!("rewritten manifest is invalid: {err}"))?;
    if after.dependencies.len() != before.dependencies.len() {
        return Err("rewrite changed the number of dependencies".to_string());
    }
    for (old, new) in before.dependencies.iter().zip(&after.dependencies) {
        let expected = plan
            .get(&old.key)
            .map_or(old.version.as_str(), |upgrade| upgrade.to.as_str());
        if new.key != old.key || new.version != expected {
            return Err(format!(
                "rewrite produced `{}` where `{}=={}` was expected",
                new.raw, old.name, expected
            ));
        }
    }
    Ok(())
}

/// Locate the `project.dependencies` array, written either as `dependencies`
/// under a `[project]` header or as a dotted `project.dependencies` key.
fn dependencies_span(text: &str) -> Option<Range<usize>> {
    // `None` inside array-of-tables sections, which never hold the key.
    let mut table = Some(String::new());
    let mut offset = 0;
    while offset < text.len() {
        let end = text[offset..]
            .find('\n')
            .map_or(text.len(), |idx| offset + idx + 1);
        let line = &text[offset..end];
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            offset = end;
            continue;
        }
        if trimmed.starts_with('[') {
            table = table_header(trimmed);
        } else if let Some((key, value)) = trimmed.split_once('=')
            && value.trim_start().starts_with('[')
            && let Some(open) = line.find('=').and_then(|eq| {
                text[offset + eq..].find('[').map(|idx| offset + eq + idx)
            })
            && let Some(close) = closing_bracket(text, open)
        {
            if table
                .as_deref()
                .is_some_and(|table| qualified_key(table, key) == "project.dependencies")
            {
                return Some(open..close + 1);
            }
            // Skip the whole array so its lines are not read as headers.
            offset = text[close..]
                .find('\n')
                .map_or(text.len(), |idx| close + idx + 1);
            continue;
        }
        offset = end;
    }
    None
}

/// Dotted name of a `[table]` header, ignoring spacing and trailing comments.
fn table_header(line: &str) -> Option<String> {
    if line.starts_with("[[") {
        return None;
    }
    let inner = line.strip_prefix('[')?;
    let close = inner.find(']')?;
    Some(dotted(&inner[..close]))
}

fn qualified_key(table: &str, key: &str) -> String {
    let key = dotted(key);
    if table.is_empty() {
        key
    } else {
        format!("{table}.{key}")
    }
}

fn dotted(key: &str) -> String {
    key.split('.').map(str::trim).collect::<Vec<_>>().join(".")
}

/// Index of the `]` matching the `[` at `open`, skipping strings and comments.
fn closing_bracket(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut idx = open;
    while idx < bytes.len() {
        match bytes[idx] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            quote @ (b'"' | b'\'') => {
                idx += 1;
                while idx < bytes.len() && bytes[idx] != quote {
                    if quote == b'"' && bytes[idx] == b'\\' {
                        idx += 1;
                    }
                    idx += 1;
                }
            }
            b'#' => {
                while idx < bytes.len() && bytes[idx] != b'\n' {
                    idx += 1;
                }
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlannedUpgrade;

    const PYPROJECT: &str = r#"[build-system]
requires = ["setuptools"]

[project]
name = "platform"
# pinned, shared by all apps
dependencies = [
    "numpy==2.2.1",   # arrays
    "pandas==2.2.3",
    'psutil==6.1.1',
]

[project.optional-dependencies]
dev = ["numpy==2.2.1", "pytest==8.0.0"]
"#;

    fn plan(entries: &[(&str, &str, &str)]) -> AlignmentPlan {
        let mut plan = AlignmentPlan::default();
        for (package, from, to) in entries {
            plan.insert(
                *package,
                PlannedUpgrade {
                    package: package.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                },
            );
        }
        plan
    }

    #[test]
    fn parses_project_dependencies_in_order() {
        let manifest = parse_manifest(PYPROJECT).expect("parse");
        let names: Vec<&str> = manifest
            .dependencies()
            .iter()
            .map(|dep| dep.name.as_str())
            .collect();
        assert_eq!(names, vec!["numpy", "pandas", "psutil"]);
        assert_eq!(manifest.get("PSUTIL").expect("psutil").version, "6.1.1");
    }

    #[test]
    fn missing_dependencies_is_empty() {
        let manifest = parse_manifest("[project]\nname = \"x\"\n").expect("parse");
        assert!(manifest.is_empty());
        assert!(parse_manifest("").expect("parse").is_empty());
    }

    #[test]
    fn rejects_ranges_duplicates_and_bad_shapes() {
        assert!(parse_manifest("[project]\ndependencies = [\"numpy>=2\"]\n").is_err());
        assert!(
            parse_manifest("[project]\ndependencies = [\"numpy==1\", \"NumPy==2\"]\n").is_err()
        );
        assert!(parse_manifest("[project]\ndependencies = \"numpy==1\"\n").is_err());
        assert!(parse_manifest("[project]\ndependencies = [1]\n").is_err());
        assert!(parse_manifest("[project\n").is_err());
    }

    #[test]
    fn rewrite_touches_only_planned_entries() {
        let manifest = parse_manifest(PYPROJECT).expect("parse");
        let (text, applied) = rewrite_manifest(
            PYPROJECT,
            &manifest,
            &plan(&[("numpy", "2.2.1", "2.3.0"), ("psutil", "6.1.1", "7.0.0")]),
        )
        .expect("rewrite");
        assert_eq!(applied, vec!["numpy==2.3.0", "psutil==7.0.0"]);
        let expected = PYPROJECT
            .replacen("\"numpy==2.2.1\",   # arrays", "\"numpy==2.3.0\",   # arrays", 1)
            .replace("'psutil==6.1.1'", "'psutil==7.0.0'");
        assert_eq!(text, expected);
        // The optional-dependencies pin is outside `project.dependencies`.
        assert!(text.contains("dev = [\"numpy==2.2.1\", \"pytest==8.0.0\"]"));
    }

    #[test]
    fn rewrite_rejects_stale_plan() {
        let manifest = parse_manifest(PYPROJECT).expect("parse");
        let err = rewrite_manifest(PYPROJECT, &manifest, &plan(&[("numpy", "2.3.0", "2.3.1")]))
            .unwrap_err();
        assert!(err.contains("plan expects"));
    }

    #[test]
    fn rewrite_rejects_undeclared_package() {
        let manifest = parse_manifest(PYPROJECT).expect("parse");
        assert!(
            rewrite_manifest(PYPROJECT, &manifest, &plan(&[("structlog", "24.4.0", "25.1.0")]))
                .is_err()
        );
    }

    #[test]
    fn rewrites_spaced_commented_and_dotted_headers() {
        let variants = [
            "[ project ]\ndependencies = [\"numpy==2.2.1\"]\n",
            "[project] # metadata\ndependencies = [\"numpy==2.2.1\"]\n",
            "project.dependencies = [\"numpy==2.2.1\"]\n\n[tool.x]\nkey = 1\n",
            "[project]\nclassifiers = [\n  [\"nested\"],\n]\ndependencies = [\"numpy==2.2.1\"]\n",
            "[project]\n# extras = [\ndependencies = [\"numpy==2.2.1\"]\n",
        ];
        for text in variants {
            let manifest = parse_manifest(text).expect(text);
            let (rewritten, _) =
                rewrite_manifest(text, &manifest, &plan(&[("numpy", "2.2.1", "2.3.0")]))
                    .expect(text);
            assert_eq!(rewritten, text.replace("2.2.1", "2.3.0"));
        }
    }

    #[test]
    fn unrewritable_layout_fails_at_parse() {
        let text = "project = { name = \"x\", dependencies = [\"numpy==2.2.1\"] }\n";
        let err = parse_manifest(text).unwrap_err();
        assert!(err.contains("to be rewritten"));
    }

    #[test]
    fn dependencies_of_other_tables_are_ignored() {
        let text = "[tool.poetry]\ndependencies = [\"numpy==1.0.0\"]\n\n[project]\ndependencies = [\"numpy==2.2.1\"]\n";
        let span = dependencies_span(text).expect("span");
        assert_eq!(&text[span], "[\"numpy==2.2.1\"]");
    }

    #[test]
    fn span_skips_brackets_in_comments() {
        let text = "[project]\ndependencies = [ # see [docs]\n  \"numpy==2.2.1\",\n]\nother = 1\n";
        let span = dependencies_span(text).expect("span");
        assert!(text[span].ends_with("\n]"));
    }
}
