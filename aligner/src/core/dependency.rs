//! Exact-pin dependency entries (`name==version`).

use std::sync::LazyLock;

use regex::Regex;

/// A dependency declared with a single exact version pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedDependency {
    /// Name as written in the manifest.
    pub name: String,
    /// Normalized name used for lookups (see [`normalize_name`]).
    pub key: String,
    pub version: String,
    /// The entry exactly as declared, used to locate it on rewrite.
    pub raw: String,
}

impl PinnedDependency {
    /// Render `name==version` with the declared spelling of the name.
    pub fn pin(&self, version: &str) -> String {
        format!("{}=={}", self.name, version)
    }
}

/// Normalize a package name: lowercase, runs of `-`, `_`, `.` become one `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Parse a `name==version` entry. Anything other than one exact pin is rejected
/// because its version cannot be extracted unambiguously.
pub fn parse_pinned(entry: &str) -> Result<PinnedDependency, String> {
    static PIN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*==\s*([0-9A-Za-z][0-9A-Za-z.+!_-]*)$")
            .unwrap()
    });

    let trimmed = entry.trim();
    let caps = PIN_RE
        .captures(trimmed)
        .ok_or_else(|| format!("`{trimmed}` is not an exact `name==version` pin"))?;
    let name = caps[1].to_string();
    Ok(PinnedDependency {
        key: normalize_name(&name),
        name,
        version: caps[2].to_string(),
        raw: entry.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_case() {
        assert_eq!(normalize_name("Typing_Extensions"), "typing-extensions");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a-_.b"), "a-b");
    }

    #[test]
    fn parses_exact_pin() {
        let dep = parse_pinned("numpy==2.2.1").expect("pin");
        assert_eq!(dep.name, "numpy");
        assert_eq!(dep.key, "numpy");
        assert_eq!(dep.version, "2.2.1");
        assert_eq!(dep.raw, "numpy==2.2.1");
        assert_eq!(dep.pin("2.3.0"), "numpy==2.3.0");
    }

    #[test]
    fn rejects_ambiguous_constraints() {
        for entry in [
            "numpy>=2.0",
            "numpy==2.*",
            "numpy==2.0,<3",
            "numpy",
            "numpy===2.0",
            "==2.0",
        ] {
            assert!(parse_pinned(entry).is_err(), "{entry} should be rejected");
        }
    }
}
