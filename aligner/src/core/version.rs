//! Ordering for release versions (`2.3.1`, `25.1.0`, `1.0rc1`, `1.0.post1`).

use std::cmp::Ordering;

/// Compare two versions: first the dotted release numbers, then any
/// pre/post/dev tags that follow them.
///
/// Missing trailing release numbers count as `0`. Tags order as
/// `dev < a < b < rc < (none) < post`, with their numbers compared
/// numerically, so `1.0rc9 < 1.0rc10 < 1.0 < 1.0.post1`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_release, a_tags) = split_version(a.trim());
    let (b_release, b_tags) = split_version(b.trim());

    let len = a_release.len().max(b_release.len());
    for idx in 0..len {
        let l = a_release.get(idx).copied().unwrap_or(0);
        let r = b_release.get(idx).copied().unwrap_or(0);
        if l != r {
            return l.cmp(&r);
        }
    }

    let release = Tag::RELEASE;
    let len = a_tags.len().max(b_tags.len());
    for idx in 0..len {
        let l = a_tags.get(idx).unwrap_or(&release);
        let r = b_tags.get(idx).unwrap_or(&release);
        let ord = l.cmp(r);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Tag {
    rank: i8,
    label: String,
    number: u64,
}

impl Tag {
    const RELEASE: Tag = Tag {
        rank: 0,
        label: String::new(),
        number: 0,
    };
}

fn split_version(version: &str) -> (Vec<u64>, Vec<Tag>) {
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
    let end = version
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(version.len());
    let release = version[..end]
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect();
    (release, parse_tags(&version[end..]))
}

fn parse_tags(mut rest: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    loop {
        rest = rest.trim_start_matches(['.', '-', '_', '+']);
        if rest.is_empty() {
            return tags;
        }
        let label_end = rest
            .find(|ch: char| !ch.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let label = rest[..label_end].to_ascii_lowercase();
        rest = &rest[label_end..];
        let digits_end = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        let number = rest[..digits_end].parse().unwrap_or(0);
        rest = &rest[digits_end..];
        if label.is_empty() && digits_end == 0 {
            // Neither a label nor a number: skip the odd character.
            let mut chars = rest.chars();
            chars.next();
            rest = chars.as_str();
            continue;
        }
        tags.push(tag(label, number));
    }
}

fn tag(label: String, number: u64) -> Tag {
    // `1.0-1` is shorthand for `1.0.post1`.
    let (rank, canonical) = match label.as_str() {
        "dev" => (-4, "dev"),
        "a" | "alpha" => (-3, "a"),
        "b" | "beta" => (-2, "b"),
        "rc" | "c" | "pre" | "preview" => (-1, "rc"),
        "" | "post" | "rev" | "r" => (1, "post"),
        _ => {
            return Tag {
                rank: -1,
                label,
                number,
            };
        }
    };
    Tag {
        rank,
        label: canonical.to_string(),
        number,
    }
}
