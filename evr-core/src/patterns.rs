//! Choice markers embedded in free question text.
//!
//! Two layouts are recognized, in order: lettered markers at line start
//! (`(A) ...`, `A. ...`, `A) ...`) forming a consecutive run from `A`, and
//! `- ` bullet lines. Either needs at least two entries. When the text has an
//! `Options:` or `Answer Choices:` header only the part after it is scanned.

use std::sync::OnceLock;

use regex::Regex;

const MIN_CHOICES: usize = 2;

fn options_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:options|answer choices)[ \t]*:").expect("options header regex")
    })
}

fn letter_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\(([A-Z])\)|([A-Z])[.)])(?:\s+(.*))?$").expect("letter marker regex")
    })
}

fn bullet_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s+(.*)$").expect("bullet regex"))
}

/// Choice texts found in `text`, in order. Empty when no layout matches.
pub fn embedded_choices(text: &str) -> Vec<String> {
    let region = match options_header().find(text) {
        Some(header) => &text[header.end()..],
        None => text,
    };
    let lines: Vec<&str> = region.lines().collect();

    let lettered = lettered_run(&lines);
    if lettered.len() >= MIN_CHOICES {
        return lettered;
    }

    let bulleted = bullet_items(&lines);
    if bulleted.len() >= MIN_CHOICES {
        return bulleted;
    }

    Vec::new()
}

pub fn has_embedded_choices(text: &str) -> bool {
    !embedded_choices(text).is_empty()
}

fn lettered_run(lines: &[&str]) -> Vec<String> {
    let mut starts: Vec<(usize, String)> = Vec::new();
    let mut expected = 'A';
    let mut end = lines.len();

    for (index, line) in lines.iter().enumerate() {
        let Some(captures) = letter_marker().captures(line) else {
            continue;
        };
        let letter = captures
            .get(1)
            .or_else(|| captures.get(2))
            .and_then(|m| m.as_str().chars().next());
        let rest = captures.get(3).map_or("", |m| m.as_str());

        if letter == Some(expected) {
            starts.push((index, rest.to_string()));
            expected = char::from_u32(expected as u32 + 1).unwrap_or('A');
        } else if !starts.is_empty() {
            end = index;
            break;
        }
    }

    collect_items(lines, &starts, end)
}

fn bullet_items(lines: &[&str]) -> Vec<String> {
    let starts: Vec<(usize, String)> = lines
        .iter()
        .enumerate()
        .filter_map(|(index, line)| {
            let captures = bullet_marker().captures(line)?;
            Some((index, captures.get(1).map_or("", |m| m.as_str()).to_string()))
        })
        .collect();

    collect_items(lines, &starts, lines.len())
}

/// Each item spans from its marker line up to the next marker, `end`, or
/// the first blank line, whichever comes first.
fn collect_items(lines: &[&str], starts: &[(usize, String)], end: usize) -> Vec<String> {
    starts
        .iter()
        .enumerate()
        .map(|(position, (line, first))| {
            let stop = starts
                .get(position + 1)
                .map_or(end, |(next, _)| *next)
                .min(end);

            let mut text = first.trim_end().to_string();
            for continuation in &lines[line + 1..stop] {
                if continuation.trim().is_empty() {
                    break;
                }
                text.push('\n');
                text.push_str(continuation.trim_end());
            }
            text.trim().to_string()
        })
        .collect()
}
