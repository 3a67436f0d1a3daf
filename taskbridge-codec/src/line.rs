//! Line-level parsing and building.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};

use taskbridge_core::types::{DueStamp, Priority, TaskFields, TaskId};

/// Spaces per depth level in canonical output. A tab on input counts as one
/// level.
pub const INDENT_WIDTH: usize = 4;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// A successfully parsed task line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Indentation depth in units (tabs, or groups of [`INDENT_WIDTH`] spaces).
    pub indent_units: usize,
    pub fields: TaskFields,
    /// Embedded `[sync:: …]` id, if the line has been synced before.
    pub id: Option<TaskId>,
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Parse one document line into task fields.
///
/// Returns `None` for non-task lines and for task lines with malformed
/// annotation values (bad date, unknown priority keyword, empty id).
pub fn parse(line: &str) -> Option<ParsedLine> {
    let (indent_units, rest) = split_indent(line);
    let (completed, body) = strip_bullet(rest)?;
    let (content_text, raw) = collect_annotations(body);

    let due_date = match raw.due {
        Some(value) => Some(NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()?),
        None => None,
    };
    let due_time = match raw.time {
        Some(value) => Some(NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()?),
        None => None,
    };
    // A time-of-day without a date has no meaning on the remote side.
    let due = match (due_date, due_time) {
        (Some(date), time) => Some(DueStamp { date, time }),
        (None, Some(_)) => return None,
        (None, None) => None,
    };
    let priority = match raw.priority {
        Some(value) => Some(Priority::from_keyword(value.trim())?),
        None => None,
    };
    let duration_minutes = match raw.duration {
        Some(value) => Some(parse_duration(value.trim())?),
        None => None,
    };
    let id = match raw.id {
        Some(value) => Some(parse_id(value.trim())?),
        None => None,
    };

    let (content, labels) = split_labels(&content_text);

    Some(ParsedLine {
        indent_units,
        fields: TaskFields {
            content,
            completed,
            due,
            priority,
            duration_minutes,
            labels,
        },
        id,
    })
}

/// Cheap embedded-id scan used by the vault-wide bidirectional search.
///
/// Does not validate the rest of the line.
pub fn extract_id(line: &str) -> Option<TaskId> {
    let start = line.find("[sync::")? + "[sync::".len();
    let rest = &line[start..];
    let end = rest.find(']')?;
    parse_id(rest[..end].trim())
}

fn split_indent(line: &str) -> (usize, &str) {
    let mut units = 0usize;
    let mut spaces = 0usize;
    let mut offset = 0usize;
    for ch in line.chars() {
        match ch {
            '\t' => units += 1,
            ' ' => {
                spaces += 1;
                if spaces == INDENT_WIDTH {
                    units += 1;
                    spaces = 0;
                }
            }
            _ => break,
        }
        offset += ch.len_utf8();
    }
    (units, &line[offset..])
}

fn strip_bullet(rest: &str) -> Option<(bool, &str)> {
    let body = rest.strip_prefix("- ").or_else(|| rest.strip_prefix("* "))?;
    let body = body.strip_prefix('[')?;
    let mut chars = body.chars();
    let completed = match chars.next()? {
        ' ' => false,
        'x' | 'X' => true,
        _ => return None,
    };
    let body = chars.as_str().strip_prefix(']')?;
    Some((completed, body.strip_prefix(' ').unwrap_or(body)))
}

#[derive(Debug, Default)]
struct RawAnnotations<'a> {
    due: Option<&'a str>,
    time: Option<&'a str>,
    priority: Option<&'a str>,
    duration: Option<&'a str>,
    id: Option<&'a str>,
}

/// Pull `[key:: value]` annotations out of the body; everything else —
/// including unknown bracketed text such as markdown links — stays content.
fn collect_annotations(body: &str) -> (String, RawAnnotations<'_>) {
    let mut content = String::with_capacity(body.len());
    let mut raw = RawAnnotations::default();
    let mut i = 0usize;

    while i < body.len() {
        if body[i..].starts_with('[') {
            if let Some((key, value, consumed)) = read_annotation(&body[i..]) {
                let slot = match key {
                    "due" => Some(&mut raw.due),
                    "time" => Some(&mut raw.time),
                    "p" => Some(&mut raw.priority),
                    "dur" => Some(&mut raw.duration),
                    "sync" => Some(&mut raw.id),
                    _ => None,
                };
                if let Some(slot) = slot {
                    *slot = Some(value);
                    i += consumed;
                    continue;
                }
            }
        }
        let ch = body[i..].chars().next().unwrap_or('\0');
        if ch == '\0' {
            break;
        }
        content.push(ch);
        i += ch.len_utf8();
    }

    (content, raw)
}

/// `[key:: value]` starting at a `[`. Returns `(key, value, bytes consumed)`.
fn read_annotation(s: &str) -> Option<(&str, &str, usize)> {
    let inner = &s[1..];
    let sep = inner.find("::")?;
    let close = inner.find(']')?;
    if close < sep {
        return None;
    }
    let key = &inner[..sep];
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let value = &inner[sep + 2..close];
    Some((key, value, 1 + close + 1))
}

fn parse_duration(value: &str) -> Option<u32> {
    let digits = value.strip_suffix('m').unwrap_or(value);
    digits.parse().ok()
}

fn parse_id(value: &str) -> Option<TaskId> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return None;
    }
    Some(TaskId::from(value))
}

fn split_labels(content_text: &str) -> (String, BTreeSet<String>) {
    let mut labels = BTreeSet::new();
    let mut words = Vec::new();
    for token in content_text.split_whitespace() {
        match token.strip_prefix('#') {
            Some(label) if !label.is_empty() => {
                labels.insert(label.to_string());
            }
            _ => words.push(token),
        }
    }
    (words.join(" "), labels)
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Build the canonical line for `fields` at `depth`.
///
/// Labels come out in `BTreeSet` order, annotations in a fixed order, so
/// building is deterministic and `parse` round-trips the result.
pub fn build(fields: &TaskFields, id: Option<&TaskId>, depth: usize) -> String {
    let mut line = " ".repeat(depth * INDENT_WIDTH);
    line.push_str(if fields.completed { "- [x] " } else { "- [ ] " });
    line.push_str(fields.content.trim());

    for label in &fields.labels {
        line.push_str(&format!(" #{label}"));
    }
    if let Some(due) = &fields.due {
        line.push_str(&format!(" [due:: {}]", due.date.format(DATE_FORMAT)));
        if let Some(time) = due.time {
            line.push_str(&format!(" [time:: {}]", time.format(TIME_FORMAT)));
        }
    }
    if let Some(priority) = fields.priority {
        line.push_str(&format!(" [p:: {}]", priority.keyword()));
    }
    if let Some(duration) = fields.duration_minutes {
        line.push_str(&format!(" [dur:: {duration}m]"));
    }
    if let Some(id) = id {
        line.push_str(&format!(" [sync:: {}]", id.0));
    }
    line
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
