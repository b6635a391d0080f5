//! Output normalizer.
//!
//! Turns raw CLI text from a network device into a structured record:
//! `key: value` lines become an ordered field map, and pipe/tab separated
//! output becomes a list of rows keyed by the header line.
//!
//! Pure functions only, no I/O.

mod record;

pub use record::Record;

use serde::{Deserialize, Serialize};

/// Marker stored in [`NormalizedOutput::error`] when the device returned nothing.
pub const NO_OUTPUT: &str = "No output received";

/// Keys of [`Parsed`] that device fields may not take.
const RESERVED_KEYS: [&str; 2] = ["table", "raw_output"];

/// Prefix given to device keys that collide with [`RESERVED_KEYS`].
pub const RESERVED_KEY_PREFIX: &str = "device_";

/// Structured view of a command's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parsed {
    /// `key: value` pairs, first-occurrence order.
    #[serde(flatten)]
    pub fields: Record,
    /// Tabular rows, present only when a table was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<Record>>,
    /// Raw text fallback when neither extraction matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl Parsed {
    /// Returns true if nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.table.is_none() && self.raw_output.is_none()
    }

    /// Looks up a key-value field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    /// Returns the table rows, or an empty slice.
    #[must_use]
    pub fn rows(&self) -> &[Record] {
        self.table.as_deref().unwrap_or(&[])
    }
}

/// Normalized output for a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOutput {
    /// Command text that produced the output.
    pub command: String,
    /// Structured representation.
    pub parsed: Parsed,
    /// Raw text as received.
    pub raw: String,
    /// Set when there was nothing to parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Normalizes raw command output.
///
/// Empty or whitespace-only text short-circuits to the [`NO_OUTPUT`] marker.
#[must_use]
pub fn normalize(raw: &str, command: &str) -> NormalizedOutput {
    if raw.trim().is_empty() {
        return NormalizedOutput {
            command: command.to_string(),
            parsed: Parsed::default(),
            raw: raw.to_string(),
            error: Some(NO_OUTPUT.to_string()),
        };
    }

    let mut parsed = Parsed {
        fields: extract_fields(raw),
        ..Parsed::default()
    };

    let rows = extract_table(raw);
    if !rows.is_empty() {
        parsed.table = Some(rows);
    }

    if parsed.is_empty() {
        parsed.raw_output = Some(raw.to_string());
    }

    NormalizedOutput {
        command: command.to_string(),
        parsed,
        raw: raw.to_string(),
        error: None,
    }
}

/// Collects `key: value` pairs, splitting each line at its first colon.
///
/// A key equal to a reserved [`Parsed`] key is stored with
/// [`RESERVED_KEY_PREFIX`] so it cannot shadow the table or raw fallback.
fn extract_fields(raw: &str) -> Record {
    let mut fields = Record::new();

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let key = if RESERVED_KEYS.contains(&key) {
            format!("{RESERVED_KEY_PREFIX}{key}")
        } else {
            key.to_string()
        };
        fields.insert(key, value.trim().to_string());
    }

    fields
}

/// Returns true if the text is explicitly delimited (any pipe or tab).
fn is_delimited(raw: &str) -> bool {
    raw.lines().any(|line| line.contains('|') || line.contains('\t'))
}

/// Returns true if a header split on wide gaps looks like column titles.
///
/// Titles never carry a colon, which keeps aligned `key:   value` listings
/// out of the table path.
fn is_aligned_header(header: &[String]) -> bool {
    header.len() >= 2 && header.iter().all(|title| !title.contains(':'))
}

/// Splits a table line on pipes, tabs and runs of two or more whitespace
/// characters.
fn split_columns(line: &str) -> Vec<String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut pending_ws = String::new();

    for ch in line.chars() {
        if ch == '|' || ch == '\t' {
            pending_ws.clear();
            push_column(&mut columns, &mut current);
        } else if ch.is_whitespace() {
            pending_ws.push(ch);
        } else {
            if pending_ws.chars().count() >= 2 {
                push_column(&mut columns, &mut current);
            } else {
                current.push_str(&pending_ws);
            }
            pending_ws.clear();
            current.push(ch);
        }
    }
    push_column(&mut columns, &mut current);

    columns
}

fn push_column(columns: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        columns.push(trimmed.to_string());
    }
    current.clear();
}

/// Extracts rows from tabular output.
///
/// The first retained line is the header. Rows whose column count differs
/// from the header are dropped.
fn extract_table(raw: &str) -> Vec<Record> {
    let delimited = is_delimited(raw);

    let mut lines = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(split_columns)
        .filter(|columns| !columns.is_empty());

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    if !delimited && !is_aligned_header(&header) {
        return Vec::new();
    }

    lines
        .filter(|columns| columns.len() == header.len())
        .map(|columns| header.iter().cloned().zip(columns).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_columns_on_pipes_and_wide_gaps() {
        assert_eq!(split_columns("Name  IP  Status"), vec!["Name", "IP", "Status"]);
        assert_eq!(split_columns("| a | b |"), vec!["a", "b"]);
        assert_eq!(
            split_columns("GigabitEthernet0/1\tup  admin up"),
            vec!["GigabitEthernet0/1", "up", "admin up"]
        );
    }

    #[test]
    fn test_single_spaces_stay_inside_a_column() {
        assert_eq!(split_columns("Vlan 10   active"), vec!["Vlan 10", "active"]);
    }

    #[test]
    fn test_extract_fields_overwrites_duplicates_in_place() {
        let fields = extract_fields("a: 1\nb: 2\na: 3\n");
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(fields.get("a"), Some("3"));
    }

    #[test]
    fn test_extract_fields_keeps_colons_in_value() {
        let fields = extract_fields("uptime: 3 days, 04:12:55");
        assert_eq!(fields.get("uptime"), Some("3 days, 04:12:55"));
    }

    #[test]
    fn test_reserved_keys_are_prefixed() {
        let out = normalize("A|B\n1|2\ntable: main\nraw_output: x", "show route");
        assert_eq!(out.parsed.get("device_table"), Some("main"));
        assert_eq!(out.parsed.get("device_raw_output"), Some("x"));
        assert_eq!(out.parsed.get("table"), None);
        assert_eq!(out.parsed.rows().len(), 1);

        let json = serde_json::to_value(&out).unwrap();
        assert!(json["parsed"]["table"].is_array());
        let back: NormalizedOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn test_aligned_columns_without_delimiters() {
        let rows = extract_table("Name  IP\nr1  10.0.0.1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("IP"), Some("10.0.0.1"));
    }

    #[test]
    fn test_aligned_key_values_are_not_a_table() {
        assert!(extract_table("Version:   15.1\nHostname:  router1").is_empty());
        assert!(extract_table("just one column\nand another").is_empty());
    }

    #[test]
    fn test_separator_lines_are_skipped() {
        let rows = extract_table("# comment\nA | B\n---+---\n1 | 2\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("A"), Some("1"));
        assert_eq!(rows[0].get("B"), Some("2"));
    }
}
