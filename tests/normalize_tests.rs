//! Integration tests for the output normalizer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use netfleet::normalize::{NO_OUTPUT, Record, normalize};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn record(pairs: &[(&str, &str)]) -> Record {
    pairs.iter().copied().collect()
}

#[test]
fn test_empty_output_marker() {
    let out = normalize("", "show clock");
    assert_eq!(out.command, "show clock");
    assert_eq!(out.raw, "");
    assert_eq!(out.error.as_deref(), Some(NO_OUTPUT));
    assert!(out.parsed.is_empty());
}

#[test]
fn test_key_value_lines() {
    let out = normalize("Hostname: router1\nVersion: 15.1\n", "show version");
    assert_eq!(out.parsed.fields, record(&[("Hostname", "router1"), ("Version", "15.1")]));
    assert!(out.parsed.table.is_none());
    assert!(out.parsed.raw_output.is_none());
    assert!(out.error.is_none());
}

#[test]
fn test_aligned_table() {
    let out = normalize("Name  IP  Status\nr1  10.0.0.1  up\n", "show devices");
    assert_eq!(
        out.parsed.rows(),
        &[record(&[("Name", "r1"), ("IP", "10.0.0.1"), ("Status", "up")])]
    );
}

#[test]
fn test_mismatched_row_dropped() {
    let raw = "Name | IP | Status\n---------\nr1 | 10.0.0.1 | up\nr2 | 10.0.0.2\n";
    let out = normalize(raw, "show devices");
    let rows = out.parsed.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Name"), Some("r1"));
}

#[test]
fn test_fields_and_table_coexist() {
    let raw = "Interface\tStatus\neth0\tup\nUptime: 3 days\n";
    let out = normalize(raw, "show int");
    assert_eq!(out.parsed.get("Uptime"), Some("3 days"));
    assert_eq!(out.parsed.rows().len(), 1);
}

#[test]
fn test_plain_text_falls_back_to_raw() {
    let out = normalize("% Invalid input detected", "shw ver");
    assert_eq!(out.parsed.raw_output.as_deref(), Some("% Invalid input detected"));
}

#[test]
fn test_serialized_shape() {
    let out = normalize("Name  Status\nx  up\nHostname: r1", "show");
    let value = serde_json::to_value(&out).unwrap();
    assert_eq!(
        value,
        json!({
            "command": "show",
            "parsed": {
                "Hostname": "r1",
                "table": [{ "Name": "x", "Status": "up" }]
            },
            "raw": "Name  Status\nx  up\nHostname: r1"
        })
    );
}

proptest! {
    #[test]
    fn prop_normalize_never_panics(raw in "\\PC{0,200}", command in "[a-z ]{0,20}") {
        let out = normalize(&raw, &command);
        prop_assert_eq!(out.raw, raw.clone());
        prop_assert_eq!(out.error.is_some(), raw.trim().is_empty());
    }

    #[test]
    fn prop_rows_match_header_width(rows in prop::collection::vec("[a-z]{1,6}\\|[a-z]{1,6}", 1..10)) {
        let raw = format!("A|B\n{}", rows.join("\n"));
        let out = normalize(&raw, "t");
        prop_assert_eq!(out.parsed.rows().len(), rows.len());
        for row in out.parsed.rows() {
            prop_assert_eq!(row.len(), 2);
        }
    }
}
