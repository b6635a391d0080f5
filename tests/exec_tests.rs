//! Integration tests for multi-command execution.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use netfleet::exec::CommandExecutor;
use netfleet::normalize::NO_OUTPUT;
use netfleet::ssh::{
    ConnectOutcome, DeviceScript, Fault, SessionError, SshSettings, TranscriptConnector,
};

fn executor(connector: TranscriptConnector) -> CommandExecutor {
    CommandExecutor::new(Arc::new(connector), SshSettings::default())
}

#[test]
fn test_second_command_failure_keeps_first_result() {
    let connector = TranscriptConnector::new().device(
        DeviceScript::new("r1")
            .respond("cmd1", "Hostname: r1\nVersion: 15.1")
            .fail("cmd2", Fault::Disconnect),
    );
    let stats = connector.stats();

    let report = executor(connector)
        .execute_all("r1", "admin", "pw", &["cmd1", "cmd2"])
        .unwrap();

    assert_eq!(report.results.len(), 2);
    let first = &report.results[0];
    assert!(first.error.is_none());
    assert_eq!(first.structured.parsed.get("Hostname"), Some("r1"));
    assert_eq!(first.structured.parsed.get("Version"), Some("15.1"));

    let second = &report.results[1];
    assert_eq!(second.command, "cmd2");
    assert!(second.error.is_some());
    assert_eq!(second.structured.error.as_deref(), Some(NO_OUTPUT));
    assert_eq!(stats.closed(), 1);
}

#[test]
fn test_stderr_used_only_when_stdout_empty() {
    let connector = TranscriptConnector::new().device(
        DeviceScript::new("r1")
            .respond_stderr("bad", "% Invalid input")
            .respond("good", "Status: ok"),
    );
    let report = executor(connector)
        .execute_all("r1", "admin", "pw", &["bad", "good"])
        .unwrap();

    assert_eq!(report.results[0].raw_output, "% Invalid input");
    assert_eq!(report.results[1].raw_output, "Status: ok");
}

#[test]
fn test_auth_failure_aborts_everything() {
    let connector = TranscriptConnector::new().device(
        DeviceScript::new("r1")
            .password("right")
            .respond("cmd1", "x"),
    );
    let stats = connector.stats();

    let result = executor(connector).execute_all("r1", "admin", "wrong", &["cmd1"]);
    assert!(matches!(result, Err(SessionError::Authentication(_))));
    assert!(stats.commands().is_empty());
}

#[test]
fn test_refused_connection_is_connection_error() {
    let connector = TranscriptConnector::new()
        .device(DeviceScript::new("r1").connect(ConnectOutcome::Refused));
    let stats = connector.stats();

    let result = executor(connector).execute_all("r1", "admin", "pw", &["cmd1"]);
    assert!(matches!(result, Err(SessionError::Connection(_))));
    assert_eq!(stats.opened(), 0);
}

#[test]
fn test_connect_timeout_closes_exactly_once() {
    let connector = TranscriptConnector::new()
        .device(DeviceScript::new("r1").connect(ConnectOutcome::Timeout));
    let stats = connector.stats();
    let settings = SshSettings {
        connect_timeout: Duration::from_secs(3),
        ..SshSettings::default()
    };

    let result = CommandExecutor::new(Arc::new(connector), settings)
        .execute_all("r1", "admin", "pw", &["cmd1"]);
    assert_eq!(result.err(), Some(SessionError::Timeout(Duration::from_secs(3))));
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
}

#[test]
fn test_report_serializes_in_order() {
    let connector = TranscriptConnector::new()
        .device(DeviceScript::new("r1").respond("a", "k: v").respond("b", "x"));
    let report = executor(connector)
        .execute_all("r1", "admin", "pw", &["b", "a", "b"])
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    let commands: Vec<_> = value["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["command"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(commands, vec!["b", "a", "b"]);
    assert_eq!(value["results"][1]["structured"]["parsed"]["k"], "v");
}

#[test]
fn test_empty_host_is_connection_error() {
    let result = executor(TranscriptConnector::new()).execute_all("", "admin", "pw", &["cmd1"]);
    assert!(matches!(result, Err(SessionError::Connection(_))));
}
