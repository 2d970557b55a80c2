#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One assistant line with ids, a model and input/output tokens
pub fn usage_line(message_id: &str, timestamp: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"message":{{"id":"{message_id}","model":"claude-sonnet-4","usage":{{"input_tokens":{input},"output_tokens":{output}}}}},"requestId":"req-{message_id}","timestamp":"{timestamp}"}}"#
    )
}

/// A line with an explicit `costUSD`
pub fn priced_line(message_id: &str, timestamp: &str, tokens: u64, cost: f64) -> String {
    format!(
        r#"{{"message":{{"id":"{message_id}","model":"claude-opus-4","usage":{{"input_tokens":{tokens}}}}},"requestId":"req-{message_id}","costUSD":{cost},"timestamp":"{timestamp}"}}"#
    )
}

/// Write `<home>/projects/<project>/<file>` with one line per element
pub fn write_session(home: &Path, project: &str, file: &str, lines: &[String]) -> PathBuf {
    let dir = home.join("projects").join(project);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file);
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

/// Two projects, three files, one message duplicated across files and some noise
pub fn setup_test_environment() -> TempDir {
    let home = TempDir::new().unwrap();

    write_session(
        home.path(),
        "-work-api",
        "s1.jsonl",
        &[
            usage_line("m1", "2025-01-01T10:00:00Z", 100, 50),
            "{broken json".to_string(),
            String::new(),
            usage_line("m2", "2025-01-01T11:00:00Z", 200, 100),
        ],
    );
    write_session(
        home.path(),
        "-work-api",
        "s2.jsonl",
        &[
            // Same message as in s1.jsonl
            usage_line("m2", "2025-01-01T11:00:00Z", 200, 100),
            usage_line("m3", "2025-01-02T09:00:00Z", 300, 150),
        ],
    );
    write_session(
        home.path(),
        "-work-web",
        "s3.jsonl",
        &[
            r#"{"message":{"role":"user","content":"hello"},"timestamp":"2025-01-02T09:30:00Z"}"#.to_string(),
            priced_line("m4", "2025-01-02T10:00:00Z", 1000, 2.5),
        ],
    );

    home
}
