//! Project directory names
//!
//! Project directories are named after the working directory with every `/` replaced
//! by `-`, so `/Users/alice/project` becomes `-Users-alice-project`. The encoding is
//! lossy: a dash that was part of a directory name decodes as a separator.

use std::path::PathBuf;

/// Recover the filesystem path from an encoded project directory name
pub fn decode(encoded: &str) -> PathBuf {
    match encoded.strip_prefix('-') {
        Some(rest) => PathBuf::from(format!("/{}", rest.replace('-', "/"))),
        None => PathBuf::from(encoded.replace('-', "/")),
    }
}

/// Decoded path as a string, the form stored on entries
pub fn decode_to_string(encoded: &str) -> String {
    decode(encoded).to_string_lossy().into_owned()
}

/// Last component of the decoded path, for display
pub fn display_name(encoded: &str) -> String {
    let decoded = decode(encoded);
    decoded
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| encoded.to_string())
}
