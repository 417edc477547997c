//! Request path to script path translation.
//!
//! # Responsibilities
//! - Map a `/`-separated request path onto the CGI root directory
//! - Never let the result escape the root
//!
//! # Design Decisions
//! - Total function: malformed input degrades to the root itself
//! - Percent-decoding happens before normalisation so encoded `..` and `/`
//!   are treated like their literal forms
//! - Components that are not simple names are dropped, not rejected

use std::ffi::OsString;
use std::path::{is_separator, Path, PathBuf};

use percent_encoding::percent_decode_str;

/// Translate a request path into a filesystem path below `root`.
///
/// Query and fragment suffixes are ignored and an explicit trailing slash is
/// kept on the result.
pub fn translate_path(root: &Path, path: &str) -> PathBuf {
    let path = path.split('?').next().unwrap_or_default();
    let path = path.split('#').next().unwrap_or_default();
    let trailing_slash = path.trim_end().ends_with('/');

    // Lossy decoding is exact for valid UTF-8.
    let decoded = percent_decode_str(path).decode_utf8_lossy();

    let mut resolved = root.to_path_buf();
    for word in normalize(&decoded) {
        if word.chars().any(is_separator) {
            continue;
        }
        resolved.push(word);
    }

    if trailing_slash {
        let mut raw: OsString = resolved.into_os_string();
        raw.push("/");
        resolved = PathBuf::from(raw);
    }
    resolved
}

/// Lexically collapse `.` and `..` segments, discarding empty ones.
fn normalize(path: &str) -> Vec<&str> {
    let mut words: Vec<&str> = Vec::new();
    for word in path.split('/') {
        match word {
            "" | "." => {}
            ".." => {
                words.pop();
            }
            other => words.push(other),
        }
    }
    words
}

/// Last `/`-delimited segment of a request path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, tail)| tail).unwrap_or(path)
}

/// Everything before the last `/` of a request path.
pub fn parent_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(head, _)| head).unwrap_or("")
}
