//! Envelope stripping for non-entry documents.
//!
//! Only the entry-point aggregator owns the document envelope. Every other
//! document's exported source form is cut down to its body: the lines
//! strictly between the begin and end markers, minus raw-include directives.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::config::EnvelopeConfig;

/// Return the body of `text`, or `None` when it has no begin marker (the
/// text is already body-only).
pub fn strip(text: &str, markers: &EnvelopeConfig) -> Option<String> {
    if !text.lines().any(|l| l.contains(&markers.begin_marker)) {
        return None;
    }

    let mut body = String::with_capacity(text.len());
    let mut inside = false;
    for line in text.lines() {
        if !inside {
            if line.contains(&markers.begin_marker) {
                inside = true;
            }
            continue;
        }
        if line.contains(&markers.end_marker) {
            inside = false;
            continue;
        }
        if line.starts_with(&markers.include_prefix) {
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    Some(body)
}

/// Strip the envelope of the file at `path` in place. Returns whether the
/// file was rewritten.
pub fn strip_file(path: &Path, markers: &EnvelopeConfig) -> io::Result<bool> {
    let text = fs::read_to_string(path)?;
    let Some(body) = strip(&text, markers) else {
        debug!(path = %path.display(), "no envelope to strip");
        return Ok(false);
    };

    // Replaced atomically; readers never see a partial body.
    let tmp = path.with_extension("envelope.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "stripped document envelope");
    Ok(true)
}
