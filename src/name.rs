//! Domain name helpers.
//!
//! Names are held in presentation form, lowercase, without the trailing dot.
//! The root is the empty string. Labels are separated by unescaped dots, so
//! `action\.domains.isi.edu` has three labels, the first being `action.domains`.

use crate::bail;
use crate::escape;
use std::io;

/// Maximum length of a single label, in octets.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a name in wire form, in octets.
pub const MAX_NAME_LEN: usize = 255;

/// Characters escaped with a backslash when a label is rendered.
const SPECIAL: &[u8] = b".;()";

/// Splits `name` on unescaped dots, dropping empty labels (such as those
/// produced by a leading dot).
fn split(name: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let bytes = name.as_bytes();

    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'.' => {
                if i > start {
                    result.push(&name[start..i]);
                }
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        result.push(&name[start..]);
    }

    result
}

/// Returns the unescaped labels of `name`.
///
/// # Errors
///
/// Fails with `InvalidData` if a label is longer than 63 octets, the whole
/// name is longer than 255 octets in wire form, or an escape is malformed.
pub fn labels(name: &str) -> io::Result<Vec<Vec<u8>>> {
    let mut labels = Vec::new();
    let mut total = 1; // The terminating root label.

    for text in split(name) {
        let label = match escape::unescape(text) {
            Ok(label) => label,
            Err(e) => bail!(InvalidData, "invalid label '{}' in '{}': {}", text, name, e),
        };

        if label.len() > MAX_LABEL_LEN {
            bail!(
                InvalidData,
                "label '{}' longer than {} octets",
                text,
                MAX_LABEL_LEN
            );
        }

        total += label.len() + 1;
        labels.push(label);
    }

    if total > MAX_NAME_LEN {
        bail!(
            InvalidData,
            "name '{}' longer than {} octets",
            name,
            MAX_NAME_LEN
        );
    }

    Ok(labels)
}

/// Renders a single raw label in presentation form.
pub fn escape_label(label: &[u8]) -> String {
    escape::escape(&label.to_ascii_lowercase(), SPECIAL)
}

/// Joins raw labels into a presentation form name.
pub fn from_labels<L: AsRef<[u8]>>(labels: &[L]) -> String {
    labels
        .iter()
        .map(|l| escape_label(l.as_ref()))
        .collect::<Vec<String>>()
        .join(".")
}

/// Returns true if the name ends in an unescaped dot.
pub fn is_absolute(name: &str) -> bool {
    if !name.ends_with('.') {
        return false;
    }

    let slashes = name[..name.len() - 1]
        .bytes()
        .rev()
        .take_while(|b| *b == b'\\')
        .count();

    slashes % 2 == 0
}

/// Returns the canonical form of `name`: lowercase without the trailing dot.
pub fn normalize(name: &str) -> String {
    let name = if is_absolute(name) {
        &name[..name.len() - 1]
    } else {
        name
    };

    name.to_ascii_lowercase()
}

/// Expands a zone file owner or target token against `origin`.
///
/// A token ending in `.` is absolute, `@` is the origin itself, and anything
/// else is relative to the origin.
pub fn resolve(token: &str, origin: &str) -> String {
    if token == "@" {
        return normalize(origin);
    }

    if is_absolute(token) {
        return normalize(token);
    }

    let origin = normalize(origin);
    if origin.is_empty() {
        return normalize(token);
    }

    normalize(&format!("{}.{}", token, origin))
}

/// Returns true if `name` is `parent` or underneath it.
pub fn is_subdomain(name: &str, parent: &str) -> bool {
    if parent.is_empty() || name == parent {
        return true;
    }

    match name.strip_suffix(parent) {
        // The separating dot must not itself be escaped.
        Some(prefix) => is_absolute(prefix),
        None => false,
    }
}

/// Converts user supplied (possibly unicode) input into a canonical name.
///
/// Input containing escapes is taken as is, everything else is punycode
/// encoded.
pub fn to_ascii(domain: &str) -> String {
    if domain.contains('\\') {
        return normalize(domain);
    }

    match idna::domain_to_ascii(domain) {
        Ok(ascii) => normalize(&ascii),
        Err(_) => normalize(domain),
    }
}
