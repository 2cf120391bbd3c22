//! Presentation format escapes, shared by domain names, TXT strings and SVCB
//! parameter values.
//!
//! In names and character-strings `\DDD` is three decimal digits (`\000` to
//! `\255`), as in [rfc1035 section 5.1](https://datatracker.ietf.org/doc/html/rfc1035#section-5.1).
//! SVCB parameter values write the same sequence in octal (`\000` to `\377`).
//! `\X` is always the literal character `X`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscapeError {
    #[error("invalid escape sequence '\\{0}': expected three digits")]
    InvalidDigits(String),

    #[error("escape sequence '\\{0}' is out of range")]
    OutOfRange(String),

    #[error("dangling '\\' at end of input")]
    Dangling,
}

/// Decodes the escapes in a name or character-string into raw bytes.
pub fn unescape(s: &str) -> Result<Vec<u8>, EscapeError> {
    unescape_radix(s, 10)
}

/// Decodes the escapes in an SVCB parameter value, where `\DDD` is octal.
pub fn unescape_octal(s: &str) -> Result<Vec<u8>, EscapeError> {
    unescape_radix(s, 8)
}

fn unescape_radix(s: &str, radix: u32) -> Result<Vec<u8>, EscapeError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        let next = match bytes.get(i + 1) {
            Some(b) => *b,
            None => return Err(EscapeError::Dangling),
        };

        if !next.is_ascii_digit() {
            out.push(next);
            i += 2;
            continue;
        }

        // A digit starts a \DDD sequence, which must be complete.
        let end = (i + 4).min(bytes.len());
        let digits = &bytes[i + 1..end];
        let text = String::from_utf8_lossy(digits).into_owned();
        if digits.len() != 3 || !digits.iter().all(|d| char::from(*d).is_digit(radix)) {
            return Err(EscapeError::InvalidDigits(text));
        }

        let value = digits
            .iter()
            .fold(0_u32, |acc, d| acc * radix + u32::from(d - b'0'));
        let value = u8::try_from(value).map_err(|_| EscapeError::OutOfRange(text))?;

        out.push(value);
        i += 4;
    }

    Ok(out)
}

/// Encodes raw bytes, escaping `\`, `"` and any byte in `special` with a
/// backslash, and any non printable byte as decimal `\DDD`.
pub fn escape(bytes: &[u8], special: &[u8]) -> String {
    escape_with(bytes, special, |b| format!("\\{:03}", b))
}

/// As [`escape`], for SVCB parameter values, with octal `\DDD`.
pub fn escape_octal(bytes: &[u8], special: &[u8]) -> String {
    escape_with(bytes, special, |b| format!("\\{:03o}", b))
}

fn escape_with(bytes: &[u8], special: &[u8], digits: impl Fn(u8) -> String) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\\' || b == b'"' || special.contains(&b) {
            out.push('\\');
            out.push(b as char);
        } else if (0x21..=0x7e).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&digits(b));
        }
    }
    out
}

/// Renders raw bytes as a double quoted character-string. Spaces are kept
/// as is, everything else is escaped as in [`escape`].
pub fn quote(bytes: &[u8]) -> String {
    let parts: Vec<String> = bytes
        .split(|b| *b == b' ')
        .map(|chunk| escape(chunk, &[]))
        .collect();

    format!("\"{}\"", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unescape() {
        let tests: Vec<(&str, Vec<u8>)> = vec![
            ("abc", b"abc".to_vec()),
            ("a\\.b", b"a.b".to_vec()),
            ("\\\\", b"\\".to_vec()),
            ("\\032", b" ".to_vec()),
            ("a\\032b", b"a b".to_vec()),
            ("\\128", vec![0x80]),
            ("\\255", vec![0xff]),
            ("\\000x", vec![0, b'x']),
        ];

        for (input, want) in tests {
            assert_eq!(unescape(input), Ok(want), "unescape('{}')", input);
        }
    }

    #[test]
    fn test_unescape_octal() {
        assert_eq!(unescape_octal("\\040"), Ok(b" ".to_vec()));
        assert_eq!(unescape_octal("h2\\054h3"), Ok(b"h2,h3".to_vec()));
        assert_eq!(unescape_octal("\\377"), Ok(vec![0xff]));
        assert_eq!(
            unescape_octal("\\089"),
            Err(EscapeError::InvalidDigits("089".to_string()))
        );
        assert_eq!(
            unescape_octal("\\400"),
            Err(EscapeError::OutOfRange("400".to_string()))
        );
    }

    #[test]
    fn test_unescape_errors() {
        assert_eq!(
            unescape("\\09"),
            Err(EscapeError::InvalidDigits("09".to_string()))
        );
        assert_eq!(
            unescape("\\12x"),
            Err(EscapeError::InvalidDigits("12x".to_string()))
        );
        assert_eq!(
            unescape("\\256"),
            Err(EscapeError::OutOfRange("256".to_string()))
        );
        assert_eq!(
            unescape("\\999"),
            Err(EscapeError::OutOfRange("999".to_string()))
        );
        assert_eq!(unescape("abc\\"), Err(EscapeError::Dangling));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(b"a b", &[]), "a\\032b");
        assert_eq!(escape(b"a.b", b"."), "a\\.b");
        assert_eq!(escape(&[0x80], &[]), "\\128");
        assert_eq!(escape(b"say \"hi\"", &[]), "say\\032\\\"hi\\\"");
        assert_eq!(escape_octal(b"a b", &[]), "a\\040b");
        assert_eq!(unescape(&escape(&[0, 1, 255, b'\\'], &[])), Ok(vec![0, 1, 255, b'\\']));
        assert_eq!(
            unescape_octal(&escape_octal(&[0, 255, b','], b",")),
            Ok(vec![0, 255, b','])
        );
        assert_eq!(quote(b"v=spf1 -all"), "\"v=spf1 -all\"");
        assert_eq!(quote(b""), "\"\"");
    }
}
