//! Parses resources from their zone file presentation format, as produced by
//! the Display implementations.

use crate::escape;
use crate::escape::EscapeError;
use crate::name;
use crate::resource::*;
use crate::Type;
use core::num::ParseIntError;
use regex::Regex;
use std::net::AddrParseError;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FromStrError {
    #[error("the {0} resource type doesn't have a text representation")]
    UnsupportedType(Type),

    #[error("{0}")]
    InvalidFormat(String),

    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),

    #[error(transparent)]
    AddrParseError(#[from] AddrParseError),

    #[error(transparent)]
    EscapeError(#[from] EscapeError),
}

macro_rules! invalid {
    ($($arg:tt)*) => {
        FromStrError::InvalidFormat(format!($($arg)*))
    };
}

/// A single whitespace separated field of a record, with escapes intact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Field {
    pub text: String,

    /// True if the field was a double quoted string (without the quotes).
    pub quoted: bool,
}

impl Field {
    #[cfg(test)]
    pub fn word(text: &str) -> Field {
        Field {
            text: text.to_string(),
            quoted: false,
        }
    }
}

/// Splits `s` into fields. A field is a run of non-whitespace, or a double
/// quoted string. A `key="value"` pair stays a single field.
pub(crate) fn tokenize(s: &str) -> Result<Vec<Field>, FromStrError> {
    let mut fields = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let quoted = c == '"';
        if quoted {
            chars.next();
        }

        let mut text = String::new();
        let mut in_quotes = quoted;
        let mut closed = !quoted;

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    text.push(c);
                    match chars.next() {
                        Some(c) => text.push(c),
                        None => return Err(EscapeError::Dangling.into()),
                    }
                }
                '"' if in_quotes => {
                    in_quotes = false;
                    closed = true;
                    if quoted {
                        break;
                    }
                    text.push(c);
                }
                '"' if text.ends_with('=') => {
                    in_quotes = true;
                    closed = false;
                    text.push(c);
                }
                '"' => return Err(invalid!("unexpected '\"' in '{}'", s)),
                c if c.is_whitespace() && !in_quotes => break,
                c => text.push(c),
            }
        }

        if !closed {
            return Err(invalid!("missing closing '\"' in '{}'", s));
        }

        fields.push(Field { text, quoted });
    }

    Ok(fields)
}

/// Parses a TTL: either a plain number of seconds, or a sequence of numbers
/// with `w`, `d`, `h`, `m` or `s` units such as `1w2d`.
pub fn parse_ttl(s: &str) -> Result<u32, FromStrError> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^(?i)(?:\d+[wdhms])+$").unwrap();
        static ref PART: Regex = Regex::new(r"(?i)(\d+)([wdhms])").unwrap();
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(s.parse()?);
    }

    if !RE.is_match(s) {
        return Err(invalid!("invalid TTL '{}'", s));
    }

    let mut total: u64 = 0;
    for caps in PART.captures_iter(s) {
        let n: u64 = caps[1].parse()?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "w" => 7 * 24 * 3600,
            "d" => 24 * 3600,
            "h" => 3600,
            "m" => 60,
            _ => 1,
        };
        total = total.saturating_add(n.saturating_mul(unit));
    }

    u32::try_from(total).map_err(|_| invalid!("TTL '{}' is too large", s))
}

/// Parses an SOA timer, which is a signed 32 bit count of seconds.
fn parse_interval(field: &str, s: &str) -> Result<i32, FromStrError> {
    i32::try_from(parse_ttl(s)?).map_err(|_| invalid!("SOA {} '{}' is too large", field, s))
}

/// Returns true if the field looks like a TTL.
pub(crate) fn is_ttl(s: &str) -> bool {
    parse_ttl(s).is_ok()
}

fn text(field: &Field) -> Result<String, FromStrError> {
    Ok(String::from_utf8_lossy(&escape::unescape(&field.text)?).into_owned())
}

fn expect_count(r#type: Type, fields: &[Field], n: usize) -> Result<(), FromStrError> {
    if fields.len() != n {
        return Err(invalid!(
            "{} expects {} fields, found {}",
            r#type,
            n,
            fields.len()
        ));
    }
    Ok(())
}

/// Unquoted fields only, for the types that never take quoted strings.
fn words(r#type: Type, fields: &[Field], n: usize) -> Result<Vec<&str>, FromStrError> {
    expect_count(r#type, fields, n)?;
    fields
        .iter()
        .map(|f| match f.quoted {
            true => Err(invalid!("unexpected quoted string in {} record", r#type)),
            false => Ok(f.text.as_str()),
        })
        .collect()
}

impl Resource {
    // Similar to the FromStr but needs the record Type since they are ambiguous.
    /// Parses a resource from its presentation format. Names are taken as absolute.
    pub fn from_str(r#type: Type, s: &str) -> Result<Self, FromStrError> {
        Self::from_fields(r#type, "", "", &tokenize(s)?)
    }

    /// Parses a resource from its fields. `owner` is the record's resolved
    /// owner name and relative names are resolved against `origin`.
    pub(crate) fn from_fields(
        r#type: Type,
        owner: &str,
        origin: &str,
        fields: &[Field],
    ) -> Result<Self, FromStrError> {
        let domain = |s: &str| name::resolve(s, origin);

        Ok(match r#type {
            // IP Addresses
            Type::A => Resource::A(words(r#type, fields, 1)?[0].parse()?),
            Type::AAAA => Resource::AAAA(words(r#type, fields, 1)?[0].parse()?),

            // Simple strings (domains)
            Type::NS => Resource::NS(domain(words(r#type, fields, 1)?[0])),
            Type::CNAME => Resource::CNAME(domain(words(r#type, fields, 1)?[0])),
            Type::MB => Resource::MB(domain(words(r#type, fields, 1)?[0])),
            Type::MG => Resource::MG(domain(words(r#type, fields, 1)?[0])),
            Type::MR => Resource::MR(domain(words(r#type, fields, 1)?[0])),
            Type::PTR => Resource::PTR(domain(words(r#type, fields, 1)?[0])),

            Type::NULL => Resource::NULL(generic(fields)?),

            // Complex types
            Type::SOA => {
                let f = words(r#type, fields, 7)?;
                Resource::SOA(SOA {
                    mname: domain(f[0]),
                    rname: domain(f[1]),
                    serial: f[2].parse()?,
                    refresh: parse_interval("refresh", f[3])?,
                    retry: parse_interval("retry", f[4])?,
                    expire: parse_interval("expire", f[5])?,
                    minimum: parse_ttl(f[6])?,
                })
            }

            Type::MX => {
                let f = words(r#type, fields, 2)?;
                Resource::MX(MX {
                    preference: f[0].parse()?,
                    exchange: domain(f[1]),
                })
            }

            Type::HINFO => {
                expect_count(r#type, fields, 2)?;
                Resource::HINFO(HINFO {
                    cpu: text(&fields[0])?,
                    os: text(&fields[1])?,
                })
            }

            Type::MINFO => {
                let f = words(r#type, fields, 2)?;
                Resource::MINFO(MINFO {
                    rmailbx: domain(f[0]),
                    emailbx: domain(f[1]),
                })
            }

            Type::WKS => {
                if fields.len() < 2 {
                    return Err(invalid!("WKS expects an address and protocol"));
                }
                let f = words(r#type, fields, fields.len())?;
                let address: Ipv4Addr = f[0].parse()?;
                let protocol = match f[1].to_ascii_lowercase().as_str() {
                    "tcp" => 6,
                    "udp" => 17,
                    n => n.parse()?,
                };
                let mut ports = f[2..]
                    .iter()
                    .map(|p| p.parse())
                    .collect::<Result<Vec<u16>, _>>()?;
                ports.sort_unstable();
                ports.dedup();

                Resource::WKS(WKS {
                    address,
                    protocol,
                    ports,
                })
            }

            Type::TXT => {
                if fields.is_empty() {
                    return Err(invalid!("TXT expects at least one string"));
                }

                let mut txts = Vec::new();
                for field in fields {
                    if !field.quoted {
                        return Err(invalid!(
                            "TXT strings must be double quoted, found '{}'",
                            field.text
                        ));
                    }
                    txts.push(escape::unescape(&field.text)?);
                }
                Resource::TXT(TXT(txts))
            }

            Type::SRV => {
                let f = words(r#type, fields, 4)?;
                let (service, proto) = SRV::service_proto(owner).unwrap_or_default();
                Resource::SRV(SRV {
                    service,
                    proto,
                    priority: f[0].parse()?,
                    weight: f[1].parse()?,
                    port: f[2].parse()?,
                    target: domain(f[3]),
                })
            }

            Type::SVCB => Resource::SVCB(svcb(fields, origin)?),
            Type::HTTPS => Resource::HTTPS(svcb(fields, origin)?),

            // This should never appear in a answer record unless we have invalid data.
            Type::OPT | Type::ANY | Type::Unknown(_) => {
                return Err(FromStrError::UnsupportedType(r#type))
            }
        })
    }
}

/// Parses RFC 3597 `\# <length> <hex>...` generic RDATA.
fn generic(fields: &[Field]) -> Result<Vec<u8>, FromStrError> {
    match fields.first() {
        Some(f) if f.text == "\\#" && !f.quoted => (),
        _ => return Err(invalid!("expected '\\# <length> <hex>'")),
    }

    let len: usize = match fields.get(1) {
        Some(f) => f.text.parse()?,
        None => return Err(invalid!("missing length after '\\#'")),
    };

    let hex_text: String = fields[2..].iter().map(|f| f.text.as_str()).collect();
    let data = hex::decode(&hex_text).map_err(|e| invalid!("invalid hex '{}': {}", hex_text, e))?;
    if data.len() != len {
        return Err(invalid!(
            "generic RDATA length {} does not match {} bytes of data",
            len,
            data.len()
        ));
    }

    Ok(data)
}

fn svcb(fields: &[Field], origin: &str) -> Result<SVCB, FromStrError> {
    if fields.len() < 2 {
        return Err(invalid!("SVCB expects a priority and target"));
    }

    let priority = fields[0].text.parse()?;
    let target = name::resolve(&fields[1].text, origin);

    let mut params = Vec::new();
    for field in &fields[2..] {
        let (key, value) = match field.text.split_once('=') {
            Some((key, value)) => {
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                (key, Some(value))
            }
            None => (field.text.as_str(), None),
        };

        params.push(SvcParam::from_presentation(key, value).map_err(FromStrError::InvalidFormat)?);
    }
    params.sort_by_key(|p| p.key());

    Ok(SVCB {
        priority,
        target,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("1 .  alpn=\"h2,h3\" port=443").unwrap(),
            vec![
                Field::word("1"),
                Field::word("."),
                Field::word("alpn=\"h2,h3\""),
                Field::word("port=443"),
            ]
        );

        assert_eq!(
            tokenize("\"a b\" \"c\\\"d\"").unwrap(),
            vec![
                Field {
                    text: "a b".to_string(),
                    quoted: true
                },
                Field {
                    text: "c\\\"d".to_string(),
                    quoted: true
                },
            ]
        );

        assert!(tokenize("\"unterminated").is_err());
        assert!(tokenize("key=\"unterminated").is_err());
        assert!(tokenize("hello\"").is_err());
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("3600"), Ok(3600));
        assert_eq!(parse_ttl("1h"), Ok(3600));
        assert_eq!(parse_ttl("1W2d3H4m5s"), Ok(7 * 86400 + 2 * 86400 + 3 * 3600 + 4 * 60 + 5));
        assert!(parse_ttl("IN").is_err());
        assert!(parse_ttl("1x").is_err());
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("99999999999").is_err());
    }

    #[test]
    fn test_soa_timers() {
        let soa = |timers: &str| {
            Resource::from_str(Type::SOA, &format!("ns1.example.com. admin.example.com. 1 {}", timers))
        };

        match soa("1h 15m 2w 300").unwrap() {
            Resource::SOA(soa) => {
                assert_eq!((soa.refresh, soa.retry, soa.expire), (3600, 900, 1209600));
            }
            other => panic!("expected SOA, got {:?}", other),
        }

        assert_eq!(
            soa("2147483647 2 3 4").map(|r| matches!(r, Resource::SOA(soa) if soa.refresh == i32::MAX)),
            Ok(true)
        );
        assert_eq!(
            soa("2 2147483648 3 4"),
            Err(FromStrError::InvalidFormat(
                "SOA retry '2147483648' is too large".to_string()
            ))
        );
        assert!(soa("2 3 4294967295 4").is_err());
    }

    #[test]
    fn test_txt_requires_quotes() {
        assert!(Resource::from_str(Type::TXT, "hello").is_err());
        assert!(Resource::from_str(Type::TXT, "\"hello").is_err());
        assert_eq!(
            Resource::from_str(Type::TXT, "\"a\\032b\" \"\\\\\""),
            Ok(Resource::TXT(TXT(vec![b"a b".to_vec(), b"\\".to_vec()])))
        );
        assert_eq!(
            Resource::from_str(Type::TXT, "\"\\128\\255\""),
            Ok(Resource::TXT(TXT(vec![vec![0x80, 0xff]])))
        );
        assert!(Resource::from_str(Type::TXT, "\"\\256\"").is_err());
    }

    #[test]
    fn test_relative_names() {
        let fields = tokenize("10 mail").unwrap();
        assert_eq!(
            Resource::from_fields(Type::MX, "example.com", "example.com", &fields),
            Ok(Resource::MX(MX {
                preference: 10,
                exchange: "mail.example.com".to_string()
            }))
        );

        let fields = tokenize("0 5 5060 sip").unwrap();
        assert_eq!(
            Resource::from_fields(Type::SRV, "_sip._udp.example.com", "example.com", &fields),
            Ok(Resource::SRV(SRV {
                service: "sip".to_string(),
                proto: "udp".to_string(),
                priority: 0,
                weight: 5,
                port: 5060,
                target: "sip.example.com".to_string(),
            }))
        );
    }

    #[test]
    fn test_svcb_bad_escape() {
        assert!(Resource::from_str(Type::SVCB, "1 . alpn=\"h\\29\"").is_err());
    }
}
