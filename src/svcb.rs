//! Service binding (SVCB and HTTPS) records, see [rfc9460].
//!
//! [rfc9460]: https://datatracker.ietf.org/doc/html/rfc9460

use crate::bail;
use crate::dns::MessageWriter;
use crate::escape;
use crate::io::DNSReadExt;
use byteorder::{ReadBytesExt, BE};
use std::fmt;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::net::{Ipv4Addr, Ipv6Addr};

/// SVCB and HTTPS RDATA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SVCB {
    /// Zero is AliasMode, anything else is ServiceMode.
    pub priority: u16,
    pub target: String,

    /// Parameters, ordered by strictly increasing key.
    pub params: Vec<SvcParam>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SvcParam {
    Mandatory(Vec<u16>),
    Alpn(Vec<Vec<u8>>),
    NoDefaultAlpn,
    Port(u16),
    Ipv4Hint(Vec<Ipv4Addr>),
    Ech(Vec<u8>),
    Ipv6Hint(Vec<Ipv6Addr>),
    Unknown(u16, Vec<u8>),
}

const KEY_NAMES: [&str; 7] = [
    "mandatory",
    "alpn",
    "no-default-alpn",
    "port",
    "ipv4hint",
    "ech",
    "ipv6hint",
];

impl SvcParam {
    pub fn key(&self) -> u16 {
        match self {
            SvcParam::Mandatory(_) => 0,
            SvcParam::Alpn(_) => 1,
            SvcParam::NoDefaultAlpn => 2,
            SvcParam::Port(_) => 3,
            SvcParam::Ipv4Hint(_) => 4,
            SvcParam::Ech(_) => 5,
            SvcParam::Ipv6Hint(_) => 6,
            SvcParam::Unknown(key, _) => *key,
        }
    }

    /// Returns the presentation name of a key, `keyNNNNN` for unnamed keys.
    pub fn key_name(key: u16) -> String {
        match KEY_NAMES.get(usize::from(key)) {
            Some(name) => name.to_string(),
            None => format!("key{}", key),
        }
    }

    /// Parses a presentation key name.
    pub fn parse_key(name: &str) -> Option<u16> {
        if let Some(i) = KEY_NAMES.iter().position(|n| n.eq_ignore_ascii_case(name)) {
            return Some(i as u16);
        }
        name.strip_prefix("key")?.parse().ok()
    }

    fn parse(key: u16, value: &[u8]) -> io::Result<SvcParam> {
        let mut cur = Cursor::new(value);
        let len = value.len();

        Ok(match key {
            0 => {
                if len % 2 != 0 || len == 0 {
                    bail!(InvalidData, "invalid mandatory length {}", len);
                }
                let mut keys = Vec::with_capacity(len / 2);
                for _ in 0..len / 2 {
                    keys.push(cur.read_u16::<BE>()?);
                }
                SvcParam::Mandatory(keys)
            }
            1 => {
                let mut ids = Vec::new();
                while (cur.position() as usize) < len {
                    let id = cur.read_character_string()?;
                    if id.is_empty() {
                        bail!(InvalidData, "empty alpn identifier");
                    }
                    ids.push(id);
                }
                if ids.is_empty() {
                    bail!(InvalidData, "alpn without any identifiers");
                }
                SvcParam::Alpn(ids)
            }
            2 => {
                if len != 0 {
                    bail!(InvalidData, "no-default-alpn must be empty");
                }
                SvcParam::NoDefaultAlpn
            }
            3 => {
                if len != 2 {
                    bail!(InvalidData, "invalid port length {}", len);
                }
                SvcParam::Port(cur.read_u16::<BE>()?)
            }
            4 => {
                if len % 4 != 0 || len == 0 {
                    bail!(InvalidData, "invalid ipv4hint length {}", len);
                }
                let mut ips = Vec::with_capacity(len / 4);
                for _ in 0..len / 4 {
                    let mut octets = [0; 4];
                    cur.read_exact(&mut octets)?;
                    ips.push(Ipv4Addr::from(octets));
                }
                SvcParam::Ipv4Hint(ips)
            }
            5 => SvcParam::Ech(value.to_vec()),
            6 => {
                if len % 16 != 0 || len == 0 {
                    bail!(InvalidData, "invalid ipv6hint length {}", len);
                }
                let mut ips = Vec::with_capacity(len / 16);
                for _ in 0..len / 16 {
                    let mut octets = [0; 16];
                    cur.read_exact(&mut octets)?;
                    ips.push(Ipv6Addr::from(octets));
                }
                SvcParam::Ipv6Hint(ips)
            }
            key => SvcParam::Unknown(key, value.to_vec()),
        })
    }

    fn value(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            SvcParam::Mandatory(keys) => {
                for key in keys {
                    buf.extend_from_slice(&key.to_be_bytes());
                }
            }
            SvcParam::Alpn(ids) => {
                for id in ids {
                    if id.is_empty() || id.len() > 255 {
                        bail!(InvalidInput, "alpn identifier must be 1-255 bytes");
                    }
                    buf.push(id.len() as u8);
                    buf.extend_from_slice(id);
                }
            }
            SvcParam::NoDefaultAlpn => (),
            SvcParam::Port(port) => buf.extend_from_slice(&port.to_be_bytes()),
            SvcParam::Ipv4Hint(ips) => {
                for ip in ips {
                    buf.extend_from_slice(&ip.octets());
                }
            }
            SvcParam::Ech(data) | SvcParam::Unknown(_, data) => buf.extend_from_slice(data),
            SvcParam::Ipv6Hint(ips) => {
                for ip in ips {
                    buf.extend_from_slice(&ip.octets());
                }
            }
        }
        Ok(buf)
    }

    /// Parses a presentation `key[=value]` pair. The value has already had
    /// any surrounding quotes removed, but not its escapes.
    pub fn from_presentation(key: &str, value: Option<&str>) -> Result<SvcParam, String> {
        let key = SvcParam::parse_key(key).ok_or(format!("unknown SvcParamKey '{}'", key))?;

        let items = |value: Option<&str>| -> Result<Vec<Vec<u8>>, String> {
            let value = value.ok_or(format!("{} requires a value", SvcParam::key_name(key)))?;
            split_list(value)
                .into_iter()
                .map(|item| escape::unescape_octal(item).map_err(|e| e.to_string()))
                .collect()
        };
        let text = |item: Vec<u8>| String::from_utf8(item).map_err(|e| e.to_string());

        Ok(match key {
            0 => {
                let mut keys = Vec::new();
                for item in items(value)? {
                    let name = text(item)?;
                    keys.push(
                        SvcParam::parse_key(&name)
                            .ok_or(format!("unknown mandatory key '{}'", name))?,
                    );
                }
                SvcParam::Mandatory(keys)
            }
            1 => SvcParam::Alpn(items(value)?),
            2 => {
                if value.is_some() {
                    return Err("no-default-alpn takes no value".to_string());
                }
                SvcParam::NoDefaultAlpn
            }
            3 => {
                let value = text(single(items(value)?)?)?;
                SvcParam::Port(value.parse().map_err(|_| format!("invalid port '{}'", value))?)
            }
            4 => {
                let mut ips = Vec::new();
                for item in items(value)? {
                    let item = text(item)?;
                    ips.push(item.parse().map_err(|_| format!("invalid ipv4hint '{}'", item))?);
                }
                SvcParam::Ipv4Hint(ips)
            }
            5 => {
                let value = text(single(items(value)?)?)?;
                SvcParam::Ech(base64::decode(&value).map_err(|e| format!("invalid ech: {}", e))?)
            }
            6 => {
                let mut ips = Vec::new();
                for item in items(value)? {
                    let item = text(item)?;
                    ips.push(item.parse().map_err(|_| format!("invalid ipv6hint '{}'", item))?);
                }
                SvcParam::Ipv6Hint(ips)
            }
            key => {
                let data = match value {
                    Some(value) => escape::unescape_octal(value).map_err(|e| e.to_string())?,
                    None => Vec::new(),
                };
                SvcParam::Unknown(key, data)
            }
        })
    }
}

fn single(mut items: Vec<Vec<u8>>) -> Result<Vec<u8>, String> {
    if items.len() != 1 {
        return Err(format!("expected a single value, found {}", items.len()));
    }
    Ok(items.remove(0))
}

/// Splits a value on unescaped commas.
fn split_list(value: &str) -> Vec<&str> {
    let bytes = value.as_bytes();
    let mut result = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b',' => {
                result.push(&value[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    result.push(&value[start.min(value.len())..]);
    result
}

impl SVCB {
    pub(crate) fn parse(cur: &mut Cursor<&[u8]>, end: u64) -> io::Result<SVCB> {
        let priority = cur.read_u16::<BE>()?;
        let target = cur.read_qname()?;

        let mut params = Vec::new();
        let mut last: Option<u16> = None;
        while cur.position() < end {
            let key = cur.read_u16::<BE>()?;
            let len = cur.read_u16::<BE>()?;

            if let Some(last) = last {
                if key <= last {
                    bail!(InvalidData, "SvcParamKeys out of order: {} after {}", key, last);
                }
            }
            last = Some(key);

            let mut value = vec![0; len.into()];
            cur.read_exact(&mut value)?;
            params.push(SvcParam::parse(key, &value)?);
        }

        Ok(SVCB {
            priority,
            target,
            params,
        })
    }

    pub(crate) fn write(&self, w: &mut MessageWriter) -> io::Result<()> {
        w.write_u16(self.priority);
        w.write_qname(&self.target, false)?;

        let mut params: Vec<&SvcParam> = self.params.iter().collect();
        params.sort_by_key(|p| p.key());

        for param in params {
            let value = param.value()?;
            if value.len() > usize::from(u16::MAX) {
                bail!(InvalidInput, "SvcParam value too long");
            }
            w.write_u16(param.key());
            w.write_u16(value.len() as u16);
            w.write_bytes(&value);
        }

        Ok(())
    }
}

impl fmt::Display for SvcParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let key = SvcParam::key_name(self.key());
        let list = |items: Vec<String>| items.join(",");

        match self {
            SvcParam::Mandatory(keys) => write!(
                f,
                "{}={}",
                key,
                list(keys.iter().map(|k| SvcParam::key_name(*k)).collect())
            ),
            SvcParam::Alpn(ids) => write!(
                f,
                "{}=\"{}\"",
                key,
                list(ids.iter().map(|id| escape::escape_octal(id, b",")).collect())
            ),
            SvcParam::NoDefaultAlpn => write!(f, "{}", key),
            SvcParam::Port(port) => write!(f, "{}={}", key, port),
            SvcParam::Ipv4Hint(ips) => write!(
                f,
                "{}={}",
                key,
                list(ips.iter().map(|ip| ip.to_string()).collect())
            ),
            SvcParam::Ech(data) => write!(f, "{}={}", key, base64::encode(data)),
            SvcParam::Ipv6Hint(ips) => write!(
                f,
                "{}={}",
                key,
                list(ips.iter().map(|ip| ip.to_string()).collect())
            ),
            SvcParam::Unknown(_, data) if data.is_empty() => write!(f, "{}", key),
            SvcParam::Unknown(_, data) => write!(f, "{}=\"{}\"", key, escape::escape_octal(data, &[])),
        }
    }
}
