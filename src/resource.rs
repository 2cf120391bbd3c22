//! The RDATA shapes of the supported resource record types, and how each is
//! read from and written to the wire.

use crate::bail;
use crate::dns::MessageWriter;
use crate::io::DNSReadExt;
use crate::Type;
use byteorder::{ReadBytesExt, BE};
use log::warn;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::net::{Ipv4Addr, Ipv6Addr};

pub use crate::svcb::{SvcParam, SVCB};

/// The typed RDATA of a [`crate::Record`].
// This should be kept in sync with Type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Resource {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),

    NS(String),
    CNAME(String),
    MB(String),
    MG(String),
    MR(String),
    PTR(String),

    /// Opaque bytes, at most 65535.
    NULL(Vec<u8>),

    SOA(SOA),
    MX(MX),
    HINFO(HINFO),
    MINFO(MINFO),
    WKS(WKS),
    TXT(TXT),
    SRV(SRV),

    SVCB(SVCB),
    HTTPS(SVCB),

    /// A type this crate does not interpret. The RDATA is not retained.
    Unknown(u16),
}

impl Resource {
    pub fn r#type(&self) -> Type {
        match self {
            Resource::A(_) => Type::A,
            Resource::AAAA(_) => Type::AAAA,
            Resource::NS(_) => Type::NS,
            Resource::CNAME(_) => Type::CNAME,
            Resource::MB(_) => Type::MB,
            Resource::MG(_) => Type::MG,
            Resource::MR(_) => Type::MR,
            Resource::PTR(_) => Type::PTR,
            Resource::NULL(_) => Type::NULL,
            Resource::SOA(_) => Type::SOA,
            Resource::MX(_) => Type::MX,
            Resource::HINFO(_) => Type::HINFO,
            Resource::MINFO(_) => Type::MINFO,
            Resource::WKS(_) => Type::WKS,
            Resource::TXT(_) => Type::TXT,
            Resource::SRV(_) => Type::SRV,
            Resource::SVCB(_) => Type::SVCB,
            Resource::HTTPS(_) => Type::HTTPS,
            Resource::Unknown(t) => Type::from(*t),
        }
    }

    /// The domain name this record points at, if any, used to find glue.
    pub fn target(&self) -> Option<&str> {
        match self {
            Resource::NS(name) => Some(name),
            Resource::MX(mx) => Some(&mx.exchange),
            Resource::SRV(srv) => Some(&srv.target),
            _ => None,
        }
    }
}

/// Start of Authority.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SOA {
    /// The <domain-name> of the name server that was the
    /// original or primary source of data for this zone.
    pub mname: String,

    /// A <domain-name> which specifies the mailbox of the
    /// person responsible for this zone.
    pub rname: String,

    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,

    /// The lower bound on the TTL of every record in the zone.
    pub minimum: u32,
}

/// Mail EXchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MX {
    /// The preference given to this RR among others at the same owner.
    /// Lower values are preferred.
    pub preference: u16,

    /// A host willing to act as a mail exchange for the owner name.
    pub exchange: String,
}

/// Host information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HINFO {
    pub cpu: String,
    pub os: String,
}

/// Mailbox or mail list information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MINFO {
    pub rmailbx: String,
    pub emailbx: String,
}

/// Well known services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WKS {
    pub address: Ipv4Addr,
    pub protocol: u8,

    /// The ports with their bit set, in ascending order.
    pub ports: Vec<u16>,
}

/// One or more character-strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TXT(pub Vec<Vec<u8>>);

/// Service record. See [rfc2782].
///
/// The `service` and `proto` are not carried in the RDATA, they come from
/// the `_service._proto.name` owner name.
///
/// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SRV {
    pub service: String,
    pub proto: String,

    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

impl SRV {
    /// Splits `_service._proto.name` into its service and proto, without
    /// the underscores.
    pub fn service_proto(owner: &str) -> Option<(String, String)> {
        let mut labels = owner.splitn(3, '.');
        let service = labels.next()?.strip_prefix('_')?;
        let proto = labels.next()?.strip_prefix('_')?;
        if service.is_empty() || proto.is_empty() {
            return None;
        }
        Some((service.to_string(), proto.to_string()))
    }
}

impl Resource {
    /// Reads `len` bytes of RDATA of the given type. The cursor must be over
    /// the whole message so compressed names can be followed.
    pub(crate) fn parse(
        cur: &mut Cursor<&[u8]>,
        r#type: Type,
        owner: &str,
        len: u16,
    ) -> io::Result<Resource> {
        let start = cur.position();
        let end = start + u64::from(len);
        if end > cur.get_ref().len() as u64 {
            bail!(
                UnexpectedEof,
                "record length {} exceeds the remaining message",
                len
            );
        }

        Ok(match r#type {
            Type::A => {
                let mut octets = [0; 4];
                cur.read_exact(&mut octets)?;
                Resource::A(Ipv4Addr::from(octets))
            }
            Type::AAAA => {
                let mut octets = [0; 16];
                cur.read_exact(&mut octets)?;
                Resource::AAAA(Ipv6Addr::from(octets))
            }

            Type::NS => Resource::NS(cur.read_qname()?),
            Type::CNAME => Resource::CNAME(cur.read_qname()?),
            Type::MB => Resource::MB(cur.read_qname()?),
            Type::MG => Resource::MG(cur.read_qname()?),
            Type::MR => Resource::MR(cur.read_qname()?),
            Type::PTR => Resource::PTR(cur.read_qname()?),

            Type::NULL => {
                let mut data = vec![0; len.into()];
                cur.read_exact(&mut data)?;
                Resource::NULL(data)
            }

            Type::SOA => Resource::SOA(SOA {
                mname: cur.read_qname()?,
                rname: cur.read_qname()?,
                serial: cur.read_u32::<BE>()?,
                refresh: cur.read_i32::<BE>()?,
                retry: cur.read_i32::<BE>()?,
                expire: cur.read_i32::<BE>()?,
                minimum: cur.read_u32::<BE>()?,
            }),

            Type::MX => Resource::MX(MX {
                preference: cur.read_u16::<BE>()?,
                exchange: cur.read_qname()?,
            }),

            Type::HINFO => Resource::HINFO(HINFO {
                cpu: String::from_utf8_lossy(&cur.read_character_string()?).into_owned(),
                os: String::from_utf8_lossy(&cur.read_character_string()?).into_owned(),
            }),

            Type::MINFO => Resource::MINFO(MINFO {
                rmailbx: cur.read_qname()?,
                emailbx: cur.read_qname()?,
            }),

            Type::WKS => {
                let mut octets = [0; 4];
                cur.read_exact(&mut octets)?;
                let protocol = cur.read_u8()?;

                // One bit per port, so the bitmap never needs more than 8192 bytes.
                let bitmap = end.saturating_sub(cur.position());
                if bitmap > 8192 {
                    bail!(InvalidData, "WKS bitmap of {} bytes is longer than 8192", bitmap);
                }

                let mut ports = Vec::new();
                let mut i: u32 = 0;
                while cur.position() < end {
                    let b = cur.read_u8()?;
                    for bit in 0..8 {
                        if b & (0x80 >> bit) != 0 {
                            let port = u16::try_from(i * 8 + bit).map_err(|_| {
                                io::Error::new(io::ErrorKind::InvalidData, "WKS port out of range")
                            })?;
                            ports.push(port);
                        }
                    }
                    i += 1;
                }

                Resource::WKS(WKS {
                    address: Ipv4Addr::from(octets),
                    protocol,
                    ports,
                })
            }

            Type::TXT => {
                let mut txts = Vec::new();
                while cur.position() < end {
                    txts.push(cur.read_character_string()?);
                }
                if txts.is_empty() {
                    bail!(InvalidData, "TXT record without any strings");
                }
                Resource::TXT(TXT(txts))
            }

            Type::SRV => {
                let (service, proto) = SRV::service_proto(owner).unwrap_or_default();
                Resource::SRV(SRV {
                    service,
                    proto,
                    priority: cur.read_u16::<BE>()?,
                    weight: cur.read_u16::<BE>()?,
                    port: cur.read_u16::<BE>()?,
                    target: cur.read_qname()?,
                })
            }

            Type::SVCB => Resource::SVCB(SVCB::parse(cur, end)?),
            Type::HTTPS => Resource::HTTPS(SVCB::parse(cur, end)?),

            Type::OPT | Type::ANY | Type::Unknown(_) => {
                warn!(
                    "skipping {} byte RDATA of unsupported type {} for '{}'",
                    len, r#type, owner
                );
                cur.seek(SeekFrom::Start(end))?;
                Resource::Unknown(u16::from(r#type))
            }
        })
    }

    /// Writes the RDATA (without the length prefix).
    pub(crate) fn write(&self, w: &mut MessageWriter) -> io::Result<()> {
        match self {
            Resource::A(ip) => w.write_bytes(&ip.octets()),
            Resource::AAAA(ip) => w.write_bytes(&ip.octets()),

            Resource::NS(name)
            | Resource::CNAME(name)
            | Resource::MB(name)
            | Resource::MG(name)
            | Resource::MR(name)
            | Resource::PTR(name) => w.write_qname(name, true)?,

            Resource::NULL(data) => w.write_bytes(data),

            Resource::SOA(soa) => {
                w.write_qname(&soa.mname, true)?;
                w.write_qname(&soa.rname, true)?;
                w.write_u32(soa.serial);
                w.write_u32(soa.refresh as u32);
                w.write_u32(soa.retry as u32);
                w.write_u32(soa.expire as u32);
                w.write_u32(soa.minimum);
            }

            Resource::MX(mx) => {
                w.write_u16(mx.preference);
                w.write_qname(&mx.exchange, true)?;
            }

            Resource::HINFO(hinfo) => {
                w.write_character_string(hinfo.cpu.as_bytes())?;
                w.write_character_string(hinfo.os.as_bytes())?;
            }

            Resource::MINFO(minfo) => {
                w.write_qname(&minfo.rmailbx, true)?;
                w.write_qname(&minfo.emailbx, true)?;
            }

            Resource::WKS(wks) => {
                w.write_bytes(&wks.address.octets());
                w.write_u8(wks.protocol);

                let mut bitmap = Vec::new();
                for port in &wks.ports {
                    let byte = usize::from(*port / 8);
                    if bitmap.len() <= byte {
                        bitmap.resize(byte + 1, 0);
                    }
                    bitmap[byte] |= 0x80 >> (port % 8);
                }
                w.write_bytes(&bitmap);
            }

            Resource::TXT(txt) => {
                for s in &txt.0 {
                    w.write_character_string(s)?;
                }
            }

            // RFC 2782 forbids compressing the target.
            Resource::SRV(srv) => {
                w.write_u16(srv.priority);
                w.write_u16(srv.weight);
                w.write_u16(srv.port);
                w.write_qname(&srv.target, false)?;
            }

            Resource::SVCB(svcb) | Resource::HTTPS(svcb) => svcb.write(w)?,

            Resource::Unknown(_) => (),
        }

        Ok(())
    }
}
