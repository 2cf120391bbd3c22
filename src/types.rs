use crate::resource::Resource;
use derivative::Derivative;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use std::time::SystemTime;
use strum_macros::{Display, EnumString};

/// DNS Message that serves as the root of all DNS requests and responses.
///
/// Every message handled by this crate carries exactly one [`Question`].
///
/// # Examples
///
/// For constructing a message and encoding:
///
/// ```rust
/// use rdns::Message;
/// use rdns::types::*;
///
/// // Construct a simple query.
/// let mut m = Message::default();
/// m.add_question("bramp.net", Type::A, Class::Internet);
///
/// // Encode the query as a Vec<u8>.
/// let req = m.to_vec().expect("failed to encode DNS request");
///
/// // Take a Vec<u8> and turn it into a message.
/// let m2 = Message::from_slice(&req).expect("invalid message");
/// assert_eq!(m, m2);
/// ```
#[derive(Clone, Debug, Default, Derivative)]
#[derivative(PartialEq)]
pub struct Message {
    /// 16-bit identifier assigned by the program that generates any kind of
    /// query. This identifier is copied into the corresponding reply and can be
    /// used by the requester to match up replies to outstanding queries.
    pub id: u16,

    /// Recursion Desired - this bit directs the name server to pursue the query
    /// recursively.
    pub rd: bool,

    /// Truncation - specifies that this message was truncated.
    pub tc: bool,

    /// Authoritative Answer - Specifies that the responding name server is an
    /// authority for the domain name in question section.
    pub aa: bool,

    /// Specifies kind of query in this message. 0 represents a standard query.
    /// See <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5>
    pub opcode: Opcode,

    /// Specifies whether this message is a query (0), or a response (1).
    pub qr: QR,

    /// Response code.
    pub rcode: Rcode,

    /// Checking Disabled. See [RFC4035] and [RFC6840].
    ///
    /// [rfc4035]: https://datatracker.ietf.org/doc/html/rfc4035
    /// [rfc6840]: https://datatracker.ietf.org/doc/html/rfc6840
    pub cd: bool,

    /// Authentic Data. See [RFC4035] and [RFC6840].
    ///
    /// [rfc4035]: https://datatracker.ietf.org/doc/html/rfc4035
    /// [rfc6840]: https://datatracker.ietf.org/doc/html/rfc6840
    pub ad: bool,

    /// Z Reserved for future use. You must set this field to 0.
    pub z: bool,

    /// Recursion Available - this be is set or cleared in a response, and
    /// denotes whether recursive query support is available in the name server.
    pub ra: bool,

    /// The questions.
    pub questions: Vec<Question>,

    /// The answer records.
    pub answers: Vec<Record>,

    /// The authoritive records.
    pub authoritys: Vec<Record>,

    /// The additional records.
    pub additionals: Vec<Record>,

    /// Optional EDNS(0) record.
    pub extension: Option<Extension>,

    /// Optional stats about this request, populated by the DNS client.
    #[derivative(PartialEq = "ignore")]
    pub stats: Option<Stats>,

    /// The packed form of this message, set by [`Message::pack`] or when
    /// the message was decoded. Mutating the other fields without repacking
    /// leaves this stale.
    #[derivative(PartialEq = "ignore")]
    pub(crate) packet: Option<Vec<u8>>,
}

/// DNS Question.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Question {
    /// A lowercase domain name, without the trailing dot.
    pub name: String,
    pub r#type: Type,
    pub class: Class,
}

impl Question {
    pub fn new(name: &str, r#type: Type, class: Class) -> Question {
        Question {
            name: crate::name::normalize(name),
            r#type,
            class,
        }
    }
}

/// Resource Record (RR)
#[derive(Clone, Debug, Derivative)]
#[derivative(PartialEq)]
pub struct Record {
    pub name: String,
    pub class: Class,

    /// The number of seconds that the resource record may be cached
    /// before the source of the information should again be consulted.
    /// Zero is interpreted to mean that the RR can only be used for the
    /// transaction in progress.
    pub ttl: u32,

    pub resource: Resource,

    /// Offset of the TTL field within the packet this record was packed into
    /// or decoded from.
    #[derivative(PartialEq = "ignore")]
    pub(crate) ttl_offset: Option<usize>,
}

impl Record {
    pub fn new(name: &str, class: Class, ttl: u32, resource: Resource) -> Record {
        Record {
            name: crate::name::normalize(name),
            class,
            ttl,
            resource,
            ttl_offset: None,
        }
    }

    /// The type of this record, as implied by its [`Resource`].
    pub fn r#type(&self) -> Type {
        self.resource.r#type()
    }
}

/// EDNS(0) extension record as defined in [rfc2671] and [rfc6891].
///
/// [rfc2671]: https://datatracker.ietf.org/doc/html/rfc2671
/// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// Requestor's UDP payload size.
    pub payload_size: u16,

    /// Upper 8 bits of the extended response code.
    pub extend_rcode: u8,
    pub version: u8,

    /// DNSSEC OK bit as defined by [rfc3225].
    ///
    /// [rfc3225]: https://datatracker.ietf.org/doc/html/rfc3225
    pub dnssec_ok: bool,

    /// The `{code, data}` option pairs carried in the OPT RDATA.
    pub options: Vec<EdnsOption>,
}

impl Default for Extension {
    fn default() -> Self {
        Extension {
            payload_size: 512, // The min valid size.
            extend_rcode: 0,
            version: 0,
            dnssec_ok: false,
            options: Vec::new(),
        }
    }
}

/// A single EDNS(0) option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

/// Stats related to the specific query, optionally filed in by the client
/// and does not change the query behaviour.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    /// The time the query was sent to the server.
    pub start: SystemTime,

    /// The duration of the request.
    pub duration: Duration,

    /// The server used to service this query.
    pub server: SocketAddr,

    /// The size of the request sent to the server.
    pub request_size: usize,

    /// The size of the response from the server.
    pub response_size: usize,
}

#[derive(Copy, Clone, Debug, Display, EnumString, PartialEq, Eq)]
pub enum QR {
    Query = 0,
    Response = 1,
}

impl Default for QR {
    fn default() -> Self {
        QR::Query
    }
}

impl QR {
    pub fn from_bool(b: bool) -> QR {
        match b {
            false => QR::Query,
            true => QR::Response,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            QR::Query => false,
            QR::Response => true,
        }
    }
}

/// Specifies kind of query in this message. See [rfc1035], [rfc6895] and <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5>
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // Really only 4 bits
pub enum Opcode {
    /// Query.
    Query = 0,

    /// Inverse Query (OBSOLETE). See [rfc3425].
    ///
    /// [rfc3425]: https://datatracker.ietf.org/doc/html/rfc3425
    IQuery = 1,
    Status = 2,

    /// See [rfc1996]
    ///
    /// [rfc1996]: https://datatracker.ietf.org/doc/html/rfc1996
    Notify = 4,

    /// See [rfc2136]
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    Update = 5,

    /// DNS Stateful Operations (DSO). See [rfc8490]
    ///
    /// [rfc8490]: https://datatracker.ietf.org/doc/html/rfc8490
    DSO = 6,
    // 3 and 7-15 Remain unassigned.
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

/// Response Codes.
/// See [rfc1035] and <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6>
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // In headers it is 4 bits.
pub enum Rcode {
    /// No Error
    NoError = 0,

    /// Format Error
    FormErr = 1,

    /// Server Failure
    ServFail = 2,

    /// Non-Existent Domain
    NXDomain = 3,

    /// Not Implemented
    NotImp = 4,

    /// Query Refused
    Refused = 5,

    /// Name Exists when it should not. See [rfc2136] and [rfc6672].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    /// [rfc6672]: https://datatracker.ietf.org/doc/html/rfc6672
    YXDomain = 6,

    /// RR Set Exists when it should not. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    YXRRSet = 7,

    /// RR Set that should exist does not. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    NXRRSet = 8,

    /// "Not Authoritative" [rfc2136] or "Not Authorized" [rfc2845].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    /// [rfc2845]: https://datatracker.ietf.org/doc/html/rfc2845
    NotAuth = 9,

    /// Name not contained in zone. See [rfc2136].
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    NotZone = 10,

    /// DSO-TYPE Not Implemented. See [rfc8490].
    ///
    /// [rfc8490]: https://datatracker.ietf.org/doc/html/rfc8490
    DSOTYPENI = 11,
    // 12-15 Unassigned
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::NoError
    }
}

/// Resource Record Type, for example, A, CNAME or SOA.
///
/// Types this crate does not interpret are kept as [`Type::Unknown`] so that
/// forwarded traffic carrying them still decodes.
//
// When adding a Type, a Resource variant must be added in resource.rs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(clippy::upper_case_acronyms)]
pub enum Type {
    /// (Default) IPv4 Address.
    A,
    NS,
    CNAME,
    SOA,

    /// Mailbox domain name (EXPERIMENTAL).
    MB,
    /// Mail group member (EXPERIMENTAL).
    MG,
    /// Mail rename domain name (EXPERIMENTAL).
    MR,
    /// Opaque bytes (EXPERIMENTAL).
    NULL,
    /// Well known service description.
    WKS,

    /// Domain name pointer.
    PTR,
    /// Host information.
    HINFO,
    /// Mailbox or mail list information.
    MINFO,

    /// Mail exchange.
    MX,

    /// Text strings.
    TXT,

    /// IPv6 Address.
    AAAA,

    /// Server Selection
    SRV,

    /// EDNS(0) Opt type. See [rfc3225] and [rfc6891].
    ///
    /// [rfc3225]: https://datatracker.ietf.org/doc/html/rfc3225
    /// [rfc6891]: https://datatracker.ietf.org/doc/html/rfc6891
    OPT,

    /// Service binding. See [rfc9460].
    ///
    /// [rfc9460]: https://datatracker.ietf.org/doc/html/rfc9460
    SVCB,
    HTTPS,

    /// Any record type.
    /// Only valid as a Question Type.
    ANY,

    Unknown(u16),
}

impl Default for Type {
    fn default() -> Self {
        Type::A
    }
}

impl From<u16> for Type {
    fn from(value: u16) -> Self {
        match value {
            1 => Type::A,
            2 => Type::NS,
            5 => Type::CNAME,
            6 => Type::SOA,
            7 => Type::MB,
            8 => Type::MG,
            9 => Type::MR,
            10 => Type::NULL,
            11 => Type::WKS,
            12 => Type::PTR,
            13 => Type::HINFO,
            14 => Type::MINFO,
            15 => Type::MX,
            16 => Type::TXT,
            28 => Type::AAAA,
            33 => Type::SRV,
            41 => Type::OPT,
            64 => Type::SVCB,
            65 => Type::HTTPS,
            255 => Type::ANY,
            n => Type::Unknown(n),
        }
    }
}

impl From<Type> for u16 {
    fn from(value: Type) -> Self {
        match value {
            Type::A => 1,
            Type::NS => 2,
            Type::CNAME => 5,
            Type::SOA => 6,
            Type::MB => 7,
            Type::MG => 8,
            Type::MR => 9,
            Type::NULL => 10,
            Type::WKS => 11,
            Type::PTR => 12,
            Type::HINFO => 13,
            Type::MINFO => 14,
            Type::MX => 15,
            Type::TXT => 16,
            Type::AAAA => 28,
            Type::SRV => 33,
            Type::OPT => 41,
            Type::SVCB => 64,
            Type::HTTPS => 65,
            Type::ANY => 255,
            Type::Unknown(n) => n,
        }
    }
}

impl Type {
    /// The mnemonic types this crate understands, in numeric order.
    pub const KNOWN: [Type; 20] = [
        Type::A,
        Type::NS,
        Type::CNAME,
        Type::SOA,
        Type::MB,
        Type::MG,
        Type::MR,
        Type::NULL,
        Type::WKS,
        Type::PTR,
        Type::HINFO,
        Type::MINFO,
        Type::MX,
        Type::TXT,
        Type::AAAA,
        Type::SRV,
        Type::OPT,
        Type::SVCB,
        Type::HTTPS,
        Type::ANY,
    ];

    /// Returns true if a query for this type can be answered or forwarded.
    pub fn is_supported(self) -> bool {
        !matches!(self, Type::OPT | Type::ANY | Type::Unknown(_))
    }

    fn mnemonic(self) -> Option<&'static str> {
        Some(match self {
            Type::A => "A",
            Type::NS => "NS",
            Type::CNAME => "CNAME",
            Type::SOA => "SOA",
            Type::MB => "MB",
            Type::MG => "MG",
            Type::MR => "MR",
            Type::NULL => "NULL",
            Type::WKS => "WKS",
            Type::PTR => "PTR",
            Type::HINFO => "HINFO",
            Type::MINFO => "MINFO",
            Type::MX => "MX",
            Type::TXT => "TXT",
            Type::AAAA => "AAAA",
            Type::SRV => "SRV",
            Type::OPT => "OPT",
            Type::SVCB => "SVCB",
            Type::HTTPS => "HTTPS",
            Type::ANY => "ANY",
            Type::Unknown(_) => return None,
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(s) => f.pad(s),
            None => f.pad(&format!("TYPE{}", u16::from(*self))),
        }
    }
}

impl FromStr for Type {
    type Err = String;

    /// Parses the mnemonic (case insensitive), or the generic `TYPEnnn` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        if let Some(t) = Type::KNOWN.iter().find(|t| t.mnemonic() == Some(upper.as_str())) {
            return Ok(*t);
        }
        if let Some(n) = upper.strip_prefix("TYPE") {
            if let Ok(n) = n.parse::<u16>() {
                return Ok(Type::from(n));
            }
        }
        Err(format!("unknown type '{}'", s))
    }
}

/// Resource Record Class, for example Internet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Class {
    /// (Default) The Internet (IN), see [rfc1035].
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    Internet,

    /// CSNET (CS), obsolete (used only for examples in some obsolete RFCs).
    CsNet,

    /// Chaosnet (CH), obsolete LAN protocol created at MIT in the mid-1970s.
    Chaos,

    /// Hesiod (HS), an information service developed by MIT's Project Athena.
    Hesiod,

    /// NONE [RFC2136]
    None,

    /// * (ANY) See [rfc1035]
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    Any,

    Unknown(u16),
}

impl Default for Class {
    fn default() -> Self {
        Class::Internet
    }
}

impl From<u16> for Class {
    fn from(value: u16) -> Self {
        match value {
            1 => Class::Internet,
            2 => Class::CsNet,
            3 => Class::Chaos,
            4 => Class::Hesiod,
            254 => Class::None,
            255 => Class::Any,
            n => Class::Unknown(n),
        }
    }
}

impl From<Class> for u16 {
    fn from(value: Class) -> Self {
        match value {
            Class::Internet => 1,
            Class::CsNet => 2,
            Class::Chaos => 3,
            Class::Hesiod => 4,
            Class::None => 254,
            Class::Any => 255,
            Class::Unknown(n) => n,
        }
    }
}

impl Class {
    /// Only the Internet class is answered or forwarded.
    pub fn is_supported(self) -> bool {
        self == Class::Internet
    }

    fn mnemonic(self) -> Option<&'static str> {
        Some(match self {
            Class::Internet => "IN",
            Class::CsNet => "CS",
            Class::Chaos => "CH",
            Class::Hesiod => "HS",
            Class::None => "NONE",
            Class::Any => "ANY",
            Class::Unknown(_) => return None,
        })
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(s) => f.pad(s),
            None => f.pad(&format!("CLASS{}", u16::from(*self))),
        }
    }
}

impl FromStr for Class {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "IN" => Class::Internet,
            "CS" => Class::CsNet,
            "CH" => Class::Chaos,
            "HS" => Class::Hesiod,
            "NONE" => Class::None,
            "ANY" | "*" => Class::Any,
            other => match other.strip_prefix("CLASS").map(str::parse::<u16>) {
                Some(Ok(n)) => Class::from(n),
                _ => return Err(format!("unknown class '{}'", s)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_from_str() {
        assert_eq!("a".parse::<Type>(), Ok(Type::A));
        assert_eq!("HTTPS".parse::<Type>(), Ok(Type::HTTPS));
        assert_eq!("TYPE65280".parse::<Type>(), Ok(Type::Unknown(65280)));
        assert_eq!("TYPE1".parse::<Type>(), Ok(Type::A));
        assert!("BOGUS".parse::<Type>().is_err());
    }

    #[test]
    fn test_type_numbers() {
        for t in Type::KNOWN {
            assert_eq!(Type::from(u16::from(t)), t);
        }
        assert_eq!(Type::Unknown(99).to_string(), "TYPE99");
    }

    #[test]
    fn test_class() {
        assert_eq!("in".parse::<Class>(), Ok(Class::Internet));
        assert_eq!("CH".parse::<Class>(), Ok(Class::Chaos));
        assert_eq!(Class::from(3), Class::Chaos);
        assert_eq!(Class::Unknown(7).to_string(), "CLASS7");
        assert!(!Class::Chaos.is_supported());
        assert!(Class::Internet.is_supported());
    }
}
