//! Field checks applied to operator supplied records before they are packed.

use crate::name;
use crate::resource::*;
use crate::Class;
use crate::Record;
use crate::Type;
use crate::ValidationError;
use regex::Regex;
use std::collections::HashSet;

/// The longest character-string, which is prefixed by a single length byte.
const MAX_STRING_LEN: usize = 255;

lazy_static! {
    static ref HOST_LABEL: Regex =
        Regex::new(r"^(\*|[a-z0-9_]([a-z0-9_-]*[a-z0-9_])?)$").unwrap();
}

/// Checks `domain` is a syntactically valid host name. The root is accepted
/// only if `allow_root` is set.
fn hostname(
    r#type: Type,
    field: &'static str,
    domain: &str,
    allow_root: bool,
) -> Result<(), ValidationError> {
    let labels = name::labels(domain).map_err(|e| ValidationError::new(r#type, field, e.to_string()))?;
    if labels.is_empty() {
        if allow_root {
            return Ok(());
        }
        return Err(ValidationError::new(r#type, field, "must not be the root"));
    }

    for label in labels {
        let label = String::from_utf8_lossy(&label).to_ascii_lowercase();
        if !HOST_LABEL.is_match(&label) {
            return Err(ValidationError::new(
                r#type,
                field,
                format!("'{}' is not a valid host name", domain),
            ));
        }
    }
    Ok(())
}

/// Checks `domain` encodes. Mailbox names may carry escaped dots and any byte.
fn domain(r#type: Type, field: &'static str, domain: &str) -> Result<(), ValidationError> {
    name::labels(domain)
        .map(|_| ())
        .map_err(|e| ValidationError::new(r#type, field, e.to_string()))
}

fn string(r#type: Type, field: &'static str, s: &[u8]) -> Result<(), ValidationError> {
    if s.len() > MAX_STRING_LEN {
        return Err(ValidationError::new(
            r#type,
            field,
            format!("{} bytes is longer than {}", s.len(), MAX_STRING_LEN),
        ));
    }
    Ok(())
}

impl Record {
    /// Checks every field of the record, filling in the defaults the wire
    /// format needs:
    ///
    /// * an MX preference of zero becomes 10.
    /// * SRV service and proto are taken from the `_service._proto` owner.
    ///
    /// Anything else that is invalid is reported, never coerced.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        let r#type = self.r#type();

        domain(r#type, "name", &self.name)?;

        if matches!(self.class, Class::Any | Class::None | Class::Unknown(_)) {
            return Err(ValidationError::new(
                r#type,
                "class",
                format!("{} is not a record class", self.class),
            ));
        }

        match &mut self.resource {
            // The address types are checked by construction.
            Resource::A(_) | Resource::AAAA(_) => (),

            Resource::NS(target) => hostname(r#type, "target", target, false)?,
            Resource::CNAME(target) => hostname(r#type, "target", target, false)?,
            Resource::MB(target) => hostname(r#type, "madname", target, false)?,
            Resource::PTR(target) => hostname(r#type, "target", target, false)?,
            Resource::MG(mailbox) => domain(r#type, "mgmname", mailbox)?,
            Resource::MR(mailbox) => domain(r#type, "newname", mailbox)?,

            Resource::NULL(data) => {
                if data.len() > usize::from(u16::MAX) {
                    return Err(ValidationError::new(r#type, "data", "longer than 65535 bytes"));
                }
            }

            Resource::SOA(soa) => {
                hostname(r#type, "mname", &soa.mname, false)?;
                domain(r#type, "rname", &soa.rname)?;
            }

            Resource::MX(mx) => {
                hostname(r#type, "exchange", &mx.exchange, true)?;
                if mx.preference == 0 {
                    mx.preference = 10;
                }
            }

            Resource::HINFO(hinfo) => {
                string(r#type, "cpu", hinfo.cpu.as_bytes())?;
                string(r#type, "os", hinfo.os.as_bytes())?;
            }

            Resource::MINFO(minfo) => {
                domain(r#type, "rmailbx", &minfo.rmailbx)?;
                domain(r#type, "emailbx", &minfo.emailbx)?;
            }

            Resource::WKS(wks) => {
                if wks.protocol == 0 {
                    return Err(ValidationError::new(r#type, "protocol", "must not be zero"));
                }
                wks.ports.sort_unstable();
                wks.ports.dedup();
            }

            Resource::TXT(txt) => {
                if txt.0.is_empty() {
                    return Err(ValidationError::new(r#type, "txt", "needs at least one string"));
                }
                for s in &txt.0 {
                    string(r#type, "txt", s)?;
                }
            }

            Resource::SRV(srv) => {
                match SRV::service_proto(&self.name) {
                    Some((service, proto)) => {
                        srv.service = service;
                        srv.proto = proto;
                    }
                    None => {
                        return Err(ValidationError::new(
                            r#type,
                            "name",
                            format!("'{}' is not of the form _service._proto.name", self.name),
                        ))
                    }
                }
                hostname(r#type, "target", &srv.target, true)?;
            }

            Resource::SVCB(svcb) | Resource::HTTPS(svcb) => validate_svcb(r#type, svcb)?,

            Resource::Unknown(_) => {
                return Err(ValidationError::new(
                    r#type,
                    "type",
                    "records of this type can not be packed",
                ))
            }
        }

        Ok(())
    }
}

fn validate_svcb(r#type: Type, svcb: &SVCB) -> Result<(), ValidationError> {
    hostname(r#type, "target", &svcb.target, true)?;

    if svcb.priority == 0 {
        if !svcb.params.is_empty() {
            return Err(ValidationError::new(
                r#type,
                "params",
                "AliasMode (priority 0) must not have parameters",
            ));
        }
        return Ok(());
    }

    let keys: Vec<u16> = svcb.params.iter().map(SvcParam::key).collect();
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ValidationError::new(
            r#type,
            "params",
            "keys must be unique and in increasing order",
        ));
    }

    let present: HashSet<u16> = keys.iter().copied().collect();
    for param in &svcb.params {
        match param {
            SvcParam::Mandatory(mandatory) => {
                let mut seen = HashSet::new();
                for key in mandatory {
                    if *key == 0 {
                        return Err(ValidationError::new(
                            r#type,
                            "mandatory",
                            "must not list itself",
                        ));
                    }
                    if !seen.insert(*key) {
                        return Err(ValidationError::new(
                            r#type,
                            "mandatory",
                            format!("{} is listed twice", SvcParam::key_name(*key)),
                        ));
                    }
                    if !present.contains(key) {
                        return Err(ValidationError::new(
                            r#type,
                            "mandatory",
                            format!("{} is missing", SvcParam::key_name(*key)),
                        ));
                    }
                }
            }
            SvcParam::Alpn(ids) => {
                if ids.is_empty() || ids.iter().any(|id| id.is_empty()) {
                    return Err(ValidationError::new(r#type, "alpn", "empty protocol id"));
                }
                for id in ids {
                    string(r#type, "alpn", id)?;
                }
            }
            SvcParam::NoDefaultAlpn => {
                if !present.contains(&1) {
                    return Err(ValidationError::new(
                        r#type,
                        "no-default-alpn",
                        "requires alpn",
                    ));
                }
            }
            SvcParam::Ipv4Hint(ips) if ips.is_empty() => {
                return Err(ValidationError::new(r#type, "ipv4hint", "is empty"))
            }
            SvcParam::Ipv6Hint(ips) if ips.is_empty() => {
                return Err(ValidationError::new(r#type, "ipv6hint", "is empty"))
            }
            _ => (),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(name: &str, resource: Resource) -> Record {
        Record::new(name, Class::Internet, 300, resource)
    }

    #[test]
    fn test_valid() {
        let mut records = vec![
            record("a.example.com", Resource::A("192.0.2.1".parse().unwrap())),
            record("example.com", Resource::NS("ns1.example.com".to_string())),
            record("*.example.com", Resource::CNAME("www.example.com".to_string())),
            record(
                "example.com",
                Resource::SOA(SOA {
                    mname: "ns1.example.com".to_string(),
                    rname: "Action\\.domains.isi.edu".to_string(),
                    serial: 1,
                    refresh: 3600,
                    retry: 600,
                    expire: 86400,
                    minimum: 60,
                }),
            ),
            record("example.com", Resource::TXT(TXT(vec![b"v=spf1 -all".to_vec()]))),
            record(
                "_dns.example.com",
                Resource::SVCB(SVCB {
                    priority: 1,
                    target: "dns.example.com".to_string(),
                    params: vec![
                        SvcParam::Mandatory(vec![1]),
                        SvcParam::Alpn(vec![b"dot".to_vec()]),
                        SvcParam::Port(853),
                    ],
                }),
            ),
        ];

        for r in &mut records {
            assert_eq!(r.validate(), Ok(()), "{:?}", r);
        }
    }

    #[test]
    fn test_defaults() {
        let mut mx = record(
            "example.com",
            Resource::MX(MX {
                preference: 0,
                exchange: "mail.example.com".to_string(),
            }),
        );
        mx.validate().unwrap();
        assert_eq!(
            mx.resource,
            Resource::MX(MX {
                preference: 10,
                exchange: "mail.example.com".to_string(),
            })
        );

        let mut srv = record(
            "_sip._udp.example.com",
            Resource::SRV(SRV {
                target: "sip.example.com".to_string(),
                port: 5060,
                ..SRV::default()
            }),
        );
        srv.validate().unwrap();
        match srv.resource {
            Resource::SRV(srv) => {
                assert_eq!(srv.service, "sip");
                assert_eq!(srv.proto, "udp");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_invalid() {
        let tests = vec![
            (
                record("example.com", Resource::NS("-bad-.example.com".to_string())),
                "target",
            ),
            (record("example.com", Resource::PTR("".to_string())), "target"),
            (record("example.com", Resource::TXT(TXT(vec![]))), "txt"),
            (
                record("example.com", Resource::TXT(TXT(vec![vec![b'a'; 256]]))),
                "txt",
            ),
            (
                record("example.com", Resource::SRV(SRV::default())),
                "name",
            ),
            (
                record(
                    "example.com",
                    Resource::HTTPS(SVCB {
                        priority: 0,
                        target: "".to_string(),
                        params: vec![SvcParam::Port(443)],
                    }),
                ),
                "params",
            ),
            (
                record(
                    "example.com",
                    Resource::HTTPS(SVCB {
                        priority: 1,
                        target: "".to_string(),
                        params: vec![SvcParam::Port(443), SvcParam::Alpn(vec![b"h2".to_vec()])],
                    }),
                ),
                "params",
            ),
            (
                record(
                    "example.com",
                    Resource::HTTPS(SVCB {
                        priority: 1,
                        target: "".to_string(),
                        params: vec![SvcParam::Mandatory(vec![3])],
                    }),
                ),
                "mandatory",
            ),
            (record("example.com", Resource::Unknown(99)), "type"),
            (
                record(&"a".repeat(64), Resource::A("192.0.2.1".parse().unwrap())),
                "name",
            ),
        ];

        for (mut r, field) in tests {
            match r.validate() {
                Err(e) => assert_eq!(e.field, field, "{:?}", r),
                Ok(()) => panic!("{:?} should not validate", r),
            }
        }
    }

    #[test]
    fn test_class() {
        let mut r = Record::new(
            "example.com",
            Class::Any,
            300,
            Resource::A("192.0.2.1".parse().unwrap()),
        );
        assert_eq!(r.validate().unwrap_err().field, "class");
    }
}
