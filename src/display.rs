//! Implements the Display trait for the various types, so they output
//! in `dig` style. Resources are displayed in zone file presentation format,
//! which [`crate::Resource::from_str`] parses back.
// Refer to https://github.com/tigeli/bind-utils/blob/master/bin/dig/dig.c for reference.

use crate::escape;
use crate::resource::*;
use crate::Message;
use crate::Question;
use crate::Record;
use crate::Stats;
use chrono::prelude::*;
use std::fmt;

/// Returns the absolute form of a canonical name, as used in zone files.
pub(crate) fn fqdn(name: &str) -> String {
    if name.is_empty() {
        ".".to_string()
    } else {
        format!("{}.", name)
    }
}

/// Displays this message in a format resembling `dig` output.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_header(f)?;

        // ;; OPT PSEUDOSECTION:
        // ; EDNS: version: 0, flags:; udp: 512
        if let Some(e) = &self.extension {
            writeln!(f, ";; OPT PSEUDOSECTION:")?;
            writeln!(
                f,
                "; EDNS: version: {version}, flags:{flags}; udp: {payload_size}",
                version = e.version,
                flags = if e.dnssec_ok { " do" } else { "" },
                payload_size = e.payload_size,
            )?;
        }

        // Always display the question section, but optionally
        // display the other sections.
        writeln!(f, ";; QUESTION SECTION:")?;
        for question in &self.questions {
            question.fmt(f)?;
        }
        writeln!(f)?;

        let sections = [
            (";; ANSWER SECTION:", &self.answers),
            (";; AUTHORITY SECTION:", &self.authoritys),
            (";; ADDITIONAL SECTION:", &self.additionals),
        ];
        for (title, records) in sections {
            if records.is_empty() {
                continue;
            }
            writeln!(f, "{}", title)?;
            for record in records {
                record.fmt(f)?;
            }
            writeln!(f)?;
        }

        if let Some(stats) = &self.stats {
            stats.fmt(f)?;
        }

        Ok(())
    }
}

impl Message {
    fn fmt_header(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            ";; ->>HEADER<<- opcode: {opcode}, status: {rcode}, id: {id}",
            opcode = self.opcode,
            rcode = self.rcode,
            id = self.id,
        )?;

        let mut flags = String::new();

        if self.qr.to_bool() {
            flags.push_str(" qr")
        }
        if self.aa {
            flags.push_str(" aa")
        }
        if self.tc {
            flags.push_str(" tc")
        }
        if self.rd {
            flags.push_str(" rd")
        }
        if self.ra {
            flags.push_str(" ra")
        }
        if self.ad {
            flags.push_str(" ad")
        }
        if self.cd {
            flags.push_str(" cd")
        }

        let ar_count = self.additionals.len() + self.extension.is_some() as usize;

        writeln!(f, ";; flags:{flags}; QUERY: {qd_count}, ANSWER: {an_count}, AUTHORITY: {ns_count}, ADDITIONAL: {ar_count}",
            flags = flags,
            qd_count = self.questions.len(),
            an_count = self.answers.len(),
            ns_count = self.authoritys.len(),
            ar_count = ar_count,
        )?;

        writeln!(f)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, ";; Query time: {} msec", self.duration.as_millis())?;
        writeln!(f, ";; SERVER: {}", self.server)?;

        let start: chrono::DateTime<Local> = self.start.into();
        // ;; WHEN: Sat Jun 12 12:14:21 PDT 2021
        writeln!(f, ";; WHEN: {}", start.format("%a %b %-d %H:%M:%S %z %-Y"))?;
        writeln!(
            f,
            ";; MSG SIZE sent: {} rcvd: {}",
            self.request_size, self.response_size
        )
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            ";{name:<23} {class:4} {type:6}",
            name = fqdn(&self.name),
            class = self.class,
            r#type = self.r#type,
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{name:<20} {ttl:>6} {class:4} {type:6} {resource}",
            name = fqdn(&self.name),
            ttl = self.ttl,
            class = self.class,
            r#type = self.r#type(),
            resource = self.resource,
        )
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::A(ip) => ip.fmt(f),
            Resource::AAAA(ip) => ip.fmt(f),

            Resource::NS(name)
            | Resource::CNAME(name)
            | Resource::MB(name)
            | Resource::MG(name)
            | Resource::MR(name)
            | Resource::PTR(name) => f.write_str(&fqdn(name)),

            // RFC 3597 generic encoding.
            Resource::NULL(data) if data.is_empty() => write!(f, "\\# 0"),
            Resource::NULL(data) => write!(f, "\\# {} {}", data.len(), hex::encode(data)),

            Resource::SOA(soa) => soa.fmt(f),
            Resource::MX(mx) => mx.fmt(f),
            Resource::HINFO(hinfo) => hinfo.fmt(f),
            Resource::MINFO(minfo) => minfo.fmt(f),
            Resource::WKS(wks) => wks.fmt(f),
            Resource::TXT(txts) => txts.fmt(f),
            Resource::SRV(srv) => srv.fmt(f),
            Resource::SVCB(svcb) | Resource::HTTPS(svcb) => svcb.fmt(f),

            Resource::Unknown(_) => write!(f, "\\# 0"),
        }
    }
}

impl fmt::Display for MX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // "10 aspmx.l.google.com."
        write!(
            f,
            "{preference} {exchange}",
            preference = self.preference,
            exchange = fqdn(&self.exchange),
        )
    }
}

impl fmt::Display for SOA {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // "ns1.google.com. dns-admin.google.com. 376337657 900 900 1800 60"
        write!(
            f,
            "{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}",
            mname = fqdn(&self.mname),
            rname = fqdn(&self.rname),
            serial = self.serial,
            refresh = self.refresh,
            retry = self.retry,
            expire = self.expire,
            minimum = self.minimum,
        )
    }
}

impl fmt::Display for HINFO {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            escape::quote(self.cpu.as_bytes()),
            escape::quote(self.os.as_bytes())
        )
    }
}

impl fmt::Display for MINFO {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", fqdn(&self.rmailbx), fqdn(&self.emailbx))
    }
}

impl fmt::Display for WKS {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.address, self.protocol)?;
        for port in &self.ports {
            write!(f, " {}", port)?;
        }
        Ok(())
    }
}

impl fmt::Display for SRV {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // "5 0 389 ldap.google.com."
        write!(
            f,
            "{priority} {weight} {port} {target}",
            priority = self.priority,
            weight = self.weight,
            port = self.port,
            target = fqdn(&self.target),
        )
    }
}

impl fmt::Display for TXT {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let output = self
            .0
            .iter()
            .map(|txt| escape::quote(txt))
            .collect::<Vec<String>>()
            .join(" ");

        write!(f, "{}", output)
    }
}

impl fmt::Display for SVCB {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.priority, fqdn(&self.target))?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::resource::*;
    use pretty_assertions::assert_eq;

    lazy_static! {
        static ref DISPLAY_TESTS : Vec<(Resource, &'static str)> = {
            vec![
                (
                    Resource::A("172.217.164.100".parse().unwrap()),
                    "172.217.164.100",
                ),
                (
                    Resource::AAAA("2607:f8b0:4005:805::2004".parse().unwrap()),
                    "2607:f8b0:4005:805::2004",
                ),
                (
                    Resource::CNAME("code.l.google.com".to_string()),
                    "code.l.google.com.",
                ),
                (
                    Resource::NS("ns4.google.com".to_string()),
                    "ns4.google.com.",
                ),
                (Resource::PTR("dns.google".to_string()), "dns.google."),
                (
                    Resource::SOA(SOA {
                        mname: "ns1.google.com".to_string(),
                        rname: "dns-admin.google.com".to_string(),
                        serial: 379031418,
                        refresh: 900,
                        retry: 900,
                        expire: 1800,
                        minimum: 60,
                    }),
                    "ns1.google.com. dns-admin.google.com. 379031418 900 900 1800 60",
                ),
                (
                    Resource::MX(MX {
                        preference: 10,
                        exchange: "aspmx.l.google.com".to_string(),
                    }),
                    "10 aspmx.l.google.com.",
                ),
                (
                    Resource::SRV(SRV {
                        priority: 5,
                        weight: 0,
                        port: 389,
                        target: "ldap.google.com".to_string(),
                        ..Default::default()
                    }),
                    "5 0 389 ldap.google.com.",
                ),
                (
                    Resource::TXT(TXT(vec![b"v=spf1 include:_spf.google.com ~all".to_vec()])),
                    "\"v=spf1 include:_spf.google.com ~all\"",
                ),
                (
                    Resource::TXT(TXT(vec![b"k=rsa; p=MIGf".to_vec(), b"say \"hi\"".to_vec()])),
                    "\"k=rsa; p=MIGf\" \"say \\\"hi\\\"\"",
                ),
                (
                    Resource::HINFO(HINFO {
                        cpu: "DEC-2060".to_string(),
                        os: "TOPS20".to_string(),
                    }),
                    "\"DEC-2060\" \"TOPS20\"",
                ),
                (
                    Resource::MINFO(MINFO {
                        rmailbx: "admin.isi.edu".to_string(),
                        emailbx: "errors.isi.edu".to_string(),
                    }),
                    "admin.isi.edu. errors.isi.edu.",
                ),
                (
                    Resource::WKS(WKS {
                        address: "10.0.0.52".parse().unwrap(),
                        protocol: 6,
                        ports: vec![21, 25],
                    }),
                    "10.0.0.52 6 21 25",
                ),
                (Resource::NULL(vec![0xde, 0xad]), "\\# 2 dead"),
                (
                    Resource::HTTPS(SVCB {
                        priority: 1,
                        target: "".to_string(),
                        params: vec![
                            SvcParam::Alpn(vec![b"h2".to_vec(), b"h3".to_vec()]),
                            SvcParam::Port(443),
                            SvcParam::Ipv4Hint(vec!["192.0.2.1".parse().unwrap()]),
                        ],
                    }),
                    "1 . alpn=\"h2,h3\" port=443 ipv4hint=192.0.2.1",
                ),
            ]
        };
    }

    #[test]
    fn test_display() {
        for (resource, display) in (*DISPLAY_TESTS).iter() {
            assert_eq!(format!("{}", resource), *display);
        }
    }

    #[test]
    fn test_from_str() {
        for (resource, display) in (*DISPLAY_TESTS).iter() {
            match Resource::from_str(resource.r#type(), display) {
                Ok(got) => assert_eq!(&got, resource),
                Err(err) => panic!(
                    "from_str({}, '{}') failed: {}",
                    resource.r#type(),
                    display,
                    err
                ),
            }
        }
    }
}
