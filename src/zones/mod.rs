//! Zone (master) files, as described in [rfc1035 section 5].
//!
//! A [`Zone`] is parsed once and compiled into one ready-to-send [`Message`]
//! per distinct (name, type, class), so answering from it is a lookup.
//!
//! ```rust
//! use rdns::zones::Zone;
//! use rdns::{Class, Question, Type};
//!
//! let zone = Zone::parse(
//!     "$TTL 3600\n\
//!      @   IN SOA ns1 hostmaster ( 1 7200 3600 1209600 300 )\n\
//!          IN NS  ns1\n\
//!      ns1 IN A   192.0.2.1\n",
//!     "example.com.",
//! )
//! .unwrap();
//!
//! let q = Question::new("example.com", Type::NS, Class::Internet);
//! let m = zone.message(&q).unwrap();
//! assert!(m.aa);
//! assert_eq!(m.additionals.len(), 1); // Glue for ns1.
//! ```
//!
//! [rfc1035 section 5]: https://datatracker.ietf.org/doc/html/rfc1035#section-5
mod lexer;
mod parser;

use crate::name;
use crate::Error;
use crate::Message;
use crate::Opcode;
use crate::Question;
use crate::Rcode;
use crate::Record;
use crate::Resource;
use crate::Type;
use crate::ZoneError;
use crate::QR;
use log::{debug, info};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// The records of one zone file, and the answers compiled from them.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    origin: String,
    default_ttl: Option<u32>,

    /// Records in the order they were declared.
    records: Vec<Record>,

    /// One packed answer per question, in the order each question first
    /// appeared.
    messages: Vec<Message>,
    index: HashMap<Question, usize>,
}

impl Zone {
    /// An empty zone.
    pub fn new(origin: &str) -> Zone {
        Zone {
            origin: name::normalize(origin),
            ..Default::default()
        }
    }

    /// Loads the zone file at `path`. Relative names are completed with
    /// `origin` until the file sets its own with `$ORIGIN`.
    pub fn load<P: AsRef<Path>>(path: P, origin: &str) -> Result<Zone, ZoneError> {
        let path = path.as_ref();
        let parsed = parser::parse_file(path, origin)?;
        let zone = Zone::from_parsed(origin, parsed.default_ttl, parsed.records)
            .map_err(|e| ZoneError::new(path, 0, e.to_string()))?;

        info!(
            "loaded {} records ({} answers) for '{}' from {}",
            zone.records.len(),
            zone.messages.len(),
            zone.origin,
            path.display()
        );
        Ok(zone)
    }

    /// Parses zone text. Any `$INCLUDE`d files are relative to the current
    /// directory.
    pub fn parse(input: &str, origin: &str) -> Result<Zone, ZoneError> {
        let file = Path::new("<input>");
        let parsed = parser::parse_str(input, file, origin)?;
        Zone::from_parsed(origin, parsed.default_ttl, parsed.records)
            .map_err(|e| ZoneError::new(file, 0, e.to_string()))
    }

    fn from_parsed(origin: &str, default_ttl: Option<u32>, records: Vec<Record>) -> io::Result<Zone> {
        let mut zone = Zone::new(origin);
        zone.default_ttl = default_ttl;

        for record in records {
            zone.insert(record);
        }
        zone.compile()?;
        Ok(zone)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// All records, in declaration order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// The zone's SOA record, if it has one.
    pub fn soa(&self) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.r#type() == Type::SOA && r.name == self.origin)
            .or_else(|| self.records.iter().find(|r| r.r#type() == Type::SOA))
    }

    /// The TTL every answer is raised to: the SOA's minimum, else `$TTL`.
    pub fn minimum_ttl(&self) -> u32 {
        match self.soa().map(|r| &r.resource) {
            Some(Resource::SOA(soa)) => soa.minimum,
            _ => self.default_ttl.unwrap_or(0),
        }
    }

    /// The records matching the question.
    pub fn lookup(&self, question: &Question) -> Vec<&Record> {
        self.records
            .iter()
            .filter(|r| {
                r.name == question.name && r.r#type() == question.r#type && r.class == question.class
            })
            .collect()
    }

    /// The compiled answers, each already packed.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The compiled answer for the question.
    pub fn message(&self, question: &Question) -> Option<&Message> {
        self.index.get(question).map(|&i| &self.messages[i])
    }

    /// Adds a record, after validating it, and recompiles the answers.
    /// Returns the questions whose answers changed.
    pub fn add(&mut self, mut record: Record) -> Result<Vec<Question>, Error> {
        record.validate()?;
        if !name::is_subdomain(&record.name, &self.origin) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not within zone '{}'",
                record.name, self.origin
            )));
        }

        let question = question_of(&record);
        self.insert(record);
        self.compile()?;
        Ok(self.affected(question))
    }

    /// Removes every record with the same name, class and data as `record`
    /// (the TTL is not compared), and recompiles the answers. Returns the
    /// questions whose answers changed, which is empty if nothing matched.
    pub fn remove(&mut self, record: &Record) -> Result<Vec<Question>, Error> {
        let before = self.records.len();
        self.records.retain(|r| {
            !(r.name == record.name && r.class == record.class && r.resource == record.resource)
        });

        if self.records.len() == before {
            return Ok(Vec::new());
        }

        // Taken before compiling, while the answers still carry the glue.
        let affected = self.affected(question_of(record));
        self.compile()?;
        Ok(affected)
    }

    /// Writes the zone out in zone file format. Loading the output with
    /// [`Zone::load`] gives back the same records.
    pub fn save<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        if !self.origin.is_empty() {
            writeln!(w, "$ORIGIN {}.", self.origin)?;
        }
        if let Some(ttl) = self.default_ttl {
            writeln!(w, "$TTL {}", ttl)?;
        }

        for record in &self.records {
            write!(w, "{}", record)?;
        }
        w.flush()
    }

    /// Appends the record. An SOA replaces any other SOA with the same owner.
    fn insert(&mut self, record: Record) {
        if record.r#type() == Type::SOA {
            if let Some(existing) = self
                .records
                .iter_mut()
                .find(|r| r.r#type() == Type::SOA && r.name == record.name)
            {
                debug!("replacing SOA for '{}'", record.name);
                *existing = record;
                return;
            }
        }

        self.records.push(record);
    }

    /// The question, plus every question whose glue may include the
    /// question's name. The SOA minimum sets every answer's TTL floor, so
    /// an SOA change affects them all.
    fn affected(&self, question: Question) -> Vec<Question> {
        let mut questions = vec![question.clone()];
        if question.r#type == Type::SOA {
            questions.extend(
                self.messages
                    .iter()
                    .filter_map(|m| m.question())
                    .filter(|q| **q != question)
                    .cloned(),
            );
        } else if matches!(question.r#type, Type::A | Type::AAAA) {
            questions.extend(
                self.messages
                    .iter()
                    .filter(|m| m.additionals.iter().any(|r| r.name == question.name))
                    .filter_map(|m| m.question().cloned()),
            );
        }
        questions
    }

    /// Rebuilds every answer from the records.
    fn compile(&mut self) -> io::Result<()> {
        let mut groups: Vec<(Question, Vec<Record>)> = Vec::new();
        let mut index = HashMap::<Question, usize>::new();

        for record in &self.records {
            let question = question_of(record);
            match index.get(&question) {
                Some(&i) => groups[i].1.push(record.clone()),
                None => {
                    index.insert(question.clone(), groups.len());
                    groups.push((question, vec![record.clone()]));
                }
            }
        }

        let minimum = self.minimum_ttl();
        let mut messages = Vec::with_capacity(groups.len());

        for (question, answers) in groups {
            let additionals = self.glue(&answers);

            let mut m = Message {
                qr: QR::Response,
                opcode: Opcode::Query,
                rcode: Rcode::NoError,
                aa: true,
                questions: vec![question],
                answers,
                additionals,
                ..Default::default()
            };
            m.raise_ttl(minimum);
            m.pack()?;

            messages.push(m);
        }

        self.messages = messages;
        self.index = index;
        Ok(())
    }

    /// Address records for any in-zone names the answers point at.
    fn glue(&self, answers: &[Record]) -> Vec<Record> {
        let mut glue: Vec<Record> = Vec::new();

        for answer in answers {
            let target = match &answer.resource {
                Resource::NS(_) | Resource::MX(_) | Resource::SRV(_) => answer.resource.target(),
                _ => None,
            };

            let target = match target {
                Some(target) if !target.is_empty() && name::is_subdomain(target, &self.origin) => target,
                _ => continue,
            };

            for record in &self.records {
                if record.name == target
                    && record.class == answer.class
                    && matches!(record.resource, Resource::A(_) | Resource::AAAA(_))
                    && !glue.contains(record)
                {
                    glue.push(record.clone());
                }
            }
        }

        glue
    }
}

fn question_of(record: &Record) -> Question {
    Question {
        name: record.name.clone(),
        r#type: record.r#type(),
        class: record.class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::*;
    use crate::Class;
    use pretty_assertions::assert_eq;

    /// The example from rfc1035 section 5.3.
    const ISI_EDU: &str = "\
@   IN  SOA     VENERA      Action\\.domains (
                                 20     ; SERIAL
                                 7200   ; REFRESH
                                 600    ; RETRY
                                 3600000; EXPIRE
                                 60)    ; MINIMUM

        NS      A.ISI.EDU.
        NS      VENERA
        NS      VAXA
        MX      10      VENERA
        MX      20      VAXA

A       A       26.3.0.103

VENERA  A       10.1.0.52
        A       128.9.0.32

VAXA    A       10.2.0.27
        A       128.9.0.33
";

    fn q(name: &str, r#type: Type) -> Question {
        Question::new(name, r#type, Class::Internet)
    }

    #[test]
    fn test_rfc1035_example() {
        let zone = Zone::parse(ISI_EDU, "ISI.EDU.").unwrap();

        assert_eq!(zone.origin(), "isi.edu");
        assert_eq!(zone.records().len(), 11);
        assert_eq!(zone.minimum_ttl(), 60);

        let questions: Vec<&Question> = zone
            .messages()
            .iter()
            .map(|m| m.question().unwrap())
            .collect();
        assert_eq!(
            questions,
            vec![
                &q("isi.edu", Type::SOA),
                &q("isi.edu", Type::NS),
                &q("isi.edu", Type::MX),
                &q("a.isi.edu", Type::A),
                &q("venera.isi.edu", Type::A),
                &q("vaxa.isi.edu", Type::A),
            ]
        );

        for m in zone.messages() {
            assert!(m.packet().is_some());
            assert!(m.aa);
            assert_eq!(m.qr, QR::Response);
            assert!(m.answers.iter().all(|r| r.ttl == 60));
        }

        let soa = &zone.message(&q("isi.edu", Type::SOA)).unwrap().answers[0];
        assert_eq!(
            soa.resource,
            Resource::SOA(SOA {
                mname: "venera.isi.edu".to_string(),
                rname: "action\\.domains.isi.edu".to_string(),
                serial: 20,
                refresh: 7200,
                retry: 600,
                expire: 3600000,
                minimum: 60,
            })
        );

        let ns = zone.message(&q("isi.edu", Type::NS)).unwrap();
        let targets: Vec<&str> = ns.answers.iter().filter_map(|r| r.resource.target()).collect();
        assert_eq!(targets, vec!["a.isi.edu", "venera.isi.edu", "vaxa.isi.edu"]);

        // Glue for all three name servers.
        assert_eq!(ns.additionals.len(), 5);

        let venera = zone.message(&q("venera.isi.edu", Type::A)).unwrap();
        assert_eq!(
            venera.answers,
            vec![
                Record::new("venera.isi.edu", Class::Internet, 60, Resource::A("10.1.0.52".parse().unwrap())),
                Record::new("venera.isi.edu", Class::Internet, 60, Resource::A("128.9.0.32".parse().unwrap())),
            ]
        );

        // The packed form decodes to the same answer.
        let decoded = Message::from_slice(venera.packet().unwrap()).unwrap();
        assert_eq!(&decoded, venera);
    }

    #[test]
    fn test_minimum_ttl_raises() {
        let zone = Zone::parse(
            "$TTL 10\n\
             @ SOA ns1 hostmaster 1 2 3 4 300\n\
             www 30 A 192.0.2.1\n\
             big 3600 A 192.0.2.2\n",
            "example.com",
        )
        .unwrap();

        let ttl = |name: &str| zone.message(&q(name, Type::A)).unwrap().answers[0].ttl;
        assert_eq!(ttl("www.example.com"), 300);
        assert_eq!(ttl("big.example.com"), 3600);

        // The records themselves keep the TTL they were declared with.
        assert_eq!(zone.lookup(&q("www.example.com", Type::A))[0].ttl, 30);
    }

    #[test]
    fn test_soa_replaces() {
        let zone = Zone::parse(
            "$TTL 60\n\
             @ SOA ns1 hostmaster 1 2 3 4 5\n\
             @ SOA ns2 hostmaster 2 2 3 4 5\n",
            "example.com",
        )
        .unwrap();

        let soas = zone.lookup(&q("example.com", Type::SOA));
        assert_eq!(soas.len(), 1);
        assert!(matches!(&soas[0].resource, Resource::SOA(soa) if soa.serial == 2));
    }

    #[test]
    fn test_soa_change_affects_every_answer() {
        let mut zone = Zone::parse(
            "$TTL 60\n\
             @ SOA ns1 hostmaster 1 2 3 4 60\n\
             www A 192.0.2.1\n\
             @ MX 10 mail\n",
            "example.com",
        )
        .unwrap();

        let soa = Record::new(
            "example.com",
            Class::Internet,
            60,
            Resource::SOA(SOA {
                mname: "ns1.example.com".to_string(),
                rname: "hostmaster.example.com".to_string(),
                serial: 2,
                refresh: 2,
                retry: 3,
                expire: 4,
                minimum: 900,
            }),
        );

        let changed = zone.add(soa).unwrap();
        assert_eq!(
            changed,
            vec![
                q("example.com", Type::SOA),
                q("www.example.com", Type::A),
                q("example.com", Type::MX),
            ]
        );
        assert_eq!(zone.message(&q("www.example.com", Type::A)).unwrap().answers[0].ttl, 900);
    }

    #[test]
    fn test_add_remove() {
        let mut zone = Zone::parse("$TTL 60\nns1 A 192.0.2.1\n", "example.com").unwrap();

        let changed = zone
            .add(Record::new(
                "example.com",
                Class::Internet,
                60,
                Resource::NS("ns1.example.com".to_string()),
            ))
            .unwrap();
        assert_eq!(changed, vec![q("example.com", Type::NS)]);
        assert_eq!(zone.message(&q("example.com", Type::NS)).unwrap().additionals.len(), 1);

        // Changing glue also changes the answers that carry it.
        let extra = Record::new(
            "ns1.example.com",
            Class::Internet,
            60,
            Resource::A("192.0.2.2".parse().unwrap()),
        );
        let changed = zone.add(extra.clone()).unwrap();
        assert_eq!(
            changed,
            vec![q("ns1.example.com", Type::A), q("example.com", Type::NS)]
        );
        assert_eq!(zone.message(&q("example.com", Type::NS)).unwrap().additionals.len(), 2);

        assert_eq!(zone.remove(&extra).unwrap().len(), 2);
        assert_eq!(zone.remove(&extra).unwrap(), vec![]);
        assert_eq!(zone.lookup(&q("ns1.example.com", Type::A)).len(), 1);

        // Outside the zone, or invalid.
        assert!(zone
            .add(Record::new("example.org", Class::Internet, 60, Resource::A("192.0.2.3".parse().unwrap())))
            .is_err());
        assert!(zone
            .add(Record::new("x.example.com", Class::Internet, 60, Resource::CNAME("-bad".to_string())))
            .is_err());
    }

    #[test]
    fn test_save() {
        let input = "$TTL 60\n\
                     @ SOA ns1 hostmaster ( 1 2 3 4 5 )\n\
                     \tNS ns1\n\
                     \tMX 10 mail\n\
                     ns1 A 192.0.2.1\n\
                     \tAAAA 2001:db8::1\n\
                     txt TXT \"hello world\" \"with \\\"quotes\\\"\"\n\
                     info HINFO \"PDP-11/70\" UNIX\n\
                     _sip._tcp SRV 10 20 5060 sip\n\
                     null NULL \\# 2 beef\n\
                     svc HTTPS 1 . alpn=h2,h3 port=443 ipv4hint=192.0.2.1\n\
                     wks WKS 192.0.2.1 tcp 25 80\n\
                     esc\\.aped CNAME ns1\n";

        let zone = Zone::parse(input, "example.com").unwrap();

        let mut out = Vec::new();
        zone.save(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("$ORIGIN example.com.\n$TTL 60\n"), "{}", text);

        let reloaded = Zone::parse(&text, "example.com").unwrap();
        assert_eq!(reloaded.records(), zone.records());
        assert_eq!(reloaded.messages(), zone.messages());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zone");
        std::fs::write(&path, "$TTL 60\n@ MX 10\n").unwrap();

        let err = Zone::load(&path, "example.com").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), format!("{}:2: MX expects 2 fields, found 1", path.display()));
    }
}
