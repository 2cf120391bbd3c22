use crate::from_str::{is_ttl, parse_ttl, Field};
use crate::name;
use crate::zones::lexer::{lex, Line};
use crate::Class;
use crate::Record;
use crate::Resource;
use crate::Type;
use crate::ZoneError;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// How deeply `$INCLUDE`s may nest.
const MAX_INCLUDE_DEPTH: usize = 8;

// Which of the optional fields before the type have been seen.
const SEEN_TTL: u8 = 0b01;
const SEEN_CLASS: u8 = 0b10;

/// The result of parsing one file (and anything it includes).
#[derive(Debug)]
pub(crate) struct Parsed {
    /// The `$TTL` in effect at the end of the top level file.
    pub default_ttl: Option<u32>,

    /// Records in the order they were declared.
    pub records: Vec<Record>,
}

struct Parser {
    file: PathBuf,
    depth: usize,

    origin: String,
    default_ttl: Option<u32>,

    // Carried from one record to the next.
    last_owner: Option<String>,
    last_class: Class,
    last_ttl: Option<u32>,
    soa_minimum: Option<u32>,

    records: Vec<Record>,
}

/// Parses the zone file at `path`, with relative names completed by `origin`.
pub(crate) fn parse_file(path: &Path, origin: &str) -> Result<Parsed, ZoneError> {
    let mut parser = Parser::new(path, origin);
    parser.parse_file()?;
    Ok(parser.into_parsed())
}

/// Parses zone text. `file` is used for error messages and to find
/// `$INCLUDE`d files.
pub(crate) fn parse_str(input: &str, file: &Path, origin: &str) -> Result<Parsed, ZoneError> {
    let mut parser = Parser::new(file, origin);
    parser.parse(input)?;
    Ok(parser.into_parsed())
}

impl Parser {
    fn new(file: &Path, origin: &str) -> Parser {
        Parser {
            file: file.to_path_buf(),
            depth: 0,
            origin: name::normalize(origin),
            default_ttl: None,
            last_owner: None,
            last_class: Class::Internet,
            last_ttl: None,
            soa_minimum: None,
            records: Vec::new(),
        }
    }

    fn into_parsed(self) -> Parsed {
        Parsed {
            default_ttl: self.default_ttl,
            records: self.records,
        }
    }

    fn error(&self, line: usize, reason: impl Into<String>) -> ZoneError {
        ZoneError::new(&self.file, line, reason)
    }

    fn parse_file(&mut self) -> Result<(), ZoneError> {
        let input = fs::read_to_string(&self.file).map_err(|e| self.error(0, e.to_string()))?;
        self.parse(&input)
    }

    fn parse(&mut self, input: &str) -> Result<(), ZoneError> {
        let lines = lex(input).map_err(|e| self.error(e.line, e.reason))?;

        for line in lines {
            match line.fields.first() {
                Some(first) if !line.blank && !first.quoted && first.text.starts_with('$') => {
                    self.directive(&line)?
                }
                Some(_) => self.record(&line)?,
                None => (),
            }
        }

        Ok(())
    }

    fn directive(&mut self, line: &Line) -> Result<(), ZoneError> {
        let args: Vec<&str> = line.fields[1..].iter().map(|f| f.text.as_str()).collect();
        let directive = line.fields[0].text.to_ascii_uppercase();

        match (directive.as_str(), args.as_slice()) {
            ("$ORIGIN", [origin]) => {
                self.origin = name::resolve(origin, &self.origin);
                debug!("{}:{}: origin is now '{}'", self.file.display(), line.number, self.origin);
            }
            ("$TTL", [ttl]) => {
                let ttl = parse_ttl(ttl).map_err(|e| self.error(line.number, e.to_string()))?;
                self.default_ttl = Some(ttl);
            }
            ("$INCLUDE", [file]) => self.include(line.number, file, None)?,
            ("$INCLUDE", [file, origin]) => self.include(line.number, file, Some(origin))?,
            ("$ORIGIN" | "$TTL" | "$INCLUDE", _) => {
                return Err(self.error(
                    line.number,
                    format!("wrong number of arguments to {}", directive),
                ))
            }
            _ => {
                return Err(self.error(
                    line.number,
                    format!("unknown directive '{}'", line.fields[0].text),
                ))
            }
        }

        Ok(())
    }

    /// Parses an included file. It starts with the current origin (or the
    /// one given) and TTLs, but nothing it changes is seen by this file.
    fn include(&mut self, number: usize, file: &str, origin: Option<&str>) -> Result<(), ZoneError> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(self.error(number, "$INCLUDE nested too deeply"));
        }

        let path = match self.file.parent() {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        };

        let mut child = Parser {
            file: path,
            depth: self.depth + 1,
            origin: match origin {
                Some(origin) => name::resolve(origin, &self.origin),
                None => self.origin.clone(),
            },
            default_ttl: self.default_ttl,
            last_owner: None,
            last_class: self.last_class,
            last_ttl: self.last_ttl,
            soa_minimum: self.soa_minimum,
            records: Vec::new(),
        };

        child
            .parse_file()
            .map_err(|inner| ZoneError::included(&self.file, number, inner))?;

        self.records.append(&mut child.records);
        Ok(())
    }

    /// Parses `[owner] [TTL] [class] type RDATA`, where TTL and class may
    /// come in either order.
    fn record(&mut self, line: &Line) -> Result<(), ZoneError> {
        let fields = &line.fields;

        let (owner, mut i) = match line.blank {
            true => match &self.last_owner {
                Some(owner) => (owner.clone(), 0),
                None => return Err(self.error(line.number, "no owner name for the record")),
            },
            false => (name::resolve(&fields[0].text, &self.origin), 1),
        };

        let mut seen = 0;
        let mut ttl = None;
        let mut class = None;

        let r#type = loop {
            let field: &Field = match fields.get(i) {
                Some(f) if !f.quoted => f,
                Some(f) => {
                    return Err(self.error(
                        line.number,
                        format!("unexpected quoted string \"{}\"", f.text),
                    ))
                }
                None => return Err(self.error(line.number, "missing record type")),
            };
            i += 1;

            if seen & SEEN_TTL == 0 && is_ttl(&field.text) {
                ttl = parse_ttl(&field.text).ok();
                seen |= SEEN_TTL;
                continue;
            }

            if seen & SEEN_CLASS == 0 {
                if let Ok(c) = field.text.parse::<Class>() {
                    class = Some(c);
                    seen |= SEEN_CLASS;
                    continue;
                }
            }

            match field.text.parse::<Type>() {
                Ok(t) => break t,
                Err(_) => {
                    return Err(self.error(
                        line.number,
                        format!("expected a TTL, class or type, found '{}'", field.text),
                    ))
                }
            }
        };

        if !r#type.is_supported() {
            return Err(self.error(
                line.number,
                format!("unsupported record type {}", r#type),
            ));
        }

        let resource = Resource::from_fields(r#type, &owner, &self.origin, &fields[i..])
            .map_err(|e| self.error(line.number, e.to_string()))?;

        if let Resource::SOA(soa) = &resource {
            self.soa_minimum = Some(soa.minimum);
        }

        let inherited = match line.blank {
            true => self.last_ttl.or(self.default_ttl),
            false => self.default_ttl.or(self.last_ttl),
        };
        let ttl = match ttl.or(inherited).or(self.soa_minimum) {
            Some(ttl) => ttl,
            None => return Err(self.error(line.number, "no TTL given, and no $TTL set")),
        };

        let class = class.unwrap_or(self.last_class);

        let mut record = Record::new(&owner, class, ttl, resource);
        record
            .validate()
            .map_err(|e| self.error(line.number, e.to_string()))?;

        self.last_owner = Some(owner);
        self.last_class = class;
        self.last_ttl = Some(ttl);
        self.records.push(record);

        Ok(())
    }
}
