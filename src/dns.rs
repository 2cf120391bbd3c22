use crate::bail;
use crate::io::{DNSReadExt, SeekExt};
use crate::name;
use crate::types::*;
use crate::Error;
use crate::Resource;
use byteorder::{ReadBytesExt, BE};
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::io;
use std::io::Cursor;

/// Size of the fixed message header.
pub const HEADER_LEN: usize = 12;

/// Largest message this crate will send over UDP, see <https://dnsflagday.net/2020/>.
pub const MAX_UDP_SIZE: usize = 1232;

/// Largest UDP message a client without EDNS(0) is guaranteed to accept.
pub const MIN_UDP_SIZE: usize = 512;

// A helper class to hold state while the parsing is happening.
pub(crate) struct MessageParser<'a> {
    cur: Cursor<&'a [u8]>,

    m: Message,
}

#[derive(Copy, Clone, PartialEq)]
enum RecordSection {
    Answers,
    Authorities,
    Additionals,
}

impl<'a> MessageParser<'a> {
    fn new(buf: &[u8]) -> MessageParser {
        MessageParser {
            cur: Cursor::new(buf),
            m: Message::default(),
        }
    }

    /// Consume the MessageParser and returned the resulting Message.
    fn parse(mut self) -> crate::Result<Message> {
        if self.cur.get_ref().len() < HEADER_LEN {
            return Err(Error::MalformedHeader(format!(
                "message is {} bytes, shorter than the {} byte header",
                self.cur.get_ref().len(),
                HEADER_LEN
            )));
        }

        let counts = self.parse_header()?;
        self.parse_body(counts)
            .map_err(|e| Error::InvalidMessage(e.to_string()))?;

        self.m.packet = Some(self.cur.get_ref().to_vec());
        Ok(self.m)
    }

    fn parse_header(&mut self) -> crate::Result<[u16; 4]> {
        let header = |e: io::Error| Error::MalformedHeader(e.to_string());

        self.m.id = self.cur.read_u16::<BE>().map_err(header)?;

        let b = self.cur.read_u8().map_err(header)?;
        self.m.qr = QR::from_bool(0b1000_0000 & b != 0);
        let opcode = (0b0111_1000 & b) >> 3;
        self.m.aa = (0b0000_0100 & b) != 0;
        self.m.tc = (0b0000_0010 & b) != 0;
        self.m.rd = (0b0000_0001 & b) != 0;

        self.m.opcode = match FromPrimitive::from_u8(opcode) {
            Some(t) => t,
            None => return Err(Error::MalformedHeader(format!("invalid Opcode({})", opcode))),
        };

        let b = self.cur.read_u8().map_err(header)?;
        self.m.ra = (0b1000_0000 & b) != 0;
        self.m.z = (0b0100_0000 & b) != 0; // Unused
        self.m.ad = (0b0010_0000 & b) != 0;
        self.m.cd = (0b0001_0000 & b) != 0;
        let rcode = 0b0000_1111 & b;

        self.m.rcode = match FromPrimitive::from_u8(rcode) {
            Some(t) => t,
            None => return Err(Error::MalformedHeader(format!("invalid RCode({})", rcode))),
        };

        let mut counts = [0_u16; 4];
        for count in counts.iter_mut() {
            *count = self.cur.read_u16::<BE>().map_err(header)?;
        }

        Ok(counts)
    }

    fn parse_body(&mut self, counts: [u16; 4]) -> io::Result<()> {
        let [qd_count, an_count, ns_count, ar_count] = counts;

        // Only single question messages are handled. Error responses may
        // carry just the header.
        let header_only = qd_count == 0 && self.m.qr == QR::Response;
        if qd_count != 1 && !header_only {
            bail!(InvalidData, "expected one question, found {}", qd_count);
        }

        self.read_questions(qd_count)?;
        self.read_records(an_count, RecordSection::Answers)?;
        self.read_records(ns_count, RecordSection::Authorities)?;
        self.read_records(ar_count, RecordSection::Additionals)?;

        if self.cur.remaining()? > 0 {
            bail!(
                InvalidData,
                "finished parsing with {} bytes left over",
                self.cur.remaining()?
            );
        }

        Ok(())
    }

    fn read_questions(&mut self, count: u16) -> io::Result<()> {
        self.m.questions.reserve_exact(count.into());

        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;
            let class = self.cur.read_class()?;

            self.m.questions.push(Question {
                name,
                r#type,
                class,
            });
        }

        Ok(())
    }

    fn read_records(&mut self, count: u16, section: RecordSection) -> io::Result<()> {
        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;

            if section == RecordSection::Additionals && r#type == Type::OPT {
                if self.m.extension.is_some() {
                    bail!(
                        InvalidData,
                        "multiple EDNS(0) extensions. Expected only one."
                    );
                }

                let ext = Extension::parse(&mut self.cur)?;
                self.m.extension = Some(ext);
                continue;
            }

            let record = Record::parse(&mut self.cur, name, r#type)?;
            match section {
                RecordSection::Answers => self.m.answers.push(record),
                RecordSection::Authorities => self.m.authoritys.push(record),
                RecordSection::Additionals => self.m.additionals.push(record),
            }
        }

        Ok(())
    }
}

impl Record {
    /// Parses the rest of a record, after its name and type.
    fn parse(cur: &mut Cursor<&[u8]>, name: String, r#type: Type) -> io::Result<Record> {
        let class = cur.read_class()?;

        let ttl_offset = cur.position() as usize;
        let ttl = cur.read_u32::<BE>()?;
        let len = cur.read_u16::<BE>()?;

        let start = cur.position();
        let resource = Resource::parse(cur, r#type, &name, len)?;

        let read = cur.position() - start;
        if read != u64::from(len) {
            bail!(
                InvalidData,
                "{} record for '{}' used {} bytes of its {} byte RDATA",
                r#type,
                name,
                read,
                len
            );
        }

        Ok(Record {
            name,
            class,
            ttl,
            resource,
            ttl_offset: Some(ttl_offset),
        })
    }
}

impl Extension {
    /// Parses an OPT record, after its name and type.
    fn parse(cur: &mut Cursor<&[u8]>) -> io::Result<Extension> {
        let payload_size = cur.read_u16::<BE>()?;
        let extend_rcode = cur.read_u8()?;
        let version = cur.read_u8()?;
        let flags = cur.read_u16::<BE>()?;
        let len = cur.read_u16::<BE>()?;

        let end = cur.position() + u64::from(len);
        let mut options = Vec::new();
        while cur.position() < end {
            let code = cur.read_u16::<BE>()?;
            let len = cur.read_u16::<BE>()?;
            let mut data = vec![0; len.into()];
            io::Read::read_exact(cur, &mut data)?;
            options.push(EdnsOption { code, data });
        }

        if cur.position() != end {
            bail!(InvalidData, "EDNS(0) options overran the OPT record");
        }

        Ok(Extension {
            payload_size,
            extend_rcode,
            version,
            dnssec_ok: flags & 0x8000 != 0,
            options,
        })
    }

    fn write(&self, w: &mut MessageWriter) -> io::Result<()> {
        w.write_u8(0); // Root domain
        w.write_u16(Type::OPT.into());
        w.write_u16(self.payload_size);
        w.write_u8(self.extend_rcode);
        w.write_u8(self.version);
        w.write_u16(if self.dnssec_ok { 0x8000 } else { 0 });

        let len_pos = w.len();
        w.write_u16(0);
        for option in &self.options {
            if option.data.len() > usize::from(u16::MAX) {
                bail!(InvalidInput, "EDNS(0) option {} too long", option.code);
            }
            w.write_u16(option.code);
            w.write_u16(option.data.len() as u16);
            w.write_bytes(&option.data);
        }
        w.patch_len(len_pos)
    }
}

/// Builds a message in wire format, compressing names as it goes.
pub(crate) struct MessageWriter {
    buf: Vec<u8>,

    /// Offsets of the name suffixes written so far, keyed by their
    /// lowercase wire form.
    names: HashMap<Vec<u8>, u16>,
}

impl MessageWriter {
    pub fn new() -> MessageWriter {
        MessageWriter {
            buf: Vec::with_capacity(512),
            names: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Writes a single length prefixed character-string.
    pub fn write_character_string(&mut self, s: &[u8]) -> io::Result<()> {
        if s.len() > 255 {
            bail!(
                InvalidInput,
                "character-string is {} bytes, longer than 255",
                s.len()
            );
        }
        self.write_u8(s.len() as u8);
        self.write_bytes(s);
        Ok(())
    }

    /// Overwrites the u16 at `pos` with the number of bytes written after it.
    pub fn patch_len(&mut self, pos: usize) -> io::Result<()> {
        let len = self.buf.len() - pos - 2;
        if len > usize::from(u16::MAX) {
            bail!(InvalidInput, "RDATA is {} bytes, longer than 65535", len);
        }
        self.buf[pos..pos + 2].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(())
    }

    /// Writes a domain name, as a pointer to an earlier copy of its longest
    /// known suffix when `compress` is set.
    pub fn write_qname(&mut self, domain: &str, compress: bool) -> io::Result<()> {
        let labels = name::labels(domain)?;

        for i in 0..labels.len() {
            let mut key = Vec::new();
            for label in &labels[i..] {
                key.push(label.len() as u8);
                key.extend(label.iter().map(|b| b.to_ascii_lowercase()));
            }

            if compress {
                if let Some(ptr) = self.names.get(&key) {
                    self.write_u16(0xC000 | ptr);
                    return Ok(());
                }
            }

            // Pointers only have 14 bits.
            let pos = self.buf.len();
            if pos < 0x4000 {
                self.names.entry(key).or_insert(pos as u16);
            }

            self.write_u8(labels[i].len() as u8);
            self.write_bytes(&labels[i]);
        }

        self.write_u8(0);
        Ok(())
    }

    /// Writes a whole record, returning the offset of its TTL field.
    fn write_record(&mut self, record: &Record) -> io::Result<usize> {
        self.write_qname(&record.name, true)?;
        self.write_u16(record.r#type().into());
        self.write_u16(record.class.into());

        let ttl_offset = self.len();
        self.write_u32(record.ttl);

        let len_pos = self.len();
        self.write_u16(0);
        record.resource.write(self)?;
        self.patch_len(len_pos)?;

        Ok(ttl_offset)
    }
}

impl Message {
    /// Decodes a message from its wire format.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHeader`] if the buffer is shorter than the header, or the
    /// header carries an unassigned opcode or response code. [`Error::InvalidMessage`]
    /// for any other decoding failure, including messages without exactly one question.
    pub fn from_slice(buf: &[u8]) -> crate::Result<Message> {
        MessageParser::new(buf).parse()
    }

    /// Appends a question for `domain`, which may be unicode.
    pub fn add_question(&mut self, domain: &str, r#type: Type, class: Class) {
        self.questions.push(Question {
            name: name::to_ascii(domain),
            r#type,
            class,
        });
    }

    /// Adds an EDNS(0) extension record, as defined by [rfc6891](https://datatracker.ietf.org/doc/html/rfc6891).
    pub fn add_extension(&mut self, ext: Extension) {
        self.extension = Some(ext);
    }

    /// Builds a standard query for a single question.
    pub fn query(question: Question, id: u16, recursion: bool) -> Message {
        Message {
            id,
            rd: recursion,
            questions: vec![question],
            ..Default::default()
        }
    }

    /// Returns the first (and for this crate, only) question.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Builds an empty response to this message with the given response code.
    pub fn response(&self, rcode: Rcode) -> Message {
        Message {
            id: self.id,
            qr: QR::Response,
            opcode: self.opcode,
            rd: self.rd,
            ra: true,
            cd: self.cd,
            rcode,
            questions: self.questions.clone(),
            ..Default::default()
        }
    }

    /// Builds a header only response for a query that failed to decode,
    /// copying the id, opcode and RD bit from the raw header. Returns `None`
    /// if there is not even a header to answer.
    pub fn error_response(raw: &[u8], rcode: Rcode) -> Option<Vec<u8>> {
        if raw.len() < HEADER_LEN {
            return None;
        }

        let mut buf = vec![0; HEADER_LEN];
        buf[0] = raw[0];
        buf[1] = raw[1];
        buf[2] = 0b1000_0000 | (raw[2] & 0b0111_1001);
        buf[3] = 0b1000_0000 | (rcode as u8 & 0b0000_1111);
        Some(buf)
    }

    /// Returns a copy of this message reduced to its header and question,
    /// with the TC bit set, for when the full message would not fit.
    pub fn truncated(&self) -> Message {
        Message {
            id: self.id,
            qr: self.qr,
            opcode: self.opcode,
            aa: self.aa,
            tc: true,
            rd: self.rd,
            ra: self.ra,
            ad: self.ad,
            cd: self.cd,
            rcode: self.rcode,
            questions: self.questions.clone(),
            extension: self.extension.clone(),
            ..Default::default()
        }
    }

    fn encode(&self) -> io::Result<(Vec<u8>, Vec<usize>)> {
        let mut w = MessageWriter::new();

        w.write_u16(self.id);

        let mut b = 0_u8;
        b |= if self.qr.to_bool() { 0b1000_0000 } else { 0 };
        b |= ((self.opcode as u8) << 3) & 0b0111_1000;
        b |= if self.aa { 0b0000_0100 } else { 0 };
        b |= if self.tc { 0b0000_0010 } else { 0 };
        b |= if self.rd { 0b0000_0001 } else { 0 };
        w.write_u8(b);

        let mut b = 0_u8;
        b |= if self.ra { 0b1000_0000 } else { 0 };
        b |= if self.z { 0b0100_0000 } else { 0 };
        b |= if self.ad { 0b0010_0000 } else { 0 };
        b |= if self.cd { 0b0001_0000 } else { 0 };
        b |= (self.rcode as u8) & 0b0000_1111;
        w.write_u8(b);

        let ar_count = self.additionals.len() + self.extension.is_some() as usize;
        for count in [
            self.questions.len(),
            self.answers.len(),
            self.authoritys.len(),
            ar_count,
        ] {
            if count > usize::from(u16::MAX) {
                bail!(InvalidInput, "section with {} entries is too large", count);
            }
            w.write_u16(count as u16);
        }

        for question in &self.questions {
            w.write_qname(&question.name, true)?;
            w.write_u16(question.r#type.into());
            w.write_u16(question.class.into());
        }

        let mut offsets = Vec::new();
        for record in self
            .answers
            .iter()
            .chain(&self.authoritys)
            .chain(&self.additionals)
        {
            offsets.push(w.write_record(record)?);
        }

        if let Some(e) = &self.extension {
            e.write(&mut w)?;
        }

        Ok((w.into_inner(), offsets))
    }

    /// Returns this DNS Message as a Vec<u8> ready to be sent, as defined by [rfc1035](https://datatracker.ietf.org/doc/html/rfc1035).
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        Ok(self.encode()?.0)
    }

    /// Encodes this message and keeps the result, so it can later be sent
    /// (and have its TTLs adjusted) without encoding again.
    pub fn pack(&mut self) -> io::Result<&[u8]> {
        let (packet, offsets) = self.encode()?;

        for (record, offset) in self
            .answers
            .iter_mut()
            .chain(self.authoritys.iter_mut())
            .chain(self.additionals.iter_mut())
            .zip(offsets)
        {
            record.ttl_offset = Some(offset);
        }

        Ok(self.packet.insert(packet))
    }

    /// The packed form of this message, if it has been packed or decoded.
    pub fn packet(&self) -> Option<&[u8]> {
        self.packet.as_deref()
    }

    /// Sets the id, in the packed form as well.
    pub fn set_id(&mut self, id: u16) {
        self.id = id;
        if let Some(packet) = &mut self.packet {
            packet[0..2].copy_from_slice(&id.to_be_bytes());
        }
    }

    /// Sets the RD bit, in the packed form as well.
    pub fn set_rd(&mut self, rd: bool) {
        self.rd = rd;
        if let Some(packet) = &mut self.packet {
            if rd {
                packet[2] |= 0b0000_0001;
            } else {
                packet[2] &= !0b0000_0001;
            }
        }
    }

    fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.answers
            .iter_mut()
            .chain(self.authoritys.iter_mut())
            .chain(self.additionals.iter_mut())
    }

    /// Reduces every record's TTL by `elapsed` seconds (stopping at zero), in
    /// the packed form as well.
    pub fn decrement_ttl(&mut self, elapsed: u32) {
        let mut packet = self.packet.take();

        for record in self.records_mut() {
            record.ttl = record.ttl.saturating_sub(elapsed);
            if let (Some(packet), Some(offset)) = (&mut packet, record.ttl_offset) {
                if let Some(field) = packet.get_mut(offset..offset + 4) {
                    field.copy_from_slice(&record.ttl.to_be_bytes());
                }
            }
        }

        self.packet = packet;
    }

    /// Raises every record's TTL to at least `minimum`. The packed form is
    /// discarded when anything changes.
    pub fn raise_ttl(&mut self, minimum: u32) {
        let mut changed = false;
        for record in self.records_mut() {
            if record.ttl < minimum {
                record.ttl = minimum;
                changed = true;
            }
        }
        if changed {
            self.packet = None;
        }
    }

    /// The smallest TTL of any record in the message.
    pub fn min_ttl(&self) -> Option<u32> {
        self.answers
            .iter()
            .chain(&self.authoritys)
            .chain(&self.additionals)
            .map(|r| r.ttl)
            .min()
    }
}
