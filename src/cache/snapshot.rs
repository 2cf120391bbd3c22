//! Saving and restoring the external answers, so a restarted server does not
//! begin with a cold cache.
//!
//! The format is a 4 byte magic and a version byte, followed by one entry per
//! answer:
//!
//! ```text
//! received_at: i64, accessed_at: i64, length: u16, message: [u8; length]
//! ```
//!
//! all big-endian, in least to most recently used order.

use super::{now, Answer, Cache};
use crate::bail;
use crate::Message;
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use log::{debug, warn};
use std::io;
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"RDNS";
const VERSION: u8 = 1;

impl Cache {
    /// Writes every unexpired external answer to `w`, returning how many
    /// were written.
    pub fn save<W: Write>(&self, mut w: W) -> io::Result<usize> {
        self.save_at(&mut w, now())
    }

    pub(crate) fn save_at<W: Write>(&self, w: &mut W, now: i64) -> io::Result<usize> {
        w.write_all(MAGIC)?;
        w.write_u8(VERSION)?;

        let mut saved = 0;
        for answer in self.list() {
            if answer.is_expired(now) {
                continue;
            }

            let packet = answer.message.to_vec()?;
            let len = match u16::try_from(packet.len()) {
                Ok(len) => len,
                Err(_) => {
                    warn!("not saving oversized answer for {:?}", answer.question);
                    continue;
                }
            };

            w.write_i64::<BE>(answer.received_at)?;
            w.write_i64::<BE>(answer.accessed_at)?;
            w.write_u16::<BE>(len)?;
            w.write_all(&packet)?;
            saved += 1;
        }

        w.flush()?;
        Ok(saved)
    }

    /// Reads answers written by [`Cache::save`], skipping any that have
    /// expired since. Returns how many were loaded.
    pub fn load<R: Read>(&self, mut r: R) -> io::Result<usize> {
        self.load_at(&mut r, now())
    }

    pub(crate) fn load_at<R: Read>(&self, r: &mut R, now: i64) -> io::Result<usize> {
        let mut magic = [0; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!(InvalidData, "not a cache snapshot");
        }

        let version = r.read_u8()?;
        if version != VERSION {
            bail!(InvalidData, "unsupported cache snapshot version {}", version);
        }

        let mut loaded = 0;
        loop {
            let received_at = match r.read_i64::<BE>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let accessed_at = r.read_i64::<BE>()?;
            let len = r.read_u16::<BE>()?;

            let mut packet = vec![0; usize::from(len)];
            r.read_exact(&mut packet)?;

            let message = Message::from_slice(&packet)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let question = match message.question() {
                Some(q) => q.clone(),
                None => bail!(InvalidData, "cached answer without a question"),
            };

            let answer = Answer::at(question, message, received_at, accessed_at);
            if answer.is_local() || answer.is_expired(now) {
                debug!("skipping stale snapshot answer for {:?}", answer.question);
                continue;
            }

            self.upsert(answer);
            loaded += 1;
        }

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Question, Record, Resource, Type, QR};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn answer(name: &str, ttl: u32, received_at: i64) -> Answer {
        let mut m = Message {
            qr: QR::Response,
            ..Default::default()
        };
        m.add_question(name, Type::AAAA, Class::Internet);
        m.answers.push(Record::new(
            name,
            Class::Internet,
            ttl,
            Resource::AAAA("2001:db8::1".parse().unwrap()),
        ));
        Answer::at(
            Question::new(name, Type::AAAA, Class::Internet),
            m,
            received_at,
            received_at,
        )
    }

    #[test]
    fn test_save_load() {
        let now = now();
        let cache = Cache::default();
        cache.upsert(answer("fresh.example.com", 300, now - 10));
        cache.upsert(answer("stale.example.com", 300, now - 301));
        cache.upsert(answer("recent.example.com", 600, now - 5));
        cache.upsert(Answer::local(
            Question::new("local.example.com", Type::AAAA, Class::Internet),
            answer("local.example.com", 300, 0).message,
        ));

        let mut buf = Vec::new();
        assert_eq!(cache.save_at(&mut buf, now).unwrap(), 2);

        let restored = Cache::default();
        assert_eq!(restored.load_at(&mut Cursor::new(&buf), now).unwrap(), 2);

        let list = restored.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], answer("fresh.example.com", 300, now - 10));
        assert_eq!(list[1], answer("recent.example.com", 600, now - 5));

        // Later on, the first answer has expired.
        let restored = Cache::default();
        assert_eq!(restored.load_at(&mut Cursor::new(&buf), now + 295).unwrap(), 1);
    }

    #[test]
    fn test_load_errors() {
        let cache = Cache::default();
        assert!(cache.load(Cursor::new(b"NOPE\x01")).is_err());
        assert!(cache.load(Cursor::new(b"RDNS\x02")).is_err());
        assert!(cache.load(Cursor::new(b"RD")).is_err());

        // A truncated entry.
        assert!(cache.load(Cursor::new(b"RDNS\x01\0\0\0\0\0\0\0\x01")).is_err());

        assert_eq!(cache.load(Cursor::new(b"RDNS\x01")).unwrap(), 0);
    }
}
