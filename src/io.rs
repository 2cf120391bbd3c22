//! Various traits to help parsing of DNS messages.

use crate::bail;
use crate::name;
use crate::types::{Class, Type};
use byteorder::{ReadBytesExt, BE};
use std::io;
use std::io::Cursor;
use std::io::SeekFrom;

pub trait SeekExt: io::Seek {
    /// Returns the number of bytes remaining to be consumed.
    /// This is used as a way to check for malformed input.
    fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;

        // reset position
        self.seek(SeekFrom::Start(pos))?;

        Ok(len - pos)
    }
}

impl<'a> SeekExt for Cursor<&'a [u8]> {
    fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.position();
        let len = self.get_ref().len() as u64;

        Ok(len.saturating_sub(pos))
    }
}

/// All types that implement `Read` and `Seek` get methods defined
/// in `DNSReadExt` for free.
impl<R: io::Read + ?Sized + io::Seek> DNSReadExt for R {}

/// Extensions to io::Read to add some DNS specific types.
pub trait DNSReadExt: io::Read + io::Seek {
    /// Reads a possibly compressed domain name.
    ///
    /// Labels are lowercased and returned in presentation form, without the
    /// trailing dot. Compression pointers must point strictly backwards, and
    /// after the name the stream is positioned just past the first pointer
    /// (or the terminating zero label when there is none).
    ///
    /// # Errors
    ///
    /// Will return a io::Error(InvalidData) if the read domain name is invalid, or
    /// a more general io::Error on any other read failure.
    fn read_qname(&mut self) -> io::Result<String> {
        let mut labels: Vec<Vec<u8>> = Vec::new();
        let mut total = 1;

        // Where to continue reading once the name is done, set by the first pointer.
        let mut resume: Option<u64> = None;

        // Read each label one at a time, to build up the full domain name.
        loop {
            let here = self.stream_position()?;
            let len = self.read_u8()?;
            if len == 0 {
                break;
            }

            match len & 0xC0 {
                // No compression
                0x00 => {
                    let mut label = vec![0; len.into()];
                    self.read_exact(&mut label)?;
                    label.make_ascii_lowercase();

                    total += label.len() + 1;
                    if total > name::MAX_NAME_LEN {
                        bail!(
                            InvalidData,
                            "domain name longer than {} octets",
                            name::MAX_NAME_LEN
                        );
                    }

                    labels.push(label);
                }

                // Compression
                0xC0 => {
                    // Read the 14 bit pointer.
                    let b2 = self.read_u8()? as u16;
                    let ptr = ((len as u16 & !0xC0) << 8 | b2) as u64;

                    // Only jumping backwards guarantees we can't loop.
                    if ptr >= here {
                        bail!(
                            InvalidData,
                            "invalid compressed pointer pointing to future bytes"
                        );
                    }

                    if resume.is_none() {
                        resume = Some(self.stream_position()?);
                    }

                    self.seek(SeekFrom::Start(ptr))?;
                }

                // Unknown
                _ => bail!(
                    InvalidData,
                    "unsupported compression type {0:b}",
                    len & 0xC0
                ),
            }
        }

        if let Some(resume) = resume {
            self.seek(SeekFrom::Start(resume))?;
        }

        Ok(name::from_labels(&labels))
    }

    /// Reads a DNS Type.
    fn read_type(&mut self) -> io::Result<Type> {
        Ok(Type::from(self.read_u16::<BE>()?))
    }

    /// Reads a DNS Class.
    fn read_class(&mut self) -> io::Result<Class> {
        Ok(Class::from(self.read_u16::<BE>()?))
    }

    /// Reads a single length prefixed character-string.
    fn read_character_string(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u8()?;
        let mut buf = vec![0; len.into()];
        self.read_exact(&mut buf)?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_qname() {
        #[rustfmt::skip]
        let buf: Vec<u8> = vec![
            // 0: "F.ISI.ARPA"
            1, b'F', 3, b'I', b'S', b'I', 4, b'A', b'R', b'P', b'A', 0,
            // 12: "FOO" + pointer to "F.ISI.ARPA"
            3, b'F', b'O', b'O', 0xC0, 0,
            // 18: pointer to "FOO.F.ISI.ARPA"
            0xC0, 12,
            // 20: trailing byte
            0xFF,
        ];

        let mut cur = Cursor::new(buf.as_slice());
        assert_eq!(cur.read_qname().unwrap(), "f.isi.arpa");
        assert_eq!(cur.position(), 12);

        assert_eq!(cur.read_qname().unwrap(), "foo.f.isi.arpa");
        assert_eq!(cur.position(), 18);

        assert_eq!(cur.read_qname().unwrap(), "foo.f.isi.arpa");
        assert_eq!(cur.position(), 20);
    }

    #[test]
    fn test_read_qname_loops() {
        // Points at itself.
        let buf: Vec<u8> = vec![0xC0, 0];
        assert!(Cursor::new(buf.as_slice()).read_qname().is_err());

        // Points forward.
        let buf: Vec<u8> = vec![0xC0, 2, 0];
        assert!(Cursor::new(buf.as_slice()).read_qname().is_err());
    }

    #[test]
    fn test_read_qname_escapes() {
        let buf: Vec<u8> = vec![3, b'a', b'.', b'b', 3, b'c', b' ', b'D', 0];
        assert_eq!(
            Cursor::new(buf.as_slice()).read_qname().unwrap(),
            "a\\.b.c\\032d"
        );
    }
}
