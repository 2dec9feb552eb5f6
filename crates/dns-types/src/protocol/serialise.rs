//! Encoding messages to wire octets.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::fmt;

use crate::protocol::types::*;

/// Compression pointers carry a 14-bit offset.
const POINTER_MAX_OFFSET: u16 = 0x3FFF;
const POINTER_TAG: u16 = 0xC000;

impl Message {
    /// # Errors
    ///
    /// If a section holds more than 65535 records, or some RDATA is
    /// longer than 65535 octets.
    pub fn to_octets(&self) -> Result<BytesMut, Error> {
        let mut writer = Writer::default();
        writer.message(self)?;
        Ok(writer.finish())
    }
}

/// Appends a message to a buffer, remembering where names went so
/// later copies can be written as pointers.
pub struct Writer {
    out: BytesMut,
    pointers: HashMap<DomainName, u16>,
}

impl Default for Writer {
    fn default() -> Self {
        Self {
            out: BytesMut::with_capacity(UDP_MAX_MESSAGE_LEN),
            pointers: HashMap::new(),
        }
    }
}

impl Writer {
    pub fn finish(self) -> BytesMut {
        self.out
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// # Errors
    ///
    /// See `Message::to_octets`.
    pub fn message(&mut self, message: &Message) -> Result<(), Error> {
        let counts = [
            message.questions.len(),
            message.answers.len(),
            message.authority.len(),
            message.additional.len(),
        ];

        self.u16(message.header.id);
        self.u16(message.header.flags());
        for count in counts {
            self.u16(u16::try_from(count).map_err(|_| Error::SectionTooLarge(count))?);
        }

        for question in &message.questions {
            self.question(question);
        }
        for rr in message
            .answers
            .iter()
            .chain(&message.authority)
            .chain(&message.additional)
        {
            self.record(rr)?;
        }

        Ok(())
    }

    pub fn question(&mut self, question: &Question) {
        self.name(&question.name, true);
        self.u16(question.qtype.0);
        self.u16(question.qclass.0);
    }

    /// RDLENGTH is written as a placeholder and patched once the RDATA
    /// is in place.
    ///
    /// # Errors
    ///
    /// If the RDATA is longer than 65535 octets.
    pub fn record(&mut self, rr: &ResourceRecord) -> Result<(), Error> {
        self.name(&rr.name, true);
        self.u16(rr.rtype().0);
        self.u16(rr.rclass.0);
        self.out.put_u32(rr.ttl);

        let rdlength_at = self.out.len();
        self.u16(0);
        match &rr.data {
            RecordData::A(address) => self.raw(&address.octets()),
            RecordData::MX {
                preference,
                exchange,
            } => {
                self.u16(*preference);
                self.name(exchange, false);
            }
            RecordData::Other { octets, .. } => self.raw(octets),
        }

        let rdlength = self.out.len() - rdlength_at - 2;
        let patched = u16::try_from(rdlength).map_err(|_| Error::RdataTooLong(rdlength))?;
        self.out[rdlength_at..rdlength_at + 2].copy_from_slice(&patched.to_be_bytes());

        Ok(())
    }

    /// With `compress`, a name already written with `compress` becomes
    /// a pointer to that copy, and a new name is remembered.  Names
    /// written without `compress` are never pointed at.
    pub fn name(&mut self, name: &DomainName, compress: bool) {
        if compress {
            if let Some(&pointer) = self.pointers.get(name) {
                self.u16(pointer);
                return;
            }
            match u16::try_from(self.out.len()) {
                Ok(offset) if offset <= POINTER_MAX_OFFSET && !name.is_root() => {
                    self.pointers.insert(name.clone(), POINTER_TAG | offset);
                }
                _ => (),
            }
        }

        for label in name.labels() {
            self.out.put_u8(label.len());
            self.raw(label.as_bytes());
        }
        self.out.put_u8(0);
    }

    pub fn raw(&mut self, octets: &[u8]) {
        self.out.put_slice(octets);
    }

    fn u16(&mut self, value: u16) {
        self.out.put_u16(value);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A section has this many records, more than a count can hold.
    SectionTooLarge(usize),
    /// Some RDATA is this long, more than RDLENGTH can hold.
    RdataTooLong(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SectionTooLarge(n) => write!(f, "{n} records do not fit in a section"),
            Error::RdataTooLong(n) => write!(f, "{n} octets of RDATA do not fit in a record"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::types::test_util::*;

    const EXAMPLE_COM: &[u8] = b"\x07example\x03com\x00";
    const ATT_EXAMPLE_COM: &[u8] = b"\x03att\x07example\x03com\x00";

    fn concat(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn empty_response_header() {
        let mut message =
            Message::from_question(0xbeef, question("example.com.", RecordType::MX)).make_response();
        message.questions.clear();

        assert_eq!(
            &[0xbe_u8, 0xef, 0x81, 0x80, 0, 0, 0, 0, 0, 0, 0, 0][..],
            &message.to_octets().unwrap()[..]
        );
    }

    #[test]
    fn compression_matches_ignoring_case() {
        let mut writer = Writer::default();
        writer.raw(&[9, 9, 9, 9]);
        writer.name(&domain("example.com."), true);
        writer.name(&domain("EXAMPLE.com."), true);

        assert_eq!(
            concat(&[&[9, 9, 9, 9], EXAMPLE_COM, &[0xC0, 4]]),
            writer.finish()
        );
    }

    #[test]
    fn uncompressed_names_are_not_pointed_at() {
        let mut writer = Writer::default();
        writer.name(&domain("example.com."), false);
        writer.name(&domain("example.com."), true);
        writer.name(&domain("example.com."), true);

        assert_eq!(
            concat(&[EXAMPLE_COM, EXAMPLE_COM, &[0xC0, 13]]),
            writer.finish()
        );
    }

    #[test]
    fn question_keeps_case() {
        let mut writer = Writer::default();
        writer.question(&question("ExAmPlE.CoM.", RecordType::MX));

        assert_eq!(
            concat(&[b"\x07ExAmPlE\x03CoM\x00", &[0, 15, 0, 1]]),
            writer.finish()
        );
    }

    #[test]
    fn forged_reply_layout() {
        let mut message =
            Message::from_question(0x1234, question("example.com.", RecordType::MX)).make_response();
        message.answers = vec![mx_record("example.com.", 10, "att.example.com.")];
        message.additional = vec![a_record("att.example.com.", Ipv4Addr::new(10, 0, 0, 66))];

        let expected = concat(&[
            &[0x12, 0x34, 0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 1],
            EXAMPLE_COM,
            &[0, 15, 0, 1],
            // answer: owner points at the question, exchange in full
            &[0xC0, 12, 0, 15, 0, 1, 0, 0, 1, 44, 0, 19, 0, 10],
            ATT_EXAMPLE_COM,
            // additional: owner in full
            ATT_EXAMPLE_COM,
            &[0, 1, 0, 1, 0, 0, 1, 44, 0, 4, 10, 0, 0, 66],
        ]);

        assert_eq!(expected, message.to_octets().unwrap());
    }

    #[test]
    fn rdlength_counts_written_octets() {
        let mut writer = Writer::default();
        writer
            .record(&mx_record("example.com.", 32, "mx.example.com."))
            .unwrap();
        let octets = writer.finish();

        // 2 octets of preference, 16 of name
        assert_eq!([0_u8, 18], octets[EXAMPLE_COM.len() + 8..EXAMPLE_COM.len() + 10]);
        assert_eq!(EXAMPLE_COM.len() + 10 + 18, octets.len());
    }

    #[test]
    fn rdata_too_long() {
        let rr = opaque_record("example.com.", RecordType::TXT, &vec![0; 70_000]);

        assert_eq!(
            Err(Error::RdataTooLong(70_000)),
            Writer::default().record(&rr)
        );
    }
}
