//! Decoding messages from wire octets.

use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;

use crate::protocol::types::*;

/// Cap on preallocation, as section counts come off the wire.
const MAX_PREALLOCATED_RECORDS: usize = 16;

impl Message {
    /// # Errors
    ///
    /// If the octets are not a well-formed message.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Reader::new(octets).message()
    }
}

/// Reads a message front to back.  Compression pointers are followed
/// with a second `Reader` over the same octets.
pub struct Reader<'a> {
    octets: &'a [u8],
    position: usize,
    /// The message ID, once the header has been read.
    id: u16,
}

impl<'a> Reader<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
            id: 0,
        }
    }

    /// # Errors
    ///
    /// If the octets are not a well-formed message.
    pub fn message(&mut self) -> Result<Message, Error> {
        let header = self.take(HEADER_LEN).ok_or(Error::ShortHeader)?;
        let word = |i: usize| u16::from_be_bytes([header[i], header[i + 1]]);
        self.id = word(0);
        let header_fields = Header::from_flags(self.id, word(2));
        let [qdcount, ancount, nscount, arcount] = [word(4), word(6), word(8), word(10)];

        let mut questions = preallocate(qdcount);
        for _ in 0..qdcount {
            questions.push(self.question()?);
        }
        let mut answers = preallocate(ancount);
        for _ in 0..ancount {
            answers.push(self.record()?);
        }
        let mut authority = preallocate(nscount);
        for _ in 0..nscount {
            authority.push(self.record()?);
        }
        let mut additional = preallocate(arcount);
        for _ in 0..arcount {
            additional.push(self.record()?);
        }

        Ok(Message {
            header: header_fields,
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// # Errors
    ///
    /// If the question is cut short or its name is malformed.
    pub fn question(&mut self) -> Result<Question, Error> {
        let name = self.name()?;
        let qtype = self.u16(Part::Question)?;
        let qclass = self.u16(Part::Question)?;

        Ok(Question {
            name,
            qtype: RecordType(qtype),
            qclass: RecordClass(qclass),
        })
    }

    /// # Errors
    ///
    /// If the record is cut short, its name is malformed, or its
    /// RDLENGTH disagrees with the data.
    pub fn record(&mut self) -> Result<ResourceRecord, Error> {
        let name = self.name()?;
        let rtype = RecordType(self.u16(Part::Record)?);
        let rclass = RecordClass(self.u16(Part::Record)?);
        let ttl = self.u32(Part::Record)?;
        let rdlength = usize::from(self.u16(Part::Record)?);
        let rdata_end = self.position + rdlength;

        let data = match rtype {
            RecordType::A => RecordData::A(Ipv4Addr::from(self.u32(Part::Record)?)),
            RecordType::MX => RecordData::MX {
                preference: self.u16(Part::Record)?,
                exchange: self.name()?,
            },
            _ => RecordData::Other {
                rtype,
                octets: Bytes::copy_from_slice(self.octets_of(rdlength, Part::Record)?),
            },
        };

        if self.position != rdata_end {
            return Err(Error::BadRdlength { id: self.id });
        }

        Ok(ResourceRecord {
            name,
            rclass,
            ttl,
            data,
        })
    }

    /// Read a name, following compression pointers.  A pointer must
    /// land before the run of labels it ends, which also rules out
    /// loops.
    ///
    /// # Errors
    ///
    /// If the name is cut short, uses a reserved label type, has a bad
    /// pointer, or is longer than 255 octets.
    pub fn name(&mut self) -> Result<DomainName, Error> {
        let id = self.id;
        let mut labels = Vec::new();
        let mut wire_len = 1;
        let mut cursor = self.position;
        // start of the labels being read; pointers must land before it
        let mut segment_start = cursor;
        // where reading resumes once the name ends; set by the first
        // pointer
        let mut resume = None;

        loop {
            let mut at = Reader {
                octets: self.octets,
                position: cursor,
                id,
            };
            let length = at.u8(Part::Name)?;

            match length & 0b1100_0000 {
                0b0000_0000 if length == 0 => {
                    self.position = resume.unwrap_or(at.position);
                    break;
                }
                0b0000_0000 => {
                    let octets = at.octets_of(usize::from(length), Part::Name)?;
                    wire_len += octets.len() + 1;
                    if wire_len > NAME_MAX_LEN {
                        return Err(Error::NameTooLong { id });
                    }
                    labels.push(Label::try_from(octets).map_err(|_| Error::BadLabel { id })?);
                    cursor = at.position;
                }
                0b1100_0000 => {
                    let low = at.u8(Part::Name)?;
                    let target = usize::from(u16::from_be_bytes([length & 0b0011_1111, low]));
                    if target >= segment_start {
                        return Err(Error::BadPointer { id });
                    }
                    resume.get_or_insert(at.position);
                    cursor = target;
                    segment_start = target;
                }
                _ => return Err(Error::BadLabel { id }),
            }
        }

        DomainName::from_labels(labels).ok_or(Error::NameTooLong { id })
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let octets = self.octets.get(self.position..end)?;
        self.position = end;
        Some(octets)
    }

    fn octets_of(&mut self, len: usize, part: Part) -> Result<&'a [u8], Error> {
        let id = self.id;
        self.take(len).ok_or(Error::Truncated { id, part })
    }

    fn u8(&mut self, part: Part) -> Result<u8, Error> {
        Ok(self.octets_of(1, part)?[0])
    }

    fn u16(&mut self, part: Part) -> Result<u16, Error> {
        let octets = self.octets_of(2, part)?;
        Ok(u16::from_be_bytes([octets[0], octets[1]]))
    }

    fn u32(&mut self, part: Part) -> Result<u32, Error> {
        let octets = self.octets_of(4, part)?;
        Ok(u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]))
    }
}

fn preallocate<T>(count: u16) -> Vec<T> {
    Vec::with_capacity(usize::from(count).min(MAX_PREALLOCATED_RECORDS))
}

/// Which part of the message ran out of octets.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Part {
    Name,
    Question,
    Record,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// Fewer than 12 octets, so not even a header.
    ShortHeader,
    /// The message ends part way through something.
    Truncated { id: u16, part: Part },
    /// A length octet starting `01` or `10`.
    BadLabel { id: u16 },
    /// A compression pointer which does not point backwards.
    BadPointer { id: u16 },
    /// A name which decodes to over 255 octets.
    NameTooLong { id: u16 },
    /// A record whose RDLENGTH disagrees with its data.
    BadRdlength { id: u16 },
}

impl Error {
    /// The message ID, if the header was read.
    pub fn id(self) -> Option<u16> {
        match self {
            Error::ShortHeader => None,
            Error::Truncated { id, .. }
            | Error::BadLabel { id }
            | Error::BadPointer { id }
            | Error::NameTooLong { id }
            | Error::BadRdlength { id } => Some(id),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ShortHeader => write!(f, "shorter than a header"),
            Error::Truncated { part, .. } => write!(f, "message ends inside a {part:?}"),
            Error::BadLabel { .. } => write!(f, "reserved label type"),
            Error::BadPointer { .. } => write!(f, "compression pointer does not point backwards"),
            Error::NameTooLong { .. } => write!(f, "name longer than {NAME_MAX_LEN} octets"),
            Error::BadRdlength { .. } => write!(f, "RDLENGTH does not match the record data"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[rustfmt::skip]
    const MX_QUERY: &[u8] = &[
        0xab, 0xcd, // ID
        0x01, 0x00, // RD
        0, 1, 0, 0, 0, 0, 0, 0,
        7, b'E', b'x', b'a', b'm', b'p', b'l', b'e',
        3, b'c', b'o', b'm', 0,
        0, 15, // MX
        0, 1, // IN
    ];

    fn with_header(rest: &[u8]) -> Vec<u8> {
        [&MX_QUERY[..HEADER_LEN], rest].concat()
    }

    #[test]
    fn decodes_query() {
        let message = Message::from_octets(MX_QUERY).unwrap();

        assert_eq!(0xabcd, message.header.id);
        assert!(!message.header.is_response);
        assert!(message.header.recursion_desired);
        assert_eq!(Opcode::QUERY, message.header.opcode);
        assert_eq!(vec![question("example.com.", RecordType::MX)], message.questions);
        assert_eq!("Example.com.", message.questions[0].name.to_string());
    }

    #[test]
    fn reencodes_to_same_octets() {
        let message = Message::from_octets(MX_QUERY).unwrap();
        assert_eq!(MX_QUERY, &message.to_octets().unwrap()[..]);
    }

    #[test]
    fn short_header() {
        for len in 0..HEADER_LEN {
            assert_eq!(
                Err(Error::ShortHeader),
                Message::from_octets(&MX_QUERY[..len])
            );
        }
    }

    #[test]
    fn label_runs_past_end() {
        // "Example" claims 7 octets, 3 are present
        assert_eq!(
            Err(Error::Truncated {
                id: 0xabcd,
                part: Part::Name
            }),
            Message::from_octets(&MX_QUERY[..16])
        );
    }

    #[test]
    fn qtype_cut_short() {
        assert_eq!(
            Err(Error::Truncated {
                id: 0xabcd,
                part: Part::Question
            }),
            Message::from_octets(&MX_QUERY[..MX_QUERY.len() - 3])
        );
    }

    #[test]
    fn pointer_to_self_is_rejected() {
        assert_eq!(
            Err(Error::BadPointer { id: 0xabcd }),
            Message::from_octets(&with_header(&[0xC0, 12, 0, 15, 0, 1]))
        );
    }

    #[test]
    fn pointer_loop_is_rejected() {
        // name at 12 is "a" then a pointer back to 12
        assert_eq!(
            Err(Error::BadPointer { id: 0xabcd }),
            Message::from_octets(&with_header(&[1, b'a', 0xC0, 12, 0, 15, 0, 1]))
        );
    }

    #[test]
    fn reserved_label_type() {
        assert_eq!(
            Err(Error::BadLabel { id: 0xabcd }),
            Message::from_octets(&with_header(&[0x40, 0, 15, 0, 1]))
        );
    }

    #[test]
    fn overlong_name() {
        let mut rest = Vec::new();
        for _ in 0..5 {
            rest.push(63);
            rest.extend_from_slice(&[b'a'; 63]);
        }
        rest.extend_from_slice(&[0, 0, 15, 0, 1]);

        assert_eq!(
            Err(Error::NameTooLong { id: 0xabcd }),
            Message::from_octets(&with_header(&rest))
        );
    }

    #[test]
    fn empty_question_section() {
        let mut octets = MX_QUERY[..HEADER_LEN].to_vec();
        octets[5] = 0;

        assert!(Message::from_octets(&octets).unwrap().questions.is_empty());
    }

    #[test]
    fn edns_opt_is_kept_opaque() {
        let mut octets = MX_QUERY.to_vec();
        octets[11] = 1;
        // root owner, OPT, payload size 4096, no flags, no RDATA
        octets.extend_from_slice(&[0, 0, 41, 0x10, 0x00, 0, 0, 0, 0, 0, 0]);

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(
            vec![ResourceRecord {
                name: DomainName::root(),
                rclass: RecordClass(4096),
                ttl: 0,
                data: RecordData::Other {
                    rtype: RecordType::OPT,
                    octets: Bytes::new(),
                },
            }],
            message.additional
        );
    }

    #[test]
    fn mx_exchange_through_pointer() {
        let mut octets = MX_QUERY.to_vec();
        octets[2] |= 0x80;
        octets[7] = 1;
        #[rustfmt::skip]
        octets.extend_from_slice(&[
            0xC0, 12, // owner: the question name
            0, 15, 0, 1, 0, 0, 1, 44,
            0, 8, // RDLENGTH
            0, 10,
            3, b'a', b't', b't', 0xC0, 12,
        ]);

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(
            vec![mx_record("example.com.", 10, "att.example.com.")],
            message.answers
        );
        assert_eq!(
            "att.Example.com.",
            message.answers[0].to_string().split(' ').nth(1).unwrap()
        );
    }

    #[test]
    fn rdlength_mismatch() {
        let mut octets = MX_QUERY.to_vec();
        octets[7] = 1;
        // an A record claiming 5 octets of RDATA
        octets.extend_from_slice(&[0xC0, 12, 0, 1, 0, 1, 0, 0, 1, 44, 0, 5, 10, 0, 0, 66, 0]);

        assert_eq!(
            Err(Error::BadRdlength { id: 0xabcd }),
            Message::from_octets(&octets)
        );
    }
}
