//! The parts of an RFC 1035 message a forging responder has to read
//! and write.  Record data is only interpreted for `A` and `MX`; any
//! other record is carried as raw octets.

use bytes::Bytes;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// A name, counting length octets and the root, is at most this long.
pub const NAME_MAX_LEN: usize = 255;

/// A single label is at most this long.
pub const LABEL_MAX_LEN: usize = 63;

/// Without EDNS, a UDP message is at most this long.
pub const UDP_MAX_MESSAGE_LEN: usize = 512;

pub const HEADER_LEN: usize = 12;

// Bits of the 16-bit flags word following the ID.
const FLAG_QR: u16 = 1 << 15;
const FLAG_AA: u16 = 1 << 10;
const FLAG_TC: u16 = 1 << 9;
const FLAG_RD: u16 = 1 << 8;
const FLAG_RA: u16 = 1 << 7;
const OPCODE_SHIFT: u16 = 11;

/// A whole message.  Section counts are not stored: they are derived
/// from the vectors when encoding, so they always agree with the
/// records actually written.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// A standard query for one question, with RD set.
    pub fn from_question(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                recursion_desired: true,
                ..Header::default()
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// An empty `NOERROR` reply: same ID, opcode, RD bit and
    /// questions, with RA set.  Nothing from the query's other
    /// sections (such as an EDNS `OPT`) is carried over.
    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                recursion_desired: self.header.recursion_desired,
                recursion_available: true,
                ..Header::default()
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// The header minus its four counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub opcode: Opcode,
    pub is_authoritative: bool,
    pub is_truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: Rcode,
}

impl Header {
    /// Pack everything but the ID into the flags word.  The three Z
    /// bits are always written as zero.
    pub fn flags(&self) -> u16 {
        let bit = |set: bool, mask: u16| if set { mask } else { 0 };

        bit(self.is_response, FLAG_QR)
            | u16::from(self.opcode.code()) << OPCODE_SHIFT
            | bit(self.is_authoritative, FLAG_AA)
            | bit(self.is_truncated, FLAG_TC)
            | bit(self.recursion_desired, FLAG_RD)
            | bit(self.recursion_available, FLAG_RA)
            | u16::from(self.rcode.code())
    }

    /// Inverse of `flags`, ignoring the Z bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            is_response: flags & FLAG_QR != 0,
            opcode: Opcode::new((flags >> OPCODE_SHIFT) as u8),
            is_authoritative: flags & FLAG_AA != 0,
            is_truncated: flags & FLAG_TC != 0,
            recursion_desired: flags & FLAG_RD != 0,
            recursion_available: flags & FLAG_RA != 0,
            rcode: Rcode::new(flags as u8),
        }
    }
}

/// The 4-bit kind of query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Opcode(u8);

impl Opcode {
    pub const QUERY: Self = Self(0);
    pub const IQUERY: Self = Self(1);
    pub const STATUS: Self = Self(2);

    /// Only the low 4 bits are kept.
    pub fn new(code: u8) -> Self {
        Self(code & 0x0F)
    }

    pub fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::QUERY => write!(f, "QUERY"),
            Self::IQUERY => write!(f, "IQUERY"),
            Self::STATUS => write!(f, "STATUS"),
            Self(code) => write!(f, "OPCODE{code}"),
        }
    }
}

/// The 4-bit response code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Rcode(u8);

impl Rcode {
    pub const NO_ERROR: Self = Self(0);

    /// Only the low 4 bits are kept.
    pub fn new(code: u8) -> Self {
        Self(code & 0x0F)
    }

    pub fn code(self) -> u8 {
        self.0
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Opcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::new(u.arbitrary()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Rcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::new(u.arbitrary()?))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub data: RecordData,
}

impl ResourceRecord {
    pub fn rtype(&self) -> RecordType {
        self.data.rtype()
    }
}

/// Zone-file style: owner, TTL, class, type, data.
impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t", self.name, self.ttl, self.rclass)?;
        match &self.data {
            RecordData::A(address) => write!(f, "A\t{address}"),
            RecordData::MX {
                preference,
                exchange,
            } => write!(f, "MX\t{preference} {exchange}"),
            RecordData::Other { rtype, octets } => write!(f, "{rtype}\t\\# {}", octets.len()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordData {
    A(Ipv4Addr),
    MX {
        preference: u16,
        exchange: DomainName,
    },
    /// Uninterpreted RDATA.  The decoder never produces this for `A`
    /// or `MX`.
    Other { rtype: RecordType, octets: Bytes },
}

impl RecordData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::MX { .. } => RecordType::MX,
            RecordData::Other { rtype, .. } => *rtype,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordData {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(match u.arbitrary()? {
            RecordType::A => RecordData::A(u.arbitrary()?),
            RecordType::MX => RecordData::MX {
                preference: u.arbitrary()?,
                exchange: u.arbitrary()?,
            },
            rtype => {
                let len = u.int_in_range(0..=64)?;
                RecordData::Other {
                    rtype,
                    octets: Bytes::copy_from_slice(u.bytes(len)?),
                }
            }
        })
    }
}

/// A TYPE or QTYPE value.  Unknown values are kept as they are.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: Self = Self(1);
    pub const NS: Self = Self(2);
    pub const CNAME: Self = Self(5);
    pub const SOA: Self = Self(6);
    pub const MX: Self = Self(15);
    pub const TXT: Self = Self(16);
    pub const AAAA: Self = Self(28);
    pub const OPT: Self = Self(41);
    /// `*` in a question: every type.
    pub const ANY: Self = Self(255);

    /// Whether a question of this type asks for records of `rtype`.
    pub fn matches(self, rtype: RecordType) -> bool {
        self == rtype || self == Self::ANY
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::OPT => "OPT",
            Self::ANY => "ANY",
            Self(n) => return write!(f, "TYPE{n}"),
        };
        f.write_str(name)
    }
}

/// A CLASS or QCLASS value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct RecordClass(pub u16);

impl RecordClass {
    pub const IN: Self = Self(1);
    pub const CH: Self = Self(3);
    pub const ANY: Self = Self(255);
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::IN => f.write_str("IN"),
            Self::CH => f.write_str("CH"),
            Self::ANY => f.write_str("ANY"),
            Self(n) => write!(f, "CLASS{n}"),
        }
    }
}

/// A fully-qualified name, held as its labels without the root.
///
/// Labels keep the case they were given in, so a name decoded from a
/// query encodes back to the same octets, but names compare and hash
/// ignoring ASCII case.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct DomainName {
    labels: Vec<Label>,
}

impl DomainName {
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// `None` if the encoded name would be over 255 octets.
    pub fn from_labels(labels: Vec<Label>) -> Option<Self> {
        let name = Self { labels };
        (name.wire_len() <= NAME_MAX_LEN).then_some(name)
    }

    /// Parse `a.b.c` or `a.b.c.`; `.` is the root.  No escapes, and
    /// no empty labels.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root());
        }
        let labels = s
            .strip_suffix('.')
            .unwrap_or(s)
            .split('.')
            .map(|chunk| Label::try_from(chunk.as_bytes()).ok())
            .collect::<Option<Vec<_>>>()?;
        Self::from_labels(labels)
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Octets taken when written out without compression.
    pub fn wire_len(&self) -> usize {
        self.labels
            .iter()
            .map(|label| usize::from(label.len()) + 1)
            .sum::<usize>()
            + 1
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in &self.labels {
            for octet in label.as_bytes() {
                write!(f, "{}", char::from(*octet))?;
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DomainName({self})")
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    // at most 8 labels of at most 20 octets, so always under 255
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let count = u.int_in_range::<usize>(0..=8)?;
        let labels = (0..count)
            .map(|_| u.arbitrary())
            .collect::<arbitrary::Result<Vec<Label>>>()?;
        Ok(Self { labels })
    }
}

/// One non-empty label of at most 63 octets.
#[derive(Debug, Clone)]
pub struct Label {
    octets: Bytes,
}

impl Label {
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u8 {
        // at most LABEL_MAX_LEN
        self.octets.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.octets
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.octets.eq_ignore_ascii_case(&other.octets)
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.octets.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
        state.write_u8(0xFF);
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = LabelError;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        match octets.len() {
            0 => Err(LabelError::Empty),
            n if n > LABEL_MAX_LEN => Err(LabelError::TooLong),
            _ => Ok(Self {
                octets: Bytes::copy_from_slice(octets),
            }),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Label {
    // printable ASCII without dots, so the name prints unambiguously
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let len = u.int_in_range(1..=20)?;
        let octets = u
            .bytes(len)?
            .iter()
            .map(|b| match b % 0x5F + 0x21 {
                b'.' => b'-',
                c => c,
            })
            .collect::<Vec<u8>>();
        Ok(Self {
            octets: Bytes::from(octets),
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LabelError {
    Empty,
    TooLong,
}


#[cfg(any(feature = "test-util", test))]
#[allow(clippy::missing_panics_doc)]
pub mod test_util {
    use super::*;

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    /// An `IN` question.
    pub fn question(name: &str, qtype: RecordType) -> Question {
        Question {
            name: domain(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    fn record(name: &str, data: RecordData) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rclass: RecordClass::IN,
            ttl: 300,
            data,
        }
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        record(name, RecordData::A(address))
    }

    pub fn mx_record(name: &str, preference: u16, exchange: &str) -> ResourceRecord {
        record(
            name,
            RecordData::MX {
                preference,
                exchange: domain(exchange),
            },
        )
    }

    pub fn opaque_record(name: &str, rtype: RecordType, octets: &[u8]) -> ResourceRecord {
        record(
            name,
            RecordData::Other {
                rtype,
                octets: Bytes::copy_from_slice(octets),
            },
        )
    }
}
