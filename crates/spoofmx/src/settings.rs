use std::fmt;
use std::net::Ipv4Addr;

use dns_types::protocol::types::{DomainName, LABEL_MAX_LEN};

pub const DEFAULT_FORGED_DOMAIN: &str = "example.com";
pub const DEFAULT_ATTACKER_MX: &str = "att.example.com";
pub const DEFAULT_ATTACKER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 66);
pub const DEFAULT_PORT: u16 = 53;
pub const DEFAULT_TTL: u32 = 300;
pub const DEFAULT_PREFERENCE: u16 = 10;

/// What the responder lies about, and where it listens.  Built once at
/// startup and only ever borrowed afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Address to bind the UDP socket to.
    pub listen_address: Ipv4Addr,

    /// Port to bind the UDP socket to.
    pub listen_port: u16,

    /// `MX` queries for this name get a forged answer.
    pub forged_domain: DomainName,

    /// The mail exchange named in the forged `MX` record.
    pub attacker_mx: DomainName,

    /// Where `attacker_mx` resolves to.
    pub attacker_ip: Ipv4Addr,

    /// TTL of every forged record.
    pub ttl: u32,

    /// Preference of the forged `MX` record.
    pub preference: u16,
}

impl Default for Settings {
    #[allow(clippy::missing_panics_doc)]
    fn default() -> Self {
        Self {
            listen_address: Ipv4Addr::UNSPECIFIED,
            listen_port: DEFAULT_PORT,
            // the defaults are valid hostnames
            forged_domain: parse_hostname(DEFAULT_FORGED_DOMAIN).unwrap(),
            attacker_mx: parse_hostname(DEFAULT_ATTACKER_MX).unwrap(),
            attacker_ip: DEFAULT_ATTACKER_IP,
            ttl: DEFAULT_TTL,
            preference: DEFAULT_PREFERENCE,
        }
    }
}

/// Parse a hostname given on the command line.  Stricter than
/// `DomainName::from_dotted_string`: labels must be letters, digits,
/// hyphens or underscores, and may not start or end with a hyphen.
///
/// # Errors
///
/// If the string is not a valid hostname.
pub fn parse_hostname(s: &str) -> Result<DomainName, HostnameError> {
    let trimmed = s.strip_suffix('.').unwrap_or(s);
    if trimmed.is_empty() {
        return Err(HostnameError::Empty);
    }

    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(HostnameError::EmptyLabel);
        }
        if label.len() > LABEL_MAX_LEN {
            return Err(HostnameError::LabelTooLong(label.to_string()));
        }
        if let Some(bad) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(HostnameError::BadCharacter(bad));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(HostnameError::BadHyphen(label.to_string()));
        }
    }

    DomainName::from_dotted_string(trimmed).ok_or(HostnameError::TooLong)
}

/// Reasons a hostname can be rejected at startup.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum HostnameError {
    Empty,
    EmptyLabel,
    LabelTooLong(String),
    BadCharacter(char),
    BadHyphen(String),
    TooLong,
}

impl fmt::Display for HostnameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostnameError::Empty => write!(f, "hostname is empty"),
            HostnameError::EmptyLabel => write!(f, "hostname has an empty label"),
            HostnameError::LabelTooLong(label) => {
                write!(f, "label '{label}' is longer than {LABEL_MAX_LEN} octets")
            }
            HostnameError::BadCharacter(c) => {
                write!(f, "'{c}' is not allowed in a hostname")
            }
            HostnameError::BadHyphen(label) => {
                write!(f, "label '{label}' starts or ends with a hyphen")
            }
            HostnameError::TooLong => write!(f, "hostname is longer than 255 octets"),
        }
    }
}

impl std::error::Error for HostnameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
