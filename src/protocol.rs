//! Application protocols a connection can speak, identified by their ALPN
//! names.

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// An application-layer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Protocol {
    /// `http/1.0`.  Only ever reported for responses; never configurable.
    Http10,
    /// `http/1.1`.
    Http11,
    /// `h2` negotiated over TLS.
    Http2,
    /// `h2_prior_knowledge`: cleartext HTTP/2 without upgrade.
    H2PriorKnowledge,
    /// `quic`.
    Quic,
}

impl Protocol {
    /// The identifier used in ALPN and in builder configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http10 => "http/1.0",
            Protocol::Http11 => "http/1.1",
            Protocol::Http2 => "h2",
            Protocol::H2PriorKnowledge => "h2_prior_knowledge",
            Protocol::Quic => "quic",
        }
    }

    /// Look up a protocol by its identifier.
    pub fn get(name: &str) -> Result<Protocol, Error> {
        match name {
            "http/1.0" => Ok(Protocol::Http10),
            "http/1.1" => Ok(Protocol::Http11),
            "h2" => Ok(Protocol::Http2),
            "h2_prior_knowledge" => Ok(Protocol::H2PriorKnowledge),
            "quic" => Ok(Protocol::Quic),
            other => Err(Error::builder(format!("unexpected protocol: {other}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::get(s)
    }
}

/// Check a client protocol list.
///
/// It must name `http/1.1` or consist of `h2_prior_knowledge` alone, and it
/// may never include `http/1.0`.  Duplicates are removed, order kept.
pub(crate) fn validate(protocols: &[Protocol]) -> Result<Vec<Protocol>, Error> {
    let mut out: Vec<Protocol> = Vec::with_capacity(protocols.len());
    for p in protocols {
        if !out.contains(p) {
            out.push(*p);
        }
    }
    if out.contains(&Protocol::H2PriorKnowledge) && out.len() > 1 {
        return Err(Error::builder(format!(
            "protocols containing h2_prior_knowledge cannot use other protocols: {}",
            join(&out)
        )));
    }
    if !out.contains(&Protocol::H2PriorKnowledge) && !out.contains(&Protocol::Http11) {
        return Err(Error::builder(format!(
            "protocols must contain h2_prior_knowledge or http/1.1: {}",
            join(&out)
        )));
    }
    if out.contains(&Protocol::Http10) {
        return Err(Error::builder(format!(
            "protocols must not contain http/1.0: {}",
            join(&out)
        )));
    }
    Ok(out)
}

fn join(protocols: &[Protocol]) -> String {
    let names: Vec<&str> = protocols.iter().map(Protocol::as_str).collect();
    format!("[{}]", names.join(", "))
}
