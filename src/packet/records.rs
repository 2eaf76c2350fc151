//! Resource record data.
//!
//! [`Record`] is a closed enum over every record type the responder stores. Records of any other
//! type are skipped by the decoder.

use std::{
    fmt::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr},
};

use super::{decoder::Reader, encoder::Writer, name::DomainName, Error, RecordType};

/// Decoded record data.
///
/// Equality compares the data only; the owner name, TTL and cache-flush bit live on the
/// surrounding resource record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Record {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    PTR(DomainName),
    CNAME(DomainName),
    NS(DomainName),
    SRV(SRV),
    TXT(TXT),
    MX { preference: u16, exchange: DomainName },
    HINFO { cpu: Vec<u8>, os: Vec<u8> },
    SOA(SOA),
    WKS { addr: Ipv4Addr, protocol: u8, bitmap: Vec<u8> },
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::A(_) => RecordType::A,
            Record::AAAA(_) => RecordType::AAAA,
            Record::PTR(_) => RecordType::PTR,
            Record::CNAME(_) => RecordType::CNAME,
            Record::NS(_) => RecordType::NS,
            Record::SRV(_) => RecordType::SRV,
            Record::TXT(_) => RecordType::TXT,
            Record::MX { .. } => RecordType::MX,
            Record::HINFO { .. } => RecordType::HINFO,
            Record::SOA(_) => RecordType::SOA,
            Record::WKS { .. } => RecordType::WKS,
        }
    }

    /// Decodes the RDATA of a record of type `ty`.
    ///
    /// `rdata` must be bounded to the record's RDLENGTH but still able to follow name compression
    /// pointers into the rest of the message.
    pub(crate) fn decode(ty: RecordType, rdata: &mut Reader<'_>) -> Result<Self, Error> {
        let r = rdata;
        Ok(match ty {
            RecordType::A => Record::A(Ipv4Addr::from(*r.read_array::<4>()?)),
            RecordType::AAAA => Record::AAAA(Ipv6Addr::from(*r.read_array::<16>()?)),
            RecordType::PTR => Record::PTR(r.read_domain_name()?),
            RecordType::CNAME => Record::CNAME(r.read_domain_name()?),
            RecordType::NS => Record::NS(r.read_domain_name()?),
            RecordType::SRV => Record::SRV(SRV {
                priority: r.read_u16()?,
                weight: r.read_u16()?,
                port: r.read_u16()?,
                target: r.read_domain_name()?,
            }),
            RecordType::TXT => {
                let mut entries = Vec::new();
                // Technically at least one is required, but we accept 0 too.
                while !r.buf().is_empty() {
                    entries.push(r.read_character_string()?.to_vec());
                }
                Record::TXT(TXT { entries })
            }
            RecordType::MX => Record::MX {
                preference: r.read_u16()?,
                exchange: r.read_domain_name()?,
            },
            RecordType::HINFO => Record::HINFO {
                cpu: r.read_character_string()?.to_vec(),
                os: r.read_character_string()?.to_vec(),
            },
            RecordType::SOA => Record::SOA(SOA {
                mname: r.read_domain_name()?,
                rname: r.read_domain_name()?,
                serial: r.read_u32()?,
                refresh: r.read_u32()?,
                retry: r.read_u32()?,
                expire: r.read_u32()?,
                minimum_ttl: r.read_u32()?,
            }),
            RecordType::WKS => Record::WKS {
                addr: Ipv4Addr::from(*r.read_array::<4>()?),
                protocol: r.read_u8()?,
                bitmap: r.buf().to_vec(),
            },
            // A record never carries the ANY type.
            RecordType::ANY => return Err(Error::InvalidValue),
        })
    }

    pub(crate) fn encode(&self, w: &mut Writer) {
        match self {
            Record::A(addr) => w.write_slice(&addr.octets()),
            Record::AAAA(addr) => w.write_slice(&addr.octets()),
            Record::PTR(name) | Record::CNAME(name) | Record::NS(name) => {
                w.write_domain_name(name)
            }
            Record::SRV(srv) => {
                w.write_u16(srv.priority);
                w.write_u16(srv.weight);
                w.write_u16(srv.port);
                w.write_domain_name(&srv.target);
            }
            Record::TXT(txt) => {
                if txt.entries.is_empty() {
                    // RFC 6763: an empty TXT record is a single empty string.
                    w.write_character_string(&[]);
                }
                for entry in &txt.entries {
                    w.write_character_string(entry);
                }
            }
            Record::MX {
                preference,
                exchange,
            } => {
                w.write_u16(*preference);
                w.write_domain_name(exchange);
            }
            Record::HINFO { cpu, os } => {
                w.write_character_string(cpu);
                w.write_character_string(os);
            }
            Record::SOA(soa) => {
                w.write_domain_name(&soa.mname);
                w.write_domain_name(&soa.rname);
                w.write_u32(soa.serial);
                w.write_u32(soa.refresh);
                w.write_u32(soa.retry);
                w.write_u32(soa.expire);
                w.write_u32(soa.minimum_ttl);
            }
            Record::WKS {
                addr,
                protocol,
                bitmap,
            } => {
                w.write_slice(&addr.octets());
                w.write_u8(*protocol);
                w.write_slice(bitmap);
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::A(addr) => addr.fmt(f),
            Record::AAAA(addr) => addr.fmt(f),
            Record::PTR(name) | Record::CNAME(name) | Record::NS(name) => name.fmt(f),
            Record::SRV(srv) => write!(f, "{}:{}", srv.target, srv.port),
            Record::TXT(txt) => txt.fmt(f),
            Record::MX {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            Record::HINFO { cpu, os } => {
                write!(f, "os={}, cpu={}", os.escape_ascii(), cpu.escape_ascii())
            }
            Record::SOA(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname,
                soa.rname,
                soa.serial,
                soa.refresh,
                soa.retry,
                soa.expire,
                soa.minimum_ttl
            ),
            Record::WKS { addr, protocol, .. } => write!(f, "{} proto={}", addr, protocol),
        }
    }
}

/// Service locator record data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: DomainName,
}

/// Text record data: a list of `<character-string>`s, conventionally `key=value` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TXT {
    entries: Vec<Vec<u8>>,
}

impl TXT {
    pub fn new<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a TXT record from `key=value` pairs.
    ///
    /// Entries longer than 255 bytes cannot be encoded and are dropped with a warning.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = pairs
            .into_iter()
            .filter_map(|(k, v)| {
                let entry = format!("{k}={v}").into_bytes();
                if entry.len() > 255 {
                    log::warn!("TXT entry for key '{}' exceeds 255 bytes, dropping it", k);
                    None
                } else {
                    Some(entry)
                }
            })
            .collect();
        Self { entries }
    }

    /// Returns an iterator over all *character string* values in this record.
    pub fn entries(&self) -> impl Iterator<Item = &'_ [u8]> {
        self.entries.iter().map(|e| &**e)
    }
}

impl fmt::Display for TXT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.first() {
            Some(first) => {
                f.write_char('"')?;
                first.escape_ascii().fmt(f)?;
                f.write_char('"')?;
                if self.entries.len() > 1 {
                    f.write_str(", ...")?;
                }
                Ok(())
            }
            None => f.write_str("\"\""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SOA {
    pub mname: DomainName,
    pub rname: DomainName,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum_ttl: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    fn reencode(rec: &Record) -> Record {
        let mut w = Writer::new();
        rec.encode(&mut w);
        let bytes = w.into_bytes();
        Record::decode(rec.record_type(), &mut Reader::new(&bytes)).unwrap()
    }

    #[test]
    fn variable_length_records() {
        let records = [
            Record::SRV(SRV {
                priority: 1,
                weight: 2,
                port: 0xdead,
                target: domain("ensemble.local"),
            }),
            Record::TXT(TXT::new([&b"a=1"[..], &[], &b"flag"[..]])),
            Record::HINFO {
                cpu: b"ARM".to_vec(),
                os: b"Linux".to_vec(),
            },
            Record::WKS {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                protocol: 6,
                bitmap: vec![0, 0b0100_0000],
            },
        ];
        for rec in &records {
            assert_eq!(&reencode(rec), rec);
        }
    }

    #[test]
    fn empty_txt_is_one_empty_string() {
        let mut w = Writer::new();
        Record::TXT(TXT::new(Vec::<Vec<u8>>::new())).encode(&mut w);
        assert_eq!(w.into_bytes(), [0]);
    }

    #[test]
    fn txt_from_pairs() {
        let txt = TXT::from_pairs([("path", "/"), ("u", "guest")]);
        let entries: Vec<_> = txt.entries().collect();
        assert_eq!(entries, [&b"path=/"[..], &b"u=guest"[..]]);
        assert_eq!(txt.to_string(), r#""path=/", ..."#);
    }

    #[test]
    fn any_is_not_a_record_type() {
        assert_eq!(
            Record::decode(RecordType::ANY, &mut Reader::new(&[])),
            Err(Error::InvalidValue)
        );
    }
}
