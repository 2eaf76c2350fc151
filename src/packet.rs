//! mDNS message codec.
//!
//! Only the subset of DNS needed by the responder is implemented: a fixed set of record types
//! (see [`RecordType`]), the Internet class, and the two mDNS-specific class bits (cache-flush
//! on resource records, unicast-response on questions).

#[macro_use]
mod macros;
pub mod decoder;
pub mod encoder;
mod error;
pub mod name;
pub mod records;

use core::{fmt, str::FromStr};

use bitflags::bitflags;

use crate::num::U16;

pub use error::Error;

wire_enum! {
    /// DNS message operation codes.
    pub enum Opcode: u8 {
        /// Query (or response to a query). The only opcode used by mDNS.
        QUERY = 0,
        IQUERY = 1,
        STATUS = 2,
        NOTIFY = 4,
        UPDATE = 5,
    }
}

wire_enum! {
    /// Server response codes.
    ///
    /// mDNS messages with a non-zero rcode must be silently ignored.
    pub enum RCode: u8 {
        NO_ERROR = 0,
        FORM_ERR = 1,
        SERV_FAIL = 2,
        NX_DOMAIN = 3,
        NOT_IMP = 4,
        REFUSED = 5,
    }
}

wire_enum! {
    /// Resource Record classes, with the mDNS top bit already masked off.
    pub enum Class: u16 {
        /// The Internet.
        IN = 1,
        /// Query is for all classes of resource.
        ANY = 255,
    }
}

/// Top bit of the class field.
///
/// In resource records this is the cache-flush bit, in questions it requests a unicast response.
pub(crate) const CLASS_MDNS_BIT: u16 = 0x8000;

/// The record types understood by the responder.
///
/// [`RecordType::ANY`] only ever appears in questions and subscriptions; a stored record never has
/// it as its own type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    WKS,
    PTR,
    HINFO,
    MX,
    TXT,
    AAAA,
    SRV,
    ANY,
}

impl RecordType {
    /// Maps a wire type code to a [`RecordType`], returning [`None`] for unsupported types.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            11 => Self::WKS,
            12 => Self::PTR,
            13 => Self::HINFO,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            33 => Self::SRV,
            255 => Self::ANY,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::WKS => 11,
            Self::PTR => 12,
            Self::HINFO => 13,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::SRV => 33,
            Self::ANY => 255,
        }
    }

    /// Returns whether a filter or question of type `self` covers records of type `ty`.
    #[inline]
    pub fn matches(self, ty: RecordType) -> bool {
        self == Self::ANY || self == ty
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::WKS => "WKS",
            Self::PTR => "PTR",
            Self::HINFO => "HINFO",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::ANY => "ANY",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    /// Parses a record type mnemonic like `AAAA` or `srv`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_RECORD_TYPES
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or(Error::InvalidValue)
    }
}

const ALL_RECORD_TYPES: [RecordType; 12] = [
    RecordType::A,
    RecordType::NS,
    RecordType::CNAME,
    RecordType::SOA,
    RecordType::WKS,
    RecordType::PTR,
    RecordType::HINFO,
    RecordType::MX,
    RecordType::TXT,
    RecordType::AAAA,
    RecordType::SRV,
    RecordType::ANY,
];

// Bit positions in the header flags are inverted, because RFC 1035 starts counting at the MSb.
const fn be_pos(pos: u16) -> u16 {
    15 - pos
}

bitflags! {
    #[derive(Debug)]
    #[repr(transparent)]
    struct HeaderFlags: u16 {
        /// If set, the message is a response to a query. If unset, it is a query.
        const QR = 1 << be_pos(0);
        const OPCODE = Self::OPCODE_MASK;
        /// Authoritative answer. mDNS responses always set this.
        const AA = 1 << be_pos(5);
        /// Truncated.
        const TC = 1 << be_pos(6);
        /// Recursion Desired. Must be zero in mDNS queries.
        const RD = 1 << be_pos(7);
        const RA = 1 << be_pos(8);
        const Z = 0b111 << be_pos(9);
        const RCODE = Self::RCODE_MASK;
    }
}

impl HeaderFlags {
    const OPCODE_POS: u16 = 11;
    const OPCODE_MASK: u16 = 0b1111 << Self::OPCODE_POS;

    const RCODE_POS: u16 = 0;
    const RCODE_MASK: u16 = 0b1111 << Self::RCODE_POS;

    fn opcode(&self) -> Opcode {
        Opcode(((self.bits() & Self::OPCODE_MASK) >> Self::OPCODE_POS) as u8)
    }

    fn rcode(&self) -> RCode {
        RCode(((self.bits() & Self::RCODE_MASK) >> Self::RCODE_POS) as u8)
    }
}

/// Message header.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C, packed)]
pub struct Header {
    id: U16,
    flags: U16,
    qdcount: U16,
    ancount: U16,
    nscount: U16,
    arcount: U16,
}

impl Header {
    fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags.get())
    }

    fn modify_flags(&mut self, with: impl FnOnce(&mut HeaderFlags)) {
        let mut flags = self.flags();
        with(&mut flags);
        self.flags = flags.bits().into();
    }

    /// Returns the 16-bit message ID. mDNS multicast messages use 0.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.id = id.into();
    }

    #[inline]
    pub fn is_query(&self) -> bool {
        !self.is_response()
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags().contains(HeaderFlags::QR)
    }

    pub fn set_response(&mut self, is_response: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::QR, is_response));
    }

    pub fn is_truncated(&self) -> bool {
        self.flags().contains(HeaderFlags::TC)
    }

    pub fn set_truncated(&mut self, trunc: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::TC, trunc));
    }

    pub fn is_recursion_desired(&self) -> bool {
        self.flags().contains(HeaderFlags::RD)
    }

    pub fn set_recursion_desired(&mut self, rd: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::RD, rd));
    }

    pub fn is_authority(&self) -> bool {
        self.flags().contains(HeaderFlags::AA)
    }

    pub fn set_authority(&mut self, aa: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::AA, aa));
    }

    pub fn opcode(&self) -> Opcode {
        self.flags().opcode()
    }

    pub fn rcode(&self) -> RCode {
        self.flags().rcode()
    }

    pub fn question_count(&self) -> u16 {
        self.qdcount.get()
    }

    pub fn answer_count(&self) -> u16 {
        self.ancount.get()
    }

    fn set_qdcount(&mut self, qdcount: u16) {
        self.qdcount = qdcount.into();
    }

    fn set_ancount(&mut self, ancount: u16) {
        self.ancount = ancount.into();
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("qdcount", &self.qdcount.get())
            .field("ancount", &self.ancount.get())
            .field("nscount", &self.nscount.get())
            .field("arcount", &self.arcount.get())
            .finish()
    }
}
