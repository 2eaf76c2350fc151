//! mDNS message decoder.

use std::{cmp, fmt, mem::size_of};

use bytemuck::AnyBitPattern;

use crate::num::{U16, U32};

use super::{
    name::{DomainName, Label},
    records::Record,
    Class, Error, Header, RecordType, CLASS_MDNS_BIT,
};

#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    /// The buffer containing the whole DNS message.
    full_buf: &'a [u8],
    /// The current reader position in the buffer.
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            full_buf: buf,
            pos: 0,
        }
    }

    pub(crate) fn buf(&self) -> &'a [u8] {
        &self.full_buf[self.pos..]
    }

    fn read_obj<T: AnyBitPattern>(&mut self) -> Result<T, Error> {
        let bytes = self.buf().get(..size_of::<T>()).ok_or(Error::Eof)?;
        self.pos += size_of::<T>();
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn peek_u8(&self) -> Result<u8, Error> {
        self.full_buf.get(self.pos).copied().ok_or(Error::Eof)
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        match self.full_buf.get(self.pos..self.pos + len) {
            Some(slice) => {
                self.pos += len;
                Ok(slice)
            }
            None => Err(Error::Eof),
        }
    }

    pub(crate) fn read_array<const LEN: usize>(&mut self) -> Result<&'a [u8; LEN], Error> {
        let slice = self.read_slice(LEN)?;
        slice.try_into().map_err(|_| Error::Eof)
    }

    /// Splits off another `Reader` at the current position, with a backing store truncated to
    /// `self.pos + len`, and advances `self` past those `len` bytes.
    ///
    /// The split-off reader can still follow compression pointers to earlier parts of the message.
    fn split_off(&mut self, len: usize) -> Result<Reader<'a>, Error> {
        if self.buf().len() >= len {
            let mut copy = self.clone();
            copy.full_buf = &copy.full_buf[..self.pos + len];
            self.pos += len;
            Ok(copy)
        } else {
            Err(Error::Eof)
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, Error> {
        self.read_obj::<u8>()
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(self.read_obj::<U16>()?.get())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(self.read_obj::<U32>()?.get())
    }

    /// Reads a `<character-string>` value.
    pub(crate) fn read_character_string(&mut self) -> Result<&'a [u8], Error> {
        let length = self.read_u8()?;
        self.read_slice(length.into())
    }

    /// Reads a `<domain-name>` value, following compression pointers.
    pub(crate) fn read_domain_name(&mut self) -> Result<DomainName, Error> {
        let mut domain_name = DomainName::ROOT;
        let mut min_pos = self.pos;
        let mut copy = self.clone();
        loop {
            let length = copy.peek_u8()?;
            match length & 0b1100_0000 {
                0b1100_0000 => {
                    // 16-bit pointer to somewhere else in the UDP message.
                    let ptr = usize::from(copy.read_u16()? & 0b0011_1111_1111_1111);
                    if ptr >= min_pos {
                        // Pointers must point strictly backwards, which rules out loops.
                        return Err(Error::PointerLoop);
                    }
                    self.pos = cmp::max(self.pos, copy.pos);
                    min_pos = ptr;
                    copy.pos = ptr;
                }
                0b0000_0000 => {
                    copy.pos += 1;

                    // Length byte followed by a label of that many bytes.
                    let length = usize::from(length);
                    if length == 0 {
                        break;
                    }
                    let label = copy.read_slice(length)?;
                    domain_name.push_label(Label::try_new(label)?);
                }
                _ => return Err(Error::InvalidValue), // anything but 00 and 11 in MSb is reserved
            }
        }

        self.pos = cmp::max(self.pos, copy.pos);
        Ok(domain_name)
    }

    /// Reads a question. Returns `Ok(None)` for questions about unsupported record types.
    fn read_question(&mut self) -> Result<Option<Question>, Error> {
        let name = self.read_domain_name()?;
        let qtype = self.read_u16()?;
        let raw_class = self.read_u16()?;
        Ok(RecordType::from_u16(qtype).map(|ty| Question {
            name,
            ty,
            class: Class(raw_class & !CLASS_MDNS_BIT),
            unicast_response: raw_class & CLASS_MDNS_BIT != 0,
        }))
    }

    /// Reads a resource record. Returns `Ok(None)` for unsupported record types, and for records
    /// whose RDATA is malformed (the record is skipped, the rest of the message is still usable).
    fn read_resource_record(&mut self) -> Result<Option<ResourceRecord>, Error> {
        let name = self.read_domain_name()?;
        let type_ = self.read_u16()?;
        let raw_class = self.read_u16()?;
        let ttl = self.read_u32()?;
        let rdlength = self.read_u16()?;
        let mut rdata = self.split_off(usize::from(rdlength))?;

        let ty = match RecordType::from_u16(type_) {
            Some(RecordType::ANY) | None => return Ok(None),
            Some(ty) => ty,
        };
        match Record::decode(ty, &mut rdata) {
            Ok(data) => Ok(Some(ResourceRecord {
                name,
                class: Class(raw_class & !CLASS_MDNS_BIT),
                cache_flush: raw_class & CLASS_MDNS_BIT != 0,
                ttl,
                data,
            })),
            Err(e) => {
                log::debug!("skipping malformed {} record for {}: {}", ty, name, e);
                Ok(None)
            }
        }
    }
}

/// A fully decoded mDNS message.
///
/// Only the *Question* and *Answer* sections are retained; authority and additional records are
/// not used by the responder.
#[derive(Debug)]
pub struct Message {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
}

impl Message {
    /// Decodes a datagram.
    ///
    /// Fails if the header, any question, or any resource record header is malformed. Questions
    /// and records of unsupported types are skipped.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(buf);
        let header = r.read_obj::<Header>()?;

        let mut questions = Vec::new();
        for _ in 0..header.question_count() {
            if let Some(q) = r.read_question()? {
                questions.push(q);
            }
        }

        let mut answers = Vec::new();
        for _ in 0..header.answer_count() {
            if let Some(rr) = r.read_resource_record()? {
                answers.push(rr);
            }
        }

        Ok(Self {
            header,
            questions,
            answers,
        })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn is_query(&self) -> bool {
        self.header.is_query()
    }

    #[inline]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[inline]
    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    pub fn into_answers(self) -> Vec<ResourceRecord> {
        self.answers
    }
}

/// A question from the *Question* section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    name: DomainName,
    ty: RecordType,
    class: Class,
    unicast_response: bool,
}

impl Question {
    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.ty
    }

    #[inline]
    pub fn class(&self) -> Class {
        self.class
    }

    /// Returns whether the querier asked for a unicast response (the mDNS "QU" bit).
    #[inline]
    pub fn unicast_response(&self) -> bool {
        self.unicast_response
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.ty)?;
        if self.unicast_response {
            f.write_str(" (QU)")?;
        }
        Ok(())
    }
}

/// A resource record from the *Answer* section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    name: DomainName,
    class: Class,
    cache_flush: bool,
    ttl: u32,
    data: Record,
}

impl ResourceRecord {
    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn class(&self) -> Class {
        self.class
    }

    /// Returns whether the record's mDNS cache-flush bit is set.
    #[inline]
    pub fn cache_flush(&self) -> bool {
        self.cache_flush
    }

    /// Returns the entry's Time To Live, in seconds.
    #[inline]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    #[inline]
    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn into_parts(self) -> (DomainName, u32, Record, bool) {
        (self.name, self.ttl, self.data, self.cache_flush)
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name,
            self.ttl,
            self.class,
            self.data.record_type(),
            self.data
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_domain_name() {
        let mut r = Reader::new(&[
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 5, b'l', b'o', b'c', b'a', b'l', 0,
        ]);
        let name = r.read_domain_name().unwrap();
        assert_eq!(name.to_string(), "example.local.");

        let mut r = Reader::new(&[0]);
        let name = r.read_domain_name().unwrap();
        assert_eq!(name.to_string(), ".");
    }

    #[test]
    fn decode_domain_name_pointer() {
        let mut r = Reader::new(&[
            b'_', // never read
            3,
            b'c',
            b'o',
            b'm',
            0, // "com."
            7,
            b'e',
            b'x',
            b'a',
            b'm',
            b'p',
            b'l',
            b'e',
            // ptr to 1:
            0b1100_0000,
            1,
        ]);
        r.pos = 1;
        let name = r.read_domain_name().unwrap();
        assert_eq!(name.to_string(), "com.");
        let name = r.read_domain_name().unwrap();
        assert_eq!(name.to_string(), "example.com.");
        assert_eq!(r.read_u8(), Err(Error::Eof), "should be at EOF");
    }

    #[test]
    fn decode_domain_name_loops() {
        let mut r = Reader::new(&[0b1100_0000, 0]);
        assert_eq!(r.read_domain_name(), Err(Error::PointerLoop));

        let mut r = Reader::new(&[1, b'a', 0b1100_0000, 0]);
        r.pos = 2;
        assert_eq!(r.read_domain_name(), Err(Error::PointerLoop));
    }

    #[test]
    fn decode_truncated_header() {
        assert_eq!(Message::decode(&[0, 0, 0]).unwrap_err(), Error::Eof);
    }

    #[test]
    fn decode_qu_question_and_unknown_type() {
        #[rustfmt::skip]
        let msg = [
            0, 0, 0, 0, // id, flags
            0, 2, 0, 0, 0, 0, 0, 0, // 2 questions
            3, b'f', b'o', b'o', 0, 0, 1, 0x80, 1, // foo./A, QU
            3, b'f', b'o', b'o', 0, 0, 47, 0, 1, // foo./NSEC (unsupported)
        ];
        let msg = Message::decode(&msg).unwrap();
        assert!(msg.is_query());
        assert_eq!(msg.questions().len(), 1);
        let q = &msg.questions()[0];
        assert_eq!(q.record_type(), RecordType::A);
        assert_eq!(q.class(), Class::IN);
        assert!(q.unicast_response());
    }

    #[test]
    fn malformed_rdata_skips_only_that_record() {
        #[rustfmt::skip]
        let msg = [
            0, 0, 0x84, 0, // response, AA
            0, 0, 0, 2, 0, 0, 0, 0, // 2 answers
            // foo./A with a 3-byte address
            3, b'f', b'o', b'o', 0, 0, 1, 0x80, 1, 0, 0, 0, 120, 0, 3, 10, 0, 0,
            // foo./A 10.0.0.1
            3, b'f', b'o', b'o', 0, 0, 1, 0, 1, 0, 0, 0, 120, 0, 4, 10, 0, 0, 1,
        ];
        let msg = Message::decode(&msg).unwrap();
        assert!(!msg.is_query());
        assert_eq!(msg.answers().len(), 1);
        let rr = &msg.answers()[0];
        assert!(!rr.cache_flush());
        assert_eq!(rr.ttl(), 120);
        assert_eq!(rr.data(), &Record::A([10, 0, 0, 1].into()));
    }
}
