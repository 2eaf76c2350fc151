//! mDNS message encoder.

use super::{name::DomainName, records::Record, Class, Error, Header, RecordType, CLASS_MDNS_BIT};

/// Growable big-endian byte writer.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn pos(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.write_slice(&v.to_be_bytes());
    }

    /// Overwrites a previously written big-endian `u16` at `pos`.
    fn patch_u16(&mut self, pos: usize, v: u16) {
        self.buf[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_domain_name(&mut self, name: &DomainName) {
        for label in name.labels() {
            self.write_u8(label.as_bytes().len() as u8);
            self.write_slice(label.as_bytes());
        }
        // Implicit root label at the end.
        self.write_u8(0);
    }

    /// Writes a `<character-string>`, cutting it off at 255 bytes.
    pub(crate) fn write_character_string(&mut self, string: &[u8]) {
        let string = &string[..string.len().min(255)];
        self.write_u8(string.len() as u8);
        self.write_slice(string);
    }
}

struct OutgoingRecord {
    name: DomainName,
    ttl: u32,
    cache_flush: bool,
    data: Record,
}

/// Builder for outgoing mDNS messages.
///
/// Questions and answers are collected in order and serialized by [`MessageBuilder::encode`].
/// No name compression is performed.
pub struct MessageBuilder {
    header: Header,
    questions: Vec<(DomainName, RecordType)>,
    answers: Vec<OutgoingRecord>,
}

impl MessageBuilder {
    /// Creates an empty query (message ID 0, recursion-desired cleared).
    pub fn query() -> Self {
        Self {
            header: Header::default(),
            questions: Vec::new(),
            answers: Vec::new(),
        }
    }

    /// Creates an empty authoritative response.
    pub fn response() -> Self {
        let mut this = Self::query();
        this.header.set_response(true);
        this.header.set_authority(true);
        this
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn add_question(&mut self, name: DomainName, ty: RecordType) {
        self.questions.push((name, ty));
    }

    pub fn add_answer(&mut self, name: DomainName, ttl: u32, data: Record) {
        self.push_answer(name, ttl, data, false);
    }

    /// Adds an answer with the cache-flush bit set, marking it as the authoritative, complete set
    /// of records of that name and type.
    pub fn add_unique_answer(&mut self, name: DomainName, ttl: u32, data: Record) {
        self.push_answer(name, ttl, data, true);
    }

    fn push_answer(&mut self, name: DomainName, ttl: u32, data: Record, cache_flush: bool) {
        self.answers.push(OutgoingRecord {
            name,
            ttl,
            cache_flush,
            data,
        });
    }

    pub fn questions(&self) -> &[(DomainName, RecordType)] {
        &self.questions
    }

    pub fn answer_count(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.answers.is_empty()
    }

    /// Serializes the message.
    ///
    /// Fails with [`Error::Truncated`] if there are more than 65535 entries in a section or a
    /// record's RDATA exceeds 65535 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut header = self.header;
        header.set_qdcount(self.questions.len().try_into().map_err(|_| Error::Truncated)?);
        header.set_ancount(self.answers.len().try_into().map_err(|_| Error::Truncated)?);

        let mut w = Writer::new();
        w.write_slice(bytemuck::bytes_of(&header));

        for (name, ty) in &self.questions {
            w.write_domain_name(name);
            w.write_u16(ty.to_u16());
            w.write_u16(Class::IN.to_raw());
        }

        for rr in &self.answers {
            w.write_domain_name(&rr.name);
            w.write_u16(rr.data.record_type().to_u16());
            let class = if rr.cache_flush {
                Class::IN.to_raw() | CLASS_MDNS_BIT
            } else {
                Class::IN.to_raw()
            };
            w.write_u16(class);
            w.write_u32(rr.ttl);
            // a little seek dance: reserve RDLENGTH, fill it in after the RDATA
            let lenpos = w.pos();
            w.write_u16(0);
            let before_rdata = w.pos();
            rr.data.encode(&mut w);
            let rdata_len = w.pos() - before_rdata;
            w.patch_u16(lenpos, rdata_len.try_into().map_err(|_| Error::Truncated)?);
        }

        Ok(w.into_bytes())
    }
}
