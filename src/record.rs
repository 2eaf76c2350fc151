//! Cached answers and tracked questions, and their refresh schedules.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::packet::{decoder::ResourceRecord, name::DomainName, records::Record, RecordType};

/// Percentages of the TTL at which a cached answer is re-queried (RFC 6762, section 5.2).
const ANSWER_REFRESH_PERCENT: [u64; 4] = [80, 85, 90, 95];

/// Delays, in seconds, between re-asking a question.
///
/// Normally we see our own question looped back right away, which counts as the first retry. If
/// we don't see it, it is asked again a second later.
const QUESTION_RETRY_SECS: [u64; 4] = [1, 1, 2, 4];

/// A resource record received from the network, as held by the cache.
#[derive(Clone)]
pub struct Answer {
    name: DomainName,
    ttl: u32,
    data: Record,
    cache_flush: bool,
    toa: Instant,
    retries: usize,
}

impl Answer {
    /// Creates an answer that arrived at `toa`.
    ///
    /// `cache_flush` is the mDNS cache-flush bit the record data was transmitted with.
    pub fn new(name: DomainName, ttl: u32, data: Record, cache_flush: bool, toa: Instant) -> Self {
        Self {
            name,
            ttl,
            data,
            cache_flush,
            toa,
            retries: 0,
        }
    }

    pub(crate) fn from_resource_record(rr: ResourceRecord, toa: Instant) -> Self {
        let (name, ttl, data, cache_flush) = rr.into_parts();
        Self::new(name, ttl, data, cache_flush, toa)
    }

    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    #[inline]
    pub fn data(&self) -> &Record {
        &self.data
    }

    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Returns the time this answer arrived.
    #[inline]
    pub fn time_of_arrival(&self) -> Instant {
        self.toa
    }

    /// Returns the number of refresh queries already sent for this answer.
    #[inline]
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Returns whether this answer was sent with the cache-flush bit, replacing older records
    /// with the same name and type.
    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.cache_flush
    }

    /// Returns whether this is a goodbye record (TTL of 0).
    #[inline]
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }

    /// Returns the time after which this answer is no longer valid.
    ///
    /// Goodbye records are kept for one second.
    pub fn expiry(&self) -> Instant {
        let ttl = if self.ttl == 0 { 1 } else { self.ttl };
        self.toa + Duration::from_secs(ttl.into())
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expiry()
    }

    /// Returns the time at which the next refresh query for this answer is due, or [`None`] if
    /// all refresh attempts have been used up and the answer is left to expire.
    pub fn refresh(&self) -> Option<Instant> {
        let percent = ANSWER_REFRESH_PERCENT.get(self.retries)?;
        // ttl * percent / 100 seconds, at millisecond resolution
        let millis = u64::from(self.ttl) * percent * 10;
        Some(self.toa + Duration::from_millis(millis))
    }

    pub(crate) fn mark_refreshed(&mut self) {
        self.retries += 1;
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.ttl)?;
        if self.is_absolute() {
            f.write_str(" !")?;
        }
        if self.is_goodbye() {
            f.write_str(" -")?;
        }
        write!(f, " {} {}", self.record_type(), self.data)
    }
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Answer")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("data", &self.data)
            .field("cache_flush", &self.cache_flush)
            .field("retries", &self.retries)
            .finish()
    }
}

/// A question that is in flight on the network, whether we asked it or another host did.
#[derive(Clone)]
pub struct Question {
    name: DomainName,
    ty: RecordType,
    retries: usize,
    last_asked: Instant,
}

impl Question {
    pub fn new(name: DomainName, ty: RecordType, now: Instant) -> Self {
        Self {
            name,
            ty,
            retries: 0,
            last_asked: now,
        }
    }

    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.ty
    }

    #[inline]
    pub fn retries(&self) -> usize {
        self.retries
    }

    #[inline]
    pub fn last_asked(&self) -> Instant {
        self.last_asked
    }

    /// Records that the question was seen on the network again.
    pub fn update(&mut self, now: Instant) {
        self.retries += 1;
        self.last_asked = now;
    }

    /// Returns when the question should be asked again, or [`None`] once it has been asked often
    /// enough.
    pub fn refresh(&self) -> Option<Instant> {
        let secs = QUESTION_RETRY_SECS.get(self.retries)?;
        Some(self.last_asked + Duration::from_secs(*secs))
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.name, self.ty, self.retries)
    }
}

impl fmt::Debug for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
