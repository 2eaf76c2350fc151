//! The record cache: questions in flight and answers received.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    time::{Duration, Instant},
};

use crate::{
    packet::{
        name::{DomainName, NameFilter},
        RecordType,
    },
    record::{Answer, Question},
};

/// Answers older than this are replaced by a cache-flush answer with different data.
const CACHE_FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Two-level cache of questions and answers, keyed by name and then by record type.
///
/// At most one [`Question`] is tracked per name and type, no matter whether it was asked locally
/// or observed on the network. Several [`Answer`]s may be stored per name and type, distinguished
/// by their record data.
#[derive(Clone, Default)]
pub struct Cache {
    asked: BTreeMap<DomainName, BTreeMap<RecordType, Question>>,
    cached: BTreeMap<DomainName, BTreeMap<RecordType, Vec<Answer>>>,
}

/// Result of a [`Cache::sweep`].
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// Questions to multicast now, without duplicates.
    pub(crate) questions: Vec<(DomainName, RecordType)>,
    /// The earliest time at which another refresh is due.
    pub(crate) next_wake: Option<Instant>,
}

impl Sweep {
    fn consider(&mut self, at: Instant) {
        self.next_wake = Some(match self.next_wake {
            Some(t) => t.min(at),
            None => at,
        });
    }

    fn ask(&mut self, name: &DomainName, ty: RecordType) {
        if !self.questions.iter().any(|(n, t)| n == name && *t == ty) {
            self.questions.push((name.clone(), ty));
        }
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `q`, unless a question for the same name and type is already in flight.
    ///
    /// Returns the tracked question if it was inserted, [`None`] if it was a duplicate.
    pub fn add_question(&mut self, q: Question) -> Option<&Question> {
        let by_type = self.asked.entry(q.name().clone()).or_default();
        match by_type.entry(q.record_type()) {
            Entry::Vacant(e) => Some(&*e.insert(q)),
            Entry::Occupied(_) => None,
        }
    }

    /// Notes that a question for `name`/`ty` was seen on the network.
    ///
    /// If that question is tracked, it is counted as asked once more.
    pub fn observe_question(
        &mut self,
        name: &DomainName,
        ty: RecordType,
        now: Instant,
    ) -> Option<&Question> {
        let q = self.asked.get_mut(name)?.get_mut(&ty)?;
        q.update(now);
        Some(&*q)
    }

    /// Merges a freshly received answer into the cache.
    ///
    /// Returns the answer if subscribers should be told about it (it is new, or it is a goodbye
    /// for a known record), [`None`] otherwise.
    pub fn merge_answer(&mut self, an: Answer, now: Instant) -> Option<Answer> {
        let answers = self
            .cached
            .entry(an.name().clone())
            .or_default()
            .entry(an.record_type())
            .or_default();

        if an.is_absolute() {
            // Replace records older than ~1s, but leave records with the same data alone, so
            // they don't look new.
            if let Some(cutoff) = now.checked_sub(CACHE_FLUSH_GRACE) {
                answers.retain(|old| {
                    let flush = old.time_of_arrival() < cutoff && old.data() != an.data();
                    if flush {
                        log::debug!("-- a {} (cache flush)", old);
                    }
                    !flush
                });
            }
        }

        let existing = answers
            .iter()
            .position(|old| old.name() == an.name() && old.data() == an.data());

        match existing {
            None => {
                answers.push(an.clone());
                Some(an)
            }
            Some(i) if an.is_goodbye() => {
                answers[i] = an.clone();
                Some(an)
            }
            Some(i) if an.expiry() > answers[i].expiry() => {
                // Fresher copy of a record we already know about. Keep it, but the data is
                // unchanged so it isn't reported.
                answers[i] = an;
                None
            }
            Some(_) => None,
        }
    }

    /// Returns every cached answer matching `name` and `ty`.
    pub fn answers_for(&self, name: &NameFilter, ty: RecordType) -> Vec<Answer> {
        match name {
            NameFilter::Any => self
                .cached
                .keys()
                .flat_map(|n| self.answers_for_name(n, ty))
                .collect(),
            NameFilter::Exact(n) => self.answers_for_name(n, ty),
        }
    }

    fn answers_for_name(&self, name: &DomainName, ty: RecordType) -> Vec<Answer> {
        let Some(by_type) = self.cached.get(name) else {
            return Vec::new();
        };
        if ty == RecordType::ANY {
            by_type.values().flatten().cloned().collect()
        } else {
            by_type.get(&ty).cloned().unwrap_or_default()
        }
    }

    /// Returns whether a question covering `name` and `ty` is in flight.
    pub fn is_asked(&self, name: &NameFilter, ty: RecordType) -> bool {
        match name {
            NameFilter::Any => true,
            NameFilter::Exact(n) => self.asked.get(n).map_or(false, |by_type| {
                by_type.contains_key(&ty) || by_type.contains_key(&RecordType::ANY)
            }),
        }
    }

    /// Expires stale answers, retires finished questions, and collects the questions that need to
    /// be (re-)asked at `now`.
    ///
    /// `wanted` tells whether any live subscription is interested in a name and type; records
    /// nobody wants are not refreshed, and questions nobody wants are dropped.
    pub(crate) fn sweep(
        &mut self,
        now: Instant,
        wanted: impl Fn(&DomainName, RecordType) -> bool,
    ) -> Sweep {
        let mut sweep = Sweep::default();

        for (name, by_type) in &mut self.cached {
            for (ty, answers) in by_type.iter_mut() {
                answers.retain(|an| {
                    let expired = an.is_expired(now);
                    if expired {
                        log::debug!("-- a {}", an);
                    }
                    !expired
                });

                for an in answers.iter_mut() {
                    let Some(refresh) = an.refresh() else {
                        continue;
                    };
                    if !wanted(name, *ty) {
                        log::trace!("no refresh of: a {}", an);
                        continue;
                    }
                    if now >= refresh {
                        an.mark_refreshed();
                        sweep.ask(name, *ty);
                    }
                    // After the last refresh the answer is simply left to expire.
                    if let Some(next) = an.refresh() {
                        sweep.consider(next);
                    }
                }
            }
            by_type.retain(|_, answers| !answers.is_empty());
        }
        self.cached.retain(|_, by_type| !by_type.is_empty());

        for (name, by_type) in &mut self.asked {
            by_type.retain(|ty, q| {
                let keep = q.refresh().is_some() && wanted(name, *ty);
                if !keep {
                    log::debug!("no refresh of: q {}", q);
                }
                keep
            });

            for (ty, q) in by_type.iter() {
                let Some(refresh) = q.refresh() else {
                    log::error!("question {} lost its refresh time during the sweep", q);
                    debug_assert!(false, "question without refresh time survived the sweep");
                    continue;
                };
                if now >= refresh {
                    sweep.ask(name, *ty);
                }
                sweep.consider(refresh);
            }
        }
        self.asked.retain(|_, by_type| !by_type.is_empty());

        sweep
    }

    /// Returns the number of stored answers.
    pub fn len(&self) -> usize {
        self.cached
            .values()
            .flat_map(|by_type| by_type.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every tracked question.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.asked.values().flat_map(|by_type| by_type.values())
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "asked:")?;
        for q in self.questions() {
            writeln!(f, "  {}", q)?;
        }
        writeln!(f, "cached:")?;
        for an in self.cached.values().flat_map(|t| t.values()).flatten() {
            writeln!(f, "  {}", an)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("asked", &self.asked)
            .field("cached", &self.cached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use expect_test::expect;

    use super::*;
    use crate::packet::records::Record;

    fn name(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    fn a_record(host: &str, last_octet: u8, ttl: u32, flush: bool, toa: Instant) -> Answer {
        Answer::new(
            name(host),
            ttl,
            Record::A(Ipv4Addr::new(10, 0, 0, last_octet)),
            flush,
            toa,
        )
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn merge_is_idempotent() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        assert!(cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0).is_some());
        assert!(cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_flush_spares_recent_identical_data() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);

        let t1 = t0 + Duration::from_millis(500);
        let flush = a_record("foo.local", 1, 120, true, t1);
        assert!(cache.merge_answer(flush, t1).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_flush_removes_only_old_differing_data() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);
        cache.merge_answer(a_record("foo.local", 2, 120, false, t0), t0);
        cache.merge_answer(a_record("bar.local", 9, 120, false, t0), t0);

        let t1 = t0 + secs(5);
        let fresh_same = a_record("foo.local", 2, 120, true, t0 + Duration::from_millis(4500));
        cache.merge_answer(fresh_same, t1 - Duration::from_millis(500));
        // .1 is older than 1s and differs from the flush record: gone. .2 matches: kept.
        let left = cache.answers_for(&"foo.local".parse().unwrap(), RecordType::A);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].data(), &Record::A(Ipv4Addr::new(10, 0, 0, 2)));
        // other names untouched
        assert_eq!(cache.answers_for(&"bar.local".parse().unwrap(), RecordType::A).len(), 1);
    }

    #[test]
    fn cache_flush_spares_recent_differing_data() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, true, t0), t0);
        // a second record of the same flush set arriving in the same burst
        let t1 = t0 + Duration::from_millis(200);
        assert!(cache.merge_answer(a_record("foo.local", 2, 120, true, t1), t1).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn goodbye_replaces_and_reports() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);

        let t1 = t0 + secs(3);
        let bye = cache.merge_answer(a_record("foo.local", 1, 0, false, t1), t1);
        assert!(bye.unwrap().is_goodbye());

        let stored = cache.answers_for(&"foo.local".parse().unwrap(), RecordType::A);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ttl(), 0);
    }

    #[test]
    fn fresher_copy_wins_silently() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);

        let t1 = t0 + secs(5);
        let later = a_record("foo.local", 1, 125, false, t1);
        assert!(cache.merge_answer(later, t1).is_none());

        let stored = cache.answers_for(&"foo.local".parse().unwrap(), RecordType::A);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ttl(), 125);
        assert_eq!(stored[0].expiry(), t1 + secs(125));
    }

    #[test]
    fn stale_copy_is_discarded() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);

        let t1 = t0 + secs(5);
        assert!(cache.merge_answer(a_record("foo.local", 1, 10, false, t1), t1).is_none());
        let stored = cache.answers_for(&"foo.local".parse().unwrap(), RecordType::A);
        assert_eq!(stored[0].ttl(), 120);
    }

    #[test]
    fn answers_for_wildcards() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("foo.local", 1, 120, false, t0), t0);
        cache.merge_answer(a_record("bar.local", 2, 120, false, t0), t0);
        cache.merge_answer(
            Answer::new(
                name("foo.local"),
                120,
                Record::TXT(crate::packet::records::TXT::new(["x=y"])),
                false,
                t0,
            ),
            t0,
        );

        assert_eq!(cache.answers_for(&NameFilter::Any, RecordType::ANY).len(), 3);
        assert_eq!(cache.answers_for(&NameFilter::Any, RecordType::A).len(), 2);
        let foo = "foo.local".parse().unwrap();
        assert_eq!(cache.answers_for(&foo, RecordType::ANY).len(), 2);
        assert_eq!(cache.answers_for(&foo, RecordType::TXT).len(), 1);
        assert_eq!(cache.answers_for(&foo, RecordType::SRV).len(), 0);
    }

    #[test]
    fn questions_are_deduplicated() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        assert!(cache
            .add_question(Question::new(name("foo.local"), RecordType::A, t0))
            .is_some());
        assert!(cache
            .add_question(Question::new(name("FOO.local"), RecordType::A, t0))
            .is_none());
        assert!(cache
            .add_question(Question::new(name("foo.local"), RecordType::AAAA, t0))
            .is_some());
        assert_eq!(cache.questions().count(), 2);
    }

    #[test]
    fn observe_question_rearms_tracked_question() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        assert!(cache
            .observe_question(&name("foo.local"), RecordType::A, t0)
            .is_none());

        cache.add_question(Question::new(name("foo.local"), RecordType::A, t0));
        let t1 = t0 + secs(1);
        let q = cache
            .observe_question(&name("foo.local"), RecordType::A, t1)
            .unwrap();
        assert_eq!(q.retries(), 1);
        assert_eq!(q.last_asked(), t1);
    }

    #[test]
    fn is_asked() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.add_question(Question::new(name("any.local"), RecordType::ANY, t0));
        cache.add_question(Question::new(name("a.local"), RecordType::A, t0));

        assert!(cache.is_asked(&NameFilter::Any, RecordType::SRV));
        assert!(cache.is_asked(&"any.local".parse().unwrap(), RecordType::TXT));
        assert!(cache.is_asked(&"a.local".parse().unwrap(), RecordType::A));
        assert!(!cache.is_asked(&"a.local".parse().unwrap(), RecordType::AAAA));
        assert!(!cache.is_asked(&"b.local".parse().unwrap(), RecordType::A));
    }

    #[test]
    fn sweep_expires_and_refreshes() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.merge_answer(a_record("short.local", 1, 10, false, t0), t0);
        cache.merge_answer(a_record("long.local", 2, 100, false, t0), t0);
        cache.merge_answer(a_record("unwanted.local", 3, 10, false, t0), t0);

        let wanted = |n: &DomainName, _: RecordType| n != &name("unwanted.local");

        // short.local is at 80% of its TTL
        let sweep = cache.sweep(t0 + secs(8), wanted);
        assert_eq!(sweep.questions, [(name("short.local"), RecordType::A)]);
        // next refresh is short.local at 85%
        assert_eq!(sweep.next_wake, Some(t0 + Duration::from_millis(8500)));

        // everything but long.local has expired
        let sweep = cache.sweep(t0 + secs(11), wanted);
        assert_eq!(cache.len(), 1);
        assert!(sweep.questions.is_empty());
        assert_eq!(sweep.next_wake, Some(t0 + secs(80)));
    }

    #[test]
    fn sweep_retires_questions() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.add_question(Question::new(name("foo.local"), RecordType::A, t0));
        cache.add_question(Question::new(name("nobody.local"), RecordType::A, t0));

        let wanted = |n: &DomainName, _: RecordType| n == &name("foo.local");

        let sweep = cache.sweep(t0 + secs(1), wanted);
        assert_eq!(sweep.questions, [(name("foo.local"), RecordType::A)]);
        assert_eq!(sweep.next_wake, Some(t0 + secs(1)));
        assert_eq!(cache.questions().count(), 1);

        for _ in 0..4 {
            cache.observe_question(&name("foo.local"), RecordType::A, t0);
        }
        let sweep = cache.sweep(t0 + secs(2), wanted);
        assert!(sweep.questions.is_empty());
        assert_eq!(sweep.next_wake, None);
        assert_eq!(cache.questions().count(), 0);
    }

    #[test]
    fn sweep_asks_each_question_once() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.add_question(Question::new(name("foo.local"), RecordType::A, t0));
        cache.merge_answer(a_record("foo.local", 1, 2, false, t0), t0);
        cache.merge_answer(a_record("foo.local", 2, 2, false, t0), t0);

        // both answers and the question itself are due
        let sweep = cache.sweep(t0 + Duration::from_millis(1700), |_, _| true);
        assert_eq!(sweep.questions, [(name("foo.local"), RecordType::A)]);
    }

    #[test]
    fn snapshot_display() {
        let t0 = Instant::now();
        let mut cache = Cache::new();
        cache.add_question(Question::new(name("foo.local"), RecordType::ANY, t0));
        cache.merge_answer(a_record("foo.local", 1, 120, true, t0), t0);
        cache.merge_answer(
            Answer::new(
                name("_http._tcp.local"),
                4500,
                Record::PTR(name("web._http._tcp.local")),
                false,
                t0,
            ),
            t0,
        );

        expect![[r#"
            asked:
              foo.local./ANY (0)
            cached:
              _http._tcp.local. (4500) PTR web._http._tcp.local.
              foo.local. (120) ! A 10.0.0.1
        "#]]
        .assert_eq(&cache.to_string());
    }
}
