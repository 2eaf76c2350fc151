//! Subscriptions to answers from the network.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    packet::{name::NameFilter, RecordType},
    record::Answer,
    responder::Shared,
};

/// A subscription to answers matching a name and record type.
///
/// Created by [`Responder::query`](crate::Responder::query). Answers already in the cache are
/// queued immediately; after that, every new answer received from the network that matches is
/// queued in arrival order. Goodbye answers (TTL 0) are delivered too.
///
/// The subscription ends when the query is stopped or dropped.
pub struct Query {
    shared: Arc<Shared>,
    id: u64,
    name: NameFilter,
    ty: RecordType,
    answers: flume::Receiver<Answer>,
    stopped: AtomicBool,
}

impl Query {
    pub(crate) fn register(shared: Arc<Shared>, name: NameFilter, ty: RecordType) -> Result<Self> {
        let (id, answers) = shared.subscribe(&name, ty)?;
        Ok(Self {
            shared,
            id,
            name,
            ty,
            answers,
            stopped: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn name(&self) -> &NameFilter {
        &self.name
    }

    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.ty
    }

    /// Blocks until the next answer arrives.
    ///
    /// Returns [`None`] once the query has been stopped or the responder has shut down.
    pub fn pop(&self) -> Option<Answer> {
        if self.is_stopped() {
            return None;
        }
        self.answers.recv().ok()
    }

    /// Returns the next answer if one is waiting.
    pub fn try_pop(&self) -> Option<Answer> {
        if self.is_stopped() {
            return None;
        }
        self.answers.try_recv().ok()
    }

    /// Waits up to `timeout` for the next answer.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Answer> {
        if self.is_stopped() {
            return None;
        }
        self.answers.recv_timeout(timeout).ok()
    }

    /// Returns a blocking iterator over answers. It ends when the query is stopped.
    pub fn iter(&self) -> Iter<'_> {
        Iter { query: self }
    }

    /// Returns the number of answers waiting to be popped.
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ends the subscription and discards any answers still queued.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.unsubscribe(self.id);
        let discarded = self.answers.drain().count();
        log::debug!("stopped {}, discarding {} answer(s)", self, discarded);
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q?{}/{}", self.name, self.ty)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("queued", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Blocking iterator over the answers of a [`Query`].
pub struct Iter<'a> {
    query: &'a Query,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Answer;

    fn next(&mut self) -> Option<Answer> {
        self.query.pop()
    }
}

impl<'a> IntoIterator for &'a Query {
    type Item = Answer;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// A [`Query`] whose answers are handed to a callback on a dedicated thread.
///
/// The thread exits, and the subscription ends, when the callback fails or panics, or when the
/// background query is stopped or dropped.
pub struct BackgroundQuery {
    query: Arc<Query>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundQuery {
    pub(crate) fn spawn<F, E>(query: Query, mut callback: F) -> Result<Self>
    where
        F: FnMut(Answer) -> Result<(), E> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let query = Arc::new(query);
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread = {
            let query = query.clone();
            let cancelled = cancelled.clone();
            thread::Builder::new()
                .name(format!("mdns-query {}", query))
                .spawn(move || {
                    while let Some(an) = query.pop() {
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        match panic::catch_unwind(AssertUnwindSafe(|| callback(an))) {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                log::warn!("{}: callback failed: {}", query, e);
                                break;
                            }
                            Err(_) => {
                                log::error!("{}: callback panicked", query);
                                break;
                            }
                        }
                    }
                    query.stop();
                })
                .map_err(Error::Thread)?
        };

        Ok(Self {
            query,
            cancelled,
            thread: Some(thread),
        })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns whether the consumer thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Ends the subscription.
    ///
    /// The callback is not invoked again, though a call already in progress runs to completion on
    /// the detached consumer thread.
    pub fn stop(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.query.stop();
        // Detach.
        self.thread.take();
    }
}

impl Drop for BackgroundQuery {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for BackgroundQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundQuery")
            .field("query", &self.query)
            .field("running", &self.is_running())
            .finish()
    }
}
