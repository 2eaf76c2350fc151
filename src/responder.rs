//! The mDNS responder: a shared record cache kept fresh by two background loops.
//!
//! The *receive loop* reads datagrams from the multicast group. Queries are answered from the
//! registered [`Service`]s, and questions we are tracking are marked as asked. Responses are
//! merged into the [`Cache`] and new answers are handed to the matching subscriptions.
//!
//! The *sweeper loop* sleeps until the next refresh is due, or until it is woken because new state
//! needs an earlier refresh. It then drops expired answers and re-asks questions and answers that
//! somebody is still subscribed to.

use std::{
    collections::BTreeMap,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    cache::Cache,
    error::{Error, Result},
    packet::{
        decoder::Message,
        encoder::MessageBuilder,
        name::{DomainName, NameFilter},
        Opcode, RCode, RecordType,
    },
    query::{BackgroundQuery, Query},
    record::{Answer, Question},
    service::{Service, ServiceHandle},
    transport::{MulticastSocket, Transport},
    MDNS_BUFFER_SIZE,
};

/// Responder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) group: SocketAddrV4,
    pub(crate) interface: Ipv4Addr,
    pub(crate) multicast_ttl: u32,
    pub(crate) read_timeout: Duration,
    pub(crate) buffer_size: usize,
}

impl Config {
    /// The mDNS IPv4 multicast group.
    pub const DEFAULT_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353);

    /// IP TTL of outgoing datagrams, as required by RFC 6762.
    pub const DEFAULT_MULTICAST_TTL: u32 = 255;

    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            group: Self::DEFAULT_GROUP,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: Self::DEFAULT_MULTICAST_TTL,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            buffer_size: MDNS_BUFFER_SIZE,
        }
    }

    /// Sets the multicast group to join and send to.
    pub fn group(mut self, group: SocketAddrV4) -> Self {
        self.group = group;
        self
    }

    /// Sets the address of the interface on which to join the group.
    ///
    /// By default, the operating system picks one.
    pub fn interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    /// Sets how long a single receive call may block.
    ///
    /// This bounds how long shutting down the responder takes.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the size of the receive buffer. Longer datagrams are truncated.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// A running mDNS responder.
///
/// Owns the record cache and the threads that maintain it. Dropping the responder stops and joins
/// both threads; [`Query`]s and [`ServiceHandle`]s that outlive it stay valid but go quiet.
pub struct Responder {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Responder {
    /// Starts a responder on the default mDNS group.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let sock = MulticastSocket::bind(&config).map_err(Error::Configuration)?;
        Self::start(Box::new(sock), &config)
    }

    /// Starts a responder that sends and receives through `transport`.
    pub fn with_transport(transport: impl Transport) -> Result<Self> {
        Self::start(Box::new(transport), &Config::default())
    }

    fn start(transport: Box<dyn Transport>, config: &Config) -> Result<Self> {
        let (wake_tx, wake_rx) = flume::bounded(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                cache: Cache::new(),
                subscriptions: Vec::new(),
                services: BTreeMap::new(),
                wake_at: None,
                next_id: 0,
            }),
            transport,
            wake: wake_tx,
            shutdown: AtomicBool::new(false),
            buffer_size: config.buffer_size,
            backoff: config.read_timeout,
        });

        let mut this = Self {
            shared,
            threads: Vec::new(),
        };

        let shared = this.shared.clone();
        this.threads.push(
            thread::Builder::new()
                .name("mdns-receive".into())
                .spawn(move || shared.receive_loop())
                .map_err(Error::Thread)?,
        );
        let shared = this.shared.clone();
        this.threads.push(
            thread::Builder::new()
                .name("mdns-sweeper".into())
                .spawn(move || shared.sweeper_loop(wake_rx))
                .map_err(Error::Thread)?,
        );

        Ok(this)
    }

    /// Subscribes to answers for `name` and `ty`.
    ///
    /// `name` is a domain name, or `*` to receive every answer of type `ty`. Cached answers are
    /// delivered right away, and the question is multicast unless it is already in flight.
    pub fn query(&self, name: &str, ty: RecordType) -> Result<Query> {
        let filter = name.parse::<NameFilter>().map_err(Error::InvalidName)?;
        Query::register(self.shared.clone(), filter, ty)
    }

    /// Like [`Responder::query`], but answers are passed to `callback` on a dedicated thread.
    ///
    /// The subscription ends when `callback` returns an error or panics.
    pub fn background_query<F, E>(
        &self,
        name: &str,
        ty: RecordType,
        callback: F,
    ) -> Result<BackgroundQuery>
    where
        F: FnMut(Answer) -> Result<(), E> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let query = self.query(name, ty)?;
        BackgroundQuery::spawn(query, callback)
    }

    /// Starts answering questions about `service` and announces it on the network.
    pub fn advertise(&self, service: Service) -> Result<ServiceHandle> {
        ServiceHandle::register(self.shared.clone(), service)
    }

    /// Returns a copy of the cache, for diagnostics.
    pub fn snapshot(&self) -> Cache {
        self.shared.lock().cache.clone()
    }

    /// Stops the background threads and waits for them to exit.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Unblocks every `Query::pop`.
        self.shared.lock().subscriptions.clear();
        self.shared.wake.try_send(()).ok();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("responder thread panicked");
            }
        }
        log::debug!("responder stopped");
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// A registered interest in answers.
struct Subscription {
    id: u64,
    name: NameFilter,
    ty: RecordType,
    sender: flume::Sender<Answer>,
}

impl Subscription {
    fn wants(&self, name: &DomainName, ty: RecordType) -> bool {
        self.name.matches(name) && self.ty.matches(ty)
    }
}

pub(crate) struct State {
    cache: Cache,
    subscriptions: Vec<Subscription>,
    services: BTreeMap<u64, Arc<Service>>,
    /// When the sweeper will wake up next, if ever.
    wake_at: Option<Instant>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// State shared by the responder, its threads, and every handle given out.
pub(crate) struct Shared {
    state: Mutex<State>,
    transport: Box<dyn Transport>,
    wake: flume::Sender<()>,
    shutdown: AtomicBool,
    buffer_size: usize,
    backoff: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so a poisoned lock still holds consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn transmit(&self, msg: &MessageBuilder) -> Result<()> {
        let bytes = msg
            .encode()
            .map_err(|e| Error::Transmission(io::Error::from(e)))?;
        log::trace!("raw send: {} bytes", bytes.len());
        self.transport.send(&bytes).map_err(Error::Transmission)
    }

    /// Wakes the sweeper if `refresh` is earlier than its scheduled wake-up.
    fn wake_sweeper_for(&self, state: &mut State, refresh: Option<Instant>) {
        let Some(refresh) = refresh else { return };
        if state.wake_at.map_or(true, |at| refresh < at) {
            state.wake_at = Some(refresh);
            self.wake.try_send(()).ok();
        }
    }

    // Registration

    pub(crate) fn subscribe(
        &self,
        name: &NameFilter,
        ty: RecordType,
    ) -> Result<(u64, flume::Receiver<Answer>)> {
        let (sender, receiver) = flume::unbounded();
        let now = Instant::now();
        let mut state = self.lock();

        let id = state.next_id();
        state.subscriptions.push(Subscription {
            id,
            name: name.clone(),
            ty,
            sender: sender.clone(),
        });

        let mut new_question = None;
        if let NameFilter::Exact(name) = name {
            if let Some(q) = state.cache.add_question(Question::new(name.clone(), ty, now)) {
                log::debug!("++ q {}", q);
                new_question = Some(name.clone());
            }
        }

        for an in state.cache.answers_for(name, ty) {
            sender.send(an).ok();
        }

        // Answers nobody wanted to refresh so far may need it now.
        state.wake_at = None;
        self.wake.try_send(()).ok();

        if let Some(name) = new_question {
            log::debug!("-> q {}/{}", name, ty);
            let mut msg = MessageBuilder::query();
            msg.add_question(name, ty);
            if let Err(e) = self.transmit(&msg) {
                state.subscriptions.retain(|s| s.id != id);
                return Err(e);
            }
        }

        Ok((id, receiver))
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.lock().subscriptions.retain(|s| s.id != id);
    }

    pub(crate) fn register_service(&self, service: Arc<Service>) -> Result<u64> {
        let mut state = self.lock();
        let id = state.next_id();
        state.services.insert(id, service.clone());

        let mut msg = MessageBuilder::response();
        service.announce(&mut msg);
        log::debug!("-> a {} (announce)", service);
        if let Err(e) = self.transmit(&msg) {
            log::warn!("failed to announce {}: {}", service, e);
            state.services.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    pub(crate) fn withdraw_service(&self, id: u64) {
        self.lock().services.remove(&id);
    }

    // Receive loop

    fn receive_loop(&self) {
        let mut buf = vec![0; self.buffer_size];
        while !self.is_shut_down() {
            let (len, addr) = match self.transport.recv(&mut buf) {
                Ok(res) => res,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("failed to receive: {}", e);
                    thread::sleep(self.backoff);
                    continue;
                }
            };

            let packet = &buf[..len];
            log::trace!("raw recv from {}: {} bytes", addr, len);

            match self.handle_packet(addr, packet) {
                Ok(()) => {}
                Err(e @ Error::Decode(_)) => {
                    log::warn!("dropping message from {}: {}", addr, e);
                }
                Err(e) => {
                    log::error!("failed to handle message from {}: {}", addr, e);
                }
            }
        }
    }

    fn handle_packet(&self, sender: SocketAddr, packet: &[u8]) -> Result<()> {
        let msg = Message::decode(packet).map_err(Error::Decode)?;
        let header = msg.header();
        if header.opcode() != Opcode::QUERY || header.rcode() != RCode::NO_ERROR {
            log::trace!("ignoring message from {}: {:?}", sender, header);
            return Ok(());
        }

        let now = Instant::now();
        if msg.is_query() {
            self.handle_query(&msg, now)
        } else {
            self.handle_response(msg, now);
            Ok(())
        }
    }

    fn handle_query(&self, msg: &Message, now: Instant) -> Result<()> {
        let mut state = self.lock();

        for q in msg.questions() {
            if q.unicast_response() {
                continue;
            }
            if let Some(tracked) = state.cache.observe_question(q.name(), q.record_type(), now) {
                log::debug!("<- q {}", tracked);
            }
        }

        let mut reply = MessageBuilder::response();
        for q in msg.questions() {
            for service in state.services.values() {
                service.answer_question(q.name(), q.record_type(), &mut reply);
            }
        }

        if reply.answer_count() > 0 {
            log::debug!("-> a {} answer(s)", reply.answer_count());
            self.transmit(&reply)?;
        }
        Ok(())
    }

    fn handle_response(&self, msg: Message, now: Instant) {
        let mut state = self.lock();

        let mut reportable = Vec::new();
        for rr in msg.into_answers() {
            let an = Answer::from_resource_record(rr, now);
            let refresh = an.refresh();
            if let Some(an) = state.cache.merge_answer(an, now) {
                log::debug!("++ a {}", an);
                reportable.push(an);
            }
            self.wake_sweeper_for(&mut state, refresh);
        }

        for an in &reportable {
            for sub in &state.subscriptions {
                if sub.wants(an.name(), an.record_type()) {
                    // The receiver is gone only while its query is being stopped.
                    sub.sender.send(an.clone()).ok();
                }
            }
        }
    }

    // Sweeper loop

    fn sweeper_loop(&self, wake: flume::Receiver<()>) {
        let mut deadline: Option<Instant> = None;
        loop {
            let woken = match deadline {
                Some(deadline) => {
                    let delay = deadline
                        .saturating_duration_since(Instant::now())
                        .max(Duration::from_secs(1));
                    match wake.recv_timeout(delay) {
                        Ok(()) | Err(flume::RecvTimeoutError::Timeout) => true,
                        Err(flume::RecvTimeoutError::Disconnected) => false,
                    }
                }
                None => wake.recv().is_ok(),
            };
            if !woken || self.is_shut_down() {
                return;
            }

            deadline = self.sweep();
        }
    }

    /// Runs one sweep and returns when the next one is due.
    fn sweep(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut state = self.lock();
        log::debug!("sweep begin");

        let State {
            cache,
            subscriptions,
            ..
        } = &mut *state;
        let sweep = cache.sweep(now, |name, ty| {
            subscriptions.iter().any(|s| s.wants(name, ty))
        });
        state.wake_at = sweep.next_wake;

        if !sweep.questions.is_empty() {
            let mut msg = MessageBuilder::query();
            for (name, ty) in sweep.questions {
                log::debug!("-> q {}/{}", name, ty);
                msg.add_question(name, ty);
            }
            if let Err(e) = self.transmit(&msg) {
                log::error!("failed to send refresh query: {}", e);
            }
        }

        match sweep.next_wake {
            Some(at) => log::debug!(
                "sweep end, refresh in {:?}",
                at.saturating_duration_since(now)
            ),
            None => log::debug!("sweep end, nothing to refresh"),
        }
        sweep.next_wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.group.to_string(), "224.0.0.251:5353");
        assert_eq!(config.interface, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.multicast_ttl, 255);
        assert_eq!(config.buffer_size, 9000);

        let config = config
            .read_timeout(Duration::from_millis(100))
            .buffer_size(1500);
        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.buffer_size, 1500);
    }

    #[test]
    fn subscription_filter() {
        let (sender, _receiver) = flume::unbounded();
        let all = Subscription {
            id: 0,
            name: NameFilter::Any,
            ty: RecordType::ANY,
            sender: sender.clone(),
        };
        let foo = Subscription {
            id: 1,
            name: "foo.local.".parse().unwrap(),
            ty: RecordType::A,
            sender,
        };

        let foo_name: DomainName = "foo.local".parse().unwrap();
        let bar_name: DomainName = "bar.local".parse().unwrap();
        for (name, ty) in [
            (&foo_name, RecordType::A),
            (&foo_name, RecordType::TXT),
            (&bar_name, RecordType::A),
        ] {
            assert!(all.wants(name, ty));
        }
        assert!(foo.wants(&foo_name, RecordType::A));
        assert!(!foo.wants(&foo_name, RecordType::AAAA));
        assert!(!foo.wants(&bar_name, RecordType::A));
    }
}
