//! DNS-SD service advertising.

use std::{fmt, sync::Arc};

use crate::{
    error::{Error, Result},
    packet::{
        encoder::MessageBuilder,
        name::{DomainName, Label},
        records::{Record, SRV, TXT},
        RecordType,
    },
    responder::Shared,
};

/// A service instance advertised by the responder.
///
/// A service `name` of type `_type._proto` in domain `local.` answers questions about three names:
///
/// - the *instance name* `name._type._proto.local.` (SRV and TXT),
/// - the *type name* `_type._proto.local.` (PTR to the instance name),
/// - the *enumeration name* `_services._dns-sd._udp.local.` (PTR to the type name).
///
/// Create one with [`Service::builder`].
#[derive(Clone)]
pub struct Service {
    instance: DomainName,
    service_type: DomainName,
    enumeration: DomainName,
    ttl: u32,
    srv: Record,
    txt: Record,
}

impl Service {
    /// Begins building a service named `name`, of type `service_type` (eg. `_http._tcp`), reachable
    /// on `port`.
    pub fn builder(name: &str, service_type: &str, port: u16) -> ServiceBuilder {
        ServiceBuilder::new(name, service_type, port)
    }

    #[inline]
    pub fn instance_name(&self) -> &DomainName {
        &self.instance
    }

    #[inline]
    pub fn type_name(&self) -> &DomainName {
        &self.service_type
    }

    #[inline]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Adds the records answering a question for `name`/`ty` to `msg`, if there are any.
    pub fn answer_question(&self, name: &DomainName, ty: RecordType, msg: &mut MessageBuilder) {
        if name == &self.instance {
            match ty {
                RecordType::ANY => {
                    self.add_srv(msg);
                    self.add_txt(msg);
                }
                RecordType::SRV => self.add_srv(msg),
                RecordType::TXT => self.add_txt(msg),
                _ => {}
            }
        }
        if name == &self.service_type && matches!(ty, RecordType::ANY | RecordType::PTR) {
            self.add_type_ptr(msg);
        }
        if name == &self.enumeration && matches!(ty, RecordType::ANY | RecordType::PTR) {
            msg.add_answer(
                self.enumeration.clone(),
                self.ttl,
                Record::PTR(self.service_type.clone()),
            );
        }
    }

    /// Adds the unsolicited announcement of this instance to `msg`.
    pub fn announce(&self, msg: &mut MessageBuilder) {
        self.add_type_ptr(msg);
    }

    fn add_srv(&self, msg: &mut MessageBuilder) {
        msg.add_unique_answer(self.instance.clone(), self.ttl, self.srv.clone());
    }

    fn add_txt(&self, msg: &mut MessageBuilder) {
        msg.add_unique_answer(self.instance.clone(), self.ttl, self.txt.clone());
    }

    fn add_type_ptr(&self, msg: &mut MessageBuilder) {
        msg.add_answer(
            self.service_type.clone(),
            self.ttl,
            Record::PTR(self.instance.clone()),
        );
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.instance, self.srv)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("instance", &self.instance)
            .field("ttl", &self.ttl)
            .field("srv", &self.srv)
            .field("txt", &self.txt)
            .finish()
    }
}

/// Builder for [`Service`]s.
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    name: String,
    service_type: String,
    port: u16,
    ttl: u32,
    priority: u16,
    weight: u16,
    domain: String,
    txt: Vec<(String, String)>,
    target: Option<String>,
}

impl ServiceBuilder {
    /// TTL of the advertised records, in seconds.
    pub const DEFAULT_TTL: u32 = 7200;

    pub const DEFAULT_DOMAIN: &'static str = "local";

    pub fn new(name: &str, service_type: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            service_type: service_type.to_string(),
            port,
            ttl: Self::DEFAULT_TTL,
            priority: 0,
            weight: 0,
            domain: Self::DEFAULT_DOMAIN.to_string(),
            txt: Vec::new(),
            target: None,
        }
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the SRV priority. Lower values are preferred.
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: u16) -> Self {
        self.weight = weight;
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    /// Adds a `key=value` entry to the TXT record.
    pub fn txt(mut self, key: &str, value: &str) -> Self {
        self.txt.push((key.to_string(), value.to_string()));
        self
    }

    /// Sets the host the SRV record points at.
    ///
    /// Defaults to the local host name. A single-label host name is qualified with the domain.
    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn build(self) -> Result<Service> {
        let domain = self
            .domain
            .parse::<DomainName>()
            .map_err(Error::InvalidName)?;
        let instance_label = Label::try_new(&self.name).map_err(Error::InvalidName)?;
        let service_type = self
            .service_type
            .parse::<DomainName>()
            .map_err(Error::InvalidName)?
            .join(&domain);

        let mut instance = DomainName::from_iter([instance_label]);
        for label in service_type.labels() {
            instance.push_label(label.clone());
        }

        let target = match &self.target {
            Some(target) => target.clone(),
            None => hostname::get()
                .map_err(Error::Configuration)?
                .to_string_lossy()
                .into_owned(),
        };
        let mut target = target.parse::<DomainName>().map_err(Error::InvalidName)?;
        if target.labels().len() == 1 {
            target = target.join(&domain);
        }

        let enumeration = "_services._dns-sd._udp"
            .parse::<DomainName>()
            .map_err(Error::InvalidName)?
            .join(&domain);

        let txt = TXT::from_pairs(self.txt.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        Ok(Service {
            instance,
            service_type,
            enumeration,
            ttl: self.ttl,
            srv: Record::SRV(SRV {
                priority: self.priority,
                weight: self.weight,
                port: self.port,
                target,
            }),
            txt: Record::TXT(txt),
        })
    }
}

/// A service registered with a [`Responder`](crate::Responder).
///
/// The responder answers questions about the service until the handle is stopped or dropped. No
/// goodbye is sent when that happens; other hosts forget the service once its records expire.
pub struct ServiceHandle {
    shared: Arc<Shared>,
    id: u64,
    service: Arc<Service>,
    withdrawn: bool,
}

impl ServiceHandle {
    pub(crate) fn register(shared: Arc<Shared>, service: Service) -> Result<Self> {
        let service = Arc::new(service);
        let id = shared.register_service(service.clone())?;
        log::debug!("advertising {}", service);
        Ok(Self {
            shared,
            id,
            service,
            withdrawn: false,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Stops answering questions about the service.
    pub fn stop(mut self) {
        self.withdraw();
    }

    fn withdraw(&mut self) {
        if std::mem::replace(&mut self.withdrawn, true) {
            return;
        }
        self.shared.withdraw_service(self.id);
        log::debug!("withdrew {}", self.service);
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.withdraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decoder::Message;

    fn domain(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    fn service() -> Service {
        Service::builder("svc", "_http._tcp", 8080)
            .txt("path", "/")
            .target("ensemble")
            .build()
            .unwrap()
    }

    fn answer(svc: &Service, name: &str, ty: RecordType) -> Vec<(String, Record)> {
        let mut msg = MessageBuilder::response();
        svc.answer_question(&domain(name), ty, &mut msg);
        let msg = Message::decode(&msg.encode().unwrap()).unwrap();
        msg.answers()
            .iter()
            .map(|rr| (rr.name().to_string(), rr.data().clone()))
            .collect()
    }

    fn types(answers: &[(String, Record)]) -> Vec<RecordType> {
        answers.iter().map(|(_, r)| r.record_type()).collect()
    }

    #[test]
    fn derived_names() {
        let svc = service();
        assert_eq!(svc.instance_name().to_string(), "svc._http._tcp.local.");
        assert_eq!(svc.type_name().to_string(), "_http._tcp.local.");
        assert_eq!(svc.ttl(), 7200);
        assert_eq!(
            svc.srv,
            Record::SRV(SRV {
                priority: 0,
                weight: 0,
                port: 8080,
                target: domain("ensemble.local"),
            })
        );
    }

    #[test]
    fn instance_questions() {
        let svc = service();
        let inst = "svc._http._tcp.local";
        assert_eq!(
            types(&answer(&svc, inst, RecordType::ANY)),
            [RecordType::SRV, RecordType::TXT]
        );
        assert_eq!(types(&answer(&svc, inst, RecordType::SRV)), [RecordType::SRV]);
        assert_eq!(types(&answer(&svc, inst, RecordType::TXT)), [RecordType::TXT]);
        assert!(answer(&svc, inst, RecordType::A).is_empty());
        assert!(answer(&svc, inst, RecordType::PTR).is_empty());
    }

    #[test]
    fn type_and_enumeration_questions() {
        let svc = service();
        for ty in [RecordType::ANY, RecordType::PTR] {
            assert_eq!(
                answer(&svc, "_http._tcp.local", ty),
                [(
                    "_http._tcp.local.".to_string(),
                    Record::PTR(domain("svc._http._tcp.local"))
                )]
            );
            assert_eq!(
                answer(&svc, "_services._dns-sd._udp.local", ty),
                [(
                    "_services._dns-sd._udp.local.".to_string(),
                    Record::PTR(domain("_http._tcp.local"))
                )]
            );
        }
        assert!(answer(&svc, "_http._tcp.local", RecordType::SRV).is_empty());
        assert!(answer(&svc, "_ipp._tcp.local", RecordType::PTR).is_empty());
    }

    #[test]
    fn custom_domain_and_srv_fields() {
        let svc = Service::builder("printer", "_ipp._tcp", 631)
            .domain("example.org")
            .priority(10)
            .weight(5)
            .ttl(120)
            .target("print.example.org")
            .build()
            .unwrap();
        assert_eq!(
            svc.instance_name().to_string(),
            "printer._ipp._tcp.example.org."
        );
        let answers = answer(&svc, "printer._ipp._tcp.example.org", RecordType::SRV);
        assert_eq!(
            answers[0].1,
            Record::SRV(SRV {
                priority: 10,
                weight: 5,
                port: 631,
                target: domain("print.example.org"),
            })
        );
    }

    #[test]
    fn invalid_names() {
        assert!(matches!(
            Service::builder("", "_http._tcp", 80).target("h").build(),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            Service::builder("svc", "_http..tcp", 80).target("h").build(),
            Err(Error::InvalidName(_))
        ));
    }
}
