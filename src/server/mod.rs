//! The caching, forwarding server.
//!
//! Queries arrive on up to four listeners (UDP, TCP, DNS-over-TLS and
//! DNS-over-HTTPS). Each is answered from the [`Cache`] if it holds an
//! unexpired answer, which includes the authoritative answers compiled from
//! the configured zones. Everything else is put on a queue, and taken off by
//! one of the forwarders, each of which keeps a connection open to a single
//! upstream resolver. Upstream answers are cached on the way back.
//!
//! ```rust,no_run
//! use rdns::config::ServerConfig;
//! use rdns::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rdns::Error> {
//!     let config: ServerConfig = r#"
//!         address = "127.0.0.1"
//!         udp_port = 5353
//!         tcp_port = 5353
//!         dot_port = 0
//!         doh_port = 0
//!         upstreams = ["udp://1.1.1.1"]
//!     "#.parse()?;
//!
//!     let mut server = Server::new(config)?;
//!     server.start().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     server.stop().await
//! }
//! ```

mod doh;
mod forwarder;
mod handler;
mod request;
mod tcp;
mod tls;
mod udp;

pub use self::request::{Request, ResponseWriter, Transport};
pub use self::tls::server_config;

use self::forwarder::{Forwarder, Settings};
use self::handler::{Active, Handler, Receivers};
use crate::cache::{Answer, Cache};
use crate::clients::{client_config, IdGenerator};
use crate::config::{ServerConfig, Upstream};
use crate::name;
use crate::zones::Zone;
use crate::Error;
use crate::Question;
use crate::Record;
use crate::Result;
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Server {
    config: ServerConfig,
    cache: Arc<Cache>,
    zones: Mutex<Vec<Zone>>,

    handler: Arc<Handler>,
    receivers: Receivers,
    active: Arc<Active>,
    settings: Settings,

    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    listeners: Vec<(Transport, SocketAddr)>,
}

impl Server {
    /// Builds a server from `config`, loading its zones into the cache.
    /// Nothing listens until [`Server::start`] is called.
    pub fn new(config: ServerConfig) -> Result<Server> {
        config.validate()?;

        let cache = Arc::new(Cache::new(
            config.prune_delay(),
            config.prune_threshold(),
            config.max_entries,
        ));

        let (handler, receivers, active) = Handler::new(cache.clone(), config.queue_size);
        let settings = Settings {
            timeout: config.timeout(),
            retry_delay: config.retry_delay(),
            keepalive: config.keepalive(),
            tls: client_config(config.insecure_skip_verify),
            ids: Arc::new(IdGenerator::new()),
        };

        let (stop, _) = watch::channel(false);

        let server = Server {
            config,
            cache,
            zones: Mutex::new(Vec::new()),
            handler: Arc::new(handler),
            receivers,
            active,
            settings,
            stop,
            tasks: Vec::new(),
            listeners: Vec::new(),
        };

        for zone in &server.config.zones {
            server.add_zone(Zone::load(&zone.file, &zone.origin)?);
        }

        Ok(server)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    fn zones(&self) -> std::sync::MutexGuard<'_, Vec<Zone>> {
        self.zones.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serves the zone's answers from now on.
    pub fn add_zone(&self, zone: Zone) {
        for message in zone.messages() {
            if let Some(question) = message.question() {
                self.cache.upsert(Answer::local(question.clone(), message.clone()));
            }
        }

        info!(
            "serving zone '{}' with {} answers",
            zone.origin(),
            zone.messages().len()
        );
        self.zones().push(zone);
    }

    /// Adds a record to the zone that most closely encloses it.
    pub fn add_record(&self, record: Record) -> Result<()> {
        self.edit(&record.name.clone(), |zone| zone.add(record))
    }

    /// Removes a record from the zone that most closely encloses it.
    pub fn remove_record(&self, record: &Record) -> Result<()> {
        self.edit(&record.name, |zone| zone.remove(record))
    }

    /// Applies `f` to the closest zone enclosing `name`, then refreshes the
    /// cached answers it changed.
    fn edit<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Zone) -> Result<Vec<Question>>,
    {
        let mut zones = self.zones();

        let zone = zones
            .iter_mut()
            .filter(|z| name::is_subdomain(name, z.origin()))
            .max_by_key(|z| z.origin().len())
            .ok_or_else(|| Error::InvalidArgument(format!("no zone contains '{}'", name)))?;

        for question in f(zone)? {
            match zone.message(&question) {
                Some(message) => {
                    self.cache.upsert(Answer::local(question, message.clone()));
                }
                None => {
                    self.cache.remove(&question);
                }
            }
        }

        Ok(())
    }

    /// Loads the cache snapshot, opens the listeners and starts the
    /// forwarders. Fails if a listener can't be bound.
    pub async fn start(&mut self) -> Result<()> {
        self.load_cache();

        let config = self.config.clone();

        if let Some(addr) = config.listen_addr(config.udp_port) {
            self.listen_udp(addr).await?;
        }
        if let Some(addr) = config.listen_addr(config.tcp_port) {
            self.listen_tcp(addr).await?;
        }

        let dot = config.listen_addr(config.dot_port);
        let doh = config.listen_addr(config.doh_port);
        match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => {
                let tls = server_config(cert, key)?;
                if let Some(addr) = dot {
                    self.listen_tls(addr, tls.clone()).await?;
                }
                if let Some(addr) = doh {
                    self.listen_doh(addr, Some(tls)).await?;
                }
            }
            _ if dot.is_some() || doh.is_some() => {
                warn!("no tls_cert and tls_key configured, not starting DoT or DoH")
            }
            _ => (),
        }

        let upstreams = config.upstreams()?;
        if upstreams.is_empty() {
            warn!("no upstreams configured, only local answers will be served");
        }
        for upstream in upstreams {
            self.add_forwarder(upstream);
        }

        self.start_pruner();
        Ok(())
    }

    /// Listens for UDP queries on `addr`, returning the bound address.
    pub async fn listen_udp(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;

        let task = tokio::spawn(udp::serve(socket, self.handler.clone(), self.stop.subscribe()));
        Ok(self.listening(Transport::Udp, local, task))
    }

    /// Listens for TCP queries on `addr`, returning the bound address.
    pub async fn listen_tcp(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let task = tokio::spawn(tcp::serve(listener, self.handler.clone(), self.stop.subscribe()));
        Ok(self.listening(Transport::Tcp, local, task))
    }

    /// Listens for DNS-over-TLS queries on `addr`, returning the bound address.
    pub async fn listen_tls(
        &mut self,
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let task = tokio::spawn(tls::serve(
            listener,
            tls,
            self.handler.clone(),
            self.stop.subscribe(),
        ));
        Ok(self.listening(Transport::Tls, local, task))
    }

    /// Listens for DNS-over-HTTPS queries on `addr`, returning the bound
    /// address. Without `tls` it serves plain HTTP.
    pub async fn listen_doh(
        &mut self,
        addr: SocketAddr,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let task = tokio::spawn(doh::serve(
            listener,
            tls,
            self.handler.clone(),
            self.stop.subscribe(),
        ));
        Ok(self.listening(Transport::Https, local, task))
    }

    fn listening(&mut self, transport: Transport, addr: SocketAddr, task: JoinHandle<()>) -> SocketAddr {
        info!("listening for {} on {}", transport, addr);
        self.tasks.push(task);
        self.listeners.push((transport, addr));
        addr
    }

    /// The transports being listened on, and their bound addresses.
    pub fn listeners(&self) -> &[(Transport, SocketAddr)] {
        &self.listeners
    }

    /// Starts a forwarder relaying queued queries to `upstream`.
    pub fn add_forwarder(&mut self, upstream: Upstream) {
        let forwarder = Forwarder::new(
            upstream,
            self.settings.clone(),
            self.receivers.clone(),
            self.cache.clone(),
            self.active.clone(),
            self.stop.subscribe(),
        );
        self.tasks.push(tokio::spawn(forwarder.run()));
    }

    fn start_pruner(&mut self) {
        let cache = self.cache.clone();
        let mut stop = self.stop.subscribe();

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.prune_delay());
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let pruned = cache.prune();
                        debug!("pruned {} answers, {} remain", pruned, cache.len());
                    }
                    _ = stop.changed() => break,
                }
            }
        }));
    }

    fn load_cache(&self) {
        let path = match &self.config.cache_file {
            Some(path) => path,
            None => return,
        };

        match File::open(path).and_then(|f| self.cache.load(io::BufReader::new(f))) {
            Ok(n) => info!("loaded {} answers from {}", n, path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no cache snapshot at {}", path.display())
            }
            Err(e) => warn!("failed to load cache from {}: {}", path.display(), e),
        }
    }

    /// Stops the listeners and forwarders, waits for them to finish, then
    /// saves the cache snapshot.
    pub async fn stop(self) -> Result<()> {
        info!("stopping");
        // Only fails once every task has already exited.
        let _ = self.stop.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("task failed: {}", e);
            }
        }

        if let Some(path) = &self.config.cache_file {
            let file = io::BufWriter::new(File::create(path)?);
            let n = self.cache.save(file)?;
            info!("saved {} answers to {}", n, path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Resource, Type};
    use pretty_assertions::assert_eq;

    const ZONE: &str = "\
$TTL 300
@    IN SOA ns1 admin 1 7200 3600 1209600 300
@    IN NS  ns1
ns1  IN A   192.0.2.53
www  IN A   192.0.2.80
";

    fn server() -> Server {
        let config = ServerConfig {
            upstreams: Vec::new(),
            ..Default::default()
        };
        let server = Server::new(config).unwrap();
        server.add_zone(Zone::parse(ZONE, "example.com").unwrap());
        server
    }

    #[test]
    fn test_zone_answers_cached() {
        let server = server();
        let answer = server
            .cache()
            .get(&Question::new("www.example.com", Type::A, Class::Internet))
            .unwrap();
        assert!(answer.message.aa);
        assert_eq!(answer.message.answers.len(), 1);
    }

    #[test]
    fn test_edit_records() {
        let server = server();
        let question = Question::new("mail.example.com", Type::A, Class::Internet);
        let record = Record::new(
            "mail.example.com",
            Class::Internet,
            300,
            Resource::A("192.0.2.25".parse().unwrap()),
        );

        assert!(server.cache().get(&question).is_none());

        server.add_record(record.clone()).unwrap();
        assert_eq!(server.cache().get(&question).unwrap().message.answers, vec![record.clone()]);

        server.remove_record(&record).unwrap();
        assert!(server.cache().get(&question).is_none());

        let outside = Record::new(
            "www.example.org",
            Class::Internet,
            300,
            Resource::A("192.0.2.1".parse().unwrap()),
        );
        assert!(matches!(server.add_record(outside), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_soa_edit_refreshes_zone_ttls() {
        let server = server();
        let www = Question::new("www.example.com", Type::A, Class::Internet);
        let ttl = |question: &Question| server.cache().get(question).unwrap().message.answers[0].ttl;
        assert_eq!(ttl(&www), 300);

        let soa = Record::new(
            "example.com",
            Class::Internet,
            300,
            Resource::SOA(crate::resource::SOA {
                mname: "ns1.example.com".to_string(),
                rname: "admin.example.com".to_string(),
                serial: 2,
                refresh: 7200,
                retry: 3600,
                expire: 1209600,
                minimum: 7200,
            }),
        );
        server.add_record(soa).unwrap();

        assert_eq!(ttl(&www), 7200);
        assert_eq!(ttl(&Question::new("example.com", Type::NS, Class::Internet)), 7200);
        assert_eq!(ttl(&Question::new("example.com", Type::SOA, Class::Internet)), 7200);
    }

    #[tokio::test]
    async fn test_snapshot_saved_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snap");

        let config = ServerConfig {
            address: "127.0.0.1".parse().unwrap(),
            udp_port: 0,
            tcp_port: 0,
            dot_port: 0,
            doh_port: 0,
            cache_file: Some(path.clone()),
            ..Default::default()
        };

        let mut server = Server::new(config).unwrap();
        server.start().await.unwrap();
        assert!(server.listeners().is_empty());
        server.stop().await.unwrap();

        assert!(path.exists());
    }
}
