pub mod broadcast;
pub mod guild_member;
pub mod lang;
pub mod packet;
pub mod raviente;
pub mod relay;
pub mod semaphore;
pub mod session;
pub mod stage;
pub mod user_binary;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::network::ClientContext;
use raviente::{participation_multiplier, Raviente};
use relay::{format_relay_message, ChatRelay};
use semaphore::SemaphoreRegistry;
use session::{Session, SessionId};
use stage::StageRegistry;
use user_binary::UserBinaryStore;

/// Connections waiting between the acceptor and the session manager.
const ACCEPT_BACKLOG: usize = 16;

/// Construction parameters for one channel.
pub struct ChannelSettings {
    pub id: u16,
    pub global_id: String,
    pub name: String,
    /// Advertised address; also the bind host
    pub ip: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub send_queue_capacity: usize,
    pub dict: HashMap<String, String>,
    pub chat_relay: Option<Arc<dyn ChatRelay>>,
    pub relay_enabled: bool,
    pub db: Option<PgPool>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            id: 0,
            global_id: String::new(),
            name: String::new(),
            ip: "127.0.0.1".to_string(),
            port: 0,
            send_queue_capacity: 20,
            dict: lang::lang_strings("en"),
            chat_relay: None,
            relay_enabled: false,
            db: None,
        }
    }
}

/// Shutdown flag and session set share one lock: the accept and manage
/// loops read the flag together with the set.
#[derive(Default)]
struct SessionSet {
    shutting_down: bool,
    sessions: HashMap<SessionId, Arc<Session>>,
}

/// One channel shard of a world.
pub struct ChannelServer {
    pub id: u16,
    pub global_id: String,
    pub name: String,
    pub ip: String,
    port: u16,
    send_queue_capacity: usize,

    state: Mutex<SessionSet>,
    shutdown_tx: watch::Sender<bool>,
    delete_tx: mpsc::UnboundedSender<SessionId>,
    delete_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionId>>>,

    /// Every channel of the world, this one included
    channels: OnceLock<Vec<Weak<ChannelServer>>>,

    pub stages: StageRegistry,
    pub semaphores: SemaphoreRegistry,
    pub raviente: Raviente,
    pub user_binary: UserBinaryStore,

    dict: HashMap<String, String>,
    chat_relay: Option<Arc<dyn ChatRelay>>,
    relay_enabled: bool,
    db: Option<PgPool>,
}

/// Handles for a started channel's background loops.
pub struct RunningChannel {
    pub local_addr: SocketAddr,
    pub acceptor: JoinHandle<()>,
    pub manager: JoinHandle<()>,
}

impl RunningChannel {
    /// Wait for both loops to exit.
    pub async fn wait(self) -> Result<()> {
        self.acceptor.await.context("acceptor task failed")?;
        self.manager.await.context("session manager task failed")?;
        Ok(())
    }
}

impl ChannelServer {
    pub fn new(settings: ChannelSettings) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let (delete_tx, delete_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            id: settings.id,
            global_id: settings.global_id,
            name: settings.name,
            ip: settings.ip,
            port: settings.port,
            send_queue_capacity: settings.send_queue_capacity,
            state: Mutex::new(SessionSet::default()),
            shutdown_tx,
            delete_tx,
            delete_rx: Mutex::new(Some(delete_rx)),
            channels: OnceLock::new(),
            stages: StageRegistry::seeded(),
            semaphores: SemaphoreRegistry::new(),
            raviente: Raviente::new(),
            user_binary: UserBinaryStore::new(),
            dict: settings.dict,
            chat_relay: settings.chat_relay,
            relay_enabled: settings.relay_enabled,
            db: settings.db,
        })
    }

    /// Bind the listener and spawn the accept and session-manager loops.
    /// A bind failure is the only fatal error.
    pub async fn start(self: &Arc<Self>) -> Result<RunningChannel> {
        if self.is_shutting_down().await {
            bail!("channel {} is shutting down", self.id);
        }
        let delete_rx = self
            .delete_rx
            .lock()
            .await
            .take()
            .with_context(|| format!("channel {} already started", self.id))?;

        let bind_addr = format!("{}:{}", self.ip, self.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Cannot bind channel {} on {}", self.id, bind_addr))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            "[channel] [ready] id={} name={} addr={}",
            self.id, self.name, local_addr
        );

        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let acceptor = tokio::spawn(Arc::clone(self).accept_clients(listener, accept_tx, shutdown_rx));
        let manager = tokio::spawn(Arc::clone(self).manage_sessions(accept_rx, delete_rx));

        Ok(RunningChannel { local_addr, acceptor, manager })
    }

    /// Cooperative shutdown: the acceptor closes the listener and the handoff
    /// queue on its next wakeup, then the manager exits. Live sessions are
    /// left to finish on their own.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
        }
        self.shutdown_tx.send_replace(true);
        tracing::info!("[channel] [shutdown] id={}", self.id);
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    async fn accept_clients(
        self: Arc<Self>,
        listener: TcpListener,
        accept_tx: mpsc::Sender<(TcpStream, SocketAddr)>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        loop {
            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = shutdown_rx.changed() => break,
            };
            match accepted {
                Ok(conn) => {
                    if accept_tx.send(conn).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if self.is_shutting_down().await {
                        break;
                    }
                    tracing::warn!("[channel] [accept_error] id={} err={}", self.id, e);
                }
            }
        }
        drop(listener);
        drop(accept_tx);
        tracing::info!("[channel] [acceptor_stopped] id={}", self.id);
    }

    async fn manage_sessions(
        self: Arc<Self>,
        mut accept_rx: mpsc::Receiver<(TcpStream, SocketAddr)>,
        mut delete_rx: mpsc::UnboundedReceiver<SessionId>,
    ) {
        loop {
            tokio::select! {
                conn = accept_rx.recv() => match conn {
                    Some((stream, peer)) => self.register_session(stream, peer).await,
                    None => {
                        if !self.is_shutting_down().await {
                            tracing::warn!("[channel] [accept_closed] id={} acceptor exited unexpectedly", self.id);
                        }
                        break;
                    }
                },
                Some(id) = delete_rx.recv() => self.unregister_session(id).await,
            }
        }
        tracing::info!("[channel] [manager_stopped] id={}", self.id);
    }

    async fn register_session(&self, stream: TcpStream, peer: SocketAddr) {
        let (session, send_rx) = Session::new(
            SessionId::next(),
            Some(peer),
            ClientContext::default(),
            self.send_queue_capacity,
        );
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                tracing::debug!("[channel] [connect_rejected] id={} peer={}", self.id, peer);
                return;
            }
            state.sessions.insert(session.id(), Arc::clone(&session));
        }
        tracing::info!(
            "[channel] [connect] id={} session={} peer={}",
            self.id, session.id(), peer
        );
        session.start(stream, send_rx, self.delete_tx.clone());
    }

    async fn unregister_session(&self, id: SessionId) {
        let removed = self.state.lock().await.sessions.remove(&id);
        if removed.is_some() {
            tracing::info!("[channel] [disconnect] id={} session={}", self.id, id);
        }
        // Session-set lock is released before the semaphore lock is taken.
        self.semaphores.remove_session(id).await;
    }

    #[cfg(test)]
    pub(crate) async fn insert_session(&self, session: Arc<Session>) {
        self.state.lock().await.sessions.insert(session.id(), session);
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Snapshot of the current session set.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.state.lock().await.sessions.values().cloned().collect()
    }

    /// Install the world's channel list. Only the first call takes effect.
    pub fn set_channels(&self, channels: &[Arc<ChannelServer>]) {
        let weak = channels.iter().map(Arc::downgrade).collect();
        if self.channels.set(weak).is_err() {
            tracing::warn!("[channel] [set_channels] id={} channel list already set", self.id);
        }
    }

    /// Live channels of this world, this one included.
    pub fn channels(&self) -> Vec<Arc<ChannelServer>> {
        self.channels
            .get()
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Find a logged-in character on any channel of the world. Each channel's
    /// session set is locked on its own, one after another. Char id 0 means
    /// "not logged in" and never matches.
    pub async fn find_session_by_char_id(self: &Arc<Self>, char_id: u32) -> Option<Arc<Session>> {
        if char_id == 0 {
            return None;
        }
        let mut channels = self.channels();
        if channels.is_empty() {
            channels.push(Arc::clone(self));
        }
        for channel in channels {
            let state = channel.state.lock().await;
            if let Some(s) = state.sessions.values().find(|s| s.char_id() == char_id) {
                return Some(Arc::clone(s));
            }
        }
        None
    }

    /// Pool for guild membership queries, when a database is configured.
    pub fn db(&self) -> Option<&PgPool> {
        self.db.as_ref()
    }

    /// Localised string for `key`.
    pub fn lang(&self, key: &str) -> Option<&str> {
        self.dict.get(key).map(String::as_str)
    }

    /// Current Raviente difficulty multiplier. Reads the register and the
    /// semaphore registry under their own locks, never both at once.
    pub async fn raviente_multiplier(&self) -> u32 {
        let max_players = self.raviente.max_players().await;
        let occupancy = self.semaphores.raviente_occupancy().await;
        participation_multiplier(max_players, occupancy)
    }

    /// Forward a character's chat line to the external relay, if enabled.
    pub fn relay_chat(&self, char_name: &str, content: &str) {
        if !self.relay_enabled {
            return;
        }
        if let Some(relay) = &self.chat_relay {
            relay.relay(format_relay_message(char_name, content));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::relay::QueueRelay;

    #[tokio::test]
    async fn test_new_channel_has_seeded_stages() {
        let server = ChannelServer::new(ChannelSettings::default());
        assert_eq!(server.stages.len().await, 7);
        assert_eq!(server.session_count().await, 0);
        assert!(server.semaphores.is_empty().await);
    }

    #[tokio::test]
    async fn test_raviente_multiplier() {
        let server = ChannelServer::new(ChannelSettings::default());
        assert_eq!(server.raviente_multiplier().await, 0);

        server.raviente.lock().await.register.max_players = 32;
        server.semaphores.create("hs_l0u3B51J9k3", 32).await;
        for i in 0..6 {
            server.semaphores.join("hs_l0u3B51J9k3", SessionId(1000 + i)).await.unwrap();
        }
        assert_eq!(server.raviente_multiplier().await, 4);
    }

    #[tokio::test]
    async fn test_find_session_by_char_id_across_channels() {
        let a = ChannelServer::new(ChannelSettings { id: 1, ..Default::default() });
        let b = ChannelServer::new(ChannelSettings { id: 2, ..Default::default() });
        let all = vec![Arc::clone(&a), Arc::clone(&b)];
        a.set_channels(&all);
        b.set_channels(&all);

        let (s, _rx) = Session::new(SessionId::next(), None, ClientContext::default(), 4);
        s.set_char_id(9001);
        b.insert_session(Arc::clone(&s)).await;

        let found = a.find_session_by_char_id(9001).await.unwrap();
        assert_eq!(found.id(), s.id());
        assert!(a.find_session_by_char_id(1).await.is_none());
    }

    #[tokio::test]
    async fn test_find_session_ignores_logged_out() {
        let server = ChannelServer::new(ChannelSettings::default());
        let (s, _rx) = Session::new(SessionId::next(), None, ClientContext::default(), 4);
        server.insert_session(s).await;

        assert!(server.find_session_by_char_id(0).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_leaves_semaphores() {
        let server = ChannelServer::new(ChannelSettings::default());
        let (s, _rx) = Session::new(SessionId::next(), None, ClientContext::default(), 4);
        server.insert_session(Arc::clone(&s)).await;
        server.semaphores.create("quest_a", 4).await;
        server.semaphores.join("quest_a", s.id()).await.unwrap();

        server.unregister_session(s.id()).await;
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.semaphores.occupancy("quest_a").await, Some(0));
    }

    #[tokio::test]
    async fn test_relay_only_when_enabled() {
        let (relay, mut rx) = QueueRelay::new();
        let relay: Arc<dyn ChatRelay> = Arc::new(relay);

        let off = ChannelServer::new(ChannelSettings {
            chat_relay: Some(Arc::clone(&relay)),
            ..Default::default()
        });
        off.relay_chat("Hunter", "hello");
        assert!(rx.try_recv().is_err());

        let on = ChannelServer::new(ChannelSettings {
            chat_relay: Some(relay),
            relay_enabled: true,
            ..Default::default()
        });
        on.relay_chat("Hunter", "hello");
        assert_eq!(rx.try_recv().unwrap(), "**Hunter**: hello");
    }

    #[tokio::test]
    async fn test_start_after_shutdown_refused() {
        let server = ChannelServer::new(ChannelSettings::default());
        server.shutdown().await;
        assert!(server.start().await.is_err());
    }
}
