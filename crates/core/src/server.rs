//! High-level server orchestrator (§3 `Server` entity, §9 design notes).
//!
//! Bundles the mount registry, session manager, and RTP port allocator
//! into one value constructed once and threaded through every connection
//! handler — no hidden statics.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::mount::MountRegistry;
use crate::session::SessionManager;
use crate::transport::tcp;
use crate::transport::udp::PortAllocator;

/// Owns every piece of shared state a connection handler needs and drives
/// the TCP accept loop on a background thread.
pub struct Server {
    config: Arc<Config>,
    mounts: MountRegistry,
    sessions: SessionManager,
    port_allocator: Arc<PortAllocator>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let port_allocator = Arc::new(PortAllocator::new(config.rtp_port_min, config.rtp_port_max));
        Self {
            config: Arc::new(config),
            mounts: MountRegistry::new(),
            sessions: SessionManager::new(),
            port_allocator,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listen socket and spawn the accept loop on a background
    /// thread. Returns once the socket is bound and listening.
    pub fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr())?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let mounts = self.mounts.clone();
        let sessions = self.sessions.clone();
        let port_allocator = self.port_allocator.clone();
        let read_timeout = Duration::from_secs(self.config.read_timeout_seconds);
        let running = self.running.clone();
        let addr = self.config.bind_addr();

        tracing::info!(%addr, "RTSP server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, mounts, sessions, port_allocator, read_timeout, running);
        });

        Ok(())
    }

    /// Signal the accept loop to stop. Existing connections run to their
    /// own completion; this does not forcibly close them.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }
}
