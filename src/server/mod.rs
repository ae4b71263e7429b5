// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server: the accept loop and its supporting method registry and
//! deadline-GC shards. Grounded on `server.go`'s `Server`/`NewServer`/`Serve`.

mod deadline_gc;
mod handler;
pub mod registry;

use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;

use crate::{cfg::config::ServerConfig, monitor::ServerMonitor, utils::ConnIdGen};

pub use deadline_gc::DeadlineShards;
pub use handler::ServerConnection;
pub use registry::{MethodRegistry, MethodRegistryBuilder};

/// Owns the listening socket, the frozen method table, and the deadline-GC
/// shards every accepted connection is tracked in. One `Server` per bound
/// address, matching `NewServer`'s one-`Server`-per-`net.Listener` shape.
pub struct Server {
    registry: Arc<MethodRegistry>,
    bind_address: String,
    idle_timeout: Duration,
    deadline_shards: Arc<DeadlineShards>,
    monitor: Arc<ServerMonitor>,
    conn_ids: ConnIdGen,
}

impl Server {
    pub fn new(config: ServerConfig, registry: MethodRegistry) -> Self {
        Server {
            registry: Arc::new(registry),
            bind_address: config.bind_address,
            idle_timeout: config.idle_timeout,
            deadline_shards: DeadlineShards::new(config.deadline_gc_shards, config.deadline_gc_interval),
            monitor: Arc::new(ServerMonitor::default()),
            conn_ids: ConnIdGen::new(),
        }
    }

    pub fn monitor(&self) -> Arc<ServerMonitor> {
        self.monitor.clone()
    }

    /// Binds `bind_address` and accepts connections until the listener
    /// errors, spawning one `serve_connection` reader loop per socket and
    /// tracking it in the deadline-GC shards until it exits on its own.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        loop {
            let (stream, _peer) = listener.accept().await?;
            let id = self.conn_ids.next();
            let shards = self.deadline_shards.clone();
            let on_exit: Arc<dyn Fn(u64) + Send + Sync> = Arc::new(move |id| shards.untrack(id));

            let conn = handler::serve_connection(
                id,
                stream,
                self.registry.clone(),
                self.idle_timeout,
                self.monitor.clone(),
                on_exit,
            );
            self.deadline_shards.track(conn);
        }
    }

    pub fn shutdown(&self) {
        self.deadline_shards.shutdown();
    }
}
