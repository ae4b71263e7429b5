use std::{sync::Arc, time::Duration};

use rpcmux::{
    cfg::config::{ClientConfig, PoolConfig, RetryConfig, ServerConfig, TimeoutsConfig},
    server::{MethodRegistry, Server},
};

/// Binds a server on an ephemeral loopback port, starts its accept loop in
/// the background, and returns the address it is listening on.
pub async fn start_server(registry: MethodRegistry) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let cfg = ServerConfig {
        bind_address: addr.clone(),
        idle_timeout: Duration::from_secs(30),
        deadline_gc_shards: 2,
        deadline_gc_interval: Duration::from_millis(200),
    };
    let server = Arc::new(Server::new(cfg, registry));
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    // Give the accept loop a moment to bind before the first dial.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// A client config tuned for fast tests: short timeouts, a small pool, and
/// a single retry.
pub fn client_config(endpoint: String) -> ClientConfig {
    ClientConfig {
        endpoints: vec![endpoint],
        timeouts: TimeoutsConfig {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(500),
            write: Duration::from_millis(500),
        },
        pool: PoolConfig {
            max_open_conns: 4,
            max_idle_conns: 4,
            ping_interval: Duration::from_secs(60),
            pending_mailbox_capacity: 16,
            deadline_gc_interval: Duration::from_secs(60),
            peer_idle_timeout: Duration::from_secs(300),
        },
        retry: RetryConfig {
            budget: 1,
            backoff: Duration::from_millis(5),
        },
    }
}
