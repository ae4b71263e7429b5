// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level configuration for a process that runs a client, a server, or
/// both against the same address book.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Pool, timeout, and retry settings for outgoing calls.
    pub client: ClientConfig,
    /// Accept-loop and deadline-GC settings for incoming calls.
    pub server: ServerConfig,
}

/// Client-side settings: which endpoints to dial and how the connection
/// pool behind each one is shaped.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    /// Endpoints this client may dial, addressed as `host:port`.
    #[serde(rename = "Endpoints")]
    pub endpoints: Vec<String>,
    /// Global connect/read/write timeouts, overridable per service/method
    /// at runtime via `TimeoutResolver`.
    #[serde(rename = "Timeouts")]
    pub timeouts: TimeoutsConfig,
    /// Per-endpoint connection pool shape.
    #[serde(rename = "Pool")]
    pub pool: PoolConfig,
    /// Call retry policy.
    #[serde(rename = "Retry")]
    pub retry: RetryConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct TimeoutsConfig {
    #[serde(rename = "ConnectTimeout", with = "serde_secs")]
    pub connect: Duration,
    #[serde(rename = "ReadTimeout", with = "serde_secs")]
    pub read: Duration,
    #[serde(rename = "WriteTimeout", with = "serde_secs")]
    pub write: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct PoolConfig {
    #[serde(rename = "MaxOpenConns")]
    pub max_open_conns: usize,
    #[serde(rename = "MaxIdleConns")]
    pub max_idle_conns: usize,
    #[serde(rename = "PingInterval", with = "serde_secs")]
    pub ping_interval: Duration,
    #[serde(rename = "PendingMailboxCapacity")]
    pub pending_mailbox_capacity: usize,
    #[serde(rename = "DeadlineGcInterval", with = "serde_secs")]
    pub deadline_gc_interval: Duration,
    /// The peer's idle timeout, used only to bound the idle-ping
    /// eligibility window (`pingInterval < idle < 2 * PeerIdleTimeout`).
    /// Matches the reference implementation's shared `DefaultServerIdleTimeout`
    /// constant, exposed here since client and server are independently
    /// configured processes in this runtime.
    #[serde(rename = "PeerIdleTimeout", with = "serde_secs")]
    pub peer_idle_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Number of retry attempts after the first, per `Call`.
    #[serde(rename = "Budget")]
    pub budget: usize,
    #[serde(rename = "Backoff", with = "serde_millis")]
    pub backoff: Duration,
}

/// Server-side settings: where to listen and how stale connections are
/// reclaimed.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(rename = "BindAddress")]
    pub bind_address: String,
    #[serde(rename = "IdleTimeout", with = "serde_secs")]
    pub idle_timeout: Duration,
    #[serde(rename = "DeadlineGcShards")]
    pub deadline_gc_shards: usize,
    #[serde(rename = "DeadlineGcInterval", with = "serde_secs")]
    pub deadline_gc_interval: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// The defaults from the RPC runtime's own reference implementation:
    /// 30 max open / 20 max idle connections, 30s connect/read/write
    /// timeouts, a 50s idle ping, a 300s server idle timeout, and a single
    /// retry attempt with a 5ms backoff.
    pub fn defaults(bind_address: impl Into<String>) -> Self {
        Config {
            client: ClientConfig {
                endpoints: Vec::new(),
                timeouts: TimeoutsConfig {
                    connect: Duration::from_secs(30),
                    read: Duration::from_secs(30),
                    write: Duration::from_secs(30),
                },
                pool: PoolConfig {
                    max_open_conns: 30,
                    max_idle_conns: 20,
                    ping_interval: Duration::from_secs(50),
                    pending_mailbox_capacity: 1000,
                    deadline_gc_interval: Duration::from_secs(1),
                    peer_idle_timeout: Duration::from_secs(300),
                },
                retry: RetryConfig {
                    budget: 1,
                    backoff: Duration::from_millis(5),
                },
            },
            server: ServerConfig {
                bind_address: bind_address.into(),
                idle_timeout: Duration::from_secs(300),
                deadline_gc_shards: 10,
                deadline_gc_interval: Duration::from_secs(1),
            },
        }
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.client.pool.max_open_conns >= 1,
            "client.pool.MaxOpenConns must be >= 1"
        );
        ensure!(
            self.client.pool.max_idle_conns <= self.client.pool.max_open_conns,
            "client.pool.MaxIdleConns must not exceed MaxOpenConns"
        );
        ensure!(
            self.client.pool.pending_mailbox_capacity >= 1,
            "client.pool.PendingMailboxCapacity must be >= 1"
        );
        ensure!(
            !self.client.timeouts.connect.is_zero(),
            "client.timeouts.ConnectTimeout must be > 0"
        );
        ensure!(
            self.server.deadline_gc_shards >= 1,
            "server.DeadlineGcShards must be >= 1"
        );
        if !self.server.bind_address.is_empty() {
            ensure!(
                self.server.bind_address.contains(':'),
                "server.BindAddress must be a host:port pair"
            );
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds,
/// used for the sub-second retry backoff.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
