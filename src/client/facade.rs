// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `Client`: endpoint selection, timeout resolution, and the `Call`
//! orchestration loop.
//!
//! Grounded on `client/client.rs`'s `ClientConnection::send_request`, lifted
//! one layer up: where that method drove a single fixed connection, this
//! façade first resolves *which* pool to borrow a [`ConnectionDriver`] from
//! and for how long, then hands the actual framing off to
//! [`crate::runtime::driver::ConnectionDriver::transfer_call`]. The retry
//! loop and its single shared timer are grounded on
//! `examples/original_source/timeWheel/time.go`'s caller pattern of one
//! `AddTimer` call reused across an operation's attempts rather than reset
//! per attempt.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    cfg::config::ClientConfig,
    error::{CodecError, RpcError, well_known},
    retry::can_retry,
    runtime::{ConnectionPool, driver::CallOutcome},
    timer_wheel::TimerWheel,
    utils::random_index,
    wire::CallType,
};

/// Resolved connect/read/write timeouts for one `(service, method)` pair.
#[derive(Debug, Clone, Copy)]
struct ResolvedTimeouts {
    connect: Duration,
    read: Duration,
    write: Duration,
}

/// The RPC client: one connection pool per endpoint, a three-tier
/// (method > service > global) timeout override table, and a shared timer
/// wheel for per-call deadlines.
pub struct Client {
    config: ClientConfig,
    pools: DashMap<String, Arc<ConnectionPool>>,
    timer: TimerWheel,
    /// Overrides keyed by exact `(service, method)`, set via
    /// [`Client::set_method_timeout`].
    method_overrides: DashMap<(String, String), ResolvedTimeouts>,
    /// Overrides keyed by `service`, set via [`Client::set_service_timeout`].
    service_overrides: DashMap<String, ResolvedTimeouts>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config,
            pools: DashMap::new(),
            timer: TimerWheel::with_defaults(),
            method_overrides: DashMap::new(),
            service_overrides: DashMap::new(),
        }
    }

    /// Overrides the connect/read/write timeouts for every method of
    /// `service`, taking effect on the next call that does not already have
    /// a more specific method-level override.
    pub fn set_service_timeout(
        &self,
        service: impl Into<String>,
        connect: Duration,
        read: Duration,
        write: Duration,
    ) {
        self.service_overrides.insert(
            service.into(),
            ResolvedTimeouts {
                connect,
                read,
                write,
            },
        );
    }

    /// Overrides the connect/read/write timeouts for one exact
    /// `(service, method)` pair, taking precedence over any service-level
    /// override.
    pub fn set_method_timeout(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        connect: Duration,
        read: Duration,
        write: Duration,
    ) {
        self.method_overrides.insert(
            (service.into(), method.into()),
            ResolvedTimeouts {
                connect,
                read,
                write,
            },
        );
    }

    /// Issues a call expecting a decoded reply.
    pub async fn call<A, R>(&self, service: &str, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match self.call_raw(None, service, method, args, CallType::Normal).await? {
            CallOutcome::Reply(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CodecError::Decode(e).into()),
            CallOutcome::Ack => Err(well_known::internal(
                "server acked a normal call without a data reply",
            )),
            CallOutcome::Error(e) => Err(e),
        }
    }

    /// Issues a call against a specific endpoint rather than one chosen
    /// uniformly at random, bypassing [`Client::pick_endpoint`].
    pub async fn call_to<A, R>(
        &self,
        endpoint: &str,
        service: &str,
        method: &str,
        args: &A,
    ) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match self
            .call_raw(Some(endpoint), service, method, args, CallType::Normal)
            .await?
        {
            CallOutcome::Reply(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CodecError::Decode(e).into()),
            CallOutcome::Ack => Err(well_known::internal(
                "server acked a normal call without a data reply",
            )),
            CallOutcome::Error(e) => Err(e),
        }
    }

    /// Issues a send-only call: the caller is done as soon as the server
    /// acks receipt, with no data reply expected.
    pub async fn call_oneway<A>(&self, service: &str, method: &str, args: &A) -> Result<(), RpcError>
    where
        A: Serialize,
    {
        match self
            .call_raw(None, service, method, args, CallType::SendOnly)
            .await?
        {
            CallOutcome::Ack | CallOutcome::Reply(_) => Ok(()),
            CallOutcome::Error(e) => Err(e),
        }
    }

    fn pick_endpoint(&self) -> Result<String, RpcError> {
        if self.config.endpoints.is_empty() {
            return Err(well_known::no_endpoints());
        }
        let idx = random_index(self.config.endpoints.len());
        Ok(self.config.endpoints[idx].clone())
    }

    fn pool_for(&self, endpoint: &str) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.get(endpoint) {
            return pool.clone();
        }
        self.pools
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                ConnectionPool::new(endpoint.to_string(), self.config.pool, self.config.timeouts.write)
            })
            .clone()
    }

    /// Three-tier lookup, memoising the winning tier under the exact
    /// `(service, method)` key so repeat calls skip the service-table probe.
    fn resolve_timeouts(&self, service: &str, method: &str) -> ResolvedTimeouts {
        let key = (service.to_string(), method.to_string());
        if let Some(t) = self.method_overrides.get(&key) {
            return *t;
        }
        let resolved = match self.service_overrides.get(service) {
            Some(t) => *t,
            None => ResolvedTimeouts {
                connect: self.config.timeouts.connect,
                read: self.config.timeouts.read,
                write: self.config.timeouts.write,
            },
        };
        self.method_overrides.insert(key, resolved);
        resolved
    }

    /// The shared orchestration body behind [`Client::call`],
    /// [`Client::call_to`], and [`Client::call_oneway`].
    ///
    /// Steps follow the reference implementation's `Call` one for one:
    /// pick an endpoint, resolve timeouts, acquire a driver without sharing,
    /// transfer the request, race it against a single coarse timer, and on
    /// a retryable failure reacquire (now allowed to share an in-flight
    /// connection) and transfer again against that same timer.
    async fn call_raw<A>(
        &self,
        endpoint_override: Option<&str>,
        service: &str,
        method: &str,
        args: &A,
        call_type: CallType,
    ) -> Result<CallOutcome, RpcError>
    where
        A: Serialize,
    {
        let endpoint = match endpoint_override {
            Some(e) => e.to_string(),
            None => self.pick_endpoint()?,
        };
        let timeouts = self.resolve_timeouts(service, method);
        let pool = self.pool_for(&endpoint);
        let body = Bytes::from(
            serde_json::to_vec(args).map_err(|e| RpcError::from(CodecError::Decode(e)))?,
        );

        let mut driver = pool.acquire(timeouts.connect, false).await?;
        let deadline = self.timer.add_timer(timeouts.read + timeouts.write);
        let mut retries_left = self.config.retry.budget;

        loop {
            let transfer = driver.transfer_call(service, method, call_type, body.clone(), timeouts.write);
            let pending = match transfer {
                Ok(p) => p,
                Err(e) => {
                    if retries_left > 0 && can_retry(&e) {
                        retries_left -= 1;
                        tokio::time::sleep(self.config.retry.backoff).await;
                        driver = pool.acquire(timeouts.connect, true).await?;
                        continue;
                    }
                    return Err(e);
                }
            };

            tokio::select! {
                _ = deadline.notified() => {
                    pending.flag.clear();
                    return Err(well_known::request_timeout());
                }
                outcome = pending.rx => {
                    match outcome {
                        Ok(CallOutcome::Error(e)) if retries_left > 0 && can_retry(&e) => {
                            retries_left -= 1;
                            tokio::time::sleep(self.config.retry.backoff).await;
                            driver = pool.acquire(timeouts.connect, true).await?;
                        }
                        Ok(outcome) => return Ok(outcome),
                        Err(_closed) => return Err(well_known::wire_broken()),
                    }
                }
            }
        }
    }
}
