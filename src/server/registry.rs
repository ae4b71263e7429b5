// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `MethodRegistry`: a compile-time stand-in for `service.go`'s reflective
//! `suitableMethods`/`Register` pair.
//!
//! The original walks a receiver's method set with `reflect` at
//! registration time and re-decodes into freshly allocated argument/reply
//! values per call. Rust has no runtime reflection, so each method is
//! registered through [`MethodRegistryBuilder::register`], which captures
//! the argument type, reply type, and invocation closure at the call site
//! and erases them behind one `Box<dyn Any + Send>` hop — the same
//! "decode, then invoke" split the original performs, just pushed to
//! compile time.

use std::{any::Any, collections::HashMap, future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{RpcError, well_known};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type ErasedArg = Box<dyn Any + Send>;

/// A decoded argument, ready to hand to the registered handler, or the
/// 400-class error the reference implementation's `ServeLoop` step 5
/// reports for a malformed body — never fatal to the connection.
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<ErasedArg, RpcError> + Send + Sync>;
type InvokeFn = Arc<dyn Fn(ErasedArg) -> BoxFuture<'static, Result<Bytes, RpcError>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct MethodEntry {
    decode: DecodeFn,
    invoke: InvokeFn,
}

impl MethodEntry {
    /// Decodes the raw argument frame into the type this method expects.
    pub(crate) fn decode(&self, body: &[u8]) -> Result<ErasedArg, RpcError> {
        (self.decode)(body)
    }

    /// Invokes the handler with an already-decoded argument and returns
    /// the JSON-encoded reply, or the error the handler itself returned.
    pub(crate) fn invoke(&self, arg: ErasedArg) -> BoxFuture<'static, Result<Bytes, RpcError>> {
        (self.invoke)(arg)
    }
}

/// A frozen `(service, method) -> handler` table, shared read-only across
/// every connection a [`crate::server::Server`] accepts.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<(String, String), MethodEntry>,
}

impl MethodRegistry {
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder::default()
    }

    pub(crate) fn lookup(&self, service: &str, method: &str) -> Option<MethodEntry> {
        self.methods.get(&(service.to_string(), method.to_string())).cloned()
    }
}

/// Builds a [`MethodRegistry`] by registering one handler per call,
/// mirroring the reference implementation's repeated `server.Register(...)`
/// calls before `Serve()` starts — consuming-`self` so registration can
/// only happen before the registry is frozen and shared.
#[derive(Default)]
pub struct MethodRegistryBuilder {
    methods: HashMap<(String, String), MethodEntry>,
}

impl MethodRegistryBuilder {
    /// Registers `service.method`, closing over `handler`'s receiver (an
    /// `Arc<State>` clone, a stateless closure, whatever the caller needs).
    /// `A` and `R` are learned from `handler`'s signature, exactly as the
    /// original learns `ArgType`/`ReplyType` from the registered method's
    /// reflected signature.
    pub fn register<A, R, F, Fut>(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        handler: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let decode: DecodeFn = Arc::new(|bytes: &[u8]| {
            serde_json::from_slice::<A>(bytes)
                .map(|arg| Box::new(arg) as ErasedArg)
                .map_err(|e| well_known::invalid_request().with_reason(format!("decode argument: {e}")))
        });

        let handler = Arc::new(handler);
        let invoke: InvokeFn = Arc::new(move |arg: ErasedArg| {
            let handler = handler.clone();
            let arg = *arg
                .downcast::<A>()
                .expect("decode always produces this method's registered argument type");
            Box::pin(async move {
                let reply = handler(arg).await?;
                serde_json::to_vec(&reply)
                    .map(Bytes::from)
                    .map_err(|e| well_known::internal(e.to_string()))
            })
        });

        self.methods
            .insert((service.into(), method.into()), MethodEntry { decode, invoke });
        self
    }

    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Args {
        n: i64,
    }

    #[derive(Serialize)]
    struct Reply {
        n: i64,
    }

    #[tokio::test]
    async fn registered_method_decodes_invokes_and_encodes() {
        let registry = MethodRegistry::builder()
            .register("Math", "Double", |args: Args| async move {
                Ok(Reply { n: args.n * 2 })
            })
            .build();

        let entry = registry.lookup("Math", "Double").expect("method registered");
        let body = serde_json::to_vec(&Args { n: 21 }).unwrap();
        let arg = entry.decode(&body).expect("well-formed argument decodes");
        let reply_bytes = entry.invoke(arg).await.expect("handler succeeds");
        let reply: Reply = serde_json::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply.n, 42);
    }

    #[tokio::test]
    async fn handler_error_surfaces_as_rpc_error() {
        let registry = MethodRegistry::builder()
            .register("Math", "AlwaysFails", |_args: Args| async move {
                Err::<Reply, RpcError>(well_known::internal("boom"))
            })
            .build();

        let entry = registry.lookup("Math", "AlwaysFails").unwrap();
        let body = serde_json::to_vec(&Args { n: 1 }).unwrap();
        let arg = entry.decode(&body).unwrap();
        let err = entry.invoke(arg).await.unwrap_err();
        assert_eq!(err.code, well_known::internal("boom").code);
    }

    #[test]
    fn unregistered_method_is_not_found() {
        let registry = MethodRegistry::builder().build();
        assert!(registry.lookup("Nope", "Missing").is_none());
    }

    #[test]
    fn malformed_argument_reports_invalid_request() {
        let registry = MethodRegistry::builder()
            .register("Math", "Double", |args: Args| async move {
                Ok(Reply { n: args.n })
            })
            .build();
        let entry = registry.lookup("Math", "Double").unwrap();
        let err = entry.decode(b"not json").unwrap_err();
        assert_eq!(err.code, well_known::invalid_request().code);
    }
}
