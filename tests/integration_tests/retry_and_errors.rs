use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rpcmux::{
    client::Client,
    error::{ErrorKind, RpcError, well_known},
    server::MethodRegistry,
};
use serde::{Deserialize, Serialize};

use crate::integration_tests::common::{client_config, start_server};

#[derive(Serialize, Deserialize)]
struct Args {
    n: i64,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct Reply {
    n: i64,
}

#[tokio::test]
async fn s7_retryable_error_is_retried_then_surfaces_the_logic_error() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let handler_attempts = attempts.clone();
    let registry = MethodRegistry::builder().register("TestRpcInt", "ReturnErr", move |_args: Args| {
        let attempts = handler_attempts.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<Reply, RpcError>(RpcError::new(10000, ErrorKind::CAN_RETRY, "transient failure, retry"))
            } else {
                Err::<Reply, RpcError>(RpcError::new(100001, ErrorKind::LOGIC, "still failing"))
            }
        }
    });

    let addr = start_server(registry).await;
    let client = Client::new(client_config(addr));

    let err = client
        .call::<_, Reply>("TestRpcInt", "ReturnErr", &Args { n: 1 })
        .await
        .unwrap_err();

    assert_eq!(err.code, 100001);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn s8_non_rpc_failure_surfaces_as_internal_error() {
    let registry = MethodRegistry::builder().register("TestRpcInt", "ReturnErr", |_args: Args| async move {
        // The handler hits a failure with no RPC-specific meaning (e.g. a
        // filesystem or parsing error) and reports it generically.
        let cause: Result<(), std::num::ParseIntError> = "not a number".parse::<i64>().map(|_| ());
        cause.map_err(|e| well_known::internal(e.to_string()))?;
        Ok::<Reply, RpcError>(Reply { n: 0 })
    });

    let addr = start_server(registry).await;
    let client = Client::new(client_config(addr));

    let err = client
        .call::<_, Reply>("TestRpcInt", "ReturnErr", &Args { n: 2 })
        .await
        .unwrap_err();

    assert_eq!(err.code, well_known::internal("").code);
}
