use std::time::{Duration, Instant};

use rpcmux::{client::Client, error::well_known};
use serde::{Deserialize, Serialize};

use crate::integration_tests::common::client_config;

#[derive(Serialize)]
struct Args {
    n: i64,
}

#[derive(Deserialize, Debug)]
struct Reply {
    n: i64,
}

#[tokio::test]
async fn s10_connect_timeout_is_bounded() {
    // A TEST-NET-1 address with nothing routed to it: the kernel sends SYNs
    // and gets no reply, so the connect attempt hangs until our own
    // timeout fires rather than failing fast with "connection refused".
    let mut cfg = client_config("10.255.255.1:12345".to_string());
    cfg.timeouts.connect = Duration::from_millis(100);
    cfg.retry.budget = 0;
    let client = Client::new(cfg);

    let started = Instant::now();
    let err = client
        .call::<_, Reply>("TestRpcInt", "Update", &Args { n: 1 })
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.code, well_known::connect_timeout().code);
    assert!(elapsed < Duration::from_millis(300), "connect timeout took {elapsed:?}");
}
