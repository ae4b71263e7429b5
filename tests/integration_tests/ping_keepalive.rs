use std::time::Duration;

use rpcmux::{client::Client, server::MethodRegistry};
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
async fn s9_idle_connection_survives_a_ping_and_is_reused() {
    let registry = MethodRegistry::builder().register("TestRpcInt", "Update", |args: Args| async move {
        Ok::<_, rpcmux::error::RpcError>(Reply { n: args.n })
    });
    let addr = start_server(registry).await;

    let mut cfg = client_config(addr);
    cfg.pool.ping_interval = Duration::from_millis(50);
    cfg.pool.peer_idle_timeout = Duration::from_secs(30);
    let client = Client::new(cfg);

    let first: Reply = client.call("TestRpcInt", "Update", &Args { n: 1 }).await.unwrap();
    assert_eq!(first, Reply { n: 1 });

    // Leave the driver idle past the ping interval so the pool's idle-ping
    // loop sends at least one ping over it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second: Reply = client.call("TestRpcInt", "Update", &Args { n: 2 }).await.unwrap();
    assert_eq!(second, Reply { n: 2 });
}
