use rpcmux::{client::Client, error::well_known, server::MethodRegistry};
use serde::{Deserialize, Serialize};

use crate::integration_tests::common::{client_config, start_server};

#[derive(Serialize, Deserialize)]
struct EchoArgs {
    a: String,
    b: String,
    c: String,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct UpdateArgs {
    n: i64,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct UpdateReply {
    n: i64,
}

async fn registry() -> MethodRegistry {
    MethodRegistry::builder()
        .register("TestRpcInt", "EchoStruct", |_args: EchoArgs| async move {
            Ok::<_, rpcmux::error::RpcError>("hello echo struct".to_string())
        })
        .register("TestRpcInt", "Update", |args: UpdateArgs| async move {
            Ok::<_, rpcmux::error::RpcError>(UpdateReply { n: args.n + 100 })
        })
        .build()
}

#[tokio::test]
async fn s1_echo_round_trips() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    let reply: String = client
        .call(
            "TestRpcInt",
            "EchoStruct",
            &EchoArgs {
                a: "aaa".into(),
                b: "bbb".into(),
                c: "ccc".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(reply, "hello echo struct");
}

#[tokio::test]
async fn s2_invalid_service_is_rejected() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    let err = client
        .call::<_, i64>("xxxx", "Update", &5i64)
        .await
        .unwrap_err();
    assert_eq!(err.code, well_known::invalid_request().code);
}

#[tokio::test]
async fn s3_invalid_method_is_rejected() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    let err = client
        .call::<_, i64>("TestRpcInt", "xxxx", &5i64)
        .await
        .unwrap_err();
    assert_eq!(err.code, well_known::invalid_request().code);
}

#[tokio::test]
async fn s4_argument_type_mismatch_is_rejected() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    // `Update` expects `{"n": i64}`; sending a bare string fails to decode
    // into that shape server-side.
    let err = client
        .call::<_, UpdateReply>("TestRpcInt", "Update", &"5".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.code, well_known::invalid_request().code);
}

#[tokio::test]
async fn s5_reply_type_mismatch_is_a_parse_error() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    // The server replies with `{"n": 105}`; decoding that into a bare
    // `String` on the client side fails.
    let err = client
        .call::<_, String>("TestRpcInt", "Update", &UpdateArgs { n: 5 })
        .await
        .unwrap_err();
    assert_eq!(err.code, well_known::codec_error().code);
}

#[tokio::test]
async fn s6_normal_update_round_trips() {
    let addr = start_server(registry().await).await;
    let client = Client::new(client_config(addr));

    let reply: UpdateReply = client
        .call("TestRpcInt", "Update", &UpdateArgs { n: 5 })
        .await
        .unwrap();
    assert_eq!(reply, UpdateReply { n: 105 });
}
