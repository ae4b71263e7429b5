use rpcmux::error::{ErrorKind, well_known};

/// Regression guard for the numeric codes and retry-eligibility bits this
/// crate's error table promises: a caller that matches on `code` today
/// must keep matching after any internal refactor.
#[test]
fn well_known_codes_match_the_documented_table() {
    let cases: &[(fn() -> rpcmux::error::RpcError, i32, bool)] = &[
        (well_known::request_timeout, 100, false),
        (well_known::no_idle_conn, 101, true),
        (well_known::no_working_conn, 102, true),
        (well_known::connect_timeout, 103, true),
        (well_known::deadline_gc_arrived, 104, false),
        (well_known::no_endpoints, 105, false),
        // The bit is set, but `retry::can_retry` vetoes it for any reason
        // carrying the codec's parse-error prefix — see `retry_policy.rs`.
        (well_known::codec_error, 106, true),
        (well_known::unknown, 107, false),
        (well_known::invalid_address, 108, false),
        (well_known::connect_fail, 109, false),
        (well_known::wire_broken, 111, true),
        (well_known::pending_mailbox_full, 121, true),
        (well_known::invalid_request, 400, false),
    ];

    for (make, expected_code, expected_can_retry) in cases {
        let err = make();
        assert_eq!(err.code, *expected_code, "unexpected code for {}", err.reason);
        assert_eq!(
            err.kind.contains(ErrorKind::CAN_RETRY),
            *expected_can_retry,
            "unexpected CAN_RETRY bit for code {}",
            err.code
        );
    }

    assert_eq!(well_known::internal("x").code, 500);
}

#[test]
fn deadline_gc_arrived_is_critical() {
    assert!(well_known::deadline_gc_arrived().kind.contains(ErrorKind::CRITICAL));
}

#[test]
fn invalid_request_is_critical() {
    assert!(well_known::invalid_request().kind.contains(ErrorKind::CRITICAL));
}
