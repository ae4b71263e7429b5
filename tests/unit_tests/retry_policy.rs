use rpcmux::{error::well_known, retry::can_retry};

#[test]
fn retryable_kinds_are_retried() {
    for make in [
        well_known::no_idle_conn,
        well_known::no_working_conn,
        well_known::connect_timeout,
        well_known::wire_broken,
        well_known::pending_mailbox_full,
    ] {
        let err = make();
        assert!(can_retry(&err), "expected code {} to be retryable", err.code);
    }
}

#[test]
fn non_retryable_kinds_are_not_retried() {
    for make in [
        well_known::request_timeout,
        well_known::deadline_gc_arrived,
        well_known::no_endpoints,
        well_known::invalid_address,
        well_known::connect_fail,
        well_known::invalid_request,
    ] {
        let err = make();
        assert!(!can_retry(&err), "expected code {} to not be retryable", err.code);
    }

    assert!(!can_retry(&well_known::internal("boom")));
}

#[test]
fn codec_error_is_never_retried_despite_its_bit() {
    let err = well_known::codec_error();
    assert!(err.kind.contains(rpcmux::error::ErrorKind::CAN_RETRY));
    assert!(!can_retry(&err));
}
