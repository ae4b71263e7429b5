use rpcmux::cfg::config::Config;

#[test]
fn zero_pending_mailbox_capacity_is_rejected() {
    let mut cfg = Config::defaults("127.0.0.1:9000");
    cfg.client.pool.pending_mailbox_capacity = 0;
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn zero_deadline_gc_shards_is_rejected() {
    let mut cfg = Config::defaults("127.0.0.1:9000");
    cfg.server.deadline_gc_shards = 0;
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn zero_connect_timeout_is_rejected() {
    let mut cfg = Config::defaults("127.0.0.1:9000");
    cfg.client.timeouts.connect = std::time::Duration::ZERO;
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn empty_bind_address_is_allowed_for_client_only_processes() {
    let mut cfg = Config::defaults("");
    assert!(cfg.validate_and_normalize().is_ok());
}
