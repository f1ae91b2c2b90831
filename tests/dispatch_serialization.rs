mod common;

use common::*;
use tokio::time::{timeout, Duration};
use virtauthn::up::State;

const CDH: [u8; 32] = [0x01u8; 32];

/// Wait until the shared state reaches `target`.
async fn reach(h: &Harness, target: State) -> u64 {
    let mut rx = h.state.subscribe();
    let flow = timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == target))
        .await
        .expect("state not reached")
        .unwrap()
        .flow;
    flow
}

#[tokio::test]
async fn test_second_blocking_command_gets_pending() {
    let h = harness(Duration::from_secs(10));

    // No surface yet: the first registration parks in WAITING_FOR_USER_VERIFICATION
    let first = {
        let dispatcher = h.dispatcher.clone();
        let cmd = make_credential_cmd("example.com", user(b"alice", "Alice"), &CDH, &[]);
        tokio::spawn(async move { dispatcher.dispatch(&cmd).await })
    };
    let flow = reach(&h, State::WaitingForUserVerification).await;
    let before = h.state.snapshot();

    let second = h.dispatcher.dispatch(&get_assertion_cmd("example.com", &CDH, &[])).await;
    assert_eq!(second, vec![0x23], "must be CTAP2_ERR_USER_ACTION_PENDING");
    assert_eq!(h.state.snapshot(), before, "rejected command must not touch the state");

    // GetInfo is not serialized
    let info = h.dispatcher.dispatch(&[0x04]).await;
    assert_eq!(info[0], 0x00);

    h.state.complete_verification(flow, true).unwrap();
    let first = timeout(Duration::from_secs(5), first).await.expect("first command stuck").unwrap();
    assert_eq!(first[0], 0x00);
    assert!(h.state.is_idle());
}

#[tokio::test]
async fn test_confirmation_timeout_releases_dispatcher() {
    let h = harness(Duration::from_millis(100));

    let resp = timeout(
        Duration::from_secs(5),
        h.dispatcher.dispatch(&make_credential_cmd("example.com", user(b"u", "U"), &CDH, &[])),
    )
    .await
    .expect("dispatch stuck");
    assert_eq!(resp, vec![0x2F], "must be CTAP2_ERR_USER_ACTION_TIMEOUT");
    assert!(h.state.is_idle());
    assert_eq!(h.dispatcher.authenticator().store().lock().unwrap().credential_count(), 0);

    // Next command is accepted again
    let (_log, _surface) = spawn_surface(h.state.clone(), APPROVE);
    let resp = h
        .dispatcher
        .dispatch(&make_credential_cmd("example.com", user(b"u", "U"), &CDH, &[]))
        .await;
    assert_eq!(resp[0], 0x00);
}

#[tokio::test]
async fn test_dropped_command_resets_state() {
    let h = harness(Duration::from_secs(10));

    let task = {
        let dispatcher = h.dispatcher.clone();
        let cmd = make_credential_cmd("example.com", user(b"u", "U"), &CDH, &[]);
        tokio::spawn(async move { dispatcher.dispatch(&cmd).await })
    };
    let flow = reach(&h, State::WaitingForUserVerification).await;
    task.abort();
    let _ = task.await;

    assert!(h.state.is_idle(), "aborting the command must release the authenticator");
    // A late answer for the dead flow is refused
    assert!(h.state.complete_verification(flow, true).is_err());
}

#[tokio::test]
async fn test_late_answer_after_timeout_is_rejected() {
    let h = harness(Duration::from_millis(100));
    let resp = h
        .dispatcher
        .dispatch(&make_credential_cmd("example.com", user(b"u", "U"), &CDH, &[]))
        .await;
    assert_eq!(resp, vec![0x2F]);
    let flow = h.state.snapshot().flow;
    assert!(h.state.complete_verification(flow, true).is_err());
    assert!(h.state.is_idle());
}

#[tokio::test]
async fn test_concurrent_assertions_get_distinct_counters() {
    use virtauthn::ctap2::attestation::{GetAssertionResponse, MakeCredentialResponse};
    use virtauthn::ctap2::authenticator_data::AuthenticatorData;

    let h = harness(Duration::from_secs(5));
    let (_log, _surface) = spawn_surface(h.state.clone(), APPROVE);
    let resp = h
        .dispatcher
        .dispatch(&make_credential_cmd("example.com", user(b"alice", "Alice"), &CDH, &[]))
        .await;
    assert_eq!(resp[0], 0x00);
    let cred_id = AuthenticatorData::from_bytes(&MakeCredentialResponse::from_cbor(&resp[1..]).unwrap().auth_data)
        .unwrap()
        .attested_credential_data
        .unwrap()
        .credential_id;

    let cmd = get_assertion_cmd("example.com", &CDH, &[cred_id.clone()]);
    let (a, b) = timeout(
        Duration::from_secs(10),
        async { tokio::join!(h.dispatcher.dispatch(&cmd), h.dispatcher.dispatch(&cmd)) },
    )
    .await
    .expect("concurrent dispatch stuck");

    let statuses = [a[0], b[0]];
    assert!(
        statuses == [0x00, 0x00] || statuses == [0x00, 0x23] || statuses == [0x23, 0x00],
        "unexpected statuses {statuses:02x?}",
    );

    // Retry whichever was turned away until it completes
    let mut responses = Vec::new();
    for resp in [a, b] {
        let mut resp = resp;
        while resp == vec![0x23] {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resp = timeout(Duration::from_secs(5), h.dispatcher.dispatch(&cmd))
                .await
                .expect("retry stuck");
        }
        assert_eq!(resp[0], 0x00);
        responses.push(resp);
    }

    let mut counts: Vec<u32> = responses
        .iter()
        .map(|r| {
            let assertion = GetAssertionResponse::from_cbor(&r[1..]).unwrap();
            AuthenticatorData::from_bytes(&assertion.auth_data).unwrap().sign_count
        })
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 2], "counters must be distinct and consecutive");
    let store = h.dispatcher.authenticator().store().lock().unwrap();
    assert_eq!(store.sign_count("example.com", &cred_id).unwrap(), 3);
}
