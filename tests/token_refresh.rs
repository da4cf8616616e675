mod support;

use std::time::Duration;

use spotify_auth_lib::AuthError;
use support::{
    form_value, free_port, refresh_grant_mock, token_json, token_requests, BrowserBehavior,
    FakeBrowser, CLIENT_ID, SCOPE,
};
use wiremock::{MockServer, ResponseTemplate};

fn seeded_manager(server: &MockServer, refresh_token: &str) -> spotify_auth_lib::TokenLifecycleManager {
    let manager = support::manager(
        server,
        FakeBrowser::new(BrowserBehavior::Ignore),
        free_port(),
        Duration::from_secs(1),
    );
    manager.initialize_with_refresh_token(CLIENT_ID, SCOPE, refresh_token);
    manager
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_share_a_single_refresh() {
    let server = MockServer::start().await;
    refresh_grant_mock(
        ResponseTemplate::new(200)
            .set_body_json(token_json("fresh", Some("R2"), 3600))
            .set_delay(Duration::from_millis(300)),
    )
    .expect(1)
    .mount(&server)
    .await;

    let manager = seeded_manager(&server, "R1");
    let (a, b, c) = tokio::join!(
        manager.get_valid_access_token(),
        manager.get_valid_access_token(),
        manager.get_valid_access_token()
    );
    assert_eq!(a.as_deref(), Ok("fresh"));
    assert_eq!(b.as_deref(), Ok("fresh"));
    assert_eq!(c.as_deref(), Ok("fresh"));

    let requests = token_requests(&server).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(form_value(&requests[0], "refresh_token"), Some("R1"));
    assert_eq!(form_value(&requests[0], "client_id"), Some(CLIENT_ID));
    assert_eq!(form_value(&requests[0], "redirect_uri"), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_without_rotation_keeps_the_old_refresh_token() {
    let server = MockServer::start().await;
    refresh_grant_mock(ResponseTemplate::new(200).set_body_json(token_json("A1", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = seeded_manager(&server, "R-old");
    assert_eq!(manager.get_valid_access_token().await.as_deref(), Ok("A1"));
    let data = manager.get_token_data().expect("tokens");
    assert_eq!(data.refresh_token, "R-old");
    assert!(data.expires_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_with_rotation_replaces_the_refresh_token() {
    let server = MockServer::start().await;
    refresh_grant_mock(ResponseTemplate::new(200).set_body_json(token_json("A1", Some("R-new"), 3600)))
        .expect(2)
        .mount(&server)
        .await;

    let manager = seeded_manager(&server, "R-old");
    manager.get_valid_access_token().await.expect("first refresh");
    assert_eq!(manager.get_token_data().expect("tokens").refresh_token, "R-new");

    // The next refresh uses the rotated token, not the seed.
    manager.invalidate_access_token();
    manager.get_valid_access_token().await.expect("second refresh");
    let requests = token_requests(&server).await;
    assert_eq!(form_value(&requests[1], "refresh_token"), Some("R-new"));
}

#[tokio::test(flavor = "multi_thread")]
async fn token_without_lifetime_is_served_until_invalidated() {
    let server = MockServer::start().await;
    refresh_grant_mock(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": "forever",
        "token_type": "Bearer"
    })))
    .expect(1)
    .mount(&server)
    .await;

    let manager = seeded_manager(&server, "R");
    assert_eq!(manager.get_valid_access_token().await.as_deref(), Ok("forever"));
    assert_eq!(manager.get_valid_access_token().await.as_deref(), Ok("forever"));
    assert_eq!(manager.get_token_data().expect("tokens").expires_at, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_refresh_leaves_state_untouched() {
    let server = MockServer::start().await;
    refresh_grant_mock(ResponseTemplate::new(200).set_body_json(token_json("A1", None, 3600)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let manager = seeded_manager(&server, "R");
    manager.get_valid_access_token().await.expect("first refresh");
    let before = manager.get_token_data().expect("tokens");

    refresh_grant_mock(ResponseTemplate::new(400).set_body_json(serde_json::json!({
        "error": "invalid_grant",
        "error_description": "Refresh token revoked"
    })))
    .expect(1)
    .mount(&server)
    .await;

    manager.invalidate_access_token();
    let err = manager.get_valid_access_token().await.expect_err("revoked");
    assert!(matches!(err, AuthError::TokenExchange { status: 400, .. }));
    assert!(err.requires_reauthorization());

    let after = manager.get_token_data().expect("tokens kept");
    assert_eq!(after.refresh_token, before.refresh_token);
    assert_eq!(after.access_token, before.access_token);
    assert_eq!(after.expires_at, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_then_access_fails_with_missing_refresh_token() {
    let server = MockServer::start().await;
    refresh_grant_mock(ResponseTemplate::new(200).set_body_json(token_json("A", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = seeded_manager(&server, "R");
    manager.get_valid_access_token().await.expect("refresh");
    manager.flush();

    assert!(manager.get_token_data().is_none());
    assert_eq!(
        manager.get_valid_access_token().await,
        Err(AuthError::MissingRefreshToken)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_during_refresh_discards_the_late_result() {
    let server = MockServer::start().await;
    refresh_grant_mock(
        ResponseTemplate::new(200)
            .set_body_json(token_json("late", Some("R2"), 3600))
            .set_delay(Duration::from_millis(300)),
    )
    .expect(1)
    .mount(&server)
    .await;

    let manager = seeded_manager(&server, "R");
    let (result, ()) = tokio::join!(manager.get_valid_access_token(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.flush();
    });

    // The caller that started the exchange still gets its result.
    assert_eq!(result.as_deref(), Ok("late"));
    assert!(manager.get_token_data().is_none());
    assert_eq!(
        manager.get_valid_access_token().await,
        Err(AuthError::MissingRefreshToken)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_seed_counts_as_missing() {
    let server = MockServer::start().await;
    let manager = seeded_manager(&server, "   ");
    assert_eq!(
        manager.get_valid_access_token().await,
        Err(AuthError::MissingRefreshToken)
    );
    assert!(token_requests(&server).await.is_empty());
}
