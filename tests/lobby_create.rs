mod support;

#[tokio::test]
async fn create_lobby_redirects_to_new_lobby_with_admin_password() {
    let base_url = support::ensure_server();
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client");

    let res = client
        .post(format!("{base_url}/api/create_lobby"))
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(res.status(), reqwest::StatusCode::SEE_OTHER);
    let location = res
        .headers()
        .get(reqwest::header::LOCATION)
        .expect("redirect should carry a Location header")
        .to_str()
        .expect("header should be valid ascii");
    assert!(location.starts_with("/lobby/"));
    assert!(location.contains("?admin="));
}

#[tokio::test]
async fn start_round_on_unknown_lobby_is_rejected() {
    let base_url = support::ensure_server();
    let client = reqwest::Client::new();

    let payload = serde_json::json!({
        "lobby_id": 9_999_999_u64,
        "password": "wrong",
        "level_id": 104,
        "mode": "any",
    });

    let res = client
        .post(format!("{base_url}/api/start_round"))
        .json(&payload)
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
}
