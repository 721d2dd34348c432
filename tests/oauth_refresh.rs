use std::io::Read;
use std::sync::Arc;
use std::thread;

use azdo_export::auth::{Credentials, OAuthTokenEndpoint};
use azdo_export::http::{ApiClient, Params};
use azdo_export::metrics::Metrics;
use tiny_http::{Header, Response, Server};

#[derive(Debug)]
struct Seen {
    method: String,
    url: String,
    authorization: String,
    body: String,
}

/// Serves `script` in order and returns what each request looked like.
fn scripted(script: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<Seen>>) {
    let server = Server::http("127.0.0.1:0").expect("server start");
    let addr = format!("http://{}", server.server_addr());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in script {
            let Ok(mut req) = server.recv() else { break };
            let mut request_body = String::new();
            let _ = req.as_reader().read_to_string(&mut request_body);
            let authorization = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string())
                .unwrap_or_default();
            seen.push(Seen {
                method: req.method().as_str().to_string(),
                url: req.url().to_string(),
                authorization,
                body: request_body,
            });
            let response = Response::from_string(body)
                .with_status_code(status)
                .with_header(
                    Header::from_bytes("Content-Type", "application/json").expect("header"),
                );
            let _ = req.respond(response);
        }
        seen
    });
    (addr, handle)
}

#[test]
fn expired_token_is_refreshed_and_rotated_refresh_token_is_used_next() {
    let page = r#"{"count":0,"value":[]}"#;
    let (addr, handle) = scripted(vec![
        (401, ""),
        (200, r#"{"access_token":"a2","refresh_token":"r2"}"#),
        (200, page),
        (401, ""),
        (200, r#"{"access_token":"a3"}"#),
        (200, page),
    ]);

    let endpoint = OAuthTokenEndpoint::new(
        format!("{addr}/oauth/token"),
        "client-secret".into(),
        "https://localhost/callback".into(),
    )
    .expect("token endpoint");
    let creds = Arc::new(Credentials::oauth("a1", "r1", Arc::new(endpoint)));
    let metrics = Arc::new(Metrics::new());
    let client = ApiClient::new(&addr, Arc::clone(&creds), Arc::clone(&metrics))
        .expect("client")
        .with_max_retries(0);

    let first: serde_json::Value = client.get("_apis/projects", Params::new()).expect("first");
    assert_eq!(first["count"], 0);
    let second: serde_json::Value = client.get("_apis/projects", Params::new()).expect("second");
    assert_eq!(second["count"], 0);

    let seen = handle.join().expect("server thread");
    assert_eq!(seen.len(), 6);

    assert_eq!(seen[0].method, "GET");
    assert!(seen[0].url.starts_with("/_apis/projects"));
    assert!(seen[0].url.contains("api-version=5.1"));
    assert_eq!(seen[0].authorization, "Bearer a1");

    assert_eq!(seen[1].method, "POST");
    assert_eq!(seen[1].url, "/oauth/token");
    assert!(seen[1].body.contains("assertion=r1"));
    assert!(seen[1].body.contains("client_assertion=client-secret"));

    assert_eq!(seen[2].authorization, "Bearer a2");
    assert_eq!(seen[3].authorization, "Bearer a2");
    assert!(seen[4].body.contains("assertion=r2"));
    assert_eq!(seen[5].authorization, "Bearer a3");

    assert_eq!(creds.access_token().as_deref(), Some("a3"));
    assert_eq!(metrics.snapshot().token_refreshes, 2);
}

#[test]
fn rejected_refresh_surfaces_without_replaying_the_request() {
    let (addr, handle) = scripted(vec![(401, ""), (400, r#"{"error":"invalid_grant"}"#)]);

    let endpoint = OAuthTokenEndpoint::new(
        format!("{addr}/oauth/token"),
        "client-secret".into(),
        "https://localhost/callback".into(),
    )
    .expect("token endpoint");
    let creds = Arc::new(Credentials::oauth("a1", "r1", Arc::new(endpoint)));
    let client = ApiClient::new(&addr, Arc::clone(&creds), Arc::new(Metrics::new()))
        .expect("client")
        .with_max_retries(0);

    let err = client
        .get::<serde_json::Value>("_apis/projects", Params::new())
        .expect_err("refresh rejected");
    assert!(err.to_string().contains("credential refresh failed"));

    let seen = handle.join().expect("server thread");
    assert_eq!(seen.len(), 2);
    assert_eq!(creds.access_token().as_deref(), Some("a1"));
}
