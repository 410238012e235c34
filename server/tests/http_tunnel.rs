//! End-to-end HTTP-tunnel scenarios driven against a real bound router:
//! a public request relayed through a fake client and echoed back,
//! an unknown tunnel id, and a client disconnecting mid-request.

mod common;

use std::collections::HashMap;

use tunnel_protocol::{Frame, HttpResponseEnvelope};

#[tokio::test]
async fn public_request_is_relayed_and_echoed_back() {
    let server = common::spawn_default().await;
    let mut client = common::FakeClient::connect(&server.ws_url("svc1", "http")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let http_client = reqwest::Client::new();
    let request = http_client.get(format!("{}/svc1/echo", server.http_base())).send();

    let (response, _) = tokio::join!(request, async {
        match client.recv().await {
            Some(Frame::HttpRequest(req)) => {
                let mut headers = HashMap::new();
                headers.insert("content-type".to_string(), "text/plain".to_string());
                client
                    .send(Frame::HttpResponse(HttpResponseEnvelope {
                        request_id: req.request_id,
                        status_code: 200,
                        headers,
                        body: b"hello from local service".to_vec(),
                        error_message: None,
                    }))
                    .await;
            }
            other => panic!("expected an HttpRequest frame, got {other:?}"),
        }
    });

    let response = response.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello from local service");
}

#[tokio::test]
async fn request_for_an_unregistered_tunnel_is_a_404() {
    let server = common::spawn_default().await;
    let http_client = reqwest::Client::new();
    let response = http_client.get(format!("{}/no-such-tunnel/path", server.http_base())).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_disconnect_mid_request_fails_with_503() {
    let server = common::spawn_default().await;
    let mut client = common::FakeClient::connect(&server.ws_url("svc2", "http")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let http_client = reqwest::Client::new();
    let request = http_client.get(format!("{}/svc2/slow", server.http_base())).send();

    let (response, _) = tokio::join!(request, async {
        // Receive the forwarded request, then vanish without answering.
        assert!(matches!(client.recv().await, Some(Frame::HttpRequest(_))));
        client.close().await;
    });

    let response = response.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn single_tunnel_mode_routes_every_path_to_the_sole_tunnel() {
    let server = common::spawn_single_tunnel().await;
    let mut client = common::FakeClient::connect(&server.ws_url("only", "http")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let http_client = reqwest::Client::new();
    let request = http_client.get(format!("{}/whatever/path/is/used", server.http_base())).send();

    let (response, _) = tokio::join!(request, async {
        match client.recv().await {
            Some(Frame::HttpRequest(req)) => {
                client
                    .send(Frame::HttpResponse(HttpResponseEnvelope {
                        request_id: req.request_id,
                        status_code: 200,
                        headers: HashMap::new(),
                        body: b"ok".to_vec(),
                        error_message: None,
                    }))
                    .await;
            }
            other => panic!("expected an HttpRequest frame, got {other:?}"),
        }
    });

    assert_eq!(response.unwrap().status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn an_auth_hook_that_denies_the_id_rejects_the_upgrade() {
    let server = common::spawn_with_auth_hook(std::sync::Arc::new(|id: &str| id == "allowed")).await;

    let mut denied = common::FakeClient::connect(&server.ws_url("not-allowed", "http")).await;
    assert!(denied.recv().await.is_none());

    let mut allowed = common::FakeClient::connect(&server.ws_url("allowed", "http")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(server.state.registry.lookup("allowed").is_some());
    allowed.close().await;
}

#[tokio::test]
async fn a_second_tunnel_id_registration_collision_is_rejected() {
    let server = common::spawn_default().await;
    let _first = common::FakeClient::connect(&server.ws_url("dup", "http")).await;
    // Give the first connection a moment to register before the second dials.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut second = common::FakeClient::connect(&server.ws_url("dup", "http")).await;
    // The server closes the socket immediately on a rejected registration;
    // the next read yields a Close frame (surfaced here as `None`).
    assert!(second.recv().await.is_none());
}
