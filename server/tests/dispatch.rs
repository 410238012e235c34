//! `$dispatch$` / `$dispatchresponse$` sibling-forwarding: one tunnel
//! asks the server to route a request to another registered tunnel.

mod common;

use std::collections::HashMap;

use tunnel_protocol::{Frame, HttpRequestEnvelope, HttpResponseEnvelope};

#[tokio::test]
async fn a_dispatch_request_is_forwarded_to_the_named_sibling_and_answered() {
    let server = common::spawn_default().await;
    let mut requester = common::FakeClient::connect(&server.ws_url("caller", "http")).await;
    let mut sibling = common::FakeClient::connect(&server.ws_url("callee", "http")).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    requester
        .send(Frame::Dispatch(HttpRequestEnvelope {
            request_id: "dispatch-1".into(),
            method: "GET".into(),
            url: "http://relay/callee/work".into(),
            headers: HashMap::new(),
            body: Vec::new(),
            is_web_socket_request: false,
            is_blazor_request: false,
        }))
        .await;

    match sibling.recv().await {
        Some(Frame::HttpRequest(req)) => {
            assert_eq!(req.url, "http://relay/callee/work");
            sibling
                .send(Frame::HttpResponse(HttpResponseEnvelope {
                    request_id: req.request_id,
                    status_code: 200,
                    headers: HashMap::new(),
                    body: b"sibling handled it".to_vec(),
                    error_message: None,
                }))
                .await;
        }
        other => panic!("expected the sibling to receive an HttpRequest, got {other:?}"),
    }

    match requester.recv().await {
        Some(Frame::DispatchResponse(resp)) => {
            assert_eq!(resp.status_code, 200);
            assert_eq!(resp.body, b"sibling handled it");
        }
        other => panic!("expected a DispatchResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn a_dispatch_request_for_an_unknown_sibling_gets_a_502_dispatch_response() {
    let server = common::spawn_default().await;
    let mut requester = common::FakeClient::connect(&server.ws_url("lonely", "http")).await;

    requester
        .send(Frame::Dispatch(HttpRequestEnvelope {
            request_id: "dispatch-2".into(),
            method: "GET".into(),
            url: "http://relay/ghost/work".into(),
            headers: HashMap::new(),
            body: Vec::new(),
            is_web_socket_request: false,
            is_blazor_request: false,
        }))
        .await;

    match requester.recv().await {
        Some(Frame::DispatchResponse(resp)) => assert_eq!(resp.status_code, 502),
        other => panic!("expected a DispatchResponse, got {other:?}"),
    }
}
