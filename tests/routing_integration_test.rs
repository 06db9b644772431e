use activesync_router::domain::model::{Cluster, ClusterTopology, Scheme};
use activesync_router::{build_router, ProxyState, RouterSettings};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use httpmock::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const ACTIVESYNC_PATH: &str = "/Microsoft-Server-ActiveSync";

fn settings(profile: &MockServer, registration: &MockServer, members: Vec<String>) -> RouterSettings {
    RouterSettings {
        port: 0,
        profile_api_url: profile.url("/api/profile"),
        registration_api_url: registration.url("/api/devices/"),
        profile_timeout: Duration::from_secs(5),
        registration_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(600),
        topology: Arc::new(
            ClusterTopology::new(vec![Cluster {
                name: "cluster-a".to_string(),
                members,
                scheme: Scheme::Http,
            }])
            .unwrap(),
        ),
    }
}

async fn spawn_router(settings: RouterSettings) -> SocketAddr {
    let state = ProxyState::from_settings(&settings).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

fn basic_auth(username: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:secret", username)))
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().build().unwrap()
}

async fn wait_for_hits(mock: &httpmock::Mock<'_>, expected: usize) -> usize {
    for _ in 0..50 {
        let hits = mock.hits_async().await;
        if hits >= expected {
            return hits;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    mock.hits_async().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthenticated_request_skips_profile_and_keeps_host() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    let profile_mock = profile
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200);
        })
        .await;
    let backend_mock = backend
        .mock_async(|when, then| {
            when.method(GET)
                .path("/autodiscover/autodiscover.xml")
                .header("host", "mail.example.com")
                .header("x-real-ip", "127.0.0.1")
                .header("x-forwarded-host", "mail.example.com");
            then.status(200).body("<Autodiscover/>");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}/autodiscover/autodiscover.xml", addr))
        .header("host", "mail.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("connection").unwrap(), "keep-alive");
    assert_eq!(response.text().await.unwrap(), "<Autodiscover/>");
    backend_mock.assert_async().await;
    assert_eq!(profile_mock.hits_async().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_authenticated_user_is_sharded_to_backend() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    let profile_mock = profile
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/profile")
                .json_body(serde_json::json!({"email": "bob@example.com"}));
            then.status(200)
                .json_body(serde_json::json!({"activesync_enabled": true}));
        })
        .await;
    let backend_mock = backend
        .mock_async(|when, then| {
            when.method(POST)
                .path(ACTIVESYNC_PATH)
                .query_param("Cmd", "Ping")
                .header("authorization", basic_auth("bob@example.com"))
                .body("ping-payload");
            then.status(200).body("pong");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .post(format!("http://{}{}?Cmd=Ping", addr, ACTIVESYNC_PATH))
        .header("authorization", basic_auth("bob@example.com"))
        .header("content-type", "application/vnd.ms-sync.wbxml")
        .body("ping-payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "pong");
    profile_mock.assert_async().await;
    backend_mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_user_gets_401_and_never_reaches_backend() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200)
                .json_body(serde_json::json!({"activesync_enabled": false}));
        })
        .await;
    let backend_mock = backend
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200);
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .post(format!("http://{}{}?Cmd=Sync", addr, ACTIVESYNC_PATH))
        .header("authorization", basic_auth("off@example.com"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
    assert_eq!(response.text().await.unwrap(), "Authentication Error\n");
    assert_eq!(backend_mock.hits_async().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_profile_timeout_fails_closed() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200)
                .delay(Duration::from_secs(2))
                .json_body(serde_json::json!({"activesync_enabled": true}));
        })
        .await;
    let backend_mock = backend
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200);
        })
        .await;

    let mut settings = settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    );
    settings.profile_timeout = Duration::from_millis(100);
    let addr = spawn_router(settings).await;

    let response = client()
        .get(format!("http://{}{}", addr, ACTIVESYNC_PATH))
        .header("authorization", basic_auth("bob@example.com"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
    assert_eq!(backend_mock.hits_async().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dedicated_host_bypasses_topology() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let sharded = MockServer::start_async().await;
    let dedicated = MockServer::start_async().await;

    let dedicated_host = dedicated.address().to_string();
    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200).json_body(serde_json::json!({
                "activesync_enabled": true,
                "activesync_host": dedicated_host,
            }));
        })
        .await;
    let sharded_mock = sharded
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200);
        })
        .await;
    let dedicated_mock = dedicated
        .mock_async(|when, then| {
            when.method(GET).path(ACTIVESYNC_PATH);
            then.status(200).body("dedicated");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![sharded.address().to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}{}", addr, ACTIVESYNC_PATH))
        .header("authorization", basic_auth("vip@example.com"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "dedicated");
    dedicated_mock.assert_async().await;
    assert_eq!(sharded_mock.hits_async().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provision_request_notifies_registration_once() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200)
                .json_body(serde_json::json!({"activesync_enabled": true}));
        })
        .await;
    let registration_mock = registration
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/bob@example.com")
                .x_www_form_urlencoded_tuple("device_type", "iPhone")
                .x_www_form_urlencoded_tuple("device_id", "ABC123")
                .x_www_form_urlencoded_tuple("device_name", "Bob phone")
                .x_www_form_urlencoded_tuple("active_sync_host", "127.0.0.1");
            then.status(200)
                .json_body(serde_json::json!({"result": {"success": 1}}));
        })
        .await;
    let form = "Cmd=Provision&DeviceId=ABC123&DeviceType=iPhone&DeviceName=Bob+phone";
    let backend_mock = backend
        .mock_async(|when, then| {
            when.method(POST).path(ACTIVESYNC_PATH).body(form);
            then.status(200).body("provisioned");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .post(format!("http://{}{}", addr, ACTIVESYNC_PATH))
        .header("authorization", basic_auth("bob@example.com"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "provisioned");
    backend_mock.assert_async().await;
    assert_eq!(wait_for_hits(&registration_mock, 1).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_failure_does_not_change_response() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200)
                .json_body(serde_json::json!({"activesync_enabled": true}));
        })
        .await;
    let registration_mock = registration
        .mock_async(|when, then| {
            when.method(POST);
            then.status(500);
        })
        .await;
    backend
        .mock_async(|when, then| {
            when.method(POST).path(ACTIVESYNC_PATH);
            then.status(200).body("provisioned");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .post(format!(
            "http://{}{}?Cmd=Provision&DeviceId=D1&DeviceType=SmartPhone",
            addr, ACTIVESYNC_PATH
        ))
        .header("authorization", basic_auth("bob@example.com"))
        .body("wbxml")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("connection").unwrap(), "keep-alive");
    assert_eq!(response.text().await.unwrap(), "provisioned");
    assert_eq!(wait_for_hits(&registration_mock, 1).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_error_status_closes_connection() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    backend
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(503).body("busy");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}{}", addr, ACTIVESYNC_PATH))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
    assert_eq!(response.text().await.unwrap(), "busy");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_backend_is_bad_gateway() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec!["127.0.0.1:9".to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}{}", addr, ACTIVESYNC_PATH))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_auth_error_endpoint() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec!["127.0.0.1:9".to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}/auth-error", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_form_body_is_streamed_to_backend() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    profile
        .mock_async(|when, then| {
            when.method(POST).path("/api/profile");
            then.status(200)
                .json_body(serde_json::json!({"activesync_enabled": true}));
        })
        .await;
    let registration_mock = registration
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/bob@example.com")
                .x_www_form_urlencoded_tuple("device_id", "D9");
            then.status(200)
                .json_body(serde_json::json!({"result": {"success": 1}}));
        })
        .await;
    let backend_mock = backend
        .mock_async(|when, then| {
            when.method(POST)
                .path(ACTIVESYNC_PATH)
                .query_param("DeviceId", "D9")
                .body_contains("a=xxxx");
            then.status(200).body("stored");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let form = format!("a={}", "x".repeat(2 * 1024 * 1024));
    let response = client()
        .post(format!(
            "http://{}{}?Cmd=Provision&DeviceId=D9&DeviceType=SmartPhone",
            addr, ACTIVESYNC_PATH
        ))
        .header("authorization", basic_auth("bob@example.com"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "stored");
    backend_mock.assert_async().await;
    assert_eq!(wait_for_hits(&registration_mock, 1).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_close_is_honoured_on_success() {
    let profile = MockServer::start_async().await;
    let registration = MockServer::start_async().await;
    let backend = MockServer::start_async().await;

    backend
        .mock_async(|when, then| {
            when.method(GET).path("/autodiscover/autodiscover.xml");
            then.status(200).body("ok");
        })
        .await;

    let addr = spawn_router(settings(
        &profile,
        &registration,
        vec![backend.address().to_string()],
    ))
    .await;

    let response = client()
        .get(format!("http://{}/autodiscover/autodiscover.xml", addr))
        .header("connection", "close")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("connection").unwrap(), "close");
}
