use std::net::SocketAddr;

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use greentic_messaging_providers_symphony::{ReqwestTransport, SymphonyError, Transport};
use reqwest::Method;
use serde_json::{Value, json};

async fn serve() -> anyhow::Result<String> {
    let app = Router::new()
        .route(
            "/agent/v4/datafeed/{id}/read",
            get(|Path(id): Path<String>| async move {
                if id == "busy" {
                    (
                        StatusCode::OK,
                        Json(json!([{
                            "id": "m-1",
                            "timestamp": "1461808889185",
                            "v2messageType": "V2Message",
                            "streamId": "stream-1",
                            "message": "<messageML>hi</messageML>",
                            "fromUserId": 1
                        }])),
                    )
                        .into_response()
                } else {
                    StatusCode::NO_CONTENT.into_response()
                }
            }),
        )
        .route(
            "/agent/v1/util/echo",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string)
                };
                Json(json!({
                    "session": header("sessiontoken"),
                    "keyManager": header("keymanagertoken"),
                    "body": body,
                }))
            }),
        )
        .route(
            "/agent/v4/datafeed/create",
            post(|| async { (StatusCode::BAD_REQUEST, r#"{"code":400,"message":"bad"}"#) }),
        )
        .route("/pod/v1/sessioninfo", get(|| async { "not json" }))
        .route("/pod/v1/empty", get(|| async { StatusCode::OK }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(format!("http://{addr}"))
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::new(reqwest::Client::new())
}

#[tokio::test]
async fn no_content_read_is_empty() -> anyhow::Result<()> {
    let host = serve().await?;
    let response = transport()
        .request(Method::GET, &host, "/agent/v4/datafeed/idle/read", Vec::new(), None)
        .await?;
    assert!(response.is_none());

    let empty = transport()
        .request(Method::GET, &host, "/pod/v1/empty", Vec::new(), None)
        .await?;
    assert!(empty.is_none());
    Ok(())
}

#[tokio::test]
async fn json_bodies_are_returned() -> anyhow::Result<()> {
    let host = serve().await?;
    let response = transport()
        .request(Method::GET, &host, "/agent/v4/datafeed/busy/read", Vec::new(), None)
        .await?
        .expect("messages");
    assert_eq!(response[0]["streamId"], "stream-1");
    Ok(())
}

#[tokio::test]
async fn headers_and_body_are_sent() -> anyhow::Result<()> {
    let host = serve().await?;
    let response = transport()
        .request(
            Method::POST,
            &host,
            "/agent/v1/util/echo",
            vec![
                ("sessionToken", "s-1".to_string()),
                ("keyManagerToken", "k-1".to_string()),
            ],
            Some(json!({"message": "ping"})),
        )
        .await?
        .expect("echo body");
    assert_eq!(
        response,
        json!({"session": "s-1", "keyManager": "k-1", "body": {"message": "ping"}})
    );
    Ok(())
}

#[tokio::test]
async fn error_status_carries_body() -> anyhow::Result<()> {
    let host = serve().await?;
    let err = transport()
        .request(Method::POST, &host, "/agent/v4/datafeed/create", Vec::new(), None)
        .await
        .unwrap_err();
    match &err {
        SymphonyError::Transport { status, body, .. } => {
            assert_eq!(*status, Some(reqwest::StatusCode::BAD_REQUEST));
            assert_eq!(body, r#"{"code":400,"message":"bad"}"#);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), "remote");
    Ok(())
}

#[tokio::test]
async fn invalid_json_is_a_decode_error() -> anyhow::Result<()> {
    let host = serve().await?;
    let err = transport()
        .request(Method::GET, &host, "/pod/v1/sessioninfo", Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SymphonyError::Decode { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn unreachable_host_has_unknown_status() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let err = transport()
        .request(
            Method::GET,
            &format!("http://{addr}"),
            "/pod/v1/sessioninfo",
            Vec::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(err.status().is_none());
    assert!(err.to_string().contains("unknown"));
    Ok(())
}
