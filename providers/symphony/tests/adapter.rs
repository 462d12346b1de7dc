use greentic_messaging_providers_symphony::{Outbound, SymphonyError};
use reqwest::Method;
use serde_json::json;

#[path = "../test_support/mod.rs"]
mod support;

use support::{IM_CREATE, MESSAGE_CREATE, MockPlatform, Reply, STRUCTURED_MESSAGE_CREATE, USER_LOOKUP};

fn sent_messages(platform: &MockPlatform, prefix: &str) -> Vec<(String, String)> {
    platform
        .calls_to(Method::POST, prefix)
        .into_iter()
        .map(|call| {
            let message = call
                .body
                .as_ref()
                .and_then(|body| body["message"].as_str())
                .unwrap_or_default()
                .to_string();
            (call.path, message)
        })
        .collect()
}

#[tokio::test]
async fn send_wraps_bare_text() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    let sent = adapter.send("stream-1", "foo bar").await.unwrap().unwrap();
    assert_eq!(sent.stream_id, "stream-1");

    let call = &platform.calls_to(Method::POST, MESSAGE_CREATE)[0];
    assert_eq!(call.path, "/agent/v2/stream/stream-1/message/create");
    assert_eq!(call.host, support::AGENT_HOST);
    assert_eq!(
        call.body,
        Some(json!({"message": "<messageML>foo bar</messageML>", "format": "MESSAGEML"}))
    );
}

#[tokio::test]
async fn send_leaves_wrapped_text_untouched() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    adapter
        .send("stream-1", "<messageML><b>bold</b></messageML>".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        sent_messages(&platform, MESSAGE_CREATE),
        vec![(
            "/agent/v2/stream/stream-1/message/create".to_string(),
            "<messageML><b>bold</b></messageML>".to_string()
        )]
    );
}

#[tokio::test]
async fn structured_messages_use_the_structured_endpoint() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));
    let data = json!({"object001": {"type": "org.symphonyoss.fin.security", "id": "AAPL"}});

    adapter
        .send(
            "stream-9",
            Outbound::Structured {
                text: "<messageML><div class=\"entity\" data-object-id=\"object001\"/></messageML>"
                    .into(),
                data: data.clone(),
            },
        )
        .await
        .unwrap()
        .unwrap();

    let call = &platform.calls_to(Method::POST, STRUCTURED_MESSAGE_CREATE)[0];
    assert_eq!(call.path, "/agent/v4/stream/stream-9/message/create");
    let body = call.body.as_ref().unwrap();
    assert_eq!(body["data"], data);
    assert!(body["message"].as_str().unwrap().starts_with("<messageML>"));
}

#[tokio::test]
async fn reply_mentions_sender_and_escapes_text() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    adapter
        .reply("stream-1", "johndoe@symphony.com", "foo bar baz")
        .await
        .unwrap()
        .unwrap();
    adapter
        .reply("stream-1", "johndoe@symphony.com", "<&>")
        .await
        .unwrap()
        .unwrap();
    adapter
        .reply("stream-1", "johndoe@symphony.com", "\"ok\" isn't")
        .await
        .unwrap()
        .unwrap();

    let messages: Vec<String> = sent_messages(&platform, MESSAGE_CREATE)
        .into_iter()
        .map(|(_, message)| message)
        .collect();
    assert_eq!(
        messages,
        vec![
            "<messageML><mention email=\"johndoe@symphony.com\"/>foo bar baz</messageML>",
            "<messageML><mention email=\"johndoe@symphony.com\"/>&lt;&amp;&gt;</messageML>",
            "<messageML><mention email=\"johndoe@symphony.com\"/>&quot;ok&quot; isn&apos;t</messageML>",
        ]
    );
}

#[tokio::test]
async fn failed_send_is_returned_through_the_handle() {
    let platform = MockPlatform::symphony();
    platform.on(
        Method::POST,
        MESSAGE_CREATE,
        Reply::Status(403, "not a member".into()),
    );
    let adapter = support::adapter(&platform, &support::config(23));

    let err = adapter.send("stream-1", "hi").await.unwrap().unwrap_err();
    assert!(matches!(err, SymphonyError::Transport { .. }));
    assert!(err.to_string().contains("not a member"));
}

#[tokio::test]
async fn direct_message_by_username_opens_an_im() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    let sent = adapter
        .send_direct_message_to_username("user42", "hello")
        .await
        .unwrap();
    assert_eq!(sent.stream_id, "im-42");

    let im = &platform.calls_to(Method::POST, IM_CREATE)[0];
    assert_eq!(im.host, support::POD_HOST);
    assert_eq!(im.body, Some(json!([42])));
    assert_eq!(
        sent_messages(&platform, MESSAGE_CREATE),
        vec![(
            "/agent/v2/stream/im-42/message/create".to_string(),
            "<messageML>hello</messageML>".to_string()
        )]
    );
}

#[tokio::test]
async fn direct_message_by_email_and_id() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    let by_email = adapter
        .send_direct_message_to_email("user77@symphony.com", "hi")
        .await
        .unwrap();
    assert_eq!(by_email.stream_id, "im-77");
    let by_id = adapter
        .send_direct_message_to_user_id(78, "hi again")
        .await
        .unwrap();
    assert_eq!(by_id.stream_id, "im-78");
    assert_eq!(platform.count(Method::GET, USER_LOOKUP), 1);
}

#[tokio::test]
async fn user_resolution_goes_through_the_directory() {
    let platform = MockPlatform::symphony();
    let adapter = support::adapter(&platform, &support::config(23));

    let by_name = adapter.resolve_user_by_username("user5").await.unwrap();
    let again = adapter.resolve_user_by_username("user5").await.unwrap();
    assert_eq!(by_name, again);
    assert_eq!(by_name.email_address, "user5@symphony.com");
    let by_email = adapter
        .resolve_user_by_email("user6@symphony.com")
        .await
        .unwrap();
    assert_eq!(by_email.username, "user6");
    assert_eq!(platform.count(Method::GET, USER_LOOKUP), 2);
    assert!(adapter.directory().registry().get(5).is_some());
}
