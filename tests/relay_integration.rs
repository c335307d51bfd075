use feed_core::{Supervisor, SupervisorConfig, SupervisorState};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use twitter_monitor::channels::ConfigSource;
use twitter_monitor::discord::DiscordSink;
use twitter_monitor::follow_list::FollowListClient;
use twitter_monitor::twitter::TwitterClient;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";

fn write_config(twitter_url: &str, discord_url: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r##"
[[channels]]
id = "1001"
name = "officials"
users = [{{ id = "12", name = "kyiv" }}]

[[channels]]
id = "1002"
name = "search"
search_query = "#relief"

[twitter]
api_url = "{twitter_url}"

[discord]
api_url = "{discord_url}"
"##
    )
    .unwrap();
    file
}

fn stream_body() -> String {
    let post = serde_json::json!({
        "data": { "id": "100", "author_id": "12", "text": "hello" },
        "includes": { "users": [{ "id": "12", "username": "kyiv" }] },
        "matching_rules": [{ "id": "r1", "tag": "" }]
    });
    let search_hit = serde_json::json!({
        "data": { "id": "200", "author_id": "77", "text": "relief" },
        "includes": { "users": [{ "id": "77", "username": "donor" }] },
        "matching_rules": [{ "id": "r2", "tag": "1002" }]
    });
    format!("\r\n{post}\r\n\r\n{search_hit}\r\n")
}

async fn wait_for_messages(server: &MockServer, count: usize) -> Vec<Request> {
    for _ in 0..100 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    server.received_requests().await.unwrap_or_default()
}

fn decoded_bodies(requests: &[Request]) -> Vec<serde_json::Value> {
    requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn relays_stream_posts_into_discord_channels() {
    let twitter = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RULES_PATH))
        .and(header("authorization", "Bearer tw-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "9", "value": "from:99" }],
            "meta": { "result_count": 1 }
        })))
        .mount(&twitter)
        .await;
    Mock::given(method("POST"))
        .and(path(RULES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "meta": { "summary": {} }
        })))
        .mount(&twitter)
        .await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(stream_body()))
        .up_to_n_times(1)
        .mount(&twitter)
        .await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&twitter)
        .await;

    Mock::given(method("POST"))
        .and(header("authorization", "Bot dc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "1" })))
        .mount(&discord)
        .await;

    let config = write_config(&twitter.uri(), &discord.uri());
    let client = Arc::new(TwitterClient::new(&twitter.uri(), "tw-token".to_string()).unwrap());
    let sink = Arc::new(DiscordSink::new(&discord.uri(), "dc-token").unwrap());
    let source = Arc::new(ConfigSource::new(
        config.path().to_path_buf(),
        FollowListClient::new().unwrap(),
    ));

    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(
        client.clone(),
        client,
        source,
        sink,
        SupervisorConfig {
            reconnect_delay: Duration::from_millis(200),
            ..SupervisorConfig::default()
        },
        shutdown.clone(),
    ));
    let state = supervisor.state();

    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    let delivered = wait_for_messages(&discord, 2).await;
    shutdown.cancel();
    runner.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), SupervisorState::ShuttingDown);

    let mut sent: Vec<(String, serde_json::Value)> = delivered
        .iter()
        .map(|r| r.url.path().to_string())
        .zip(decoded_bodies(&delivered))
        .collect();
    sent.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        sent,
        vec![
            (
                "/channels/1001/messages".to_string(),
                serde_json::json!({ "content": "https://twitter.com/kyiv/status/100" })
            ),
            (
                "/channels/1002/messages".to_string(),
                serde_json::json!({ "content": "https://twitter.com/donor/status/200" })
            ),
        ]
    );

    // stale rule removed, author and tagged search rules installed
    let mutations: Vec<serde_json::Value> = decoded_bodies(
        &twitter
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .collect::<Vec<_>>(),
    );
    assert_eq!(mutations[0], serde_json::json!({ "delete": { "ids": ["9"] } }));
    assert_eq!(
        mutations[1],
        serde_json::json!({ "add": [
            { "value": "#relief", "tag": "1002" },
            { "value": "from:12" }
        ] })
    );
}

#[tokio::test]
async fn unreadable_config_stops_before_streaming() {
    let twitter = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&twitter)
        .await;

    let client = Arc::new(TwitterClient::new(&twitter.uri(), "tw-token".to_string()).unwrap());
    let sink = Arc::new(DiscordSink::new("http://127.0.0.1:9", "dc-token").unwrap());
    let source = Arc::new(ConfigSource::new(
        "/nonexistent/twitter-monitor.toml",
        FollowListClient::new().unwrap(),
    ));

    let supervisor = Supervisor::new(
        client.clone(),
        client,
        source,
        sink,
        SupervisorConfig::default(),
        CancellationToken::new(),
    );

    let err = supervisor.run().await.unwrap_err();
    assert!(err.is_fatal());
}
