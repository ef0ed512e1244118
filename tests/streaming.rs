use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::StreamExt;
use openai_client::{
    CancellationToken, ChatCompletionChunk, ChatRequest, ChatStreamAccumulator, Client,
    CompletionRequest, Config, Credential, Error, MetricsCallbacks, RequestOptions, Settings,
    StreamFirstEventMetrics,
    testing::{start_chunked_sse_server, start_sse_server, test_client},
};
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chunk(text: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "created": 1,
        "model": "gpt-4o",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    })
    .to_string()
}

#[tokio::test]
async fn chat_stream_yields_chunks_in_order() {
    let base_url = start_sse_server(vec![chunk("Hel"), chunk("lo"), chunk("!")]).await;
    let mut stream = test_client(&base_url)
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .expect("stream");

    let mut texts = Vec::new();
    while let Some(item) = stream.next().await {
        let chunk = item.expect("chunk");
        texts.push(chunk.first_text().unwrap_or_default().to_string());
    }
    assert_eq!(texts, vec!["Hel", "lo", "!"]);
}

#[tokio::test]
async fn records_split_across_reads_are_reassembled() {
    let steps = vec![
        (Duration::ZERO, "data: {\"a\"".to_string()),
        (Duration::from_millis(20), ":1}\n".to_string()),
        (Duration::from_millis(20), "\ndata: {\"a\":2}\n\nda".to_string()),
        (Duration::from_millis(20), "ta: [DONE]\n\n".to_string()),
    ];
    let base_url = start_chunked_sse_server(steps, None, Vec::new()).await;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Partial {
        a: i32,
    }

    let stream = test_client(&base_url)
        .stream::<_, Partial>(
            "custom/stream",
            &json!({"stream": true}),
            RequestOptions::default(),
        )
        .await
        .expect("stream");
    let got: Vec<Partial> = stream.map(|item| item.expect("partial")).collect().await;
    assert_eq!(got, vec![Partial { a: 1 }, Partial { a: 2 }]);
}

#[tokio::test]
async fn stream_chunks_carry_header_metadata() {
    let steps = vec![
        (Duration::ZERO, format!("data: {}\n\n", chunk("hi"))),
        (Duration::ZERO, "data: [DONE]\n\n".to_string()),
    ];
    let headers = vec![
        ("x-request-id".to_string(), "stream-req-1".to_string()),
        ("openai-processing-ms".to_string(), "12".to_string()),
    ];
    let base_url = start_chunked_sse_server(steps, None, headers).await;

    let mut stream = test_client(&base_url)
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .expect("stream");
    assert_eq!(stream.metadata().request_id.as_deref(), Some("stream-req-1"));

    let first: ChatCompletionChunk = stream.next().await.expect("item").expect("chunk");
    assert_eq!(first.metadata.request_id.as_deref(), Some("stream-req-1"));
    assert_eq!(first.metadata.processing_time, Duration::from_millis(12));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancel_before_first_frame_yields_nothing() {
    let steps = vec![(Duration::from_secs(5), format!("data: {}\n\n", chunk("late")))];
    let base_url = start_chunked_sse_server(steps, None, Vec::new()).await;

    let token = CancellationToken::new();
    let mut stream = test_client(&base_url)
        .chat()
        .stream(
            ChatRequest::new("gpt-4o").user("hi"),
            RequestOptions::default().with_cancellation(token.clone()),
        )
        .await
        .expect("stream");

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("cancellation should end the stream promptly");
    assert!(next.is_none());
    assert!(stream.is_cancelled());
}

#[tokio::test]
async fn cancel_before_headers_yields_empty_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(format!("data: {}\n\n", chunk("late")))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let chat = test_client(&server.uri()).chat();
    let call = chat.stream(
        ChatRequest::new("gpt-4o").user("hi"),
        RequestOptions::default().with_cancellation(token),
    );
    let mut stream = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("cancellation should return promptly")
        .expect("cancelled stream is not an error");
    assert!(stream.is_cancelled());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancel_mid_sequence_keeps_only_yielded_frames() {
    let steps = vec![
        (Duration::ZERO, format!("data: {}\n\n", chunk("one"))),
        (Duration::from_secs(5), format!("data: {}\n\n", chunk("two"))),
    ];
    let base_url = start_chunked_sse_server(steps, None, Vec::new()).await;

    let mut stream = test_client(&base_url)
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .expect("stream");

    let first = stream.next().await.expect("item").expect("chunk");
    assert_eq!(first.first_text(), Some("one"));

    stream.cancel();
    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("cancel should end the stream promptly");
    assert!(next.is_none());
}

#[tokio::test]
async fn stream_cancel_does_not_cancel_caller_token() {
    let base_url = start_sse_server(vec![chunk("x")]).await;
    let token = CancellationToken::new();
    let stream = test_client(&base_url)
        .chat()
        .stream(
            ChatRequest::new("gpt-4o").user("hi"),
            RequestOptions::default().with_cancellation(token.clone()),
        )
        .await
        .expect("stream");
    stream.cancel();
    drop(stream);
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn accumulator_collects_full_text() {
    let base_url = start_sse_server(vec![chunk("Hello"), chunk(", "), chunk("world")]).await;
    let stream = test_client(&base_url)
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .expect("stream");
    let text = ChatStreamAccumulator::new(stream)
        .collect_text()
        .await
        .expect("text");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn completions_stream_sets_stream_flag_and_accept_header() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: [DONE]\n\n",
        json!({
            "id": "cmpl-1",
            "object": "text_completion",
            "choices": [{"text": "Once", "index": 0}]
        })
    );
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"stream": true, "prompt": "Tell me"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut stream = test_client(&server.uri())
        .completions()
        .stream(
            CompletionRequest::new("gpt-3.5-turbo-instruct", "Tell me"),
            RequestOptions::default(),
        )
        .await
        .expect("stream");
    let first = stream.next().await.expect("item").expect("completion");
    assert_eq!(first.first_text(), Some("Once"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn stream_error_status_fails_before_any_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "message": "Rate limit reached",
                "type": "requests",
                "code": "rate_limit_exceeded"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = test_client(&server.uri())
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .err()
        .expect("429 should fail");
    let failed = match err {
        Error::RequestFailed(failed) => failed,
        other => panic!("expected RequestFailed, got {other:?}"),
    };
    assert_eq!(failed.status, 429);
    assert!(
        failed
            .request_body
            .as_deref()
            .is_some_and(|b| b.contains("\"stream\":true"))
    );
}

#[tokio::test]
async fn first_event_metric_is_reported_once() {
    let base_url = start_sse_server(vec![chunk("a"), chunk("b")]).await;
    let seen: Arc<Mutex<Vec<StreamFirstEventMetrics>>> = Arc::new(Mutex::new(Vec::new()));
    let metrics = MetricsCallbacks {
        stream_first_event: Some({
            let seen = seen.clone();
            Arc::new(move |m: StreamFirstEventMetrics| seen.lock().unwrap().push(m))
        }),
        ..Default::default()
    };
    let client = Client::new(Config {
        credential: Some(Credential::new("sk-test", None).unwrap()),
        settings: Some(Settings::proxy(&base_url, None)),
        metrics: Some(metrics),
        ..Default::default()
    })
    .expect("client");

    let stream = client
        .chat()
        .stream(ChatRequest::new("gpt-4o").user("hi"), RequestOptions::default())
        .await
        .expect("stream");
    let count = stream.count().await;
    assert_eq!(count, 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].error.is_none());
    assert_eq!(seen[0].context.resource, "chat/completions");
}
