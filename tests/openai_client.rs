use futures_util::StreamExt;
use openai_cli::client_provider::{ClientFactory, ClientSettings, Endpoint, OpenAiClientFactory};
use openai_cli::model::Message;
use openai_cli::providers::openai::{
    ChatRequest, EmbeddingRequest, GeneratedImage, ImageRequest, OpenAiClient,
};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
struct RecordedRequest {
    request_line: String,
    headers: HashMap<String, String>,
    body: String,
}

impl RecordedRequest {
    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

fn read_request(stream: &TcpStream) -> RecordedRequest {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .expect("request line should be readable");

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("header should be readable");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("body should be readable");

    RecordedRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::from_utf8(body).expect("body should be UTF-8"),
    }
}

/// Serves exactly one canned HTTP response and hands back what was requested.
fn serve_once(
    status: &str,
    content_type: &str,
    body: &str,
) -> (String, JoinHandle<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("address should be available");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept should succeed");
        let request = read_request(&stream);
        (&stream)
            .write_all(response.as_bytes())
            .expect("response should be writable");
        request
    });

    (format!("http://{addr}/v1"), handle)
}

/// Streams one SSE event per fragment, `gap` apart, then holds the connection
/// open for `linger` before closing it.
fn serve_sse_slowly(
    fragments: &[&str],
    gap: Duration,
    linger: Duration,
) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("address should be available");
    let events: Vec<String> = fragments
        .iter()
        .map(|fragment| {
            let chunk = serde_json::json!({
                "choices": [{"index": 0, "delta": {"content": fragment}}]
            });
            format!("data: {chunk}\n\n")
        })
        .collect();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept should succeed");
        read_request(&stream);
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            )
            .expect("headers should be writable");

        for event in events {
            thread::sleep(gap);
            stream
                .write_all(event.as_bytes())
                .and_then(|_| stream.flush())
                .expect("event should be writable");
        }
        thread::sleep(linger);
    });

    (format!("http://{addr}/v1"), handle)
}

/// A client built the way the CLI builds it, with a one second timeout.
fn factory_client(base_url: &str) -> OpenAiClient {
    OpenAiClientFactory::new(1)
        .build(&ClientSettings {
            api_key: "sk-test".to_string(),
            endpoint: Endpoint::Custom {
                provider: "local".to_string(),
                base_url: base_url.to_string(),
            },
            debug: false,
        })
        .expect("client should build")
}

fn client(base_url: &str) -> OpenAiClient {
    OpenAiClient::new(reqwest::Client::new(), base_url, "sk-test", false, 5)
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "gpt-4o".to_string(),
        messages: vec![Message::system("Be brief."), Message::user("Hi")],
        temperature: 0.2,
        max_tokens: Some(32),
    }
}

#[tokio::test]
async fn chat_posts_completion_request_and_returns_reply() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Hello!"}}],
            "usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}"#,
    );

    let reply = client(&base_url)
        .chat(&chat_request())
        .await
        .expect("chat should succeed");
    assert_eq!(reply.content, "Hello!");
    assert_eq!(reply.usage.map(|usage| usage.total_tokens), Some(12));

    let request = server.join().expect("server thread should join");
    assert_eq!(request.request_line, "POST /v1/chat/completions HTTP/1.1");
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
    let body = request.json();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["stream"], false);
    assert_eq!(body["max_tokens"], 32);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Hi");
}

#[tokio::test]
async fn chat_stream_yields_fragments_until_done() {
    let events = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    );
    let (base_url, server) = serve_once("200 OK", "text/event-stream", events);

    let fragments: Vec<String> = client(&base_url)
        .chat_stream(&chat_request())
        .await
        .expect("stream should open")
        .map(|fragment| fragment.expect("fragment should parse"))
        .collect()
        .await;
    assert_eq!(fragments, ["Hel", "lo"]);

    let request = server.join().expect("server thread should join");
    assert_eq!(request.json()["stream"], true);
}

#[tokio::test]
async fn slow_stream_outlives_the_request_timeout() {
    let fragments = ["c1", "c2", "c3", "c4", "c5", "c6"];
    let (base_url, server) =
        serve_sse_slowly(&fragments, Duration::from_millis(400), Duration::ZERO);

    let received: Vec<String> = factory_client(&base_url)
        .chat_stream(&chat_request())
        .await
        .expect("stream should open")
        .map(|fragment| fragment.expect("live stream should not fail"))
        .collect()
        .await;
    assert_eq!(received, fragments);

    server.join().expect("server thread should join");
}

#[tokio::test]
async fn stalled_stream_yields_one_error_then_ends() {
    let (base_url, server) = serve_sse_slowly(&["c1"], Duration::ZERO, Duration::from_secs(3));

    let items: Vec<Result<String, String>> = factory_client(&base_url)
        .chat_stream(&chat_request())
        .await
        .expect("stream should open")
        .map(|item| item.map_err(|err| format!("{err:#}")))
        .collect()
        .await;

    assert_eq!(items.len(), 2, "unexpected items: {items:?}");
    assert_eq!(items[0], Ok("c1".to_string()));
    let err = items[1].as_ref().expect_err("second item should be the failure");
    assert!(err.contains("timed out"), "unexpected message: {err}");
    assert!(err.contains("OPENAI_TIMEOUT_SECS"), "unexpected message: {err}");

    server.join().expect("server thread should join");
}

#[tokio::test]
async fn non_success_status_surfaces_body() {
    let (base_url, server) = serve_once(
        "401 Unauthorized",
        "application/json",
        r#"{"error":{"message":"Incorrect API key provided"}}"#,
    );

    let err = client(&base_url)
        .chat(&chat_request())
        .await
        .expect_err("chat should fail");
    let msg = format!("{err:#}");
    assert!(msg.contains("401"), "unexpected message: {msg}");
    assert!(
        msg.contains("Incorrect API key provided"),
        "unexpected message: {msg}"
    );
    server.join().expect("server thread should join");
}

#[tokio::test]
async fn list_models_sorts_by_id() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"object":"list","data":[
            {"id":"gpt-4o","object":"model","created":1715367049,"owned_by":"system"},
            {"id":"dall-e-3","object":"model","created":1698785189,"owned_by":"system"}
        ]}"#,
    );

    let models = client(&base_url)
        .list_models()
        .await
        .expect("listing should succeed");
    let ids: Vec<&str> = models.iter().map(|model| model.id.as_str()).collect();
    assert_eq!(ids, ["dall-e-3", "gpt-4o"]);
    assert_eq!(models[1].created, 1_715_367_049);

    let request = server.join().expect("server thread should join");
    assert_eq!(request.request_line, "GET /v1/models HTTP/1.1");
}

#[tokio::test]
async fn create_images_normalizes_parameters() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"created":1,"data":[{"url":"https://images.test/1.png"},{"b64_json":"aGVsbG8="}]}"#,
    );

    let images = client(&base_url)
        .create_images(&ImageRequest {
            prompt: "a lighthouse".to_string(),
            model: "dall-e-2".to_string(),
            size: "1792x1024".to_string(),
            quality: "hd".to_string(),
            count: 2,
        })
        .await
        .expect("image generation should succeed");
    assert_eq!(
        images,
        [
            GeneratedImage::Url("https://images.test/1.png".to_string()),
            GeneratedImage::Base64("aGVsbG8=".to_string()),
        ]
    );

    let request = server.join().expect("server thread should join");
    assert_eq!(request.request_line, "POST /v1/images/generations HTTP/1.1");
    let body = request.json();
    assert_eq!(body["size"], "1024x1024");
    assert_eq!(body["n"], 2);
    assert!(body.get("quality").is_none());
}

#[tokio::test]
async fn download_does_not_send_the_credential() {
    let (base_url, server) = serve_once("200 OK", "image/png", "png-bytes");

    let bytes = client("http://unused.invalid/v1")
        .download(&format!("{base_url}/image.png"))
        .await
        .expect("download should succeed");
    assert_eq!(bytes, b"png-bytes");

    let request = server.join().expect("server thread should join");
    assert!(!request.headers.contains_key("authorization"));
}

#[tokio::test]
async fn create_embedding_returns_first_vector() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.25,-0.5,1.0]}]}"#,
    );

    let embedding = client(&base_url)
        .create_embedding(&EmbeddingRequest {
            input: "hello".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: Some(3),
        })
        .await
        .expect("embedding should succeed");
    assert_eq!(embedding, [0.25_f32, -0.5, 1.0]);

    let body = server.join().expect("server thread should join").json();
    assert_eq!(body["input"], "hello");
    assert_eq!(body["encoding_format"], "float");
    assert_eq!(body["dimensions"], 3);
}
