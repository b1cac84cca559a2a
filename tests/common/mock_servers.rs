/*!
 * wiremock responders standing in for the translation API
 */

use wiremock::{Request, Respond, ResponseTemplate};

/// Streams the prompt text back as two server-sent events
pub struct EchoTranslationResponder;

impl Respond for EchoTranslationResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();

        let lines: Vec<&str> = text.lines().collect();
        let middle = lines.len() / 2;
        let first = format!("{}\n", lines[..middle].join("\n"));
        let second = lines[middle..].join("\n");

        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(format!("{}{}", sse_event(&first), sse_event(&second)))
    }
}

/// One `data:` event carrying `text` as the first candidate part
pub fn sse_event(text: &str) -> String {
    let payload = serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    });
    format!("data: {}\n\n", payload)
}
