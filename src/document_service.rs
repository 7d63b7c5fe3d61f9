//! Bindings to the document-understanding service.
//!
//! The classifier treats the service as text-in/text-out: it hands over a PDF
//! plus the names of the folders that already exist and gets back a free-text
//! suggestion. [`OpenAiDocumentService`] talks to the OpenAI Responses API;
//! [`DisabledDocumentService`] is used when the service is switched off or no
//! API key is available.

use crate::config::DocumentServiceSettings;
use base64::{Engine as _, engine::general_purpose};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from a single call to the document service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service is switched off in configuration.
    #[error("document service is disabled")]
    Disabled,
    /// The API key environment variable is unset or empty.
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
    /// The request did not finish within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection or protocol failure.
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A PDF handed to the service.
#[derive(Debug, Clone, Copy)]
pub struct DocumentUpload<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
}

/// Something that can suggest a subfolder for a document.
pub trait DocumentService {
    /// Returns the service's raw reply for `document`, given the folder names
    /// that already exist under the documents root.
    fn suggest_subcategory(
        &self,
        document: DocumentUpload<'_>,
        existing_folders: &[String],
    ) -> Result<String, ServiceError>;
}

/// A service that always declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDocumentService;

impl DocumentService for DisabledDocumentService {
    fn suggest_subcategory(
        &self,
        _document: DocumentUpload<'_>,
        _existing_folders: &[String],
    ) -> Result<String, ServiceError> {
        Err(ServiceError::Disabled)
    }
}

/// Builds the instruction sent alongside the document.
pub fn subcategory_prompt(existing_folders: &[String]) -> String {
    let folders = serde_json::to_string(existing_folders).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are sorting a PDF into a subfolder of the user's Documents folder. \
         These folders already exist: {folders}. \
         If one of them fits this document well, reply with EXACTLY that folder name. \
         If none fits, reply with a NEW one-word lowercase category such as \
         'finance', 'tax', 'legal', 'invoice', 'receipt', 'insurance', 'education', \
         'medical' or 'travel'; join words with a hyphen if you need more than one. \
         Reply with ONLY the folder name: no quotes, no punctuation, no explanation."
    )
}

/// Client for the OpenAI Responses API.
#[derive(Debug)]
pub struct OpenAiDocumentService {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiDocumentService {
    /// Creates a client, reading the API key from the configured environment
    /// variable.
    pub fn from_settings(settings: &DocumentServiceSettings) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ServiceError::MissingApiKey(settings.api_key_env.clone()))?;

        Self::new(settings, api_key)
    }

    /// Creates a client with an explicit API key.
    pub fn new(
        settings: &DocumentServiceSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let timeout = settings.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ServiceError::Http)?;

        Ok(Self {
            client,
            endpoint: format!("{}/responses", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else {
            ServiceError::Http(error)
        }
    }
}

impl DocumentService for OpenAiDocumentService {
    fn suggest_subcategory(
        &self,
        document: DocumentUpload<'_>,
        existing_folders: &[String],
    ) -> Result<String, ServiceError> {
        let prompt = subcategory_prompt(existing_folders);
        let file_data = format!(
            "data:application/pdf;base64,{}",
            general_purpose::STANDARD.encode(document.bytes)
        );

        let request = ResponsesRequest {
            model: &self.model,
            input: vec![InputMessage {
                role: "user",
                content: vec![
                    InputContent::InputText { text: &prompt },
                    InputContent::InputFile {
                        filename: document.file_name,
                        file_data: &file_data,
                    },
                ],
            }],
        };

        debug!(
            file = document.file_name,
            bytes = document.bytes.len(),
            model = %self.model,
            "Requesting document subcategory"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response.text().map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: ResponsesReply = serde_json::from_str(&body)
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

        parsed
            .text()
            .ok_or_else(|| ServiceError::MalformedResponse("no output text in response".to_string()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Vec<InputContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent<'a> {
    InputText { text: &'a str },
    InputFile { filename: &'a str, file_data: &'a str },
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesReply {
    /// The convenience `output_text` field when present, otherwise the first
    /// text item of the output array.
    fn text(self) -> Option<String> {
        if let Some(text) = self.output_text {
            return Some(text);
        }
        self.output
            .into_iter()
            .flat_map(|item| item.content)
            .find(|content| content.kind == "output_text" || content.kind == "text")
            .and_then(|content| content.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    const PDF: DocumentUpload<'static> = DocumentUpload {
        file_name: "invoice.pdf",
        bytes: b"%PDF-1.4",
    };

    /// Serves one connection on a local port. `respond` gets the raw request
    /// and returns the raw response, or `None` to hang without answering.
    fn stub_server(
        respond: impl FnOnce(&str) -> Option<String> + Send + 'static,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                request.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            request.push_str(&String::from_utf8_lossy(&body));
            tx.send(request.clone()).unwrap();

            let mut stream = stream;
            match respond(&request) {
                Some(response) => {
                    stream.write_all(response.as_bytes()).unwrap();
                }
                None => thread::sleep(Duration::from_secs(3)),
            }
        });

        (base_url, rx)
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        )
    }

    fn service_for(base_url: &str) -> OpenAiDocumentService {
        let settings = DocumentServiceSettings {
            base_url: base_url.to_string(),
            timeout_secs: 1,
            ..DocumentServiceSettings::default()
        };
        OpenAiDocumentService::new(&settings, "test-key").unwrap()
    }

    #[test]
    fn test_suggestion_round_trip_over_http() {
        let (base_url, requests) = stub_server(|_| {
            Some(http_response("200 OK", r#"{"output_text": "Finance"}"#))
        });

        let reply = service_for(&base_url)
            .suggest_subcategory(PDF, &["finance".to_string()])
            .unwrap();
        assert_eq!(reply, "Finance");

        let request = requests.recv().unwrap();
        assert!(request.starts_with("POST /responses "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer test-key"));
        assert!(request.contains(r#""type":"input_file""#));
        assert!(request.contains("data:application/pdf;base64,JVBERi0xLjQ="));
        assert!(request.contains(r#"[\"finance\"]"#));
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let (base_url, _requests) = stub_server(|_| None);

        let result = service_for(&base_url).suggest_subcategory(PDF, &[]);
        assert!(
            matches!(result, Err(ServiceError::Timeout(d)) if d == Duration::from_secs(1)),
            "unexpected result: {:?}",
            result
        );
    }

    #[test]
    fn test_error_status_is_reported() {
        let (base_url, _requests) = stub_server(|_| {
            Some(http_response(
                "500 Internal Server Error",
                r#"{"error": "boom"}"#,
            ))
        });

        match service_for(&base_url).suggest_subcategory(PDF, &[]) {
            Err(ServiceError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_body_is_malformed() {
        let (base_url, _requests) =
            stub_server(|_| Some(http_response("200 OK", "definitely not json")));

        let result = service_for(&base_url).suggest_subcategory(PDF, &[]);
        assert!(matches!(result, Err(ServiceError::MalformedResponse(_))));
    }

    #[test]
    fn test_reply_without_text_is_malformed() {
        let (base_url, _requests) =
            stub_server(|_| Some(http_response("200 OK", r#"{"output": []}"#)));

        let result = service_for(&base_url).suggest_subcategory(PDF, &[]);
        assert!(matches!(result, Err(ServiceError::MalformedResponse(_))));
    }

    #[test]
    fn test_prompt_lists_existing_folders() {
        let prompt = subcategory_prompt(&["finance".to_string(), "Legal Stuff".to_string()]);
        assert!(prompt.contains(r#"["finance","Legal Stuff"]"#));
        assert!(prompt.contains("EXACTLY"));
        assert!(prompt.contains("'receipt'"));
    }

    #[test]
    fn test_prompt_with_no_folders() {
        let prompt = subcategory_prompt(&[]);
        assert!(prompt.contains("[]"));
    }

    #[test]
    fn test_request_serialization() {
        let request = ResponsesRequest {
            model: "gpt-4o-mini",
            input: vec![InputMessage {
                role: "user",
                content: vec![
                    InputContent::InputText { text: "pick one" },
                    InputContent::InputFile {
                        filename: "invoice.pdf",
                        file_data: "data:application/pdf;base64,JVBERg==",
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(json["input"][0]["content"][1]["type"], "input_file");
        assert_eq!(json["input"][0]["content"][1]["filename"], "invoice.pdf");
    }

    #[test]
    fn test_reply_prefers_output_text() {
        let reply: ResponsesReply =
            serde_json::from_str(r#"{"output_text": "finance", "output": []}"#).unwrap();
        assert_eq!(reply.text().as_deref(), Some("finance"));
    }

    #[test]
    fn test_reply_falls_back_to_output_array() {
        let reply: ResponsesReply = serde_json::from_str(
            r#"{
                "id": "resp_1",
                "output": [
                    {"type": "reasoning", "content": []},
                    {"type": "message", "role": "assistant", "content": [
                        {"type": "output_text", "text": "tax", "annotations": []}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(reply.text().as_deref(), Some("tax"));
    }

    #[test]
    fn test_reply_without_text() {
        let reply: ResponsesReply = serde_json::from_str(r#"{"output": []}"#).unwrap();
        assert_eq!(reply.text(), None);
    }

    #[test]
    fn test_disabled_service_declines() {
        let service = DisabledDocumentService;
        let upload = DocumentUpload {
            file_name: "a.pdf",
            bytes: b"%PDF-1.4",
        };
        assert!(matches!(
            service.suggest_subcategory(upload, &[]),
            Err(ServiceError::Disabled)
        ));
    }

    #[test]
    fn test_missing_api_key() {
        let settings = DocumentServiceSettings {
            api_key_env: "TIDYWATCH_TEST_UNSET_KEY_9F2C".to_string(),
            ..DocumentServiceSettings::default()
        };
        assert!(matches!(
            OpenAiDocumentService::from_settings(&settings),
            Err(ServiceError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
