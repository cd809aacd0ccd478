//! Push sink adapters - commit one record per pushed message.
//!
//! Both sinks drain a subscription channel fed by the chat client and run
//! independently of the poll engine. Delivery is best effort: a failed
//! commit is logged and never retried, and the subscription keeps going.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::forwarder::client::ChatClient;
use crate::forwarder::message::{Message, SinkRecord};

/// Header row written when the CSV file is first created.
const CSV_HEADER: &str = "Sender,Channel,Message,Timestamp";

/// UTF-8 signature prepended to a new CSV file so spreadsheet tools pick
/// the right encoding.
const UTF8_BOM: &str = "\u{feff}";

/// Errors raised while committing a record to a sink.
#[derive(Debug)]
pub enum SinkError {
    /// The webhook request failed at the transport level.
    Http(String),
    /// The webhook answered, but not with `{"status": "success"}`.
    BadResponse(String),
    /// The CSV file could not be opened or written.
    Io(std::io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(msg) => write!(f, "webhook request failed: {}", msg),
            Self::BadResponse(msg) => write!(f, "webhook rejected the record: {}", msg),
            Self::Io(e) => write!(f, "file write failed: {}", e),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct WebhookResponse {
    status: Option<String>,
}

/// Relays pushed messages to a spreadsheet-backed webhook via HTTP GET.
pub struct SheetSink {
    webhook_url: String,
    http: reqwest::Client,
}

impl SheetSink {
    pub fn new(webhook_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self { webhook_url, http }
    }

    /// Drain the subscription, one webhook call per pushed message.
    pub async fn run(self, client: Arc<dyn ChatClient>, mut rx: mpsc::Receiver<Message>) {
        info!("Listening for new messages...");
        while let Some(msg) = rx.recv().await {
            let title = client.chat_title(msg.chat_id).await;
            let record = SinkRecord::from_message(&msg, title);
            match self.deliver(&record).await {
                Ok(()) => info!("Message forwarded to the sheet webhook"),
                Err(e) => warn!(
                    "Failed to forward message from \"{}\" to the sheet webhook: {}",
                    record.chat_title, e
                ),
            }
        }
    }

    async fn deliver(&self, record: &SinkRecord) -> Result<(), SinkError> {
        let url = webhook_url(&self.webhook_url, record);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| SinkError::BadResponse(e.to_string()))?;

        if body.status.as_deref() == Some("success") {
            Ok(())
        } else {
            Err(SinkError::BadResponse(format!(
                "status was {:?}",
                body.status
            )))
        }
    }
}

/// Build the webhook GET url. Chat title and message text are URL-encoded;
/// the "YYYY-MM-DD HH:MM:SS" timestamp is passed as-is.
fn webhook_url(base: &str, record: &SinkRecord) -> String {
    format!(
        "{}?chat_name={}&message={}&timestamp={}",
        base,
        urlencoding::encode(&record.chat_title),
        urlencoding::encode(&record.text),
        record.timestamp,
    )
}

/// Appends pushed messages to a local CSV file.
///
/// Single-writer: nothing guards the file against a second process.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Drain the subscription, one appended row per pushed message.
    pub async fn run(self, client: Arc<dyn ChatClient>, mut rx: mpsc::Receiver<Message>) {
        info!("Listening for new messages...");
        while let Some(msg) = rx.recv().await {
            let title = client.chat_title(msg.chat_id).await;
            let record = SinkRecord::from_message(&msg, title);
            match self.append(&record) {
                Ok(()) => info!("Logged message from \"{}\" to {}", record.chat_title, self.path.display()),
                Err(e) => warn!("Failed to log message to {}: {}", self.path.display(), e),
            }
        }
    }

    /// Append one record. A missing file is created with the UTF-8
    /// signature and the header row; an existing file gets the row only.
    pub fn append(&self, record: &SinkRecord) -> Result<(), SinkError> {
        let is_new = !self.path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SinkError::Io)?;

        let mut chunk = String::new();
        if is_new {
            chunk.push_str(UTF8_BOM);
            chunk.push_str(CSV_HEADER);
            chunk.push('\n');
        }
        chunk.push_str(&csv_row(record));
        file.write_all(chunk.as_bytes()).map_err(SinkError::Io)
    }
}

fn csv_row(record: &SinkRecord) -> String {
    format!(
        "{},{},{},{}\n",
        csv_field(&record.sender_id.to_string()),
        csv_field(&record.chat_title),
        csv_field(&record.text),
        csv_field(&record.timestamp),
    )
}

/// Quote a field when it contains a separator, quote or line break;
/// embedded quotes are doubled.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> SinkRecord {
        SinkRecord {
            sender_id: 777,
            chat_title: "Deals".to_string(),
            text: text.to_string(),
            timestamp: "2024-03-05 14:30:09".to_string(),
        }
    }

    #[test]
    fn test_webhook_url_encodes_title_and_text() {
        let rec = SinkRecord {
            sender_id: 1,
            chat_title: "Hot Deals & More".to_string(),
            text: "50% off!".to_string(),
            timestamp: "2024-03-05 14:30:09".to_string(),
        };
        let url = webhook_url("https://example.com/hook", &rec);
        assert_eq!(
            url,
            "https://example.com/hook?chat_name=Hot%20Deals%20%26%20More&message=50%25%20off%21&timestamp=2024-03-05 14:30:09"
        );
    }

    #[test]
    fn test_csv_field_plain_value_unquoted() {
        assert_eq!(csv_field("hello"), "hello");
    }

    #[test]
    fn test_csv_field_quotes_separators_and_newlines() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("line1\nline2"), "\"line1\nline2\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_first_append_writes_bom_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = CsvSink::new(path.clone());

        sink.append(&record("first")).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with("\u{feff}".as_bytes()));
        let content = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = content.trim_end().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(CSV_HEADER));
        assert_eq!(lines[1], "777,Deals,first,2024-03-05 14:30:09");
    }

    #[test]
    fn test_second_append_adds_row_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = CsvSink::new(path.clone());

        sink.append(&record("first")).unwrap();
        sink.append(&record("second")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.trim_end().lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(content.matches(CSV_HEADER).count(), 1);
        assert_eq!(lines[2], "777,Deals,second,2024-03-05 14:30:09");
    }

    #[test]
    fn test_append_quotes_message_with_comma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = CsvSink::new(path.clone());

        sink.append(&record("one, two")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("777,Deals,\"one, two\",2024-03-05 14:30:09"));
    }
}
