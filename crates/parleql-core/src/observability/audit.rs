//! Append-only audit log of LLM interactions.
//!
//! Records flow through an mpsc channel to a single writer task, which
//! serializes file rotation. Redaction happens on the producer side, before
//! a record ever enters the channel.

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::Utc;
use parleql_error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// One audit line (JSON object per line on disk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub trace_id: String,
    pub timestamp: String,
    pub node: String,
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub tokens: u64,
}

impl AuditRecord {
    pub fn llm_interaction(
        trace_id: &str,
        node: &str,
        model: &str,
        prompt: &str,
        response: &str,
        tokens: u64,
    ) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            node: node.to_string(),
            model: model.to_string(),
            prompt: redact(prompt),
            response: redact(response),
            tokens,
        }
    }
}

fn redaction_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // key=value style secrets
            Regex::new(r"(?i)(api[_-]?key|secret|password|passwd|token)\s*[=:]\s*\S+").expect("static regex"),
            // bearer headers
            Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").expect("static regex"),
            // provider key shapes
            Regex::new(r"\bsk-[A-Za-z0-9_\-]{8,}\b").expect("static regex"),
            // email addresses
            Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("static regex"),
        ]
    })
}

/// Strip secrets and obvious PII before a string is persisted.
pub(crate) fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in redaction_patterns() {
        out = pattern.replace_all(&out, "[REDACTED]").into_owned();
    }
    out
}

enum Message {
    Record(Box<AuditRecord>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct AuditHandle {
    tx: Option<mpsc::UnboundedSender<Message>>,
}

impl AuditHandle {
    /// A handle that drops everything (audit disabled).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, record: AuditRecord) {
        if let Some(tx) = &self.tx {
            // A closed channel means the sink is shutting down; records at
            // that point are dropped by contract.
            let _ = tx.send(Message::Record(Box::new(record)));
        }
    }

    /// Wait for everything queued so far to reach disk.
    pub async fn flush(&self) {
        if let Some(tx) = &self.tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(Message::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }
}

/// The audit sink: owns the writer task.
pub struct AuditLog {
    handle: AuditHandle,
    writer: Option<tokio::task::JoinHandle<()>>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, rotating when the file exceeds
    /// `max_bytes`. Rotation keeps one previous generation (`<path>.1`).
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_loop(path, max_bytes, rx));
        Ok(Self { handle: AuditHandle { tx: Some(tx) }, writer: Some(writer) })
    }

    /// A no-op log for deployments without an audit path.
    pub fn disabled() -> Self {
        Self { handle: AuditHandle::disabled(), writer: None }
    }

    pub fn handle(&self) -> AuditHandle {
        self.handle.clone()
    }

    /// Flush and stop the writer task.
    pub async fn close(mut self) {
        self.handle.flush().await;
        self.handle.tx = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
            let _ = writer.await;
        }
    }
}

async fn writer_loop(path: PathBuf, max_bytes: u64, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Record(record) => {
                if let Err(error) = append(&path, max_bytes, &record).await {
                    tracing::error!(%error, "audit log write failed");
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            },
        }
    }
}

async fn append(path: &PathBuf, max_bytes: u64, record: &AuditRecord) -> std::io::Result<()> {
    if max_bytes > 0 {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() >= max_bytes {
                let rotated = path.with_extension("log.1");
                let _ = tokio::fs::rename(path, &rotated).await;
            }
        }
    }
    let line = serde_json::to_string(record).unwrap_or_else(|_| String::from("{}"));
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}
