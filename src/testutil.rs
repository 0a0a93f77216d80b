//! In-memory `ObjectStore` and `MessagingGateway` fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

use crate::drive::{ByteStream, ObjectStore, StoreError};
use crate::telegram::{GatewayError, MessagingGateway, Update};

#[derive(Debug, Clone)]
struct StoredFile {
    id: String,
    name: String,
    mime: Option<String>,
    content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replaced {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub content_mime: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct FakeStore {
    files: Vec<StoredFile>,
    finds: AtomicUsize,
    downloads: AtomicUsize,
    /// Transient failures served before `download` starts succeeding.
    download_failures: AtomicUsize,
    pub replaced: Mutex<Vec<Replaced>>,
}

impl FakeStore {
    pub fn with_file(mut self, name: &str, content: &[u8]) -> Self {
        let id = format!("id-{}", self.files.len());
        self.files.push(StoredFile {
            id,
            name: name.to_string(),
            mime: None,
            content: content.to_vec(),
        });
        self
    }

    pub fn with_typed_file(mut self, name: &str, mime: &str, content: &[u8]) -> Self {
        self = self.with_file(name, content);
        if let Some(last) = self.files.last_mut() {
            last.mime = Some(mime.to_string());
        }
        self
    }

    pub fn failing_downloads(self, n: usize) -> Self {
        self.download_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn replaced(&self) -> Vec<Replaced> {
        self.replaced.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn find(&self, name: &str, mime: Option<&str>) -> Result<String, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let matches: Vec<&StoredFile> = self
            .files
            .iter()
            .filter(|f| f.name == name && (mime.is_none() || f.mime.as_deref() == mime))
            .collect();
        match matches.as_slice() {
            [] => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            [one] => Ok(one.id.clone()),
            many => Err(StoreError::Ambiguous {
                name: name.to_string(),
                count: many.len(),
            }),
        }
    }

    async fn download(
        &self,
        id: &str,
        _export_mime: Option<&str>,
    ) -> Result<ByteStream, StoreError> {
        let pending = self.download_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.download_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::HttpStatus {
                status: 503,
                context: "download".into(),
                message: "try again".into(),
            });
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let file = self
            .files
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::NotFound {
                name: id.to_string(),
            })?;
        // two chunks so consumers see a real stream
        let mid = file.content.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&file.content[..mid])),
            Ok(Bytes::copy_from_slice(&file.content[mid..])),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn replace(
        &self,
        id: &str,
        name: &str,
        mime: &str,
        content_mime: &str,
        content: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.replaced.lock().unwrap().push(Replaced {
            id: id.to_string(),
            name: name.to_string(),
            mime: mime.to_string(),
            content_mime: content_mime.to_string(),
            content,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat: String,
        text: String,
    },
    File {
        chat: String,
        filename: String,
        content: Vec<u8>,
        caption: String,
    },
}

#[derive(Default)]
pub struct FakeGateway {
    pub sent: Mutex<Vec<Sent>>,
    /// Scripted `poll_updates` answers, served in order; empty once drained.
    pub polls: Mutex<VecDeque<Result<Vec<Update>, GatewayError>>>,
    pub offsets: Mutex<Vec<i64>>,
    pub fail_sends: bool,
}

impl FakeGateway {
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn push_poll(&self, result: Result<Vec<Update>, GatewayError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn next_id(&self) -> Result<String, GatewayError> {
        if self.fail_sends {
            return Err(GatewayError::Api {
                code: 400,
                description: "Bad Request: chat not found".into(),
            });
        }
        Ok((self.sent.lock().unwrap().len() + 1).to_string())
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn send_text(&self, chat: &str, text: &str) -> Result<String, GatewayError> {
        let id = self.next_id()?;
        self.sent.lock().unwrap().push(Sent::Text {
            chat: chat.to_string(),
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn send_file(
        &self,
        chat: &str,
        filename: &str,
        mut content: ByteStream,
        caption: &str,
    ) -> Result<String, GatewayError> {
        let id = self.next_id()?;
        let mut bytes = Vec::new();
        while let Some(chunk) = content.next().await {
            match chunk {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => {
                    return Err(GatewayError::Api {
                        code: 0,
                        description: e.to_string(),
                    })
                }
            }
        }
        self.sent.lock().unwrap().push(Sent::File {
            chat: chat.to_string(),
            filename: filename.to_string(),
            content: bytes,
            caption: caption.to_string(),
        });
        Ok(id)
    }

    async fn poll_updates(
        &self,
        offset: i64,
        _timeout: Duration,
    ) -> Result<Vec<Update>, GatewayError> {
        self.offsets.lock().unwrap().push(offset);
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn text_update(update_id: i64, sender: i64, chat: i64, text: &str, timestamp: i64) -> Update {
    Update {
        update_id,
        sender_id: Some(sender),
        chat_id: Some(chat),
        text: text.to_string(),
        timestamp,
    }
}

/// Base URL of a local port nothing listens on.
pub fn closed_port_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
