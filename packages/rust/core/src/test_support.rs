//! Shared fixtures for this crate's tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use linkshelf_shared::{NewRecord, Record, RecordId, Result, UpdateRecord};
use linkshelf_storage::{RecordRepository, Storage};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Temp-file storage, fresh per test.
pub(crate) async fn temp_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("ls_core_{}.db", Uuid::now_v7()));
    Storage::open(&tmp).await.expect("open test db")
}

/// Insert a record pointing at `url` with title `seed` and tag `seed`.
pub(crate) async fn seed_record(storage: &Storage, url: &str) -> Record {
    storage
        .insert_record(&NewRecord {
            url: url.into(),
            title: "seed".into(),
            tags: vec!["seed".into()],
            images: vec!["cover.png".into()],
            user_id: "u1".into(),
            ..Default::default()
        })
        .await
        .expect("seed record")
}

/// A mock server answering `GET /page` with `status` and `body`.
pub(crate) async fn page_server(status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    server
}

/// Repository wrapper that counts calls.
pub(crate) struct CountingRepository {
    inner: Storage,
    reads: AtomicUsize,
    updates: AtomicUsize,
}

impl CountingRepository {
    pub(crate) fn new(inner: Storage) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.inner
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordRepository for CountingRepository {
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_record(id).await
    }

    async fn update_record(&self, update: &UpdateRecord) -> Result<Record> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.replace_record(update).await
    }
}

/// Shorthand for the dyn repository handle the pipeline takes.
pub(crate) fn as_repository(repo: &Arc<CountingRepository>) -> Arc<dyn RecordRepository> {
    repo.clone()
}
