//! In-process fetcher with scripted per-chapter replies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bookfetch_core::source::RawPage;
use bookfetch_core::{
    BookInfo, ChapterDescriptor, FetchError, Fetcher, JsonParser, Source, SourcePolicy, Volume,
};

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A single chapter page with this title and content.
    Page { title: String, content: String },
    /// A page whose content is blank.
    Empty,
    /// An HTTP error status.
    Status(u16),
}

impl Reply {
    pub fn page(title: &str, content: &str) -> Self {
        Self::Page {
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Default)]
struct State {
    book_info: Option<String>,
    book_info_calls: usize,
    /// Replies are consumed in order; the last one repeats.
    scripts: HashMap<String, VecDeque<Reply>>,
    calls: HashMap<String, usize>,
}

/// Scripted [`Fetcher`]. Unscripted chapters answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    state: Mutex<State>,
    delay: Duration,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chapter request waits `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_book_info(self, info: &BookInfo) -> Self {
        self.lock().book_info = Some(serde_json::to_string(info).unwrap_or_default());
        self
    }

    pub fn script(self, chapter_id: &str, replies: Vec<Reply>) -> Self {
        self.lock()
            .scripts
            .insert(chapter_id.to_string(), replies.into());
        self
    }

    /// Chapter `id` always answers with content `"content {id}"`.
    pub fn chapter(self, id: &str) -> Self {
        let reply = Reply::page(&format!("Chapter {id}"), &format!("content {id}"));
        self.script(id, vec![reply])
    }

    pub fn calls(&self, chapter_id: &str) -> usize {
        self.lock().calls.get(chapter_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn book_info_calls(&self) -> usize {
        self.lock().book_info_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, chapter_id: &str) -> Option<Reply> {
        let mut state = self.lock();
        *state.calls.entry(chapter_id.to_string()).or_default() += 1;
        let queue = state.scripts.get_mut(chapter_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn get_book_info(&self, book_id: &str) -> Result<Vec<RawPage>, FetchError> {
        let mut state = self.lock();
        state.book_info_calls += 1;
        state
            .book_info
            .clone()
            .map(|page| vec![page])
            .ok_or_else(|| FetchError::http_status(format!("fake://{book_id}"), 404))
    }

    async fn get_book_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<RawPage>, FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let url = format!("fake://{book_id}/{chapter_id}");
        match self.next_reply(chapter_id) {
            Some(Reply::Page { title, content }) => Ok(vec![
                serde_json::json!({ "title": title, "content": content }).to_string(),
            ]),
            Some(Reply::Empty) => Ok(vec![r#"{"title":"","content":""}"#.to_string()]),
            Some(Reply::Status(status)) => Err(FetchError::http_status(url, status)),
            None => Err(FetchError::http_status(url, 404)),
        }
    }
}

/// Source backed by `fetcher` and the JSON parser.
pub fn fake_source(fetcher: &Arc<FakeFetcher>, policy: SourcePolicy) -> Source {
    let fetcher: Arc<dyn Fetcher> = fetcher.clone();
    Source::new(fetcher, Arc::new(JsonParser)).with_policy(policy)
}

/// Book info listing chapter ids `1..=count` in one volume.
pub fn book_info(name: &str, count: usize) -> BookInfo {
    BookInfo {
        book_name: name.to_string(),
        author: "Tester".to_string(),
        volumes: vec![Volume {
            volume_name: "Volume 1".to_string(),
            chapters: (1..=count)
                .map(|i| ChapterDescriptor::new(i.to_string(), format!("Chapter {i}")))
                .collect(),
        }],
        ..BookInfo::default()
    }
}
