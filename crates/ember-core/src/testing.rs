//! Test doubles shared by the unit tests.

use crate::aggregator::KnowledgeSnippet;
use crate::cache::MemoryCache;
use crate::client::{GenParams, Generator, KnowledgeSource, PlanCache};
use crate::error::{EmberError, Result};
use crate::health::Probe;
use crate::request::{KnowledgeQuery, Request, RequestContext, RequestEntry, Urgency};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct StaticSource {
    snippets: Vec<KnowledgeSnippet>,
    calls: AtomicUsize,
    last_query: Mutex<Option<KnowledgeQuery>>,
}

impl StaticSource {
    pub fn new(snippets: Vec<KnowledgeSnippet>) -> Self {
        Self {
            snippets,
            calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<KnowledgeQuery> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeSource for StaticSource {
    async fn fetch(&self, query: &KnowledgeQuery, _timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        Ok(self.snippets.clone())
    }
}

pub struct FailingSource {
    message: String,
    calls: AtomicUsize,
}

impl FailingSource {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeSource for FailingSource {
    async fn fetch(&self, _query: &KnowledgeQuery, _timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmberError::dependency("mock", &self.message))
    }
}

/// Sleeps for `delay`, ignoring the timeout it is handed.
pub struct SlowSource {
    delay: Duration,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl KnowledgeSource for SlowSource {
    async fn fetch(&self, _query: &KnowledgeQuery, _timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![KnowledgeSnippet::new("slow", "late arrival", 1.0)])
    }
}

/// Sets the flag when dropped, marking an in-flight call as abandoned.
struct DropFlag<'a>(&'a AtomicBool);

impl Drop for DropFlag<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never answers. Records whether its fetch was dropped mid-call.
pub struct PendingSource {
    abandoned: AtomicBool,
}

impl PendingSource {
    pub fn new() -> Self {
        Self {
            abandoned: AtomicBool::new(false),
        }
    }

    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeSource for PendingSource {
    async fn fetch(&self, _query: &KnowledgeQuery, _timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let _flag = DropFlag(&self.abandoned);
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

pub enum GenBehavior {
    Reply(String),
    Fail(String),
    Hang,
    Panic,
}

pub struct MockGenerator {
    behavior: GenBehavior,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    abandoned: AtomicBool,
}

impl MockGenerator {
    pub fn new(behavior: GenBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            abandoned: AtomicBool::new(false),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(GenBehavior::Reply(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    /// Whether a hanging call was dropped by its caller.
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, _params: &GenParams, _timeout: Duration) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match &self.behavior {
            GenBehavior::Reply(text) => Ok(text.clone()),
            GenBehavior::Fail(message) => Err(EmberError::dependency("generation", message)),
            GenBehavior::Hang => {
                let _flag = DropFlag(&self.abandoned);
                std::future::pending::<()>().await;
                Ok(String::new())
            }
            GenBehavior::Panic => panic!("generator exploded"),
        }
    }
}

/// In-memory cache that counts calls and can be switched to fail.
pub struct CountingCache {
    inner: MemoryCache,
    gets: AtomicUsize,
    sets: AtomicUsize,
    failing: AtomicBool,
}

impl CountingCache {
    pub fn new() -> Self {
        Self {
            inner: MemoryCache::new(),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let cache = Self::new();
        cache.failing.store(true, Ordering::SeqCst);
        cache
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub async fn put_raw(&self, key: &str, value: Vec<u8>) {
        self.inner
            .set(key, value, Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap();
    }
}

#[async_trait]
impl PlanCache for CountingCache {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmberError::dependency("cache", "connection refused"));
        }
        self.inner.get(key, timeout).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, timeout: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmberError::dependency("cache", "connection refused"));
        }
        self.inner.set(key, value, ttl, timeout).await
    }
}

pub struct ToggleProbe {
    up: AtomicBool,
}

impl ToggleProbe {
    pub fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for ToggleProbe {
    async fn probe(&self, _timeout: Duration) -> Result<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EmberError::dependency("probe", "down"))
        }
    }
}

/// Two entries, kitchen context, high urgency.
pub fn sample_request() -> Request {
    Request::new(
        vec![
            RequestEntry::new("Wooden table", "furniture").with_attribute("material", "wood"),
            RequestEntry::new("Electric heater", "appliance"),
        ],
        RequestContext::new().with("location", "kitchen"),
    )
    .with_urgency(Urgency::High)
}

/// A well-formed JSON plan as a model would return it.
pub fn generated_plan_text() -> String {
    r#"Here is the plan:
{
  "title": "Kitchen fire response",
  "priority": "high",
  "steps": [
    {"description": "Cut power to the heater", "equipment": ["Insulated gloves"], "warnings": ["Never use water on electrical fires"], "estimated_minutes": 2},
    {"description": "Smother the table fire", "equipment": ["ABC extinguisher", "Fire blanket"], "warnings": [], "estimated_minutes": 5}
  ]
}"#
    .to_string()
}
