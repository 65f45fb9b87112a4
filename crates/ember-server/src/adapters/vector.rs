use super::{classify, http_client, probe_get, trim_base};
use async_trait::async_trait;
use ember_core::{KnowledgeQuery, KnowledgeSnippet, KnowledgeSource, Probe, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchHit {
    pub document_id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

pub(crate) fn search_snippets(source: &str, response: SearchResponse) -> Vec<KnowledgeSnippet> {
    response
        .results
        .into_iter()
        .map(|hit| {
            let text = if hit.title.is_empty() {
                hit.content
            } else {
                format!("{}: {}", hit.title, hit.content)
            };
            let mut snippet = KnowledgeSnippet::new(source, text, hit.score)
                .with_metadata("document_id", hit.document_id);
            for (key, value) in hit.metadata {
                snippet.metadata.entry(key).or_insert(value);
            }
            snippet
        })
        .collect()
}

/// Semantic search against the vector service.
pub struct VectorSource {
    name: String,
    base_url: String,
    limit: usize,
    client: reqwest::Client,
}

impl VectorSource {
    pub fn new(name: &str, url: &str, limit: usize) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: trim_base(url),
            limit,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl KnowledgeSource for VectorSource {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let response: SearchResponse = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&SearchRequest {
                query: &query.text,
                limit: self.limit,
            })
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| classify(&self.name, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(&self.name, timeout, e))?;
        Ok(search_snippets(&self.name, response))
    }
}

#[async_trait]
impl Probe for VectorSource {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, &self.name, &format!("{}/health", self.base_url), timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_keep_scores_and_metadata() {
        let body = r#"{
            "query": "wood table",
            "results": [
                {"document_id": "d1", "title": "Class A fires", "content": "Cool with water.", "score": 0.92, "metadata": {"lang": "en"}},
                {"document_id": "d2", "title": "", "content": "Keep exits clear.", "score": 1.7, "metadata": {}}
            ],
            "total_count": 2,
            "search_time": 0.01
        }"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let snippets = search_snippets("vector", response);

        assert_eq!(snippets[0].text, "Class A fires: Cool with water.");
        assert_eq!(snippets[0].metadata["lang"], "en");
        assert_eq!(snippets[0].metadata["document_id"], "d1");
        assert_eq!(snippets[1].text, "Keep exits clear.");
        assert_eq!(snippets[1].relevance, 1.0, "scores are clamped");
    }
}
