use super::{classify, http_client, probe_get, rank_relevance, segment_url, trim_base, Envelope};
use async_trait::async_trait;
use ember_core::{EmberError, KnowledgeQuery, KnowledgeSnippet, KnowledgeSource, Probe, Result};
use futures::future::join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GraphPayload {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MaterialInfo {
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub hazards: Vec<String>,
    #[serde(default)]
    pub safety_measures: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnvironmentInfo {
    pub location: String,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Procedure {
    #[serde(default)]
    pub procedure_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub materials_needed: Vec<String>,
    #[serde(default)]
    pub safety_notes: Vec<String>,
}

fn property_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn key_values(map: &Map<String, Value>) -> Vec<String> {
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, property_text(v)))
        .collect()
}

/// Per-term results in term order, nodes already seen under an earlier term
/// dropped.
pub(crate) fn merge_graph_payloads(payloads: Vec<GraphPayload>) -> GraphPayload {
    let mut seen = HashSet::new();
    let nodes = payloads
        .into_iter()
        .flat_map(|p| p.nodes)
        .filter(|node| seen.insert(node.id.clone()))
        .collect();
    GraphPayload { nodes }
}

/// Graph nodes as snippets, in the order the service ranked them.
pub(crate) fn graph_snippets(source: &str, payload: GraphPayload, base: f32) -> Vec<KnowledgeSnippet> {
    payload
        .nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            let mut text = if node.kind.is_empty() {
                node.label.clone()
            } else {
                format!("{} ({})", node.label, node.kind)
            };
            let props: Vec<String> = node
                .properties
                .iter()
                .filter(|(k, _)| k.as_str() != "name")
                .map(|(k, v)| format!("{}: {}", k, property_text(v)))
                .collect();
            if !props.is_empty() {
                text.push_str(" - ");
                text.push_str(&props.join("; "));
            }
            KnowledgeSnippet::new(source, text, rank_relevance(base, i))
                .with_metadata("node_id", node.id)
                .with_metadata("kind", node.kind)
        })
        .collect()
}

pub(crate) fn material_snippets(source: &str, materials: Vec<MaterialInfo>, base: f32) -> Vec<KnowledgeSnippet> {
    materials
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let mut text = format!("Material {}", m.name);
            let props = key_values(&m.properties);
            if !props.is_empty() {
                text.push_str(&format!(" ({})", props.join("; ")));
            }
            if !m.hazards.is_empty() {
                text.push_str(&format!(". Hazards: {}", m.hazards.join("; ")));
            }
            if !m.safety_measures.is_empty() {
                text.push_str(&format!(". Safety: {}", m.safety_measures.join("; ")));
            }
            text.push('.');
            KnowledgeSnippet::new(source, text, rank_relevance(base, i)).with_metadata("material", m.name)
        })
        .collect()
}

pub(crate) fn environment_snippets(source: &str, env: EnvironmentInfo, base: f32) -> Vec<KnowledgeSnippet> {
    let mut text = format!("Location {}", env.location);
    let conditions = key_values(&env.conditions);
    if !conditions.is_empty() {
        text.push_str(&format!(" ({})", conditions.join("; ")));
    }
    if !env.risks.is_empty() {
        text.push_str(&format!(". Risks: {}", env.risks.join("; ")));
    }
    if !env.recommendations.is_empty() {
        text.push_str(&format!(". Recommended: {}", env.recommendations.join("; ")));
    }
    text.push('.');
    vec![KnowledgeSnippet::new(source, text, base).with_metadata("location", env.location)]
}

/// Keep what succeeded. Fails only when every lookup failed.
fn partial<T>(source: &str, results: Vec<Result<T>>) -> Result<Vec<T>> {
    let total = results.len();
    let mut ok = Vec::with_capacity(total);
    let mut first_err = None;
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(e) => {
                tracing::debug!("{} lookup failed: {}", source, e);
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) if ok.is_empty() => Err(e),
        Some(_) => {
            tracing::warn!("{}: {} of {} lookups failed", source, total - ok.len(), total);
            Ok(ok)
        }
        None => Ok(ok),
    }
}

/// `GET` an enveloped record. A 404 means the service knows nothing about it.
async fn get_record<T: DeserializeOwned>(
    client: &reqwest::Client,
    source: &str,
    url: reqwest::Url,
    timeout: Duration,
) -> Result<Option<T>> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(source, timeout, e))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let envelope: Envelope<T> = response
        .error_for_status()
        .map_err(|e| classify(source, timeout, e))?
        .json()
        .await
        .map_err(|e| classify(source, timeout, e))?;
    envelope.into_data(source)
}

pub(crate) fn procedure_snippets(source: &str, procedures: Vec<Procedure>, base: f32) -> Vec<KnowledgeSnippet> {
    procedures
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let mut text = p.title.clone();
            if !p.description.is_empty() {
                text.push_str(": ");
                text.push_str(&p.description);
            }
            if !p.steps.is_empty() {
                text.push_str(&format!(" Steps: {}.", p.steps.join("; ")));
            }
            if !p.materials_needed.is_empty() {
                text.push_str(&format!(" Needs: {}.", p.materials_needed.join(", ")));
            }
            if !p.safety_notes.is_empty() {
                text.push_str(&format!(" Safety: {}.", p.safety_notes.join("; ")));
            }
            KnowledgeSnippet::new(source, text, rank_relevance(base, i))
                .with_metadata("procedure_id", p.procedure_id)
        })
        .collect()
}

/// Node search against the knowledge-graph service.
pub struct GraphSource {
    name: String,
    base_url: String,
    base_relevance: f32,
    client: reqwest::Client,
}

impl GraphSource {
    pub fn new(name: &str, url: &str, base_relevance: f32) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: trim_base(url),
            base_relevance,
            client: http_client()?,
        })
    }

    async fn search(&self, term: &str, timeout: Duration) -> Result<GraphPayload> {
        let envelope: Envelope<GraphPayload> = self
            .client
            .get(format!("{}/api/v1/knowledge/graph", self.base_url))
            .query(&[("q", term)])
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| classify(&self.name, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(&self.name, timeout, e))?;
        Ok(envelope.into_data(&self.name)?.unwrap_or_default())
    }
}

/// One search per lookup term, run concurrently. The service matches names
/// by substring, so the joined request text would match nothing.
#[async_trait]
impl KnowledgeSource for GraphSource {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let terms: Vec<&str> = if query.terms.is_empty() {
            vec![query.text.as_str()]
        } else {
            query.terms.iter().map(String::as_str).collect()
        };
        let results = join_all(terms.iter().map(|term| self.search(term, timeout))).await;
        let payload = merge_graph_payloads(partial(&self.name, results)?);
        Ok(graph_snippets(&self.name, payload, self.base_relevance))
    }
}

#[async_trait]
impl Probe for GraphSource {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, &self.name, &format!("{}/health", self.base_url), timeout).await
    }
}

/// Rescue procedures from the knowledge-graph service.
pub struct ProcedureSource {
    name: String,
    base_url: String,
    base_relevance: f32,
    client: reqwest::Client,
}

impl ProcedureSource {
    pub fn new(name: &str, url: &str, base_relevance: f32) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: trim_base(url),
            base_relevance,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl KnowledgeSource for ProcedureSource {
    async fn fetch(&self, _query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let envelope: Envelope<Vec<Procedure>> = self
            .client
            .get(format!("{}/procedures", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| classify(&self.name, timeout, e))?
            .json()
            .await
            .map_err(|e| classify(&self.name, timeout, e))?;
        let procedures = envelope.into_data(&self.name)?.unwrap_or_default();
        Ok(procedure_snippets(&self.name, procedures, self.base_relevance))
    }
}

#[async_trait]
impl Probe for ProcedureSource {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, &self.name, &format!("{}/health", self.base_url), timeout).await
    }
}

/// Material records (`/materials/{term}`), one lookup per term.
pub struct MaterialSource {
    name: String,
    base_url: String,
    base_relevance: f32,
    client: reqwest::Client,
}

impl MaterialSource {
    pub fn new(name: &str, url: &str, base_relevance: f32) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: trim_base(url),
            base_relevance,
            client: http_client()?,
        })
    }

    async fn lookup(&self, term: &str, timeout: Duration) -> Result<Option<MaterialInfo>> {
        let url = segment_url(&self.base_url, &["materials", term])
            .map_err(|e| EmberError::dependency(self.name.as_str(), e))?;
        get_record(&self.client, &self.name, url, timeout).await
    }
}

#[async_trait]
impl KnowledgeSource for MaterialSource {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let results = join_all(query.terms.iter().map(|term| self.lookup(term, timeout))).await;
        let materials = partial(&self.name, results)?.into_iter().flatten().collect();
        Ok(material_snippets(&self.name, materials, self.base_relevance))
    }
}

#[async_trait]
impl Probe for MaterialSource {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, &self.name, &format!("{}/health", self.base_url), timeout).await
    }
}

/// The incident location's record (`/environments/{location}`).
pub struct EnvironmentSource {
    name: String,
    base_url: String,
    base_relevance: f32,
    client: reqwest::Client,
}

impl EnvironmentSource {
    pub fn new(name: &str, url: &str, base_relevance: f32) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: trim_base(url),
            base_relevance,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl KnowledgeSource for EnvironmentSource {
    async fn fetch(&self, query: &KnowledgeQuery, timeout: Duration) -> Result<Vec<KnowledgeSnippet>> {
        let Some(location) = query.location.as_deref() else {
            return Ok(Vec::new());
        };
        let url = segment_url(&self.base_url, &["environments", location])
            .map_err(|e| EmberError::dependency(self.name.as_str(), e))?;
        let record: Option<EnvironmentInfo> = get_record(&self.client, &self.name, url, timeout).await?;
        Ok(record
            .map(|env| environment_snippets(&self.name, env, self.base_relevance))
            .unwrap_or_default())
    }
}

#[async_trait]
impl Probe for EnvironmentSource {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        probe_get(&self.client, &self.name, &format!("{}/health", self.base_url), timeout).await
    }
}
