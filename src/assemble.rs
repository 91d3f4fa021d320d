//! llms.txt document assembly.
//!
//! The core is polymorphic over one capability: turn a site's categorized
//! pages into a Markdown document. The template variant is deterministic and
//! is the default; the LLM variant reformats the same digest through an
//! OpenAI-compatible chat endpoint when an API key is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::data::models::{Page, PageCategory, PageStatus, Site};
use crate::error::Result;

const LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You write llms.txt files: concise Markdown documents that describe a \
website's content for LLM consumers. Keep the section structure of the draft you are given, \
tighten the link descriptions, and return only the Markdown document.";

#[async_trait]
pub trait Assembler: Send + Sync {
    /// Assemble a Markdown llms.txt document from a site's current pages.
    async fn summarize(&self, site: &Site, pages: &[Page]) -> Result<String>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

/// Pick the assembler variant for this deployment.
pub fn assembler_from_config(config: &Config) -> Arc<dyn Assembler> {
    if config.llm_api_key.is_empty() {
        Arc::new(TemplateAssembler)
    } else {
        Arc::new(LlmAssembler::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        ))
    }
}

/// Deterministic Markdown assembly: site header, then one section per
/// category in priority order, pages sorted by relevance.
pub struct TemplateAssembler;

impl TemplateAssembler {
    /// Render the document synchronously. Also serves as the digest handed
    /// to the LLM variant.
    pub fn render(site: &Site, pages: &[Page]) -> String {
        let mut doc = String::new();

        let heading = site
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&site.domain);
        doc.push_str(&format!("# {heading}\n"));

        if let Some(description) = site.description.as_deref().filter(|d| !d.is_empty()) {
            doc.push_str(&format!("\n> {description}\n"));
        }

        for category in PageCategory::ordered() {
            let mut section: Vec<&Page> = pages
                .iter()
                .filter(|p| p.status != PageStatus::Removed && p.category == category)
                .collect();
            if section.is_empty() {
                continue;
            }

            section.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.url.cmp(&b.url))
            });

            doc.push_str(&format!("\n## {}\n\n", category.label()));
            for page in section {
                let title = page.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&page.url);
                match page.description.as_deref().filter(|d| !d.is_empty()) {
                    Some(description) => {
                        doc.push_str(&format!("- [{title}]({}): {description}\n", page.url));
                    }
                    None => doc.push_str(&format!("- [{title}]({})\n", page.url)),
                }
            }
        }

        doc
    }
}

#[async_trait]
impl Assembler for TemplateAssembler {
    async fn summarize(&self, site: &Site, pages: &[Page]) -> Result<String> {
        Ok(Self::render(site, pages))
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

/// Assembly through an OpenAI-compatible chat completion endpoint.
pub struct LlmAssembler {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl LlmAssembler {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Assembler for LlmAssembler {
    async fn summarize(&self, site: &Site, pages: &[Page]) -> Result<String> {
        let draft = TemplateAssembler::render(site, pages);
        debug!(model = %self.model, draft_len = draft.len(), "requesting LLM assembly");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &draft,
                },
            ],
        };

        let response = self
            .client
            .post(LLM_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM assembler returned {status}: {body}");
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("LLM assembler returned no choices"))?;

        Ok(content)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
