//! Ollama provider
//!
//! Talks to a local Ollama daemon via its `/api/generate` endpoint. Buffered
//! requests use a single JSON response; streaming requests consume the
//! newline-delimited JSON chunk format until the `done` marker.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};

use super::{ChunkStream, Context, Generator, SYSTEM_PREAMBLE, render_context};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Generator backed by an Ollama daemon
pub struct OllamaGenerator {
    /// Provider id this generator is registered under
    id: String,
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    /// Create a generator from provider configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(id: &str, config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            id: id.to_string(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Single-prompt rendering: preamble, query, optional context
    fn build_prompt(query: &str, context: Option<&Context>) -> String {
        let mut prompt = format!("{SYSTEM_PREAMBLE}\n\nUser query: {query}");
        if let Some(rendered) = render_context(context) {
            prompt.push_str("\nAdditional context: ");
            prompt.push_str(&rendered);
        }
        prompt
    }

    fn request_body(&self, query: &str, context: Option<&Context>, stream: bool) -> Value {
        json!({
            "model": self.model,
            "prompt": Self::build_prompt(query, context),
            "stream": stream,
            "options": {
                "temperature": 0.7,
                "top_p": 0.9,
                "num_predict": 512,
            },
        })
    }

    async fn send(&self, query: &str, context: Option<&Context>, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.request_body(query, context, stream))
            .send()
            .await
            .map_err(|e| Error::generator(&self.id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::generator(
                &self.id,
                format!("upstream status {}", response.status()),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, query: &str, context: Option<&Context>) -> Result<String> {
        let response = self.send(query, context, false).await?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::generator(&self.id, e.to_string()))?;

        let text = value
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::generator(&self.id, "missing response field"))?;

        Ok(text.trim().to_string())
    }

    async fn generate_stream(
        &self,
        query: &str,
        context: Option<&Context>,
    ) -> Result<ChunkStream> {
        let response = self.send(query, context, true).await?;
        let id = self.id.clone();

        let stream = try_stream! {
            let mut upstream = response.bytes_stream();
            let mut buf = String::new();

            'outer: while let Some(part) = upstream.next().await {
                let part = part.map_err(|e| Error::generator(&id, e.to_string()))?;
                buf.push_str(&String::from_utf8_lossy(&part));

                // Each complete line is one JSON chunk
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let value: Value = serde_json::from_str(line)
                        .map_err(|e| Error::generator(&id, format!("malformed chunk: {e}")))?;

                    if let Some(text) = value.get("response").and_then(Value::as_str) {
                        if !text.is_empty() {
                            yield text.to_string();
                        }
                    }

                    if value.get("done").and_then(Value::as_bool).unwrap_or(false) {
                        break 'outer;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_query_and_context() {
        let mut context = Context::new();
        context.insert("state".to_string(), Value::from("CA"));

        let prompt = OllamaGenerator::build_prompt("How do deductions work?", Some(&context));
        assert!(prompt.contains("How do deductions work?"));
        assert!(prompt.contains("\"state\":\"CA\""));
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = OllamaGenerator::build_prompt("Am I eligible?", None);
        assert!(prompt.contains("Am I eligible?"));
        assert!(!prompt.contains("Additional context"));
    }
}
