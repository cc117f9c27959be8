//! OpenAI-compatible provider
//!
//! Talks to a chat-completions endpoint. Buffered requests read
//! `choices[0].message.content`; streaming requests consume SSE `data:`
//! lines with `choices[0].delta.content` fragments until the `[DONE]`
//! sentinel.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};

use super::{ChunkStream, Context, Generator, SYSTEM_PREAMBLE, render_context};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Generator backed by an OpenAI-compatible chat completions API
pub struct OpenAiGenerator {
    /// Provider id this generator is registered under
    id: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// Create a generator from provider configuration and a resolved API key
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(id: &str, config: &ProviderConfig, api_key: String) -> Result<Self> {
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
            api_key,
        })
    }

    /// Chat-message rendering: system preamble plus the user query with
    /// optional context appended
    fn build_messages(query: &str, context: Option<&Context>) -> Value {
        let mut user_content = format!("Query: {query}");
        if let Some(rendered) = render_context(context) {
            user_content.push_str("\nContext: ");
            user_content.push_str(&rendered);
        }

        json!([
            {"role": "system", "content": SYSTEM_PREAMBLE},
            {"role": "user", "content": user_content},
        ])
    }

    async fn send(&self, query: &str, context: Option<&Context>, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": Self::build_messages(query, context),
            "temperature": 0.7,
            "max_tokens": 512,
            "stream": stream,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::generator(&self.id, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::generator(
                &self.id,
                format!("upstream status {status}: {detail}"),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
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
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::generator(&self.id, "missing message content"))?;

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

                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let line = line.trim();

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        break 'outer;
                    }

                    let value: Value = serde_json::from_str(data)
                        .map_err(|e| Error::generator(&id, format!("malformed chunk: {e}")))?;

                    if let Some(text) = value
                        .pointer("/choices/0/delta/content")
                        .and_then(Value::as_str)
                    {
                        if !text.is_empty() {
                            yield text.to_string();
                        }
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
    fn test_messages_carry_system_and_user_roles() {
        let messages = OpenAiGenerator::build_messages("What is a 1099?", None);
        let roles: Vec<&str> = messages
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m.get("role").and_then(Value::as_str))
            .collect();
        assert_eq!(roles, vec!["system", "user"]);
    }

    #[test]
    fn test_context_appended_to_user_message() {
        let mut context = Context::new();
        context.insert("dependents".to_string(), Value::from(2));

        let messages = OpenAiGenerator::build_messages("Child tax credit?", Some(&context));
        let user = messages.as_array().unwrap()[1]
            .get("content")
            .and_then(Value::as_str)
            .unwrap();
        assert!(user.contains("Child tax credit?"));
        assert!(user.contains("dependents"));
    }
}
