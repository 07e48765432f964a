use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const MAX_TOKENS: u32 = 200;

/// What the model decided about one piece of text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// A text classifier backed by a language model.
pub trait GenerativeClassifier {
    fn classify_text(&self, text: &str, categories: &[String]) -> Result<Verdict>;
}

pub fn build_prompt(text: &str, categories: &[String]) -> String {
    let mut sorted: Vec<&str> = categories.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let list = sorted
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You are a financial transaction categorizer. Given a transaction description, classify it into one of the available budget categories.

Transaction description: "{text}"

Available categories:
{list}

Consider the product type, the merchant type and any context clues in the description.

Respond ONLY with a JSON object in this exact format:
{{
  "category": "category name from the list above",
  "confidence": 0.XX,
  "reasoning": "brief explanation"
}}

If you cannot confidently categorize (confidence < 0.8), respond with:
{{
  "category": null,
  "confidence": 0.0,
  "reasoning": "explanation of why it's unclear"
}}"#
    )
}

/// Parse a model reply, tolerating a Markdown code fence around the JSON.
pub fn parse_verdict(reply: &str) -> Result<Verdict> {
    let reply = reply.trim();
    let json = if let Some((_, rest)) = reply.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = reply.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        reply
    };
    let mut verdict: Verdict = serde_json::from_str(json.trim())
        .with_context(|| format!("model reply is not the expected JSON: {reply}"))?;
    if !verdict.confidence.is_finite() {
        return Err(anyhow!("model reported a non-finite confidence"));
    }
    verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
    verdict.category = verdict.category.filter(|c| !c.trim().is_empty());
    Ok(verdict)
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Blocking client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let mut key = HeaderValue::from_str(api_key).context("ANTHROPIC_API_KEY is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-turn completion; returns the first text block.
    pub fn complete(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response: MessagesResponse = self
            .http
            .post(MESSAGES_URL)
            .json(&request)
            .send()
            .with_context(|| format!("POST {MESSAGES_URL} failed"))?
            .error_for_status()
            .with_context(|| format!("POST {MESSAGES_URL} returned non-success status"))?
            .json()
            .with_context(|| format!("Failed to parse JSON response from {MESSAGES_URL}"))?;

        response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| anyhow!("model response had no text content"))
    }
}

impl GenerativeClassifier for AnthropicClient {
    fn classify_text(&self, text: &str, categories: &[String]) -> Result<Verdict> {
        let reply = self.complete(&build_prompt(text, categories))?;
        parse_verdict(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let v = parse_verdict(r#"{"category": "Pet", "confidence": 0.93, "reasoning": "dog food"}"#).unwrap();
        assert_eq!(v.category.as_deref(), Some("Pet"));
        assert_eq!(v.confidence, 0.93);
        assert_eq!(v.reasoning, "dog food");
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"category\": \"Groceries\", \"confidence\": 0.85, \"reasoning\": \"food\"}\n```";
        let v = parse_verdict(reply).unwrap();
        assert_eq!(v.category.as_deref(), Some("Groceries"));

        let reply = "```\n{\"category\": null, \"confidence\": 0.0, \"reasoning\": \"unclear\"}\n```";
        let v = parse_verdict(reply).unwrap();
        assert!(v.category.is_none());
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_verdict("I think this is groceries.").is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let v = parse_verdict(r#"{"category": "Pet", "confidence": 7}"#).unwrap();
        assert_eq!(v.confidence, 1.0);
        assert_eq!(v.reasoning, "");
    }

    #[test]
    fn test_prompt_lists_sorted_categories() {
        let prompt = build_prompt(
            "Organic Dog Food",
            &["Pet".to_string(), "Groceries".to_string(), "Auto".to_string()],
        );
        let auto = prompt.find("- Auto").unwrap();
        let groceries = prompt.find("- Groceries").unwrap();
        let pet = prompt.find("- Pet").unwrap();
        assert!(auto < groceries && groceries < pet);
        assert!(prompt.contains("\"Organic Dog Food\""));
    }
}
