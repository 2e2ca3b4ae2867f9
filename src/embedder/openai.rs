//! OpenAI-compatible embedding client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Embedder, RetryPolicy};
use crate::error::{RagError, RagResult};

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::InvalidConfig("missing OpenAI API key".into()));
        }
        if model.trim().is_empty() {
            return Err(RagError::InvalidConfig("missing embedding model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RagError::InvalidConfig("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                RagError::InvalidConfig(format!("failed to build OpenAI HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: embeddings_endpoint(base_url),
            model,
            dimensions,
            retry,
        })
    }

    /// Endpoint requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_once(&self, inputs: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(classify_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("OpenAI embeddings request failed ({status}): {body}");
            return Err(if is_retryable_status(status) {
                RagError::transient(message)
            } else {
                RagError::fatal(message)
            });
        }
        let parsed: EmbeddingResponse = resp.json().map_err(|err| {
            RagError::fatal(format!("failed to parse OpenAI embedding response: {err}"))
        })?;
        into_ordered_vectors(parsed, inputs.len())
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(|| self.request_once(inputs))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_transport_error(err: reqwest::Error) -> RagError {
    let message = format!("OpenAI embeddings transport error: {err}");
    if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
        RagError::transient(message)
    } else {
        RagError::fatal(message)
    }
}

fn into_ordered_vectors(mut parsed: EmbeddingResponse, expected: usize) -> RagResult<Vec<Vec<f32>>> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(RagError::fatal(format!(
            "OpenAI returned {} embeddings for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    Ok(parsed
        .data
        .into_iter()
        .map(|entry| entry.embedding)
        .collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn reorders_response_by_index() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#,
        )
        .unwrap();
        let vectors = into_ordered_vectors(parsed, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#).unwrap();
        let err = into_ordered_vectors(parsed, 2).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn requires_api_key() {
        let result = OpenAiEmbedder::new(
            "  ",
            "https://api.openai.com/v1",
            "text-embedding-3-small".into(),
            None,
            Duration::from_secs(5),
            RetryPolicy::none(),
        );
        assert!(matches!(result, Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn serializes_request_without_optional_dimensions() {
        let inputs = ["hello"];
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &inputs,
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "text-embedding-3-small", "input": ["hello"]})
        );
    }
}
