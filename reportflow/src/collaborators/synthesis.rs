//! Report synthesis through the Gemini `generateContent` API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SynthesisConfig;
use crate::core::{EXTRACTED_TEXT, SYNTHESIZED_REPORT};
use crate::errors::{CollaboratorError, ReportflowError};
use crate::stages::{Collaborator, StageInputs, StageProducts};

/// Section headers the synthesized report must use, in order.
pub const REPORT_SECTIONS: [&str; 7] = [
    "SECTION 1: PATIENT PARTICULARS",
    "SECTION 2: DOCTOR PARTICULARS",
    "SECTION 3: MEDICAL HISTORY",
    "SECTION 4: CLINICAL EXAMINATION",
    "SECTION 5: DIAGNOSIS",
    "SECTION 6: TREATMENT AND RECOMMENDATIONS",
    "SECTION 7: MENTAL CAPACITY ASSESSMENT",
];

const SECTION_HINTS: [&str; 7] = [
    "Patient demographic and contact information",
    "Doctor information and credentials",
    "Chronological medical history and background",
    "Physical examination findings and assessments",
    "Medical diagnoses and clinical impressions",
    "Treatment plans, medications, and recommendations",
    "Mental capacity evaluation details",
];

/// Builds the medical-scribe prompt for the extracted text.
#[must_use]
pub fn build_prompt(extracted: &str) -> String {
    let mut prompt = String::from(
        "You are an expert medical scribe. Your task is to synthesize the provided text, \
         which has been extracted from multiple medical documents, into a single, \
         well-structured medical report.\n\n\
         It is critical that you preserve the exact timeline of events as they occurred. \
         Organize the information chronologically, detailing patient history, consultations, \
         diagnoses, procedures, and outcomes in the order they happened.\n\n\
         Do not infer information not present in the text.\n\n\
         **IMPORTANT FORMATTING REQUIREMENTS:**\n\
         Please format your output using the following structure with exact markdown-style headers:\n\n",
    );
    for (header, hint) in REPORT_SECTIONS.iter().zip(SECTION_HINTS) {
        let qualifier = if header.ends_with("ASSESSMENT") {
            " (if applicable)"
        } else {
            ""
        };
        prompt.push_str(&format!("**{header}**{qualifier}\n[{hint}]\n\n"));
    }
    prompt.push_str(
        "Use bullet points (*) for lists and maintain chronological order within each section.\n\n\
         Here is the extracted text from multiple medical documents:\n\n",
    );
    prompt.push_str(extracted);
    prompt
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Maps an HTTP error status to a collaborator error.
///
/// Rate limits, request timeouts and server errors are worth retrying;
/// every other status means the request itself is wrong.
fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let message = format!("Gemini API returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        CollaboratorError::transient(message)
    } else {
        CollaboratorError::permanent(message)
    }
}

fn classify_transport(err: &reqwest::Error) -> CollaboratorError {
    if err.is_timeout() || err.is_connect() {
        CollaboratorError::transient(format!("Gemini API unreachable: {err}"))
    } else {
        CollaboratorError::permanent(format!("Gemini API request failed: {err}"))
    }
}

/// Synthesizes the structured report from extracted text.
pub struct GeminiSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl std::fmt::Debug for GeminiSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSynthesizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeminiSynthesizer {
    /// Creates a synthesizer. A missing API key is reported when the stage
    /// runs, so it shows up in the execution report.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SynthesisConfig) -> Result<Self, ReportflowError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ReportflowError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, CollaboratorError> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            CollaboratorError::permanent(format!("invalid response shape from Gemini API: {e}"))
        })?;
        parsed
            .text()
            .ok_or_else(|| CollaboratorError::permanent("Gemini API response contained no text"))
    }
}

#[async_trait]
impl Collaborator for GeminiSynthesizer {
    fn name(&self) -> &str {
        "gemini-synthesizer"
    }

    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        let extracted = inputs.text(EXTRACTED_TEXT)?;
        if extracted.trim().is_empty() {
            return Err(CollaboratorError::permanent("extracted text is empty"));
        }
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(CollaboratorError::fatal(
                "Gemini API not configured: set GEMINI_API_KEY",
            ));
        };

        debug!(model = %self.config.model, chars = extracted.len(), "Requesting report synthesis");
        let report = self.generate(api_key, &build_prompt(extracted)).await?;
        info!(model = %self.config.model, chars = report.len(), "Report synthesized");
        Ok(StageProducts::new().with(SYNTHESIZED_REPORT, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(text: &str) -> StageInputs {
        StageInputs::new().with(EXTRACTED_TEXT, text.as_bytes().to_vec())
    }

    #[test]
    fn test_prompt_lists_sections_in_order() {
        let prompt = build_prompt("BP 120/80");
        let mut cursor = 0;
        for header in REPORT_SECTIONS {
            let at = prompt[cursor..].find(&format!("**{header}**")).unwrap();
            cursor += at;
        }
        assert!(prompt.contains("**SECTION 7: MENTAL CAPACITY ASSESSMENT** (if applicable)"));
        assert!(prompt.ends_with("BP 120/80"));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "quota").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad").is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN, "key").is_transient());
    }

    #[test]
    fn test_response_text_extraction() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"**SECTION 1"},{"text":"**"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.text().as_deref(), Some("**SECTION 1**"));

        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(blocked.text().is_none());
        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.text().is_none());
    }

    #[tokio::test]
    async fn test_missing_api_key_aborts_run() {
        let synth = GeminiSynthesizer::new(SynthesisConfig::default()).unwrap();
        let err = synth.invoke(&inputs("notes")).await.unwrap_err();
        assert!(err.abort_run);
        assert!(err.message.contains("GEMINI_API_KEY"));
    }

    #[tokio::test]
    async fn test_empty_input_is_permanent() {
        let config = SynthesisConfig {
            api_key: Some("key".to_string()),
            ..SynthesisConfig::default()
        };
        let err = GeminiSynthesizer::new(config)
            .unwrap()
            .invoke(&inputs("  \n"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(!err.abort_run);
    }

    #[test]
    fn test_url_uses_model() {
        let config = SynthesisConfig {
            endpoint: "http://localhost:9/v1beta/".to_string(),
            model: "gemini-test".to_string(),
            ..SynthesisConfig::default()
        };
        let synth = GeminiSynthesizer::new(config).unwrap();
        assert_eq!(synth.url(), "http://localhost:9/v1beta/models/gemini-test:generateContent");
    }
}
