//! Disposal guidance from a chat-completion backend.
//!
//! The prompt carries the formatting rules (one h3 heading, five one-sentence
//! body lines) and a confidence tier that decides whether the model states
//! the item, hedges, or asks for a new photo. The client itself never fails:
//! missing configuration, a blank tag and backend errors all come back as
//! localized text.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{ClientError, Language};
use crate::config::GuidanceConfig;

pub const TEMPERATURE: f64 = 0.3;

/// Below this the photo is considered unreliable.
pub const LOW_CONFIDENCE: f64 = 0.5;
/// Below this the identification is hedged.
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Body lines expected under the heading.
pub const BODY_LINES: usize = 5;

// ─── Confidence ──────────────────────────────────────────────────

/// How firmly the prompt may commit to the classified tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// An absent score means the caller vouches for the tag.
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(p) if p < LOW_CONFIDENCE => Self::Low,
            Some(p) if p < HIGH_CONFIDENCE => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Badge shown next to the classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceGrade {
    Excellent,
    Good,
    Medium,
    Poor,
    VeryBad,
}

impl ConfidenceGrade {
    pub fn from_probability(p: f64) -> Self {
        let pct = p * 100.0;
        if pct >= 95.0 {
            Self::Excellent
        } else if pct >= 80.0 {
            Self::Good
        } else if pct >= 60.0 {
            Self::Medium
        } else if pct >= 40.0 {
            Self::Poor
        } else {
            Self::VeryBad
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Medium => "Medium",
            Self::Poor => "Poor",
            Self::VeryBad => "Very Bad",
        }
    }
}

/// "81.25%"
pub fn format_percent(p: f64) -> String {
    format!("{:.2}%", p * 100.0)
}

// ─── Request / outcome ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceRequest {
    pub tag: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub language: Language,
}

impl GuidanceRequest {
    pub fn new(tag: impl Into<String>, confidence: Option<f64>, language: Language) -> Self {
        Self { tag: tag.into(), confidence, language }
    }

    pub fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_score(self.confidence)
    }
}

/// What came back for a guidance request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum GuidanceOutcome {
    /// Text produced by the backend.
    Generated(String),
    /// Explanation given without calling the backend (missing key, no tag).
    Fallback(String),
    /// The backend call failed; the text says so.
    Failed(String),
}

impl GuidanceOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Generated(t) | Self::Fallback(t) | Self::Failed(t) => t,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

// ─── Localized messages ──────────────────────────────────────────

pub fn missing_key_message(lang: Language) -> &'static str {
    match lang {
        Language::Ko => "API 키가 설정되지 않아 분리배출 정보를 생성할 수 없어요. 환경 설정을 확인하세요.",
        Language::En => "The guidance service has no API key configured, so disposal instructions cannot be generated.",
    }
}

pub fn empty_tag_message(lang: Language) -> &'static str {
    match lang {
        Language::Ko => "인식된 품목이 없어 분리수거 정보를 제공할 수 없어요.",
        Language::En => "No item was recognized, so disposal instructions are unavailable.",
    }
}

pub fn failure_message(lang: Language, err: &ClientError) -> String {
    match lang {
        Language::Ko => format!("❌ 분리배출 안내 생성 중 오류가 발생했어요: {}", err),
        Language::En => format!("❌ Failed to generate disposal instructions: {}", err),
    }
}

// ─── Prompts ─────────────────────────────────────────────────────

pub fn system_prompt(lang: Language) -> &'static str {
    match lang {
        Language::Ko => "\
당신은 환경부의 공식적인 분리수거 전문가입니다.

역할:
- 사용자에게 분리수거 품목 이름을 받으면, 환경부 지침에 따라 분리수거 방법을 설명합니다.
- 오염/파손 여부와 관계없이, 핵심 분리수거 방법을 알려줍니다.
- 반드시 마크다운 형식으로만 답변합니다.

형식 규칙:
1. 첫 줄은 마크다운 h3 제목으로 작성합니다. (예: `### 플라스틱 용기 분리배출 방법`)
2. 제목 줄에는 아이콘이나 이모지를 넣지 않습니다.
3. 그 아래에는 총 5줄의 본문을 작성하여, 전체 6줄이 되도록 합니다.
4. 본문 각 줄은 한 문장씩 쓰고, 앞에 아이콘을 적절히 사용할 수 있습니다. (예: ♻️, 🧼, 🚮 등)
5. 중요한 키워드는 **굵게** 또는 *기울임*을 사용해 하이라이트합니다.
",
        Language::En => "\
You are an official recycling expert following the Korean Ministry of Environment guidelines.

Role:
- When given the name of a waste item, explain how to sort and dispose of it.
- Give the core disposal method regardless of contamination or damage.
- Answer in Markdown only.

Format rules:
1. The first line is a Markdown h3 heading (e.g. `### How to recycle plastic containers`).
2. Do not put icons or emoji in the heading.
3. Write exactly 5 body lines below it, 6 lines in total.
4. Each body line is a single sentence and may start with a fitting icon (e.g. ♻️, 🧼, 🚮).
5. Highlight key words with **bold** or *italics*.
",
    }
}

pub fn user_prompt(req: &GuidanceRequest) -> String {
    let tag = req.tag.trim();
    let pct = req.confidence.map(format_percent);

    match (req.language, req.tier()) {
        (Language::Ko, ConfidenceTier::Low) => format!(
            "분리수거 품목 후보: '{}' (신뢰도 {}). 신뢰도가 낮으니 품목을 단정하지 말고, \
             사진을 다시 찍어 달라고 안내하세요. 분리배출 단계는 제시하지 말고, 잘 찍는 요령으로 본문을 채우세요.",
            tag,
            pct.unwrap_or_default(),
        ),
        (Language::Ko, ConfidenceTier::Medium) => format!(
            "분리수거 품목 후보: '{}' (신뢰도 {}). 첫 본문 줄에서 '{}'이(가) 맞는지 확인하는 문장을 쓴 뒤 \
             분리수거 방법을 알려주세요.",
            tag,
            pct.unwrap_or_default(),
            tag,
        ),
        (Language::Ko, ConfidenceTier::High) => {
            format!("분리수거 품목: '{}' 에 대한 분리수거 방법을 알려주세요.", tag)
        }
        (Language::En, ConfidenceTier::Low) => format!(
            "Candidate item: '{}' (confidence {}). Confidence is low: do not name the item as certain, \
             ask the user to retake the photo, and do not give disposal steps. Fill the body with photo tips.",
            tag,
            pct.unwrap_or_default(),
        ),
        (Language::En, ConfidenceTier::Medium) => format!(
            "Candidate item: '{}' (confidence {}). Open the first body line by asking whether the item is '{}', \
             then explain how to dispose of it.",
            tag,
            pct.unwrap_or_default(),
            tag,
        ),
        (Language::En, ConfidenceTier::High) => {
            format!("Item: '{}'. Explain how to sort and dispose of it.", tag)
        }
    }
}

// ─── Response shape ──────────────────────────────────────────────

/// Strip code fences, blank lines and trailing spaces from model output.
pub fn normalize_guidance(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A `### ` heading followed by exactly five non-heading body lines.
pub fn has_guidance_shape(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.len() == BODY_LINES + 1
        && lines[0].trim_start().starts_with("### ")
        && lines[1..].iter().all(|l| !l.trim_start().starts_with('#'))
}

// ─── Chat completion wire types ──────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

// ─── Client ──────────────────────────────────────────────────────

pub struct GuidanceClient {
    config: GuidanceConfig,
    agent: ureq::Agent,
}

impl GuidanceClient {
    pub fn new(config: GuidanceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(concat!("ssdam/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { config, agent }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    /// Produce guidance text for a classified item.
    pub fn generate(&self, req: &GuidanceRequest) -> GuidanceOutcome {
        let Some(key) = self.config.api_key.as_deref() else {
            return GuidanceOutcome::Fallback(missing_key_message(req.language).to_string());
        };
        if req.tag.trim().is_empty() {
            return GuidanceOutcome::Fallback(empty_tag_message(req.language).to_string());
        }

        match self.complete(key, req) {
            Ok(text) => {
                let text = normalize_guidance(&text);
                if !has_guidance_shape(&text) {
                    warn!(tag = %req.tag, lines = text.lines().count(), "guidance does not match the 6-line format");
                }
                info!(tag = %req.tag, tier = ?req.tier(), lang = %req.language, "guidance generated");
                GuidanceOutcome::Generated(text)
            }
            Err(e) => {
                warn!(tag = %req.tag, error = %e, "guidance generation failed");
                GuidanceOutcome::Failed(failure_message(req.language, &e))
            }
        }
    }

    fn complete(&self, key: &str, req: &GuidanceRequest) -> Result<String, ClientError> {
        let user = user_prompt(req);
        debug!(prompt = %user, "guidance prompt");

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt(req.language) },
                ChatMessage { role: "user", content: &user },
            ],
            temperature: TEMPERATURE,
        };

        let response = self
            .agent
            .post(&self.completions_url())
            .set("Authorization", &format!("Bearer {}", key))
            .send_json(&body)?;

        let reply: ChatResponse = response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClientError::Decode("completion has no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(key: Option<&str>) -> GuidanceClient {
        GuidanceClient::new(GuidanceConfig {
            endpoint: "http://127.0.0.1:9/openai/v1/".into(),
            api_key: key.map(Into::into),
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_missing_key_is_localized_fallback() {
        let ko = client(None).generate(&GuidanceRequest::new("can", Some(0.9), Language::Ko));
        assert_eq!(ko, GuidanceOutcome::Fallback(missing_key_message(Language::Ko).into()));
        let en = client(None).generate(&GuidanceRequest::new("can", Some(0.9), Language::En));
        assert_eq!(en.text(), missing_key_message(Language::En));
    }

    #[test]
    fn test_empty_tag_is_localized_fallback() {
        let out = client(Some("sk")).generate(&GuidanceRequest::new("  ", None, Language::En));
        assert_eq!(out, GuidanceOutcome::Fallback(empty_tag_message(Language::En).into()));
    }

    #[test]
    fn test_unreachable_backend_is_failed_text() {
        let out = client(Some("sk")).generate(&GuidanceRequest::new("can", None, Language::Ko));
        assert!(out.is_failure());
        assert!(out.text().starts_with("❌"));
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(client(None).completions_url(), "http://127.0.0.1:9/openai/v1/chat/completions");
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ConfidenceTier::from_score(Some(0.2)), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(Some(0.5)), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(Some(0.79)), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(Some(0.8)), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(None), ConfidenceTier::High);
    }

    #[test]
    fn test_grades() {
        assert_eq!(ConfidenceGrade::from_probability(0.97), ConfidenceGrade::Excellent);
        assert_eq!(ConfidenceGrade::from_probability(0.80), ConfidenceGrade::Good);
        assert_eq!(ConfidenceGrade::from_probability(0.65), ConfidenceGrade::Medium);
        assert_eq!(ConfidenceGrade::from_probability(0.40), ConfidenceGrade::Poor);
        assert_eq!(ConfidenceGrade::from_probability(0.10).label(), "Very Bad");
        assert_eq!(format_percent(0.8125), "81.25%");
    }

    #[test]
    fn test_user_prompt_follows_tier() {
        let low = user_prompt(&GuidanceRequest::new("can", Some(0.3), Language::En));
        assert!(low.contains("retake"));
        assert!(low.contains("30.00%"));

        let mid = user_prompt(&GuidanceRequest::new("can", Some(0.6), Language::Ko));
        assert!(mid.contains("맞는지"));

        let high = user_prompt(&GuidanceRequest::new("can", Some(0.99), Language::Ko));
        assert!(high.contains("'can'"));
        assert!(!high.contains("신뢰도"));
    }

    #[test]
    fn test_normalize_and_shape() {
        let raw = "```markdown\n### 캔 분리배출 방법\n\n♻️ 내용물을 **비웁니다**.\n🧼 헹굽니다.\n\
                   🚮 찌그러뜨립니다.\n🏷️ 라벨을 제거합니다.\n📦 캔류 수거함에 넣습니다.  \n```\n";
        let text = normalize_guidance(raw);
        assert_eq!(text.lines().count(), 6);
        assert!(text.starts_with("### "));
        assert!(has_guidance_shape(&text));

        assert!(!has_guidance_shape("### 제목\n한 줄뿐"));
        assert!(!has_guidance_shape("제목 없음\n1\n2\n3\n4\n5"));
    }

    #[test]
    fn test_outcome_json() {
        let v = serde_json::to_value(GuidanceOutcome::Fallback("x".into())).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "fallback", "text": "x"}));
    }
}
