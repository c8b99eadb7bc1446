//! AI-backed field segregation with strict validation of everything it returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dealhub_core::{Category, DiscountType, RawCandidate};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clean::{
    clean_description, clean_name, collapse_whitespace, validate_code, validate_link, CleanError,
    CleanedFields, Cleaner, RuleBasedCleaner,
};
use crate::llm::{ChatCompletionRequest, ChatMessage, ChatRole, LlmClient, LlmError};

const SYSTEM_PROMPT: &str = "You separate scraped coupon listings into clean fields. \
Reply with a single JSON object and nothing else, using exactly these keys: \
name, title, code, link, description, discountType, discountValue, minimumOrder, \
category, details, usageMethod. Use null for anything you cannot determine. \
code must be the literal redeemable code, never button text such as SHOW CODE. \
discountType is one of percentage, flat, cashback, freebie, unknown. \
category is one of All, Food, Fashion, Electronics, Travel, Beauty, Grocery, \
Entertainment, Health, Home, Recharge, Other. \
name is a short offer name without codes, dates or urls.";

/// Fields the AI produced that survived validation. Anything `None` is taken
/// from the local rules instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiFields {
    pub name: Option<String>,
    pub title: Option<String>,
    pub code: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<String>,
    pub minimum_order: Option<String>,
    pub category: Option<Category>,
    pub details: Option<String>,
}

impl AiFields {
    /// Overlay the accepted AI fields on the local result.
    pub fn merge_over(self, local: CleanedFields) -> CleanedFields {
        CleanedFields {
            name: self.name.unwrap_or(local.name),
            title: self.title.unwrap_or(local.title),
            code: self.code.or(local.code),
            link: self.link.or(local.link),
            description: self.description.or(local.description),
            discount_type: self.discount_type.unwrap_or(local.discount_type),
            discount_value: self.discount_value.or(local.discount_value),
            minimum_order: self.minimum_order.or(local.minimum_order),
            category: self.category.or(local.category),
            details: self.details.or(local.details),
            usage_method: local.usage_method,
        }
        .finalize()
    }
}

pub struct AiCleaner {
    client: Arc<dyn LlmClient>,
    models: Vec<String>,
    active_model: AtomicUsize,
    timeout: Duration,
    disabled: AtomicBool,
}

impl AiCleaner {
    /// `alternate_model` is tried once when the primary answers "model not found".
    pub fn new(
        client: Arc<dyn LlmClient>,
        primary_model: impl Into<String>,
        alternate_model: Option<String>,
        timeout: Duration,
    ) -> Self {
        let primary = primary_model.into();
        let mut models = vec![primary.clone()];
        if let Some(alternate) = alternate_model.filter(|m| *m != primary) {
            models.push(alternate);
        }
        Self {
            client,
            models,
            active_model: AtomicUsize::new(0),
            timeout,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn current_model(&self) -> &str {
        let idx = self.active_model.load(Ordering::Relaxed).min(self.models.len() - 1);
        &self.models[idx]
    }

    pub async fn extract(&self, raw: &RawCandidate) -> Result<AiFields, CleanError> {
        if self.is_disabled() {
            return Err(CleanError::Disabled);
        }

        let content = match self.call(raw).await {
            Err(CleanError::Llm(err)) if err.is_model_unavailable() && self.rotate_model() => {
                info!(model = self.current_model(), "primary model unavailable, retrying with alternate");
                self.call(raw).await
            }
            other => other,
        };

        let content = match content {
            Ok(content) => content,
            Err(CleanError::Llm(err)) if err.is_auth_or_quota() => {
                warn!(error = %err, "ai backend unusable, disabling for the rest of the process");
                self.disabled.store(true, Ordering::Relaxed);
                return Err(CleanError::Llm(err));
            }
            Err(err) => return Err(err),
        };

        let object = parse_response_object(&content)?;
        Ok(validate_fields(&object, raw))
    }

    /// Move to the next configured model. Only ever happens once per process.
    fn rotate_model(&self) -> bool {
        self.models.len() > 1
            && self
                .active_model
                .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    async fn call(&self, raw: &RawCandidate) -> Result<String, CleanError> {
        let request = ChatCompletionRequest {
            model: Some(self.current_model().to_string()),
            messages: vec![
                ChatMessage::new(ChatRole::System, SYSTEM_PROMPT),
                ChatMessage::new(ChatRole::User, user_prompt(raw)),
            ],
            max_tokens: Some(600),
            temperature: Some(0.0),
        };
        let response = tokio::time::timeout(self.timeout, self.client.chat_completion(request))
            .await
            .map_err(|_| CleanError::Timeout)?;
        match response {
            Ok(resp) => Ok(resp.content),
            Err(LlmError::Timeout) => Err(CleanError::Timeout),
            Err(err) => Err(CleanError::Llm(err)),
        }
    }
}

#[async_trait]
impl Cleaner for AiCleaner {
    async fn clean(&self, raw: &RawCandidate) -> Result<CleanedFields, CleanError> {
        let fields = self.extract(raw).await?;
        Ok(fields.merge_over(RuleBasedCleaner.clean_fields(raw)))
    }
}

fn user_prompt(raw: &RawCandidate) -> String {
    let payload = serde_json::json!({
        "brand": raw.brand_name,
        "title": raw.title,
        "description": raw.description,
        "code": raw.code,
        "discount": raw.discount_value_hint,
        "category": raw.category,
        "link": raw.link,
        "terms": raw.terms,
    });
    format!("Scraped coupon:\n{payload}")
}

/// Strip markdown fences, then parse the outermost `{...}` in the reply.
pub fn parse_response_object(content: &str) -> Result<Map<String, Value>, CleanError> {
    let unfenced = content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
        return Err(CleanError::Parse("no JSON object in response".to_string()));
    };
    if end < start {
        return Err(CleanError::Parse("unbalanced braces in response".to_string()));
    }

    match serde_json::from_str::<Value>(&unfenced[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CleanError::Parse("response is not a JSON object".to_string())),
        Err(err) => {
            debug!(error = %err, "ai response is not valid JSON");
            Err(CleanError::Parse(err.to_string()))
        }
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match object.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = collapse_whitespace(&text);
    match text.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "n/a" | "unknown" => None,
        _ => Some(text),
    }
}

/// Each field is accepted or rejected on its own.
fn validate_fields(object: &Map<String, Value>, raw: &RawCandidate) -> AiFields {
    let code = text_field(object, "code").and_then(|c| validate_code(&c));
    let title = text_field(object, "title");
    let title_for_description = title.clone().unwrap_or_else(|| raw.title.clone());

    AiFields {
        name: text_field(object, "name")
            .and_then(|n| clean_name(&n, code.as_deref(), raw.code.as_deref())),
        description: text_field(object, "description")
            .and_then(|d| clean_description(&d, &title_for_description, code.as_deref())),
        link: text_field(object, "link").and_then(|l| validate_link(&l)),
        discount_type: text_field(object, "discountType").and_then(|t| DiscountType::from_label(&t)),
        discount_value: text_field(object, "discountValue"),
        minimum_order: text_field(object, "minimumOrder"),
        category: text_field(object, "category").and_then(|c| Category::from_label(&c)),
        details: text_field(object, "details"),
        title,
        code,
    }
}
