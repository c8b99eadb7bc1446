use async_trait::async_trait;
use dealhub_core::RawCandidate;
use tracing::debug;

use crate::ai::AiCleaner;
use crate::clean::{CleanError, CleanedFields, Cleaner, RuleBasedCleaner};

/// AI-first cleaning with the local rules as the fallback for every failure.
pub struct CleaningStage {
    ai: Option<AiCleaner>,
    rules: RuleBasedCleaner,
}

impl CleaningStage {
    pub fn rules_only() -> Self {
        Self {
            ai: None,
            rules: RuleBasedCleaner,
        }
    }

    pub fn with_ai(ai: AiCleaner) -> Self {
        Self {
            ai: Some(ai),
            rules: RuleBasedCleaner,
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.as_ref().is_some_and(|ai| !ai.is_disabled())
    }

    /// Never fails: any AI problem degrades to the local result.
    pub async fn extract(&self, raw: &RawCandidate) -> CleanedFields {
        if let Some(ai) = self.ai.as_ref().filter(|ai| !ai.is_disabled()) {
            match ai.clean(raw).await {
                Ok(fields) => return fields,
                Err(err) => {
                    debug!(error = %err, brand = %raw.brand_name, "ai cleaning unavailable, using local rules");
                }
            }
        }
        self.rules.clean_fields(raw)
    }
}

#[async_trait]
impl Cleaner for CleaningStage {
    async fn clean(&self, raw: &RawCandidate) -> Result<CleanedFields, CleanError> {
        Ok(self.extract(raw).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dealhub_core::{Category, DiscountType, UsageMethod};

    use super::*;
    use crate::llm::{ChatCompletionResponse, MockClient};

    fn raw() -> RawCandidate {
        let mut raw = RawCandidate::new("Swiggy", "Get 50% Off");
        raw.description = "Get 50% Off".into();
        raw.code = Some("SWIGGY50".into());
        raw.category = Some("Food".into());
        raw.discount_type_hint = DiscountType::Percentage;
        raw
    }

    async fn stage_with(reply: Option<&str>) -> (CleaningStage, Arc<MockClient>) {
        let mock = Arc::new(MockClient::new());
        if let Some(reply) = reply {
            mock.push_response(Ok(ChatCompletionResponse::text(reply))).await;
        }
        let ai = AiCleaner::new(mock.clone(), "gpt-4o-mini", None, Duration::from_secs(5));
        (CleaningStage::with_ai(ai), mock)
    }

    #[tokio::test]
    async fn omitted_ai_fields_come_from_local_rules() {
        let (stage, _) = stage_with(Some(
            r#"{"name": "50% off on Swiggy", "link": "https://www.swiggy.com/", "category": "grocery"}"#,
        ))
        .await;
        let fields = stage.extract(&raw()).await;
        assert_eq!(fields.name, "50% off on Swiggy");
        assert_eq!(fields.category, Some(Category::Grocery));
        assert_eq!(fields.code.as_deref(), Some("SWIGGY50"));
        assert_eq!(fields.discount_type, DiscountType::Percentage);
        assert_eq!(fields.usage_method, UsageMethod::Both);
    }

    #[tokio::test]
    async fn garbage_reply_degrades_to_local() {
        let (stage, _) = stage_with(Some("I cannot help with that.")).await;
        let local = RuleBasedCleaner.clean_fields(&raw());
        assert_eq!(stage.extract(&raw()).await, local);
    }

    #[tokio::test]
    async fn client_error_degrades_to_local() {
        let (stage, mock) = stage_with(None).await;
        let local = RuleBasedCleaner.clean_fields(&raw());
        assert_eq!(stage.extract(&raw()).await, local);
        assert_eq!(mock.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn usage_matches_final_fields_on_every_path() {
        let replies = [
            Some(r#"{"code": "SHOW CODE", "link": null}"#),
            Some(r#"{"code": "NEW100", "link": "https://www.swiggy.com/"}"#),
            Some("not json"),
            None,
        ];
        for reply in replies {
            let (stage, _) = stage_with(reply).await;
            let fields = stage.extract(&raw()).await;
            assert_eq!(
                fields.usage_method,
                UsageMethod::derive(fields.code.is_some(), fields.link.is_some())
            );
        }
    }

    #[tokio::test]
    async fn ai_title_matching_local_description_drops_description() {
        let mut raw = RawCandidate::new("Zomato", "Flat 40% off");
        raw.description = "New users only on Zomato".into();
        let local = RuleBasedCleaner.clean_fields(&raw);
        assert_eq!(local.description.as_deref(), Some("New users only on Zomato"));

        let (stage, _) = stage_with(Some(r#"{"title": "New users only on Zomato"}"#)).await;
        let fields = stage.extract(&raw).await;
        assert_eq!(fields.title, "New users only on Zomato");
        assert_eq!(fields.description, None);
    }

    #[tokio::test]
    async fn rules_only_never_calls_a_client() {
        let stage = CleaningStage::rules_only();
        assert!(!stage.ai_enabled());
        let fields = stage.extract(&raw()).await;
        assert_eq!(fields.description, None);
        assert_eq!(fields.code.as_deref(), Some("SWIGGY50"));
    }
}
