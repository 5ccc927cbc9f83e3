use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::traits::{Translator, TranslatorInfo};
use crate::config::Lang;
use crate::error::Result;

/// Tries `primary`, then `secondary` when the primary fails.
pub struct FallbackTranslator {
    primary: Arc<dyn Translator>,
    secondary: Arc<dyn Translator>,
}

impl FallbackTranslator {
    pub fn new(primary: Arc<dyn Translator>, secondary: Arc<dyn Translator>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Translator for FallbackTranslator {
    fn info(&self) -> TranslatorInfo {
        let primary = self.primary.info();
        TranslatorInfo {
            name: primary.name,
            requires_api_key: primary.requires_api_key,
            supports_auto_detect: primary.supports_auto_detect
                && self.secondary.info().supports_auto_detect,
        }
    }

    async fn translate(&self, text: &str, source: &Lang, target: &Lang) -> Result<String> {
        match self.primary.translate(text, source, target).await {
            Ok(translated) => Ok(translated),
            Err(e) => {
                warn!(
                    "{} failed ({}), falling back to {}",
                    self.primary.name(),
                    e,
                    self.secondary.name()
                );
                self.secondary.translate(text, source, target).await
            }
        }
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.secondary.is_available()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Fixed(std::result::Result<&'static str, Error>);

    #[async_trait]
    impl Translator for Fixed {
        fn info(&self) -> TranslatorInfo {
            TranslatorInfo { name: "Fixed", requires_api_key: false, supports_auto_detect: true }
        }

        async fn translate(&self, _text: &str, _source: &Lang, _target: &Lang) -> Result<String> {
            self.0.clone().map(str::to_string)
        }
    }

    #[tokio::test]
    async fn test_secondary_used_on_failure() {
        let translator = FallbackTranslator::new(
            Arc::new(Fixed(Err(Error::TranslationTimeout))),
            Arc::new(Fixed(Ok("Bonjour"))),
        );
        let out = translator.translate("Hello", &Lang::new("en"), &Lang::new("fr")).await.unwrap();
        assert_eq!(out, "Bonjour");
    }

    #[tokio::test]
    async fn test_secondary_error_is_returned() {
        let translator = FallbackTranslator::new(
            Arc::new(Fixed(Err(Error::TranslationTimeout))),
            Arc::new(Fixed(Err(Error::TranslationMissingApiKey))),
        );
        let err = translator.translate("Hello", &Lang::new("en"), &Lang::new("fr")).await.unwrap_err();
        assert!(matches!(err, Error::TranslationMissingApiKey));
    }
}
