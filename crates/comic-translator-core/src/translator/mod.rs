mod deepl;
mod fallback;
mod openai;
mod traits;

pub use deepl::{DeepLTranslator, DEEPL_FREE_API_BASE};
pub use fallback::FallbackTranslator;
pub use openai::OpenAiTranslator;
pub use traits::{Translator, TranslatorInfo};

use crate::config::{TranslatorConfig, TranslatorProvider};
use crate::error::Result;
use std::sync::Arc;

/// Create a translator from configuration
pub fn create_translator(config: &TranslatorConfig) -> Result<Arc<dyn Translator>> {
    let translator: Arc<dyn Translator> = match config.provider {
        TranslatorProvider::OpenAi => Arc::new(OpenAiTranslator::new(
            config.api_base.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.retry_count,
            config.retry_delay_ms,
        )?),
        TranslatorProvider::DeepL => Arc::new(DeepLTranslator::new(
            deepl_api_base(config),
            config.api_key.clone(),
            config.retry_count,
            config.retry_delay_ms,
        )?),
    };

    Ok(translator)
}

/// The generic default base points at a local OpenAI-compatible server, so
/// DeepL falls back to its public endpoint unless a base was configured.
fn deepl_api_base(config: &TranslatorConfig) -> String {
    if config.api_base == TranslatorConfig::default().api_base {
        DEEPL_FREE_API_BASE.to_string()
    } else {
        config.api_base.clone()
    }
}

/// Create the primary translator, wrapped with a fallback backend when one
/// is configured.
pub fn create_with_fallback(
    primary: &TranslatorConfig,
    fallback: Option<&TranslatorConfig>,
) -> Result<Arc<dyn Translator>> {
    let primary = create_translator(primary)?;
    match fallback {
        Some(config) => Ok(Arc::new(FallbackTranslator::new(
            primary,
            create_translator(config)?,
        ))),
        None => Ok(primary),
    }
}
