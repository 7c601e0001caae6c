//! Static model catalog and capability lookup

use crate::error::EvalError;
use serde::Serialize;
use std::fmt;

/// Model provider as named in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAi,
    GptOss,
    Google,
    Alibaba,
    Meta,
    LgAi,
    Liuhaotian,
    DeepSeek,
    Xai,
}

/// How requests for a provider are transported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Hosted OpenAI-compatible chat completions endpoint
    Hosted,
    /// Self-hosted vLLM server speaking the OpenAI protocol
    Vllm,
    /// Ollama `/api/chat`
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::GptOss => "gpt-oss",
            Provider::Google => "google",
            Provider::Alibaba => "alibaba",
            Provider::Meta => "meta",
            Provider::LgAi => "lgai",
            Provider::Liuhaotian => "liuhaotian",
            Provider::DeepSeek => "deepseek",
            Provider::Xai => "xai",
        }
    }

    pub fn adapter(&self) -> AdapterKind {
        match self {
            Provider::Anthropic | Provider::OpenAi | Provider::Google => AdapterKind::Hosted,
            Provider::Alibaba | Provider::LgAi => AdapterKind::Vllm,
            Provider::GptOss
            | Provider::Meta
            | Provider::Liuhaotian
            | Provider::DeepSeek
            | Provider::Xai => AdapterKind::Ollama,
        }
    }

    /// Largest image payload the provider accepts, in bytes
    pub fn image_payload_limit(&self) -> Option<usize> {
        match self {
            Provider::Anthropic => Some(5 * 1024 * 1024),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pricing {
    /// USD per 1M tokens; `None` when unpublished
    Paid {
        input: Option<f64>,
        cached_input: Option<f64>,
        output: Option<f64>,
    },
    OpenSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    Pdf,
}

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub stable: &'static str,
    pub releases: &'static [&'static str],
    pub input: &'static [Modality],
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub reasoning: bool,
    pub pricing: Pricing,
}

impl ModelDescriptor {
    pub fn supports_image(&self) -> bool {
        self.input.contains(&Modality::Image)
    }

    fn matches(&self, normalized: &str) -> bool {
        normalize_id(self.name) == normalized
            || normalize_id(self.stable) == normalized
            || self.releases.iter().any(|r| normalize_id(r) == normalized)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderGroup {
    pub provider: Provider,
    pub docs: &'static str,
    pub models: &'static [ModelDescriptor],
}

/// What the evaluation core needs to know about a model id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub provider: Provider,
    pub supports_image: bool,
    /// Identifier sent on the wire
    pub tag: String,
}

/// Lowercase, spaces to dashes, trimmed
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase().replace(' ', "-")
}

/// Resolve a user-supplied model id (name, stable id, release id, optionally
/// prefixed with `provider/`) against the catalog
pub fn lookup(model_id: &str) -> Result<(Provider, &'static ModelDescriptor), EvalError> {
    let normalized = normalize_id(model_id);
    for group in CATALOG {
        let prefix = format!("{}/", group.provider.as_str());
        let candidate = normalized
            .strip_prefix(prefix.as_str())
            .unwrap_or(normalized.as_str());
        if let Some(model) = group.models.iter().find(|m| m.matches(candidate)) {
            return Ok((group.provider, model));
        }
    }
    // Stable ids like `liuhaotian/llava-v1.6-34b` carry their own slash
    for group in CATALOG {
        if let Some(model) = group.models.iter().find(|m| m.matches(&normalized)) {
            return Ok((group.provider, model));
        }
    }
    Err(EvalError::Configuration(format!(
        "model id '{}' not found in any provider",
        model_id
    )))
}

pub fn capability(model_id: &str) -> Result<Capability, EvalError> {
    let (provider, model) = lookup(model_id)?;
    Ok(Capability {
        provider,
        supports_image: model.supports_image(),
        tag: model.stable.to_string(),
    })
}

pub fn provider_of(model_id: &str) -> Result<Provider, EvalError> {
    lookup(model_id).map(|(provider, _)| provider)
}

/// One catalog row as printed by `kocem-eval models`
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub provider: &'static str,
    pub docs: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub stable: &'static str,
    pub releases: &'static [&'static str],
    pub input: &'static [Modality],
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub reasoning: bool,
    pub pricing: Pricing,
}

/// Flattened catalog, optionally limited to one provider
pub fn entries(provider: Option<&str>) -> Result<Vec<CatalogEntry>, EvalError> {
    let wanted = provider.map(normalize_id);
    if let Some(wanted) = &wanted {
        if !CATALOG.iter().any(|g| g.provider.as_str() == wanted) {
            return Err(EvalError::Configuration(format!("unknown provider '{}'", wanted)));
        }
    }

    Ok(CATALOG
        .iter()
        .filter(|g| wanted.as_deref().is_none_or(|w| g.provider.as_str() == w))
        .flat_map(|g| {
            g.models.iter().map(move |m| CatalogEntry {
                provider: g.provider.as_str(),
                docs: g.docs,
                name: m.name,
                description: m.description,
                stable: m.stable,
                releases: m.releases,
                input: m.input,
                context_window: m.context_window,
                max_output_tokens: m.max_output_tokens,
                reasoning: m.reasoning,
                pricing: m.pricing,
            })
        })
        .collect())
}

const TEXT: &[Modality] = &[Modality::Text];
const TEXT_IMAGE: &[Modality] = &[Modality::Text, Modality::Image];

const fn paid(input: f64, cached_input: f64, output: f64) -> Pricing {
    Pricing::Paid {
        input: Some(input),
        cached_input: Some(cached_input),
        output: Some(output),
    }
}

const UNPUBLISHED: Pricing = Pricing::Paid {
    input: None,
    cached_input: None,
    output: None,
};

pub static CATALOG: &[ProviderGroup] = &[
    ProviderGroup {
        provider: Provider::Anthropic,
        docs: "https://docs.anthropic.com/en/docs/about-claude/models/overview",
        models: &[
            ModelDescriptor {
                name: "Claude Opus 4.1",
                description: "Anthropic's most capable model",
                stable: "claude-opus-4-1",
                releases: &["claude-opus-4-1-20250805"],
                input: TEXT_IMAGE,
                context_window: Some(200_000),
                max_output_tokens: Some(32_000),
                reasoning: true,
                pricing: paid(15.0, 30.0, 75.0),
            },
            ModelDescriptor {
                name: "Claude Sonnet 4",
                description: "High-performance model",
                stable: "claude-sonnet-4",
                releases: &["claude-sonnet-4-20250514"],
                input: TEXT_IMAGE,
                context_window: Some(200_000),
                max_output_tokens: Some(64_000),
                reasoning: true,
                pricing: paid(3.0, 6.0, 15.0),
            },
        ],
    },
    ProviderGroup {
        provider: Provider::OpenAi,
        docs: "https://platform.openai.com/docs/models",
        models: &[
            ModelDescriptor {
                name: "GPT-5",
                description: "Flagship model for coding and agentic tasks",
                stable: "gpt-5",
                releases: &["gpt-5-2025-08-07"],
                input: TEXT_IMAGE,
                context_window: Some(400_000),
                max_output_tokens: Some(128_000),
                reasoning: true,
                pricing: paid(1.25, 0.25, 10.0),
            },
            ModelDescriptor {
                name: "GPT-5 mini",
                description: "Faster, cost-efficient GPT-5",
                stable: "gpt-5-mini",
                releases: &["gpt-5-mini-2025-08-07"],
                input: TEXT_IMAGE,
                context_window: Some(400_000),
                max_output_tokens: Some(128_000),
                reasoning: true,
                pricing: paid(0.25, 0.0025, 2.0),
            },
            ModelDescriptor {
                name: "GPT-5 nano",
                description: "Fastest, cheapest GPT-5",
                stable: "gpt-5-nano",
                releases: &["gpt-5-nano-2025-08-07"],
                input: TEXT_IMAGE,
                context_window: Some(400_000),
                max_output_tokens: Some(128_000),
                reasoning: true,
                pricing: paid(0.05, 0.005, 0.40),
            },
            ModelDescriptor {
                name: "GPT-4.1",
                description: "Smartest non-reasoning model",
                stable: "gpt-4.1",
                releases: &["gpt-4.1-2025-04-14"],
                input: TEXT_IMAGE,
                context_window: Some(1_047_576),
                max_output_tokens: Some(32_768),
                reasoning: false,
                pricing: paid(0.50, 0.05, 4.0),
            },
        ],
    },
    ProviderGroup {
        provider: Provider::GptOss,
        docs: "https://platform.openai.com/docs/models",
        models: &[
            ModelDescriptor {
                name: "gpt-oss-120b",
                description: "Large open-weight model",
                stable: "gpt-oss-120b",
                releases: &["gpt-oss-120b"],
                input: TEXT,
                context_window: Some(131_072),
                max_output_tokens: Some(131_072),
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
            ModelDescriptor {
                name: "gpt-oss-20b",
                description: "Medium open-weight model for low latency",
                stable: "gpt-oss-20b",
                releases: &["gpt-oss-20b"],
                input: TEXT,
                context_window: Some(131_072),
                max_output_tokens: Some(131_072),
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::Google,
        docs: "https://ai.google.dev/gemini-api/docs/models",
        models: &[
            ModelDescriptor {
                name: "Gemini 2.5 Pro",
                description: "Thinking model for code, math and STEM",
                stable: "gemini-2.5-pro",
                releases: &["gemini-2.5-pro"],
                input: &[
                    Modality::Text,
                    Modality::Image,
                    Modality::Video,
                    Modality::Audio,
                    Modality::Pdf,
                ],
                context_window: Some(1_048_576),
                max_output_tokens: Some(65_536),
                reasoning: true,
                pricing: UNPUBLISHED,
            },
            ModelDescriptor {
                name: "Gemini 2.5 Flash",
                description: "Best price-performance model",
                stable: "gemini-2.5-flash",
                releases: &["gemini-2.5-flash", "gemini-2.5-flash-preview-05-20"],
                input: &[Modality::Text, Modality::Image, Modality::Video, Modality::Audio],
                context_window: Some(1_048_576),
                max_output_tokens: Some(65_536),
                reasoning: true,
                pricing: UNPUBLISHED,
            },
            ModelDescriptor {
                name: "Gemini 2.5 Flash-Lite",
                description: "Flash tuned for cost and throughput",
                stable: "gemini-2.5-flash-lite",
                releases: &["gemini-2.5-flash-lite", "gemini-2.5-flash-lite-06-17"],
                input: &[
                    Modality::Text,
                    Modality::Image,
                    Modality::Video,
                    Modality::Audio,
                    Modality::Pdf,
                ],
                context_window: Some(1_048_576),
                max_output_tokens: Some(65_536),
                reasoning: true,
                pricing: UNPUBLISHED,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::Alibaba,
        docs: "https://bailian.console.alibabacloud.com",
        models: &[
            ModelDescriptor {
                name: "Qwen-Max",
                description: "Flagship Qwen model",
                stable: "qwen-max",
                releases: &["qwen-max"],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: UNPUBLISHED,
            },
            ModelDescriptor {
                name: "Qwen-Plus",
                description: "Balanced Qwen model",
                stable: "qwen-plus",
                releases: &["qwen-plus"],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: UNPUBLISHED,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::Meta,
        docs: "https://www.llama.com/docs/model-cards-and-prompt-formats/llama4",
        models: &[
            ModelDescriptor {
                name: "Llama 4 Maverick",
                description: "Natively multimodal mixture-of-experts model",
                stable: "Llama-4-Maverick-17B-128E-Instruct-FP8",
                releases: &[],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: false,
                pricing: Pricing::OpenSource,
            },
            ModelDescriptor {
                name: "Llama 4 Scout",
                description: "Natively multimodal model with long context",
                stable: "Llama-4-Scout-17B-16E-Instruct-FP8",
                releases: &[],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: false,
                pricing: Pricing::OpenSource,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::LgAi,
        docs: "https://huggingface.co/LGAI-EXAONE",
        models: &[
            ModelDescriptor {
                name: "EXAONE-4.0-1.2B",
                description: "Small EXAONE model",
                stable: "LGAI-EXAONE/EXAONE-4.0-1.2B",
                releases: &[],
                input: TEXT,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
            ModelDescriptor {
                name: "EXAONE-4.0-32B",
                description: "Large EXAONE model",
                stable: "LGAI-EXAONE/EXAONE-4.0-32B",
                releases: &[],
                input: TEXT,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::Liuhaotian,
        docs: "https://llava-vl.github.io",
        models: &[ModelDescriptor {
            name: "LLaVA-1.6",
            description: "Vision-language assistant",
            stable: "liuhaotian/llava-v1.6-34b",
            releases: &[],
            input: TEXT_IMAGE,
            context_window: None,
            max_output_tokens: None,
            reasoning: false,
            pricing: Pricing::OpenSource,
        }],
    },
    ProviderGroup {
        provider: Provider::DeepSeek,
        docs: "https://api-docs.deepseek.com",
        models: &[
            ModelDescriptor {
                name: "deepseek-r1:671b",
                description: "Full-size reasoning model",
                stable: "deepseek-r1-671b",
                releases: &[],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
            ModelDescriptor {
                name: "deepseek-r1:8b",
                description: "Distilled reasoning model",
                stable: "deepseek-r1-8b",
                releases: &[],
                input: TEXT_IMAGE,
                context_window: None,
                max_output_tokens: None,
                reasoning: true,
                pricing: Pricing::OpenSource,
            },
        ],
    },
    ProviderGroup {
        provider: Provider::Xai,
        docs: "https://docs.x.ai",
        models: &[ModelDescriptor {
            name: "jmorgan/grok",
            description: "Grok served through Ollama",
            stable: "jmorgan/grok-latest",
            releases: &[],
            input: TEXT,
            context_window: None,
            max_output_tokens: None,
            reasoning: false,
            pricing: Pricing::OpenSource,
        }],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_stable_name_and_release() {
        assert_eq!(provider_of("gpt-4.1").unwrap(), Provider::OpenAi);
        assert_eq!(provider_of("GPT-4.1").unwrap(), Provider::OpenAi);
        assert_eq!(provider_of("gpt-4.1-2025-04-14").unwrap(), Provider::OpenAi);
        assert_eq!(provider_of("Claude Sonnet 4").unwrap(), Provider::Anthropic);
        assert_eq!(provider_of("claude-sonnet-4").unwrap(), Provider::Anthropic);
    }

    #[test]
    fn test_lookup_with_provider_prefix() {
        assert_eq!(provider_of("openai/gpt-5-mini").unwrap(), Provider::OpenAi);
        assert_eq!(provider_of("google/gemini-2.5-flash").unwrap(), Provider::Google);
    }

    #[test]
    fn test_lookup_slash_in_stable_id() {
        assert_eq!(provider_of("liuhaotian/llava-v1.6-34b").unwrap(), Provider::Liuhaotian);
        assert_eq!(provider_of("LGAI-EXAONE/EXAONE-4.0-32B").unwrap(), Provider::LgAi);
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        let err = provider_of("no-such-model").unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_capability_image_support() {
        let cap = capability("gpt-4.1").unwrap();
        assert!(cap.supports_image);
        assert_eq!(cap.tag, "gpt-4.1");

        let cap = capability("gpt-oss-20b").unwrap();
        assert!(!cap.supports_image);
        assert_eq!(cap.provider.adapter(), AdapterKind::Ollama);
    }

    #[test]
    fn test_entries_filter_by_provider() {
        let all = entries(None).unwrap();
        let total: usize = CATALOG.iter().map(|g| g.models.len()).sum();
        assert_eq!(all.len(), total);

        let anthropic = entries(Some("Anthropic")).unwrap();
        assert_eq!(anthropic.len(), 2);
        assert!(anthropic.iter().all(|e| e.provider == "anthropic"));

        let err = entries(Some("acme")).unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = entries(Some("anthropic")).unwrap().remove(0);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["stable"], "claude-opus-4-1");
        assert_eq!(value["input"][1], "image");
        assert_eq!(value["pricing"]["kind"], "paid");
        assert_eq!(value["pricing"]["output"], 75.0);
    }

    #[test]
    fn test_anthropic_payload_limit() {
        assert_eq!(Provider::Anthropic.image_payload_limit(), Some(5 * 1024 * 1024));
        assert_eq!(Provider::OpenAi.image_payload_limit(), None);
    }
}
