use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Openai,
    Groq,
    Grok,
    Gemini,
}

pub struct ProviderConfig {
    pub base_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Openai => ProviderConfig {
                base_url: "https://api.openai.com/v1",
                model: "gpt-4o",
                env_var: "OPENAI_API_KEY",
            },
            Provider::Groq => ProviderConfig {
                base_url: "https://api.groq.com/openai/v1",
                model: "llama-3.3-70b-versatile",
                env_var: "GROQ_API_KEY",
            },
            Provider::Grok => ProviderConfig {
                base_url: "https://api.x.ai/v1",
                model: "grok-4-fast",
                env_var: "XAI_API_KEY",
            },
            Provider::Gemini => ProviderConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                model: "gemini-2.5-flash",
                env_var: "GEMINI_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Groq => "Groq",
            Provider::Grok => "Grok",
            Provider::Gemini => "Gemini",
        }
    }
}
