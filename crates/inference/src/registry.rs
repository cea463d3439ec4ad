//! GGUF model discovery.
//!
//! Scans the configured models directory for `*.gguf` files and pairs
//! each with a known model record (context size, template family,
//! sampling settings). Unrecognized files get conservative defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sy_domain::config::ModelsConfig;
use sy_domain::Result;

use crate::formatter::TemplateFamily;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// The file stem, used as the model id everywhere.
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub context_size: u32,
    pub template: TemplateFamily,
    pub settings: ModelSettings,
}

pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Scan `config.dir` for GGUF files. A missing directory yields an
    /// empty registry (the server still boots; `/api/models` is empty).
    pub fn scan(config: &ModelsConfig) -> Result<Self> {
        let mut models = Vec::new();

        let entries = match std::fs::read_dir(&config.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %config.dir.display(),
                    error = %e,
                    "models directory unreadable; registry is empty"
                );
                return Ok(Self { models });
            }
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("gguf") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            models.push(spec_for(stem, &path, config.context_size));
        }

        models.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(count = models.len(), dir = %config.dir.display(), "model registry scanned");
        Ok(Self { models })
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn list(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    #[cfg(any(test, feature = "test-fixtures"))]
    pub fn from_specs(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }
}

/// Pair a file stem with its known record. Family is recognized by
/// naming convention; the fallback is ChatML, which most instruct
/// finetunes speak.
fn spec_for(stem: &str, path: &Path, default_context: u32) -> ModelSpec {
    let lower = stem.to_lowercase();

    let (name, context_size, template, settings) = if lower.contains("gemma") {
        (
            display_name(stem),
            8192,
            TemplateFamily::Gemma,
            ModelSettings {
                temperature: 0.7,
                top_p: 0.9,
            },
        )
    } else if lower.contains("qwen") {
        (
            display_name(stem),
            32_768,
            TemplateFamily::ChatMl,
            ModelSettings {
                temperature: 0.7,
                top_p: 0.8,
            },
        )
    } else if lower.contains("llama") {
        (
            display_name(stem),
            8192,
            TemplateFamily::Llama3,
            ModelSettings {
                temperature: 0.6,
                top_p: 0.9,
            },
        )
    } else {
        (
            display_name(stem),
            default_context,
            TemplateFamily::ChatMl,
            ModelSettings::default(),
        )
    };

    ModelSpec {
        id: stem.to_owned(),
        name,
        path: path.to_owned(),
        context_size: context_size.min(default_context.max(2048)),
        template,
        settings,
    }
}

fn display_name(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_families_are_recognized() {
        let gemma = spec_for("gemma-3-12b-it", Path::new("gemma-3-12b-it.gguf"), 8192);
        assert_eq!(gemma.template, TemplateFamily::Gemma);
        assert_eq!(gemma.id, "gemma-3-12b-it");

        let qwen = spec_for(
            "qwen2.5-14b-instruct",
            Path::new("qwen2.5-14b-instruct.gguf"),
            8192,
        );
        assert_eq!(qwen.template, TemplateFamily::ChatMl);

        let llama = spec_for("llama-3.1-8b", Path::new("llama-3.1-8b.gguf"), 8192);
        assert_eq!(llama.template, TemplateFamily::Llama3);
    }

    #[test]
    fn context_size_capped_by_configured_window() {
        let qwen = spec_for("qwen2.5-14b-instruct", Path::new("q.gguf"), 8192);
        assert_eq!(qwen.context_size, 8192);
    }

    #[test]
    fn unknown_models_get_defaults() {
        let other = spec_for("my-finetune", Path::new("my-finetune.gguf"), 4096);
        assert_eq!(other.template, TemplateFamily::ChatMl);
        assert_eq!(other.context_size, 4096);
        assert_eq!(other.name, "my finetune");
    }

    #[test]
    fn missing_directory_yields_empty_registry() {
        let config = ModelsConfig {
            dir: PathBuf::from("/nonexistent/models"),
            ..Default::default()
        };
        let registry = ModelRegistry::scan(&config).unwrap();
        assert!(registry.is_empty());
    }
}
