//! The curator role: a pooled model used for compression, analytics,
//! and arbitration. Each call leases a context, runs one generation or
//! embedding, and releases the lease on every exit path.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use sy_domain::{CollaborationPhase, Result};
use sy_inference::formatter::{self, TemplateFamily};
use sy_inference::{ContextPool, GenerationRequest, ModelSpec};

pub struct Curator {
    model_id: String,
    pool: Arc<ContextPool>,
    template: TemplateFamily,
    acquire_timeout: Duration,
}

impl Curator {
    pub fn new(pool: Arc<ContextPool>, spec: &ModelSpec, acquire_timeout: Duration) -> Self {
        Self {
            model_id: spec.id.clone(),
            pool,
            template: spec.template,
            acquire_timeout,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Run one non-streaming completion and return the full text.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let mut lease = self.pool.acquire(self.acquire_timeout).await?;

        let req = GenerationRequest {
            prompt: formatter::render(self.template, system, user, CollaborationPhase::Idle),
            max_tokens,
            temperature,
            stop: self.template.stop_tokens(),
        };

        let mut stream = match lease.session().generate(req).await {
            Ok(stream) => stream,
            Err(e) => {
                // The context could not start a generation at all.
                lease.mark_poisoned();
                return Err(e);
            }
        };

        let mut text = String::new();
        while let Some(token) = stream.next().await {
            match token {
                Ok(token) => text.push_str(&token),
                Err(e) => {
                    drop(stream);
                    lease.mark_poisoned();
                    return Err(e);
                }
            }
        }

        Ok(text.trim().to_owned())
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lease = self.pool.acquire(self.acquire_timeout).await?;
        lease.session().embed(text).await
    }
}
