//! AI provider capability for the Kaizen agent
//!
//! The core consumes AI through the [`AiProvider`] trait; concrete
//! transports are subprocess CLIs invoked with an argv (never a shell
//! string). Provider output is scrubbed of control sequences before any
//! other component sees it.

pub mod sanitize;
pub mod subprocess;

use async_trait::async_trait;
use kaizen_common::util::estimate_tokens;
use kaizen_common::{Error, Result, TokenUsage};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use subprocess::{run_argv, SubprocessLimits, SubprocessOutput};

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// A completion with token-usage estimates for accounting
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Capability consumed by phases, the verifier, and the security reviewer
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name, used in logs and review records
    fn name(&self) -> &str;

    /// Cheap availability probe; must not block the cycle for long
    async fn is_available(&self) -> bool;

    /// Run one completion
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Provider backed by a CLI subprocess. The prompt is appended as the final
/// argv element; stdin is closed immediately; stdout is scrubbed of
/// ANSI/OSC/control sequences before use.
pub struct CliProvider {
    name: String,
    argv: Vec<String>,
    working_dir: PathBuf,
    limits: SubprocessLimits,
}

impl CliProvider {
    pub fn new(
        name: impl Into<String>,
        argv: Vec<String>,
        working_dir: impl Into<PathBuf>,
        limits: SubprocessLimits,
    ) -> Self {
        Self {
            name: name.into(),
            argv,
            working_dir: working_dir.into(),
            limits,
        }
    }
}

#[async_trait]
impl AiProvider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let Some(program) = self.argv.first() else {
            return false;
        };
        // A configured binary that resolves on PATH (or exists as a path)
        // counts as available; actual rate limits surface per call.
        if program.contains('/') {
            tokio::fs::metadata(program).await.is_ok()
        } else {
            which_on_path(program).await
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if self.argv.is_empty() {
            return Err(Error::Provider(format!(
                "Provider '{}' has no command configured",
                self.name
            )));
        }

        let mut argv = self.argv.clone();
        argv.push(request.prompt.clone());

        debug!("Provider '{}' invoking {}", self.name, argv[0]);
        let output = run_argv(&argv, &self.working_dir, &self.limits).await?;

        if output.timed_out {
            return Err(Error::Timeout(format!(
                "Provider '{}' timed out after {:?}",
                self.name, output.duration
            )));
        }
        if output.status_code != Some(0) {
            return Err(Error::Provider(format!(
                "Provider '{}' exited with {:?}: {}",
                self.name,
                output.status_code,
                kaizen_common::util::truncate(&output.stderr, 400)
            )));
        }

        let text = sanitize::scrub_control_sequences(&output.stdout);
        let usage = TokenUsage {
            prompt_tokens: estimate_tokens(&request.prompt),
            completion_tokens: estimate_tokens(&text),
        };
        Ok(Completion { text, usage })
    }
}

async fn which_on_path(program: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&path) {
        if tokio::fs::metadata(dir.join(program)).await.is_ok() {
            return true;
        }
    }
    false
}

/// In-memory provider with canned responses, for tests and dry runs
pub struct StaticProvider {
    name: String,
    responses: Mutex<VecDeque<String>>,
    fallback_response: String,
    available: bool,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
            fallback_response: String::new(),
            available: true,
        }
    }

    /// Response returned once the canned queue is exhausted
    pub fn with_fallback_response(mut self, response: impl Into<String>) -> Self {
        self.fallback_response = response.into();
        self
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            fallback_response: String::new(),
            available: false,
        }
    }
}

#[async_trait]
impl AiProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if !self.available {
            return Err(Error::Provider(format!(
                "Provider '{}' is unavailable",
                self.name
            )));
        }
        let text = {
            let mut responses = self.responses.lock().await;
            responses
                .pop_front()
                .unwrap_or_else(|| self.fallback_response.clone())
        };
        Ok(Completion {
            usage: TokenUsage {
                prompt_tokens: estimate_tokens(&request.prompt),
                completion_tokens: estimate_tokens(&text),
            },
            text,
        })
    }
}

/// The provider pair the agent runs with: a high-trust primary and an
/// optional secondary used for fallback and dual review.
pub struct ProviderSet {
    primary: Option<Arc<dyn AiProvider>>,
    secondary: Option<Arc<dyn AiProvider>>,
    fallback_enabled: bool,
}

/// Which provider actually served a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    Primary,
    Secondary,
}

impl ProviderSet {
    pub fn new(
        primary: Option<Arc<dyn AiProvider>>,
        secondary: Option<Arc<dyn AiProvider>>,
        fallback_enabled: bool,
    ) -> Self {
        Self {
            primary,
            secondary,
            fallback_enabled,
        }
    }

    pub fn primary(&self) -> Option<&Arc<dyn AiProvider>> {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&Arc<dyn AiProvider>> {
        self.secondary.as_ref()
    }

    /// True when any provider can serve a completion right now
    pub async fn any_available(&self) -> bool {
        if let Some(primary) = &self.primary {
            if primary.is_available().await {
                return true;
            }
        }
        if self.fallback_enabled {
            if let Some(secondary) = &self.secondary {
                return secondary.is_available().await;
            }
        }
        false
    }

    /// Complete with the primary provider, falling back to the secondary
    /// when the primary is unavailable or fails transiently. The caller
    /// learns which provider served the call so fallback-produced artifacts
    /// can be routed into the confirmation queue.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<(Completion, ServedBy)> {
        if let Some(primary) = &self.primary {
            if primary.is_available().await {
                match primary.complete(request).await {
                    Ok(completion) => return Ok((completion, ServedBy::Primary)),
                    Err(e) if e.is_retryable() && self.fallback_enabled => {
                        warn!(
                            "Primary provider '{}' failed ({}); trying fallback",
                            primary.name(),
                            e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if self.fallback_enabled {
            if let Some(secondary) = &self.secondary {
                let completion = secondary.complete(request).await?;
                return Ok((completion, ServedBy::Secondary));
            }
        }

        Err(Error::Provider("No AI provider available".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_serves_canned_responses() {
        let provider = StaticProvider::new("test", vec!["first".into(), "second".into()])
            .with_fallback_response("default");
        let req = CompletionRequest::new("prompt");

        assert_eq!(provider.complete(&req).await.unwrap().text, "first");
        assert_eq!(provider.complete(&req).await.unwrap().text, "second");
        assert_eq!(provider.complete(&req).await.unwrap().text, "default");
    }

    #[tokio::test]
    async fn test_provider_set_falls_back_when_primary_unavailable() {
        let set = ProviderSet::new(
            Some(Arc::new(StaticProvider::unavailable("primary"))),
            Some(Arc::new(
                StaticProvider::new("secondary", vec![]).with_fallback_response("from-secondary"),
            )),
            true,
        );

        let (completion, served_by) = set
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(completion.text, "from-secondary");
        assert_eq!(served_by, ServedBy::Secondary);
    }

    #[tokio::test]
    async fn test_provider_set_errors_without_providers() {
        let set = ProviderSet::new(None, None, true);
        let err = set
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn test_provider_set_no_fallback_when_disabled() {
        let set = ProviderSet::new(
            Some(Arc::new(StaticProvider::unavailable("primary"))),
            Some(Arc::new(
                StaticProvider::new("secondary", vec![]).with_fallback_response("x"),
            )),
            false,
        );
        assert!(set.complete(&CompletionRequest::new("p")).await.is_err());
    }
}
