use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::VaultCredentialConfig;
use crate::errors::AppError;
use crate::models::directive::{
    BlockStorageDirective, KafkaSecurityDirective,
};

/// Secret-store access the core consumes. Implementations resolve the
/// security material for every (topic, role) a bundle names.
#[async_trait]
pub trait VaultFunctions: Send + Sync {
    async fn fetch_security_directives(
        &self,
        directive: &BlockStorageDirective,
    ) -> Result<Vec<KafkaSecurityDirective>, AppError>;
}

/// Vault child: one per engine. Delegates to the injected functions and
/// enforces that every topic directive got an entry.
pub struct VaultChild {
    functions: Arc<dyn VaultFunctions>,
}

impl VaultChild {
    pub fn new(functions: Arc<dyn VaultFunctions>) -> Self {
        Self { functions }
    }

    pub async fn resolve(
        &self,
        directive: &BlockStorageDirective,
    ) -> Result<Vec<KafkaSecurityDirective>, AppError> {
        let resolved = self.functions.fetch_security_directives(directive).await?;

        let mut missing = Vec::new();
        for topic_directive in &directive.topic_directives {
            let covered = resolved.iter().any(|security| {
                security.topic == topic_directive.topic && security.role == topic_directive.role
            });
            if !covered {
                missing.push(format!(
                    "({}, {})",
                    topic_directive.topic, topic_directive.role
                ));
            }
        }
        if !missing.is_empty() {
            return Err(AppError::Vault(format!(
                "No security directive resolved for: {}",
                missing.join(", ")
            )));
        }

        info!(entries = resolved.len(), "Resolved security directives");
        Ok(resolved)
    }
}

/// Configuration-backed vault: hands out material configured per
/// (topic, role) and defaults everything else to PLAINTEXT. Used for local
/// runs and tests; production deployments inject a real secret store.
pub struct ConfigVault {
    credentials: Vec<VaultCredentialConfig>,
}

impl ConfigVault {
    pub fn new(credentials: Vec<VaultCredentialConfig>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl VaultFunctions for ConfigVault {
    async fn fetch_security_directives(
        &self,
        directive: &BlockStorageDirective,
    ) -> Result<Vec<KafkaSecurityDirective>, AppError> {
        let mut resolved = Vec::with_capacity(directive.topic_directives.len());
        for topic_directive in &directive.topic_directives {
            let configured = self.credentials.iter().find(|credential| {
                credential.topic == topic_directive.topic
                    && credential.role == topic_directive.role
            });
            resolved.push(match configured {
                Some(credential) => KafkaSecurityDirective {
                    topic: credential.topic.clone(),
                    role: credential.role,
                    protocol: credential.protocol,
                    credential_blob: credential.credential_blob.clone(),
                },
                None => KafkaSecurityDirective::plaintext(
                    &topic_directive.topic,
                    topic_directive.role,
                ),
            });
        }
        Ok(resolved)
    }
}
