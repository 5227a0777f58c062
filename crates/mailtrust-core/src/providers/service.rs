//! Provider configuration lifecycle and sender resolution

use super::factory::ProviderFactory;
use super::ProviderSender;
use chrono::Utc;
use mailtrust_common::types::{ProviderConfigId, ProviderType, UserId};
use mailtrust_common::{Error, Result};
use mailtrust_storage::models::{CreateProviderConfig, EmailProviderConfig};
use mailtrust_storage::repository::ProviderConfigRepository;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ProviderService {
    repo: Arc<dyn ProviderConfigRepository>,
    factory: Arc<ProviderFactory>,
}

impl ProviderService {
    pub fn new(repo: Arc<dyn ProviderConfigRepository>, factory: Arc<ProviderFactory>) -> Self {
        Self { repo, factory }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Persist a provider; sensitive settings are encrypted first
    pub async fn create(
        &self,
        user_id: UserId,
        name: &str,
        provider_type: ProviderType,
        settings: Value,
    ) -> Result<EmailProviderConfig> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Provider name is required".to_string()));
        }

        let config = self.factory.encrypt_settings(settings)?;
        let provider = self
            .repo
            .create(CreateProviderConfig {
                user_id,
                name: name.to_string(),
                provider_type,
                config,
                is_active: true,
            })
            .await?;

        info!(
            user_id = %user_id,
            provider_id = %provider.id,
            provider_type = %provider_type,
            "Created email provider"
        );
        Ok(provider)
    }

    pub async fn set_default(&self, user_id: UserId, id: ProviderConfigId) -> Result<()> {
        self.repo.set_default(user_id, id).await?;
        info!(user_id = %user_id, provider_id = %id, "Default email provider changed");
        Ok(())
    }

    /// The requested provider, or the user's default when `id` is `None`
    pub async fn resolve(
        &self,
        user_id: UserId,
        id: Option<ProviderConfigId>,
    ) -> Result<EmailProviderConfig> {
        let provider = match id {
            Some(id) => self.repo.get(user_id, id).await?,
            None => self.repo.get_default(user_id).await?,
        };
        provider.ok_or_else(|| match id {
            Some(id) => Error::NotFound(format!("Provider configuration {}", id)),
            None => Error::NotFound(format!("Default provider for user {}", user_id)),
        })
    }

    /// Resolve a provider and build its sender
    pub async fn sender_for(
        &self,
        user_id: UserId,
        id: Option<ProviderConfigId>,
    ) -> Result<(EmailProviderConfig, ProviderSender)> {
        let provider = self.resolve(user_id, id).await?;
        let sender = self.factory.create_sender(&provider)?;
        Ok((provider, sender))
    }

    pub async fn record_result(&self, id: ProviderConfigId, success: bool) -> Result<()> {
        self.repo.record_result(id, success, Utc::now()).await
    }
}
