//! In-memory backend
//!
//! Implements every repository trait over mutex-guarded maps. Each table has a
//! single lock, so compare-and-swap and conditional increments are atomic just
//! like their SQL counterparts.

use crate::models::{
    BounceStatistics, Contact, ContactUpdate, CreateContact, CreateDomain, CreateProviderConfig,
    Domain, DomainCheck, EmailProviderConfig, RateLimitWindow,
};
use crate::repository::{
    ContactRepository, DomainRepository, IncrementOutcome, ProviderConfigRepository,
    RateLimitRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailtrust_common::types::{
    ContactId, ContactStatus, DomainId, DomainStatus, ProviderConfigId, RateLimitWindowId,
    ResourceType, UserId,
};
use mailtrust_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory store for tests and embedded use
#[derive(Default)]
pub struct MemoryStore {
    domains: Mutex<HashMap<DomainId, Domain>>,
    providers: Mutex<HashMap<ProviderConfigId, EmailProviderConfig>>,
    contacts: Mutex<HashMap<ContactId, Contact>>,
    windows: Mutex<HashMap<RateLimitWindowId, RateLimitWindow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a domain row as-is
    pub async fn put_domain(&self, domain: Domain) {
        self.domains.lock().await.insert(domain.id, domain);
    }

    /// Insert or replace a rate limit window as-is
    pub async fn put_window(&self, window: RateLimitWindow) {
        self.windows.lock().await.insert(window.id, window);
    }

    /// Number of stored windows, expired ones included
    pub async fn window_count(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl DomainRepository for MemoryStore {
    async fn create(&self, input: CreateDomain) -> Result<Domain> {
        let mut domains = self.domains.lock().await;
        let name = input.name.to_ascii_lowercase();

        if domains.values().any(|d| d.name == name) {
            return Err(Error::Conflict(format!("Domain {} already exists", name)));
        }

        let now = Utc::now();
        let domain = Domain {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            name,
            status: DomainStatus::Pending.to_string(),
            spf_verified: false,
            dkim_verified: false,
            dmarc_verified: false,
            dkim_selector: input.dkim_selector,
            dkim_public_key: Some(input.dkim_public_key),
            dkim_private_key: Some(input.dkim_private_key),
            created_at: now,
            updated_at: now,
            last_checked_at: None,
            verified_at: None,
        };
        domains.insert(domain.id, domain.clone());
        Ok(domain)
    }

    async fn get_for_user(&self, user_id: UserId, id: DomainId) -> Result<Option<Domain>> {
        Ok(self
            .domains
            .lock()
            .await
            .get(&id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let name = name.to_ascii_lowercase();
        Ok(self
            .domains
            .lock()
            .await
            .values()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn list_by_status(&self, status: DomainStatus) -> Result<Vec<Domain>> {
        let mut found: Vec<Domain> = self
            .domains
            .lock()
            .await
            .values()
            .filter(|d| d.status == status.as_str())
            .cloned()
            .collect();
        found.sort_by_key(|d| d.created_at);
        Ok(found)
    }

    async fn list_all(&self) -> Result<Vec<Domain>> {
        let mut all: Vec<Domain> = self.domains.lock().await.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        Ok(all)
    }

    async fn record_check(&self, id: DomainId, check: DomainCheck) -> Result<Domain> {
        let mut domains = self.domains.lock().await;
        let domain = domains
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Domain {}", id)))?;

        domain.status = check.status.to_string();
        domain.spf_verified = check.spf_verified;
        domain.dkim_verified = check.dkim_verified;
        domain.dmarc_verified = check.dmarc_verified;
        domain.last_checked_at = Some(check.checked_at);
        if check.verified_at.is_some() {
            domain.verified_at = check.verified_at;
        }
        domain.updated_at = check.checked_at;

        Ok(domain.clone())
    }
}

#[async_trait]
impl ProviderConfigRepository for MemoryStore {
    async fn create(&self, input: CreateProviderConfig) -> Result<EmailProviderConfig> {
        let now = Utc::now();
        let config = EmailProviderConfig {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            name: input.name,
            provider_type: input.provider_type.to_string(),
            config: input.config,
            is_active: input.is_active,
            is_default: false,
            emails_sent: 0,
            emails_failed: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.providers
            .lock()
            .await
            .insert(config.id, config.clone());
        Ok(config)
    }

    async fn get(
        &self,
        user_id: UserId,
        id: ProviderConfigId,
    ) -> Result<Option<EmailProviderConfig>> {
        Ok(self
            .providers
            .lock()
            .await
            .get(&id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn get_default(&self, user_id: UserId) -> Result<Option<EmailProviderConfig>> {
        Ok(self
            .providers
            .lock()
            .await
            .values()
            .find(|p| p.user_id == user_id && p.is_default)
            .cloned())
    }

    async fn set_default(&self, user_id: UserId, id: ProviderConfigId) -> Result<()> {
        let mut providers = self.providers.lock().await;

        if !providers
            .get(&id)
            .map(|p| p.user_id == user_id)
            .unwrap_or(false)
        {
            return Err(Error::NotFound(format!("Provider configuration {}", id)));
        }

        let now = Utc::now();
        for provider in providers.values_mut().filter(|p| p.user_id == user_id) {
            let is_target = provider.id == id;
            if provider.is_default != is_target {
                provider.is_default = is_target;
                provider.updated_at = now;
            }
        }
        Ok(())
    }

    async fn record_result(
        &self,
        id: ProviderConfigId,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut providers = self.providers.lock().await;
        let provider = providers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Provider configuration {}", id)))?;

        if success {
            provider.emails_sent += 1;
        } else {
            provider.emails_failed += 1;
        }
        provider.last_used_at = Some(at);
        provider.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn create(&self, input: CreateContact) -> Result<Contact> {
        let mut contacts = self.contacts.lock().await;
        let email = input.email.trim().to_ascii_lowercase();

        if contacts
            .values()
            .any(|c| c.user_id == input.user_id && c.email == email)
        {
            return Err(Error::Conflict(format!("Contact {} already exists", email)));
        }

        let now = Utc::now();
        let contact = Contact {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            email,
            status: ContactStatus::Active.to_string(),
            bounce_count: 0,
            hard_bounce_count: 0,
            soft_bounce_count: 0,
            last_bounced_at: None,
            unsubscribed_at: None,
            notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.contacts.lock().await.get(&id).cloned())
    }

    async fn find_by_email(&self, user_id: UserId, email: &str) -> Result<Option<Contact>> {
        let email = email.trim().to_ascii_lowercase();
        Ok(self
            .contacts
            .lock()
            .await
            .values()
            .find(|c| c.user_id == user_id && c.email == email)
            .cloned())
    }

    async fn update_deliverability(&self, update: ContactUpdate) -> Result<Option<Contact>> {
        let mut contacts = self.contacts.lock().await;
        let contact = match contacts.get_mut(&update.id) {
            Some(contact) if contact.version == update.expected_version => contact,
            _ => return Ok(None),
        };

        contact.status = update.status.to_string();
        contact.bounce_count = update.bounce_count;
        contact.hard_bounce_count = update.hard_bounce_count;
        contact.soft_bounce_count = update.soft_bounce_count;
        contact.last_bounced_at = update.last_bounced_at;
        contact.unsubscribed_at = update.unsubscribed_at;
        contact.notes = update.notes;
        contact.version += 1;
        contact.updated_at = Utc::now();

        Ok(Some(contact.clone()))
    }

    async fn statistics(&self, user_id: UserId) -> Result<BounceStatistics> {
        let contacts = self.contacts.lock().await;
        let mut stats = BounceStatistics::default();

        for contact in contacts.values().filter(|c| c.user_id == user_id) {
            stats.total_contacts += 1;
            stats.hard_bounces += i64::from(contact.hard_bounce_count);
            stats.soft_bounces += i64::from(contact.soft_bounce_count);
            match contact.status_enum() {
                Some(ContactStatus::Bounced) => stats.bounced_contacts += 1,
                Some(ContactStatus::Complained) => stats.complained_contacts += 1,
                Some(ContactStatus::Unsubscribed) => stats.unsubscribed_contacts += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl RateLimitRepository for MemoryStore {
    async fn get_or_create_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        limit: i32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow> {
        let mut windows = self.windows.lock().await;

        if let Some(active) = windows
            .values()
            .filter(|w| {
                w.user_id == user_id && w.resource_type == resource.as_str() && w.is_active(now)
            })
            .max_by_key(|w| w.window_start)
        {
            return Ok(active.clone());
        }

        let created = RateLimitWindow {
            id: Uuid::now_v7(),
            user_id,
            resource_type: resource.to_string(),
            window_start: now,
            window_end: now + window,
            limit_value: limit,
            request_count: 0,
            created_at: now,
            updated_at: now,
        };
        windows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>> {
        Ok(self
            .windows
            .lock()
            .await
            .values()
            .filter(|w| {
                w.user_id == user_id && w.resource_type == resource.as_str() && w.is_active(now)
            })
            .max_by_key(|w| w.window_start)
            .cloned())
    }

    async fn try_increment(
        &self,
        id: RateLimitWindowId,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome> {
        let mut windows = self.windows.lock().await;
        let window = match windows.get_mut(&id) {
            Some(window) if window.window_end > now => window,
            _ => return Ok(IncrementOutcome::Expired),
        };

        if window.is_exhausted() {
            return Ok(IncrementOutcome::LimitReached(window.clone()));
        }

        window.request_count += 1;
        window.updated_at = now;
        Ok(IncrementOutcome::Incremented(window.clone()))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| w.window_end > now);
        Ok((before - windows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailtrust_common::types::ProviderType;
    use pretty_assertions::assert_eq;

    fn new_domain(user_id: UserId, name: &str) -> CreateDomain {
        CreateDomain {
            user_id,
            name: name.to_string(),
            dkim_selector: "mailtrust".to_string(),
            dkim_public_key: "cHVibGlj".to_string(),
            dkim_private_key: "c2VjcmV0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_domain_names_are_unique() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();

        DomainRepository::create(&store, new_domain(user, "Example.com"))
            .await
            .unwrap();
        let err = DomainRepository::create(&store, new_domain(user, "example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_record_check_keeps_verified_at_when_absent() {
        let store = MemoryStore::new();
        let domain = DomainRepository::create(&store, new_domain(Uuid::now_v7(), "a.test"))
            .await
            .unwrap();
        let first = Utc::now();

        store
            .record_check(
                domain.id,
                DomainCheck {
                    status: DomainStatus::Verified,
                    spf_verified: true,
                    dkim_verified: true,
                    dmarc_verified: true,
                    checked_at: first,
                    verified_at: Some(first),
                },
            )
            .await
            .unwrap();

        let updated = store
            .record_check(
                domain.id,
                DomainCheck {
                    status: DomainStatus::Partial,
                    spf_verified: true,
                    dkim_verified: false,
                    dmarc_verified: true,
                    checked_at: first + Duration::hours(1),
                    verified_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status_enum(), Some(DomainStatus::Partial));
        assert_eq!(updated.verified_at, Some(first));
        assert_eq!(updated.last_checked_at, Some(first + Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_set_default_unsets_others() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let mut ids = Vec::new();
        for name in ["primary", "backup"] {
            let provider = ProviderConfigRepository::create(
                &store,
                CreateProviderConfig {
                    user_id: user,
                    name: name.to_string(),
                    provider_type: ProviderType::Sendgrid,
                    config: serde_json::json!({}),
                    is_active: true,
                },
            )
            .await
            .unwrap();
            ids.push(provider.id);
        }

        store.set_default(user, ids[0]).await.unwrap();
        store.set_default(user, ids[1]).await.unwrap();

        let default = store.get_default(user).await.unwrap().unwrap();
        assert_eq!(default.id, ids[1]);
        let previous = ProviderConfigRepository::get(&store, user, ids[0])
            .await
            .unwrap()
            .unwrap();
        assert!(!previous.is_default);

        let err = store.set_default(Uuid::now_v7(), ids[0]).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_contact_compare_and_swap() {
        let store = MemoryStore::new();
        let contact = ContactRepository::create(
            &store,
            CreateContact {
                user_id: Uuid::now_v7(),
                email: "Reader@Example.com".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(contact.email, "reader@example.com");

        let update = ContactUpdate {
            id: contact.id,
            expected_version: contact.version,
            status: ContactStatus::Bounced,
            bounce_count: 1,
            hard_bounce_count: 1,
            soft_bounce_count: 0,
            last_bounced_at: Some(Utc::now()),
            unsubscribed_at: None,
            notes: None,
        };

        let applied = store.update_deliverability(update.clone()).await.unwrap();
        assert_eq!(applied.map(|c| c.version), Some(1));

        // Same expected version again is stale
        assert!(store.update_deliverability(update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contact_lookup_is_scoped_per_user() {
        let store = MemoryStore::new();
        let owner = Uuid::now_v7();
        ContactRepository::create(
            &store,
            CreateContact {
                user_id: owner,
                email: "shared@example.com".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(store
            .find_by_email(owner, "SHARED@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_email(Uuid::now_v7(), "shared@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_single_active_window_per_resource() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let now = Utc::now();

        let first = store
            .get_or_create_active(user, ResourceType::EmailSend, 10, Duration::hours(1), now)
            .await
            .unwrap();
        let again = store
            .get_or_create_active(
                user,
                ResourceType::EmailSend,
                10,
                Duration::hours(1),
                now + Duration::minutes(30),
            )
            .await
            .unwrap();
        assert_eq!(first.id, again.id);

        let later = store
            .get_or_create_active(
                user,
                ResourceType::EmailSend,
                10,
                Duration::hours(1),
                now + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_ne!(first.id, later.id);
        assert_eq!(later.request_count, 0);

        assert_eq!(store.delete_expired(now + Duration::hours(1)).await.unwrap(), 1);
        assert_eq!(store.window_count().await, 1);
    }

    #[tokio::test]
    async fn test_try_increment_stops_at_limit() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let window = store
            .get_or_create_active(
                Uuid::now_v7(),
                ResourceType::ApiRequest,
                2,
                Duration::minutes(1),
                now,
            )
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(matches!(
                store.try_increment(window.id, now).await.unwrap(),
                IncrementOutcome::Incremented(_)
            ));
        }
        match store.try_increment(window.id, now).await.unwrap() {
            IncrementOutcome::LimitReached(w) => assert_eq!(w.request_count, 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            store
                .try_increment(window.id, now + Duration::minutes(1))
                .await
                .unwrap(),
            IncrementOutcome::Expired
        ));
    }
}
