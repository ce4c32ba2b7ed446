//! Identity resolution: make sure an actor has exactly one CRM contact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use highlevel_client::ContactInput;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domains::crm::models::ActorKind;
use crate::kernel::ServerDeps;

/// Per-actor async locks, so concurrent events for the same actor resolve
/// their contact one after the other within this process.
#[derive(Clone, Default)]
pub struct ContactLocks {
    inner: Arc<Mutex<HashMap<(ActorKind, Uuid), Arc<tokio::sync::Mutex<()>>>>>,
}

impl ContactLocks {
    pub async fn lock(&self, kind: ActorKind, user_id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry((kind, user_id)).or_default().clone()
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Identifying fields sent to the CRM
#[derive(Debug, Clone)]
pub struct ContactDetails {
    pub kind: ActorKind,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Applied only when the contact is created here
    pub tags: Vec<String>,
}

impl ContactDetails {
    fn identity_input(&self) -> ContactInput {
        ContactInput {
            first_name: Some(self.first_name.clone()),
            last_name: Some(self.last_name.clone()),
            email: Some(self.email.clone()),
            phone: self.phone.clone(),
            ..Default::default()
        }
    }
}

/// Where the resolved contact id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactSource {
    /// Already on the actor row; the remote record was refreshed
    Stored,
    /// Found remotely by email
    Lookup,
    /// Newly created, with the initial tags
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContact {
    pub id: String,
    pub source: ContactSource,
}

/// Ensure the actor has a CRM contact and return its id.
///
/// 1. A stored contact id is refreshed with the current name, email and phone
/// 2. Otherwise the CRM is searched by email
/// 3. Otherwise a contact is created with the initial tags
///
/// An id found in step 2 or 3 is saved on the actor row before returning.
/// `Ok(None)` means the CRM could not produce a contact; store errors are
/// propagated.
pub async fn ensure_contact(
    deps: &ServerDeps,
    details: &ContactDetails,
) -> Result<Option<ResolvedContact>> {
    let _guard = deps
        .contact_locks
        .lock(details.kind, details.user_id)
        .await;
    let user_id = Some(details.user_id);

    if let Some(contact_id) = deps
        .store
        .find_contact_id(details.kind, details.user_id)
        .await?
    {
        debug!(%contact_id, user_id = %details.user_id, "Refreshing stored CRM contact");
        deps.crm
            .update_contact(&contact_id, &details.identity_input(), user_id)
            .await;
        return Ok(Some(ResolvedContact {
            id: contact_id,
            source: ContactSource::Stored,
        }));
    }

    let (contact_id, source) =
        if let Some(existing) = deps.crm.get_contact_by_email(&details.email, user_id).await {
            (existing.id, ContactSource::Lookup)
        } else {
            let input = ContactInput {
                tags: details.tags.clone(),
                ..details.identity_input()
            };
            match deps.crm.create_contact(&input, user_id).await {
                Some(created) => (created.id, ContactSource::Created),
                None => {
                    debug!(user_id = %details.user_id, "CRM contact could not be resolved");
                    return Ok(None);
                }
            }
        };

    deps.store
        .save_contact_id(details.kind, details.user_id, &contact_id)
        .await?;
    info!(
        %contact_id,
        user_id = %details.user_id,
        kind = %details.kind,
        ?source,
        "Linked CRM contact"
    );

    Ok(Some(ResolvedContact {
        id: contact_id,
        source,
    }))
}
