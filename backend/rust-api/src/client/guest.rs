//! Guest identity: intake validation, persistence, and the
//! `Unidentified -> Identified` flow shared by join-by-code and submission.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::models::answer::GuestFields;
use crate::models::ParticipantIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestValidationError {
    #[error("Name is required")]
    NameRequired,
    #[error("Email or mobile is required")]
    ContactRequired,
}

#[derive(Debug, Error)]
pub enum GuestStoreError {
    #[error("guest store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("guest record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

/// Persisted guest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestIdentity {
    pub guest_id: String,
    pub guest_name: String,
    pub guest_contact: GuestContact,
}

impl GuestIdentity {
    pub fn participant_identity(&self) -> ParticipantIdentity {
        ParticipantIdentity::guest(&self.guest_id, &self.guest_name)
    }

    /// Fields attached to a guest submission.
    pub fn guest_fields(&self) -> GuestFields {
        GuestFields {
            is_guest: true,
            guest_id: Some(self.guest_id.clone()),
            name: self.guest_name.clone(),
            email: self.guest_contact.email.clone(),
            mobile: self.guest_contact.mobile.clone(),
        }
    }
}

/// Raw form input.
#[derive(Debug, Clone, Default)]
pub struct GuestIntake {
    pub name: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
}

impl GuestIntake {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn mobile(mut self, mobile: impl Into<String>) -> Self {
        self.mobile = Some(mobile.into());
        self
    }

    /// Same rule the server enforces: non-blank name and at least one non-blank contact.
    pub fn validate(&self) -> Result<(String, GuestContact), GuestValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(GuestValidationError::NameRequired);
        }

        let email = trimmed(self.email.as_deref());
        let mobile = trimmed(self.mobile.as_deref());
        if email.is_none() && mobile.is_none() {
            return Err(GuestValidationError::ContactRequired);
        }

        Ok((
            name.to_string(),
            GuestContact {
                email: email.map(str::to_string),
                mobile: mobile.map(str::to_string),
            },
        ))
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub trait GuestIdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<GuestIdentity>, GuestStoreError>;
    fn save(&self, identity: &GuestIdentity) -> Result<(), GuestStoreError>;
    fn clear(&self) -> Result<(), GuestStoreError>;
}

/// One JSON file per namespace under `dir`.
pub struct FileGuestStore {
    path: PathBuf,
}

impl FileGuestStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        let safe: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            path: dir.as_ref().join(format!("guest-{}.json", safe)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GuestIdentityStore for FileGuestStore {
    fn load(&self) -> Result<Option<GuestIdentity>, GuestStoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identity: &GuestIdentity) -> Result<(), GuestStoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(identity)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), GuestStoreError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryGuestStore {
    record: Mutex<Option<GuestIdentity>>,
}

impl GuestIdentityStore for MemoryGuestStore {
    fn load(&self) -> Result<Option<GuestIdentity>, GuestStoreError> {
        Ok(self.record.lock().map(|r| r.clone()).unwrap_or_default())
    }

    fn save(&self, identity: &GuestIdentity) -> Result<(), GuestStoreError> {
        if let Ok(mut record) = self.record.lock() {
            *record = Some(identity.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), GuestStoreError> {
        if let Ok(mut record) = self.record.lock() {
            *record = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestState {
    Unidentified,
    Identified(GuestIdentity),
}

pub struct GuestFlow<S: GuestIdentityStore> {
    store: S,
    state: GuestState,
}

impl<S: GuestIdentityStore> GuestFlow<S> {
    /// Resumes from the store. An unreadable record counts as unidentified.
    pub fn new(store: S) -> Self {
        let state = match store.load() {
            Ok(Some(identity)) => GuestState::Identified(identity),
            Ok(None) => GuestState::Unidentified,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable guest record");
                GuestState::Unidentified
            }
        };
        Self { store, state }
    }

    pub fn state(&self) -> &GuestState {
        &self.state
    }

    pub fn identity(&self) -> Option<&GuestIdentity> {
        match &self.state {
            GuestState::Identified(identity) => Some(identity),
            GuestState::Unidentified => None,
        }
    }

    /// Validates the intake and persists it. An already identified guest keeps their id.
    pub fn identify(&mut self, intake: &GuestIntake) -> Result<GuestIdentity, GuestValidationError> {
        let (guest_name, guest_contact) = intake.validate()?;
        let guest_id = self
            .identity()
            .map(|existing| existing.guest_id.clone())
            .unwrap_or_else(|| format!("guest-{}", Uuid::new_v4()));

        let identity = GuestIdentity {
            guest_id,
            guest_name,
            guest_contact,
        };
        if let Err(e) = self.store.save(&identity) {
            tracing::warn!(error = %e, "Guest identity not persisted");
        }
        self.state = GuestState::Identified(identity.clone());
        Ok(identity)
    }

    /// Explicit sign-out of the guest identity.
    pub fn forget(&mut self) -> Result<(), GuestStoreError> {
        self.store.clear()?;
        self.state = GuestState::Unidentified;
        Ok(())
    }
}
