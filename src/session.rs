//! Signed-in sessions.
//!
//! A session owns one synchronizer per record kind for a single user, each
//! subscribed to the change-feed for that user's identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{Invoice, Job, JobStatus, Notification, Profile};
use crate::remote::{ChangeFeed, Notifier, RemoteStore, Table};
use crate::sync::{FilterContext, Role, Selection, SubscriptionHandle, Synchronizer};

/// Live views of one signed-in user.
pub struct Session {
    pub context: FilterContext,
    pub profile: Profile,
    pub jobs: Synchronizer<Job>,
    pub notifications: Synchronizer<Notification>,
    pub invoices: Synchronizer<Invoice>,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.context.user_id
    }

    pub fn role(&self) -> Role {
        self.context.role
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.context.role == role {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "Only a signed-in {} can do this",
                role.as_str()
            )))
        }
    }

    /// Stop every subscription of the session. Safe to call more than once.
    pub fn stop(&self) {
        let mut handles = match self.handles.lock() {
            Ok(handles) => handles,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in handles.iter_mut() {
            handle.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        match self.handles.lock() {
            Ok(handles) => handles.iter().any(SubscriptionHandle::is_active),
            Err(_) => false,
        }
    }

    /// Reload every view from the store.
    pub async fn refresh(&self) {
        tokio::join!(
            self.jobs.load_all(),
            self.notifications.load_all(),
            self.invoices.load_all(),
        );
    }
}

/// Tab a user lands on after signing in.
fn default_job_selection(role: Role) -> Selection {
    match role {
        Role::Driver => Selection::Job(JobStatus::Open),
        Role::Admin => Selection::All,
    }
}

/// Sessions by user id.
pub struct SessionRegistry {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    notifier: Arc<dyn Notifier>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            feed,
            notifier,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Start a session for `user_id`, or reuse the running one.
    ///
    /// The role comes from the stored profile. When it no longer matches the
    /// running session, the old session is torn down and a fresh one started.
    pub async fn sign_in(&self, user_id: &str, expected_role: Option<Role>) -> Result<Arc<Session>, AppError> {
        let row = self
            .store
            .fetch(Table::Profiles, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user_id)))?;
        let profile = Profile::from_row(&row);
        let role = profile
            .role
            .ok_or_else(|| AppError::Validation(format!("Profile {} has no role", user_id)))?;
        if expected_role.is_some_and(|expected| expected != role) {
            return Err(AppError::Unauthorized(format!(
                "Profile {} is not a {}",
                user_id,
                expected_role.map(|r| r.as_str()).unwrap_or_default()
            )));
        }

        let context = FilterContext::new(user_id, role);
        if let Some(existing) = self.get(user_id).await {
            if existing.context.same_identity(&context) && existing.is_active() {
                existing.refresh().await;
                return Ok(existing);
            }
        }

        let session = Arc::new(self.start_session(context, profile).await?);
        let replaced = self
            .sessions
            .write()
            .await
            .insert(user_id.to_string(), session.clone());
        if let Some(previous) = replaced {
            previous.stop();
        }

        tracing::info!(user_id, role = role.as_str(), "Session started");
        Ok(session)
    }

    async fn start_session(&self, context: FilterContext, profile: Profile) -> Result<Session, AppError> {
        let jobs = Synchronizer::new(self.store.clone(), self.feed.clone());
        let notifications =
            Synchronizer::new(self.store.clone(), self.feed.clone()).with_notifier(self.notifier.clone());
        let invoices = Synchronizer::new(self.store.clone(), self.feed.clone());

        let mut handles = Vec::with_capacity(3);
        handles.push(
            jobs.start(context.clone().with_selection(default_job_selection(context.role)))
                .await?,
        );
        handles.push(notifications.start(context.clone()).await?);
        handles.push(invoices.start(context.clone()).await?);

        Ok(Session {
            context,
            profile,
            jobs,
            notifications,
            invoices,
            handles: Mutex::new(handles),
        })
    }

    /// Stop and forget the session of `user_id`. Returns whether one existed.
    pub async fn sign_out(&self, user_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id);
        match removed {
            Some(session) => {
                session.stop();
                tracing::info!(user_id, "Session ended");
                true
            }
            None => false,
        }
    }

    /// Stop every session, for shutdown.
    pub async fn stop_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.stop();
        }
        tracing::info!(count = sessions.len(), "Sessions stopped");
    }
}
