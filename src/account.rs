//! Parent sign-in and the children on the account.
//!
//! The bearer token lives in the [`LocalStore`] so a restarted device stays
//! signed in; the active child is chosen through the selection orchestrator
//! so it is persisted the same way a manual pick is.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::api::LearningApi;
use crate::error::ClientResult;
use crate::models::{Child, Credentials, NewChild, User};
use crate::selection::SelectionOrchestrator;
use crate::store::LocalStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub user: User,
    pub children: Vec<Child>,
    pub active_child_id: Option<String>,
}

pub struct AccountClient {
    api: Arc<dyn LearningApi>,
    store: Arc<LocalStore>,
    selection: Arc<SelectionOrchestrator>,
    children: Mutex<Vec<Child>>,
}

impl AccountClient {
    pub fn new(
        api: Arc<dyn LearningApi>,
        store: Arc<LocalStore>,
        selection: Arc<SelectionOrchestrator>,
    ) -> Self {
        Self {
            api,
            store,
            selection,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Hands the stored token to the backend client. False when the device
    /// was never signed in.
    pub fn restore_token(&self) -> bool {
        match self.store.auth_token() {
            Some(token) => {
                self.api.set_token(Some(token));
                true
            }
            None => false,
        }
    }

    /// Signs in, stores the token, then loads the account and its children.
    /// The active child is kept if it belongs to the account, otherwise the
    /// first child becomes active.
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<SignedIn> {
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let token = self.api.login(&credentials).await?;
        self.api.set_token(Some(token.access_token.clone()));
        if let Err(err) = self.store.set_auth_token(Some(token.access_token)) {
            warn!(error = %err, "auth token not persisted, sign-in lasts until restart");
        }

        let user = self.api.me().await?;
        info!(user_id = %user.id, "signed in");
        let children = self.fetch_children().await?;
        Ok(SignedIn {
            user,
            active_child_id: self.selection.view().child_id,
            children,
        })
    }

    pub async fn me(&self) -> ClientResult<User> {
        self.api.me().await
    }

    /// Refreshes the child list and makes sure an active child is chosen.
    pub async fn fetch_children(&self) -> ClientResult<Vec<Child>> {
        let children = self.api.list_children().await?;
        *self.children.lock() = children.clone();
        self.selection.select_default_child(&children)?;
        Ok(children)
    }

    /// The list from the last fetch.
    pub fn children(&self) -> Vec<Child> {
        self.children.lock().clone()
    }

    /// Adds a child profile. Becomes the active child only when none is
    /// active yet.
    pub async fn create_child(&self, child: NewChild) -> ClientResult<Child> {
        let created = self.api.create_child(&child).await?;
        info!(child_id = %created.id, "child profile created");
        self.children.lock().push(created.clone());
        if self.selection.view().child_id.is_none() {
            self.selection.select_child(&created.id)?;
        }
        Ok(created)
    }

    /// Drops the token, the cached children and the active child.
    pub fn logout(&self) -> ClientResult<()> {
        self.api.set_token(None);
        self.children.lock().clear();
        self.store.set_auth_token(None)?;
        self.selection.clear_child()?;
        info!("signed out");
        Ok(())
    }
}
