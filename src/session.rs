use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::AccessToken;

/// Per-connection tool state: the selected project and the credential obtained for it.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    selected_project: Option<String>,
    credential: Option<AccessToken>,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

impl SessionState {
    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(SessionState::default()))
    }

    pub fn selected_project(&self) -> Option<&str> {
        self.selected_project.as_deref()
    }

    pub fn credential(&self) -> Option<&AccessToken> {
        self.credential.as_ref()
    }

    /// Project and credential are only ever set together.
    pub fn select(&mut self, project_id: String, credential: AccessToken) {
        self.selected_project = Some(project_id);
        self.credential = Some(credential);
    }

    pub fn refresh_credential(&mut self, credential: AccessToken) {
        if self.selected_project.is_some() {
            self.credential = Some(credential);
        }
    }

    pub fn clear(&mut self) {
        self.selected_project = None;
        self.credential = None;
    }
}
