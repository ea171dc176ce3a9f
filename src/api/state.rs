use std::sync::Arc;

use crate::assistant::ConversationSessionManager;
use crate::auth::AuthService;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub sessions: Arc<ConversationSessionManager>,
    pub config: Arc<Config>,
}
