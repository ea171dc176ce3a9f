pub mod gateway;
pub mod sessions;

pub use gateway::{AssistantApi, AssistantGateway, Reply, ReplyItem};
pub use sessions::{ConversationSessionManager, SessionHandle, SessionLease};
