pub mod directory;
pub mod messages;
pub mod presence;
pub mod provisioner;

pub use directory::ConversationDirectory;
pub use messages::MessageService;
pub use presence::{PresenceTracker, Visibility};
pub use provisioner::TeamConversationProvisioner;
