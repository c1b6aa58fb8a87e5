pub const EVENT_CHAT_COMPLETED: &str = "chat.completed";
pub const EVENT_CHAT_ERROR: &str = "chat.error";
pub const EVENT_USER_CREATED: &str = "user.created";
pub const EVENT_BACKUP_COMPLETED: &str = "backup.completed";
