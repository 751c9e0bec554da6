use std::fmt;

/// The five entity kinds replicated by the sync engine, in the order they
/// appear throughout the spec and the generated routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Note,
    Task,
    Comment,
    Chat,
    ChatMessage,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Note,
        EntityKind::Task,
        EntityKind::Comment,
        EntityKind::Chat,
        EntityKind::ChatMessage,
    ];

    /// The path segment / table-name stem used across storage, REST and RPC.
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Note => "notes",
            EntityKind::Task => "tasks",
            EntityKind::Comment => "comments",
            EntityKind::Chat => "chats",
            EntityKind::ChatMessage => "chat_messages",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        Some(match s {
            "notes" => EntityKind::Note,
            "tasks" => EntityKind::Task,
            "comments" => EntityKind::Comment,
            "chats" => EntityKind::Chat,
            "chat_messages" => EntityKind::ChatMessage,
            _ => return None,
        })
    }

    /// Kinds a comment is allowed to hang off of.
    pub const fn is_valid_comment_parent(self) -> bool {
        matches!(self, EntityKind::Note | EntityKind::Task | EntityKind::Comment)
    }

    /// Process actions allowed for `POST /v1/{kind}/{uid}/process`.
    pub const fn process_actions(self) -> &'static [&'static str] {
        match self {
            EntityKind::Note => &["pin", "unpin", "archive", "unarchive"],
            EntityKind::Task => &["start", "complete", "reopen"],
            EntityKind::Comment => &["resolve", "reopen"],
            EntityKind::Chat => &["resolve", "reopen"],
            EntityKind::ChatMessage => &["mark_read", "mark_delivered"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        assert_eq!(EntityKind::parse("widgets"), None);
    }

    #[test]
    fn comment_parent_kinds_exclude_chat() {
        assert!(!EntityKind::Chat.is_valid_comment_parent());
        assert!(EntityKind::Comment.is_valid_comment_parent());
    }
}
