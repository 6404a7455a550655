/// Durable log topics for the user lifecycle.
///
/// Each topic is its own partition of the log: ordering holds within a topic,
/// never across topics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    UserCreated,
    UserUpdated,
    UserDeleted,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::UserCreated, Topic::UserUpdated, Topic::UserDeleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::UserCreated => "user.created",
            Topic::UserUpdated => "user.updated",
            Topic::UserDeleted => "user.deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **keyed** (the key identifies the entity the event is about)
/// - published on exactly one topic
///
/// The envelope stamps publication time; payloads stay free of log metadata.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Topic the event is published on.
    fn topic(&self) -> Topic;

    /// Entity key (e.g. the user id).
    fn key(&self) -> String;
}
