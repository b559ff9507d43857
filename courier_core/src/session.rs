use crate::net::channel::ChannelId;
use hashbrown::HashMap;
use std::net::SocketAddr;

pub type SessionId = usize;

/// Longest accepted client identifier, in visible characters.
pub const MAX_IDENTIFIER_LEN: usize = 9;

/// The durable record of a subscriber identity. Sessions are created on
/// first login and never removed; the stream handle comes and goes with
/// connections while the identifier and subscription memberships persist.
#[derive(Debug)]
pub struct Session {
    pub name: String,
    pub channel: Option<ChannelId>,
    pub active: bool,
    pub peer: Option<SocketAddr>,
}

/// Resolution of an incoming login against the registry.
#[derive(Debug, Eq, PartialEq)]
pub enum LoginOutcome {
    /// First login under this identifier.
    Created(SessionId),
    /// Reconnect of a parked session; the stream handle was rebound.
    Rebound(SessionId),
    /// The identifier is bound to a live stream already.
    Duplicate,
}

pub struct SessionRegistry {
    sessions: Vec<Session>,
    by_name: HashMap<String, SessionId>,
    by_channel: HashMap<ChannelId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry {
            sessions: Vec::new(),
            by_name: HashMap::new(),
            by_channel: HashMap::new(),
        }
    }

    /// A client identifier is a short printable token.
    pub fn valid_identifier(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_IDENTIFIER_LEN
            && name.bytes().all(|byte| byte.is_ascii_graphic())
    }

    /// Applies the login rules: an unknown identifier creates a session, a
    /// parked one is rebound to the new stream, an active one is rejected
    /// without touching the existing session.
    pub fn login(&mut self, name: &str, channel: ChannelId, peer: Option<SocketAddr>) -> LoginOutcome {
        match self.by_name.get(name) {
            Some(&session_id) => {
                if self.sessions[session_id].active {
                    return LoginOutcome::Duplicate;
                }

                let session = &mut self.sessions[session_id];
                session.active = true;
                session.channel = Some(channel);
                session.peer = peer;
                self.by_channel.insert(channel, session_id);

                LoginOutcome::Rebound(session_id)
            }
            None => {
                let session_id = self.sessions.len();

                self.sessions.push(Session {
                    name: name.to_owned(),
                    channel: Some(channel),
                    active: true,
                    peer,
                });
                self.by_name.insert(name.to_owned(), session_id);
                self.by_channel.insert(channel, session_id);

                LoginOutcome::Created(session_id)
            }
        }
    }

    /// Releases the stream handle and parks the session. The identifier and
    /// any subscription memberships survive for a later reconnect.
    pub fn disconnect(&mut self, session_id: SessionId) {
        let session = &mut self.sessions[session_id];
        session.active = false;

        if let Some(channel) = session.channel.take() {
            self.by_channel.remove(&channel);
        }
    }

    #[inline]
    pub fn session(&self, session_id: SessionId) -> &Session {
        &self.sessions[session_id]
    }

    #[inline]
    pub fn session_by_channel(&self, channel: ChannelId) -> Option<SessionId> {
        self.by_channel.get(&channel).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.7:40001".parse().unwrap())
    }

    #[test]
    fn test_valid_identifier() {
        assert!(SessionRegistry::valid_identifier("a1"));
        assert!(SessionRegistry::valid_identifier("client_9"));
        assert!(!SessionRegistry::valid_identifier(""));
        assert!(!SessionRegistry::valid_identifier("toolongtoken"));
        assert!(!SessionRegistry::valid_identifier("has space"));
    }

    #[test]
    fn test_first_login_creates_active_session() {
        let mut registry = SessionRegistry::new();

        let outcome = registry.login("a1", 0, peer());

        assert_eq!(outcome, LoginOutcome::Created(0));
        assert!(registry.session(0).active);
        assert_eq!(registry.session(0).channel, Some(0));
        assert_eq!(registry.session_by_channel(0), Some(0));
    }

    #[test]
    fn test_duplicate_login_is_rejected() {
        let mut registry = SessionRegistry::new();

        registry.login("a1", 0, peer());
        let outcome = registry.login("a1", 1, peer());

        assert_eq!(outcome, LoginOutcome::Duplicate);
        // The live session must be untouched by the rejected attempt.
        assert_eq!(registry.session(0).channel, Some(0));
        assert_eq!(registry.session_by_channel(1), None);
    }

    #[test]
    fn test_reconnect_rebinds_parked_session() {
        let mut registry = SessionRegistry::new();

        registry.login("a1", 0, peer());
        registry.disconnect(0);

        assert!(!registry.session(0).active);
        assert_eq!(registry.session(0).channel, None);
        assert_eq!(registry.session_by_channel(0), None);

        let outcome = registry.login("a1", 4, peer());

        assert_eq!(outcome, LoginOutcome::Rebound(0));
        assert!(registry.session(0).active);
        assert_eq!(registry.session(0).channel, Some(4));
        assert_eq!(registry.session_by_channel(4), Some(0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disconnect_preserves_identifier() {
        let mut registry = SessionRegistry::new();

        registry.login("a1", 0, peer());
        registry.login("b2", 1, peer());
        registry.disconnect(0);

        assert_eq!(registry.session(0).name, "a1");
        assert_eq!(registry.len(), 2);
        // The other session is unaffected.
        assert!(registry.session(1).active);
    }

    #[test]
    fn test_at_most_one_active_stream_per_identifier() {
        let mut registry = SessionRegistry::new();

        registry.login("a1", 0, peer());
        registry.disconnect(0);
        registry.login("a1", 1, peer());
        let outcome = registry.login("a1", 2, peer());

        assert_eq!(outcome, LoginOutcome::Duplicate);
        assert_eq!(registry.session(0).channel, Some(1));
    }
}
