//! Minimal bot scaffolding.
//!
//! A [`Bot`] wraps a connected session and turns the event stream into
//! reply decisions: direct messages and mentions trigger the responder,
//! everything else passes through. The CLI's `bot` subcommand runs an
//! echo-style responder; library users supply their own.

use confab_client::{Session, SessionEvent};
use tracing::{info, warn};

/// What a responder wants done with a triggering message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this text back to the room the trigger arrived in.
    Text(String),
    /// Stay quiet.
    Ignore,
}

/// Why the responder was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The message arrived in the bot's pair room with the author.
    Direct,
    /// The message mentions the bot's handle.
    Mention,
}

/// Decide whether an event triggers the bot.
///
/// Direct messages win over mentions when both apply; messages authored by
/// the bot itself never trigger.
#[must_use]
pub fn trigger_for(event: &SessionEvent) -> Option<Trigger> {
    match event {
        SessionEvent::MessageDirect { .. } => Some(Trigger::Direct),
        SessionEvent::MessageMention { .. } => Some(Trigger::Mention),
        _ => None,
    }
}

/// Event-loop wrapper around a connected session.
pub struct Bot<F> {
    session: Session,
    responder: F,
}

impl<F> Bot<F>
where
    F: FnMut(Trigger, &str) -> Reply,
{
    /// Wrap a connected session with a responder.
    pub fn new(session: Session, responder: F) -> Self {
        Self { session, responder }
    }

    /// Run until the event stream ends (session closed).
    pub async fn run(mut self) {
        let mut events = self.session.events();
        let mut handled: Option<u64> = None;

        while let Ok(event) = events.recv().await {
            let Some(trigger) = trigger_for(&event) else { continue };
            let (SessionEvent::MessageDirect { room, message }
            | SessionEvent::MessageMention { room, message }) = &event
            else {
                continue;
            };

            // A direct mention arrives as both direct and mention; answer once.
            if handled == Some(message.id()) {
                continue;
            }
            handled = Some(message.id());

            match (self.responder)(trigger, &message.content()) {
                Reply::Ignore => {}
                Reply::Text(text) => {
                    info!(room = ?room.id(), "bot replying");
                    if let Err(e) = self.session.send_message(room, &text).await {
                        warn!(error = %e, "bot reply failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_direct_and_mention_trigger() {
        assert_eq!(trigger_for(&SessionEvent::Connected), None);
        assert_eq!(trigger_for(&SessionEvent::Pong), None);
        assert_eq!(trigger_for(&SessionEvent::Disconnect), None);
    }

    #[test]
    fn replies_carry_their_text() {
        let mut responder = |trigger: Trigger, content: &str| match trigger {
            Trigger::Direct => Reply::Text(format!("you said: {content}")),
            Trigger::Mention => Reply::Ignore,
        };
        assert_eq!(
            responder(Trigger::Direct, "hi"),
            Reply::Text("you said: hi".to_string())
        );
        assert_eq!(responder(Trigger::Mention, "hi"), Reply::Ignore);
    }
}
