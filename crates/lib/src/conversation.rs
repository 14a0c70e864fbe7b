//! Conversation store: the ordered message list shown to the user.
//!
//! Append-only, except that the one in-flight bot reply may have its text grown
//! (or replaced on failure) until it is finished.

use crate::media::MediaRef;

/// Message identifier, issued in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// A single message (sender, optional text/image/audio, display timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: Option<String>,
    pub image: Option<MediaRef>,
    pub audio: Option<MediaRef>,
    /// Local time of creation, `HH:MM`.
    pub timestamp: String,
}

impl Message {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

fn display_time() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
    in_flight: Option<MessageId>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation opened by a bot greeting. A blank greeting yields an empty conversation.
    pub fn with_greeting(greeting: &str) -> Self {
        let mut conversation = Self::new();
        if !greeting.trim().is_empty() {
            conversation.push(Sender::Bot, Some(greeting.to_string()), None, None);
        }
        conversation
    }

    fn push(
        &mut self,
        sender: Sender,
        text: Option<String>,
        image: Option<MediaRef>,
        audio: Option<MediaRef>,
    ) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.messages.push(Message {
            id,
            sender,
            text,
            image,
            audio,
            timestamp: display_time(),
        });
        id
    }

    /// Append a user message; returns its id.
    pub fn push_user(
        &mut self,
        text: Option<String>,
        image: Option<MediaRef>,
        audio: Option<MediaRef>,
    ) -> MessageId {
        self.push(Sender::User, text, image, audio)
    }

    /// Append an empty bot placeholder and mark it in flight.
    /// Returns None (and appends nothing) if another reply is still in flight.
    pub fn start_bot_reply(&mut self) -> Option<MessageId> {
        if self.in_flight.is_some() {
            return None;
        }
        let id = self.push(Sender::Bot, Some(String::new()), None, None);
        self.in_flight = Some(id);
        Some(id)
    }

    /// Concatenate a fragment onto the in-flight reply. False if `id` is not in flight.
    pub fn append_fragment(&mut self, id: MessageId, fragment: &str) -> bool {
        match self.in_flight_mut(id) {
            Some(msg) => {
                msg.text.get_or_insert_with(String::new).push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Replace the in-flight reply's text (used for the failure message).
    pub fn replace_text(&mut self, id: MessageId, text: impl Into<String>) -> bool {
        match self.in_flight_mut(id) {
            Some(msg) => {
                msg.text = Some(text.into());
                true
            }
            None => false,
        }
    }

    /// Seal the in-flight reply; its text is immutable afterwards.
    pub fn finish_bot_reply(&mut self, id: MessageId) {
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
    }

    fn in_flight_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        if self.in_flight != Some(id) {
            return None;
        }
        // The in-flight reply is always the newest bot message.
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn in_flight(&self) -> Option<MessageId> {
        self.in_flight
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
