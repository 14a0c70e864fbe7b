//! Response coordinator: turns user input into an outbound request and streams the
//! reply into the conversation.
//!
//! One exchange at a time: a loading flag, checked and set under the state lock, rejects
//! sends until the current stream settles. Images are staged for confirmation before
//! anything is sent. Stream failures never escape; the bot placeholder gets the fallback text.

use crate::config::{Config, DEFAULT_FALLBACK_MESSAGE};
use crate::conversation::{Conversation, Message, MessageId};
use crate::llm::{ChatBackend, GeminiClient};
use crate::media::{Media, MediaRef, Part};
use parking_lot::Mutex;

/// What the user submitted: any combination of text, image, and voice recording.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub text: Option<String>,
    pub image: Option<Media>,
    pub audio: Option<Media>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn image(image: Media) -> Self {
        Self {
            image: Some(image),
            ..Default::default()
        }
    }

    pub fn audio(audio: Media) -> Self {
        Self {
            audio: Some(audio),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_image(mut self, image: Media) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_audio(mut self, audio: Media) -> Self {
        self.audio = Some(audio);
        self
    }
}

/// Image waiting for the user to confirm (and optionally caption) before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub image: Media,
    pub caption: String,
}

/// Result of a send or confirm call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send (empty input, or no pending image to confirm).
    Ignored,
    /// An exchange is still streaming; nothing was appended.
    Busy,
    /// Image staged; call `confirm_image` or `discard_image`.
    AwaitingConfirmation,
    Completed { message_id: MessageId, reply: String },
    /// The stream failed; the reply slot holds the fallback message.
    Failed { message_id: MessageId, error: String },
}

/// Conversation plus the UI flags that gate sending.
#[derive(Debug, Default)]
struct ChatState {
    conversation: Conversation,
    loading: bool,
    pending_image: Option<PendingImage>,
}

impl ChatState {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            loading: false,
            pending_image: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.loading || self.conversation.in_flight().is_some()
    }

    /// Append the user message and a bot placeholder, and raise the loading flag.
    /// None when an exchange is already running.
    fn begin_exchange(
        &mut self,
        text: Option<String>,
        image: Option<MediaRef>,
        audio: Option<MediaRef>,
    ) -> Option<MessageId> {
        if self.is_busy() {
            return None;
        }
        self.loading = true;
        self.conversation.push_user(text, image, audio);
        self.conversation.start_bot_reply()
    }

    fn settle(&mut self, reply_id: MessageId) {
        self.conversation.finish_bot_reply(reply_id);
        self.loading = false;
    }
}

/// Clears the loading flag and seals the reply however the exchange ends,
/// including when the future is dropped mid-stream.
struct Settle<'a> {
    state: &'a Mutex<ChatState>,
    reply_id: MessageId,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        self.state.lock().settle(self.reply_id);
    }
}

pub struct Coordinator<B> {
    backend: B,
    state: Mutex<ChatState>,
    fallback_message: String,
}

impl Coordinator<GeminiClient> {
    /// Gemini-backed coordinator with the configured persona, greeting, and fallback.
    pub fn from_config(config: &Config, api_key: impl Into<String>) -> Self {
        Coordinator::new(
            GeminiClient::from_config(config, api_key),
            Conversation::with_greeting(&config.persona.greeting),
        )
        .with_fallback_message(config.persona.fallback_message.clone())
    }
}

impl<B: ChatBackend> Coordinator<B> {
    pub fn new(backend: B, conversation: Conversation) -> Self {
        Self {
            backend,
            state: Mutex::new(ChatState::new(conversation)),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Copy of the conversation as it stands now.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().conversation.messages().to_vec()
    }

    pub fn pending_image(&self) -> Option<PendingImage> {
        self.state.lock().pending_image.clone()
    }

    /// Submit user input. Empty input is ignored; input with an image is staged for
    /// confirmation; anything else is appended and streamed.
    /// `on_fragment` sees each reply fragment as it is applied to the conversation.
    pub async fn send(
        &self,
        message: OutboundMessage,
        on_fragment: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> SendOutcome {
        let text = message.text.filter(|t| !t.trim().is_empty());
        if text.is_none() && message.image.is_none() && message.audio.is_none() {
            log::debug!("coordinator: ignoring empty message");
            return SendOutcome::Ignored;
        }

        if let Some(image) = message.image {
            let mut state = self.state.lock();
            if state.is_busy() {
                return SendOutcome::Busy;
            }
            if message.audio.is_some() {
                log::warn!("coordinator: audio dropped; image messages carry only a caption");
            }
            state.pending_image = Some(PendingImage {
                image,
                caption: text.unwrap_or_default(),
            });
            log::debug!("coordinator: image staged for confirmation");
            return SendOutcome::AwaitingConfirmation;
        }

        let mut parts = Vec::new();
        if let Some(ref t) = text {
            parts.push(Part::Text(t.clone()));
        }
        if let Some(ref audio) = message.audio {
            parts.push(audio.to_part());
        }
        let audio_ref = message.audio.as_ref().map(Media::to_ref);

        let reply_id = {
            let mut state = self.state.lock();
            match state.begin_exchange(text, None, audio_ref) {
                Some(id) => id,
                None => return SendOutcome::Busy,
            }
        };
        self.stream_reply(reply_id, parts, on_fragment).await
    }

    /// Send the staged image. A `caption` replaces the one given when it was staged.
    pub async fn confirm_image(
        &self,
        caption: Option<String>,
        on_fragment: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> SendOutcome {
        let (reply_id, parts) = {
            let mut state = self.state.lock();
            if state.is_busy() {
                return SendOutcome::Busy;
            }
            let Some(pending) = state.pending_image.take() else {
                return SendOutcome::Ignored;
            };
            let caption = caption.unwrap_or(pending.caption);
            let caption = Some(caption).filter(|c| !c.trim().is_empty());

            let mut parts = vec![pending.image.to_part()];
            if let Some(ref c) = caption {
                parts.push(Part::Text(c.clone()));
            }
            match state.begin_exchange(caption, Some(pending.image.to_ref()), None) {
                Some(id) => (id, parts),
                None => return SendOutcome::Busy,
            }
        };
        self.stream_reply(reply_id, parts, on_fragment).await
    }

    /// Drop the staged image without sending. False if there was none.
    pub fn discard_image(&self) -> bool {
        self.state.lock().pending_image.take().is_some()
    }

    async fn stream_reply(
        &self,
        reply_id: MessageId,
        parts: Vec<Part>,
        mut on_fragment: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> SendOutcome {
        let _settle = Settle {
            state: &self.state,
            reply_id,
        };
        let state = &self.state;
        let mut apply = |fragment: &str| {
            state.lock().conversation.append_fragment(reply_id, fragment);
            if let Some(f) = on_fragment.as_mut() {
                f(fragment);
            }
        };

        match self.backend.send_message_stream(parts, &mut apply).await {
            Ok(reply) => SendOutcome::Completed {
                message_id: reply_id,
                reply,
            },
            Err(e) => {
                log::error!("coordinator: error streaming response: {}", e);
                self.state
                    .lock()
                    .conversation
                    .replace_text(reply_id, self.fallback_message.clone());
                SendOutcome::Failed {
                    message_id: reply_id,
                    error: e.to_string(),
                }
            }
        }
    }
}
