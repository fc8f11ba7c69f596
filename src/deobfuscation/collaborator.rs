//! Optional last-resort cleanup by an external chat collaborator.
//!
//! A [`Collaborator`] is anything that answers a short chat exchange, usually a
//! hosted language model. The engine only consults one when a signature fired
//! and the caller asked for it, and treats every answer as untrusted: the reply
//! replaces the static output only if it contains a fenced code block that
//! parses and the whole program was sent. Anything else is kept as notes.
//!
//! The call runs on a helper thread and is abandoned once the configured
//! timeout elapses. An abandoned thread is detached and its eventual answer is
//! dropped.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{deobfuscation::detection::DetectionSignature, source::SyntaxTree, Error, Result};

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions framing the exchange.
    System,
    /// The request.
    User,
    /// A reply.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A collaborator's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Reply text, possibly containing a fenced code block.
    pub content: String,
}

/// An external cleanup collaborator.
///
/// Implementations perform their own transport and authentication. They are
/// called from a helper thread and must not assume anything about it.
pub trait Collaborator: Send + Sync {
    /// Answers a chat exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] (or any other error) if no answer could be
    /// produced. The engine turns it into a warning.
    fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

const SYSTEM_PROMPT: &str = "You clean up partially deobfuscated JavaScript. \
Keep the behaviour identical, rename nothing that is reachable from outside, \
and answer with the complete cleaned program in a single ```javascript fenced block.";

/// What the collaborator contributed.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CleanupReply {
    /// Replacement program, already reprinted.
    pub code: Option<String>,
    /// Reply kept for the caller when it could not replace the code.
    pub notes: Option<String>,
    /// Why a complete reply was not used.
    pub warning: Option<String>,
}

/// Builds the two messages sent for `code`.
///
/// Returns the messages and whether the whole program fit into the excerpt.
pub(crate) fn build_messages(
    code: &str,
    signatures: &[DetectionSignature],
    excerpt_chars: usize,
) -> (Vec<ChatMessage>, bool) {
    let complete = code.chars().count() <= excerpt_chars;
    let excerpt: String = code.chars().take(excerpt_chars).collect();

    let mut techniques: Vec<String> = signatures.iter().map(|s| s.technique.to_string()).collect();
    techniques.dedup();

    let mut request = format!("Detected techniques: {}\n", techniques.join(", "));
    if !complete {
        request.push_str("The program is truncated; describe what it does instead of rewriting it.\n");
    }
    request.push_str("\n```javascript\n");
    request.push_str(&excerpt);
    request.push_str("\n```\n");

    (vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)], complete)
}

/// Calls `collaborator` on a helper thread, waiting at most `timeout`.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if no answer arrived in time, [`Error::Collaborator`]
/// if the helper thread died, or whatever the collaborator returned.
pub(crate) fn chat_with_timeout(
    collaborator: Arc<dyn Collaborator>,
    messages: Vec<ChatMessage>,
    timeout: Duration,
) -> Result<ChatResponse> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("jsscope-collaborator".to_string())
        .spawn(move || {
            let _ = sender.send(collaborator.chat(&messages));
        })?;

    match receiver.recv_timeout(timeout) {
        Ok(answer) => answer,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout.as_millis())),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Collaborator(
            "collaborator thread ended without an answer".to_string(),
        )),
    }
}

/// Decides what to do with a reply.
pub(crate) fn interpret_reply(reply: ChatResponse, complete: bool) -> CleanupReply {
    if !complete {
        return CleanupReply {
            notes: Some(reply.content),
            ..CleanupReply::default()
        };
    }

    let Some(block) = fenced_block(&reply.content) else {
        return CleanupReply {
            notes: Some(reply.content),
            warning: Some("collaborator reply contained no code block".to_string()),
            ..CleanupReply::default()
        };
    };

    match SyntaxTree::parse(block).and_then(|tree| tree.print()) {
        Ok(code) => CleanupReply {
            code: Some(code),
            ..CleanupReply::default()
        },
        Err(e) => CleanupReply {
            notes: Some(reply.content),
            warning: Some(format!("collaborator code block did not parse: {e}")),
            ..CleanupReply::default()
        },
    }
}

/// Returns the body of the first fenced code block in `text`.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim_end())
}
