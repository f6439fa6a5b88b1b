//! The native cross-terminal broadcast hub.
//!
//! Tracks every terminal joined to a named channel and fans messages out to
//! all members except the sender, the way the host platform's broadcast
//! channel behaves. Availability can be switched off to model hosts where
//! the native channel API is missing, which is what pushes terminals onto
//! the storage relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::{Envelope, SyncMessage};

/// Sender half of one member's delivery queue.
pub type EnvelopeSender = mpsc::UnboundedSender<Envelope>;
/// Receiver half of one member's delivery queue.
pub type EnvelopeReceiver = mpsc::UnboundedReceiver<Envelope>;

/// One joined terminal.
#[derive(Debug)]
struct Member {
    /// Unique identifier for this membership
    id: String,
    /// Channel name the member joined under
    channel: String,
    /// Queue for delivering envelopes to this member
    sender: EnvelopeSender,
}

struct SwitchboardInner {
    scope: String,
    members: DashMap<String, Member>,
    available: AtomicBool,
}

/// The storefront's native fan-out hub.
///
/// Cheap to clone; all clones share the same membership.
#[derive(Clone)]
pub struct Switchboard {
    inner: Arc<SwitchboardInner>,
}

impl Switchboard {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SwitchboardInner {
                scope: scope.into(),
                members: DashMap::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Origin scope stamped on every envelope sent through this hub.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Model the native channel API being present or absent. When absent,
    /// [`join`](Self::join) fails and callers fall back to the relay.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Join `channel`, returning the member handle and its delivery queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelUnavailable`] when the native API is absent.
    pub fn join(&self, channel: &str) -> Result<(NativeChannel, EnvelopeReceiver)> {
        if !self.is_available() {
            return Err(Error::ChannelUnavailable(
                "broadcast API missing in this host".into(),
            ));
        }

        let member_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner.members.insert(
            member_id.clone(),
            Member {
                id: member_id.clone(),
                channel: channel.to_owned(),
                sender,
            },
        );
        tracing::info!(member = %member_id, channel, "terminal joined native channel");

        Ok((
            NativeChannel {
                board: self.clone(),
                member_id,
                channel: channel.to_owned(),
            },
            receiver,
        ))
    }

    /// Remove a member. Its delivery queue closes once drained.
    fn leave(&self, member_id: &str) {
        if let Some((_, member)) = self.inner.members.remove(member_id) {
            tracing::info!(member = %member_id, channel = %member.channel, "terminal left native channel");
        }
    }

    /// Deliver `envelope` to every member of `channel` except the sender.
    ///
    /// Returns the number of members that received it. At-most-once: a
    /// member whose queue is gone is skipped, never retried.
    fn broadcast_except(&self, sender_member: &str, channel: &str, envelope: Envelope) -> usize {
        let mut delivered = 0;

        for entry in self.inner.members.iter() {
            let member = entry.value();
            if member.channel == channel
                && member.id != sender_member
                && member.sender.send(envelope.clone()).is_ok()
            {
                delivered += 1;
            }
        }

        tracing::debug!(
            sender = %sender_member,
            channel,
            recipients = delivered,
            "broadcast envelope to channel members"
        );

        delivered
    }

    /// Number of members currently joined to `channel`.
    pub fn member_count(&self, channel: &str) -> usize {
        self.inner
            .members
            .iter()
            .filter(|entry| entry.value().channel == channel)
            .count()
    }
}

impl std::fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switchboard")
            .field("scope", &self.inner.scope)
            .field("members", &self.inner.members.len())
            .field("available", &self.is_available())
            .finish()
    }
}

/// One terminal's membership of a named native channel.
#[derive(Debug)]
pub struct NativeChannel {
    board: Switchboard,
    member_id: String,
    channel: String,
}

impl NativeChannel {
    /// Broadcast to every other member of the channel. Returns how many
    /// members received the message.
    pub fn send(&self, message: &SyncMessage) -> usize {
        let envelope = Envelope::new(self.board.scope(), message.clone());
        self.board
            .broadcast_except(&self.member_id, &self.channel, envelope)
    }

    /// Leave the channel. The receiver returned by
    /// [`Switchboard::join`] ends once it has drained.
    pub fn close(&self) {
        self.board.leave(&self.member_id);
    }
}
