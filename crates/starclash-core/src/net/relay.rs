//! In-process reliable broadcast with a late-joiner cache.
//!
//! `LocalRelay` stands in for the real transport: it routes already-encoded
//! frames between members of one match, stamps each frame with its sender
//! and whether that sender was the authority at send time, and keeps a room
//! cache that is replayed to every member that joins later.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

use super::messages::EventKind;
use super::protocol::{ProtocolError, decode_event_kind};

/// Who receives a sent event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Receivers {
    /// Every member, the sender included.
    #[default]
    All,
    /// Every member except the sender.
    Others,
    /// Only the current authority.
    Authority,
}

/// What the relay does with its late-joiner cache for a sent event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOp {
    #[default]
    None,
    /// Keep the event and replay it to members that join later.
    Add,
    /// Drop cached events of the same kind instead of delivering. From the
    /// authority this clears that kind for every sender, otherwise only the
    /// sender's own entries.
    Remove,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    pub receivers: Receivers,
    pub cache: CacheOp,
}

impl SendOptions {
    pub const fn to(receivers: Receivers) -> Self {
        Self {
            receivers,
            cache: CacheOp::None,
        }
    }

    pub const fn cached(receivers: Receivers) -> Self {
        Self {
            receivers,
            cache: CacheOp::Add,
        }
    }

    pub const fn remove_cached() -> Self {
        Self {
            receivers: Receivers::Authority,
            cache: CacheOp::Remove,
        }
    }
}

/// Reliable broadcast primitive the match simulation writes into.
pub trait Broadcast<E> {
    fn send(&mut self, event: E, options: SendOptions);

    /// Drop cached events of `kind`: a send with [`CacheOp::Remove`] and no
    /// payload.
    fn uncache(&mut self, kind: EventKind);
}

/// One entry of an [`Outbox`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing<E> {
    Event(E, SendOptions),
    Uncache(EventKind),
}

/// Buffer of outgoing events collected during one step.
#[derive(Debug, Clone)]
pub struct Outbox<E> {
    pending: Vec<Outgoing<E>>,
}

impl<E> Default for Outbox<E> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<E> Outbox<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<Outgoing<E>> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Outgoing<E>] {
        &self.pending
    }

    /// Events queued so far, ignoring cache removals.
    pub fn events(&self) -> impl Iterator<Item = (&E, &SendOptions)> {
        self.pending.iter().filter_map(|o| match o {
            Outgoing::Event(e, opts) => Some((e, opts)),
            Outgoing::Uncache(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E> Broadcast<E> for Outbox<E> {
    fn send(&mut self, event: E, options: SendOptions) {
        self.pending.push(Outgoing::Event(event, options));
    }

    fn uncache(&mut self, kind: EventKind) {
        self.pending.push(Outgoing::Uncache(kind));
    }
}

/// A delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: PlayerId,
    pub from_authority: bool,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct CachedFrame {
    kind: EventKind,
    frame: Frame,
}

#[derive(Debug)]
pub enum RelayError {
    NotAMember(PlayerId),
    AlreadyJoined(PlayerId),
    Protocol(ProtocolError),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAMember(id) => write!(f, "player {id} is not a member of this match"),
            Self::AlreadyJoined(id) => write!(f, "player {id} already joined"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<ProtocolError> for RelayError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// One match worth of members, their inboxes and the room cache.
#[derive(Debug, Default)]
pub struct LocalRelay {
    inboxes: BTreeMap<PlayerId, VecDeque<Frame>>,
    authority: Option<PlayerId>,
    cache: Vec<CachedFrame>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. The first member becomes the authority. Cached frames
    /// are queued to the new member in the order they were cached.
    ///
    /// Returns the number of replayed frames.
    pub fn join(&mut self, id: PlayerId) -> Result<usize, RelayError> {
        if self.inboxes.contains_key(&id) {
            return Err(RelayError::AlreadyJoined(id));
        }
        let replay: VecDeque<Frame> = self.cache.iter().map(|c| c.frame.clone()).collect();
        let replayed = replay.len();
        self.inboxes.insert(id, replay);
        if self.authority.is_none() {
            self.authority = Some(id);
        }
        tracing::debug!(player_id = id, replayed, "Member joined relay");
        Ok(replayed)
    }

    /// Remove a member. If it was the authority, the member with the lowest
    /// id takes over. Cached frames outlive their sender.
    pub fn leave(&mut self, id: PlayerId) -> bool {
        if self.inboxes.remove(&id).is_none() {
            return false;
        }
        if self.authority == Some(id) {
            self.authority = self.inboxes.keys().next().copied();
            tracing::info!(old = id, new = ?self.authority, "Authority handed over");
        }
        true
    }

    pub fn set_authority(&mut self, id: PlayerId) -> Result<(), RelayError> {
        if !self.inboxes.contains_key(&id) {
            return Err(RelayError::NotAMember(id));
        }
        self.authority = Some(id);
        Ok(())
    }

    pub fn authority(&self) -> Option<PlayerId> {
        self.authority
    }

    pub fn is_authority(&self, id: PlayerId) -> bool {
        self.authority == Some(id)
    }

    pub fn members(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.inboxes.keys().copied()
    }

    pub fn member_count(&self) -> usize {
        self.inboxes.len()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn cached_kinds(&self) -> Vec<EventKind> {
        self.cache.iter().map(|c| c.kind).collect()
    }

    /// Route one encoded event from `sender`. For a cache removal only the
    /// kind byte is read.
    pub fn route(
        &mut self,
        sender: PlayerId,
        bytes: Vec<u8>,
        options: SendOptions,
    ) -> Result<(), RelayError> {
        if !self.inboxes.contains_key(&sender) {
            return Err(RelayError::NotAMember(sender));
        }
        let kind = decode_event_kind(&bytes)?;
        let from_authority = self.is_authority(sender);

        if options.cache == CacheOp::Remove {
            let before = self.cache.len();
            self.cache
                .retain(|c| c.kind != kind || !(from_authority || c.frame.sender == sender));
            tracing::debug!(
                ?kind,
                sender,
                removed = before - self.cache.len(),
                "Removed cached events"
            );
            return Ok(());
        }

        let frame = Frame {
            sender,
            from_authority,
            bytes,
        };
        if options.cache == CacheOp::Add {
            self.cache.push(CachedFrame {
                kind,
                frame: frame.clone(),
            });
        }

        let authority = self.authority;
        for (&id, inbox) in self.inboxes.iter_mut() {
            let deliver = match options.receivers {
                Receivers::All => true,
                Receivers::Others => id != sender,
                Receivers::Authority => authority == Some(id),
            };
            if deliver {
                inbox.push_back(frame.clone());
            }
        }
        Ok(())
    }

    /// Take every frame queued for `id`, oldest first.
    pub fn drain(&mut self, id: PlayerId) -> Vec<Frame> {
        self.inboxes
            .get_mut(&id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}
