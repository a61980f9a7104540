use crate::check_invariant;
use crate::invariant::{ICE_DRAINED_ONCE, ICE_FIFO};
use crate::webrtc::primitive::IceCandidate;
use std::collections::VecDeque;

/// What to do with a candidate handed to [`IceBuffer::offer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admit {
    /// Remote description is in place; apply now.
    ApplyNow(IceCandidate),
    /// Held until the first remote description lands.
    Queued { depth: usize },
}

/// Candidates that arrived before a remote description existed.
///
/// Appends are always accepted. The buffer is drained once, in arrival order,
/// right after the first remote description is applied; afterwards every
/// candidate passes straight through.
#[derive(Debug, Default)]
pub struct IceBuffer {
    pending: VecDeque<(u64, IceCandidate)>,
    next_seq: u64,
    drained: bool,
}

impl IceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, candidate: IceCandidate) -> Admit {
        if self.drained {
            return Admit::ApplyNow(candidate);
        }
        self.pending.push_back((self.next_seq, candidate));
        self.next_seq += 1;
        Admit::Queued {
            depth: self.pending.len(),
        }
    }

    /// Takes every buffered candidate, oldest first, and marks the buffer drained.
    /// Returns an empty list if it was drained before.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        check_invariant!(!self.drained || self.pending.is_empty(), ICE_DRAINED_ONCE, "IceBuffer::drain");
        if self.drained {
            return Vec::new();
        }
        self.drained = true;

        let items: Vec<(u64, IceCandidate)> = self.pending.drain(..).collect();
        check_invariant!(
            items.windows(2).all(|w| w[0].0 < w[1].0),
            ICE_FIFO,
            "IceBuffer::drain"
        );
        items.into_iter().map(|(_, c)| c).collect()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops buffered candidates without applying them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
