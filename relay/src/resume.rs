//! Resume Buffer.
//!
//! A fixed-capacity push/evict-from-front/read-since ring, the same shape
//! as any other output-replay buffer, adapted here to `{seq, response}`
//! frames instead of raw output chunks.

use std::collections::VecDeque;

use crate::protocol::Response;

/// A buffered outbound frame, annotated with its relay-assigned sequence
/// number.
#[derive(Debug, Clone)]
pub struct SeqFrame {
    pub seq: u64,
    pub response: Response,
}

/// Result of a resume replay request.
#[derive(Debug)]
pub struct Replay {
    pub frames: Vec<SeqFrame>,
    /// Set when `last_ack` was below the oldest buffered seq (overflow).
    pub gap: bool,
    /// The `resume_from` value to report in `auth_ok`.
    pub resume_from: u64,
}

/// Fixed-capacity ring of the most recent outbound frames for one device
/// session. Owned by the device session; reset only when that session is
/// replaced.
pub struct ResumeBuffer {
    entries: VecDeque<SeqFrame>,
    capacity: usize,
    next_seq: u64,
}

impl ResumeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            next_seq: 1,
        }
    }

    /// Push a response, assigning it the next sequence number and evicting
    /// the oldest entry from the tail if full. Returns the assigned seq.
    pub fn push(&mut self, response: Response) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SeqFrame { seq, response });
        seq
    }

    /// Compute the replay set for a reconnecting controller's `last_ack`.
    ///
    /// `last_ack = 0` means "no prior state — send everything buffered"
    /// (new pairing). A `last_ack` greater than any emitted seq is treated
    /// as fresh.
    pub fn replay(&self, last_ack: u64) -> Replay {
        let highest_emitted = self.next_seq.saturating_sub(1);
        let last_ack = if last_ack > highest_emitted { 0 } else { last_ack };

        let oldest = self.entries.front().map(|f| f.seq);
        let gap = oldest.is_some_and(|o| last_ack != 0 && last_ack < o.saturating_sub(1));

        let frames: Vec<SeqFrame> = self
            .entries
            .iter()
            .filter(|f| f.seq > last_ack)
            .cloned()
            .collect();

        let resume_from = if gap {
            oldest.map(|o| o.saturating_sub(1)).unwrap_or(0)
        } else {
            last_ack
        };

        Replay {
            frames,
            gap,
            resume_from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(id: u64) -> Response {
        Response {
            id,
            status: "ok".into(),
            result: None,
            error: None,
            seq: None,
        }
    }

    #[test]
    fn seq_starts_at_one_and_increments() {
        let mut buf = ResumeBuffer::new(256);
        assert_eq!(buf.push(resp(1)), 1);
        assert_eq!(buf.push(resp(2)), 2);
        assert_eq!(buf.push(resp(3)), 3);
    }

    #[test]
    fn fresh_pairing_replays_everything() {
        let mut buf = ResumeBuffer::new(256);
        buf.push(resp(1));
        buf.push(resp(2));
        let replay = buf.replay(0);
        assert_eq!(replay.frames.len(), 2);
        assert!(!replay.gap);
    }

    #[test]
    fn reconnect_replays_only_unacked_tail() {
        let mut buf = ResumeBuffer::new(256);
        buf.push(resp(1));
        buf.push(resp(2));
        buf.push(resp(3));
        let replay = buf.replay(1);
        assert_eq!(replay.frames.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![2, 3]);
        assert!(!replay.gap);
    }

    #[test]
    fn last_ack_past_highest_emitted_is_treated_as_fresh() {
        let mut buf = ResumeBuffer::new(256);
        buf.push(resp(1));
        let replay = buf.replay(999);
        assert_eq!(replay.frames.len(), 1);
        assert!(!replay.gap);
    }

    #[test]
    fn eviction_beyond_capacity_signals_gap() {
        let mut buf = ResumeBuffer::new(2);
        buf.push(resp(1));
        buf.push(resp(2));
        buf.push(resp(3)); // evicts seq 1 -> entries [2, 3]
        buf.push(resp(4)); // evicts seq 2 -> entries [3, 4]
        // controller last saw seq 1; seq 2 was evicted before it could replay.
        let replay = buf.replay(1);
        assert!(replay.gap);
        assert_eq!(replay.resume_from, 2); // oldest(3) - 1
        assert_eq!(replay.frames.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn empty_buffer_replay_is_a_noop() {
        let buf = ResumeBuffer::new(256);
        let replay = buf.replay(0);
        assert!(replay.frames.is_empty());
        assert!(!replay.gap);
    }
}
