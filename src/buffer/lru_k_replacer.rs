use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, HiveError, Result, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// History of access timestamps (most recent at back), at most k long
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    /// Records an access at the given timestamp
    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        // Keep only the last k accesses
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Returns the backward k-distance, or None (+inf) with fewer than k accesses
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    fn last_access(&self) -> Timestamp {
        self.history.back().copied().unwrap_or(0)
    }
}

struct ReplacerState {
    /// Logical clock, bumped on every recorded access
    current_timestamp: Timestamp,
    /// Access information for each tracked frame
    frames: HashMap<FrameId, FrameAccessInfo>,
    /// Number of tracked frames that are evictable
    num_evictable: usize,
}

/// LRU-K Replacement Policy
///
/// Frames with fewer than k recorded accesses have an infinite backward
/// k-distance and are always evicted first; among those, the frame whose most
/// recent access is oldest goes. When every evictable frame has a full history
/// the one whose k-th most recent access lies furthest in the past is chosen.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame count.
    ///
    /// A k of zero has no k-th most recent access to measure from and is
    /// treated as 1, which degrades to plain LRU.
    pub fn new(k: usize, max_frames: usize) -> Self {
        if k == 0 {
            tracing::warn!("lru-k replacer created with k = 0, using k = 1");
        }
        Self {
            k: k.max(1),
            max_frames,
            state: Mutex::new(ReplacerState {
                current_timestamp: 0,
                frames: HashMap::new(),
                num_evictable: 0,
            }),
        }
    }

    /// Evicts a frame according to the LRU-K policy and forgets its history.
    /// Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        if state.num_evictable == 0 {
            return None;
        }

        let current_ts = state.current_timestamp;
        let candidates = state.frames.iter().filter(|(_, info)| info.is_evictable);

        // (frame, k-distance, last access); None k-distance beats any finite one
        let mut victim: Option<(FrameId, Option<Timestamp>, Timestamp)> = None;
        for (&frame_id, info) in candidates {
            let k_dist = info.k_distance(current_ts, self.k);
            let last = info.last_access();

            let replace = match victim {
                None => true,
                Some((_, v_dist, v_last)) => match (v_dist, k_dist) {
                    (None, Some(_)) => false,
                    (Some(_), None) => true,
                    (None, None) => last < v_last,
                    (Some(v), Some(c)) => c > v,
                },
            };

            if replace {
                victim = Some((frame_id, k_dist, last));
            }
        }

        let (frame_id, _, _) = victim?;
        state.frames.remove(&frame_id);
        state.num_evictable -= 1;

        tracing::trace!(frame_id = frame_id.as_u32(), "lru-k victim");
        Some(frame_id)
    }

    /// Records that the given frame was accessed at the current timestamp.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.max_frames {
            return Err(HiveError::OutOfRange(frame_id));
        }

        let mut state = self.state.lock();
        let timestamp = state.current_timestamp;
        state.current_timestamp += 1;

        state
            .frames
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
        Ok(())
    }

    /// Sets whether a frame is evictable. Untracked frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let mut state = self.state.lock();

        let Some(info) = state.frames.get_mut(&frame_id) else {
            return;
        };
        if info.is_evictable == is_evictable {
            return;
        }
        info.is_evictable = is_evictable;

        if is_evictable {
            state.num_evictable += 1;
        } else {
            state.num_evictable -= 1;
        }
    }

    /// Removes a frame from the replacer entirely.
    /// Frames that are not evictable keep their history.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();

        let evictable = state
            .frames
            .get(&frame_id)
            .is_some_and(|info| info.is_evictable);
        if evictable {
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
