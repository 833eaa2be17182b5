use crate::error::TrackError;
use crate::image::GrayImage;
use crate::instance::Instance;
use std::sync::Arc;

/*-----------------------------------------------------------------------------
MatchedInstance
-----------------------------------------------------------------------------*/

/// Result of one processed frame: the instances with their tracks, and the
/// frame image when motion compensation needs it.
#[derive(Debug, Clone)]
pub struct MatchedInstance {
    frame_idx: usize,
    instances: Vec<Instance>,
    image: Option<Arc<GrayImage>>,
}

impl MatchedInstance {
    pub fn new(
        frame_idx: usize,
        instances: Vec<Instance>,
        image: Option<Arc<GrayImage>>,
    ) -> Self {
        Self {
            frame_idx,
            instances,
            image,
        }
    }

    pub fn frame_idx(&self) -> usize {
        self.frame_idx
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn image(&self) -> Option<&Arc<GrayImage>> {
        self.image.as_ref()
    }
}

/*-----------------------------------------------------------------------------
MatchQueue
-----------------------------------------------------------------------------*/

/// Fixed-capacity history of the most recent frames. Pushing onto a full
/// queue evicts the oldest frame.
#[derive(Debug, Clone)]
pub struct MatchQueue {
    slots: Box<[Option<MatchedInstance>]>,
    head: usize,
    len: usize,
}

impl MatchQueue {
    pub fn new(capacity: usize) -> Result<Self, TrackError> {
        if capacity == 0 {
            return Err(TrackError::InvalidConfig(
                "history window must hold at least one frame".to_string(),
            ));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append at the newest end, returning the evicted oldest entry if the
    /// queue was full.
    pub fn push(&mut self, matched: MatchedInstance) -> Option<MatchedInstance> {
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let evicted = self.slots[tail].replace(matched);
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
        evicted
    }

    /// `age` 0 is the newest frame.
    pub fn get_newest(&self, age: usize) -> Option<&MatchedInstance> {
        if age >= self.len {
            return None;
        }
        let cap = self.capacity();
        let idx = (self.head + self.len - 1 - age) % cap;
        self.slots[idx].as_ref()
    }

    pub fn newest(&self) -> Option<&MatchedInstance> {
        self.get_newest(0)
    }

    pub fn oldest(&self) -> Option<&MatchedInstance> {
        self.len.checked_sub(1).and_then(|age| self.get_newest(age))
    }

    /// Frames from newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &MatchedInstance> + '_ {
        (0..self.len).filter_map(move |age| self.get_newest(age))
    }

    /// Frames from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &MatchedInstance> + '_ {
        (0..self.len).rev().filter_map(move |age| self.get_newest(age))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }
}
