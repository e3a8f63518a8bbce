//! Source-channel to voice allocation.
//!
//! Two policies: static first-come binding that permanently drops the
//! fifth and later channels, and dynamic binding that evicts the
//! voice whose commitment ends earliest. Voices are scanned in a
//! fixed 1 to 4 order so allocation is deterministic.

use gt_ir::{SourceTick, VoiceState, NUM_VOICES};
use heapless::Deque;

/// Number of logical channels in the source performance.
pub const NUM_CHANNELS: usize = 16;

/// Voice allocation policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationPolicy {
    /// First 4 distinct channels get the 4 voices; the rest are
    /// dropped for the remainder of the run.
    Static,
    /// Channels bind on demand; a full pool evicts the voice with the
    /// minimum availability tick, lowest voice number on ties.
    Dynamic,
}

#[derive(Clone, Copy, Debug)]
struct PolyNote {
    note: u8,
    voice: u8,
}

/// Maps source channels onto the 4 device voices.
pub struct ChannelAllocator {
    policy: AllocationPolicy,
    slots: [VoiceState; NUM_VOICES],
    /// Channels permanently dropped under the static policy.
    dropped: [bool; NUM_CHANNELS],
    /// Overlapping-note FIFO per channel, dynamic policy only.
    poly: [Deque<PolyNote, NUM_VOICES>; NUM_CHANNELS],
    static_bound: usize,
}

impl ChannelAllocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self {
            policy,
            slots: [VoiceState::default(); NUM_VOICES],
            dropped: [false; NUM_CHANNELS],
            poly: core::array::from_fn(|_| Deque::new()),
            static_bound: 0,
        }
    }

    /// Resolve the voice for a note-on, binding or evicting as the
    /// policy allows. `None` means the note is dropped.
    pub fn note_on(&mut self, channel: u8, note: u8, tick: SourceTick) -> Option<u8> {
        let voice = match self.policy {
            AllocationPolicy::Static => self.note_on_static(channel),
            AllocationPolicy::Dynamic => self.note_on_dynamic(channel, note, tick),
        };
        if let Some(voice) = voice {
            self.slots[voice as usize - 1].note = note;
        }
        voice
    }

    fn note_on_static(&mut self, channel: u8) -> Option<u8> {
        let ch = channel as usize;
        if self.dropped[ch] {
            return None;
        }
        if let Some(voice) = self.voice_of(channel) {
            return Some(voice);
        }
        if self.static_bound < NUM_VOICES {
            self.static_bound += 1;
            let voice = self.static_bound as u8;
            self.slots[voice as usize - 1].channel = Some(channel);
            Some(voice)
        } else {
            self.dropped[ch] = true;
            None
        }
    }

    fn note_on_dynamic(&mut self, channel: u8, note: u8, tick: SourceTick) -> Option<u8> {
        let bound = match self.voice_of(channel) {
            Some(voice) => voice,
            None => self.bind_channel(channel, tick)?,
        };
        Some(self.queue_poly_note(channel as usize, bound, note))
    }

    /// Bind an unbound channel: first free voice in 1-4 order, else
    /// evict the earliest-available one.
    fn bind_channel(&mut self, channel: u8, tick: SourceTick) -> Option<u8> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.channel.is_none() && slot.is_free_at(tick) {
                slot.channel = Some(channel);
                return Some(idx as u8 + 1);
            }
        }

        let mut victim = 0usize;
        for idx in 1..NUM_VOICES {
            if self.slots[idx].available_at < self.slots[victim].available_at {
                victim = idx;
            }
        }
        // No preemption of content that has not finished yet.
        if tick < self.slots[victim].available_at {
            return None;
        }

        if let Some(evicted) = self.slots[victim].channel {
            self.poly[evicted as usize].clear();
        }
        self.slots[victim].channel = Some(channel);
        Some(victim as u8 + 1)
    }

    /// Place a new pitch in the channel's overlap FIFO. The bound
    /// voice is preferred, then any voice not already queued, then
    /// the oldest queued pitch's voice is reused.
    fn queue_poly_note(&mut self, ch: usize, bound: u8, note: u8) -> u8 {
        let queue = &mut self.poly[ch];
        let mut voice = None;
        if !queue.iter().any(|p| p.voice == bound) {
            voice = Some(bound);
        } else {
            for v in 1..=NUM_VOICES as u8 {
                if !queue.iter().any(|p| p.voice == v) {
                    voice = Some(v);
                    break;
                }
            }
        }
        let voice = match voice {
            Some(v) => v,
            None => queue.pop_front().map(|p| p.voice).unwrap_or(bound),
        };
        let _ = queue.push_back(PolyNote { note, voice });
        voice
    }

    /// Resolve a note-off to the voice it was sounding on. Unmatched
    /// note-offs return `None`.
    pub fn note_off(&mut self, channel: u8, note: u8) -> Option<u8> {
        match self.policy {
            AllocationPolicy::Static => self.voice_of(channel),
            AllocationPolicy::Dynamic => {
                let queue = &mut self.poly[channel as usize];
                let mut found = None;
                let mut rest: Deque<PolyNote, NUM_VOICES> = Deque::new();
                while let Some(entry) = queue.pop_front() {
                    if found.is_none() && entry.note == note {
                        found = Some(entry.voice);
                    } else {
                        let _ = rest.push_back(entry);
                    }
                }
                *queue = rest;
                found
            }
        }
    }

    /// Extend a voice's commitment; availability never moves backward.
    pub fn set_available(&mut self, voice: u8, tick: SourceTick) {
        let slot = &mut self.slots[voice as usize - 1];
        slot.available_at = slot.available_at.max(tick);
    }

    pub fn voice_of(&self, channel: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.channel == Some(channel))
            .map(|idx| idx as u8 + 1)
    }

    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|s| s.channel.is_some()).count()
    }
}
