use log::trace;

use crate::{error::VmError, translation::FrameNumber};

/// Outcome of looking at one frame under the clock hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProbe {
    Unassigned,
    /// The used bit was set and has been cleared by the probe.
    Referenced { pinned: bool },
    Pinned,
    Evictable,
}

/// The frames the clock sweeps over.
pub trait ClockTarget {
    fn frames(&self) -> usize;

    /// Inspects `ppn`, clearing its used bit if it was set.
    fn probe(&mut self, ppn: FrameNumber) -> Result<FrameProbe, VmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Victim(FrameNumber),
    /// Every assigned frame is pinned.
    AllPinned,
}

/// Second-chance replacement over all physical frames.
#[derive(Debug, Default)]
pub struct Clock {
    hand: usize,
}

impl Clock {
    pub fn new() -> Self {
        Clock { hand: 0 }
    }

    pub fn hand(&self) -> usize {
        self.hand
    }

    /// Advances the hand until it finds an unpinned frame whose used bit is
    /// clear. The hand is left just past the victim.
    pub fn select_victim<T: ClockTarget>(&mut self, target: &mut T) -> Result<Sweep, VmError> {
        let frames = target.frames();
        if frames == 0 {
            return Ok(Sweep::AllPinned);
        }
        loop {
            let mut unpinned_seen = false;
            // One lap clears every used bit, so the second lap finds a victim
            // unless all frames are pinned or were touched again meanwhile.
            for _ in 0..2 * frames {
                let ppn = (self.hand % frames) as FrameNumber;
                self.hand = (self.hand + 1) % frames;
                match target.probe(ppn)? {
                    FrameProbe::Evictable => {
                        trace!("Clock picked frame {}", ppn);
                        return Ok(Sweep::Victim(ppn));
                    }
                    FrameProbe::Referenced { pinned: false } => unpinned_seen = true,
                    FrameProbe::Referenced { pinned: true }
                    | FrameProbe::Pinned
                    | FrameProbe::Unassigned => {}
                }
            }
            if !unpinned_seen {
                return Ok(Sweep::AllPinned);
            }
        }
    }
}
