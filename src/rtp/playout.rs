use std::time::{Duration, Instant};

/// Playout-delay header extension state for one outbound stream.
///
/// Values are in 10ms steps, 12 bits each for min and max. The signalled
/// minimum starts at zero for a quick first render and ramps up one step
/// per update interval until it reaches the target, with max pinned five
/// steps above min.
#[derive(Debug)]
pub struct PlayoutDelay {
    id: u8,
    target_min: u16,
    cur_min: u16,
    update_interval: Duration,
    updated_at: Option<Instant>,
    payload: [u8; 3],
}

const MAX_DELTA: u16 = 5;

impl PlayoutDelay {
    pub fn new(id: u8, target_min: u32, update_interval: Duration) -> Self {
        let mut pd = PlayoutDelay {
            id,
            target_min: target_min.min(0xfff) as u16,
            cur_min: 0,
            update_interval,
            updated_at: None,
            payload: [0; 3],
        };
        pd.encode();
        pd
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Current 3-byte extension payload, advancing the ramp when the update
    /// interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> [u8; 3] {
        match self.updated_at {
            None => self.updated_at = Some(now),
            Some(at) => {
                if self.cur_min < self.target_min
                    && now.saturating_duration_since(at) >= self.update_interval
                {
                    self.cur_min += 1;
                    self.updated_at = Some(now);
                    self.encode();
                }
            }
        }
        self.payload
    }

    fn encode(&mut self) {
        let min = self.cur_min & 0xfff;
        let max = (min + MAX_DELTA).min(0xfff);
        self.payload = [
            (min >> 4) as u8,
            ((min << 4) as u8) | (max >> 8) as u8,
            (max & 0xff) as u8,
        ];
    }
}
