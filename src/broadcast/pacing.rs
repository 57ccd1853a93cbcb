use std::time::Duration;

/// Coarse throughput throttle: pause admissions after every `every` chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub every: usize,
    pub pause: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Continue,
    Sleep(Duration),
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            every: 25,
            pause: Duration::from_secs(1),
        }
    }
}

impl PacingPolicy {
    /// Decide whether to pause before admitting the next chat, given how many
    /// were admitted so far in this run. `every == 0` disables pacing.
    pub fn decide(&self, admitted: usize) -> Pace {
        if self.every == 0 || self.pause.is_zero() || admitted == 0 {
            return Pace::Continue;
        }
        if admitted % self.every == 0 {
            Pace::Sleep(self.pause)
        } else {
            Pace::Continue
        }
    }
}
