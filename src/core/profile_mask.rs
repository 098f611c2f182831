//! Minute-resolution rolling connection mask.
//!
//! One bit per minute slot; slot index is the absolute minute (Unix seconds / 60)
//! modulo the slot count. The mask records *occupied minutes*, not a count per
//! minute, so several connections within one minute count once.
//!
//! The mask remembers the minute of the most recent recorded connection (its
//! anchor). A slot whose minute lies more than one full cycle behind the anchor,
//! or after it, holds data from an earlier cycle: counts ignore it and the next
//! `record_connection` clears it.

/// Absolute minute for a Unix timestamp in seconds.
pub fn minute_of(timestamp: i64) -> i64 {
    timestamp.div_euclid(60)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileMask {
    bytes: Vec<u8>,
    anchor: Option<i64>,
}

impl ProfileMask {
    /// Empty mask wide enough for `minutes` slots (rounded up to whole bytes).
    pub fn for_interval(minutes: u32) -> Self {
        Self {
            bytes: vec![0; byte_len(minutes)],
            anchor: None,
        }
    }

    /// Restore a persisted mask. `last_connect_time` is the Unix time of the
    /// last connection recorded into it (0 = never).
    pub fn from_bytes(bytes: Vec<u8>, last_connect_time: i64) -> Self {
        let anchor = (last_connect_time > 0).then(|| minute_of(last_connect_time));
        Self { bytes, anchor }
    }

    /// Resize to fit `minutes`, keeping the overlapping prefix.
    pub fn set_limit_interval(&mut self, minutes: u32) {
        let len = byte_len(minutes);
        if self.bytes.len() != len {
            self.bytes.resize(len, 0);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn anchor_minute(&self) -> Option<i64> {
        self.anchor
    }

    /// Mark `now_minute` as occupied.
    pub fn record_connection(&mut self, now_minute: i64) {
        let len = self.slot_count() as i64;
        if len == 0 {
            return;
        }

        match self.anchor {
            None => {
                self.bytes.fill(0);
                self.anchor = Some(now_minute);
            }
            Some(anchor) if now_minute > anchor => {
                if now_minute - anchor >= len {
                    self.bytes.fill(0);
                } else {
                    for minute in (anchor + 1)..now_minute {
                        self.set_slot(minute, false);
                    }
                }
                self.anchor = Some(now_minute);
            }
            // Older than anything the mask can still represent.
            Some(anchor) if anchor - now_minute >= len => return,
            Some(_) => {}
        }

        self.set_slot(now_minute, true);
    }

    /// Number of occupied minutes among the `interval_minutes` slots ending at
    /// `now_minute`. Never exceeds `interval_minutes` or the slot count.
    pub fn count_in_interval(&self, now_minute: i64, interval_minutes: u32) -> u32 {
        let Some(anchor) = self.anchor else {
            return 0;
        };
        let len = self.slot_count() as i64;
        let span = (interval_minutes as i64).min(len);

        let mut count = 0;
        for back in 0..span {
            let minute = now_minute - back;
            if minute > anchor {
                continue;
            }
            if anchor - minute >= len {
                break;
            }
            if self.slot(minute) {
                count += 1;
            }
        }
        count
    }

    fn index(&self, minute: i64) -> (usize, u8) {
        let bit = minute.rem_euclid(self.slot_count() as i64) as usize;
        (bit / 8, 1u8 << (bit % 8))
    }

    fn slot(&self, minute: i64) -> bool {
        let (byte, mask) = self.index(minute);
        self.bytes[byte] & mask != 0
    }

    fn set_slot(&mut self, minute: i64, occupied: bool) {
        let (byte, mask) = self.index(minute);
        if occupied {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
    }
}

fn byte_len(minutes: u32) -> usize {
    (minutes as usize + 7) / 8
}
