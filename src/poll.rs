// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Adaptive polling window controller, matching
// uct_mm_iface_fifo_window_adjust's AIMD logic: back off multiplicatively
// on an empty poll, and require two consecutive full polls before growing
// (a single priming poll sets the flag, the next one grows and clears it),
// so the window doesn't oscillate on every single full poll.

const MD_FACTOR: u32 = 2;
const AI_VALUE: u32 = 1;

pub struct AdaptivePoll {
    min: u32,
    max: u32,
    window: u32,
    /// Set after any full poll (one that consumed the whole `window`)
    /// that didn't itself trigger a grow; the next full poll, whatever the
    /// window is then, grows it and clears this flag again. Cleared
    /// unconditionally by a multiplicative decrease.
    prev_wnd_cons: bool,
}

impl AdaptivePoll {
    pub fn new(min: u32, max: u32) -> Self {
        let min = min.min(max).max(1);
        AdaptivePoll {
            min,
            max,
            window: max,
            prev_wnd_cons: false,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Feed back how many elements the last poll actually consumed
    /// (bounded by the window handed out) and adjust for the next call.
    pub fn record(&mut self, consumed: u32, offered: u32) {
        if consumed < offered {
            // Didn't use the whole window: back off multiplicatively.
            self.window = (self.window / MD_FACTOR).max(self.min);
            self.prev_wnd_cons = false;
            return;
        }
        // Consumed the whole window: grow, but only after seeing this
        // twice in a row — `prev_wnd_cons` primes on the first full poll
        // after any decrease and is cleared again once it triggers a
        // grow, regardless of where the window currently sits.
        if self.prev_wnd_cons {
            self.window = (self.window + AI_VALUE).min(self.max);
            self.prev_wnd_cons = false;
        } else {
            self.prev_wnd_cons = true;
        }
    }
}
