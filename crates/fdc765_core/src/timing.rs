/*
    fdc765
    NEC uPD765 floppy disk controller emulator

    Copyright 2025 The fdc765 Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    timing.rs

    Scheduling contract between the controller and the host's virtual clock,
    and a deterministic clock implementation.
*/

//! The controller never reads wall-clock time. Every delay it models (step rate, head
//! load and unload, rotational latency, overrun) becomes a `(tick, token, payload)`
//! record handed to a [Scheduler]. When the host clock reaches that tick, the host calls
//! back into the controller with the token and payload.
//!
//! A token identifies a logical continuation. Scheduling never replaces an earlier record
//! for the same token; callers cancel by token first when they mean to supersede it.

use std::collections::BTreeMap;

/// Logical continuations the controller may schedule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerToken {
    /// A seek or recalibrate step.
    SeekStep,
    /// Continuation of the running command's execution phase.
    Operation,
    /// The host failed to service a transfer byte in time.
    Overrun,
    /// Unload the head after the head-unload time elapses.
    HeadUnload,
}

/// Data passed back with a timer callback.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TimerPayload {
    #[default]
    None,
    /// Seek step continuation tick (drive chosen by seek age).
    Continue,
    Drive(usize),
}

pub trait Scheduler {
    fn current_tick(&self) -> u64;
    fn schedule_at(&mut self, tick: u64, token: TimerToken, payload: TimerPayload);
    fn cancel(&mut self, token: TimerToken);

    /// Schedule relative to the current tick.
    fn schedule_in(&mut self, ticks: u64, token: TimerToken, payload: TimerPayload) {
        let at = self.current_tick().saturating_add(ticks);
        self.schedule_at(at, token, payload);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    pub tick: u64,
    pub token: TimerToken,
    pub payload: TimerPayload,
}

/// A virtual clock with a pending-event queue.
///
/// Events are keyed by (tick, sequence) so that events due on the same tick fire in
/// registration order.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    tick: u64,
    seq: u64,
    events: BTreeMap<(u64, u64), (TimerToken, TimerPayload)>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Default::default()
    }

    /// Move the clock forward to `tick`. The clock never runs backwards.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = self.tick.max(tick);
    }

    pub fn advance(&mut self, ticks: u64) {
        self.tick = self.tick.saturating_add(ticks);
    }

    /// Tick of the earliest pending event.
    pub fn next_due(&self) -> Option<u64> {
        self.events.keys().next().map(|(tick, _)| *tick)
    }

    /// Remove and return the earliest event due at or before `limit`.
    pub fn pop_due(&mut self, limit: u64) -> Option<TimerEvent> {
        let (&(tick, seq), _) = self.events.iter().next()?;
        if tick > limit {
            return None;
        }
        let (token, payload) = self.events.remove(&(tick, seq))?;
        Some(TimerEvent { tick, token, payload })
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.events.values().any(|(t, _)| *t == token)
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Scheduler for VirtualClock {
    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn schedule_at(&mut self, tick: u64, token: TimerToken, payload: TimerPayload) {
        let tick = tick.max(self.tick);
        self.events.insert((tick, self.seq), (token, payload));
        self.seq += 1;
    }

    fn cancel(&mut self, token: TimerToken) {
        self.events.retain(|_, (t, _)| *t != token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tick_fires_in_registration_order() {
        let mut clock = VirtualClock::new();
        clock.schedule_at(10, TimerToken::Overrun, TimerPayload::None);
        clock.schedule_at(5, TimerToken::SeekStep, TimerPayload::Continue);
        clock.schedule_at(10, TimerToken::HeadUnload, TimerPayload::None);
        clock.schedule_at(10, TimerToken::Operation, TimerPayload::Drive(2));

        let order: Vec<TimerToken> = std::iter::from_fn(|| clock.pop_due(100)).map(|e| e.token).collect();
        assert_eq!(
            order,
            vec![
                TimerToken::SeekStep,
                TimerToken::Overrun,
                TimerToken::HeadUnload,
                TimerToken::Operation
            ]
        );
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut clock = VirtualClock::new();
        clock.schedule_in(50, TimerToken::Operation, TimerPayload::None);
        assert_eq!(clock.pop_due(49), None);
        assert_eq!(clock.next_due(), Some(50));
        assert!(clock.pop_due(50).is_some());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn cancel_by_token() {
        let mut clock = VirtualClock::new();
        clock.advance(100);
        clock.schedule_in(10, TimerToken::HeadUnload, TimerPayload::None);
        clock.schedule_in(20, TimerToken::SeekStep, TimerPayload::Continue);
        clock.schedule_in(30, TimerToken::HeadUnload, TimerPayload::None);
        clock.cancel(TimerToken::HeadUnload);
        assert!(!clock.is_pending(TimerToken::HeadUnload));
        assert_eq!(clock.pop_due(u64::MAX).map(|e| e.tick), Some(120));
    }
}
