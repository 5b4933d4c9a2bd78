//! Scheduled playback: yield each event at its intended wall-clock time.
//!
//! Two variants are offered by capability. [`Player`] blocks on a
//! [`Timer`]'s sleep primitive; [`AsyncPlayer`] suspends through an
//! injected asynchronous sleep, so it cooperates with whatever executor the
//! host runs. Both follow the same drift rule: the target time of every
//! event is computed from the start of playback, never from the previous
//! sleep, so oversleeping is absorbed by shorter (or zero-length) sleeps
//! afterwards instead of accumulating.

use crate::{event::MidiEvent, io::SourceReader, merge::TimedStream, prelude::*};
use core::future::Future;

/// A monotonic microsecond clock supplied by the host.
pub trait Clock {
    /// The current monotonic time. Only differences are meaningful.
    fn now_us(&mut self) -> u64;
}

/// A [`Clock`] that can also block the current thread.
pub trait Timer: Clock {
    /// Sleep for at least `us` microseconds.
    fn sleep_us(&mut self, us: u64);
}

/// Clock and sleep backed by `std::time::Instant` and `std::thread::sleep`.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdTimer {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdTimer {
    #[inline]
    pub fn new() -> StdTimer {
        StdTimer {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdTimer {
    #[inline]
    fn default() -> StdTimer {
        StdTimer::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdTimer {
    #[inline]
    fn now_us(&mut self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

#[cfg(feature = "std")]
impl Timer for StdTimer {
    #[inline]
    fn sleep_us(&mut self, us: u64) {
        std::thread::sleep(core::time::Duration::from_micros(us));
    }
}

/// Shared scheduling state of both player variants.
#[derive(Debug)]
struct Schedule {
    start_us: Option<u64>,
    cum_us: u64,
}

impl Schedule {
    fn new() -> Schedule {
        Schedule {
            start_us: None,
            cum_us: 0,
        }
    }

    /// Account for the next event and return how long to wait for it along
    /// with its absolute target time.
    fn step(&mut self, delta_us: u64, now_us: u64) -> (u64, u64) {
        self.cum_us += delta_us;
        let start = *self.start_us.get_or_insert(now_us);
        let target = start + self.cum_us;
        (target.saturating_sub(now_us), target)
    }
}

/// A blocking scheduler over the merged event stream.
///
/// Each call to [`next_event`](Player::next_event) (or `Iterator::next`)
/// sleeps until the event's scheduled time, stamps `timestamp_us` with the
/// target, and yields it. Late events are delivered immediately, in order.
/// Dropping the player cancels playback; pending events are simply never
/// produced.
#[derive(Debug)]
pub struct Player<R: SourceReader, T> {
    timed: TimedStream<R>,
    event: MidiEvent,
    timer: T,
    schedule: Schedule,
}

impl<R: SourceReader, T: Timer> Player<R, T> {
    pub(crate) fn new(timed: TimedStream<R>, timer: T) -> Player<R, T> {
        Player {
            timed,
            event: MidiEvent::default(),
            timer,
            schedule: Schedule::new(),
        }
    }

    /// Sleep until the next event is due, then borrow it.
    ///
    /// The returned reference is overwritten by the next call; clone the
    /// event to keep it.
    pub fn next_event(&mut self) -> Option<Result<&MidiEvent>> {
        match self.timed.next_into(&mut self.event)? {
            Ok(()) => {}
            Err(e) => return Some(Err(e)),
        }
        let now = self.timer.now_us();
        let (wait, target) = self.schedule.step(self.event.delta_us, now);
        if wait > 0 {
            self.timer.sleep_us(wait);
        }
        self.event.timestamp_us = Some(target);
        Some(Ok(&self.event))
    }
}

impl<R: SourceReader, T: Timer> Iterator for Player<R, T> {
    type Item = Result<MidiEvent>;

    fn next(&mut self) -> Option<Result<MidiEvent>> {
        match self.next_event()? {
            Ok(ev) => Some(Ok(ev.clone())),
            Err(e) => Some(Err(e)),
        }
    }
}

/// A cooperative scheduler over the merged event stream.
///
/// Instead of blocking, the player awaits an injected `sleep` future, making
/// it usable from any async runtime (or a hand-rolled executor on embedded
/// targets). Dropping the in-flight future at any suspension point cancels
/// playback.
#[derive(Debug)]
pub struct AsyncPlayer<R: SourceReader, C, F> {
    timed: TimedStream<R>,
    event: MidiEvent,
    clock: C,
    sleep: F,
    schedule: Schedule,
}

impl<R, C, F> AsyncPlayer<R, C, F>
where
    R: SourceReader,
    C: Clock,
{
    pub(crate) fn new(timed: TimedStream<R>, clock: C, sleep: F) -> AsyncPlayer<R, C, F> {
        AsyncPlayer {
            timed,
            event: MidiEvent::default(),
            clock,
            sleep,
            schedule: Schedule::new(),
        }
    }

    /// Suspend until the next event is due, then borrow it.
    pub async fn next_event<Fut>(&mut self) -> Option<Result<&MidiEvent>>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        match self.timed.next_into(&mut self.event)? {
            Ok(()) => {}
            Err(e) => return Some(Err(e)),
        }
        let now = self.clock.now_us();
        let (wait, target) = self.schedule.step(self.event.delta_us, now);
        if wait > 0 {
            (self.sleep)(wait).await;
        }
        self.event.timestamp_us = Some(target);
        Some(Ok(&self.event))
    }
}
