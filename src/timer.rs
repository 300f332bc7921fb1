// Timer service: tick counter, periodic callbacks, PIT programming
use core::fmt;

use crate::config::TIMER_CALLBACKS_MAX;
use crate::kernel::Kernel;

/// PIT input clock in Hz.
const PIT_FREQUENCY: u32 = 1_193_182;

pub type TimerCallback = fn(&mut Kernel);

/// How many times a registered callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Times(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    NoFreeSlot,
    InvalidInterval,
    InvalidRate,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimerError::NoFreeSlot => write!(f, "no free timer callback slot"),
            TimerError::InvalidInterval => write!(f, "timer interval must be non-zero"),
            TimerError::InvalidRate => write!(f, "timer rate must be non-zero"),
        }
    }
}

#[derive(Clone, Copy)]
struct Registration {
    callback: TimerCallback,
    interval: u64,
    repeat: Repeat,
}

/// Callbacks that became due on one tick, in registration slot order.
pub type Due = [Option<TimerCallback>; TIMER_CALLBACKS_MAX];

pub struct Timer {
    ticks: u64,
    slots: [Option<Registration>; TIMER_CALLBACKS_MAX],
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            slots: [None; TIMER_CALLBACKS_MAX],
        }
    }

    /// Ticks elapsed since the timer started.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Registers `callback` to run every `interval` ticks.
    pub fn register(
        &mut self,
        callback: TimerCallback,
        interval: u64,
        repeat: Repeat,
    ) -> Result<TimerId, TimerError> {
        if interval == 0 {
            return Err(TimerError::InvalidInterval);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TimerError::NoFreeSlot)?;
        self.slots[slot] = Some(Registration {
            callback,
            interval,
            repeat,
        });
        Ok(TimerId(slot))
    }

    /// Drops a registration. Returns false if it was already gone.
    pub fn unregister(&mut self, id: TimerId) -> bool {
        self.slots
            .get_mut(id.0)
            .and_then(Option::take)
            .is_some()
    }

    /// Advances the clock by one tick and collects the callbacks due on it.
    ///
    /// The callbacks are returned rather than invoked so the caller can hand
    /// them the whole kernel context.
    pub fn advance(&mut self) -> Due {
        self.ticks = self.ticks.wrapping_add(1);
        let mut due = [None; TIMER_CALLBACKS_MAX];

        for (slot, out) in self.slots.iter_mut().zip(due.iter_mut()) {
            let Some(reg) = *slot else { continue };
            if self.ticks % reg.interval != 0 {
                continue;
            }
            *out = Some(reg.callback);
            *slot = match reg.repeat {
                Repeat::Forever => Some(reg),
                Repeat::Times(n) if n <= 1 => None,
                Repeat::Times(n) => Some(Registration {
                    repeat: Repeat::Times(n - 1),
                    ..reg
                }),
            };
        }
        due
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// PIT reload value for `hz`. Rates outside what the 16-bit counter can
/// divide to are clamped to the nearest one it can.
pub fn pit_divisor(hz: u32) -> Result<u16, TimerError> {
    if hz == 0 {
        return Err(TimerError::InvalidRate);
    }
    Ok((PIT_FREQUENCY / hz).clamp(1, u32::from(u16::MAX)) as u16)
}

/// Programs PIT channel 0 to fire IRQ0 at `hz`.
pub fn init_pit(hz: u32) -> Result<(), TimerError> {
    let divisor = pit_divisor(hz)?;
    unsafe {
        use x86_64::instructions::port::Port;
        let mut command = Port::<u8>::new(0x43);
        let mut channel0 = Port::<u8>::new(0x40);

        // channel 0, lobyte/hibyte, mode 2 (rate generator), binary
        command.write(0x36);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    log::info!("PIT programmed for {} Hz (divisor {})", hz, divisor);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Kernel) {}

    fn count(due: &Due) -> usize {
        due.iter().flatten().count()
    }

    #[test_case]
    fn test_ticks_advance() {
        let mut timer = Timer::new();
        assert_eq!(timer.ticks(), 0);
        timer.advance();
        timer.advance();
        assert_eq!(timer.ticks(), 2);
    }

    #[test_case]
    fn test_interval_callback_fires_on_multiples() {
        let mut timer = Timer::new();
        timer.register(noop, 3, Repeat::Forever).unwrap();
        let fired: [usize; 6] = core::array::from_fn(|_| count(&timer.advance()));
        assert_eq!(fired, [0, 0, 1, 0, 0, 1]);
    }

    #[test_case]
    fn test_repeat_count_expires() {
        let mut timer = Timer::new();
        let id = timer.register(noop, 1, Repeat::Times(2)).unwrap();
        assert_eq!(count(&timer.advance()), 1);
        assert_eq!(count(&timer.advance()), 1);
        assert_eq!(count(&timer.advance()), 0);
        assert!(!timer.unregister(id));
    }

    #[test_case]
    fn test_pit_divisor_bounds() {
        assert_eq!(pit_divisor(0), Err(TimerError::InvalidRate));
        assert_eq!(pit_divisor(100), Ok(11931));
        assert_eq!(pit_divisor(1), Ok(u16::MAX));
        assert_eq!(pit_divisor(18), Ok(u16::MAX));
        assert_eq!(pit_divisor(u32::MAX), Ok(1));
    }

    #[test_case]
    fn test_register_rejects_zero_interval_and_overflow() {
        let mut timer = Timer::new();
        assert_eq!(
            timer.register(noop, 0, Repeat::Forever),
            Err(TimerError::InvalidInterval)
        );
        for _ in 0..TIMER_CALLBACKS_MAX {
            timer.register(noop, 1, Repeat::Forever).unwrap();
        }
        assert_eq!(
            timer.register(noop, 1, Repeat::Forever),
            Err(TimerError::NoFreeSlot)
        );
    }
}
