//! Per-thread accounting of live interpreter allocations.
//!
//! Strings and containers charge their buffer sizes here when they grow and
//! credit them back when they shrink or drop. Once the live total passes the
//! installed limit the meter latches `exceeded`; the interpreter checks the
//! latch between steps and raises `MemoryError`. Operations that would build
//! a large object in one step call [`reserve`] first so the allocation never
//! happens.

use std::cell::Cell;

use super::error::{ScriptError, ScriptResult};

#[derive(Clone, Copy)]
struct Meter {
    live: usize,
    limit: Option<usize>,
    exceeded: bool,
}

impl Meter {
    const fn idle() -> Self {
        Self {
            live: 0,
            limit: None,
            exceeded: false,
        }
    }
}

thread_local! {
    static METER: Cell<Meter> = const { Cell::new(Meter::idle()) };
}

fn update(f: impl FnOnce(&mut Meter)) {
    let _ = METER.try_with(|cell| {
        let mut meter = cell.get();
        f(&mut meter);
        cell.set(meter);
    });
}

fn read() -> Meter {
    METER.try_with(|cell| cell.get()).unwrap_or(Meter::idle())
}

/// Start metering on the current thread. `None` counts without a limit.
pub fn install(limit: Option<usize>) {
    update(|m| {
        *m = Meter {
            live: 0,
            limit,
            exceeded: false,
        }
    });
}

pub fn uninstall() {
    update(|m| *m = Meter::idle());
}

pub fn charge(bytes: usize) {
    if bytes == 0 {
        return;
    }
    update(|m| {
        m.live = m.live.saturating_add(bytes);
        if m.limit.is_some_and(|limit| m.live > limit) {
            m.exceeded = true;
        }
    });
}

pub fn release(bytes: usize) {
    if bytes == 0 {
        return;
    }
    update(|m| m.live = m.live.saturating_sub(bytes));
}

/// Refuse up front an allocation that would cross the limit.
pub fn reserve(bytes: usize) -> ScriptResult<()> {
    let meter = read();
    match meter.limit {
        Some(limit) if meter.live.saturating_add(bytes) > limit => {
            update(|m| m.exceeded = true);
            Err(ScriptError::memory())
        }
        _ => Ok(()),
    }
}

pub fn exceeded() -> bool {
    read().exceeded
}

pub fn live_bytes() -> usize {
    read().live
}

/// Tracks the bytes one buffer has charged so it can settle on resize and drop.
#[derive(Debug, Default)]
pub struct Charge(usize);

impl Charge {
    pub fn new(bytes: usize) -> Self {
        charge(bytes);
        Charge(bytes)
    }

    pub fn resize(&mut self, bytes: usize) {
        if bytes > self.0 {
            charge(bytes - self.0);
        } else {
            release(self.0 - bytes);
        }
        self.0 = bytes;
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        release(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_settle_on_drop() {
        std::thread::spawn(|| {
            install(Some(1000));
            {
                let mut c = Charge::new(400);
                assert_eq!(live_bytes(), 400);
                c.resize(100);
                assert_eq!(live_bytes(), 100);
            }
            assert_eq!(live_bytes(), 0);
            assert!(!exceeded());
            uninstall();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn crossing_the_limit_latches() {
        std::thread::spawn(|| {
            install(Some(1000));
            let big = Charge::new(1500);
            assert!(exceeded());
            drop(big);
            assert!(exceeded());
            uninstall();
            assert!(!exceeded());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn reserve_refuses_oversized_requests() {
        std::thread::spawn(|| {
            install(Some(1000));
            assert!(reserve(500).is_ok());
            assert!(reserve(5000).is_err());
            uninstall();
            assert!(reserve(usize::MAX).is_ok());
        })
        .join()
        .unwrap();
    }
}
