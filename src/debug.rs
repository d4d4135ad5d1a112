//! Real-time safe logging for the frame callback.
//!
//! The callback thread must never block on a logger, so messages are formatted
//! into fixed-size entries and pushed into a bounded ring. When the ring is full
//! or contended the message is dropped and counted. The control plane drains
//! the ring into the `log` facade.

use once_cell::sync::Lazy;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const LOG_CAP: usize = 256;
const LOG_MSG_MAX: usize = 240;

#[derive(Copy, Clone)]
struct LogEntry {
    level: log::Level,
    len: u16,
    bytes: [u8; LOG_MSG_MAX],
}

impl LogEntry {
    fn message(&self) -> &str {
        let len = (self.len as usize).min(LOG_MSG_MAX);
        // Truncation may split a code point; keep the valid prefix.
        match std::str::from_utf8(&self.bytes[..len]) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

struct FixedBuf {
    buf: [u8; LOG_MSG_MAX],
    len: usize,
}

impl fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = LOG_MSG_MAX - self.len;
        let bytes = s.as_bytes();
        let n = bytes.len().min(avail);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

struct LogRing {
    prod: Mutex<Producer<LogEntry>>,
    cons: Mutex<Consumer<LogEntry>>,
}

static RING: Lazy<LogRing> = Lazy::new(|| {
    let (prod, cons) = RingBuffer::new(LOG_CAP).split();
    LogRing {
        prod: Mutex::new(prod),
        cons: Mutex::new(cons),
    }
});

static DROPPED: AtomicUsize = AtomicUsize::new(0);

pub fn rt_log_inner(level: log::Level, args: fmt::Arguments) {
    let mut buf = FixedBuf {
        buf: [0; LOG_MSG_MAX],
        len: 0,
    };
    let _ = fmt::write(&mut buf, args);
    let entry = LogEntry {
        level,
        len: buf.len as u16,
        bytes: buf.buf,
    };

    let pushed = match RING.prod.try_lock() {
        Ok(mut prod) => prod.push(entry).is_ok(),
        Err(_) => false,
    };
    if !pushed {
        DROPPED.fetch_add(1, Ordering::Relaxed);
    }
}

/// Forward queued callback messages to the `log` facade. Returns how many
/// messages were forwarded.
pub fn drain_realtime_log() -> usize {
    let mut cons = match RING.cons.lock() {
        Ok(c) => c,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut n = 0;
    while let Some(entry) = cons.pop() {
        log::log!(target: "orionwave::rt", entry.level, "{}", entry.message());
        n += 1;
    }
    let dropped = DROPPED.swap(0, Ordering::Relaxed);
    if dropped > 0 {
        log::warn!(target: "orionwave::rt", "{} real-time log messages dropped", dropped);
    }
    n
}

pub fn dropped_messages() -> usize {
    DROPPED.load(Ordering::Relaxed)
}

/// Queue a log record from the audio callback without blocking.
#[macro_export]
macro_rules! rt_log {
    ($level:expr, $($arg:tt)*) => {
        $crate::debug::rt_log_inner($level, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_messages_truncate() {
        let mut buf = FixedBuf {
            buf: [0; LOG_MSG_MAX],
            len: 0,
        };
        let long = "x".repeat(LOG_MSG_MAX * 2);
        let _ = fmt::write(&mut buf, format_args!("{}", long));
        assert_eq!(buf.len, LOG_MSG_MAX);
    }

    #[test]
    fn test_queue_and_drain() {
        rt_log!(log::Level::Warn, "stage {} failed", "reverb");
        // Other tests share the ring; only require that draining makes progress.
        let n = drain_realtime_log();
        assert!(n >= 1 || dropped_messages() == 0);
    }
}
