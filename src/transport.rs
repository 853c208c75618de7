//! Byte transport used by the programmer, plus wire traffic monitoring

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial;
use nb::block;

/// Duplex byte channel to the bootloader.
///
/// Implementations must never block in `read` for longer than the timeout,
/// returning however many bytes (including none) arrived in that window.
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Write all provided bytes
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Drop any bytes pending in the receive path
    fn discard_input(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Upper bound on bytes dropped by a single `discard_input`, so a device that
/// keeps transmitting cannot stall teardown
pub const DISCARD_LIMIT: usize = 4096;

/// Direction of observed wire traffic
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Direction {
    Tx,
    Rx,
}

/// Hook receiving every chunk of bytes written to or read from the transport
pub trait Monitor {
    fn observe(&mut self, direction: Direction, data: &[u8]);
}

/// Reports wire traffic via `log::trace!` under a per-instance target
#[derive(Clone, PartialEq, Debug)]
pub struct LogMonitor {
    target: &'static str,
}

impl LogMonitor {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogMonitor {
    fn default() -> Self {
        Self::new(module_path!())
    }
}

impl Monitor for LogMonitor {
    fn observe(&mut self, direction: Direction, data: &[u8]) {
        match direction {
            Direction::Tx => trace!(target: self.target, "Write: {:02x?}", data),
            Direction::Rx => trace!(target: self.target, "Read: {:02x?}", data),
        }
    }
}

/// Discards all wire traffic
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Silent;

impl Monitor for Silent {
    fn observe(&mut self, _direction: Direction, _data: &[u8]) {}
}

/// Transport over a non-blocking embedded-hal serial port, polling for
/// received bytes at a fixed period until the timeout elapses
pub struct Polled<P, D> {
    port: P,
    delay: D,
    poll_delay_ms: u32,
}

impl<P, D, E> Polled<P, D>
where
    P: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    D: DelayMs<u32>,
{
    pub fn new(port: P, delay: D, poll_delay_ms: u32) -> Self {
        Self {
            port,
            delay,
            poll_delay_ms: poll_delay_ms.max(1),
        }
    }

    /// Release the underlying port and delay
    pub fn free(self) -> (P, D) {
        (self.port, self.delay)
    }
}

impl<P, D, E> Transport for Polled<P, D>
where
    P: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Error = E;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, E> {
        let mut n = 0;
        let mut t: u32 = 0;

        while n < buf.len() {
            match self.port.read() {
                Ok(v) => {
                    buf[n] = v;
                    n += 1;
                    continue;
                }
                // Hand back what has arrived rather than waiting out the gap
                Err(nb::Error::WouldBlock) if n > 0 => break,
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e),
            }

            if t >= timeout_ms {
                break;
            }

            self.delay.delay_ms(self.poll_delay_ms);
            t = t.saturating_add(self.poll_delay_ms);
        }

        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), E> {
        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())
    }

    fn discard_input(&mut self) -> Result<(), E> {
        for _ in 0..DISCARD_LIMIT {
            match self.port.read() {
                Ok(_) => (),
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }

        warn!("Input still pending after discarding {} bytes", DISCARD_LIMIT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serial port yielding `None` entries as WouldBlock
    struct Port {
        rx: VecDeque<Option<u8>>,
        tx: Vec<u8>,
        flushed: bool,
    }

    impl Port {
        fn new(rx: &[Option<u8>]) -> Self {
            Self {
                rx: rx.iter().cloned().collect(),
                tx: vec![],
                flushed: false,
            }
        }
    }

    impl serial::Read<u8> for Port {
        type Error = ();

        fn read(&mut self) -> nb::Result<u8, ()> {
            match self.rx.pop_front() {
                Some(Some(v)) => Ok(v),
                _ => Err(nb::Error::WouldBlock),
            }
        }
    }

    impl serial::Write<u8> for Port {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.tx.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Clock(u32);

    impl DelayMs<u32> for Clock {
        fn delay_ms(&mut self, ms: u32) {
            self.0 = self.0.saturating_add(ms);
        }
    }

    #[test]
    fn read_waits_for_first_byte() {
        let port = Port::new(&[None, None, Some(0x79)]);
        let mut t = Polled::new(port, Clock::default(), 5);

        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf, 250), Ok(1));
        assert_eq!(buf, [0x79]);

        let (_, clock) = t.free();
        assert_eq!(clock.0, 10);
    }

    #[test]
    fn read_returns_partial_on_gap() {
        let port = Port::new(&[Some(1), Some(2), None, Some(3)]);
        let mut t = Polled::new(port, Clock::default(), 1);

        let mut buf = [0u8; 4];
        assert_eq!(t.read(&mut buf, 250), Ok(2));
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn read_times_out_empty() {
        let mut t = Polled::new(Port::new(&[]), Clock::default(), 10);

        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf, 100), Ok(0));

        let (_, clock) = t.free();
        assert_eq!(clock.0, 100);
    }

    #[test]
    fn read_with_maximum_timeout_terminates() {
        let mut t = Polled::new(Port::new(&[]), Clock::default(), u32::MAX - 1);

        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf, u32::MAX), Ok(0));

        let (_, clock) = t.free();
        assert_eq!(clock.0, u32::MAX);
    }

    #[test]
    fn write_sends_all_bytes_and_flushes() {
        let mut t = Polled::new(Port::new(&[]), Clock::default(), 1);
        t.write(&[0x11, 0xEE]).unwrap();

        let (port, _) = t.free();
        assert_eq!(port.tx, vec![0x11, 0xEE]);
        assert!(port.flushed);
    }

    #[test]
    fn discard_drains_pending_bytes() {
        let mut t = Polled::new(Port::new(&[Some(0xAA), Some(0xBB), None, Some(0x79)]), Clock::default(), 1);
        t.discard_input().unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf, 10), Ok(1));
        assert_eq!(buf, [0x79]);
    }

    #[test]
    fn discard_gives_up_on_continuous_input() {
        let chatter = vec![Some(0x55); DISCARD_LIMIT + 10];
        let mut t = Polled::new(Port::new(&chatter), Clock::default(), 1);

        t.discard_input().unwrap();

        let (port, _) = t.free();
        assert_eq!(port.rx.len(), 10);
    }
}
