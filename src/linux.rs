use std::io::{self, ErrorKind as IoErrorKind, Read as _, Write as _};
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::Serial;
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::transport::DISCARD_LIMIT;
use crate::{Options, Programmer, Transport};

/// Default bootloader baud rate
pub const DEFAULT_BAUD: usize = 57600;

fn kind(e: SerialError) -> IoErrorKind {
    io::Error::from(e).kind()
}

impl Transport for Serial {
    type Error = IoErrorKind;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, IoErrorKind> {
        self.0
            .set_timeout(Duration::from_millis(timeout_ms.into()))
            .map_err(kind)?;

        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => match e.kind() {
                IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted => Ok(0),
                k => Err(k),
            },
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), IoErrorKind> {
        self.0.write_all(data).map_err(|e| e.kind())?;
        self.0.flush().map_err(|e| e.kind())
    }

    fn discard_input(&mut self) -> Result<(), IoErrorKind> {
        let mut buf = [0u8; 64];

        for _ in 0..DISCARD_LIMIT / buf.len() {
            if Transport::read(self, &mut buf, 1)? == 0 {
                return Ok(());
            }
        }

        warn!("Input still pending after discarding {} bytes", DISCARD_LIMIT);
        Ok(())
    }
}

impl Programmer<Serial> {
    /// Create a new linux serial port programmer instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings, AN3155 requires 8 data bits with even parity
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityEven);

        port.0.write_settings(&settings)?;

        Ok(Self::new(port, options))
    }
}
