use crate::protocol::{append_checksum, Command, MAX_CHUNK, UART_ACK, UART_DISC, UART_NACK};
use crate::transport::{Direction, LogMonitor, Monitor, Transport};
use crate::{Error, Options, State};

/// Bootloader version and supported command set, as reported by `Get`
#[derive(Clone, PartialEq, Debug)]
pub struct BootloaderInfo {
    pub version: u8,
    pub commands: Vec<u8>,
}

impl BootloaderInfo {
    pub fn supports(&self, command: Command) -> bool {
        self.commands.contains(&command.code())
    }
}

/// Bootloader session over an exclusively owned transport.
///
/// Pending input is discarded when the programmer is dropped.
pub struct Programmer<T: Transport, M: Monitor = LogMonitor> {
    state: State,
    options: Options,
    port: T,
    monitor: M,
}

impl<T: Transport> Programmer<T, LogMonitor> {
    /// Create a new programmer instance logging wire traffic via `log`
    pub fn new(port: T, options: Options) -> Self {
        Self::with_monitor(port, options, LogMonitor::default())
    }
}

impl<T: Transport, M: Monitor> Programmer<T, M> {
    /// Create a new programmer instance reporting wire traffic to `monitor`
    pub fn with_monitor(port: T, options: Options, monitor: M) -> Self {
        Self {
            state: State::Init,
            options,
            port,
            monitor,
        }
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Fetch the response timeouts in use
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Synchronise with the bootloader (autobaud).
    ///
    /// May be repeated to resynchronise, each call performs one full handshake.
    pub fn setup(&mut self) -> Result<(), Error<T::Error>> {
        self.state = State::Init;

        self.port.discard_input()?;

        debug!("Sending discovery character");
        self.write(&[UART_DISC])?;

        debug!("Awaiting bootloader response");
        if !self.await_ack(self.options.response_timeout_ms)? {
            error!("Bootloader rejected discovery character");
            return Err(Error::Protocol("autobaud failed".into()));
        }

        self.state = State::Synced;

        Ok(())
    }

    /// Read up to 256 bytes of memory from `address`
    pub fn read_memory(&mut self, address: u32, count: usize) -> Result<Vec<u8>, Error<T::Error>> {
        if count == 0 || count > MAX_CHUNK {
            return Err(Error::InvalidArgument("read count must be within 1..=256"));
        }

        self.command(Command::ReadMemory, "read protection is enabled")?;
        self.send_address(address)?;

        if !self.send_and_await_ack(&[(count - 1) as u8])? {
            return Err(Error::Command("count is rejected by the device"));
        }

        // Payload is streamed without a trailing ACK
        self.receive_exact(count)
    }

    /// Write up to 256 bytes of memory at `address`
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        if data.is_empty() || data.len() > MAX_CHUNK {
            return Err(Error::InvalidArgument("write length must be within 1..=256"));
        }

        self.command(Command::WriteMemory, "read protection is enabled")?;

        // AN3155: an invalid address is not necessarily NACKed here, in which
        // case the failure surfaces on the data frame or the next command.
        self.send_address(address)?;

        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push((data.len() - 1) as u8);
        frame.extend_from_slice(data);

        if !self.send_and_await_ack(&frame)? {
            return Err(Error::Command("data rejected by the device"));
        }

        Ok(())
    }

    /// Enable readout protection.
    ///
    /// The device resets once complete, call `setup` again before issuing
    /// further commands to a freshly booted bootloader.
    pub fn readout_protect(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::ReadoutProtect, "read protection is already enabled")?;
        self.await_completion()
    }

    /// Disable readout protection.
    ///
    /// The device mass erases flash and resets once complete, call `setup`
    /// again before issuing further commands to a freshly booted bootloader.
    pub fn readout_unprotect(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::ReadoutUnprotect, "something went wrong")?;
        self.await_completion()
    }

    /// Fetch the bootloader version and supported commands
    pub fn get(&mut self) -> Result<BootloaderInfo, Error<T::Error>> {
        self.command(Command::Get, "get command rejected")?;

        let data = self.receive_counted()?;

        Ok(BootloaderInfo {
            version: data[0],
            commands: data[1..].to_vec(),
        })
    }

    /// Fetch the product ID of the connected device
    pub fn chip_id(&mut self) -> Result<u16, Error<T::Error>> {
        self.command(Command::GetId, "get id command rejected")?;

        match self.receive_counted()?.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            other => Err(Error::Protocol(format!("unexpected chip id: {:02x?}", other))),
        }
    }

    /// Jump to the application at `address`.
    ///
    /// The bootloader exits on success, re-entering it requires a device reset
    /// and another `setup`.
    pub fn go(&mut self, address: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::Go, "read protection is enabled")?;
        self.send_address(address)
    }

    /// Read an arbitrary length region in `MAX_CHUNK` sized transfers
    pub fn read_region(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        check_region(address, buf.len())?;

        for (i, chunk) in buf.chunks_mut(MAX_CHUNK).enumerate() {
            let a = address + (i * MAX_CHUNK) as u32;
            debug!("Reading {} bytes from 0x{:08x}", chunk.len(), a);

            let data = self.read_memory(a, chunk.len())?;
            chunk.copy_from_slice(&data);
        }

        Ok(())
    }

    /// Write an arbitrary length region in `MAX_CHUNK` sized transfers
    pub fn write_region(&mut self, address: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        check_region(address, data.len())?;

        for (i, chunk) in data.chunks(MAX_CHUNK).enumerate() {
            let a = address + (i * MAX_CHUNK) as u32;
            debug!("Writing {} bytes to 0x{:08x}", chunk.len(), a);

            self.write_memory(a, chunk)?;
        }

        Ok(())
    }

    /// Send a checksummed frame and wait for the response, `true` on ACK and `false` on NACK
    pub fn send_and_await_ack(&mut self, frame: &[u8]) -> Result<bool, Error<T::Error>> {
        let framed = append_checksum(frame);
        self.write(&framed)?;

        self.await_ack(self.options.response_timeout_ms)
    }

    /// Receive exactly `count` bytes, any empty read is treated as a timeout
    pub fn receive_exact(&mut self, count: usize) -> Result<Vec<u8>, Error<T::Error>> {
        let mut data = vec![0u8; count];
        let mut n = 0;

        while n < count {
            let r = self.read(&mut data[n..], self.options.response_timeout_ms)?;
            if r == 0 {
                error!("Receive timeout after {} of {} bytes", n, count);
                return Err(Error::Timeout("receiving data"));
            }
            n += r;
        }

        Ok(data)
    }

    /// Receive exactly `count` bytes followed by an ACK
    pub fn receive_and_check_ack(&mut self, count: usize) -> Result<Vec<u8>, Error<T::Error>> {
        let data = self.receive_exact(count)?;

        if !self.await_ack(self.options.response_timeout_ms)? {
            return Err(Error::Protocol("expected ACK; got NACK instead".into()));
        }

        Ok(data)
    }

    fn command(&mut self, command: Command, rejected: &'static str) -> Result<(), Error<T::Error>> {
        if self.state != State::Synced {
            return Err(Error::NotSynced);
        }

        debug!("Sending command {:?}", command);

        if !self.send_and_await_ack(&[command.code()])? {
            return Err(Error::Command(rejected));
        }

        Ok(())
    }

    fn send_address(&mut self, address: u32) -> Result<(), Error<T::Error>> {
        if !self.send_and_await_ack(&address.to_be_bytes())? {
            return Err(Error::Command("address is rejected by the device"));
        }

        Ok(())
    }

    /// Length prefixed response (N followed by N + 1 bytes and an ACK)
    fn receive_counted(&mut self) -> Result<Vec<u8>, Error<T::Error>> {
        let n = self.receive_exact(1)?[0] as usize;
        self.receive_and_check_ack(n + 1)
    }

    /// Second ACK sent once an option byte update has completed
    fn await_completion(&mut self) -> Result<(), Error<T::Error>> {
        debug!("Awaiting operation completion");

        if !self.await_ack(self.options.completion_timeout_ms)? {
            return Err(Error::Protocol("expected ACK; got NACK instead".into()));
        }

        Ok(())
    }

    fn await_ack(&mut self, timeout_ms: u32) -> Result<bool, Error<T::Error>> {
        let mut b = [0u8; 1];

        if self.read(&mut b, timeout_ms)? == 0 {
            error!("Receive timeout");
            return Err(Error::Timeout("receiving ACK"));
        }

        match b[0] {
            UART_ACK => {
                debug!("Received bootloader ack");
                Ok(true)
            }
            UART_NACK => {
                debug!("Received bootloader nack");
                Ok(false)
            }
            v => {
                debug!("Received unexpected value: 0x{:02x}", v);
                Err(Error::Protocol(format!("unexpected response: {:02x}", v)))
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Error<T::Error>> {
        let n = self.port.read(buf, timeout_ms)?.min(buf.len());
        if n > 0 {
            self.monitor.observe(Direction::Rx, &buf[..n]);
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.monitor.observe(Direction::Tx, data);
        self.port.write(data)?;
        Ok(())
    }
}

impl<T: Transport, M: Monitor> Drop for Programmer<T, M> {
    fn drop(&mut self) {
        if let Err(e) = self.port.discard_input() {
            warn!("Failed to discard pending input: {:?}", e);
        }
    }
}

fn check_region<E>(address: u32, len: usize) -> Result<(), Error<E>> {
    if len > 0 && address as u64 + (len - 1) as u64 > u32::MAX as u64 {
        return Err(Error::InvalidArgument("region exceeds the 32-bit address space"));
    }
    Ok(())
}
