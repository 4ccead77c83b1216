//! Generic SCPI source-measure unit over a serial line.
//!
//! Only the common SCPI subset is used, so this works with most single-channel
//! bench SMUs that speak SCPI over RS-232 or a USB serial adapter.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::instrument::{
    Instrument, InstrumentError, InstrumentResult, IvMeter, IvSource, Source, Switch,
};

/// Line-oriented command/response transport.
pub struct ScpiTerminal<P = Box<dyn SerialPort>> {
    port: P,
    terminator: u8,
    timeout: Duration,
}

impl ScpiTerminal<Box<dyn SerialPort>> {
    /// Open a serial port and discard anything already buffered on it.
    pub fn open(port: &str, baud_rate: u32) -> InstrumentResult<Self> {
        log::debug!("Opening SCPI instrument on {} at {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;
        serial.clear(serialport::ClearBuffer::All)?;
        Ok(Self::new(serial))
    }
}

impl<P: Read + Write> ScpiTerminal<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            terminator: b'\n',
            timeout: Duration::from_secs(2),
        }
    }

    /// How long to wait for a complete reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn get_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn write(&mut self, command: &str) -> InstrumentResult<()> {
        log::trace!("-> {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(self.terminator);
        self.port.write_all(&line)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send `command` and return the reply line without its terminator.
    pub fn query(&mut self, command: &str) -> InstrumentResult<String> {
        self.write(command)?;

        let mut response = Vec::new();
        let start = Instant::now();
        loop {
            if start.elapsed() >= self.timeout {
                return Err(InstrumentError::Timeout {
                    command: command.to_string(),
                });
            }
            let mut byte = [0u8; 1];
            match self.port.read_exact(&mut byte) {
                Ok(()) if byte[0] == self.terminator => break,
                Ok(()) => response.push(byte[0]),
                // Serial reads time out every few milliseconds; keep waiting.
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let reply = String::from_utf8_lossy(&response).trim().to_string();
        log::trace!("<- {}", reply);
        Ok(reply)
    }

    /// Query a numeric value. Only the first comma-separated field is used.
    pub fn query_f64(&mut self, command: &str) -> InstrumentResult<f64> {
        let reply = self.query(command)?;
        reply
            .split(',')
            .next()
            .and_then(|field| field.trim().parse().ok())
            .ok_or_else(|| InstrumentError::InvalidResponse {
                command: command.to_string(),
                response: reply.clone(),
            })
    }
}

/// A single-channel SMU driven with generic SCPI commands.
pub struct ScpiSmu<P = Box<dyn SerialPort>> {
    terminal: ScpiTerminal<P>,
    source: Source,
}

impl ScpiSmu<Box<dyn SerialPort>> {
    pub fn connect(port: &str, baud_rate: u32) -> InstrumentResult<Self> {
        let mut smu = Self::new(ScpiTerminal::open(port, baud_rate)?);
        smu.source = smu.get_source()?;
        Ok(smu)
    }
}

impl<P: Read + Write> ScpiSmu<P> {
    /// Assumes the instrument is sourcing voltage until told otherwise.
    pub fn new(terminal: ScpiTerminal<P>) -> Self {
        Self {
            terminal,
            source: Source::Voltage,
        }
    }

    pub fn terminal(&mut self) -> &mut ScpiTerminal<P> {
        &mut self.terminal
    }

    /// Return the instrument to its power-on state.
    pub fn reset(&mut self) -> InstrumentResult<()> {
        self.terminal.write("*RST")?;
        self.terminal.write("*CLS")?;
        self.source = Source::Voltage;
        Ok(())
    }
}

impl<P: Read + Write> Instrument for ScpiSmu<P> {
    fn identify(&mut self) -> InstrumentResult<String> {
        self.terminal.query("*IDN?")
    }
}

impl<P: Read + Write> Switch for ScpiSmu<P> {
    fn turn_on(&mut self) -> InstrumentResult<()> {
        self.terminal.write(":OUTP ON")
    }

    fn turn_off(&mut self) -> InstrumentResult<()> {
        self.terminal.write(":OUTP OFF")
    }

    fn is_on(&mut self) -> InstrumentResult<bool> {
        let reply = self.terminal.query(":OUTP?")?;
        match reply.to_ascii_uppercase().as_str() {
            "1" | "ON" => Ok(true),
            "0" | "OFF" => Ok(false),
            _ => Err(InstrumentError::InvalidResponse {
                command: ":OUTP?".to_string(),
                response: reply,
            }),
        }
    }
}

impl<P: Read + Write> IvSource for ScpiSmu<P> {
    fn set_source(&mut self, source: Source) -> InstrumentResult<()> {
        self.terminal
            .write(&format!(":SOUR:FUNC {}", source.as_str()))?;
        self.source = source;
        Ok(())
    }

    fn get_source(&mut self) -> InstrumentResult<Source> {
        let reply = self.terminal.query(":SOUR:FUNC?")?;
        let upper = reply.trim_matches('"').to_ascii_uppercase();
        if upper.starts_with("VOLT") {
            Ok(Source::Voltage)
        } else if upper.starts_with("CURR") {
            Ok(Source::Current)
        } else {
            Err(InstrumentError::InvalidResponse {
                command: ":SOUR:FUNC?".to_string(),
                response: reply,
            })
        }
    }

    fn set_bias(&mut self, value: f64) -> InstrumentResult<()> {
        if !value.is_finite() {
            return Err(InstrumentError::Incompatible(format!(
                "cannot source {value}"
            )));
        }
        self.terminal
            .write(&format!(":SOUR:{} {:e}", self.source.as_str(), value))
    }

    fn get_bias(&mut self) -> InstrumentResult<f64> {
        self.terminal
            .query_f64(&format!(":SOUR:{}?", self.source.as_str()))
    }
}

impl<P: Read + Write> IvMeter for ScpiSmu<P> {
    fn get_voltage(&mut self) -> InstrumentResult<f64> {
        self.terminal.query_f64(":MEAS:VOLT?")
    }

    fn get_current(&mut self) -> InstrumentResult<f64> {
        self.terminal.query_f64(":MEAS:CURR?")
    }

    fn prepare_raw_read(&mut self) -> InstrumentResult<()> {
        self.terminal.write(":SENS:AVER:STAT OFF")
    }
}
