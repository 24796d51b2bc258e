//! RS485 soil N/P/K probe speaking Modbus RTU.
//!
//! The probe keeps nitrogen, phosphorus and potassium (mg/kg) in three
//! consecutive holding registers starting at `0x001E`, so one
//! read-holding-registers transaction returns all three:
//!
//! ```text
//! request:  addr 03 00 1E 00 03 crc_lo crc_hi
//! response: addr 03 06 N_hi N_lo P_hi P_lo K_hi K_lo crc_lo crc_hi
//! ```

use thiserror::Error;

use crate::Nutrients;

const FUNCTION_READ_HOLDING: u8 = 0x03;
const FIRST_REGISTER: u16 = 0x001E;
const REGISTER_COUNT: u16 = 3;
const PAYLOAD_BYTES: u8 = (REGISTER_COUNT * 2) as u8;

/// Length of a well-formed response frame.
pub const RESPONSE_LEN: usize = 3 + PAYLOAD_BYTES as usize + 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame: {0} bytes")]
    Short(usize),
    #[error("reply from address {got}, expected {expected}")]
    Address { expected: u8, got: u8 },
    #[error("modbus exception code {0:#04x}")]
    Exception(u8),
    #[error("unexpected function {0:#04x}")]
    Function(u8),
    #[error("byte count {0}, expected 6")]
    ByteCount(u8),
    #[error("crc mismatch: frame {frame:#06x}, computed {computed:#06x}")]
    Crc { frame: u16, computed: u16 },
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= u16::from(b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// Build the read request for the probe at `address`.
pub fn request_frame(address: u8) -> [u8; 8] {
    let reg = FIRST_REGISTER.to_be_bytes();
    let count = REGISTER_COUNT.to_be_bytes();
    let mut frame = [
        address,
        FUNCTION_READ_HOLDING,
        reg[0],
        reg[1],
        count[0],
        count[1],
        0,
        0,
    ];
    let crc = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc[0];
    frame[7] = crc[1];
    frame
}

/// Validate a response frame and extract the three registers.
pub fn parse_response(address: u8, frame: &[u8]) -> Result<Nutrients, FrameError> {
    // Exception replies are 5 bytes: addr, fn|0x80, code, crc.
    if frame.len() >= 5 && frame[1] == FUNCTION_READ_HOLDING | 0x80 {
        check_crc(&frame[..5])?;
        return Err(FrameError::Exception(frame[2]));
    }
    if frame.len() < RESPONSE_LEN {
        return Err(FrameError::Short(frame.len()));
    }
    let frame = &frame[..RESPONSE_LEN];
    check_crc(frame)?;

    if frame[0] != address {
        return Err(FrameError::Address {
            expected: address,
            got: frame[0],
        });
    }
    if frame[1] != FUNCTION_READ_HOLDING {
        return Err(FrameError::Function(frame[1]));
    }
    if frame[2] != PAYLOAD_BYTES {
        return Err(FrameError::ByteCount(frame[2]));
    }

    let reg = |i: usize| u16::from_be_bytes([frame[3 + i * 2], frame[4 + i * 2]]);
    Ok(Nutrients {
        nitrogen: reg(0),
        phosphorus: reg(1),
        potassium: reg(2),
    })
}

fn check_crc(frame: &[u8]) -> Result<(), FrameError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let got = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if got == computed {
        Ok(())
    } else {
        Err(FrameError::Crc {
            frame: got,
            computed,
        })
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "npk")]
pub use driver::NpkProbe;

#[cfg(feature = "npk")]
mod driver {
    use rppal::uart::{Parity, Queue, Uart};
    use std::time::Duration;

    use super::{parse_response, request_frame, RESPONSE_LEN};
    use crate::{NutrientSensor, Nutrients};

    /// How long to wait for a complete reply before giving up.
    const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

    /// NPK probe on a UART (usually through a MAX485 transceiver).
    pub struct NpkProbe {
        uart: Uart,
        address: u8,
    }

    impl NpkProbe {
        pub fn open(path: &str, baud: u32, address: u8) -> anyhow::Result<Self> {
            let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1)?;
            uart.set_read_mode(RESPONSE_LEN as u8, REPLY_TIMEOUT)?;
            tracing::info!(path, baud, address, "npk probe opened");
            Ok(Self { uart, address })
        }
    }

    impl NutrientSensor for NpkProbe {
        fn read(&mut self) -> anyhow::Result<Nutrients> {
            self.uart.flush(Queue::Both)?;
            self.uart.write(&request_frame(self.address))?;

            let mut buf = [0u8; RESPONSE_LEN];
            let n = self.uart.read(&mut buf)?;
            Ok(parse_response(self.address, &buf[..n])?)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
