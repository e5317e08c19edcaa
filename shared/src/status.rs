//! Status report payload
//!
//! The status object is rendered by hand into a fixed-capacity buffer so that
//! coordinates come out as fixed-point decimals and an oversize report is
//! truncated instead of overrunning the datagram.
//! ```text
//! {"stat":{"time":"2016-03-25 12:00:00 GMT","lati":52.00000,"long":6.00000,"alti":0,...}}
//! ```

use std::fmt;
use std::io::{self, Write};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{FULL_HEADER_LEN, STATUS_SIZE};

/// Largest status payload that fits a status datagram
pub const STATUS_PAYLOAD_CAPACITY: usize = STATUS_SIZE - FULL_HEADER_LEN;

/// Decimal places used for latitude and longitude
pub const COORDINATE_PLACES: u8 = 5;

/// A signed fixed-point decimal, rendered without float formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedDecimal {
    scaled: i64,
    places: u8,
}

impl FixedDecimal {
    /// `scaled` is the value multiplied by `10^places`
    pub const fn new(scaled: i64, places: u8) -> Self {
        Self { scaled, places }
    }

    /// Convert once, at configuration time
    pub fn from_f64(value: f64, places: u8) -> Self {
        let factor = 10f64.powi(i32::from(places));
        Self {
            scaled: (value * factor).round() as i64,
            places,
        }
    }

    /// Percentage `part / whole` with one decimal place, 0.0 when `whole` is 0
    pub fn ratio_percent(part: u64, whole: u64) -> Self {
        if whole == 0 {
            return Self::new(0, 1);
        }
        let permille = (u128::from(part) * 1000 / u128::from(whole)).min(i64::MAX as u128);
        Self::new(permille as i64, 1)
    }

    pub const fn scaled(&self) -> i64 {
        self.scaled
    }

    pub const fn places(&self) -> u8 {
        self.places
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.scaled < 0 { "-" } else { "" };
        let abs = self.scaled.unsigned_abs();
        if self.places == 0 {
            return write!(f, "{}{}", sign, abs);
        }
        let pow = 10u64.pow(u32::from(self.places));
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / pow,
            abs % pow,
            width = usize::from(self.places)
        )
    }
}

/// Values that make up one status report
#[derive(Debug, Clone)]
pub struct StatusFields<'a> {
    pub time: &'a str,
    pub latitude: FixedDecimal,
    pub longitude: FixedDecimal,
    pub altitude: i32,
    pub rx_received: u64,
    pub rx_valid: u64,
    pub forwarded: u64,
    pub ack_ratio: FixedDecimal,
    pub downlink_received: u64,
    pub downlink_transmitted: u64,
    pub platform: &'a str,
    pub email: &'a str,
    pub description: &'a str,
}

/// Outcome of rendering a status report
#[derive(Debug, Clone)]
pub struct RenderedStatus {
    pub payload: Bytes,
    /// Set when the report did not fit and was cut short
    pub truncated: bool,
}

/// Render a status report into at most `capacity` bytes
pub fn render_status(fields: &StatusFields<'_>, capacity: usize) -> RenderedStatus {
    let mut writer = BoundedWriter::new(capacity);
    if write_status(&mut writer, fields).is_err() {
        writer.truncated = true;
    }
    writer.finish()
}

fn write_status(w: &mut BoundedWriter, s: &StatusFields<'_>) -> io::Result<()> {
    w.write_all(b"{\"stat\":{\"time\":")?;
    serde_json::to_writer(&mut *w, s.time)?;
    write!(
        w,
        ",\"lati\":{},\"long\":{},\"alti\":{},\"rxnb\":{},\"rxok\":{},\"rxfw\":{},\"ackr\":{},\"dwnb\":{},\"txnb\":{}",
        s.latitude,
        s.longitude,
        s.altitude,
        s.rx_received,
        s.rx_valid,
        s.forwarded,
        s.ack_ratio,
        s.downlink_received,
        s.downlink_transmitted,
    )?;
    w.write_all(b",\"pfrm\":")?;
    serde_json::to_writer(&mut *w, s.platform)?;
    w.write_all(b",\"mail\":")?;
    serde_json::to_writer(&mut *w, s.email)?;
    w.write_all(b",\"desc\":")?;
    serde_json::to_writer(&mut *w, s.description)?;
    w.write_all(b"}}")
}

/// `io::Write` sink that never grows past its capacity
struct BoundedWriter {
    buf: BytesMut,
    capacity: usize,
    truncated: bool,
}

impl BoundedWriter {
    fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            truncated: false,
        }
    }

    fn finish(mut self) -> RenderedStatus {
        if self.truncated {
            // Drop a multi-byte character split by the cut
            if let Err(e) = std::str::from_utf8(&self.buf) {
                self.buf.truncate(e.valid_up_to());
            }
        }
        RenderedStatus {
            payload: self.buf.freeze(),
            truncated: self.truncated,
        }
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let room = self.capacity - self.buf.len();
        if room == 0 {
            self.truncated = true;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "status buffer full"));
        }
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if n < data.len() {
            self.truncated = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wrapper object as sent on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub stat: StatusReport,
}

/// Parsed status report, as seen by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub time: String,
    #[serde(default)]
    pub lati: f64,
    #[serde(default)]
    pub long: f64,
    #[serde(default)]
    pub alti: i32,
    #[serde(default)]
    pub rxnb: u64,
    #[serde(default)]
    pub rxok: u64,
    #[serde(default)]
    pub rxfw: u64,
    #[serde(default)]
    pub ackr: f64,
    #[serde(default)]
    pub dwnb: u64,
    #[serde(default)]
    pub txnb: u64,
    #[serde(default)]
    pub pfrm: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub desc: String,
}

/// Parse a PUSH_DATA payload as a status report
pub fn parse_status(payload: &[u8]) -> Result<StatusReport, serde_json::Error> {
    serde_json::from_slice::<StatusEnvelope>(payload).map(|env| env.stat)
}
