//! DLNA seek-range grammar: Normal Play Time values, byte ranges and the
//! composite `TimeSeekRange.dlna.org` header value.
//!
//! Parsing is pure and side-effect free. A failed parse returns an error;
//! it is up to the HTTP layer to decide whether that maps to a 400 or a 416.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid normal play time")]
    Npt,
    #[error("invalid bytes range")]
    BytesRange,
    #[error("invalid time seek range")]
    TimeSeek,
}

/// A Normal Play Time value.
///
/// The grammar is either a plain seconds count (`335` / `335.11`) or an
/// `hh:mm:ss` form (`00:05:35` / `00:05:35.3`), plus the two special
/// values `*` (unknown) and `now`. Minutes and seconds are capped at 59;
/// hours may be any non-negative number. The optional fraction is one to
/// three digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NptTime {
    /// `*`
    Unknown,
    /// `now`
    Now,
    Sec { sec: u64, millis: Option<u32> },
    Hhmmss {
        hh: u64,
        mm: u8,
        ss: u8,
        millis: Option<u32>,
    },
}

impl NptTime {
    pub const fn seconds(sec: u64) -> Self {
        NptTime::Sec { sec, millis: None }
    }

    /// Total length in microseconds, where one is defined. `Unknown` and
    /// `Now` have no fixed position on the timeline.
    pub fn as_micros(&self) -> Option<u64> {
        match *self {
            NptTime::Unknown | NptTime::Now => None,
            NptTime::Sec { sec, millis } => {
                Some(sec * 1_000_000 + u64::from(millis.unwrap_or(0)) * 1_000)
            }
            NptTime::Hhmmss { hh, mm, ss, millis } => {
                let secs = hh * 3600 + u64::from(mm) * 60 + u64::from(ss);
                Some(secs * 1_000_000 + u64::from(millis.unwrap_or(0)) * 1_000)
            }
        }
    }
}

/// One to three digits after the dot.
fn parse_frac(s: &str) -> Result<u32, RangeError> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Npt);
    }
    s.parse().map_err(|_| RangeError::Npt)
}

fn parse_dec<T: FromStr>(s: &str) -> Result<T, RangeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Npt);
    }
    s.parse().map_err(|_| RangeError::Npt)
}

impl FromStr for NptTime {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(NptTime::Unknown);
        }
        if s == "now" {
            return Ok(NptTime::Now);
        }

        if !s.contains(':') {
            // npt-sec representation.
            return match s.split_once('.') {
                Some((sec, frac)) => Ok(NptTime::Sec {
                    sec: parse_dec(sec)?,
                    millis: Some(parse_frac(frac)?),
                }),
                None => Ok(NptTime::Sec {
                    sec: parse_dec(s)?,
                    millis: None,
                }),
            };
        }

        // npt-hhmmss representation.
        let mut parts = s.splitn(3, ':');
        let (hh, mm, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(m), Some(r)) => (h, m, r),
            _ => return Err(RangeError::Npt),
        };
        let hh: u64 = parse_dec(hh)?;
        let mm: u8 = parse_dec(mm)?;
        let (ss, millis) = match rest.split_once('.') {
            Some((ss, frac)) => (parse_dec::<u8>(ss)?, Some(parse_frac(frac)?)),
            None => (parse_dec::<u8>(rest)?, None),
        };
        if mm > 59 || ss > 59 {
            return Err(RangeError::Npt);
        }
        Ok(NptTime::Hhmmss { hh, mm, ss, millis })
    }
}

impl fmt::Display for NptTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NptTime::Unknown => f.write_str("*"),
            NptTime::Now => f.write_str("now"),
            NptTime::Sec { sec, millis: None } => write!(f, "{sec}"),
            NptTime::Sec {
                sec,
                millis: Some(ms),
            } => write!(f, "{sec}.{ms}"),
            NptTime::Hhmmss {
                hh,
                mm,
                ss,
                millis: None,
            } => write!(f, "{hh}:{mm:02}:{ss:02}"),
            NptTime::Hhmmss {
                hh,
                mm,
                ss,
                millis: Some(ms),
            } => write!(f, "{hh}:{mm:02}:{ss:02}.{ms}"),
        }
    }
}

/// An HTTP `Range` value as constrained by DLNA media transport: a single
/// `bytes=first-` or `bytes=first-last` specifier. The `bytes` literal is
/// case-sensitive. Whether `first <= last` holds is not a grammar concern;
/// the file server decides satisfiability against the resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesRange {
    Open { first: u64 },
    Closed { first: u64, last: u64 },
}

impl BytesRange {
    pub fn first(&self) -> u64 {
        match *self {
            BytesRange::Open { first } | BytesRange::Closed { first, .. } => first,
        }
    }
}

impl FromStr for BytesRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.strip_prefix("bytes=").ok_or(RangeError::BytesRange)?;
        let (first, last) = spec.split_once('-').ok_or(RangeError::BytesRange)?;
        let first = parse_dec(first).map_err(|_| RangeError::BytesRange)?;
        if last.is_empty() {
            Ok(BytesRange::Open { first })
        } else {
            let last = parse_dec(last).map_err(|_| RangeError::BytesRange)?;
            Ok(BytesRange::Closed { first, last })
        }
    }
}

impl fmt::Display for BytesRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BytesRange::Open { first } => write!(f, "bytes={first}-"),
            BytesRange::Closed { first, last } => write!(f, "bytes={first}-{last}"),
        }
    }
}

/// The trailing bytes block of a TimeSeekRange: `bytes=first-last/length`
/// where length is either a byte count or `*` for unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsrBytes {
    pub first: u64,
    pub last: u64,
    /// `None` means the instance length is `*`.
    pub length: Option<u64>,
}

impl fmt::Display for TsrBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(len) => write!(f, "bytes={}-{}/{}", self.first, self.last, len),
            None => write!(f, "bytes={}-{}/*", self.first, self.last),
        }
    }
}

/// Which of the eight valid shapes a parsed TimeSeekRange has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsrKind {
    Npt,
    NptDuration,
    NptNpt,
    NptNptDuration,
    NptBytes,
    NptDurationBytes,
    NptNptBytes,
    NptNptDurationBytes,
}

/// A parsed `TimeSeekRange.dlna.org` value: an npt range with an optional
/// end, an optional `/`-instance-duration, and an optional trailing bytes
/// block. Mixed sec / hhmmss representations between start and end are
/// accepted, as the guidelines allow but discourage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeekRange {
    pub start: NptTime,
    pub end: Option<NptTime>,
    pub duration: Option<NptTime>,
    pub bytes: Option<TsrBytes>,
}

impl TimeSeekRange {
    pub fn kind(&self) -> TsrKind {
        match (self.end.is_some(), self.duration.is_some(), self.bytes.is_some()) {
            (false, false, false) => TsrKind::Npt,
            (false, true, false) => TsrKind::NptDuration,
            (true, false, false) => TsrKind::NptNpt,
            (true, true, false) => TsrKind::NptNptDuration,
            (false, false, true) => TsrKind::NptBytes,
            (false, true, true) => TsrKind::NptDurationBytes,
            (true, false, true) => TsrKind::NptNptBytes,
            (true, true, true) => TsrKind::NptNptDurationBytes,
        }
    }
}

fn parse_tsr_bytes(s: &str) -> Result<TsrBytes, RangeError> {
    let spec = s.strip_prefix("bytes=").ok_or(RangeError::TimeSeek)?;
    let (first, rest) = spec.split_once('-').ok_or(RangeError::TimeSeek)?;
    let (last, length) = rest.split_once('/').ok_or(RangeError::TimeSeek)?;
    let first = parse_dec(first).map_err(|_| RangeError::TimeSeek)?;
    let last = parse_dec(last).map_err(|_| RangeError::TimeSeek)?;
    let length = if length == "*" {
        None
    } else {
        Some(parse_dec(length).map_err(|_| RangeError::TimeSeek)?)
    };
    Ok(TsrBytes { first, last, length })
}

impl FromStr for TimeSeekRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The "npt" literal is case-sensitive.
        let s = s.strip_prefix("npt=").ok_or(RangeError::TimeSeek)?;

        let bytes_at = s.find("bytes=");
        let minus_at = s.find('-').ok_or(RangeError::TimeSeek)?;
        // The first '-' must belong to the npt range, not to a bytes block
        // (a lone "npt=310.1 bytes=1234-5678" is malformed).
        if let Some(b) = bytes_at {
            if minus_at >= b {
                return Err(RangeError::TimeSeek);
            }
        }

        let start: NptTime = s[..minus_at].parse().map_err(|_| RangeError::TimeSeek)?;
        let rest = &s[minus_at + 1..];

        let mut end = None;
        let mut duration = None;
        let mut bytes_part: Option<&str> = None;

        if rest.is_empty() {
            // npt=start-
        } else if let Some(after) = rest.strip_prefix('/') {
            // npt=start-/duration [bytes]
            let (dur, tail) = match after.split_once(' ') {
                Some((d, t)) => (d, Some(t)),
                None => (after, None),
            };
            duration = Some(dur.parse::<NptTime>().map_err(|_| RangeError::TimeSeek)?);
            bytes_part = tail;
        } else if let Some(tail) = rest.strip_prefix(' ') {
            // npt=start- bytes=...
            bytes_part = Some(tail);
        } else {
            // npt=start-end[/duration][ bytes]
            let end_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ':'))
                .unwrap_or(rest.len());
            if end_len == 0 {
                return Err(RangeError::TimeSeek);
            }
            end = Some(
                rest[..end_len]
                    .parse::<NptTime>()
                    .map_err(|_| RangeError::TimeSeek)?,
            );
            let mut tail = &rest[end_len..];
            if let Some(after) = tail.strip_prefix('/') {
                let (dur, t) = match after.split_once(' ') {
                    Some((d, t)) => (d, Some(t)),
                    None => (after, None),
                };
                duration = Some(dur.parse::<NptTime>().map_err(|_| RangeError::TimeSeek)?);
                tail = t.unwrap_or("");
            } else if let Some(after) = tail.strip_prefix(' ') {
                tail = after;
            } else if !tail.is_empty() {
                // Garbage between the npt range and the end of the value.
                return Err(RangeError::TimeSeek);
            } else {
                tail = "";
            }
            if !tail.is_empty() {
                bytes_part = Some(tail);
            }
        }

        let bytes = match bytes_part {
            Some(b) => Some(parse_tsr_bytes(b.trim_start())?),
            None => {
                // A bytes= substring that the walk above never consumed
                // means the value was malformed.
                if bytes_at.is_some() {
                    return Err(RangeError::TimeSeek);
                }
                None
            }
        };

        Ok(TimeSeekRange {
            start,
            end,
            duration,
            bytes,
        })
    }
}

impl fmt::Display for TimeSeekRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npt={}-", self.start)?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        if let Some(dur) = self.duration {
            write!(f, "/{dur}")?;
        }
        if let Some(bytes) = self.bytes {
            write!(f, " {bytes}")?;
        }
        Ok(())
    }
}
