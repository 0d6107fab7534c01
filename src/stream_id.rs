//! Stream IDs and offset arithmetic.
//!
//! Every event appended to a stream gets an ID of the form
//! `<ms-timestamp>-<seq>`, where `seq` disambiguates sub-millisecond
//! appends. Order by `(ms, seq)` matches append order within one stream
//! key.
//!
//! Cursor advancement is the most load-bearing invariant in the system:
//! after delivering an event, the next read MUST start from
//! [`StreamId::next`] of the delivered ID. Passing the delivered ID itself
//! re-reads the same event on every poll, forever.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Position of one event within a stream. Ordered by `(ms, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// Synthetic zero sentinel. No real event carries this ID, so an
    /// exclusive read from here returns the whole stream.
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest ID strictly greater than `self`: `t-s` becomes
    /// `t-(s+1)`. Callers resume reads from here to avoid redelivery.
    pub fn next(self) -> StreamId {
        StreamId {
            ms: self.ms,
            seq: self.seq + 1,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| StreamIdError::Malformed(s.to_string()))?;
        let ms = ms
            .parse::<u64>()
            .map_err(|_| StreamIdError::Malformed(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| StreamIdError::Malformed(s.to_string()))?;
        Ok(StreamId { ms, seq })
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StreamIdError {
    #[error("malformed stream id: {0:?} (expected <ms>-<seq>)")]
    Malformed(String),
}

/// A caller-supplied position in a stream: the zero sentinel `"0"`, a
/// concrete ID, or the unbounded upper end `"+"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    Start,
    At(StreamId),
    End,
}

impl Offset {
    pub fn parse(s: &str) -> Result<Offset, StreamIdError> {
        match s {
            "0" => Ok(Offset::Start),
            "+" => Ok(Offset::End),
            other => other.parse().map(Offset::At),
        }
    }

    /// Exclusive lower bound for a read starting at this offset.
    pub fn lower_bound(self) -> StreamId {
        match self {
            Offset::Start => StreamId::ZERO,
            Offset::At(id) => id,
            Offset::End => StreamId::new(u64::MAX, u64::MAX),
        }
    }

    /// Whether `id` falls under this offset as an inclusive upper bound.
    pub fn admits(self, id: StreamId) -> bool {
        match self {
            Offset::Start => false,
            Offset::At(bound) => id <= bound,
            Offset::End => true,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Start => write!(f, "0"),
            Offset::At(id) => write!(f, "{id}"),
            Offset::End => write!(f, "+"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_roundtrip() {
        let id: StreamId = "1750390637123-4".parse().unwrap();
        assert_eq!(id, StreamId::new(1_750_390_637_123, 4));
        assert_eq!(id.to_string(), "1750390637123-4");
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        for bad in ["", "123", "-", "12-", "-3", "a-1", "1-b", "1-2-3", "1.5-0"] {
            assert!(bad.parse::<StreamId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn next_bumps_sequence_only() {
        let id = StreamId::new(1000, 7);
        assert_eq!(id.next(), StreamId::new(1000, 8));
        assert_eq!(id.next().to_string(), "1000-8");
    }

    #[test]
    fn next_is_strictly_greater_and_minimal() {
        let id = StreamId::new(42, 0);
        let next = id.next();
        assert!(next > id);
        // Nothing fits between id and next within the same millisecond.
        assert_eq!(next.ms, id.ms);
        assert_eq!(next.seq, id.seq + 1);
    }

    #[test]
    fn ordering_is_ms_then_seq() {
        let a = StreamId::new(1, 9);
        let b = StreamId::new(2, 0);
        let c = StreamId::new(2, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(StreamId::ZERO < a);
    }

    #[test]
    fn offset_parse_sentinels() {
        assert_eq!(Offset::parse("0").unwrap(), Offset::Start);
        assert_eq!(Offset::parse("+").unwrap(), Offset::End);
        assert_eq!(
            Offset::parse("10-2").unwrap(),
            Offset::At(StreamId::new(10, 2))
        );
        assert!(Offset::parse("latest").is_err());
        assert!(Offset::parse("").is_err());
    }

    #[test]
    fn offset_bounds() {
        let id = StreamId::new(5, 5);
        assert_eq!(Offset::Start.lower_bound(), StreamId::ZERO);
        assert_eq!(Offset::At(id).lower_bound(), id);
        assert!(Offset::End.admits(StreamId::new(u64::MAX, 0)));
        assert!(Offset::At(id).admits(id));
        assert!(!Offset::At(id).admits(id.next()));
        assert!(!Offset::Start.admits(StreamId::ZERO));
    }

    #[test]
    fn serde_uses_the_wire_string() {
        let id = StreamId::new(1700000000000, 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1700000000000-3\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
