//! Fixed-width values stored in leaves.

use std::str::FromStr;

/// A value with a fixed encoded width.
pub trait FixedValue: Copy + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the value into `out`, which is exactly `SIZE` bytes long.
    fn write_to(&self, out: &mut [u8]);

    /// Read a value from `bytes`, which is exactly `SIZE` bytes long.
    fn read_from(bytes: &[u8]) -> Self;
}

/// Locator of a record: the cluster it lives in and its position there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub cluster_id: u16,
    pub position: u64,
}

impl RecordId {
    #[must_use]
    pub const fn new(cluster_id: u16, position: u64) -> Self {
        Self {
            cluster_id,
            position,
        }
    }
}

impl FixedValue for RecordId {
    const SIZE: usize = 10;

    fn write_to(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.cluster_id.to_le_bytes());
        out[2..10].copy_from_slice(&self.position.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut cluster = [0u8; 2];
        cluster.copy_from_slice(&bytes[..2]);
        let mut position = [0u8; 8];
        position.copy_from_slice(&bytes[2..10]);
        Self {
            cluster_id: u16::from_le_bytes(cluster),
            position: u64::from_le_bytes(position),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.cluster_id, self.position)
    }
}

impl FromStr for RecordId {
    type Err = String;

    /// Parse `cluster:position`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cluster, position) = s
            .split_once(':')
            .ok_or_else(|| format!("'{s}' is not of the form cluster:position"))?;
        let cluster_id = cluster
            .parse()
            .map_err(|_| format!("'{cluster}' is not a valid cluster id (0-65535)"))?;
        let position = position
            .parse()
            .map_err(|_| format!("'{position}' is not a valid position"))?;
        Ok(Self::new(cluster_id, position))
    }
}

impl FixedValue for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Self::from_le_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_bytes() {
        let rid = RecordId::new(31_999, 0x0102_0304_0506_0708);
        let mut buf = [0u8; RecordId::SIZE];
        rid.write_to(&mut buf);
        assert_eq!(&buf[..2], &31_999u16.to_le_bytes());
        assert_eq!(RecordId::read_from(&buf), rid);
    }

    #[test]
    fn test_record_id_parse_and_display() {
        let rid: RecordId = "12:345".parse().expect("parse");
        assert_eq!(rid, RecordId::new(12, 345));
        assert_eq!(rid.to_string(), "12:345");

        assert!("12".parse::<RecordId>().is_err());
        assert!("70000:1".parse::<RecordId>().is_err());
        assert!("1:-5".parse::<RecordId>().is_err());
    }
}
