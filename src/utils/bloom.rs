//! Bit-array bloom filter with a self-describing binary encoding.
//!
//! Layout: `b"SKBF"` | bit count (u64 LE) | hash count (u32 LE) | bit bytes | md5 of everything before.

use thiserror::Error;

const MAGIC: &[u8; 4] = b"SKBF";
const HEADER_LEN: usize = 4 + 8 + 4;
const CHECKSUM_LEN: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BloomDecodeError {
    #[error("payload too short ({0} bytes)")]
    Truncated(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("bit array length does not match header")]
    LengthMismatch,
}

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// 根据预计元素数 n 与误判率 p 计算位数组大小和哈希次数
    pub fn with_estimates(expected_items: u64, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    // 双重哈希：h1 + i * h2
    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let digest = md5::compute(item.as_bytes());
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&digest.0[..8]);
        hi.copy_from_slice(&digest.0[8..]);
        let h1 = u64::from_le_bytes(lo);
        let h2 = u64::from_le_bytes(hi) | 1;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn add(&mut self, item: &str) {
        let positions: Vec<u64> = self.positions(item).collect();
        for pos in positions {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.positions(item)
            .all(|pos| self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0)
    }

    pub fn add_id(&mut self, id: i64) {
        self.add(&id.to_string());
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.contains(&id.to_string())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len() + CHECKSUM_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&self.bits);
        let checksum = md5::compute(&out);
        out.extend_from_slice(&checksum.0);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, BloomDecodeError> {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(BloomDecodeError::Truncated(data.len()));
        }
        let (body, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
        if &body[..4] != MAGIC {
            return Err(BloomDecodeError::BadMagic);
        }
        if checksum != md5::compute(body).0.as_slice() {
            return Err(BloomDecodeError::ChecksumMismatch);
        }

        let mut num_bits = [0u8; 8];
        num_bits.copy_from_slice(&body[4..12]);
        let num_bits = u64::from_le_bytes(num_bits);
        let mut num_hashes = [0u8; 4];
        num_hashes.copy_from_slice(&body[12..16]);
        let num_hashes = u32::from_le_bytes(num_hashes);

        let bits = body[HEADER_LEN..].to_vec();
        if num_bits == 0 || num_hashes == 0 || bits.len() as u64 != num_bits.div_ceil(8) {
            return Err(BloomDecodeError::LengthMismatch);
        }
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::with_estimates(1_000, 0.01);
        for id in 1..=1_000 {
            filter.add_id(id);
        }
        assert!((1..=1_000).all(|id| filter.contains_id(id)));
    }

    #[test]
    fn test_false_positive_rate_is_near_target() {
        let mut filter = BloomFilter::with_estimates(1_000, 0.01);
        for id in 1..=1_000 {
            filter.add_id(id);
        }
        let false_positives = (100_000..110_000).filter(|id| filter.contains_id(*id)).count();
        // 目标 1%，给足余量
        assert!(false_positives < 300, "false positives: {false_positives}");
    }

    #[test]
    fn test_bytes_survive_reload() {
        let mut filter = BloomFilter::with_estimates(100, 0.01);
        filter.add_id(42);
        let restored = BloomFilter::from_bytes(&filter.to_bytes()).unwrap();
        assert!(restored.contains_id(42));
        assert_eq!(restored.num_hashes(), filter.num_hashes());
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut filter = BloomFilter::with_estimates(100, 0.01);
        filter.add_id(42);
        let mut bytes = filter.to_bytes();
        bytes[HEADER_LEN] ^= 0xff;
        assert_eq!(
            BloomFilter::from_bytes(&bytes).unwrap_err(),
            BloomDecodeError::ChecksumMismatch
        );
        assert_eq!(
            BloomFilter::from_bytes(&bytes[..10]).unwrap_err(),
            BloomDecodeError::Truncated(10)
        );
    }
}
