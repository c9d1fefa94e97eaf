use chrono::{DateTime, Duration, Utc};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

const ALPHA_NUM: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A seeded, non-cryptographic pseudo-random generator for test fixtures.
///
/// Two generators created from the same seed produce identical sequences of
/// draws. Every draw mutates internal state, so a single instance must not be
/// shared between workers without external synchronization.
///
/// Never use this for anything security-sensitive.
#[derive(Debug, Clone)]
pub struct Random {
    rng: ChaCha8Rng,
    /// Last word drawn for the byte stream; its final `tail_len` bytes are unread.
    tail: [u8; 8],
    tail_len: usize,
}

impl Random {
    /// Creates a generator from an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            tail: [0; 8],
            tail_len: 0,
        }
    }

    /// Creates a generator seeded from the current system time.
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::new(nanos)
    }

    /// Returns a non-negative 63-bit integer.
    pub fn int(&mut self) -> i64 {
        (self.rng.next_u64() >> 1) as i64
    }

    /// Returns `int() % n` as an index; `n` must be non-zero.
    pub(crate) fn index(&mut self, n: usize) -> usize {
        (self.int() % n as i64) as usize
    }

    /// Returns a string of `length` characters drawn from `[0-9a-zA-Z]`.
    pub fn alpha_string(&mut self, length: usize) -> String {
        (0..length)
            .map(|_| ALPHA_NUM[self.index(ALPHA_NUM.len())] as char)
            .collect()
    }

    /// Returns a timestamp strictly in the future: now plus a random non-negative
    /// offset of up to `i64::MAX` nanoseconds.
    pub fn date(&mut self) -> DateTime<Utc> {
        Utc::now() + Duration::nanoseconds(self.int())
    }

    /// Returns a timestamp in `[after, before)`.
    ///
    /// # Panics
    /// Panics if `before` is not strictly after `after`. This is a programming
    /// error in the fixture, not a runtime condition.
    pub fn date_in(&mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> DateTime<Utc> {
        let span = (before - after).num_nanoseconds().unwrap_or(i64::MAX);
        if span <= 0 {
            panic!("s3fuzz: 'before' cannot be in the past or present of 'after'");
        }
        after + Duration::nanoseconds(self.int() % span)
    }

    /// Returns `n` random bytes.
    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut data = vec![0u8; n];
        self.read_exact(&mut data);
        data
    }

    /// Fills `buf` completely from the byte stream.
    ///
    /// # Panics
    /// Panics if the stream cannot supply `buf.len()` bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) {
        if let Err(e) = std::io::Read::read_exact(self, buf) {
            panic!("s3fuzz: ran out of randomness: {e}");
        }
    }

    /// Serves bytes left over from the previous word first, so consecutive reads
    /// concatenate to the same stream as one large read.
    fn fill_from_stream(&mut self, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            if self.tail_len == 0 {
                self.tail = self.rng.next_u64().to_le_bytes();
                self.tail_len = self.tail.len();
            }
            let start = self.tail.len() - self.tail_len;
            let n = self.tail_len.min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.tail[start..start + n]);
            self.tail_len -= n;
            filled += n;
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::from_time()
    }
}

impl RngCore for Random {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.fill_from_stream(dst)
    }
}

impl std::io::Read for Random {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.fill_from_stream(buf);
        Ok(buf.len())
    }
}
