//! Test utilities for nzbstream
//!
//! Byte-level builders for the archive layouts the ingest path has to
//! understand, plus helpers for chopping files into article-sized
//! segments and an in-memory article server. Builders only emit headers
//! the parsers read; CRC fields are left zero.

pub mod articles;
pub mod rar;
pub mod segments;
pub mod sevenzip;

/// EBML magic that opens every Matroska file
pub const MKV_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Install a test-writer subscriber honouring `RUST_LOG`
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic filler bytes, distinct per `seed`
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Fake Matroska payload: EBML magic followed by patterned bytes
pub fn fake_mkv(len: usize, seed: u8) -> Vec<u8> {
    let mut data = pattern(len, seed);
    let magic_len = MKV_MAGIC.len().min(len);
    data[..magic_len].copy_from_slice(&MKV_MAGIC[..magic_len]);
    data
}
