//! The encryptor (spec §4.4): per-sample AES-CTR/CBC across the four
//! common-encryption schemes, subsample clear/cipher partitioning and
//! periodic key rotation.
//!
//! Pattern schemes (`cens`/`cbcs`) need per-16-byte-block control that
//! stream/block-mode crate wrappers don't expose cleanly — the skip
//! blocks still have to advance the CTR counter (or be excluded from CBC
//! chaining) without being written to — so this operates directly on the
//! `aes` crate's single-block cipher rather than the `ctr`/`cbc` block-mode
//! crates.

use crate::config::{CryptoParams, ProtectionScheme};
use crate::error::{PackagerError, Result};
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::{DecryptConfig, MediaSample, SubsampleEntry};
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use aes::cipher::generic_array::GenericArray;

const BLOCK_SIZE: usize = 16;

/// A content key together with the key-id that identifies it in the
/// manifest (`tenc`'s default-key-id, `senc`, and `OnEncryptionStart`).
#[derive(Debug, Clone, Copy)]
pub struct EncryptionKey {
    pub key: [u8; 16],
    pub key_id: [u8; 16],
}

/// Supplies keys and per-system pssh payloads. Key sources themselves
/// (raw, Widevine, PlayReady, HTTP fetch) are external collaborators per
/// spec §1; this is the narrow contract the encryptor calls.
pub trait KeySource: Send {
    fn key_for_period(&self, period_index: i64) -> Result<EncryptionKey>;
}

/// A `KeySource` that always returns the same key and key-id, used in
/// tests and for content that never rotates keys.
pub struct FixedKeySource {
    pub key: [u8; 16],
    pub key_id: [u8; 16],
}

impl KeySource for FixedKeySource {
    fn key_for_period(&self, _period_index: i64) -> Result<EncryptionKey> {
        Ok(EncryptionKey { key: self.key, key_id: self.key_id })
    }
}

/// Encrypts each incoming `MediaSample` payload in place according to the
/// stream's `EncryptionConfig`, using the subsample partition the sample
/// already carries (produced upstream by a codec-aware subsample
/// annotator this core does not implement — spec §1).
pub struct Encryptor {
    params: CryptoParams,
    key_source: Box<dyn KeySource>,
    time_scale: u32,
    current_period: i64,
    current_key: Option<EncryptionKey>,
    pending_switch_key: Option<(i64, EncryptionKey)>,
    /// Monotonic counter backing per-sample IV generation; unused when
    /// `params.constant_iv` is set.
    sample_counter: u64,
}

impl Encryptor {
    pub fn new(params: CryptoParams, key_source: Box<dyn KeySource>) -> Self {
        Self {
            params,
            key_source,
            time_scale: 1,
            current_period: -1,
            current_key: None,
            pending_switch_key: None,
            sample_counter: 0,
        }
    }

    fn period_index(&self, pts: i64) -> i64 {
        if self.params.crypto_period_duration_in_seconds <= 0.0 {
            return 0;
        }
        let period_ticks =
            (self.params.crypto_period_duration_in_seconds * self.time_scale as f64).round() as i64;
        if period_ticks <= 0 {
            return 0;
        }
        pts.div_euclid(period_ticks)
    }

    /// Key rotation (spec §4.4): a key change must coincide with a SAP;
    /// if the sample at the new period boundary isn't one, delay the
    /// switch to the next SAP.
    fn key_for(&mut self, pts: i64, is_key_frame: bool) -> Result<EncryptionKey> {
        if self.current_key.is_none() {
            let key = self.key_source.key_for_period(0)?;
            self.current_key = Some(key);
            self.current_period = 0;
            return Ok(key);
        }

        let wanted_period = self.period_index(pts);
        if wanted_period != self.current_period {
            if is_key_frame {
                let key = self.key_source.key_for_period(wanted_period)?;
                self.current_key = Some(key);
                self.current_period = wanted_period;
                self.pending_switch_key = None;
            } else if self.pending_switch_key.is_none() {
                let key = self.key_source.key_for_period(wanted_period)?;
                self.pending_switch_key = Some((wanted_period, key));
            }
        }
        Ok(self.current_key.unwrap())
    }

    fn apply_pending_switch(&mut self, is_key_frame: bool) {
        if is_key_frame {
            if let Some((period, key)) = self.pending_switch_key.take() {
                self.current_key = Some(key);
                self.current_period = period;
            }
        }
    }

    /// Next IV to use for an outgoing sample: the configured constant IV
    /// if any, otherwise a fresh IV derived from the monotonic per-sample
    /// counter (a faithful encryptor never reuses an IV under the same
    /// key for CTR-mode schemes).
    fn next_iv(&mut self) -> Vec<u8> {
        if let Some(constant) = &self.params.constant_iv {
            return constant.clone();
        }
        let iv = iv_from_counter(self.params.per_sample_iv_size, self.sample_counter);
        self.sample_counter = self.sample_counter.wrapping_add(1);
        iv
    }
}

/// Builds a `size`-byte (8 or 16) IV with `counter` placed in its
/// trailing 8 bytes, big-endian, front-padded with zeros.
fn iv_from_counter(size: u8, counter: u64) -> Vec<u8> {
    let size = if size == 0 { 8 } else { size as usize };
    let mut iv = vec![0u8; size];
    let counter_bytes = counter.to_be_bytes();
    let tail = size.min(8);
    iv[size - tail..].copy_from_slice(&counter_bytes[8 - tail..]);
    iv
}

impl Handler for Encryptor {
    fn process(&mut self, _input_port: PortIndex, record: Record, dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                self.time_scale = info.time_scale;
                dispatch.dispatch(0, Record::StreamInfo(info))
            }
            Record::MediaSample(mut sample) => {
                self.apply_pending_switch(sample.is_key_frame);
                let key = self.key_for(sample.pts, sample.is_key_frame)?;
                let subsamples = default_whole_sample_subsamples(&sample);
                let iv = self.next_iv();
                let decrypt_config = encrypt_sample_in_place(
                    &mut sample,
                    &key.key,
                    &key.key_id,
                    iv,
                    &self.params,
                    &subsamples,
                )?;
                sample.decrypt_config = Some(decrypt_config);
                dispatch.dispatch(0, Record::MediaSample(sample))
            }
            other => dispatch.dispatch(0, other),
        }
    }

    fn flush(&mut self, _input_port: PortIndex, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        Ok(())
    }
}

/// A sample with no subsample annotation from upstream is treated as one
/// fully-ciphered subsample, i.e. the whole payload is cipher bytes.
fn default_whole_sample_subsamples(sample: &MediaSample) -> Vec<SubsampleEntry> {
    if let Some(cfg) = &sample.decrypt_config {
        if !cfg.subsamples.is_empty() {
            return cfg.subsamples.clone();
        }
    }
    vec![SubsampleEntry { clear_bytes: 0, cipher_bytes: sample.payload.len() as u32 }]
}

fn full_iv(iv: &[u8]) -> [u8; 16] {
    let mut full = [0u8; 16];
    full[..iv.len()].copy_from_slice(iv);
    full
}

/// Minimal CTR-mode block counter: increments the big-endian 128-bit
/// counter by one per 16-byte block, whether or not that block ends up
/// written back (pattern-skipped blocks still consume a counter value).
struct CtrCounter {
    cipher: Aes128,
    counter: u128,
}

impl CtrCounter {
    fn new(key: &[u8; 16], iv: [u8; 16]) -> Self {
        Self { cipher: Aes128::new(GenericArray::from_slice(key)), counter: u128::from_be_bytes(iv) }
    }

    /// XORs one 16-byte (or shorter, final-partial) block with the next
    /// keystream block and advances the counter.
    fn apply_block(&mut self, block: &mut [u8]) {
        let mut keystream = GenericArray::clone_from_slice(&self.counter.to_be_bytes());
        self.cipher.encrypt_block(&mut keystream);
        for (b, k) in block.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
        self.counter = self.counter.wrapping_add(1);
    }

    /// Advances the counter without touching any bytes, used to keep the
    /// keystream in sync across pattern-skipped blocks.
    fn skip_block(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }
}

/// Minimal CBC-mode chain: encrypts in place using the block cipher
/// directly so pattern-skipped blocks can be excluded from the chain
/// (the chain continues from the last *encrypted* block's ciphertext).
struct CbcChain {
    cipher: Aes128,
    prev: GenericArray<u8, aes::cipher::generic_array::typenum::U16>,
}

impl CbcChain {
    fn new(key: &[u8; 16], iv: [u8; 16]) -> Self {
        Self { cipher: Aes128::new(GenericArray::from_slice(key)), prev: GenericArray::clone_from_slice(&iv) }
    }

    fn encrypt_block(&mut self, block: &mut [u8]) {
        let mut buf = GenericArray::clone_from_slice(block);
        for i in 0..BLOCK_SIZE {
            buf[i] ^= self.prev[i];
        }
        self.cipher.encrypt_block(&mut buf);
        block.copy_from_slice(&buf);
        self.prev = buf;
    }

    fn decrypt_block(&mut self, block: &mut [u8]) {
        use aes::cipher::BlockDecrypt;
        let original_cipher = GenericArray::clone_from_slice(block);
        let mut buf = original_cipher;
        self.cipher.decrypt_block(&mut buf);
        for i in 0..BLOCK_SIZE {
            buf[i] ^= self.prev[i];
        }
        block.copy_from_slice(&buf);
        self.prev = original_cipher;
    }
}

/// Encrypts `sample.payload` in place per the scheme matrix in spec §4.4
/// and returns the `DecryptConfig` describing how to reverse it.
pub fn encrypt_sample_in_place(
    sample: &mut MediaSample,
    key: &[u8; 16],
    key_id: &[u8; 16],
    iv: Vec<u8>,
    params: &CryptoParams,
    subsamples: &[SubsampleEntry],
) -> Result<DecryptConfig> {
    let total: u64 = subsamples.iter().map(|s| (s.clear_bytes + s.cipher_bytes) as u64).sum();
    if total != sample.payload.len() as u64 {
        return Err(PackagerError::EncryptionFailure(format!(
            "subsample size mismatch: subsamples sum to {total}, payload is {}",
            sample.payload.len()
        )));
    }

    let full = full_iv(&iv);

    // One cipher-mode state per sample: chaining/counter continuation
    // spans the whole sample's cipher subsamples (clear subsamples are
    // skipped entirely, never touching the counter/chain — only bytes
    // *inside* a cipher subsample's skip pattern do that).
    let mut ctr = if !params.protection_scheme.is_cbc() { Some(CtrCounter::new(key, full)) } else { None };
    let mut cbc = if params.protection_scheme.is_cbc() { Some(CbcChain::new(key, full)) } else { None };

    let mut offset = 0usize;
    for sub in subsamples {
        offset += sub.clear_bytes as usize;
        let cipher_region = &mut sample.payload[offset..offset + sub.cipher_bytes as usize];
        walk_region(cipher_region, params, ctr.as_mut(), cbc.as_mut(), true);
        offset += sub.cipher_bytes as usize;
    }

    Ok(DecryptConfig {
        key_id: *key_id,
        iv,
        subsamples: subsamples.to_vec(),
        scheme: params.protection_scheme,
        crypt_byte_block: params.crypt_byte_block,
        skip_byte_block: params.skip_byte_block,
    })
}

/// Reverses `encrypt_sample_in_place` given the same key and
/// `DecryptConfig`; used to verify the round-trip invariant (spec §8,
/// invariant 9).
pub fn decrypt_sample_in_place(payload: &mut [u8], key: &[u8; 16], config: &DecryptConfig) -> Result<()> {
    let params = CryptoParams {
        protection_scheme: config.scheme,
        crypt_byte_block: config.crypt_byte_block,
        skip_byte_block: config.skip_byte_block,
        ..Default::default()
    };
    let full = full_iv(&config.iv);
    let mut ctr = if !params.protection_scheme.is_cbc() { Some(CtrCounter::new(key, full)) } else { None };
    let mut cbc = if params.protection_scheme.is_cbc() { Some(CbcChain::new(key, full)) } else { None };

    let mut offset = 0usize;
    for sub in &config.subsamples {
        offset += sub.clear_bytes as usize;
        let region = &mut payload[offset..offset + sub.cipher_bytes as usize];
        walk_region(region, &params, ctr.as_mut(), cbc.as_mut(), false);
        offset += sub.cipher_bytes as usize;
    }
    Ok(())
}

/// Walks one cipher subsample's bytes in 16-byte blocks, applying the
/// crypt:skip pattern for `cens`/`cbcs` and encrypting every block for
/// `cenc`/`cbc1`. CTR is its own inverse; CBC needs a separate decrypt
/// path hence the `encrypting` flag.
fn walk_region(
    region: &mut [u8],
    params: &CryptoParams,
    mut ctr: Option<&mut CtrCounter>,
    mut cbc: Option<&mut CbcChain>,
    encrypting: bool,
) {
    let pattern = params.protection_scheme.is_pattern_based();
    let crypt_blocks = params.crypt_byte_block as usize;
    let skip_blocks = params.skip_byte_block as usize;

    let mut pos = 0usize;
    let mut block_in_run = 0usize;
    while pos < region.len() {
        let remaining = region.len() - pos;
        let this_block = remaining.min(BLOCK_SIZE);
        let in_crypt_portion = !pattern || (crypt_blocks > 0 && block_in_run < crypt_blocks);
        let full_block = this_block == BLOCK_SIZE;

        if in_crypt_portion && full_block {
            if let Some(ctr) = ctr.as_mut() {
                ctr.apply_block(&mut region[pos..pos + BLOCK_SIZE]);
            } else if let Some(cbc) = cbc.as_mut() {
                if encrypting {
                    cbc.encrypt_block(&mut region[pos..pos + BLOCK_SIZE]);
                } else {
                    cbc.decrypt_block(&mut region[pos..pos + BLOCK_SIZE]);
                }
            }
        } else if in_crypt_portion && !full_block {
            // Trailing partial block at the very end of the subsample:
            // always left clear (spec §4.4, §8 invariant 5), and the
            // stream counter does not need to advance further since
            // nothing follows it.
        } else if let Some(ctr) = ctr.as_mut() {
            // Skip block under a pattern scheme: keystream still advances.
            ctr.skip_block();
        }
        // CBC chaining simply doesn't advance across skip blocks: the
        // next encrypted block chains from the last *encrypted*
        // ciphertext, which `CbcChain` already does by only updating
        // `prev` inside `encrypt_block`/`decrypt_block`.

        pos += this_block;
        block_in_run += 1;
        if pattern && block_in_run >= crypt_blocks + skip_blocks {
            block_in_run = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>, pts: i64, key_frame: bool) -> MediaSample {
        MediaSample {
            stream_index: 0,
            dts: pts,
            pts,
            duration: 1,
            is_key_frame: key_frame,
            side_data: Vec::new(),
            payload,
            decrypt_config: None,
        }
    }

    #[test]
    fn cenc_round_trips() {
        let key = [7u8; 16];
        let key_id = [2u8; 16];
        let params = CryptoParams { protection_scheme: ProtectionScheme::Cenc, ..Default::default() };
        let mut s = sample(vec![1u8; 48], 0, true);
        let original = s.payload.clone();
        let subs = default_whole_sample_subsamples(&s);
        let iv = iv_from_counter(params.per_sample_iv_size, 42);
        let cfg = encrypt_sample_in_place(&mut s, &key, &key_id, iv, &params, &subs).unwrap();
        assert_ne!(s.payload, original);
        assert_eq!(cfg.key_id, key_id);
        decrypt_sample_in_place(&mut s.payload, &key, &cfg).unwrap();
        assert_eq!(s.payload, original);
    }

    #[test]
    fn distinct_samples_get_distinct_ivs() {
        let key = [7u8; 16];
        let key_id = [2u8; 16];
        let params = CryptoParams { protection_scheme: ProtectionScheme::Cenc, ..Default::default() };
        let iv_a = iv_from_counter(params.per_sample_iv_size, 0);
        let iv_b = iv_from_counter(params.per_sample_iv_size, 1);
        assert_ne!(iv_a, iv_b);

        let mut sample_a = sample(vec![1u8; 16], 0, true);
        let mut sample_b = sample(vec![1u8; 16], 1, true);
        let subs_a = default_whole_sample_subsamples(&sample_a);
        let subs_b = default_whole_sample_subsamples(&sample_b);
        encrypt_sample_in_place(&mut sample_a, &key, &key_id, iv_a, &params, &subs_a).unwrap();
        encrypt_sample_in_place(&mut sample_b, &key, &key_id, iv_b, &params, &subs_b).unwrap();
        assert_ne!(sample_a.payload, sample_b.payload);
    }

    #[test]
    fn cbcs_round_trips() {
        let key = [9u8; 16];
        let key_id = [4u8; 16];
        let params = CryptoParams {
            protection_scheme: ProtectionScheme::Cbcs,
            crypt_byte_block: 1,
            skip_byte_block: 9,
            constant_iv: Some(vec![0u8; BLOCK_SIZE]),
            ..Default::default()
        };
        let mut s = sample(vec![3u8; 32 * BLOCK_SIZE], 0, true);
        let original = s.payload.clone();
        let subs = vec![SubsampleEntry { clear_bytes: 0, cipher_bytes: s.payload.len() as u32 }];
        let iv = params.constant_iv.clone().unwrap();
        let cfg = encrypt_sample_in_place(&mut s, &key, &key_id, iv, &params, &subs).unwrap();
        assert_ne!(s.payload, original);
        decrypt_sample_in_place(&mut s.payload, &key, &cfg).unwrap();
        assert_eq!(s.payload, original);
    }

    #[test]
    fn s3_cbcs_pattern_leaves_trailing_partial_block_clear() {
        // spec S3: payload 1000 bytes, subsamples [(4,100), (0,896)],
        // cbcs pattern 1:9, constant-IV all-zero.
        let key = [1u8; 16];
        let key_id = [3u8; 16];
        let params = CryptoParams {
            protection_scheme: ProtectionScheme::Cbcs,
            crypt_byte_block: 1,
            skip_byte_block: 9,
            constant_iv: Some(vec![0u8; BLOCK_SIZE]),
            ..Default::default()
        };
        let mut s = sample(vec![5u8; 1000], 0, true);
        let subs = vec![
            SubsampleEntry { clear_bytes: 4, cipher_bytes: 100 },
            SubsampleEntry { clear_bytes: 0, cipher_bytes: 896 },
        ];
        let original = s.payload.clone();
        let iv = params.constant_iv.clone().unwrap();
        encrypt_sample_in_place(&mut s, &key, &key_id, iv, &params, &subs).unwrap();

        // Clear prefix (4 bytes) untouched.
        assert_eq!(&s.payload[0..4], &original[0..4]);

        // First cipher subsample: 100 bytes starting at byte 4. Pattern
        // 1:9 => block 0 of each 10-block run encrypts, blocks 1..9 clear.
        // 100 bytes = 6 full blocks + 4 leftover bytes, all inside run 0
        // (crypt block 0, then skip blocks 1..5 fill the remaining 96
        // bytes, with 4 bytes of a 7th block left as a clear partial tail).
        assert_ne!(&s.payload[4..20], &original[4..20]);
        assert_eq!(&s.payload[20..104], &original[20..104]);

        // Second cipher subsample: 896 bytes starting at byte 104.
        // 896 / 160 = 5 full 10-block runs (800 bytes) + 96 remaining
        // bytes (6 whole blocks): block 0 of the 6th run encrypts, the
        // rest stay clear.
        let run_len = (1 + 9) * BLOCK_SIZE;
        let full_runs = 896 / run_len;
        assert_eq!(full_runs, 5);
        let rem_start = 104 + full_runs * run_len;
        assert_ne!(&s.payload[rem_start..rem_start + 16], &original[rem_start..rem_start + 16]);
        assert_eq!(&s.payload[rem_start + 16..rem_start + 96], &original[rem_start + 16..rem_start + 96]);
    }

    #[test]
    fn subsample_mismatch_is_rejected() {
        let key = [1u8; 16];
        let key_id = [0u8; 16];
        let params = CryptoParams::default();
        let mut s = sample(vec![0u8; 10], 0, true);
        let subs = vec![SubsampleEntry { clear_bytes: 0, cipher_bytes: 9 }];
        let iv = iv_from_counter(params.per_sample_iv_size, 0);
        assert!(encrypt_sample_in_place(&mut s, &key, &key_id, iv, &params, &subs).is_err());
    }

    #[test]
    fn encryptor_threads_real_key_id_into_decrypt_config() {
        let key_source = Box::new(FixedKeySource { key: [5u8; 16], key_id: [9u8; 16] });
        let mut encryptor = Encryptor::new(CryptoParams::default(), key_source);
        let key = encryptor.key_for(0, true).unwrap();
        let iv = encryptor.next_iv();
        let mut s = sample(vec![1u8; 16], 0, true);
        let subs = default_whole_sample_subsamples(&s);
        let cfg =
            encrypt_sample_in_place(&mut s, &key.key, &key.key_id, iv, &encryptor.params, &subs).unwrap();
        assert_eq!(cfg.key_id, [9u8; 16]);
    }
}
