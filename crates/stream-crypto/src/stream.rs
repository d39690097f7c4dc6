use crate::derive::{derive_key_iv, DerivedKey};
use crate::Error;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;
type Block = aes::cipher::Block<Aes256>;

pub const BLOCK_LEN: usize = 16;

/// Fixed transfer buffer. Steady-state memory of a stream operation is a
/// small constant multiple of this, independent of payload size.
pub const BUFFER_LEN: usize = 64 * 1024;

/// Emits whole-percent progress ticks: 0% up front, each integer percent
/// as bytes move when the total is known, and 100% at the end.
struct ProgressTicker<P: FnMut(u8)> {
    emit: P,
    total: Option<u64>,
    seen: u64,
    last: Option<u8>,
}

impl<P: FnMut(u8)> ProgressTicker<P> {
    fn new(total: Option<u64>, emit: P) -> ProgressTicker<P> {
        ProgressTicker {
            emit,
            total,
            seen: 0,
            last: None,
        }
    }

    fn tick(&mut self, percent: u8) {
        if self.last != Some(percent) {
            self.last = Some(percent);
            (self.emit)(percent);
        }
    }

    fn start(&mut self) {
        self.tick(0);
    }

    fn advance(&mut self, bytes: u64) {
        self.seen += bytes;
        if let Some(total) = self.total.filter(|t| *t > 0) {
            let percent = ((self.seen.min(total) * 100) / total) as u8;
            if percent < 100 {
                self.tick(percent);
            }
        }
    }

    fn finish(&mut self) {
        self.tick(100);
    }
}

fn encrypt_chunk(enc: &mut Encryptor, bytes: &[u8], out: &mut Vec<u8>) {
    debug_assert_eq!(bytes.len() % BLOCK_LEN, 0);
    let mut blocks: Vec<Block> = bytes
        .chunks_exact(BLOCK_LEN)
        .map(Block::clone_from_slice)
        .collect();
    enc.encrypt_blocks_mut(&mut blocks);
    out.clear();
    for block in &blocks {
        out.extend_from_slice(block);
    }
}

fn decrypt_chunk(dec: &mut Decryptor, bytes: &[u8], out: &mut Vec<u8>) {
    debug_assert_eq!(bytes.len() % BLOCK_LEN, 0);
    let mut blocks: Vec<Block> = bytes
        .chunks_exact(BLOCK_LEN)
        .map(Block::clone_from_slice)
        .collect();
    dec.decrypt_blocks_mut(&mut blocks);
    out.clear();
    for block in &blocks {
        out.extend_from_slice(block);
    }
}

/// Encrypt `src` into `dst`. Returns the plaintext byte count.
pub async fn encrypt_stream<R, W, P>(
    src: &mut R,
    dst: &mut W,
    password: &str,
    salt: &str,
    total_bytes: Option<u64>,
    progress: P,
) -> Result<u64, Error>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    P: FnMut(u8),
{
    let DerivedKey { key, iv } = derive_key_iv(password, salt);
    let mut enc = Encryptor::new(&key.into(), &iv.into());
    let mut ticker = ProgressTicker::new(total_bytes, progress);
    ticker.start();

    let mut buf = vec![0u8; BUFFER_LEN];
    let mut out = Vec::with_capacity(BUFFER_LEN + BLOCK_LEN);
    let mut carry: Vec<u8> = Vec::with_capacity(BUFFER_LEN + BLOCK_LEN);
    let mut read_total = 0u64;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        read_total += n as u64;
        ticker.advance(n as u64);

        carry.extend_from_slice(&buf[..n]);
        let full = carry.len() / BLOCK_LEN * BLOCK_LEN;
        if full > 0 {
            encrypt_chunk(&mut enc, &carry[..full], &mut out);
            dst.write_all(&out).await?;
            carry.drain(..full);
        }
    }

    // Final block carries PKCS7 padding; an empty payload still pads to
    // one full block.
    let msg_len = carry.len();
    carry.resize(msg_len + BLOCK_LEN, 0);
    let ciphertext = enc
        .encrypt_padded_mut::<Pkcs7>(&mut carry, msg_len)
        .map_err(|_| Error::BadCredentials)?;
    dst.write_all(ciphertext).await?;
    dst.flush().await?;

    ticker.finish();
    Ok(read_total)
}

/// Decrypt `src` into `dst`. Returns the plaintext byte count. Invalid
/// padding on the final block surfaces as `BadCredentials`.
pub async fn decrypt_stream<R, W, P>(
    src: &mut R,
    dst: &mut W,
    password: &str,
    salt: &str,
    total_bytes: Option<u64>,
    progress: P,
) -> Result<u64, Error>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    P: FnMut(u8),
{
    let DerivedKey { key, iv } = derive_key_iv(password, salt);
    let mut dec = Decryptor::new(&key.into(), &iv.into());
    let mut ticker = ProgressTicker::new(total_bytes, progress);
    ticker.start();

    let mut buf = vec![0u8; BUFFER_LEN];
    let mut out = Vec::with_capacity(BUFFER_LEN + BLOCK_LEN);
    let mut carry: Vec<u8> = Vec::with_capacity(BUFFER_LEN + 2 * BLOCK_LEN);
    let mut written_total = 0u64;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ticker.advance(n as u64);
        carry.extend_from_slice(&buf[..n]);

        // Hold back the trailing block: it may be the padded final one.
        if carry.len() > BLOCK_LEN {
            let keep = BLOCK_LEN + carry.len() % BLOCK_LEN;
            let full = carry.len() - keep;
            if full > 0 {
                decrypt_chunk(&mut dec, &carry[..full], &mut out);
                dst.write_all(&out).await?;
                written_total += out.len() as u64;
                carry.drain(..full);
            }
        }
    }

    if carry.is_empty() || carry.len() % BLOCK_LEN != 0 {
        return Err(Error::BadCredentials);
    }
    let plaintext = dec
        .decrypt_padded_mut::<Pkcs7>(&mut carry)
        .map_err(|_| Error::BadCredentials)?;
    dst.write_all(plaintext).await?;
    written_total += plaintext.len() as u64;
    dst.flush().await?;

    ticker.finish();
    Ok(written_total)
}

/// Encrypt a file into a new file. The source opens read-only and the
/// destination write-truncate; both close on every exit path.
pub async fn encrypt_file<P: FnMut(u8)>(
    src: &Path,
    dst: &Path,
    password: &str,
    salt: &str,
    progress: P,
) -> Result<u64, Error> {
    let mut reader = tokio::fs::File::open(src).await?;
    let total = reader.metadata().await?.len();
    let mut writer = tokio::fs::File::create(dst).await?;
    let n = encrypt_stream(&mut reader, &mut writer, password, salt, Some(total), progress).await?;
    writer.sync_all().await?;
    Ok(n)
}

/// Decrypt a file into a new file; see `encrypt_file` for handling.
pub async fn decrypt_file<P: FnMut(u8)>(
    src: &Path,
    dst: &Path,
    password: &str,
    salt: &str,
    progress: P,
) -> Result<u64, Error> {
    let mut reader = tokio::fs::File::open(src).await?;
    let total = reader.metadata().await?.len();
    let mut writer = tokio::fs::File::create(dst).await?;
    let n = decrypt_stream(&mut reader, &mut writer, password, salt, Some(total), progress).await?;
    writer.sync_all().await?;
    Ok(n)
}

/// Rolling capture of the last two ciphertext blocks, fed while streaming
/// a payload for other purposes (hashing, copying). `validate` then checks
/// the password against the final block's padding without materializing
/// any plaintext.
#[derive(Default)]
pub struct CiphertextTail {
    tail: Vec<u8>,
    total: u64,
}

impl CiphertextTail {
    pub fn new() -> CiphertextTail {
        CiphertextTail::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        if chunk.len() >= 2 * BLOCK_LEN {
            self.tail.clear();
            self.tail.extend_from_slice(&chunk[chunk.len() - 2 * BLOCK_LEN..]);
        } else {
            self.tail.extend_from_slice(chunk);
            if self.tail.len() > 2 * BLOCK_LEN {
                let cut = self.tail.len() - 2 * BLOCK_LEN;
                self.tail.drain(..cut);
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn validate(&self, password: &str, salt: &str) -> Result<(), Error> {
        if self.total == 0 || self.total % BLOCK_LEN as u64 != 0 {
            return Err(Error::BadCredentials);
        }
        let DerivedKey { key, iv } = derive_key_iv(password, salt);

        // The final block chains off the one before it, or off the derived
        // IV when the payload is a single block.
        let (chain_iv, final_block) = if self.total == BLOCK_LEN as u64 {
            (iv.to_vec(), self.tail.clone())
        } else {
            (
                self.tail[..BLOCK_LEN].to_vec(),
                self.tail[BLOCK_LEN..].to_vec(),
            )
        };
        let mut buf = final_block;
        Decryptor::new(&key.into(), GenericArray::from_slice(&chain_iv))
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map(|_| ())
            .map_err(|_| Error::BadCredentials)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, RngCore, SeedableRng};

    const SALT: &str = "Jr8Lm2PXzd7qNbVyWutRfGBxhkHTpE";

    async fn encrypt(plain: &[u8], password: &str) -> Vec<u8> {
        let mut src = std::io::Cursor::new(plain.to_vec());
        let mut dst = Vec::new();
        encrypt_stream(&mut src, &mut dst, password, SALT, Some(plain.len() as u64), |_| {})
            .await
            .unwrap();
        dst
    }

    async fn decrypt(cipher: &[u8], password: &str) -> Result<Vec<u8>, Error> {
        let mut src = std::io::Cursor::new(cipher.to_vec());
        let mut dst = Vec::new();
        decrypt_stream(&mut src, &mut dst, password, SALT, None, |_| {}).await?;
        Ok(dst)
    }

    #[tokio::test]
    async fn round_trips_across_block_boundaries() {
        let mut rng = SmallRng::seed_from_u64(7);
        for len in [0usize, 1, 15, 16, 17, 31, 32, 1000, BUFFER_LEN - 1, BUFFER_LEN, BUFFER_LEN + 9, 3 * BUFFER_LEN + 5] {
            let mut plain = vec![0u8; len];
            rng.fill_bytes(&mut plain);

            let cipher = encrypt(&plain, "pw").await;
            assert_eq!(cipher.len(), (len / 16 + 1) * 16, "len {len}");
            assert_eq!(decrypt(&cipher, "pw").await.unwrap(), plain, "len {len}");
        }
    }

    #[tokio::test]
    async fn wrong_password_is_bad_credentials() {
        let cipher = encrypt(b"10 rows of holdings", "right").await;
        // A wrong key has a ~1/256 chance of producing valid-looking
        // padding; this pair is known to fail.
        let err = decrypt(&cipher, "wrong").await.unwrap_err();
        assert!(matches!(err, Error::BadCredentials));
    }

    #[tokio::test]
    async fn truncated_and_empty_ciphertexts_are_rejected() {
        let cipher = encrypt(b"payload", "pw").await;
        for bad in [&cipher[..cipher.len() - 3], &[][..]] {
            let err = decrypt(bad, "pw").await.unwrap_err();
            assert!(matches!(err, Error::BadCredentials));
        }
    }

    #[tokio::test]
    async fn progress_ticks_are_monotonic_and_bracketed() {
        let plain = vec![7u8; 300_000];
        let mut src = std::io::Cursor::new(plain.clone());
        let mut dst = Vec::new();
        let mut ticks = Vec::new();
        encrypt_stream(
            &mut src,
            &mut dst,
            "pw",
            SALT,
            Some(plain.len() as u64),
            |p| ticks.push(p),
        )
        .await
        .unwrap();

        assert_eq!(ticks.first(), Some(&0));
        assert_eq!(ticks.last(), Some(&100));
        assert!(ticks.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn unknown_total_still_brackets_progress() {
        let mut src = std::io::Cursor::new(b"body".to_vec());
        let mut dst = Vec::new();
        let mut ticks = Vec::new();
        encrypt_stream(&mut src, &mut dst, "pw", SALT, None, |p| ticks.push(p))
            .await
            .unwrap();
        assert_eq!(ticks, vec![0, 100]);
    }

    #[tokio::test]
    async fn tail_capture_validates_credentials() {
        let mut rng = SmallRng::seed_from_u64(11);
        for len in [5usize, 16, 40, 100_000] {
            let cipher = encrypt(&vec![0u8; len], "pw").await;

            let mut tail = CiphertextTail::new();
            // Feed in uneven chunks to exercise the rolling window.
            let mut rest = &cipher[..];
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(37));
                tail.update(&rest[..take]);
                rest = &rest[take..];
            }
            assert_eq!(tail.total_bytes(), cipher.len() as u64);
            tail.validate("pw", SALT).expect("right password validates");
            assert!(matches!(
                tail.validate("not-the-password", SALT),
                Err(Error::BadCredentials),
            ));
        }

        let mut empty = CiphertextTail::new();
        assert!(matches!(empty.validate("pw", SALT), Err(Error::BadCredentials)));
        empty.update(&[1, 2, 3]);
        assert!(matches!(empty.validate("pw", SALT), Err(Error::BadCredentials)));
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let plain_path = dir.path().join("plain.csv");
        let enc_path = dir.path().join("plain.csv.enc");
        let out_path = dir.path().join("out.csv");

        tokio::fs::write(&plain_path, b"CPH|CHANGETYPE\n12/345/6001|I\n")
            .await
            .unwrap();
        encrypt_file(&plain_path, &enc_path, "pw", SALT, |_| {}).await.unwrap();
        decrypt_file(&enc_path, &out_path, "pw", SALT, |_| {}).await.unwrap();

        let round = tokio::fs::read(&out_path).await.unwrap();
        assert_eq!(round, b"CPH|CHANGETYPE\n12/345/6001|I\n");
    }
}
