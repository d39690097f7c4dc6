//! Streaming AES-256-CBC for the encrypted drop format.
//!
//! Key and IV are derived from `(password, salt)` via PBKDF2-SHA1; the
//! password is derived per-file from the file name (see `derive_password`).
//! Stream operations run in bounded memory: a fixed 64 KiB buffer,
//! independent of payload size.

mod derive;
mod stream;

pub use derive::{derive_key_iv, derive_password, DerivedKey};
pub use stream::{
    decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, CiphertextTail, BLOCK_LEN,
    BUFFER_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file name '{0}' carries no date token to derive a password from")]
    BadFileName(String),
    #[error("decryption failed: bad credentials or corrupt ciphertext")]
    BadCredentials,
    #[error("crypto stream I/O failure")]
    Io(#[from] std::io::Error),
}
