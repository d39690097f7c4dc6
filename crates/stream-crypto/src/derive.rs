use crate::Error;
use chrono::NaiveDate;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 10_000;

#[derive(Clone)]
pub struct DerivedKey {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

/// PBKDF2-SHA1 over `(password, salt)`: 48 derived bytes, split as a
/// 32-byte key followed by a 16-byte IV.
pub fn derive_key_iv(password: &str, salt: &str) -> DerivedKey {
    let mut derived = [0u8; KEY_LEN + IV_LEN];
    pbkdf2_hmac::<Sha1>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ROUNDS,
        &mut derived,
    );
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..]);
    DerivedKey { key, iv }
}

/// Derive the per-file password from a file name: segments of the base
/// name are reversed around the first date token, so the date leads, with
/// any trailing time portion and the extension reappended.
///
/// `T0_T1_..._Tn_YYYY-MM-DD[-HHMMSS].ext` becomes
/// `YYYY-MM-DD_Tn_..._T1_T0[-HHMMSS].ext`. The compact `YYYYMMDD` date
/// form is accepted as well.
pub fn derive_password(file_name: &str) -> Result<String, Error> {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    let (stem, ext) = match base.find('.') {
        Some(at) => base.split_at(at),
        None => (base, ""),
    };

    let tokens: Vec<&str> = stem.split('_').collect();
    let date_at = tokens
        .iter()
        .position(|token| split_date_token(token).is_some())
        .ok_or_else(|| Error::BadFileName(file_name.to_string()))?;
    let (date, time_suffix) = split_date_token(tokens[date_at]).unwrap();

    let mut segments = vec![date];
    segments.extend(
        tokens
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != date_at)
            .rev()
            .map(|(_, token)| *token),
    );
    Ok(format!("{}{}{}", segments.join("_"), time_suffix, ext))
}

/// Split a candidate token into its date part and any `-HHMMSS` suffix.
/// Returns None when the token is not a date.
fn split_date_token(token: &str) -> Option<(&str, &str)> {
    for (len, format) in [(10, "%Y-%m-%d"), (8, "%Y%m%d")] {
        if token.len() < len {
            continue;
        }
        let (date, rest) = token.split_at(len);
        if NaiveDate::parse_from_str(date, format).is_err() {
            continue;
        }
        let is_time = rest.len() == 7
            && rest.starts_with('-')
            && rest[1..].bytes().all(|b| b.is_ascii_digit());
        if rest.is_empty() || is_time {
            return Some((date, rest));
        }
    }
    None
}
