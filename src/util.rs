use base64::prelude::*;

use crate::error::{Error, Result};

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Decodes unpadded base64url, tolerating trailing `=` padding.
pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|err| Error::codec(format!("invalid base64url: {err}")))
}

/// Random lowercase hex string with `bytes * 2` characters.
pub(crate) fn random_hex(bytes: usize) -> String {
    use rand::RngCore as _;

    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}
