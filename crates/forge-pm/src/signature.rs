//! OpenPGP verification of catalog artifacts.
//!
//! Two independent checkers: detached signatures (index file + `.sig` +
//! public key ring) and clear-signed documents (inline armored signature).
//! A malformed signature or keyring container counts as "not verified",
//! never as a hard error; only I/O failures propagate.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use pgp::composed::cleartext::CleartextSignedMessage;
use pgp::types::KeyTrait;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};

use crate::Result;

/// Verifier settings. When `key_id_suffix` is set, only keyring keys whose
/// hex key id ends with it (case-insensitive) are considered.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    pub key_id_suffix: Option<String>,
}

impl VerifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_id_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.key_id_suffix = Some(suffix.into());
        self
    }
}

/// Result of clear-signed verification. The recovered plaintext is returned
/// even when verification fails, so callers can still inspect it (e.g., for
/// diagnostics) while refusing to trust it.
#[derive(Debug)]
pub struct ClearsignOutcome {
    pub text: String,
    pub verified: bool,
    pub error: Option<String>,
}

/// Verify a detached signature over the raw bytes of `signed`.
///
/// The keyring and the signature may each be ASCII-armored or binary.
pub fn verify_detached(
    signed: &Path,
    signature: &Path,
    keyring: &Path,
    config: &VerifierConfig,
) -> Result<bool> {
    let keys = match load_keyring(keyring)? {
        keys if keys.is_empty() => return Ok(false),
        keys => keys,
    };

    let sig_bytes = fs::read(signature)?;
    let parsed = if looks_armored(&sig_bytes) {
        StandaloneSignature::from_armor_single(Cursor::new(&sig_bytes)).map(|(sig, _)| sig)
    } else {
        StandaloneSignature::from_bytes(Cursor::new(&sig_bytes))
    };
    let signature = match parsed {
        Ok(sig) => sig,
        Err(e) => {
            log::debug!("unparsable signature container: {}", e);
            return Ok(false);
        }
    };

    let data = fs::read(signed)?;
    for key in &keys {
        if key_matches(&hex::encode(key.key_id().as_ref()), config)
            && signature.verify(key, &data).is_ok()
        {
            return Ok(true);
        }
        for subkey in &key.public_subkeys {
            if key_matches(&hex::encode(subkey.key_id().as_ref()), config)
                && signature.verify(subkey, &data).is_ok()
            {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Verify a clear-signed document, recovering its plaintext.
///
/// The embedded signature is checked over the re-canonicalized text
/// (trailing whitespace stripped per line, CRLF line endings, final
/// terminator dropped), which the OpenPGP implementation performs.
pub fn verify_clearsigned(path: &Path, keyring: &Path) -> Result<ClearsignOutcome> {
    let armored = fs::read_to_string(path)?;
    let message = match CleartextSignedMessage::from_string(&armored) {
        Ok((message, _headers)) => message,
        Err(e) => {
            return Ok(ClearsignOutcome {
                text: String::new(),
                verified: false,
                error: Some(format!("unparsable clear-signed document: {}", e)),
            })
        }
    };
    let text = message.signed_text();

    let keys = load_keyring(keyring)?;
    let mut last_error = None;
    for key in &keys {
        match message.verify(key) {
            Ok(_) => {
                return Ok(ClearsignOutcome {
                    text,
                    verified: true,
                    error: None,
                })
            }
            Err(e) => last_error = Some(e.to_string()),
        }
        for subkey in &key.public_subkeys {
            if message.verify(subkey).is_ok() {
                return Ok(ClearsignOutcome {
                    text,
                    verified: true,
                    error: None,
                });
            }
        }
    }

    Ok(ClearsignOutcome {
        text,
        verified: false,
        error: last_error.or_else(|| Some("no matching key in keyring".to_string())),
    })
}

fn looks_armored(bytes: &[u8]) -> bool {
    bytes.starts_with(b"-----BEGIN")
}

fn key_matches(key_id_hex: &str, config: &VerifierConfig) -> bool {
    match &config.key_id_suffix {
        Some(suffix) => key_id_hex
            .to_ascii_lowercase()
            .ends_with(&suffix.to_ascii_lowercase()),
        None => true,
    }
}

fn load_keyring(keyring: &Path) -> Result<Vec<SignedPublicKey>> {
    let bytes = fs::read(keyring)?;
    let mut keys = Vec::new();
    if looks_armored(&bytes) {
        match SignedPublicKey::from_armor_many(Cursor::new(&bytes)) {
            Ok((iter, _headers)) => {
                for key in iter {
                    match key {
                        Ok(key) => keys.push(key),
                        Err(e) => log::debug!("skipping unparsable keyring entry: {}", e),
                    }
                }
            }
            Err(e) => log::debug!("unparsable keyring {}: {}", keyring.display(), e),
        }
    } else {
        for key in SignedPublicKey::from_bytes_many(Cursor::new(&bytes)) {
            match key {
                Ok(key) => keys.push(key),
                Err(e) => log::debug!("skipping unparsable keyring entry: {}", e),
            }
        }
    }
    Ok(keys)
}
