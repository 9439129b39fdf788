//! Credential generation
//!
//! Secrets are generated once and reused for the lifetime of a deployment:
//! the upgrade path passes the live cluster values as `existing` so a
//! config change never rotates a password behind a running application's
//! back.

use crate::error::{EngineError, Result};
use caravel_recipe::SecretsSpec;
use ring::rand::SecureRandom;
use std::collections::BTreeMap;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a cryptographically random alphanumeric string
pub fn random_string(length: usize) -> Result<String> {
    let rng = ring::rand::SystemRandom::new();
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes)
        .map_err(|_| EngineError::SecretGeneration("system RNG unavailable".to_string()))?;
    Ok(bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect())
}

/// Produce the full credential set for a deployment.
///
/// Values present in `existing` are reused verbatim; only missing
/// `generate` fields get fresh random values.
pub fn generate(
    spec: &SecretsSpec,
    existing: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut secrets = BTreeMap::new();
    for field in &spec.fields {
        if let Some(value) = existing.get(&field.name) {
            secrets.insert(field.name.clone(), value.clone());
        } else if field.generate {
            secrets.insert(field.name.clone(), random_string(field.length)?);
        }
    }
    Ok(secrets)
}
