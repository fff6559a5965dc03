use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use hkdf::Hkdf;
use sha2::Sha256;

const NONCE_LEN: usize = 12;

/// Encrypts chat content with AES-256-GCM under a per-conversation key.
///
/// Output layout is `nonce || ciphertext`, stored as-is in a `BYTEA` column.
pub fn encrypt_message(content: &str, conversation_key: &str, master_key: &str) -> Result<Vec<u8>> {
    let key = derive_conversation_key(master_key, conversation_key)?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, content.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub fn decrypt_message(sealed: &[u8], conversation_key: &str, master_key: &str) -> Result<String> {
    if sealed.len() < NONCE_LEN {
        return Err(anyhow!("Invalid encrypted data: too short"));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let key = derive_conversation_key(master_key, conversation_key)?;
    let cipher = Aes256Gcm::new(&key);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 after decryption: {}", e))
}

fn derive_conversation_key(master_key: &str, conversation_key: &str) -> Result<Key<Aes256Gcm>> {
    let master_key_bytes = if master_key.len() == 64 {
        hex::decode(master_key).map_err(|e| anyhow!("Invalid hex master key: {}", e))?
    } else {
        let mut key_bytes = master_key.as_bytes().to_vec();
        key_bytes.resize(32, 0);
        key_bytes
    };

    let hk = Hkdf::<Sha256>::new(None, &master_key_bytes);
    let mut okm = [0u8; 32];
    hk.expand(conversation_key.as_bytes(), &mut okm)
        .map_err(|e| anyhow!("HKDF expansion failed: {}", e))?;

    Ok(*Key::<Aes256Gcm>::from_slice(&okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_encrypt_decrypt() {
        let original = "See you at 5pm for the session";
        let sealed = encrypt_message(original, "conv-a:b", MASTER).unwrap();
        assert_ne!(sealed.as_slice(), original.as_bytes());
        assert_eq!(decrypt_message(&sealed, "conv-a:b", MASTER).unwrap(), original);
    }

    #[test]
    fn test_other_conversation_cannot_decrypt() {
        let sealed = encrypt_message("private", "conv-a:b", MASTER).unwrap();
        assert!(decrypt_message(&sealed, "conv-a:c", MASTER).is_err());
        assert!(decrypt_message(&sealed[..4], "conv-a:b", MASTER).is_err());
    }
}
