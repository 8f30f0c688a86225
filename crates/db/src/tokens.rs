use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, aead::Aead};
use ci_relay_core::store::{StoreError, TokenStore};
use rand::Rng;
use sqlx::{Row, SqlitePool};

const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Encrypts CI tokens at rest with the installation-wide key.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    pub fn new(key: [u8; 32]) -> Self { Self { key } }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let decoded = URL_SAFE_NO_PAD
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(encoded))
            .context("Encryption key is not valid base64")?;
        let key: [u8; 32] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("Encryption key must be 32 bytes, got {}", v.len()))?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; 12];
        rand::rng().fill(&mut nonce);
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| anyhow!("Invalid encryption key length"))?;
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| anyhow!("Failed to encrypt token"))?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(rest) = stored.strip_prefix(ENVELOPE_PREFIX) else {
            bail!("Stored token is not encrypted");
        };
        let Some((nonce, ciphertext)) = rest.split_once(':') else {
            bail!("Malformed encrypted token");
        };
        let nonce = URL_SAFE_NO_PAD.decode(nonce).context("Malformed token nonce")?;
        if nonce.len() != 12 {
            bail!("Malformed token nonce");
        }
        let ciphertext = URL_SAFE_NO_PAD.decode(ciphertext).context("Malformed token data")?;
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| anyhow!("Invalid encryption key length"))?;
        let plaintext = aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt token"))?;
        String::from_utf8(plaintext).context("Decrypted token is not UTF-8")
    }
}

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
    cipher: TokenCipher,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool, cipher: TokenCipher) -> Self { Self { pool, cipher } }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn token_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT token FROM user_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load token")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let stored: String = row.try_get("token").context("Failed to read token")?;
        Ok(Some(self.cipher.decrypt(&stored)?))
    }

    async fn store_token(&self, user_id: &str, token: &str) -> Result<(), StoreError> {
        let encrypted = self.cipher.encrypt(token)?;
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, token, created_at, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT (user_id) DO UPDATE
            SET token = EXCLUDED.token, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(encrypted)
        .execute(&self.pool)
        .await
        .context("Failed to store token")?;
        Ok(())
    }

    async fn delete_token(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete token")?;
        Ok(result.rows_affected() > 0)
    }
}
