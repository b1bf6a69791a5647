use thiserror::Error;
use tracing::{debug, info};

const KEYRING_SERVICE: &str = "snapvault";
const KEYRING_USER: &str = "upload_token";

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("Upload token is empty")]
    EmptyToken,
}

/// Upload token kept in the system keychain
pub struct TokenStore {
    entry: keyring::Entry,
}

impl TokenStore {
    pub fn new() -> Result<Self, TokenStoreError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        Ok(Self { entry })
    }

    /// Stored token, `None` when nothing was saved
    pub fn get(&self) -> Result<Option<String>, TokenStoreError> {
        match self.entry.get_password() {
            Ok(token) => {
                debug!("Loaded upload token from keychain");
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TokenStoreError::Keyring(e)),
        }
    }

    pub fn set(&self, token: &str) -> Result<(), TokenStoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenStoreError::EmptyToken);
        }
        self.entry.set_password(token)?;
        info!("Stored upload token in keychain");
        Ok(())
    }

    /// Remove the token; clearing an absent token is not an error
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                info!("Cleared upload token");
                Ok(())
            }
            Err(e) => Err(TokenStoreError::Keyring(e)),
        }
    }
}
