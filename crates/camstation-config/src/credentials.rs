// ── Credential resolution ──
//
// A device record carries only a reference. The secret behind it comes
// from, in order: the environment variable the entry names, the system
// keyring (service "camstation", entry = reference), or a plaintext
// password in the config file.

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use camstation_core::{CoreError, CredentialSource, Credentials, CredentialsRef};

use crate::ConfigError;

const KEYRING_SERVICE: &str = "camstation";

/// One `[credentials.<reference>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialEntry {
    pub username: String,

    /// Plaintext password (prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

/// [`CredentialSource`] over config entries and the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    entries: BTreeMap<String, CredentialEntry>,
    use_keyring: bool,
}

impl KeyringCredentials {
    pub fn new(entries: BTreeMap<String, CredentialEntry>) -> Self {
        Self {
            entries,
            use_keyring: true,
        }
    }

    /// Skip the keyring step (headless hosts, tests).
    pub fn without_keyring(mut self) -> Self {
        self.use_keyring = false;
        self
    }

    /// Resolve a reference to a username and secret.
    pub fn lookup(&self, reference: &str) -> Result<(String, SecretString), ConfigError> {
        let entry = self
            .entries
            .get(reference)
            .ok_or_else(|| ConfigError::NoCredentials {
                reference: reference.into(),
            })?;

        // 1. Env var named by the entry
        if let Some(ref env_name) = entry.password_env {
            if let Ok(val) = std::env::var(env_name) {
                trace!(reference, env = %env_name, "password from environment");
                return Ok((entry.username.clone(), SecretString::from(val)));
            }
        }

        // 2. System keyring
        if self.use_keyring {
            if let Ok(secret) = keyring_get(reference) {
                trace!(reference, "password from keyring");
                return Ok((entry.username.clone(), secret));
            }
        }

        // 3. Plaintext in config
        if let Some(ref pw) = entry.password {
            debug!(reference, "using plaintext password from config");
            return Ok((entry.username.clone(), SecretString::from(pw.clone())));
        }

        Err(ConfigError::NoCredentials {
            reference: reference.into(),
        })
    }
}

fn keyring_get(reference: &str) -> Result<SecretString, ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, reference)?;
    Ok(SecretString::from(entry.get_password()?))
}

/// Store a password in the system keyring under `reference`.
pub fn store_in_keyring(reference: &str, password: &SecretString) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, reference)?;
    entry.set_password(password.expose_secret())?;
    Ok(())
}

/// Remove a stored password. A missing entry is not an error.
pub fn delete_from_keyring(reference: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, reference)?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CredentialSource for KeyringCredentials {
    async fn resolve(&self, reference: &CredentialsRef) -> Result<Credentials, CoreError> {
        // Keyring backends block (D-Bus, Keychain), so stay off the runtime.
        let this = self.clone();
        let reference = reference.as_str().to_owned();
        let resolved = tokio::task::spawn_blocking(move || this.lookup(&reference))
            .await
            .map_err(|e| CoreError::Internal(format!("credential lookup panicked: {e}")))?;
        match resolved {
            Ok((username, password)) => Ok(Credentials { username, password }),
            Err(e) => Err(CoreError::AuthFailed {
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entries(password: Option<&str>, password_env: Option<&str>) -> BTreeMap<String, CredentialEntry> {
        BTreeMap::from([(
            "nvr".to_owned(),
            CredentialEntry {
                username: "admin".into(),
                password: password.map(str::to_owned),
                password_env: password_env.map(str::to_owned),
            },
        )])
    }

    #[test]
    fn plaintext_is_the_last_resort() {
        let source = KeyringCredentials::new(entries(Some("from-file"), None)).without_keyring();
        let (user, pw) = source.lookup("nvr").unwrap();
        assert_eq!(user, "admin");
        assert_eq!(pw.expose_secret(), "from-file");
    }

    #[test]
    fn environment_wins_over_plaintext() {
        // PATH is always set, so it stands in for a password variable.
        let path = std::env::var("PATH").unwrap();
        let source =
            KeyringCredentials::new(entries(Some("from-file"), Some("PATH"))).without_keyring();
        let (_, pw) = source.lookup("nvr").unwrap();
        assert_eq!(pw.expose_secret(), path);
    }

    #[test]
    fn unset_environment_falls_through() {
        let source = KeyringCredentials::new(entries(
            Some("from-file"),
            Some("CAMSTATION_TEST_DEFINITELY_UNSET"),
        ))
        .without_keyring();
        let (_, pw) = source.lookup("nvr").unwrap();
        assert_eq!(pw.expose_secret(), "from-file");
    }

    #[test]
    fn unknown_reference_and_missing_secret_are_errors() {
        let source = KeyringCredentials::new(entries(None, None)).without_keyring();
        assert!(matches!(
            source.lookup("other"),
            Err(ConfigError::NoCredentials { .. })
        ));
        assert!(matches!(
            source.lookup("nvr"),
            Err(ConfigError::NoCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_maps_missing_secrets_to_auth_failure() {
        let source = KeyringCredentials::new(entries(None, None)).without_keyring();
        let err = source
            .resolve(&CredentialsRef::from("nvr"))
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());

        let source = KeyringCredentials::new(entries(Some("pw"), None)).without_keyring();
        let creds = source.resolve(&CredentialsRef::from("nvr")).await.unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password.expose_secret(), "pw");
    }
}
