use crate::error::SecretsError;
use p12_keystore::{Certificate, KeyStore, KeyStoreEntry};

/// A decoded PKCS12 container
pub struct Pkcs12Store {
    name: String,
    keystore: KeyStore,
}

impl Pkcs12Store {
    pub fn parse(name: &str, data: &[u8], password: &str) -> Result<Self, SecretsError> {
        let keystore = KeyStore::from_pkcs12(data, password)
            .map_err(|e| SecretsError::keystore(name, e))?;
        Ok(Self {
            name: name.to_string(),
            keystore,
        })
    }

    /// Build a trust-only store from DER certificates keyed by alias
    pub fn trust_only(name: &str, certificates: &[(String, Vec<u8>)]) -> Result<Self, SecretsError> {
        let mut keystore = KeyStore::new();
        for (alias, der) in certificates {
            let certificate = Certificate::from_der(der).map_err(|e| SecretsError::Certificate {
                name: alias.clone(),
                details: e.to_string(),
            })?;
            keystore.add_entry(alias, KeyStoreEntry::Certificate(certificate));
        }
        Ok(Self {
            name: name.to_string(),
            keystore,
        })
    }

    /// Alias of the first private key entry
    pub fn private_key_alias(&self) -> Option<String> {
        self.keystore.entries().find_map(|(alias, entry)| match entry {
            KeyStoreEntry::PrivateKeyChain(_) => Some(alias.to_string()),
            KeyStoreEntry::Certificate(_) => None,
        })
    }

    /// Every certificate in the store, chains first, as DER
    pub fn certificates(&self) -> Vec<Vec<u8>> {
        let mut chains = Vec::new();
        let mut trusted = Vec::new();
        for (_, entry) in self.keystore.entries() {
            match entry {
                KeyStoreEntry::PrivateKeyChain(chain) => {
                    chains.extend(chain.chain().iter().map(|c| c.as_der().to_vec()));
                }
                KeyStoreEntry::Certificate(certificate) => {
                    trusted.push(certificate.as_der().to_vec());
                }
            }
        }
        chains.extend(trusted);
        chains
    }

    /// Encode the store under a new password
    pub fn encode(&self, password: &str) -> Result<Vec<u8>, SecretsError> {
        self.keystore
            .writer(password)
            .write()
            .map_err(|e| SecretsError::keystore(self.name.as_str(), e))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
