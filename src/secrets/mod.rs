mod password;
mod pkcs12;
mod source;


pub use password::generate_password;
pub use source::{
    load_trusted_certificates, CertificateSource, FilesystemCertificateSource, KeystoreSource,
    NodeCertificates, TrustedCertificate,
};

use crate::error::SecretsError;
use pkcs12::Pkcs12Store;
use tracing::{debug, info, warn};

pub const HTTP_KEYSTORE_FILE: &str = "http-keystore.p12";
pub const TRANSPORT_KEYSTORE_FILE: &str = "transport-keystore.p12";
pub const TRUSTSTORE_FILE: &str = "datanode-truststore.p12";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreFormat {
    Pkcs12,
}

impl KeystoreFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreFormat::Pkcs12 => "PKCS12",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeystoreKind {
    Http,
    Transport,
    Truststore,
}

impl KeystoreKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            KeystoreKind::Http => HTTP_KEYSTORE_FILE,
            KeystoreKind::Transport => TRANSPORT_KEYSTORE_FILE,
            KeystoreKind::Truststore => TRUSTSTORE_FILE,
        }
    }
}

/// An encoded keystore ready to be written into the config directory
#[derive(Clone)]
pub struct KeystoreMaterial {
    kind: KeystoreKind,
    format: KeystoreFormat,
    alias: Option<String>,
    password: String,
    chain: Vec<Vec<u8>>,
    bytes: Vec<u8>,
}

impl KeystoreMaterial {
    pub fn kind(&self) -> KeystoreKind {
        self.kind
    }

    pub fn format(&self) -> KeystoreFormat {
        self.format
    }

    /// Alias of the private key entry; `None` for the truststore
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// DER certificates backing this material
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn file_name(&self) -> &'static str {
        self.kind.file_name()
    }
}

impl std::fmt::Debug for KeystoreMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreMaterial")
            .field("kind", &self.kind)
            .field("format", &self.format)
            .field("alias", &self.alias)
            .field("password", &"<redacted>")
            .field("certificates", &self.chain.len())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Outcome of one provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionedSecrets {
    pub source: Option<String>,
    pub http: Option<KeystoreMaterial>,
    pub transport: Option<KeystoreMaterial>,
    pub truststore: KeystoreMaterial,
}

impl ProvisionedSecrets {
    /// TLS is on only when both node keystores are present
    pub fn is_secured(&self) -> bool {
        self.http.is_some() && self.transport.is_some()
    }

    pub fn materials(&self) -> impl Iterator<Item = &KeystoreMaterial> {
        self.http
            .iter()
            .chain(self.transport.iter())
            .chain(std::iter::once(&self.truststore))
    }
}

/// Builds HTTP, transport and trust material from the first configured source
pub struct SecretsProvisioner {
    sources: Vec<Box<dyn CertificateSource>>,
}

impl SecretsProvisioner {
    pub fn new(sources: Vec<Box<dyn CertificateSource>>) -> Self {
        Self { sources }
    }

    /// Provisioner with no sources; every launch runs without TLS
    pub fn insecure() -> Self {
        Self::new(Vec::new())
    }

    pub fn provision(
        &self,
        trusted: &[TrustedCertificate],
    ) -> Result<ProvisionedSecrets, SecretsError> {
        let source = self.sources.iter().find(|s| s.is_configured());

        let (source_name, certificates) = match source {
            Some(source) => {
                info!("Using certificate source '{}'", source.name());
                (Some(source.name().to_string()), source.load()?)
            }
            None => {
                warn!("No certificate source configured, security is disabled for this launch");
                (None, NodeCertificates::default())
            }
        };

        let http = certificates
            .http
            .as_ref()
            .map(|ks| node_keystore(KeystoreKind::Http, ks))
            .transpose()?;
        let transport = certificates
            .transport
            .as_ref()
            .map(|ks| node_keystore(KeystoreKind::Transport, ks))
            .transpose()?;

        let mut trust_entries: Vec<(String, Vec<u8>)> = Vec::new();
        for (prefix, material) in [("http-cert", &http), ("transport-cert", &transport)] {
            if let Some(material) = material {
                for (index, der) in material.chain.iter().enumerate() {
                    push_unique(&mut trust_entries, format!("{}-{}", prefix, index), der);
                }
            }
        }
        for certificate in trusted {
            push_unique(&mut trust_entries, certificate.alias.clone(), &certificate.der);
        }

        let truststore = truststore(&trust_entries)?;
        debug!(
            "Truststore holds {} certificates",
            truststore.chain.len()
        );

        Ok(ProvisionedSecrets {
            source: source_name,
            http,
            transport,
            truststore,
        })
    }
}

fn node_keystore(
    kind: KeystoreKind,
    source: &KeystoreSource,
) -> Result<KeystoreMaterial, SecretsError> {
    let store = Pkcs12Store::parse(&source.name, &source.data, &source.password)?;
    let alias = store.private_key_alias().ok_or_else(|| {
        SecretsError::keystore(store.name(), "keystore holds no private key entry")
    })?;
    let chain = store.certificates();
    let password = generate_password();
    let bytes = store.encode(&password)?;

    info!(
        "{:?} keystore '{}' uses alias '{}' with {} certificates",
        kind,
        source.name,
        alias,
        chain.len()
    );

    Ok(KeystoreMaterial {
        kind,
        format: KeystoreFormat::Pkcs12,
        alias: Some(alias),
        password,
        chain,
        bytes,
    })
}

fn truststore(entries: &[(String, Vec<u8>)]) -> Result<KeystoreMaterial, SecretsError> {
    let store = Pkcs12Store::trust_only(TRUSTSTORE_FILE, entries)?;
    let password = generate_password();
    let bytes = store.encode(&password)?;

    Ok(KeystoreMaterial {
        kind: KeystoreKind::Truststore,
        format: KeystoreFormat::Pkcs12,
        alias: None,
        password,
        chain: entries.iter().map(|(_, der)| der.clone()).collect(),
        bytes,
    })
}

/// The HTTP and transport chains usually share their CA
fn push_unique(entries: &mut Vec<(String, Vec<u8>)>, alias: String, der: &[u8]) {
    if !entries.iter().any(|(_, existing)| existing.as_slice() == der) {
        entries.push((alias, der.to_vec()));
    }
}
