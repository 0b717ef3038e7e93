use crate::config::SecurityConfig;
use crate::error::SecretsError;
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An operator-supplied PKCS12 keystore and its password
#[derive(Clone)]
pub struct KeystoreSource {
    pub name: String,
    pub data: Vec<u8>,
    pub password: String,
}

impl std::fmt::Debug for KeystoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreSource")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Keystores a certificate source provides for one node
#[derive(Debug, Clone, Default)]
pub struct NodeCertificates {
    pub http: Option<KeystoreSource>,
    pub transport: Option<KeystoreSource>,
}

/// A certificate handed in by the platform that the node must trust
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCertificate {
    pub alias: String,
    pub der: Vec<u8>,
}

/// Provider of node keystores
pub trait CertificateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this source has material for the current node
    fn is_configured(&self) -> bool;

    fn load(&self) -> Result<NodeCertificates, SecretsError>;
}

/// Keystores read from files named in the security configuration
#[derive(Debug, Clone)]
pub struct FilesystemCertificateSource {
    base_dir: PathBuf,
    http: Option<(String, Option<String>)>,
    transport: Option<(String, Option<String>)>,
}

impl FilesystemCertificateSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            http: None,
            transport: None,
        }
    }

    pub fn from_config(security: &SecurityConfig, fallback_dir: &Path) -> Self {
        let base_dir = security
            .certificate_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| fallback_dir.to_path_buf());

        Self {
            base_dir,
            http: security
                .http_certificate
                .clone()
                .map(|file| (file, security.http_certificate_password.clone())),
            transport: security
                .transport_certificate
                .clone()
                .map(|file| (file, security.transport_certificate_password.clone())),
        }
    }

    pub fn with_http(mut self, file: impl Into<String>, password: impl Into<String>) -> Self {
        self.http = Some((file.into(), Some(password.into())));
        self
    }

    pub fn with_transport(mut self, file: impl Into<String>, password: impl Into<String>) -> Self {
        self.transport = Some((file.into(), Some(password.into())));
        self
    }

    fn read(&self, entry: &(String, Option<String>)) -> Result<KeystoreSource, SecretsError> {
        let (file, password) = entry;
        let path = self.base_dir.join(file);
        let password = password
            .clone()
            .ok_or_else(|| SecretsError::MissingPassword { name: file.clone() })?;
        let data = fs::read(&path).map_err(|source| SecretsError::Read {
            path: path.clone(),
            source,
        })?;

        debug!("Read keystore {} ({} bytes)", path.display(), data.len());

        Ok(KeystoreSource {
            name: file.clone(),
            data,
            password,
        })
    }
}

impl CertificateSource for FilesystemCertificateSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn is_configured(&self) -> bool {
        self.http.is_some() && self.transport.is_some()
    }

    fn load(&self) -> Result<NodeCertificates, SecretsError> {
        Ok(NodeCertificates {
            http: self.http.as_ref().map(|e| self.read(e)).transpose()?,
            transport: self.transport.as_ref().map(|e| self.read(e)).transpose()?,
        })
    }
}

/// Load `.der`, `.cer`, `.crt` and `.pem` certificates from a directory, sorted by file name
pub fn load_trusted_certificates(dir: &Path) -> Result<Vec<TrustedCertificate>, SecretsError> {
    let read_error = |source| SecretsError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(read_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("der" | "cer" | "crt" | "pem")
            )
        })
        .collect();
    paths.sort();

    let mut certificates = Vec::new();
    for path in paths {
        let data = fs::read(&path).map_err(|source| SecretsError::Read {
            path: path.clone(),
            source,
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("trusted")
            .to_string();

        let blocks = if data.starts_with(b"-----BEGIN") {
            decode_pem_certificates(&stem, &data)?
        } else {
            vec![data]
        };

        let count = blocks.len();
        for (index, der) in blocks.into_iter().enumerate() {
            let alias = if count == 1 {
                stem.clone()
            } else {
                format!("{}-{}", stem, index)
            };
            certificates.push(TrustedCertificate { alias, der });
        }
    }

    info!(
        "Loaded {} trusted certificates from {}",
        certificates.len(),
        dir.display()
    );
    Ok(certificates)
}

/// Extract every `CERTIFICATE` block of a PEM file as DER
fn decode_pem_certificates(name: &str, data: &[u8]) -> Result<Vec<Vec<u8>>, SecretsError> {
    let text = String::from_utf8_lossy(data);
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines().map(str::trim) {
        if line == "-----BEGIN CERTIFICATE-----" {
            current = Some(String::new());
        } else if line == "-----END CERTIFICATE-----" {
            if let Some(body) = current.take() {
                let der = base64::engine::general_purpose::STANDARD
                    .decode(body.as_bytes())
                    .map_err(|e| SecretsError::Certificate {
                        name: name.to_string(),
                        details: e.to_string(),
                    })?;
                blocks.push(der);
            }
        } else if let Some(body) = current.as_mut() {
            body.push_str(line);
        }
    }

    if blocks.is_empty() {
        return Err(SecretsError::Certificate {
            name: name.to_string(),
            details: "no CERTIFICATE block found".to_string(),
        });
    }
    Ok(blocks)
}
