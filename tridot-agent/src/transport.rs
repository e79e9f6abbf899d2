use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Certificate, Client, Identity};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

use crate::config::MtlsSettings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} is required")]
    MissingMaterial(&'static str),

    #[error("failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid {what}: {reason}")]
    InvalidPem { what: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builds the mutually authenticated client used for every control-plane
/// call. Only the configured CA is trusted. Nothing touches the network here;
/// missing or unparsable material fails immediately.
pub fn build_mtls_client(settings: &MtlsSettings, timeout: Duration) -> Result<Client, TransportError> {
    let ca_pem = resolve_material("CA certificate", &settings.ca_pem, &settings.ca_file)?;
    let cert_pem = resolve_material("client certificate", &settings.cert_pem, &settings.cert_file)?;
    let key_pem = resolve_material("client key", &settings.key_pem, &settings.key_file)?;

    let roots = parse_certificates("CA certificate", &ca_pem)?;
    parse_certificates("client certificate", &cert_pem)?;
    PrivateKeyDer::from_pem_slice(&key_pem).map_err(|err| TransportError::InvalidPem {
        what: "client key",
        reason: err.to_string(),
    })?;

    let mut identity_pem = cert_pem;
    if !identity_pem.ends_with(b"\n") {
        identity_pem.push(b'\n');
    }
    identity_pem.extend_from_slice(&key_pem);
    let identity = Identity::from_pem(&identity_pem)?;

    let mut builder = Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .identity(identity)
        .timeout(timeout)
        .user_agent(format!("tridot-node-agent/{}", crate::VERSION));
    for root in roots {
        builder = builder.add_root_certificate(Certificate::from_der(root.as_ref())?);
    }

    Ok(builder.build()?)
}

/// Inline PEM wins; otherwise the file is read. Blank values count as absent.
fn resolve_material(
    what: &'static str,
    inline: &Option<String>,
    file: &Option<PathBuf>,
) -> Result<Vec<u8>, TransportError> {
    if let Some(pem) = inline.as_deref().filter(|pem| !pem.trim().is_empty()) {
        return Ok(pem.as_bytes().to_vec());
    }
    match file.as_deref().filter(|path| !path.as_os_str().is_empty()) {
        Some(path) => read_file(what, path),
        None => Err(TransportError::MissingMaterial(what)),
    }
}

fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, TransportError> {
    let contents = std::fs::read(path).map_err(|source| TransportError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })?;
    if contents.iter().all(u8::is_ascii_whitespace) {
        return Err(TransportError::MissingMaterial(what));
    }
    Ok(contents)
}

fn parse_certificates(
    what: &'static str,
    pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TransportError::InvalidPem {
            what,
            reason: err.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TransportError::InvalidPem {
            what,
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn missing_ca_is_rejected() {
        let err = build_mtls_client(&MtlsSettings::default(), TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::MissingMaterial("CA certificate")));
    }

    #[test]
    fn blank_inline_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let ca_file = dir.path().join("ca.pem");
        std::fs::write(&ca_file, "   \n").unwrap();

        let settings = MtlsSettings {
            ca_pem: Some("  ".into()),
            ca_file: Some(ca_file),
            ..Default::default()
        };
        let err = build_mtls_client(&settings, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::MissingMaterial("CA certificate")));
    }

    #[test]
    fn unreadable_file_reports_path() {
        let settings = MtlsSettings {
            ca_file: Some(PathBuf::from("/nonexistent/tridot/ca.pem")),
            ..Default::default()
        };
        let err = build_mtls_client(&settings, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Read { what: "CA certificate", .. }));
    }

    #[test]
    fn missing_client_key_is_rejected() {
        let settings = MtlsSettings {
            ca_pem: Some("ca".into()),
            cert_pem: Some("cert".into()),
            ..Default::default()
        };
        let err = build_mtls_client(&settings, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::MissingMaterial("client key")));
    }

    #[test]
    fn garbage_pem_is_rejected_before_building() {
        let settings = MtlsSettings {
            ca_pem: Some("not a certificate".into()),
            cert_pem: Some("not a certificate".into()),
            key_pem: Some("not a key".into()),
            ..Default::default()
        };
        let err = build_mtls_client(&settings, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPem { what: "CA certificate", .. }));
    }
}
