//! TLS material loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::lifecycle::sequencer::SubsystemError;

/// Check that `cert_path` holds at least one PEM certificate and `key_path` a private key.
///
/// Returns the number of certificates in the chain.
pub fn check_tls_material(cert_path: &Path, key_path: &Path) -> Result<usize, SubsystemError> {
    let mut certs = open(cert_path, "certificate")?;
    let chain = rustls_pemfile::certs(&mut certs)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SubsystemError::wrap(format!("reading certificates from {}", cert_path.display()), e))?;
    if chain.is_empty() {
        return Err(SubsystemError::msg(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key = open(key_path, "private key")?;
    match rustls_pemfile::private_key(&mut key) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(SubsystemError::msg(format!(
                "no private key found in {}",
                key_path.display()
            )))
        }
        Err(e) => {
            return Err(SubsystemError::wrap(
                format!("reading private key from {}", key_path.display()),
                e,
            ))
        }
    }

    tracing::info!(cert = %cert_path.display(), certificates = chain.len(), "TLS material loaded");
    Ok(chain.len())
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>, SubsystemError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| SubsystemError::wrap(format!("opening {what} file {}", path.display()), e))
}
