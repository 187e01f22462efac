//! Optional TLS termination with client-certificate verification
//! (`spec.md` §6 auth collaborator). Both genuinely optional: with no
//! `TLS_CERT_PATH`/`TLS_KEY_PATH` the daemon serves plain HTTP; with those
//! set but no `CLIENT_CA_CERT` it terminates TLS without requiring a client
//! certificate; with all three set it requires a client cert signed by the
//! configured CA.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::config_env::AuthConfig;

pub async fn build_rustls_config(auth: &AuthConfig) -> anyhow::Result<Option<RustlsConfig>> {
    let (cert_path, key_path) = match (&auth.tls_cert, &auth.tls_key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return Ok(None),
    };

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = rustls::ServerConfig::builder();
    let server_config = match &auth.client_ca_cert {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
            builder.with_client_cert_verifier(verifier).with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(Some(RustlsConfig::from_config(Arc::new(server_config))))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn load_key(path: &Path) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}
