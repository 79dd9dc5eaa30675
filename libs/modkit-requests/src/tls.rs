//! rustls setup for the hyper transport.
//!
//! OS root certificates are read once per process and reused by every
//! transport built with [`TlsRootConfig::Native`].

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static NATIVE_LOADS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    NATIVE_LOADS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    if loaded.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
    }
    loaded.certs
}

/// OS root certificates, loaded on first use. May be empty.
#[must_use]
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// The process-wide rustls provider if one is installed, aws-lc-rs otherwise.
///
/// Never installs a provider globally.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client config trusting the OS root store.
///
/// # Errors
/// Returns `HttpError::Tls` when the OS store is empty or none of its
/// certificates parse.
fn native_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!("none of the {ignored} native root CA certificates could be parsed").into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector advertising h2 and http/1.1 through ALPN.
///
/// Plain `http://` is only dialled when `security` is `AllowInsecureHttp`.
///
/// # Errors
/// Returns `HttpError::Tls` if the root store cannot be set up.
pub fn https_connector(
    roots: TlsRootConfig,
    security: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match roots {
        TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => HttpsConnectorBuilder::new().with_tls_config(native_client_config()?),
    };

    let builder = match security {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http(),
        TransportSecurity::TlsOnly => builder.https_only(),
    };
    Ok(builder.enable_all_versions().build())
}
