//! TLS client configuration (spec §4.3): TLS 1.2+, system trust store
//! preferred with a bundled-root fallback, safe cipher suites only.
//!
//! Hostname verification (RFC 6125, wildcard-label aware) and cipher-suite
//! exclusion of anonymous/null/PSK suites are both handled by rustls'
//! default `WebPkiServerVerifier` and default suite list — this module only
//! has to assemble a trust store and cap the minimum protocol version.

use std::sync::{Arc, OnceLock};

use rustls::{ClientConfig, RootCertStore};

/// Lazily-built, shared TLS client config. Built once per process since
/// loading the system trust store is not free and the config is immutable
/// after construction.
static CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

pub fn client_config() -> Arc<ClientConfig> {
    CLIENT_CONFIG.get_or_init(build_client_config).clone()
}

fn build_client_config() -> Arc<ClientConfig> {
    // Installing twice across tests in the same process is harmless; only
    // the first call wins and later ones return `Err`, which we ignore.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut roots = RootCertStore::empty();

    match rustls_native_certs::load_native_certs() {
        result if !result.certs.is_empty() => {
            for cert in result.certs {
                // A handful of malformed system certs are common in the
                // wild; skip them rather than fail startup over one bad
                // entry.
                let _ = roots.add(cert);
            }
            for err in result.errors {
                tracing::warn!(error = %err, "ignoring unreadable system certificate");
            }
        }
        _ => {
            tracing::info!("no usable system trust store found; falling back to bundled roots");
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    if roots.is_empty() {
        tracing::warn!("system trust store yielded zero usable roots; falling back to bundled roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .with_root_certificates(roots)
        .with_no_client_auth();

    Arc::new(config)
}
