use std::sync::Once;

static INSTALL: Once = Once::new();

/// Installs the process wide rustls provider ahead of the first
/// tls client, later calls are no ops
pub fn install_crypto_provider() {
    INSTALL.call_once(|| {
        // another library may have installed one already, either is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
