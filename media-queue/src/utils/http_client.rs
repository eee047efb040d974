use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

/// Browser-like user agent used for page requests.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Apply an optional proxy URL to an existing `reqwest::ClientBuilder`.
///
/// - `None` => disable all proxy (including env/system)
/// - `Some(url)` => use the explicit proxy; an invalid URL disables proxying
pub fn apply_proxy(builder: reqwest::ClientBuilder, proxy: Option<&str>) -> reqwest::ClientBuilder {
    let Some(url) = proxy else {
        return builder.no_proxy();
    };

    match reqwest::Proxy::all(url) {
        Ok(proxy) => builder.proxy(proxy),
        Err(error) => {
            warn!(
                proxy_url = %url,
                error = %error,
                "Invalid proxy URL; disabling proxy"
            );
            builder.no_proxy()
        }
    }
}

/// Build the shared client used by page resolvers.
pub fn build_client(proxy: Option<&str>, timeout: Duration) -> crate::Result<reqwest::Client> {
    install_rustls_provider();

    let builder = reqwest::Client::builder()
        .user_agent(DEFAULT_UA)
        .timeout(timeout)
        .connect_timeout(timeout);

    apply_proxy(builder, proxy).build().map_err(crate::Error::from)
}
