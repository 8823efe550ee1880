use std::time::Duration;

use hyper_util::client::legacy::connect::{HttpConnector, HttpsConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use super::context::BoxBody;

pub type OriginClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

/// Build the single shared client used to forward every admitted request to
/// the configured origin. One client, reused for the process lifetime, so
/// connections pool naturally (teacher's `build_cluster_http_client`).
pub fn build_origin_client(connect_timeout: Duration) -> OriginClient {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_keepalive(Some(Duration::from_secs(90)));
    http.set_connect_timeout(Some(connect_timeout));
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new()).build(https)
}
