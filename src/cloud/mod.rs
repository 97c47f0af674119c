// SPDX-License-Identifier: Apache-2.0

//! Cloud Metadata Bootstrap (§4.10): resolves a secure-connect bundle
//! (or a pre-computed endpoint) into contact points, local datacenter,
//! and SNI proxy address, so the rest of the driver never has to know
//! the cluster was reached via a cloud metadata service.

use std::{io::Read, net::SocketAddr};

use serde::Deserialize;

use crate::{
    cfg::config::CloudOptions,
    errors::{DriverError, Result},
};

/// `config.json` inside the secure-connect bundle (§4.10 "Inputs").
#[derive(Debug, Deserialize)]
struct BundleConfig {
    host: String,
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// The metadata service's JSON response body (§4.10 "parse JSON body").
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    contact_points: Vec<String>,
    local_dc: String,
    sni_proxy_address: String,
}

/// Everything a cloud bootstrap contributes to client options.
#[derive(Debug, Clone)]
pub struct CloudTopology {
    pub contact_points: Vec<SocketAddr>,
    pub local_dc: String,
    pub sni_proxy_address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resolves `cloud` options into a [`CloudTopology`], per §4.10's two
/// input forms. Exactly one of `secure_connect_bundle`/`endpoint` is
/// set — `ClusterConfig::validate_and_normalize` already enforces this.
pub async fn resolve(cloud: &CloudOptions) -> Result<CloudTopology> {
    if let Some(bundle_path) = &cloud.secure_connect_bundle {
        resolve_from_bundle(bundle_path).await
    } else if let Some(endpoint) = &cloud.endpoint {
        resolve_from_endpoint(endpoint).await
    } else {
        Err(DriverError::Config(
            "cloud options must set exactly one of secure_connect_bundle or endpoint".to_string(),
        ))
    }
}

struct BundleMaterial {
    config: BundleConfig,
    ca_cert: Vec<u8>,
    client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

/// Reads `config.json`/`ca.crt`/`cert`/`key` out of the ZIP (§4.10
/// "Read ZIP -> parse config.json"). Blocking; run on a `spawn_blocking`
/// task since `zip` has no async API.
fn read_bundle(path: &str) -> Result<BundleMaterial> {
    let file = std::fs::File::open(path)
        .map_err(|e| DriverError::Config(format!("cannot open secure connect bundle {path}: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| DriverError::Config(format!("{path} is not a valid secure connect bundle: {e}")))?;

    let read_entry = |archive: &mut zip::ZipArchive<std::fs::File>, name: &str| -> Result<Vec<u8>> {
        let mut entry = archive
            .by_name(name)
            .map_err(|_| DriverError::Config(format!("secure connect bundle is missing {name}")))?;
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| DriverError::Config(format!("failed to read {name} from bundle: {e}")))?;
        Ok(buf)
    };

    let config_bytes = read_entry(&mut archive, "config.json")?;
    let config: BundleConfig = serde_json::from_slice(&config_bytes)
        .map_err(|e| DriverError::Config(format!("malformed config.json in secure connect bundle: {e}")))?;
    let ca_cert = read_entry(&mut archive, "ca.crt")?;
    let client_cert = read_entry(&mut archive, "cert")?;
    let client_key = read_entry(&mut archive, "key")?;

    Ok(BundleMaterial { config, ca_cert, client_cert, client_key })
}

async fn resolve_from_bundle(path: &str) -> Result<CloudTopology> {
    let owned_path = path.to_string();
    let material = tokio::task::spawn_blocking(move || read_bundle(&owned_path))
        .await
        .map_err(|e| DriverError::internal(format!("bundle read task panicked: {e}")))??;

    let client = build_https_client(&material.ca_cert, &material.client_cert, &material.client_key)?;
    let url = format!("https://{}:{}/metadata", material.config.host, material.config.port);
    let body = fetch_metadata(&client, &url).await?;

    Ok(CloudTopology {
        contact_points: parse_contact_points(&body)?,
        local_dc: body.local_dc,
        sni_proxy_address: body.sni_proxy_address,
        username: material.config.username,
        password: material.config.password,
    })
}

/// The "pre-computed endpoint" form (§4.10): the caller already has a
/// metadata service URL and relies on the platform's trust store rather
/// than bundle-supplied TLS material.
async fn resolve_from_endpoint(endpoint: &str) -> Result<CloudTopology> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| DriverError::Config(format!("failed to build HTTPS client: {e}")))?;
    let body = fetch_metadata(&client, endpoint).await?;

    Ok(CloudTopology {
        contact_points: parse_contact_points(&body)?,
        local_dc: body.local_dc,
        sni_proxy_address: body.sni_proxy_address,
        username: None,
        password: None,
    })
}

async fn fetch_metadata(client: &reqwest::Client, url: &str) -> Result<MetadataResponse> {
    let response = client.get(url).send().await.map_err(|e| no_host_available(url, &e.to_string()))?;
    if !response.status().is_success() {
        return Err(no_host_available(url, &format!("HTTP {}", response.status())));
    }
    response.json().await.map_err(|e| no_host_available(url, &e.to_string()))
}

fn parse_contact_points(body: &MetadataResponse) -> Result<Vec<SocketAddr>> {
    body.contact_points
        .iter()
        .map(|cp| cp.parse::<SocketAddr>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DriverError::protocol(format!("metadata service returned invalid contact point: {e}")))
}

/// `NoHostAvailable` is keyed by `SocketAddr`, but a metadata-service
/// failure has no single host to blame; `0.0.0.0:0` is used as an
/// inert placeholder so the error message still carries the real cause
/// (§4.10 "HTTP non-200 or parse failure -> `NoHostAvailable` wrapping
/// the original error").
fn no_host_available(url: &str, cause: &str) -> DriverError {
    let placeholder: SocketAddr = "0.0.0.0:0".parse().expect("constant address");
    DriverError::NoHostAvailable { errors: vec![(placeholder, format!("{url}: {cause}"))] }
}

/// Builds an HTTPS client pinned to the bundle's CA, presenting its
/// client certificate, with hostname-vs-certificate checking disabled
/// — SNI proxy routing means the connected address and the
/// certificate's subject differ intentionally (§4.10 "disable
/// hostname-vs-CN checking thereafter").
fn build_https_client(ca_cert: &[u8], client_cert: &[u8], client_key: &[u8]) -> Result<reqwest::Client> {
    let ca = reqwest::Certificate::from_pem(ca_cert)
        .map_err(|e| DriverError::Config(format!("invalid ca.crt in secure connect bundle: {e}")))?;

    let mut identity_pem = Vec::with_capacity(client_cert.len() + client_key.len());
    identity_pem.extend_from_slice(client_cert);
    identity_pem.extend_from_slice(client_key);
    let identity = reqwest::Identity::from_pem(&identity_pem)
        .map_err(|e| DriverError::Config(format!("invalid cert/key in secure connect bundle: {e}")))?;

    reqwest::Client::builder()
        .add_root_certificate(ca)
        .identity(identity)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| DriverError::Config(format!("failed to build HTTPS client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_response_parses_required_fields() {
        let json = r#"{"contact_points": ["10.0.0.1:9042"], "local_dc": "dc1", "sni_proxy_address": "proxy:9042"}"#;
        let parsed: MetadataResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.local_dc, "dc1");
        assert_eq!(parse_contact_points(&parsed).unwrap(), vec!["10.0.0.1:9042".parse().unwrap()]);
    }

    #[test]
    fn invalid_contact_point_is_a_protocol_error() {
        let parsed = MetadataResponse {
            contact_points: vec!["not-an-address".to_string()],
            local_dc: "dc1".to_string(),
            sni_proxy_address: "proxy:9042".to_string(),
        };
        assert!(matches!(parse_contact_points(&parsed), Err(DriverError::Protocol(_))));
    }

    #[tokio::test]
    async fn resolve_with_neither_bundle_nor_endpoint_is_a_config_error() {
        let err = resolve(&CloudOptions { secure_connect_bundle: None, endpoint: None }).await.unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }
}
