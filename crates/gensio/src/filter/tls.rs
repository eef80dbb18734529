//! TLS filter stage (`ssl`).
//!
//! Recognised keys: `key`, `cert` (local identity, PEM files), `CA` (PEM
//! bundle used to verify the peer) and the `clientauth` flag, which makes
//! the accept side demand a client certificate. With `clientauth` and no
//! `CA` every client certificate is rejected.
//!
//! Once the TLS handshake finishes the accept side writes a single ready
//! byte that the connect side waits for. Under TLS 1.3 the server judges
//! the client certificate only after the client considers the handshake
//! done; waiting for the ready byte makes a rejection fail establishment on
//! both ends instead of surfacing on the first application read.

use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::channel::{BoxedChannel, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{DetectedBy, GensioError, ParseError, Result};
use crate::filter::{FilterDriver, Wrapped};

const READY: u8 = 0x01;

/// The `ssl` filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsFilter;

/// TLS material named by one `ssl` stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsParams {
    /// PEM private key path.
    pub key: Option<String>,
    /// PEM certificate chain path.
    pub cert: Option<String>,
    /// PEM trust anchors, from the `CA` key.
    pub ca: Option<String>,
    /// Server side: demand a client certificate.
    pub clientauth: bool,
}

impl TlsParams {
    /// Reads `key`, `cert`, `CA` and `clientauth`.
    pub fn from_spec(spec: &StageSpec) -> std::result::Result<Self, ParseError> {
        spec.check_keys(&["key", "cert", "CA", "clientauth"])?;
        let params = Self {
            key: spec.param("key").map(str::to_string),
            cert: spec.param("cert").map(str::to_string),
            ca: spec.param("CA").map(str::to_string),
            clientauth: spec.flag("clientauth")?,
        };
        match (&params.key, &params.cert) {
            (Some(_), None) => Err(spec.missing("cert (key given without cert)")),
            (None, Some(_)) => Err(spec.missing("key (cert given without key)")),
            _ => Ok(params),
        }
    }
}

fn tls_err(reason: impl fmt::Display) -> GensioError {
    GensioError::Tls {
        reason: reason.to_string(),
    }
}

fn read_pem(config: &StackConfig, path: &str) -> Result<Vec<u8>> {
    let resolved = config.resolve_path(path);
    std::fs::read(&resolved).map_err(|e| tls_err(format!("{}: {}", resolved.display(), e)))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn root_store(pem: &[u8]) -> Result<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs_from_pem(pem)? {
        roots
            .add(cert)
            .map_err(|e| tls_err(format!("failed to add CA cert: {}", e)))?;
    }
    Ok(roots)
}

/// Builds the server-side configuration for an accepting `ssl` stage.
pub fn server_config(params: &TlsParams, config: &StackConfig) -> Result<rustls::ServerConfig> {
    let (Some(key), Some(cert)) = (&params.key, &params.cert) else {
        return Err(tls_err("accept side needs key= and cert="));
    };
    let certs = load_certs_from_pem(&read_pem(config, cert)?)?;
    let key = load_private_key_from_pem(&read_pem(config, key)?)?;
    let provider = provider();

    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?;
    let builder = if params.clientauth {
        let verifier: Arc<dyn ClientCertVerifier> = match &params.ca {
            Some(ca) => {
                let roots = root_store(&read_pem(config, ca)?)?;
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .map_err(|e| tls_err(format!("failed to build client verifier: {}", e)))?
            }
            None => Arc::new(RejectClientCerts { provider }),
        };
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    builder
        .with_single_cert(certs, key)
        .map_err(|e| tls_err(format!("failed to set server cert: {}", e)))
}

/// Builds the client-side configuration for a connecting `ssl` stage.
pub fn client_config(params: &TlsParams, config: &StackConfig) -> Result<rustls::ClientConfig> {
    let Some(ca) = &params.ca else {
        return Err(tls_err("connect side needs CA= to verify the server"));
    };
    let roots = root_store(&read_pem(config, ca)?)?;
    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?
        .with_root_certificates(roots);

    match (&params.key, &params.cert) {
        (Some(key), Some(cert)) => {
            let certs = load_certs_from_pem(&read_pem(config, cert)?)?;
            let key = load_private_key_from_pem(&read_pem(config, key)?)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| tls_err(format!("failed to create client config: {}", e)))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Maps a failed handshake onto an authentication failure, tagging which
/// side gave up first.
fn handshake_error(err: io::Error) -> GensioError {
    let rustls_err = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    let (detected_by, reason) = match rustls_err {
        Some(rustls::Error::AlertReceived(alert)) => {
            (DetectedBy::Remote, format!("peer sent alert {:?}", alert))
        }
        Some(other) => (DetectedBy::Local, other.to_string()),
        None => match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => (DetectedBy::Remote, err.to_string()),
            _ => (DetectedBy::Local, err.to_string()),
        },
    };
    GensioError::AuthenticationFailed {
        stage: "ssl".to_string(),
        detected_by,
        reason,
    }
}

fn server_name(host: Option<&str>) -> Result<ServerName<'static>> {
    let host = host.unwrap_or("localhost");
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string()).map_err(|e| tls_err(format!("invalid domain: {}", e)))
}

#[async_trait]
impl FilterDriver for TlsFilter {
    fn name(&self) -> &'static str {
        "ssl"
    }

    fn validate(&self, spec: &StageSpec) -> std::result::Result<(), ParseError> {
        TlsParams::from_spec(spec).map(|_| ())
    }

    async fn wrap(
        &self,
        spec: &StageSpec,
        link: RawLink,
        role: Role,
        config: &StackConfig,
    ) -> Result<Wrapped> {
        let params = TlsParams::from_spec(spec)?;
        let (channel, mut meta) = link.take_channel();

        let stream = match role {
            Role::Accept => {
                let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config(&params, config)?));
                let mut stream = acceptor.accept(channel).await.map_err(handshake_error)?;
                stream.write_all(&[READY]).await.map_err(handshake_error)?;
                stream.flush().await.map_err(handshake_error)?;
                TlsStream::Server(stream)
            }
            Role::Connect => {
                let connector =
                    tokio_rustls::TlsConnector::from(Arc::new(client_config(&params, config)?));
                let domain = server_name(meta.host.as_deref())?;
                let mut stream = connector
                    .connect(domain, channel)
                    .await
                    .map_err(handshake_error)?;
                let mut ready = [0u8; 1];
                stream.read_exact(&mut ready).await.map_err(handshake_error)?;
                if ready[0] != READY {
                    return Err(GensioError::InvalidFrame {
                        reason: format!("unexpected TLS ready marker 0x{:02x}", ready[0]),
                    });
                }
                TlsStream::Client(stream)
            }
        };

        meta.peer_certs = stream.peer_certificates();
        tracing::debug!(
            raddr = %meta.raddr,
            ?role,
            peer_cert = meta.peer_certs.is_some(),
            "TLS established"
        );
        Ok(Wrapped::Single(meta.attach("ssl", Box::new(stream))))
    }
}

/// Client verifier used for `clientauth` without a `CA`: a certificate is
/// demanded and never trusted.
#[derive(Debug)]
struct RejectClientCerts {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for RejectClientCerts {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Err(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// A TLS stream that can be either client or server side.
///
/// Provides access to peer certificates for mTLS authentication.
pub enum TlsStream {
    /// Client-side TLS stream.
    Client(tokio_rustls::client::TlsStream<BoxedChannel>),
    /// Server-side TLS stream.
    Server(tokio_rustls::server::TlsStream<BoxedChannel>),
}

impl TlsStream {
    /// Returns the peer's certificate chain, if available.
    pub fn peer_certificates(&self) -> Option<Vec<Vec<u8>>> {
        let certs = match self {
            TlsStream::Client(s) => s.get_ref().1.peer_certificates(),
            TlsStream::Server(s) => s.get_ref().1.peer_certificates(),
        };
        certs.map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
    }
}

impl AsyncRead for TlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            TlsStream::Client(s) => Pin::new(s).poll_read(cx, buf),
            TlsStream::Server(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            TlsStream::Client(s) => Pin::new(s).poll_write(cx, buf),
            TlsStream::Server(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            TlsStream::Client(s) => Pin::new(s).poll_flush(cx),
            TlsStream::Server(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            TlsStream::Client(s) => Pin::new(s).poll_shutdown(cx),
            TlsStream::Server(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Loads certificates from PEM-encoded data.
pub fn load_certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(item)) = rustls_pemfile::read_one(&mut cursor) {
        if let rustls_pemfile::Item::X509Certificate(cert) = item {
            certs.push(cert);
        }
    }

    if certs.is_empty() {
        return Err(tls_err("no certificates found in PEM"));
    }

    Ok(certs)
}

/// Loads the first private key (PKCS#8, PKCS#1 or SEC1) from PEM-encoded data.
pub fn load_private_key_from_pem(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(item)) = rustls_pemfile::read_one(&mut cursor) {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => {}
        }
    }

    Err(tls_err("no private key found in PEM"))
}

/// Generates a self-signed CA certificate and key pair using rcgen.
///
/// Returns (CA certificate PEM, CA key PEM).
pub fn generate_self_signed_ca() -> Result<(Vec<u8>, Vec<u8>)> {
    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| tls_err(format!("failed to generate CA key: {}", e)))?;

    let mut params = rcgen::CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "gensio test CA");

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| tls_err(format!("failed to create CA certificate: {}", e)))?;

    Ok((cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes()))
}

/// Generates a certificate for `name` signed by the given CA.
///
/// Returns (certificate PEM, key PEM).
pub fn generate_signed_cert(
    ca_cert_pem: &[u8],
    ca_key_pem: &[u8],
    name: &str,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let ca_key_pem = std::str::from_utf8(ca_key_pem)
        .map_err(|e| tls_err(format!("invalid CA key PEM: {}", e)))?;
    let ca_key = rcgen::KeyPair::from_pem(ca_key_pem)
        .map_err(|e| tls_err(format!("failed to parse CA key: {}", e)))?;

    let ca_cert_pem = std::str::from_utf8(ca_cert_pem)
        .map_err(|e| tls_err(format!("invalid CA cert PEM: {}", e)))?;
    let ca_cert = rcgen::CertificateParams::from_ca_cert_pem(ca_cert_pem)
        .map_err(|e| tls_err(format!("failed to parse CA certificate: {}", e)))?
        .self_signed(&ca_key)
        .map_err(|e| tls_err(format!("failed to reconstruct CA certificate: {}", e)))?;

    let key = rcgen::KeyPair::generate()
        .map_err(|e| tls_err(format!("failed to generate key: {}", e)))?;
    let mut params = rcgen::CertificateParams::new(vec![name.to_string()])
        .map_err(|e| tls_err(format!("failed to create certificate params: {}", e)))?;
    params.distinguished_name.push(rcgen::DnType::CommonName, name);

    let cert = params
        .signed_by(&key, &ca_cert, &ca_key)
        .map_err(|e| tls_err(format!("failed to sign certificate: {}", e)))?;

    Ok((cert.pem().into_bytes(), key.serialize_pem().into_bytes()))
}

/// Writes `pem` to `dir/name` and returns the full path as a string.
pub fn write_pem(dir: &Path, name: &str, pem: &[u8]) -> Result<String> {
    let path = dir.join(name);
    std::fs::write(&path, pem)?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::echo::EchoChannel;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: StackConfig,
    }

    /// CA, a "localhost" server cert, a "client" cert from the same CA and
    /// a "rogue" cert from an unrelated CA, all in one temp dir.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (ca, ca_key) = generate_self_signed_ca().unwrap();
        let (cert, key) = generate_signed_cert(&ca, &ca_key, "localhost").unwrap();
        let (ccert, ckey) = generate_signed_cert(&ca, &ca_key, "client").unwrap();
        let (other_ca, other_key) = generate_self_signed_ca().unwrap();
        let (rcert, rkey) = generate_signed_cert(&other_ca, &other_key, "rogue").unwrap();
        for (name, pem) in [
            ("CA.pem", &ca),
            ("cert.pem", &cert),
            ("key.pem", &key),
            ("clientcert.pem", &ccert),
            ("clientkey.pem", &ckey),
            ("roguecert.pem", &rcert),
            ("roguekey.pem", &rkey),
        ] {
            write_pem(dir.path(), name, pem).unwrap();
        }
        let config = StackConfig::default().with_key_dir(dir.path());
        Fixture { _dir: dir, config }
    }

    fn ssl(params: &[(&str, &str)]) -> StageSpec {
        params
            .iter()
            .fold(StageSpec::filter("ssl"), |spec, (k, v)| spec.with_param(k, v))
    }

    async fn handshake(
        server: StageSpec,
        client: StageSpec,
        config: &StackConfig,
    ) -> (Result<Wrapped>, Result<Wrapped>) {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let server_link = RawLink::new("duplex", Box::new(a), "client");
        let client_link = RawLink::new("duplex", Box::new(b), "server").with_host("localhost");
        let server_cfg = config.clone();
        let client_cfg = config.clone();
        let srv = tokio::spawn(async move {
            TlsFilter
                .wrap(&server, server_link, Role::Accept, &server_cfg)
                .await
        });
        let cli = tokio::spawn(async move {
            TlsFilter
                .wrap(&client, client_link, Role::Connect, &client_cfg)
                .await
        });
        (srv.await.unwrap(), cli.await.unwrap())
    }

    #[test]
    fn test_params_validation() {
        assert!(TlsParams::from_spec(&ssl(&[("key", "k")])).is_err());
        assert!(TlsParams::from_spec(&ssl(&[("bogus", "1")])).is_err());
        let params =
            TlsParams::from_spec(&ssl(&[("key", "k"), ("cert", "c"), ("clientauth", "")])).unwrap();
        assert!(params.clientauth);
        assert_eq!(params.ca, None);
    }

    #[test]
    fn test_generate_certs() {
        let (ca_cert_pem, ca_key_pem) = generate_self_signed_ca().unwrap();
        assert!(String::from_utf8_lossy(&ca_cert_pem).contains("BEGIN CERTIFICATE"));
        assert!(String::from_utf8_lossy(&ca_key_pem).contains("BEGIN PRIVATE KEY"));
        let (cert, key) = generate_signed_cert(&ca_cert_pem, &ca_key_pem, "node1").unwrap();
        assert!(!load_certs_from_pem(&cert).unwrap().is_empty());
        assert!(!load_private_key_from_pem(&key).unwrap().secret_der().is_empty());
    }

    #[test]
    fn test_load_certs_rejects_garbage() {
        assert!(load_certs_from_pem(b"not a pem").is_err());
        assert!(load_private_key_from_pem(b"not a pem").is_err());
    }

    #[test]
    fn test_config_requirements() {
        let f = fixture();
        assert!(server_config(&TlsParams::default(), &f.config).is_err());
        assert!(client_config(&TlsParams::default(), &f.config).is_err());
        let missing = TlsParams {
            ca: Some("nope.pem".to_string()),
            ..TlsParams::default()
        };
        assert!(matches!(
            client_config(&missing, &f.config),
            Err(GensioError::Tls { .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_and_data() {
        let f = fixture();
        let (srv, cli) = handshake(
            ssl(&[("key", "key.pem"), ("cert", "cert.pem")]),
            ssl(&[("CA", "CA.pem")]),
            &f.config,
        )
        .await;
        let Wrapped::Single(mut server) = srv.unwrap() else {
            panic!("expected single link");
        };
        let Wrapped::Single(mut client) = cli.unwrap() else {
            panic!("expected single link");
        };
        assert_eq!(client.stages, vec!["ssl", "duplex"]);
        assert!(client.peer_certs.is_some());
        assert!(server.peer_certs.is_none());

        client.channel.write_all(b"secret").await.unwrap();
        client.channel.flush().await.unwrap();
        let mut buf = [0u8; 6];
        server.channel.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"secret");
    }

    #[tokio::test]
    async fn test_clientauth_without_client_cert_fails() {
        let f = fixture();
        let (srv, cli) = handshake(
            ssl(&[("key", "key.pem"), ("cert", "cert.pem"), ("clientauth", ""), ("CA", "CA.pem")]),
            ssl(&[("CA", "CA.pem")]),
            &f.config,
        )
        .await;
        assert!(srv.unwrap_err().is_auth_failure());
        assert!(cli.unwrap_err().is_auth_failure());
    }

    #[tokio::test]
    async fn test_clientauth_rejects_untrusted_cert() {
        let f = fixture();
        let (srv, cli) = handshake(
            ssl(&[("key", "key.pem"), ("cert", "cert.pem"), ("clientauth", ""), ("CA", "CA.pem")]),
            ssl(&[("CA", "CA.pem"), ("key", "roguekey.pem"), ("cert", "roguecert.pem")]),
            &f.config,
        )
        .await;
        let err = srv.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(err.to_string().ends_with("Communication error"));
        assert!(cli.unwrap_err().is_auth_failure());
    }

    #[tokio::test]
    async fn test_clientauth_without_ca_rejects_everyone() {
        let f = fixture();
        let (srv, cli) = handshake(
            ssl(&[("key", "key.pem"), ("cert", "cert.pem"), ("clientauth", "")]),
            ssl(&[("CA", "CA.pem"), ("key", "clientkey.pem"), ("cert", "clientcert.pem")]),
            &f.config,
        )
        .await;
        assert!(srv.unwrap_err().is_auth_failure());
        assert!(cli.unwrap_err().is_auth_failure());
    }

    #[tokio::test]
    async fn test_clientauth_with_trusted_cert() {
        let f = fixture();
        let (srv, cli) = handshake(
            ssl(&[("key", "key.pem"), ("cert", "cert.pem"), ("clientauth", ""), ("CA", "CA.pem")]),
            ssl(&[("CA", "CA.pem"), ("key", "clientkey.pem"), ("cert", "clientcert.pem")]),
            &f.config,
        )
        .await;
        let Wrapped::Single(server) = srv.unwrap() else {
            panic!("expected single link");
        };
        assert!(server.peer_certs.is_some());
        assert!(cli.is_ok());
    }

    #[tokio::test]
    async fn test_non_tls_peer_is_auth_failure() {
        let f = fixture();
        // The echo channel hands the client its own ClientHello back.
        let link = RawLink::new("echo", Box::new(EchoChannel::new()), "echo");
        let err = TlsFilter
            .wrap(&ssl(&[("CA", "CA.pem")]), link, Role::Connect, &f.config)
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
    }
}
