//! Scenario harness: TLS fixtures and a paired accept/connect runner.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use gensio::filter::tls::{generate_self_signed_ca, generate_signed_cert, write_pem};
use gensio::{Accepter, Connector, Established, Gensio, GensioError, StackConfig};
use tempfile::TempDir;
use thiserror::Error;

/// Payload used by the small-chunk scenarios.
pub const TEST_STRING: &[u8] = b"This is a test string!";

/// Upper bound on any single accept or establish step.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(15);

const COMMUNICATION_ERROR: &str = "Communication error";
const REMOTE_CLOSED: &str = "Remote end closed connection";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("accepter is listening but reported no port")]
    NoPort,
    #[error(transparent)]
    Gensio(#[from] GensioError),
}

/// CA, server, client and untrusted client credentials in a temp directory.
///
/// File names are fixed so descriptors can refer to them relative to the
/// configured key directory: `CA.pem`, `cert.pem`/`key.pem` (issued for
/// `localhost`), `clientcert.pem`/`clientkey.pem`, and
/// `roguecert.pem`/`roguekey.pem` signed by an unrelated CA.
pub struct CertFixture {
    dir: TempDir,
    config: StackConfig,
}

impl CertFixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir().context("creating fixture directory")?;
        let path = dir.path();

        let (ca_cert, ca_key) = generate_self_signed_ca().context("minting CA")?;
        write_pem(path, "CA.pem", &ca_cert)?;

        let (cert, key) = generate_signed_cert(&ca_cert, &ca_key, "localhost")
            .context("minting server certificate")?;
        write_pem(path, "cert.pem", &cert)?;
        write_pem(path, "key.pem", &key)?;

        let (cert, key) = generate_signed_cert(&ca_cert, &ca_key, "client")
            .context("minting client certificate")?;
        write_pem(path, "clientcert.pem", &cert)?;
        write_pem(path, "clientkey.pem", &key)?;

        let (rogue_ca, rogue_ca_key) = generate_self_signed_ca().context("minting rogue CA")?;
        let (cert, key) = generate_signed_cert(&rogue_ca, &rogue_ca_key, "client")
            .context("minting rogue certificate")?;
        write_pem(path, "roguecert.pem", &cert)?;
        write_pem(path, "roguekey.pem", &key)?;

        let config = StackConfig::default().with_key_dir(path);
        Ok(Self { dir, config })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A stack configuration whose relative key paths resolve into the fixture.
    pub fn config(&self) -> StackConfig {
        self.config.clone()
    }
}

/// Both halves of one accept/connect attempt.
pub struct Scenario {
    /// Kept alive so established gensios outlive the runner.
    pub accepter: Accepter,
    pub accepted: gensio::Result<Gensio>,
    pub established: gensio::Result<Established>,
}

impl Scenario {
    /// Both ends, when both established.
    pub fn into_pair(self) -> gensio::Result<(Gensio, Gensio)> {
        let server = self.accepted?;
        match self.established? {
            Established::Open(client) => Ok((server, client)),
            Established::RemoteClosed => Err(GensioError::Closed),
        }
    }
}

/// Starts an accepter for `accepter_desc`, then connects `connector_desc`
/// to it and waits for both sides to finish establishment.
///
/// `{port}` in `connector_desc` is replaced by the accepter's bound port.
pub async fn accept_connect(
    accepter_desc: &str,
    connector_desc: &str,
    config: &StackConfig,
    expect_remclose: bool,
) -> Result<Scenario, HarnessError> {
    let mut accepter = Accepter::new(accepter_desc, config.clone())?;
    accepter.startup().await?;
    let port = accepter.port().ok_or(HarnessError::NoPort)?;

    let descriptor = connector_desc.replace("{port}", &port.to_string());
    let connector = Connector::new(&descriptor, config.clone())?.expect_remclose(expect_remclose);
    tracing::debug!(accepter = accepter_desc, connector = %descriptor, "running scenario");

    let (accepted, established) = tokio::join!(
        bounded("accept", accepter.accept()),
        bounded("establish", connector.establish()),
    );
    Ok(Scenario {
        accepter,
        accepted,
        established,
    })
}

async fn bounded<T>(
    what: &str,
    fut: impl Future<Output = gensio::Result<T>>,
) -> gensio::Result<T> {
    tokio::time::timeout(SCENARIO_TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| {
            Err(GensioError::Timeout {
                what: what.to_string(),
                timeout_ms: SCENARIO_TIMEOUT.as_millis() as u64,
            })
        })
}

/// Asserts that neither side established and that the failure was an
/// authentication failure, whichever side noticed it first.
pub fn assert_auth_rejected(scenario: &Scenario) {
    match &scenario.accepted {
        Ok(io) => panic!("accepter established {:?} despite bad credentials", io),
        Err(e) => {
            let msg = e.to_string();
            assert!(
                e.is_auth_failure()
                    || msg.ends_with(COMMUNICATION_ERROR)
                    || msg.ends_with(REMOTE_CLOSED),
                "accept side failed with an unexpected error: {}",
                msg
            );
        }
    }
    match &scenario.established {
        Ok(Established::RemoteClosed) => {}
        Ok(Established::Open(io)) => panic!("connector established {:?} despite bad credentials", io),
        Err(e) => assert!(
            e.is_auth_failure(),
            "connect side failed with an unexpected error: {}",
            e
        ),
    }
}
