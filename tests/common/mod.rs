#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use podwarden::{AttestorDeps, ManualClock, ProcCgroupResolver, Selector, SigstoreBackend};
use podwarden_sigstore::{
    BoxError, CheckOptions, ImageVerifier, ManifestFetcher, Reference, VerifiedSignatures,
    VerifyFailure,
};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

pub const PID: u32 = 123;
pub const BLOG_CONTAINER_ID: &str =
    "9bca8d63d5fa610783847915bcff0ecac1273e5b4bed3f6fa1b07350e0135961";
pub const BLOG_POD_UID: &str = "2c48913c-b29f-11e7-9350-020968147796";
pub const BLOG_IMAGE_ID: &str = "docker-pullable://localhost/spiffe/blog@sha256:0cfdaced91cb46dd7af48309799a3c351e4ca2d5e1ee9737ca0cbd932cb79898";
pub const POD_LIST: &str = "pod_list.json";
pub const POD_LIST_NOT_RUNNING: &str = "pod_list_not_running.json";

pub const POD_SELECTORS: &[&str] = &[
    "node-name:k8s-node-1",
    "ns:default",
    "pod-image-count:2",
    "pod-image:docker-pullable://localhost/spiffe/blog@sha256:0cfdaced91cb46dd7af48309799a3c351e4ca2d5e1ee9737ca0cbd932cb79898",
    "pod-image:docker-pullable://localhost/spiffe/ghostunnel@sha256:b2fc20676c92a433b9a91f3f4535faddec0c2c3613849ac12f02c1d5cfcd4c3a",
    "pod-image:localhost/spiffe/blog:latest",
    "pod-image:localhost/spiffe/ghostunnel:latest",
    "pod-init-image-count:0",
    "pod-label:k8s-app:blog",
    "pod-label:version:v0",
    "pod-name:blog-24ck7",
    "pod-owner-uid:ReplicationController:2c401175-b29f-11e7-9350-020968147796",
    "pod-owner:ReplicationController:blog",
    "pod-uid:2c48913c-b29f-11e7-9350-020968147796",
    "sa:default",
];

pub const CONTAINER_SELECTORS: &[&str] = &[
    "container-image:docker-pullable://localhost/spiffe/blog@sha256:0cfdaced91cb46dd7af48309799a3c351e4ca2d5e1ee9737ca0cbd932cb79898",
    "container-image:localhost/spiffe/blog:latest",
    "container-name:blog",
];

/// Sorted `k8s` selectors built from the given value lists
pub fn expected(groups: &[&[&str]]) -> Vec<Selector> {
    let mut selectors: Vec<Selector> = groups
        .iter()
        .flat_map(|group| group.iter())
        .map(|value| Selector::k8s(*value))
        .collect();
    selectors.sort();
    selectors
}

pub fn sorted(mut selectors: Vec<Selector>) -> Vec<Selector> {
    selectors.sort();
    selectors
}

pub fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(path).expect("fixture must exist")
}

pub fn install_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Scratch directory holding credentials and a fake `/proc`
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let workspace = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        workspace.write_cgroup(&format!(
            "12:pids:/kubepods/besteffort/pod{BLOG_POD_UID}/{BLOG_CONTAINER_ID}\n\
             1:name=systemd:/kubepods/besteffort/pod{BLOG_POD_UID}/{BLOG_CONTAINER_ID}\n"
        ));
        workspace.write("token", "default-token");
        workspace
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.path(name), contents).expect("write workspace file");
    }

    pub fn write_cgroup(&self, contents: &str) {
        let pid_dir = self.path("proc").join(PID.to_string());
        std::fs::create_dir_all(&pid_dir).expect("create proc dir");
        std::fs::write(pid_dir.join("cgroup"), contents).expect("write cgroup");
    }

    pub fn deps(&self, clock: Arc<ManualClock>, env: &[(&str, &str)]) -> AttestorDeps {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AttestorDeps::new()
            .with_clock(clock)
            .with_resolver(Arc::new(ProcCgroupResolver::new(self.path("proc"))))
            .with_env(Arc::new(move |key: &str| env.get(key).cloned()))
    }
}

/// Certificate and key issued by a [`TestCa`]
pub struct Issued {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivatePkcs8KeyDer<'static>,
}

impl Issued {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key_der.clone_key())
    }
}

pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        let key = KeyPair::generate().expect("ca key");
        let cert = params.self_signed(&key).expect("self-signed ca");
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn server_cert(&self, dns_name: &str) -> Issued {
        self.issue(vec![dns_name.to_string()], ExtendedKeyUsagePurpose::ServerAuth, "kubelet")
    }

    pub fn client_cert(&self) -> Issued {
        self.issue(Vec::new(), ExtendedKeyUsagePurpose::ClientAuth, "CLIENT")
    }

    fn issue(&self, names: Vec<String>, usage: ExtendedKeyUsagePurpose, cn: &str) -> Issued {
        let mut params = CertificateParams::new(names).expect("leaf params");
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![usage];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        let key = KeyPair::generate().expect("leaf key");
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("signed leaf");
        Issued {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: PrivatePkcs8KeyDer::from(key.serialize_der()),
        }
    }
}

/// What the fake kubelet requires from its caller
#[derive(Debug, Clone)]
pub enum ClientAuth {
    /// Plain HTTP, no checks
    Open,
    Token(String),
    Certificate,
    Anonymous,
}

struct KubeletState {
    auth: ClientAuth,
    pod_lists: Mutex<VecDeque<Vec<u8>>>,
    requests: AtomicUsize,
}

impl KubeletState {
    fn respond(&self, client_cert: bool, authorization: &str) -> (u16, Vec<u8>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.auth {
            ClientAuth::Certificate if !client_cert => {
                return (403, b"client auth expected but not used".to_vec());
            }
            ClientAuth::Token(_) | ClientAuth::Anonymous if client_cert => {
                return (403, b"client auth not expected but used".to_vec());
            }
            ClientAuth::Token(token) => {
                let expected = format!("Bearer {token}");
                if authorization != expected {
                    return (
                        403,
                        format!("expected {expected:?}, got {authorization:?}").into_bytes(),
                    );
                }
            }
            _ => {}
        }
        match self.pod_lists.lock().pop_front() {
            Some(body) => (200, body),
            None => (200, b"not configured to return a pod list".to_vec()),
        }
    }
}

/// Minimal kubelet answering `GET /pods` from a queue of fixtures
pub struct FakeKubelet {
    addr: SocketAddr,
    state: Arc<KubeletState>,
    shutdown: CancellationToken,
}

impl FakeKubelet {
    pub async fn insecure() -> Self {
        Self::start(None, ClientAuth::Open).await
    }

    /// TLS kubelet serving `server`, accepting client certificates from `client_ca`
    pub async fn secure(server: &Issued, client_ca: &TestCa, auth: ClientAuth) -> Self {
        install_crypto_provider();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = RootCertStore::empty();
        roots.add(client_ca.der()).expect("client ca");
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .allow_unauthenticated()
            .build()
            .expect("client verifier");
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![server.cert_der.clone()], server.private_key())
            .expect("server config");
        Self::start(Some(TlsAcceptor::from(Arc::new(config))), auth).await
    }

    async fn start(acceptor: Option<TlsAcceptor>, auth: ClientAuth) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(KubeletState {
            auth,
            pod_lists: Mutex::new(VecDeque::new()),
            requests: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, acceptor, state.clone(), shutdown.clone()));
        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn push_pod_list(&self, fixture_name: &str) {
        self.state.pod_lists.lock().push_back(fixture(fixture_name));
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeKubelet {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    state: Arc<KubeletState>,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => continue,
            },
        };
        let state = state.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor {
                None => {
                    let _ = handle(stream, false, &state).await;
                }
                Some(acceptor) => {
                    if let Ok(tls) = acceptor.accept(stream).await {
                        let client_cert = tls
                            .get_ref()
                            .1
                            .peer_certificates()
                            .is_some_and(|certs| !certs.is_empty());
                        let _ = handle(tls, client_cert, &state).await;
                    }
                }
            }
        });
    }
}

async fn handle<S>(mut stream: S, client_cert: bool, state: &KubeletState) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(&mut stream).await?;
    let authorization = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default();

    let (status, body) = state.respond(client_cert, &authorization);
    let reason = if status == 200 { "OK" } else { "Forbidden" };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|window| window == b"\r\n\r\n") && buf.len() < 64 * 1024 {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Waits until the attestor has swapped in `generation` kubelet clients.
pub async fn wait_for_reload(attestor: &podwarden::K8sAttestor, generation: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while attestor.credential_generation() < generation {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("credential reload did not happen");
}

pub struct StaticFetcher;

#[async_trait]
impl ManifestFetcher for StaticFetcher {
    async fn fetch_manifest(&self, _reference: &Reference) -> Result<Vec<u8>, BoxError> {
        Ok(br#"{"schemaVersion":2}"#.to_vec())
    }
}

pub struct FakeVerifier {
    result: Result<VerifiedSignatures, VerifyFailure>,
    calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(result: Result<VerifiedSignatures, VerifyFailure>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageVerifier for FakeVerifier {
    async fn verify(
        &self,
        _reference: &Reference,
        _options: &CheckOptions,
    ) -> Result<VerifiedSignatures, VerifyFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub fn sigstore_backend(verifier: Arc<FakeVerifier>) -> SigstoreBackend {
    SigstoreBackend::new(Arc::new(StaticFetcher), verifier)
}

/// Log sink for asserting on emitted events
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Routes this thread's tracing output into a [`LogCapture`].
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}
