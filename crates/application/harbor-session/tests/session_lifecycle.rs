use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use camino::Utf8PathBuf;
use harbor_core::{
    AppEvent, AppSnapshot, BuildResult, DevSessionPayload, Extension, ExtensionEvent,
    StatusMessage, UserError,
};
use harbor_session::{
    CoordinatorError, DevSessionCoordinator, DevSessionOptions, MutationOutcome, PrefixedError,
    SessionLogger, SessionTransport, TransportError, UploadTargetParams,
};

// --- Fakes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationBehavior {
    Accept,
    ValidationErrors,
    MixedErrors,
    Http401,
    Client403,
}

struct FakeTransport {
    signed_url: String,
    behavior: MutationBehavior,
    upload_targets: AtomicU32,
    creates: AtomicU32,
    updates: AtomicU32,
    refreshes: AtomicU32,
}

impl FakeTransport {
    fn new(signed_url: impl Into<String>, behavior: MutationBehavior) -> Arc<Self> {
        Arc::new(Self {
            signed_url: signed_url.into(),
            behavior,
            upload_targets: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
        })
    }

    fn mutation_outcome(&self) -> Result<MutationOutcome, TransportError> {
        match self.behavior {
            MutationBehavior::Accept => Ok(MutationOutcome::default()),
            MutationBehavior::ValidationErrors => Ok(MutationOutcome {
                user_errors: vec![UserError {
                    message: "bad config".into(),
                    field: Some(vec!["extensions".into()]),
                    category: "validation".into(),
                }],
            }),
            MutationBehavior::MixedErrors => Ok(MutationOutcome {
                user_errors: vec![
                    UserError {
                        message: "bad config".into(),
                        field: None,
                        category: "validation".into(),
                    },
                    UserError {
                        message: "quota exceeded".into(),
                        field: None,
                        category: "limits".into(),
                    },
                ],
            }),
            MutationBehavior::Http401 => Err(TransportError::Http { status: 401 }),
            MutationBehavior::Client403 => Err(TransportError::Client {
                status: 403,
                body: "session expired".into(),
            }),
        }
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn upload_target(&self, _params: UploadTargetParams) -> Result<String, TransportError> {
        self.upload_targets.fetch_add(1, Ordering::SeqCst);
        Ok(self.signed_url.clone())
    }

    async fn dev_session_create(
        &self,
        _payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.mutation_outcome()
    }

    async fn dev_session_update(
        &self,
        _payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.mutation_outcome()
    }

    async fn refresh_token(&self) -> Result<(), TransportError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLogger {
    warnings: Mutex<Vec<String>>,
    successes: Mutex<Vec<String>>,
    multiple_errors: Mutex<Vec<PrefixedError>>,
    user_errors: Mutex<Vec<UserError>>,
}

impl SessionLogger for RecordingLogger {
    fn info(&self, _message: &str) {}
    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
    fn success(&self, message: &str) {
        self.successes.lock().unwrap().push(message.to_string());
    }
    fn log_extension_events(&self, _event: &AppEvent) {}
    fn log_user_errors(&self, errors: &[UserError], _extensions: &[Extension]) {
        self.user_errors.lock().unwrap().extend_from_slice(errors);
    }
    fn log_multiple_errors(&self, errors: &[PrefixedError]) {
        self.multiple_errors
            .lock()
            .unwrap()
            .extend_from_slice(errors);
    }
    fn log_action_required_messages(&self, _store_fqdn: &str, _event: &AppEvent) {}
}

struct StubApp {
    extensions: Vec<Extension>,
}

impl AppSnapshot for StubApp {
    fn manifest(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({"name": "demo-app", "extensions": ["checkout-ui"]}))
    }

    fn extensions(&self) -> Vec<Extension> {
        self.extensions.clone()
    }
}

// --- Harness ---

async fn start_upload_server() -> (SocketAddr, Arc<Mutex<Vec<u8>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let app = Router::new().route(
        "/bundle.zip",
        put(move |body: Bytes| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = body.to_vec();
                StatusCode::OK
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

struct Harness {
    coordinator: Arc<DevSessionCoordinator>,
    transport: Arc<FakeTransport>,
    logger: Arc<RecordingLogger>,
    uploaded: Arc<Mutex<Vec<u8>>>,
    bundle_dir: Utf8PathBuf,
    _tmp: tempfile::TempDir,
}

async fn harness(behavior: MutationBehavior) -> Harness {
    let (addr, uploaded) = start_upload_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle_dir = Utf8PathBuf::from_path_buf(tmp.path().join("bundle")).unwrap();
    std::fs::create_dir_all(&bundle_dir).unwrap();

    let transport = FakeTransport::new(format!("http://{addr}/bundle.zip?sig=abc"), behavior);
    let logger = Arc::new(RecordingLogger::default());
    let options = DevSessionOptions {
        store_fqdn: "my-store.example.com".into(),
        app_id: "app-123".into(),
        organization_id: "org-9".into(),
        build_output_path: bundle_dir.clone(),
        app_local_proxy_url: "http://localhost:3000".into(),
        app_preview_url: "https://my-store.example.com/preview".into(),
    };
    let coordinator = DevSessionCoordinator::new(
        options,
        transport.clone(),
        logger.clone(),
        reqwest::Client::new(),
    );
    Harness {
        coordinator,
        transport,
        logger,
        uploaded,
        bundle_dir,
        _tmp: tmp,
    }
}

fn ok_event(handles: &[&str]) -> AppEvent {
    let extensions: Vec<Extension> = handles.iter().map(|h| Extension::new(*h)).collect();
    let events = extensions
        .iter()
        .map(|ext| ExtensionEvent {
            extension: ext.clone(),
            build_result: BuildResult::ok(),
        })
        .collect();
    AppEvent::new(Arc::new(StubApp { extensions }), events)
}

fn failed_event(handle: &str) -> AppEvent {
    let extension = Extension::new(handle);
    AppEvent::new(
        Arc::new(StubApp {
            extensions: vec![extension.clone()],
        }),
        vec![ExtensionEvent {
            extension,
            build_result: BuildResult::error("unexpected token"),
        }],
    )
}

fn empty_event() -> AppEvent {
    AppEvent::new(Arc::new(StubApp { extensions: vec![] }), vec![])
}

async fn make_ready(h: &Harness) {
    h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap();
    assert!(h.coordinator.status_manager().status().is_ready);
}

// --- Tests ---

#[tokio::test]
async fn first_upload_creates_then_subsequent_uploads_update() {
    let h = harness(MutationBehavior::Accept).await;

    h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap();
    assert_eq!(h.transport.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.updates.load(Ordering::SeqCst), 0);

    let status = h.coordinator.status_manager().status();
    assert!(status.is_ready);
    assert_eq!(status.message, StatusMessage::Ready);

    let event = ok_event(&["checkout-ui"]);
    let guard = h.coordinator.prepare_event(&event).unwrap();
    h.coordinator.upload_and_handle(event, guard).await.unwrap();

    assert_eq!(h.transport.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.coordinator.status_manager().status().message,
        StatusMessage::Updated
    );
    assert_eq!(
        h.logger.successes.lock().unwrap().as_slice(),
        ["Ready, watching for changes in your app", "Updated"]
    );
}

#[tokio::test]
async fn uploaded_archive_contains_the_manifest() {
    let h = harness(MutationBehavior::Accept).await;
    make_ready(&h).await;

    // The archive is written next to the bundle directory.
    let archive_path = h.bundle_dir.parent().unwrap().join("bundle.zip");
    assert!(archive_path.as_std_path().exists());

    let uploaded = h.uploaded.lock().unwrap().clone();
    assert!(!uploaded.is_empty());

    let mut archive =
        zip_of(&uploaded).unwrap_or_else(|| panic!("uploaded bytes are not a zip archive"));
    let mut manifest = String::new();
    {
        use std::io::Read;
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
    }
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["name"], "demo-app");
}

fn zip_of(bytes: &[u8]) -> Option<zip::ZipArchive<std::io::Cursor<Vec<u8>>>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).ok()
}

#[tokio::test]
async fn events_before_the_session_is_ready_are_ignored() {
    let h = harness(MutationBehavior::Accept).await;

    let event = ok_event(&["checkout-ui"]);
    assert!(h.coordinator.prepare_event(&event).is_none());

    assert_eq!(h.transport.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.updates.load(Ordering::SeqCst), 0);
    assert_eq!(h.logger.warnings.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn build_failures_never_reach_the_network() {
    let h = harness(MutationBehavior::Accept).await;
    make_ready(&h).await;
    let targets_after_start = h.transport.upload_targets.load(Ordering::SeqCst);

    let event = failed_event("pos-ui");
    assert!(h.coordinator.prepare_event(&event).is_none());

    assert_eq!(
        h.coordinator.status_manager().status().message,
        StatusMessage::BuildError
    );
    assert_eq!(
        h.transport.upload_targets.load(Ordering::SeqCst),
        targets_after_start
    );
    assert_eq!(h.transport.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_events_set_ready_without_uploading() {
    let h = harness(MutationBehavior::Accept).await;
    make_ready(&h).await;
    let targets_after_start = h.transport.upload_targets.load(Ordering::SeqCst);

    assert!(h.coordinator.prepare_event(&empty_event()).is_none());

    assert_eq!(
        h.coordinator.status_manager().status().message,
        StatusMessage::Ready
    );
    assert_eq!(
        h.transport.upload_targets.load(Ordering::SeqCst),
        targets_after_start
    );
}

#[tokio::test]
async fn preview_url_selects_the_local_proxy_when_previewable() {
    let h = harness(MutationBehavior::Accept).await;
    make_ready(&h).await;

    let mut previewable = Extension::new("checkout-ui");
    previewable.previewable = true;
    let event = AppEvent::new(
        Arc::new(StubApp {
            extensions: vec![previewable.clone()],
        }),
        vec![ExtensionEvent {
            extension: previewable,
            build_result: BuildResult::ok(),
        }],
    );
    let _guard = h.coordinator.prepare_event(&event).unwrap();
    assert_eq!(
        h.coordinator.status_manager().status().preview_url.as_deref(),
        Some("http://localhost:3000")
    );

    let event = ok_event(&["pos-ui"]);
    let _guard = h.coordinator.prepare_event(&event).unwrap();
    assert_eq!(
        h.coordinator.status_manager().status().preview_url.as_deref(),
        Some("https://my-store.example.com/preview")
    );
}

#[tokio::test]
async fn validation_user_errors_set_the_validation_status() {
    let h = harness(MutationBehavior::ValidationErrors).await;
    let err = h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionNeverReady));
    assert_eq!(
        h.coordinator.status_manager().status().message,
        StatusMessage::ValidationError
    );
    assert_eq!(h.logger.user_errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mixed_user_errors_set_the_remote_error_status() {
    let h = harness(MutationBehavior::MixedErrors).await;
    let err = h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionNeverReady));
    assert_eq!(
        h.coordinator.status_manager().status().message,
        StatusMessage::RemoteError
    );
    assert_eq!(h.logger.user_errors.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn raw_401_is_a_fatal_unauthenticated_error() {
    let h = harness(MutationBehavior::Http401).await;
    let err = h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Unauthenticated));

    // The status never pretends the session was created.
    let status = h.coordinator.status_manager().status();
    assert!(!status.is_ready);
    assert_ne!(status.message, StatusMessage::Ready);
    assert_ne!(status.message, StatusMessage::Updated);
}

#[tokio::test]
async fn client_403_instructs_reauthentication() {
    let h = harness(MutationBehavior::Client403).await;
    let err = h.coordinator.on_start(ok_event(&["checkout-ui"])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::AuthSessionExpired));
}

#[tokio::test]
async fn broken_initial_build_aborts_startup_without_uploading() {
    let h = harness(MutationBehavior::Accept).await;
    let err = h.coordinator.on_start(failed_event("pos-ui")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::StartupBuildFailed));

    assert_eq!(h.transport.upload_targets.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.creates.load(Ordering::SeqCst), 0);

    let logged = h.logger.multiple_errors.lock().unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].prefix, "pos-ui");
}
