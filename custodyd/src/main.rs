//! `custodyd`: an `axum` daemon exposing the report custody operations
//! surface as JSON over HTTP, with Prometheus metrics and `tracing`
//! structured logging.
//!
//! Actor private keys live in an on-disk [`custody_spec::ActorKeyStore`]
//! directory rather than in the request: callers identify themselves with
//! an `actorId` field and the daemon loads (generating on first use) that
//! actor's keypair. This mirrors the source's `ensure_actor_keys`/
//! `_key_paths` convention and is the deliberately simple key-custody story
//! named as an external collaborator in the specification — not a hardware
//! or remote-signer integration.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use custody_ledger::Ledger;
use custody_registry::Registry;
use custody_resolver::{CustodyService, EnvelopeStore, MetricsSink, ResolveDenial};
use custody_spec::primitives::{b64_decode, b64_encode};
use custody_spec::ActorKeyStore;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// `custodyd` command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTTP bind address for the operations surface, `/healthz`, and `/metrics`.
    #[arg(long, env = "CUSTODY_BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind_addr: SocketAddr,
    /// Path to the append-only ledger file.
    #[arg(long, env = "CUSTODY_LEDGER_FILE", default_value = "custody-data/ledger.jsonl")]
    ledger_file: String,
    /// Path to the envelope/soft-revocation store file.
    #[arg(long, env = "CUSTODY_STORE_FILE", default_value = "custody-data/store.json")]
    store_file: String,
    /// Path to the CA/CRL registry file.
    #[arg(long, env = "CUSTODY_REGISTRY_FILE", default_value = "custody-data/registry.json")]
    registry_file: String,
    /// Directory of per-actor `{actorId}_priv.pem` / `{actorId}_pub.pem` files.
    #[arg(long, env = "CUSTODY_KEYS_DIR", default_value = "custody-data/keys")]
    keys_dir: String,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "CUSTODY_LOG_LEVEL")]
    log_level: Option<String>,
}

struct PrometheusSink {
    registry: prometheus::Registry,
    counters: prometheus::IntCounterVec,
    latencies: prometheus::HistogramVec,
}

impl PrometheusSink {
    fn new() -> Self {
        let registry = prometheus::Registry::new();
        let counters = prometheus::IntCounterVec::new(
            prometheus::Opts::new("custody_events_total", "Custody service events by name"),
            &["event"],
        )
        .unwrap();
        let latencies = prometheus::HistogramVec::new(
            prometheus::HistogramOpts::new(
                "custody_event_value",
                "Raw value recorded for non-counter custody events (e.g. latency in ms)",
            ),
            &["event"],
        )
        .unwrap();
        registry.register(Box::new(counters.clone())).unwrap();
        registry.register(Box::new(latencies.clone())).unwrap();
        PrometheusSink {
            registry,
            counters,
            latencies,
        }
    }

    fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsSink for PrometheusSink {
    fn record(&self, event: &str, value: f64) {
        if event.ends_with("_total") {
            self.counters.with_label_values(&[event]).inc();
        } else {
            self.latencies.with_label_values(&[event]).observe(value);
        }
    }
}

struct AppState {
    service: CustodyService,
    keys: ActorKeyStore,
    metrics: Arc<PrometheusSink>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Denial(#[from] ResolveDenial),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Denial(ResolveDenial::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Denial(ResolveDenial::InputInvalid(_)) => {
                (StatusCode::BAD_REQUEST, "INPUT_INVALID")
            }
            ApiError::Denial(ResolveDenial::ReportState(_)) => {
                (StatusCode::CONFLICT, "REPORT_STATE")
            }
            ApiError::Denial(ResolveDenial::NotOwner) => (StatusCode::FORBIDDEN, "NOT_OWNER"),
            ApiError::Denial(ResolveDenial::LabRevokedByCA) => {
                (StatusCode::FORBIDDEN, "LAB_REVOKED_BY_CA")
            }
            ApiError::Denial(ResolveDenial::InvalidLabSignature) => {
                (StatusCode::FORBIDDEN, "INVALID_LAB_SIGNATURE")
            }
            ApiError::Denial(ResolveDenial::LedgerMismatch(_)) => {
                (StatusCode::CONFLICT, "LEDGER_MISMATCH")
            }
            ApiError::Denial(ResolveDenial::InvalidEnvelope) => {
                (StatusCode::CONFLICT, "INVALID_ENVELOPE")
            }
            ApiError::Denial(ResolveDenial::LedgerMissing) => {
                (StatusCode::CONFLICT, "LEDGER_MISSING")
            }
            ApiError::Denial(ResolveDenial::NoGrant) => (StatusCode::FORBIDDEN, "NO_GRANT"),
            ApiError::Denial(ResolveDenial::InvalidGrantSignature) => {
                (StatusCode::FORBIDDEN, "INVALID_GRANT_SIGNATURE")
            }
            ApiError::Denial(ResolveDenial::SoftRevoked) => {
                (StatusCode::FORBIDDEN, "SOFT_REVOKED")
            }
            ApiError::Denial(ResolveDenial::UnwrapFailed) => {
                (StatusCode::FORBIDDEN, "UNWRAP_FAILED")
            }
            ApiError::Denial(ResolveDenial::AeadFailure) => {
                (StatusCode::FORBIDDEN, "UNWRAP_FAILED")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        let body = Json(serde_json::json!({ "error": code, "detail": self.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct EmitRequest {
    #[serde(rename = "reportId")]
    report_id: String,
    #[serde(rename = "labId")]
    lab_id: String,
    #[serde(rename = "patientRef")]
    patient_ref: String,
    /// Base64-encoded report plaintext.
    content: String,
    #[serde(rename = "aadExtras", default)]
    aad_extras: BTreeMap<String, String>,
}

async fn emit_report(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmitRequest>,
) -> ApiResult<Json<custody_spec::Envelope>> {
    let (lab_priv, _lab_pub) = state
        .keys
        .ensure_keys(&req.lab_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let (_pat_priv, pat_pub) = state
        .keys
        .ensure_keys(&req.patient_ref)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let content = b64_decode(&req.content).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let env = state.service.emit(
        &req.report_id,
        &req.lab_id,
        &lab_priv,
        &req.patient_ref,
        &pat_pub,
        &content,
        req.aad_extras,
    )?;
    Ok(Json(env))
}

#[derive(Deserialize)]
struct RevokeRequest {
    #[serde(rename = "labId")]
    lab_id: String,
    reason: Option<String>,
}

async fn revoke_report(
    State(state): State<Arc<AppState>>,
    AxumPath(report_id): AxumPath<String>,
    Json(req): Json<RevokeRequest>,
) -> ApiResult<StatusCode> {
    state.service.revoke(&report_id, &req.lab_id, req.reason)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UpdateRequest {
    #[serde(rename = "newReportId")]
    new_report_id: String,
    #[serde(rename = "labId")]
    lab_id: String,
    /// Base64-encoded plaintext for the new report version.
    content: String,
    #[serde(rename = "aadExtras", default)]
    aad_extras: BTreeMap<String, String>,
}

async fn update_report(
    State(state): State<Arc<AppState>>,
    AxumPath(old_report_id): AxumPath<String>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<StatusCode> {
    let old_env = state
        .service
        .store()
        .get_envelope(&old_report_id)
        .ok_or(ResolveDenial::NotFound)?;
    let patient_ref = old_env.aad.patient_ref.clone();

    let (lab_priv, _) = state
        .keys
        .ensure_keys(&req.lab_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let (_, pat_pub) = state
        .keys
        .ensure_keys(&patient_ref)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let content = b64_decode(&req.content).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let issued_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let aad = custody_spec::Aad::with_extras(
        &req.new_report_id,
        &req.lab_id,
        &patient_ref,
        issued_at,
        req.aad_extras,
    );
    let mut recipients = BTreeMap::new();
    recipients.insert(patient_ref, pat_pub);
    let mut new_env = custody_envelope::encrypt_for_recipients(&content, aad, &recipients)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    let ct_bytes = new_env
        .ciphertext_bytes()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let msg = custody_envelope::lab_binding_message(&ct_bytes, &new_env.aad)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    let sig = custody_spec::primitives::sign(&lab_priv, &msg)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    new_env.sig_lab = Some(sig);

    state
        .service
        .update(&old_report_id, &req.new_report_id, &req.lab_id, new_env)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ShareRequest {
    #[serde(rename = "patientId")]
    patient_id: String,
    #[serde(rename = "targetId")]
    target_id: String,
}

async fn share_report(
    State(state): State<Arc<AppState>>,
    AxumPath(report_id): AxumPath<String>,
    Json(req): Json<ShareRequest>,
) -> ApiResult<StatusCode> {
    let (patient_priv, _) = state
        .keys
        .ensure_keys(&req.patient_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let (_, target_pub) = state
        .keys
        .ensure_keys(&req.target_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    state.service.share(
        &report_id,
        &req.patient_id,
        &patient_priv,
        &req.target_id,
        &target_pub,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UnshareRequest {
    #[serde(rename = "patientId")]
    patient_id: String,
    #[serde(rename = "targetId")]
    target_id: String,
}

async fn unshare_report(
    State(state): State<Arc<AppState>>,
    AxumPath(report_id): AxumPath<String>,
    Json(req): Json<UnshareRequest>,
) -> ApiResult<StatusCode> {
    state
        .service
        .unshare(&report_id, &req.patient_id, &req.target_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct OpenQuery {
    #[serde(rename = "requesterId")]
    requester_id: String,
}

#[derive(Serialize)]
struct OpenResponse {
    #[serde(rename = "reportId")]
    report_id: String,
    /// Base64-encoded plaintext.
    content: String,
}

async fn open_report(
    State(state): State<Arc<AppState>>,
    AxumPath(report_id): AxumPath<String>,
    Query(q): Query<OpenQuery>,
) -> ApiResult<Json<OpenResponse>> {
    let (priv_key, _) = state
        .keys
        .ensure_keys(&q.requester_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let (plaintext, rid) = state
        .service
        .open(&q.requester_id, &report_id, &priv_key)?;
    Ok(Json(OpenResponse {
        report_id: rid,
        content: b64_encode(&plaintext),
    }))
}

async fn report_state(
    State(state): State<Arc<AppState>>,
    AxumPath(report_id): AxumPath<String>,
) -> Json<custody_ledger::ReportState> {
    Json(state.service.state_of(&report_id))
}

#[derive(Deserialize)]
struct EnrollRequest {
    #[serde(rename = "actorId")]
    actor_id: String,
}

#[derive(Serialize)]
struct EnrollResponse {
    cert: custody_registry::Cert,
}

async fn ca_enroll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<Json<EnrollResponse>> {
    let pub_pem = state
        .keys
        .ensure_public_pem(&req.actor_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let cert = state
        .service
        .registry()
        .enroll(&req.actor_id, &pub_pem)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(EnrollResponse { cert }))
}

async fn ca_revoke(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<StatusCode> {
    state
        .service
        .registry()
        .revoke(&req.actor_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SdVerifyRequest {
    #[serde(rename = "requesterId")]
    requester_id: String,
    #[serde(rename = "reportId")]
    report_id: String,
    #[serde(rename = "subsetFields")]
    subset_fields: Vec<String>,
    #[serde(rename = "expectedDigestHex")]
    expected_digest_hex: String,
}

#[derive(Serialize)]
struct SdVerifyResponse {
    matches: bool,
}

async fn sd_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SdVerifyRequest>,
) -> ApiResult<Json<SdVerifyResponse>> {
    let (priv_key, _) = state
        .keys
        .ensure_keys(&req.requester_id)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let matches = state.service.sd_verify(
        &req.requester_id,
        &req.report_id,
        &priv_key,
        &req.subset_fields,
        &req.expected_digest_hex,
    )?;
    Ok(Json(SdVerifyResponse { matches }))
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    #[serde(rename = "ledgerLength")]
    ledger_length: usize,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        ledger_length: state.service.ledger().len(),
    })
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/reports", post(emit_report))
        .route("/reports/:id", get(open_report))
        .route("/reports/:id/revoke", post(revoke_report))
        .route("/reports/:id/update", post(update_report))
        .route("/reports/:id/share", post(share_report))
        .route("/reports/:id/unshare", post(unshare_report))
        .route("/reports/:id/state", get(report_state))
        .route("/ca/enroll", post(ca_enroll))
        .route("/ca/revoke", post(ca_revoke))
        .route("/sd/verify", post(sd_verify))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| match lvl.to_ascii_uppercase().as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ledger = Ledger::open(&cli.ledger_file)?;
    let store = EnvelopeStore::open(&cli.store_file)?;
    let registry = Registry::open(&cli.registry_file)?;
    let keys = ActorKeyStore::open(&cli.keys_dir)?;
    let metrics = Arc::new(PrometheusSink::new());

    let service = CustodyService::with_metrics(ledger, store, registry, metrics.clone());
    let state = Arc::new(AppState {
        service,
        keys,
        metrics,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    tracing::info!(addr = %cli.bind_addr, "custodyd listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
