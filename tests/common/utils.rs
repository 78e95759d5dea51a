use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use glyco_sync::config::{HealthSettings, SyncSettings};
use glyco_sync::models::health::{
    HealthSourceError, MetricKind, QuantitySample, RawGlucoseSample, RawNutrition, RawWorkout,
    SleepInterval,
};
use glyco_sync::models::sync::TokenError;
use glyco_sync::models::window::TimeWindow;
use glyco_sync::services::{Credential, HealthDataSource, HealthSnapshotAggregator, TokenProvider};
use glyco_sync::telemetry::{get_subscriber, init_subscriber};

// Ensure that the `tracing` stack is only initialised once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        let _ = init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        let _ = init_subscriber(subscriber);
    }
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Fixed "now" used across tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Health platform fake
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeHealthSource {
    pub available: bool,
    pub authorization_requested: bool,
    pub glucose: Result<Vec<RawGlucoseSample>, HealthSourceError>,
    pub workouts: Result<Vec<RawWorkout>, HealthSourceError>,
    pub nutrition: Result<Vec<RawNutrition>, HealthSourceError>,
    pub steps: Result<Vec<QuantitySample>, HealthSourceError>,
    pub exercise_minutes: Result<Vec<QuantitySample>, HealthSourceError>,
    pub heart_rate: Result<Vec<QuantitySample>, HealthSourceError>,
    pub sleep: Result<Vec<SleepInterval>, HealthSourceError>,
    pub read_delay: Option<Duration>,
    pub reads: Arc<AtomicUsize>,
}

impl FakeHealthSource {
    /// Authorized for everything, nothing recorded.
    pub fn authorized_empty() -> Self {
        Self {
            available: true,
            authorization_requested: true,
            glucose: Ok(vec![]),
            workouts: Ok(vec![]),
            nutrition: Ok(vec![]),
            steps: Ok(vec![]),
            exercise_minutes: Ok(vec![]),
            heart_rate: Ok(vec![]),
            sleep: Ok(vec![]),
            read_delay: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Available, but every metric read is denied.
    pub fn unauthorized() -> Self {
        Self {
            glucose: Err(HealthSourceError::Unauthorized(MetricKind::Glucose)),
            workouts: Err(HealthSourceError::Unauthorized(MetricKind::Workouts)),
            nutrition: Err(HealthSourceError::Unauthorized(MetricKind::Nutrition)),
            steps: Err(HealthSourceError::Unauthorized(MetricKind::Steps)),
            exercise_minutes: Err(HealthSourceError::Unauthorized(MetricKind::ExerciseMinutes)),
            heart_rate: Err(HealthSourceError::Unauthorized(MetricKind::HeartRate)),
            sleep: Err(HealthSourceError::Unauthorized(MetricKind::Sleep)),
            ..Self::authorized_empty()
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn read<T: Clone>(&self, result: &Result<T, HealthSourceError>) -> Result<T, HealthSourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        result.clone()
    }
}

#[async_trait]
impl HealthDataSource for FakeHealthSource {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn authorization_requested(&self) -> bool {
        self.authorization_requested
    }

    async fn glucose(&self, _: &TimeWindow) -> Result<Vec<RawGlucoseSample>, HealthSourceError> {
        self.read(&self.glucose).await
    }

    async fn workouts(&self, _: &TimeWindow) -> Result<Vec<RawWorkout>, HealthSourceError> {
        self.read(&self.workouts).await
    }

    async fn nutrition(&self, _: &TimeWindow) -> Result<Vec<RawNutrition>, HealthSourceError> {
        self.read(&self.nutrition).await
    }

    async fn steps(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        self.read(&self.steps).await
    }

    async fn exercise_minutes(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        self.read(&self.exercise_minutes).await
    }

    async fn heart_rate(&self, _: &TimeWindow) -> Result<Vec<QuantitySample>, HealthSourceError> {
        self.read(&self.heart_rate).await
    }

    async fn sleep(&self, _: &TimeWindow) -> Result<Vec<SleepInterval>, HealthSourceError> {
        self.read(&self.sleep).await
    }
}

pub fn aggregator_for(source: FakeHealthSource) -> HealthSnapshotAggregator {
    HealthSnapshotAggregator::new(Arc::new(source), HealthSettings::default())
}

// ---------------------------------------------------------------------------
// Session fake
// ---------------------------------------------------------------------------

/// Hands out `current` and swaps in `refresh_to` on refresh, counting refreshes.
pub struct RecordingTokenProvider {
    current: Mutex<Option<Credential>>,
    refresh_to: Option<String>,
    refresh_calls: AtomicUsize,
}

impl RecordingTokenProvider {
    pub fn new(current: Option<Credential>, refresh_to: Option<&str>) -> Self {
        Self {
            current: Mutex::new(current),
            refresh_to: refresh_to.map(str::to_string),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn valid(token: &str) -> Self {
        Self::new(Some(Credential::new(token)), None)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for RecordingTokenProvider {
    async fn current_token(&self) -> Option<Credential> {
        self.current.lock().unwrap().clone()
    }

    async fn refresh(&self) -> Result<Credential, TokenError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        match &self.refresh_to {
            Some(token) => {
                let credential = Credential::new(token.clone());
                *self.current.lock().unwrap() = Some(credential.clone());
                Ok(credential)
            }
            None => Err(TokenError::RefreshFailed("session revoked".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote sync/insight service fake
// ---------------------------------------------------------------------------

pub struct ServiceState {
    pub valid_tokens: Mutex<Vec<String>>,
    pub upload_calls: AtomicUsize,
    pub insight_calls: AtomicUsize,
    pub insights: Mutex<Value>,
    pub insight_delay_ms: AtomicU64,
    pub upload_delay_ms: AtomicU64,
    pub forced_status: AtomicU16,
    pub last_payload: Mutex<Option<Value>>,
    pub last_api_key: Mutex<Option<String>>,
}

impl ServiceState {
    fn new(valid_tokens: &[&str]) -> Self {
        Self {
            valid_tokens: Mutex::new(valid_tokens.iter().map(|t| t.to_string()).collect()),
            upload_calls: AtomicUsize::new(0),
            insight_calls: AtomicUsize::new(0),
            insights: Mutex::new(json!([])),
            insight_delay_ms: AtomicU64::new(0),
            upload_delay_ms: AtomicU64::new(0),
            forced_status: AtomicU16::new(0),
            last_payload: Mutex::new(None),
            last_api_key: Mutex::new(None),
        }
    }

    fn authorized(&self, req: &HttpRequest) -> bool {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        *self.last_api_key.lock().unwrap() = req
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match token {
            Some(token) => self.valid_tokens.lock().unwrap().contains(&token),
            None => false,
        }
    }

    fn forced_failure(&self) -> Option<HttpResponse> {
        let status = self.forced_status.load(Ordering::SeqCst);
        if status == 0 {
            return None;
        }
        let status = StatusCode::from_u16(status).unwrap();
        Some(HttpResponse::build(status).body("forced failure"))
    }
}

async fn upload(
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<ServiceState>,
) -> HttpResponse {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&req) {
        return HttpResponse::Unauthorized().finish();
    }
    let delay = state.upload_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if let Some(response) = state.forced_failure() {
        return response;
    }

    let payload = body.into_inner();
    let count = |pointer: &str| {
        payload
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    };
    let summary = json!({
        "glucoseReadings": count("/healthSnapshot/glucoseSamples"),
        "workouts": count("/healthSnapshot/workouts"),
        "nutritionEntries": count("/healthSnapshot/nutritionEntries"),
        "logEntries": count("/cachedLogEntries"),
        "errors": [],
        "lastSyncDate": Utc::now(),
    });
    *state.last_payload.lock().unwrap() = Some(payload);
    HttpResponse::Ok().json(summary)
}

async fn generate_insights(
    req: HttpRequest,
    _body: web::Json<Value>,
    state: web::Data<ServiceState>,
) -> HttpResponse {
    state.insight_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&req) {
        return HttpResponse::Unauthorized().finish();
    }
    let delay = state.insight_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let insights = state.insights.lock().unwrap().clone();
    HttpResponse::Ok().json(insights)
}

pub struct TestSyncService {
    pub base_url: String,
    pub state: Arc<ServiceState>,
}

impl TestSyncService {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings::new(self.base_url.clone())
    }

    pub fn upload_calls(&self) -> usize {
        self.state.upload_calls.load(Ordering::SeqCst)
    }

    pub fn insight_calls(&self) -> usize {
        self.state.insight_calls.load(Ordering::SeqCst)
    }

    pub fn set_insights(&self, insights: Value) {
        *self.state.insights.lock().unwrap() = insights;
    }

    pub fn set_insight_delay(&self, delay: Duration) {
        self.state
            .insight_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        self.state
            .upload_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn force_status(&self, status: u16) {
        self.state.forced_status.store(status, Ordering::SeqCst);
    }

    pub fn last_payload(&self) -> Option<Value> {
        self.state.last_payload.lock().unwrap().clone()
    }
}

/// Fake remote service accepting the given bearer tokens.
pub async fn spawn_sync_service(valid_tokens: &[&str]) -> TestSyncService {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    // Get port assigned by the OS
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServiceState::new(valid_tokens));
    let data = web::Data::from(state.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/api/v1/sync/upload", web::post().to(upload))
            .route("/api/v1/insights/generate", web::post().to(generate_insights))
    })
    .workers(1)
    .listen(listener)
    .expect("Failed to bind address")
    .run();
    // Launch the server as a background task
    let _ = tokio::spawn(server);

    TestSyncService {
        base_url: format!("http://127.0.0.1:{}/api/v1", port),
        state,
    }
}

pub fn insight_json(title: &str) -> Value {
    json!({
        "title": title,
        "description": format!("{} description", title),
        "actionItems": ["Check glucose 2h after meals"],
        "dataPoints": ["avg 142 mg/dL"],
        "timestamp": "2025-03-02T12:00:00Z",
        "priority": "medium"
    })
}
