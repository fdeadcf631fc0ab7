//! Shared fakes and harness for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use imagegen_core::error::CoreError;
use imagegen_core::types::DbId;
use imagegen_db::models::batch::Batch;
use imagegen_events::EventBus;
use imagegen_pipeline::blobs::MemoryReferenceStore;
use imagegen_pipeline::ingest::ImageIngestor;
use imagegen_pipeline::store::MemoryStore;
use imagegen_pipeline::{
    GenerationConfig, GenerationOrchestrator, GenerationService, GenerationStore,
    ReferenceImageCache,
};
use imagegen_replicate::{
    BlobUploadClient, ClientError, PredictionClient, PredictionRequest, PredictionState,
    PredictionStatus, UploadMetadata, UploadedFile,
};

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// How a fake prediction behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report `processing` until the given poll, then succeed.
    Succeed { after_polls: u32 },
    /// Report `processing` until the given poll, then fail.
    Fail { after_polls: u32, error: &'static str },
    /// Never leave `processing`.
    Hang,
    /// Reject the submission.
    RejectSubmit,
    /// Fail the first status checks with a transport error, then succeed.
    FlakyThenSucceed { errors: u32 },
    /// Report the given terminal status on the first poll.
    EndAs {
        status: PredictionStatus,
        error: Option<&'static str>,
    },
    /// Succeed on the first poll but report no output.
    SucceedWithoutOutput,
    /// Answer every status check with a payload that cannot be normalized.
    Malformed,
    /// Take `delay` to accept the submission, then never leave `processing`.
    SlowSubmit { delay: Duration },
}

pub struct FakePredictor {
    default: Script,
    queue: Mutex<VecDeque<Script>>,
    jobs: Mutex<HashMap<String, (Script, u32)>>,
    next_id: AtomicU32,
    requests: Mutex<Vec<PredictionRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakePredictor {
    /// Every prediction follows `script`.
    pub fn always(script: Script) -> Self {
        Self::scripted(Vec::new(), script)
    }

    /// Predictions follow `scripts` in submission order, then `default`.
    pub fn scripted(scripts: Vec<Script>, default: Script) -> Self {
        Self {
            default,
            queue: Mutex::new(scripts.into()),
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PredictionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionClient for FakePredictor {
    async fn submit(&self, request: &PredictionRequest) -> Result<String, ClientError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        if let Script::SlowSubmit { delay } = script {
            tokio::time::sleep(delay).await;
        }
        if matches!(script, Script::RejectSubmit) {
            return Err(ClientError::Api {
                status: 422,
                body: "invalid input".to_string(),
            });
        }

        let id = format!("pred-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().unwrap().insert(id.clone(), (script, 0));
        Ok(id)
    }

    async fn get_status(&self, job_id: &str) -> Result<PredictionState, ClientError> {
        if self.cancelled.lock().unwrap().iter().any(|id| id == job_id) {
            return Ok(PredictionState::new(PredictionStatus::Canceled));
        }

        let mut jobs = self.jobs.lock().unwrap();
        let (script, polls) = jobs
            .get_mut(job_id)
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("unknown {job_id}")))?;
        *polls += 1;

        let processing = PredictionState::new(PredictionStatus::Processing);
        let succeeded = PredictionState {
            output_url: Some(format!("https://replicate.delivery/{job_id}/out.png")),
            ..PredictionState::new(PredictionStatus::Succeeded)
        };

        match script {
            Script::Succeed { after_polls } if *polls >= *after_polls => Ok(succeeded),
            Script::Fail { after_polls, error } if *polls >= *after_polls => Ok(PredictionState {
                error: Some(error.to_string()),
                ..PredictionState::new(PredictionStatus::Failed)
            }),
            Script::FlakyThenSucceed { errors } if *polls <= *errors => Err(ClientError::Api {
                status: 503,
                body: "connection reset".to_string(),
            }),
            Script::FlakyThenSucceed { .. } => Ok(succeeded),
            Script::EndAs { status, error } => Ok(PredictionState {
                error: (*error).map(str::to_string),
                ..PredictionState::new(*status)
            }),
            Script::SucceedWithoutOutput => Ok(PredictionState::new(PredictionStatus::Succeeded)),
            Script::Malformed => Err(ClientError::UnexpectedResponse(
                "expected exactly one output URL, got 2 items".to_string(),
            )),
            _ => Ok(processing),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ClientError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

pub struct FakeUploader {
    uploads: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobUploadClient for FakeUploader {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        _content_type: &str,
        _metadata: &UploadMetadata,
    ) -> Result<UploadedFile, ClientError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                status: 503,
                body: "upload unavailable".to_string(),
            });
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedFile {
            external_id: format!("file-{n}"),
            expires_at: Utc::now() + chrono::Duration::hours(24),
        })
    }

    fn file_url(&self, external_id: &str) -> String {
        format!("https://api.replicate.com/v1/files/{external_id}")
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeIngestor {
    ingested: AtomicUsize,
    fail: bool,
}

impl FakeIngestor {
    /// Every download fails with a storage error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ImageIngestor for FakeIngestor {
    async fn ingest(&self, _output_url: &str, batch_id: DbId) -> Result<String, CoreError> {
        if self.fail {
            return Err(CoreError::Storage("disk full".to_string()));
        }
        let n = self.ingested.fetch_add(1, Ordering::SeqCst);
        Ok(format!("asset-{batch_id}-{n}"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Millisecond-scale timings so loops finish quickly.
pub fn fast_config() -> GenerationConfig {
    GenerationConfig {
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(1),
        ..GenerationConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub predictor: Arc<FakePredictor>,
    pub uploader: Arc<FakeUploader>,
    pub blobs: Arc<MemoryReferenceStore>,
    pub events: Arc<EventBus>,
    pub cache: Arc<ReferenceImageCache>,
    pub orchestrator: GenerationOrchestrator,
    pub service: GenerationService,
}

impl Harness {
    pub fn new(predictor: FakePredictor) -> Self {
        Self::build(predictor, FakeUploader::new(), fast_config())
    }

    pub fn build(predictor: FakePredictor, uploader: FakeUploader, config: GenerationConfig) -> Self {
        Self::build_with(predictor, uploader, FakeIngestor::default(), config)
    }

    pub fn with_ingestor(predictor: FakePredictor, ingestor: FakeIngestor) -> Self {
        Self::build_with(predictor, FakeUploader::new(), ingestor, fast_config())
    }

    pub fn build_with(
        predictor: FakePredictor,
        uploader: FakeUploader,
        ingestor: FakeIngestor,
        config: GenerationConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let predictor = Arc::new(predictor);
        let uploader = Arc::new(uploader);
        let blobs = Arc::new(MemoryReferenceStore::new());
        let events = Arc::new(EventBus::default());

        let cache = Arc::new(ReferenceImageCache::new(
            store.clone(),
            blobs.clone(),
            uploader.clone(),
            events.clone(),
            config.upload_policy,
        ));
        let orchestrator = GenerationOrchestrator::new(
            store.clone(),
            predictor.clone(),
            Arc::new(ingestor),
            events.clone(),
            config,
        );
        let service = GenerationService::new(store.clone(), cache.clone(), orchestrator.clone());

        Self {
            store,
            predictor,
            uploader,
            blobs,
            events,
            cache,
            orchestrator,
            service,
        }
    }

    /// Wait until the batch leaves `pending`/`processing`.
    pub async fn wait_for_terminal(&self, batch_id: DbId) -> Batch {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let batch = self.store.get_batch(batch_id).await.unwrap().unwrap();
            if batch.status.is_terminal() {
                return batch;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch {batch_id} still {} after 10s",
                batch.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until no poll loop is running.
    pub async fn wait_for_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.orchestrator.active_job_count().await > 0 {
            assert!(tokio::time::Instant::now() < deadline, "jobs still active after 10s");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A small PNG-looking payload, distinct per `seed`.
pub fn image_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend(std::iter::repeat(seed).take(64));
    bytes
}
