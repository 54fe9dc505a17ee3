//! Run orchestration: the generation pipeline (download → preprocess →
//! generate → extract → upload) and the mesh conversion pipeline.
//!
//! Stages are strictly sequential; each depends on the previous
//! stage's output. Every remote call goes through the retry executor,
//! every local file is registered for cleanup before the next stage
//! uses it, and cleanup runs on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::artifacts::{Fetcher, TempArtifacts, unique_work_path};
use crate::config::GatewayConfig;
use crate::error::PipelineError;
use crate::io_struct::{ConvertReqInput, GenerateReqInput};
use crate::model_client::JobService;
use crate::retry;
use crate::stl::{GeometryEngine, write_stl};
use crate::storage::{BlobStore, compute_storage_key};

/// External collaborators a run talks to. One `jobs` instance per run;
/// the session handshake is scoped to it.
pub struct PipelineDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub jobs: Arc<dyn JobService>,
    pub store: Arc<dyn BlobStore>,
    pub geometry: Arc<dyn GeometryEngine>,
}

#[derive(Debug)]
pub struct GenerateOutcome {
    pub preprocessed_url: String,
    pub video_url: String,
    pub glb_urls: Vec<String>,
    pub processing_time: f64,
    pub warning: Option<String>,
}

#[derive(Debug)]
pub struct ConvertOutcome {
    pub stl_url: String,
    pub file_size: u64,
}

/// A failed run: the error plus whatever durable URLs were already
/// produced before the failure.
#[derive(Debug)]
pub struct RunFailure {
    pub error: PipelineError,
    pub partial_urls: Vec<String>,
}

#[derive(Debug, Default)]
struct Collected {
    preprocessed_url: Option<String>,
    video_url: Option<String>,
    glb_urls: Vec<String>,
}

impl Collected {
    fn urls(&self) -> Vec<String> {
        self.preprocessed_url
            .iter()
            .chain(self.video_url.iter())
            .chain(self.glb_urls.iter())
            .cloned()
            .collect()
    }

    fn into_outcome(self, started: Instant, warning: Option<String>) -> GenerateOutcome {
        GenerateOutcome {
            preprocessed_url: self.preprocessed_url.unwrap_or_default(),
            video_url: self.video_url.unwrap_or_default(),
            glb_urls: self.glb_urls,
            processing_time: started.elapsed().as_secs_f64(),
            warning,
        }
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, RunFailure> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RunFailure {
            error: PipelineError::invalid_request(format!("{} is required", name)),
            partial_urls: Vec::new(),
        }),
    }
}

/// Drive one generation run end to end. Validation happens before any
/// network call or temp file; cleanup happens whatever the outcome.
pub async fn run_generate(
    config: &GatewayConfig,
    deps: &PipelineDeps,
    req: &GenerateReqInput,
) -> Result<GenerateOutcome, RunFailure> {
    let image_url = required(req.image_url.as_deref(), "image_url")?;
    let design_id = required(req.design_id.as_deref(), "designId")?;

    let started = Instant::now();
    let mut temps = TempArtifacts::new();
    let mut collected = Collected::default();

    let result = drive_generate(
        config,
        deps,
        image_url,
        &req.user_id,
        design_id,
        &mut temps,
        &mut collected,
    )
    .await;
    temps.cleanup().await;

    match result {
        Ok(()) => Ok(collected.into_outcome(started, None)),
        // A reporting-only failure after the preview was already
        // uploaded is a degraded success, not a loss of the run.
        Err(PipelineError::RemoteAmbiguous { operation, message })
            if collected.video_url.is_some() =>
        {
            log::warn!(
                "Run for design {} degraded by reporting failure in {}: {}",
                design_id,
                operation,
                message
            );
            Ok(collected.into_outcome(
                started,
                Some(format!(
                    "{} reported a client-side failure after producing results; \
                     some artifacts may be missing",
                    operation
                )),
            ))
        }
        Err(error) => {
            log::error!("Run for design {} failed: {}", design_id, error);
            Err(RunFailure {
                partial_urls: collected.urls(),
                error,
            })
        }
    }
}

async fn drive_generate(
    config: &GatewayConfig,
    deps: &PipelineDeps,
    image_url: &str,
    user_id: &str,
    design_id: &str,
    temps: &mut TempArtifacts,
    collected: &mut Collected,
) -> Result<(), PipelineError> {
    log::info!("Starting generation run for design {}", design_id);

    let source_path = unique_work_path(&config.work_dir, "source", "png");
    temps.register(&source_path);
    retry::execute("download_image", &config.retry, |_| {
        deps.fetcher.fetch(image_url, &source_path)
    })
    .await?;

    retry::execute("start_session", &config.retry, |_| deps.jobs.start_session()).await?;

    let asset = retry::execute("upload_asset", &config.retry, |_| {
        deps.jobs.upload_asset(&source_path)
    })
    .await?;

    // Preprocess
    let pre_locals = run_remote_stage(
        config,
        deps,
        "preprocess_image",
        json!({ "image": asset.0 }),
        Duration::from_secs(config.timeouts.preprocess_secs),
        temps,
        "preprocessed",
        "png",
    )
    .await?;
    let pre_local = first_artifact(&pre_locals, "preprocess_image")?;
    let pre_key = compute_storage_key(user_id, design_id, "preprocessed.png");
    let pre_url = retry::execute("upload_preprocessed", &config.retry, |_| {
        deps.store.put(pre_local, &pre_key)
    })
    .await?;
    collected.preprocessed_url = Some(pre_url);

    // Generate
    let tuning = &config.generation;
    let gen_params = json!({
        "image": asset.0,
        "multiimages": [],
        "seed": tuning.seed,
        "ss_guidance_strength": tuning.ss_guidance_strength,
        "ss_sampling_steps": tuning.ss_sampling_steps,
        "slat_guidance_strength": tuning.slat_guidance_strength,
        "slat_sampling_steps": tuning.slat_sampling_steps,
        "multiimage_algo": tuning.multiimage_algo,
    });
    let gen_locals = run_remote_stage(
        config,
        deps,
        "image_to_3d",
        gen_params,
        Duration::from_secs(config.timeouts.generate_secs),
        temps,
        "preview",
        "mp4",
    )
    .await?;
    let preview_local = first_artifact(&gen_locals, "image_to_3d")?;
    let video_key = compute_storage_key(user_id, design_id, "preview.mp4");
    let video_url = retry::execute("upload_preview", &config.retry, |_| {
        deps.store.put(preview_local, &video_key)
    })
    .await?;
    collected.video_url = Some(video_url);

    // The service needs a moment after generation before extraction
    // sees the new state.
    if config.settle_delay_secs > 0 {
        tokio::time::sleep(Duration::from_secs(config.settle_delay_secs)).await;
    }

    // Extract; may produce one model file or several format variants.
    let ext_locals = run_remote_stage(
        config,
        deps,
        "extract_glb",
        json!({ "simplify": tuning.simplify, "texture_size": tuning.texture_size }),
        Duration::from_secs(config.timeouts.extract_secs),
        temps,
        "model",
        "glb",
    )
    .await?;
    if ext_locals.is_empty() {
        return Err(PipelineError::RemoteTerminal {
            operation: "extract_glb".to_string(),
            message: "no model artifact produced".to_string(),
        });
    }
    for (i, local) in ext_locals.iter().enumerate() {
        let filename = if ext_locals.len() == 1 {
            "model.glb".to_string()
        } else {
            format!("model_{}.glb", i)
        };
        let key = compute_storage_key(user_id, design_id, &filename);
        let url =
            retry::execute("upload_model", &config.retry, |_| deps.store.put(local, &key)).await?;
        collected.glb_urls.push(url);
    }

    log::info!(
        "Generation run for design {} finished with {} model file(s)",
        design_id,
        collected.glb_urls.len()
    );
    Ok(())
}

fn first_artifact<'a>(
    locals: &'a [PathBuf],
    operation: &str,
) -> Result<&'a PathBuf, PipelineError> {
    locals.first().ok_or_else(|| PipelineError::RemoteTerminal {
        operation: operation.to_string(),
        message: "no artifact produced".to_string(),
    })
}

/// Submit one remote job, wait within the stage budget, and pull every
/// produced artifact down to the work dir. Local paths are registered
/// for cleanup before they are returned to the caller.
#[allow(clippy::too_many_arguments)]
async fn run_remote_stage(
    config: &GatewayConfig,
    deps: &PipelineDeps,
    operation: &str,
    params: Value,
    budget: Duration,
    temps: &mut TempArtifacts,
    prefix: &str,
    ext: &str,
) -> Result<Vec<PathBuf>, PipelineError> {
    log::info!("Running {} stage", operation);
    let stage_started = Instant::now();

    let output = retry::execute(operation, &config.retry, |_| {
        let params = params.clone();
        async move {
            let handle = deps.jobs.submit(operation, params).await?;
            handle.wait(budget).await
        }
    })
    .await?;
    log::info!(
        "{} finished in {:.1}s with {} artifact(s)",
        operation,
        stage_started.elapsed().as_secs_f64(),
        output.artifacts.len()
    );

    let mut locals = Vec::with_capacity(output.artifacts.len());
    for remote in &output.artifacts {
        let local = unique_work_path(&config.work_dir, prefix, ext);
        temps.register(&local);
        retry::execute("fetch_artifact", &config.retry, |_| {
            deps.fetcher.fetch(remote, &local)
        })
        .await?;
        locals.push(local);
    }
    Ok(locals)
}

/// Drive one mesh conversion run: fetch the model file, triangulate it
/// through the external geometry engine, encode binary STL, upload.
pub async fn run_convert(
    config: &GatewayConfig,
    deps: &PipelineDeps,
    req: &ConvertReqInput,
) -> Result<ConvertOutcome, RunFailure> {
    let glb_url = required(req.glb_url.as_deref(), "glbUrl")?;
    let design_id = required(req.design_id.as_deref(), "designId")?;

    let mut temps = TempArtifacts::new();
    let result = drive_convert(config, deps, glb_url, &req.user_id, design_id, &mut temps).await;
    temps.cleanup().await;
    result.map_err(|error| {
        log::error!("Conversion for design {} failed: {}", design_id, error);
        RunFailure {
            error,
            partial_urls: Vec::new(),
        }
    })
}

async fn drive_convert(
    config: &GatewayConfig,
    deps: &PipelineDeps,
    glb_url: &str,
    user_id: &str,
    design_id: &str,
    temps: &mut TempArtifacts,
) -> Result<ConvertOutcome, PipelineError> {
    log::info!("Starting conversion run for design {}", design_id);

    let glb_path = unique_work_path(&config.work_dir, "input", "glb");
    temps.register(&glb_path);
    retry::execute("download_glb", &config.retry, |_| {
        deps.fetcher.fetch(glb_url, &glb_path)
    })
    .await?;

    let mesh = deps.geometry.triangulate(&glb_path).await?;
    log::info!("Imported mesh with {} face(s)", mesh.facets.len());

    let stl_path = unique_work_path(&config.work_dir, "output", "stl");
    temps.register(&stl_path);
    let mut file = std::fs::File::create(&stl_path).map_err(PipelineError::WriteError)?;
    let file_size = write_stl(&mesh, &mut file)?;

    let filename = format!("{}.stl", design_id);
    let key = compute_storage_key(user_id, design_id, &filename);
    let stl_url = retry::execute("upload_stl", &config.retry, |_| {
        deps.store.put(&stl_path, &key)
    })
    .await?;

    log::info!(
        "Conversion run for design {} finished ({} bytes)",
        design_id,
        file_size
    );
    Ok(ConvertOutcome { stl_url, file_size })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::{RetryConfig, StageTimeouts};
    use crate::model_client::{AssetRef, JobHandle, JobOutput, SessionId};
    use crate::stl::{Facet, TriMesh};

    struct StubFetcher {
        calls: AtomicU32,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"payload").await.map_err(|e| {
                PipelineError::Download {
                    url: "stub".to_string(),
                    reason: e.to_string(),
                }
            })
        }
    }

    #[derive(Clone)]
    enum Script {
        Ok(Vec<&'static str>),
        Timeout,
        Ambiguous,
        Terminal(&'static str),
    }

    struct ScriptedJobs {
        scripts: HashMap<&'static str, Script>,
        sessions: AtomicU32,
        submits: AtomicU32,
    }

    impl ScriptedJobs {
        fn new(scripts: Vec<(&'static str, Script)>) -> Self {
            Self {
                scripts: scripts.into_iter().collect(),
                sessions: AtomicU32::new(0),
                submits: AtomicU32::new(0),
            }
        }
    }

    struct ScriptedHandle {
        operation: String,
        script: Script,
    }

    #[async_trait]
    impl JobHandle for ScriptedHandle {
        async fn wait(self: Box<Self>, budget: Duration) -> Result<JobOutput, PipelineError> {
            match self.script {
                Script::Ok(artifacts) => Ok(JobOutput {
                    artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
                }),
                Script::Timeout => Err(PipelineError::Timeout {
                    stage: self.operation,
                    budget_secs: budget.as_secs(),
                }),
                Script::Ambiguous => Err(PipelineError::RemoteAmbiguous {
                    operation: self.operation,
                    message: "has not enabled verbose error reporting".to_string(),
                }),
                Script::Terminal(message) => Err(PipelineError::RemoteTerminal {
                    operation: self.operation,
                    message: message.to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl JobService for ScriptedJobs {
        async fn start_session(&self) -> Result<SessionId, PipelineError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(SessionId("test-session".to_string()))
        }

        async fn upload_asset(&self, _local_path: &Path) -> Result<AssetRef, PipelineError> {
            Ok(AssetRef("remote://asset".to_string()))
        }

        async fn submit(
            &self,
            operation: &str,
            _params: Value,
        ) -> Result<Box<dyn JobHandle>, PipelineError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let script =
                self.scripts
                    .get(operation)
                    .cloned()
                    .ok_or_else(|| PipelineError::RemoteTerminal {
                        operation: operation.to_string(),
                        message: "unexpected operation".to_string(),
                    })?;
            Ok(Box::new(ScriptedHandle {
                operation: operation.to_string(),
                script,
            }))
        }
    }

    struct RecordingStore {
        keys: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                keys: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BlobStore for RecordingStore {
        async fn put(&self, _local_path: &Path, key: &str) -> Result<String, PipelineError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("https://cdn.test/{}", key))
        }
    }

    struct FixedGeometry;

    #[async_trait]
    impl GeometryEngine for FixedGeometry {
        async fn triangulate(&self, _asset_path: &Path) -> Result<TriMesh, PipelineError> {
            Ok(TriMesh::with_identity(vec![Facet {
                normal: [0.0, 0.0, 1.0],
                vertices: [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            }]))
        }
    }

    fn test_config(work_dir: &Path) -> GatewayConfig {
        GatewayConfig {
            work_dir: work_dir.to_path_buf(),
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 1,
            },
            settle_delay_secs: 0,
            timeouts: StageTimeouts {
                preprocess_secs: 2,
                generate_secs: 2,
                extract_secs: 2,
                mesh_import_secs: 2,
            },
            ..GatewayConfig::default()
        }
    }

    fn happy_scripts() -> Vec<(&'static str, Script)> {
        vec![
            ("preprocess_image", Script::Ok(vec!["remote://pre.png"])),
            ("image_to_3d", Script::Ok(vec!["remote://preview.mp4"])),
            ("extract_glb", Script::Ok(vec!["remote://model.glb"])),
        ]
    }

    fn make_deps(jobs: ScriptedJobs) -> (PipelineDeps, Arc<StubFetcher>, Arc<RecordingStore>) {
        let fetcher = Arc::new(StubFetcher::new());
        let store = Arc::new(RecordingStore::new());
        let deps = PipelineDeps {
            fetcher: fetcher.clone(),
            jobs: Arc::new(jobs),
            store: store.clone(),
            geometry: Arc::new(FixedGeometry),
        };
        (deps, fetcher, store)
    }

    fn generate_req(image_url: Option<&str>, user: &str, design: Option<&str>) -> GenerateReqInput {
        GenerateReqInput {
            image_url: image_url.map(|s| s.to_string()),
            user_id: user.to_string(),
            design_id: design.map(|s| s.to_string()),
            other: json!({}),
        }
    }

    async fn work_dir_file_count(dir: &Path) -> usize {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_full_success_yields_versioned_urls() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, _, store) = make_deps(ScriptedJobs::new(happy_scripts()));

        let req = generate_req(Some("https://x/img.png"), "u1", Some("d1"));
        let outcome = run_generate(&config, &deps, &req).await.unwrap();

        assert!(outcome.preprocessed_url.contains("v2/users/u1/d1/"));
        assert!(outcome.video_url.contains("v2/users/u1/d1/"));
        assert_eq!(outcome.glb_urls.len(), 1);
        assert!(outcome.glb_urls[0].contains("v2/users/u1/d1/"));
        assert!(outcome.warning.is_none());
        assert!(outcome.processing_time >= 0.0);

        let keys = store.keys.lock().unwrap().clone();
        assert_eq!(
            keys,
            vec![
                "v2/users/u1/d1/preprocessed.png",
                "v2/users/u1/d1/preview.mp4",
                "v2/users/u1/d1/model.glb",
            ]
        );
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_anonymous_user_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, _, _) = make_deps(ScriptedJobs::new(happy_scripts()));

        let req = generate_req(Some("https://x/img.png"), "anonymous", Some("d1"));
        let outcome = run_generate(&config, &deps, &req).await.unwrap();
        assert!(outcome.preprocessed_url.contains("v2/anonymous/d1/"));
    }

    #[tokio::test]
    async fn test_missing_design_id_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, fetcher, _) = make_deps(ScriptedJobs::new(happy_scripts()));

        let req = generate_req(Some("https://x/img.png"), "u1", None);
        let failure = run_generate(&config, &deps, &req).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidRequest { .. }));
        assert!(failure.partial_urls.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_missing_image_url_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, fetcher, _) = make_deps(ScriptedJobs::new(happy_scripts()));

        let req = generate_req(None, "u1", Some("d1"));
        let failure = run_generate(&config, &deps, &req).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidRequest { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extract_variants_upload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut scripts = happy_scripts();
        scripts.retain(|(op, _)| *op != "extract_glb");
        scripts.push((
            "extract_glb",
            Script::Ok(vec!["remote://a.glb", "remote://b.glb"]),
        ));
        let (deps, _, _) = make_deps(ScriptedJobs::new(scripts));

        let req = generate_req(Some("https://x/img.png"), "u1", Some("d1"));
        let outcome = run_generate(&config, &deps, &req).await.unwrap();

        assert_eq!(
            outcome.glb_urls,
            vec![
                "https://cdn.test/v2/users/u1/d1/model_0.glb",
                "https://cdn.test/v2/users/u1/d1/model_1.glb",
            ]
        );
    }

    #[tokio::test]
    async fn test_generate_timeout_cleans_up_and_reports_partials() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut scripts = happy_scripts();
        scripts.retain(|(op, _)| *op != "image_to_3d");
        scripts.push(("image_to_3d", Script::Timeout));
        let (deps, _, _) = make_deps(ScriptedJobs::new(scripts));

        let req = generate_req(Some("https://x/img.png"), "u1", Some("d1"));
        let failure = run_generate(&config, &deps, &req).await.unwrap_err();

        assert!(matches!(failure.error, PipelineError::Timeout { .. }));
        // The preprocessed artifact had already been uploaded.
        assert_eq!(
            failure.partial_urls,
            vec!["https://cdn.test/v2/users/u1/d1/preprocessed.png"]
        );
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_ambiguous_extract_degrades_to_success_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut scripts = happy_scripts();
        scripts.retain(|(op, _)| *op != "extract_glb");
        scripts.push(("extract_glb", Script::Ambiguous));
        let (deps, _, _) = make_deps(ScriptedJobs::new(scripts));

        let req = generate_req(Some("https://x/img.png"), "u1", Some("d1"));
        let outcome = run_generate(&config, &deps, &req).await.unwrap();

        assert!(outcome.warning.is_some());
        assert!(!outcome.video_url.is_empty());
        assert!(outcome.glb_urls.is_empty());
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut scripts = happy_scripts();
        scripts.retain(|(op, _)| *op != "extract_glb");
        scripts.push(("extract_glb", Script::Terminal("CUDA out of memory")));
        let (deps, _, _) = make_deps(ScriptedJobs::new(scripts));

        let req = generate_req(Some("https://x/img.png"), "u1", Some("d1"));
        let failure = run_generate(&config, &deps, &req).await.unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::RemoteTerminal { .. }
        ));
        // Preprocessed and preview URLs were produced before the failure.
        assert_eq!(failure.partial_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_convert_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, _, _) = make_deps(ScriptedJobs::new(Vec::new()));

        let req = ConvertReqInput {
            glb_url: Some("https://cdn.test/v2/users/u1/d1/model.glb".to_string()),
            design_id: Some("d1".to_string()),
            user_id: "u1".to_string(),
            other: json!({}),
        };
        let outcome = run_convert(&config, &deps, &req).await.unwrap();

        // One-triangle binary STL: 80 + 4 + 50 bytes.
        assert_eq!(outcome.file_size, 134);
        assert_eq!(outcome.stl_url, "https://cdn.test/v2/users/u1/d1/d1.stl");
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    struct EmptyGeometry;

    #[async_trait]
    impl GeometryEngine for EmptyGeometry {
        async fn triangulate(&self, _asset_path: &Path) -> Result<TriMesh, PipelineError> {
            Ok(TriMesh::with_identity(Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_convert_empty_mesh_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let deps = PipelineDeps {
            fetcher: Arc::new(StubFetcher::new()),
            jobs: Arc::new(ScriptedJobs::new(Vec::new())),
            store: Arc::new(RecordingStore::new()),
            geometry: Arc::new(EmptyGeometry),
        };

        let req = ConvertReqInput {
            glb_url: Some("https://cdn.test/v2/users/u1/d1/model.glb".to_string()),
            design_id: Some("d1".to_string()),
            user_id: "u1".to_string(),
            other: json!({}),
        };
        let failure = run_convert(&config, &deps, &req).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::EmptyMesh));
        assert_eq!(work_dir_file_count(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_convert_missing_glb_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (deps, fetcher, _) = make_deps(ScriptedJobs::new(Vec::new()));

        let req = ConvertReqInput {
            glb_url: None,
            design_id: Some("d1".to_string()),
            user_id: "u1".to_string(),
            other: json!({}),
        };
        let failure = run_convert(&config, &deps, &req).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidRequest { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
