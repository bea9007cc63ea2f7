//! EnvironmentService: status, install and predict for one runtime layout.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use splatkit_artifact::{
    read_splats, validate_splat_artifact, write_standard_ply, ArtifactError, ArtifactReport,
};
use splatkit_core::config::{InferenceConfig, PathsConfig, SourcesConfig};
use splatkit_runtime::env::backend::{NativeStageBackend, StageBackend};
use splatkit_runtime::env::lease::InstallLease;
use splatkit_runtime::{
    check_environment, CancelToken, EnvironmentStatus, ImportProbe, InferenceRequest,
    InferenceResult, InstallProgress, InstallReport, InstallationStage, Installer, Invoker,
    InvokerOptions, Result, RuntimeError, RuntimeLayout,
};

use crate::status::StatusCache;

#[derive(Debug)]
pub enum InstallEvent {
    Progress(InstallProgress),
    /// Always the last event of an install.
    Finished(Result<InstallReport>),
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictOutcome {
    pub result: InferenceResult,
    pub artifact: ArtifactReport,
    pub artifact_path: PathBuf,
}

#[derive(Debug)]
pub enum PredictEvent {
    Finished(Result<PredictOutcome>),
}

/// A running background install.
pub struct InstallHandle {
    events: Receiver<InstallEvent>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl InstallHandle {
    pub fn events(&self) -> &Receiver<InstallEvent> {
        &self.events
    }

    /// Ask the installer to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the install finishes, forwarding progress to `on_progress`.
    pub fn wait(mut self, mut on_progress: impl FnMut(&InstallProgress)) -> Result<InstallReport> {
        let mut last_stage = InstallationStage::FetchInterpreter;
        let mut outcome = None;
        for event in self.events.iter() {
            match event {
                InstallEvent::Progress(progress) => {
                    last_stage = progress.stage;
                    on_progress(&progress);
                }
                InstallEvent::Finished(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome.unwrap_or_else(|| {
            Err(RuntimeError::StageFailed {
                stage: last_stage,
                detail: "installer thread exited without reporting a result".to_string(),
            })
        })
    }
}

struct Inner {
    layout: RuntimeLayout,
    sources: SourcesConfig,
    options: InvokerOptions,
    backend: Arc<dyn StageBackend>,
    cache: StatusCache,
}

impl Inner {
    fn status(&self) -> EnvironmentStatus {
        self.cache
            .get_or_refresh(|| check_environment(&self.layout, &self.options.probe))
    }

    fn refresh_status(&self) -> EnvironmentStatus {
        self.cache.invalidate();
        self.status()
    }

    fn predict(&self, request: &InferenceRequest) -> Result<PredictOutcome> {
        request.validate()?;
        let mut status = self.status();
        if !status.is_ready() {
            // The user may have fixed things since the last probe.
            status = self.refresh_status();
        }
        let invoker = Invoker::new(self.layout.clone(), self.options.clone());
        let result = invoker.predict_with_status(request, &status)?;
        let artifact_path = result
            .output_artifact_path
            .clone()
            .ok_or_else(|| RuntimeError::InvalidArtifact {
                path: invoker.output_dir_for(request),
                reason: "inference reported no output path".to_string(),
                missing: Vec::new(),
            })?;
        let artifact = gate(&artifact_path)?;
        Ok(PredictOutcome {
            result,
            artifact,
            artifact_path,
        })
    }
}

/// Run the artifact gate, folding every failure into `InvalidArtifact`.
pub fn gate(path: &Path) -> Result<ArtifactReport> {
    let report = validate_splat_artifact(path).map_err(|e| artifact_error(path, e))?;
    if !report.valid {
        tracing::warn!(
            path = %path.display(),
            missing = ?report.missing_fields,
            "artifact rejected"
        );
        return Err(RuntimeError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: "required splat fields are missing".to_string(),
            missing: report.missing_fields,
        });
    }
    Ok(report)
}

pub fn artifact_error(path: &Path, err: ArtifactError) -> RuntimeError {
    RuntimeError::InvalidArtifact {
        path: path.to_path_buf(),
        missing: err.missing_fields().to_vec(),
        reason: err.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StandardPlyReport {
    pub path: PathBuf,
    pub points: usize,
    /// Records skipped because a field was NaN or infinite
    pub dropped: usize,
    pub bytes: u64,
}

/// Rewrite the splats in `src` as a standard 3DGS PLY at `dst`.
/// `dst` may equal `src`; the original is only replaced once the new file is complete.
pub fn standardize_ply(src: &Path, dst: &Path) -> Result<StandardPlyReport> {
    let cloud = read_splats(src).map_err(|e| artifact_error(src, e))?;
    let bytes = write_standard_ply(dst, &cloud.points).map_err(|e| artifact_error(dst, e))?;
    if cloud.dropped > 0 {
        tracing::warn!(dropped = cloud.dropped, "skipped splats with non-finite values");
    }
    Ok(StandardPlyReport {
        path: dst.to_path_buf(),
        points: cloud.len(),
        dropped: cloud.dropped,
        bytes,
    })
}

/// Cheap to clone; clones share the status cache.
#[derive(Clone)]
pub struct EnvironmentService {
    inner: Arc<Inner>,
}

impl EnvironmentService {
    /// Build from environment-variable configuration for the current platform.
    pub fn from_env() -> Result<Self> {
        let paths = PathsConfig::from_env();
        let sources = SourcesConfig::from_env();
        let layout = RuntimeLayout::resolve(&paths, &sources)?;
        Ok(Self::new(layout, sources, &InferenceConfig::from_env()))
    }

    pub fn new(layout: RuntimeLayout, sources: SourcesConfig, inference: &InferenceConfig) -> Self {
        Self::with_backend(
            layout,
            sources,
            InvokerOptions::from_config(inference),
            Arc::new(NativeStageBackend::new()),
        )
    }

    pub fn with_backend(
        layout: RuntimeLayout,
        sources: SourcesConfig,
        options: InvokerOptions,
        backend: Arc<dyn StageBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                layout,
                sources,
                options,
                backend,
                cache: StatusCache::default(),
            }),
        }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.inner.layout
    }

    pub fn probe(&self) -> &ImportProbe {
        &self.inner.options.probe
    }

    /// Cached readiness; see `StatusCache` for expiry rules.
    pub fn status(&self) -> EnvironmentStatus {
        self.inner.status()
    }

    /// Drop the cache and probe again.
    pub fn refresh_status(&self) -> EnvironmentStatus {
        self.inner.refresh_status()
    }

    pub fn is_installing(&self) -> bool {
        InstallLease::is_held(&self.inner.layout.env_root)
    }

    /// Start an install on a background thread.
    ///
    /// The single-flight lease is taken here, so a second call while one is
    /// running fails immediately with `InstallInProgress`.
    pub fn start_install(&self) -> Result<InstallHandle> {
        let lease = InstallLease::acquire(&self.inner.layout.env_root)?;
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);

        let thread = thread::Builder::new()
            .name("splatkit-install".to_string())
            .spawn(move || {
                let installer = Installer::with_backend(
                    inner.layout.clone(),
                    inner.sources.clone(),
                    Arc::clone(&inner.backend),
                );
                let progress_tx = tx.clone();
                let result = installer.install_with_lease(
                    &lease,
                    &mut |progress| {
                        let _ = progress_tx.send(InstallEvent::Progress(progress.clone()));
                    },
                    &token,
                );
                drop(lease);
                inner.cache.invalidate();
                if let Err(ref e) = result {
                    tracing::warn!(error = %e, "install finished with error");
                }
                let _ = tx.send(InstallEvent::Finished(result));
            })
            .map_err(|e| RuntimeError::io("spawn installer thread", e))?;

        Ok(InstallHandle {
            events: rx,
            cancel,
            thread: Some(thread),
        })
    }

    /// Check, invoke and gate on the calling thread.
    pub fn predict(&self, request: &InferenceRequest) -> Result<PredictOutcome> {
        self.inner.predict(request)
    }

    /// `predict` on a background thread; exactly one `Finished` event is sent.
    pub fn spawn_predict(&self, request: InferenceRequest) -> Result<Receiver<PredictEvent>> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("splatkit-predict".to_string())
            .spawn(move || {
                let _ = tx.send(PredictEvent::Finished(inner.predict(&request)));
            })
            .map_err(|e| RuntimeError::io("spawn inference thread", e))?;
        Ok(rx)
    }
}
