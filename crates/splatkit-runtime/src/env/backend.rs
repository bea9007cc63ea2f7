//! StageBackend trait: how each installer stage is carried out.
//!
//! The installer owns ordering, markers, cancellation between stages and the
//! single-flight lease. A backend only performs one stage when asked. The
//! default backend downloads over HTTP and drives the isolated interpreter;
//! tests substitute backends that write markers directly.

use std::path::Path;
use std::time::Duration;

use splatkit_core::config::SourcesConfig;

use super::archive;
use super::stage::{InstallationStage, WeightsReceipt};
use crate::cancel::CancelToken;
use crate::download::{Downloader, FetchError, FetchReport, HttpDownloader};
use crate::error::{Result, RuntimeError};
use crate::info_log;
use crate::layout::{RuntimeLayout, OWNER_MARKER};
use crate::manifest::Manifest;
use crate::platform::InterpreterBundle;
use crate::process::{self, ProcessOutput};

/// Lines of subprocess output kept in a `StageFailed` detail.
const FAILURE_TAIL_LINES: usize = 20;

/// Everything a stage may read. Stages report progress as a fraction of
/// their own work in `[0, 1]` plus a status line.
pub struct StageContext<'a> {
    pub layout: &'a RuntimeLayout,
    pub sources: &'a SourcesConfig,
    pub cancel: &'a CancelToken,
}

pub trait StageBackend: Send + Sync {
    /// Backend name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Perform `stage`. On success the stage's marker must exist.
    fn run_stage(
        &self,
        stage: InstallationStage,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()>;
}

impl<B: StageBackend + ?Sized> StageBackend for std::sync::Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run_stage(
        &self,
        stage: InstallationStage,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()> {
        (**self).run_stage(stage, ctx, report)
    }
}

/// Downloads the interpreter bundle, bootstraps pip, installs the manifest
/// and fetches model weights.
pub struct NativeStageBackend<D: Downloader = HttpDownloader> {
    downloader: D,
}

impl NativeStageBackend<HttpDownloader> {
    pub fn new() -> Self {
        Self {
            downloader: HttpDownloader::new(),
        }
    }
}

impl Default for NativeStageBackend<HttpDownloader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Downloader> NativeStageBackend<D> {
    pub fn with_downloader(downloader: D) -> Self {
        Self { downloader }
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }
}

impl<D: Downloader> StageBackend for NativeStageBackend<D> {
    fn name(&self) -> &str {
        "native"
    }

    fn run_stage(
        &self,
        stage: InstallationStage,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()> {
        match stage {
            InstallationStage::FetchInterpreter => self.fetch_interpreter(ctx, report),
            InstallationStage::BootstrapPackageManager => self.bootstrap_pip(ctx, report),
            InstallationStage::InstallDependencies => install_dependencies(ctx, report),
            InstallationStage::FetchModelWeights => self.fetch_model_weights(ctx, report),
            InstallationStage::Complete => Ok(()),
        }
    }
}

impl<D: Downloader> NativeStageBackend<D> {
    /// Stream `url` to `dest`, mapping failures onto `stage` and rejecting
    /// short reads against `Content-Length`.
    fn fetch(
        &self,
        stage: InstallationStage,
        url: &str,
        dest: &Path,
        ctx: &StageContext<'_>,
        span: (f32, f32),
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<FetchReport> {
        let (start, end) = span;
        let mut on_progress = |done: u64, total: Option<u64>| {
            let (fraction, line) = match total {
                Some(total) if total > 0 => (
                    done as f32 / total as f32,
                    format!("{} {} / {}", stage.label(), format_bytes(done), format_bytes(total)),
                ),
                _ => (0.0, format!("{} {}", stage.label(), format_bytes(done))),
            };
            report(start + (end - start) * fraction.clamp(0.0, 1.0), &line);
        };
        let fetched = self
            .downloader
            .fetch(url, dest, ctx.cancel, &mut on_progress)
            .map_err(|e| match e {
                FetchError::Network(reason) => RuntimeError::Network {
                    stage,
                    url: url.to_string(),
                    reason,
                },
                FetchError::Io(source) => {
                    RuntimeError::io(format!("write {}", dest.display()), source)
                }
                FetchError::Cancelled => RuntimeError::Cancelled { stage },
            })?;
        if let Some(expected) = fetched.advertised.filter(|_| fetched.is_truncated()) {
            return Err(RuntimeError::SizeMismatch {
                stage,
                expected,
                actual: fetched.bytes_written,
            });
        }
        if fetched.bytes_written == 0 {
            return Err(RuntimeError::Network {
                stage,
                url: url.to_string(),
                reason: "empty response body".to_string(),
            });
        }
        Ok(fetched)
    }

    fn fetch_interpreter(
        &self,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()> {
        let stage = InstallationStage::FetchInterpreter;
        let layout = ctx.layout;
        let bundle = match ctx.sources.python_url {
            Some(ref url) => InterpreterBundle::from_url(url.as_str())?,
            None => layout.platform.default_bundle(std::env::consts::ARCH)?,
        };

        let parent = layout
            .env_root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        create_dir(parent)?;
        let download_dir = tempfile::Builder::new()
            .prefix(".splatkit-download")
            .tempdir_in(parent)
            .map_err(|e| RuntimeError::io(format!("temp dir in {}", parent.display()), e))?;
        let archive_path = download_dir.path().join(bundle.file_name());

        info_log!("Downloading Python runtime from {}", bundle.url);
        self.fetch(stage, &bundle.url, &archive_path, ctx, (0.0, 0.8), report)?;
        if ctx.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled { stage });
        }

        report(0.85, "Extracting Python runtime");
        let staging = layout.staging_dir();
        remove_dir_if_exists(&staging)?;
        let extracted = archive::extract(bundle.kind, &archive_path, &staging).map_err(|detail| {
            let _ = std::fs::remove_dir_all(&staging);
            RuntimeError::StageFailed { stage, detail }
        })?;
        tracing::debug!(entries = extracted, staging = %staging.display(), "bundle extracted");

        if !staging.join(layout.interpreter_relative()).is_file() {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(RuntimeError::StageFailed {
                stage,
                detail: format!(
                    "archive from {} has no {}",
                    bundle.url,
                    layout.interpreter_relative().display()
                ),
            });
        }

        if let Some(ref pth) = layout.path_config {
            let relative = pth.strip_prefix(&layout.env_root).unwrap_or(pth);
            let staged = staging.join(relative);
            if staged.is_file() {
                archive::patch_path_config(&staged)
                    .map_err(|e| RuntimeError::io(format!("patch {}", staged.display()), e))?;
            } else {
                tracing::warn!(path = %staged.display(), "path config not found in bundle");
            }
        }

        let marker = staging.join(OWNER_MARKER);
        if let Err(e) = std::fs::write(&marker, b"") {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(RuntimeError::io(format!("write {}", marker.display()), e));
        }
        if let Err(e) = clear_env_root(layout) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        std::fs::rename(&staging, &layout.env_root).map_err(|e| {
            RuntimeError::io(
                format!(
                    "move {} to {}",
                    staging.display(),
                    layout.env_root.display()
                ),
                e,
            )
        })?;
        report(1.0, "Python runtime ready");
        Ok(())
    }

    fn bootstrap_pip(
        &self,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()> {
        let stage = InstallationStage::BootstrapPackageManager;
        let layout = ctx.layout;
        let script = layout.env_root.join("get-pip.py");

        info_log!("Downloading get-pip.py");
        self.fetch(stage, &ctx.sources.get_pip_url, &script, ctx, (0.0, 0.3), report)?;

        report(0.35, "Running get-pip.py");
        let mut cmd = layout.python_command();
        cmd.arg(&script)
            .arg("--no-warn-script-location")
            .current_dir(&layout.env_root);
        let output = run_stage_process(stage, &mut cmd, ctx.cancel, &mut |line| {
            report(0.5, line);
        });
        let _ = std::fs::remove_file(&script);
        check_stage_output(stage, output?)?;

        report(1.0, "pip installed");
        Ok(())
    }

    fn fetch_model_weights(
        &self,
        ctx: &StageContext<'_>,
        report: &mut dyn FnMut(f32, &str),
    ) -> Result<()> {
        let stage = InstallationStage::FetchModelWeights;
        let layout = ctx.layout;
        let url = ctx.sources.checkpoint_url.as_str();
        if let Some(dir) = layout.checkpoint.parent() {
            create_dir(dir)?;
        }
        let partial = layout.checkpoint_partial();
        let receipt_path = layout.checkpoint_receipt();
        // A stale receipt must never vouch for a new download.
        let _ = std::fs::remove_file(&receipt_path);

        info_log!("Downloading model weights from {}", url);
        let fetched = self.fetch(stage, url, &partial, ctx, (0.0, 0.98), report)?;

        std::fs::rename(&partial, &layout.checkpoint).map_err(|e| {
            RuntimeError::io(
                format!("move {} to {}", partial.display(), layout.checkpoint.display()),
                e,
            )
        })?;
        WeightsReceipt::new(url, fetched.bytes_written).write(&receipt_path)?;
        report(1.0, "Model weights ready");
        Ok(())
    }
}

fn install_dependencies(ctx: &StageContext<'_>, report: &mut dyn FnMut(f32, &str)) -> Result<()> {
    let stage = InstallationStage::InstallDependencies;
    let layout = ctx.layout;
    if !layout.inference_src.is_dir() {
        return Err(RuntimeError::Configuration(format!(
            "inference sources not found at {}",
            layout.inference_src.display()
        )));
    }
    let manifest = Manifest::load(&layout.manifest)?;
    let stamp = layout.requirements_stamp();
    let _ = std::fs::remove_file(&stamp);

    let filtered = layout.filtered_requirements();
    std::fs::write(&filtered, manifest.to_requirements_txt())
        .map_err(|e| RuntimeError::io(format!("write {}", filtered.display()), e))?;
    info_log!(
        "Installing {} packages from {}",
        manifest.len(),
        layout.manifest.display()
    );

    let total = manifest.len().max(1) as f32;
    let mut collected = 0usize;
    let mut cmd = layout.python_command();
    cmd.args(["-m", "pip", "install", "-r"])
        .arg(&filtered)
        .args(["--no-warn-script-location", "--disable-pip-version-check"])
        .current_dir(&layout.inference_dir);
    let output = run_stage_process(stage, &mut cmd, ctx.cancel, &mut |line| {
        // pip prints one "Collecting" line per resolved requirement.
        if line.trim_start().starts_with("Collecting") {
            collected += 1;
        }
        report((collected as f32 / total).min(0.95), line);
    })?;
    check_stage_output(stage, output)?;

    std::fs::write(&stamp, manifest.digest())
        .map_err(|e| RuntimeError::io(format!("write {}", stamp.display()), e))?;
    report(1.0, "Packages installed");
    Ok(())
}

/// Run a stage subprocess with streamed output and no deadline; pip installs
/// of large wheels legitimately take a long time.
fn run_stage_process(
    stage: InstallationStage,
    cmd: &mut std::process::Command,
    cancel: &CancelToken,
    on_line: &mut dyn FnMut(&str),
) -> Result<ProcessOutput> {
    let output = process::run_streaming(cmd, None::<Duration>, Some(cancel), &mut |_, line| {
        tracing::debug!(target: "splatkit::install", "{}", line);
        on_line(line);
    })
    .map_err(|e| RuntimeError::StageFailed {
        stage,
        detail: format!("failed to start {:?}: {}", cmd.get_program(), e),
    })?;
    if output.cancelled {
        return Err(RuntimeError::Cancelled { stage });
    }
    Ok(output)
}

fn check_stage_output(stage: InstallationStage, output: ProcessOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    Err(RuntimeError::StageFailed {
        stage,
        detail: format!(
            "exited with code {}:\n{}",
            output.exit_code,
            output.tail(FAILURE_TAIL_LINES)
        ),
    })
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| RuntimeError::io(format!("create {}", dir.display()), e))
}

/// Make way for a fresh interpreter at `env_root`. A directory is only
/// deleted when it is empty or carries the owner marker.
fn clear_env_root(layout: &RuntimeLayout) -> Result<()> {
    let root = &layout.env_root;
    let empty = match std::fs::read_dir(root) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RuntimeError::io(format!("read {}", root.display()), e)),
    };
    if empty || layout.owner_marker().is_file() {
        return remove_dir_if_exists(root);
    }
    Err(RuntimeError::Configuration(format!(
        "{} already exists and was not created by splatkit; remove it or choose another environment directory",
        root.display()
    )))
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::io(format!("remove {}", dir.display()), e)),
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory downloader. `advertise` overrides the reported
    /// `Content-Length` so truncation can be simulated.
    #[derive(Default)]
    pub struct FakeDownloader {
        pub bodies: Mutex<HashMap<String, Vec<u8>>>,
        pub advertise: Mutex<HashMap<String, u64>>,
        pub calls: AtomicUsize,
    }

    impl FakeDownloader {
        pub fn serve(self, url: &str, body: &[u8]) -> Self {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_vec());
            self
        }

        pub fn advertise(&self, url: &str, len: u64) {
            self.advertise.lock().unwrap().insert(url.to_string(), len);
        }

        pub fn clear_advertised(&self) {
            self.advertise.lock().unwrap().clear();
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Downloader for FakeDownloader {
        fn fetch(
            &self,
            url: &str,
            dest: &Path,
            cancel: &CancelToken,
            on_progress: &mut dyn FnMut(u64, Option<u64>),
        ) -> std::result::Result<FetchReport, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Network("HTTP 404".to_string()))?;
            let advertised = self
                .advertise
                .lock()
                .unwrap()
                .get(url)
                .copied()
                .or(Some(body.len() as u64));
            let mut file = std::fs::File::create(dest)?;
            crate::download::copy_with_progress(
                &mut body.as_slice(),
                &mut file,
                advertised,
                cancel,
                on_progress,
            )
        }
    }
}
