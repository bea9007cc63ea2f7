//! Resumable installer: walks the stage pipeline, skipping stages whose
//! markers already exist, and stops at the first failure.

use serde::Serialize;
use splatkit_core::config::SourcesConfig;
use splatkit_core::observability;

use super::backend::{NativeStageBackend, StageBackend, StageContext};
use super::lease::InstallLease;
use super::stage::InstallationStage;
use crate::cancel::CancelToken;
use crate::error::{Result, RuntimeError};
use crate::info_log;
use crate::layout::RuntimeLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallProgress {
    pub stage: InstallationStage,
    /// 1-based position in the pipeline
    pub stage_index: usize,
    pub stage_count: usize,
    /// Overall progress in `[0, 100]`; never decreases within one install
    pub percent: f32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub executed: Vec<InstallationStage>,
    pub skipped: Vec<InstallationStage>,
}

pub struct Installer<B: StageBackend = NativeStageBackend> {
    layout: RuntimeLayout,
    sources: SourcesConfig,
    backend: B,
}

impl Installer<NativeStageBackend> {
    pub fn new(layout: RuntimeLayout, sources: SourcesConfig) -> Self {
        Self::with_backend(layout, sources, NativeStageBackend::new())
    }

    /// True while any installer holds the lease for `env_root` in this process.
    pub fn is_in_progress(env_root: &std::path::Path) -> bool {
        InstallLease::is_held(env_root)
    }
}

impl<B: StageBackend> Installer<B> {
    pub fn with_backend(layout: RuntimeLayout, sources: SourcesConfig, backend: B) -> Self {
        Self {
            layout,
            sources,
            backend,
        }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    /// Acquire the single-flight lease and run every incomplete stage.
    pub fn install(
        &self,
        on_progress: &mut dyn FnMut(&InstallProgress),
        cancel: &CancelToken,
    ) -> Result<InstallReport> {
        let lease = InstallLease::acquire(&self.layout.env_root)?;
        self.install_with_lease(&lease, on_progress, cancel)
    }

    /// Run with a lease the caller already holds (acquired on another thread
    /// so a concurrent request is rejected before any work is queued).
    pub fn install_with_lease(
        &self,
        lease: &InstallLease,
        on_progress: &mut dyn FnMut(&InstallProgress),
        cancel: &CancelToken,
    ) -> Result<InstallReport> {
        tracing::debug!(
            backend = self.backend.name(),
            env_root = %lease.env_root().display(),
            "install started"
        );
        let env_root = self.layout.env_root.to_string_lossy().into_owned();
        let stage_count = InstallationStage::PIPELINE.len();
        let mut report = InstallReport::default();
        let mut last_percent = 0.0f32;

        for stage in InstallationStage::PIPELINE {
            let stage_index = stage.index() + 1;
            let offset = stage.progress_offset();
            let mut emit = |fraction: f32, message: &str| {
                let percent = (offset + stage.weight() * fraction.clamp(0.0, 1.0)).min(100.0);
                last_percent = last_percent.max(percent);
                on_progress(&InstallProgress {
                    stage,
                    stage_index,
                    stage_count,
                    percent: last_percent,
                    message: message.to_string(),
                });
            };

            if stage.is_complete(&self.layout) {
                emit(1.0, &format!("{}: already done", stage.label()));
                observability::audit_install_stage(&env_root, stage.as_str(), "skipped", None);
                report.skipped.push(stage);
                continue;
            }
            if cancel.is_cancelled() {
                observability::audit_install_stage(&env_root, stage.as_str(), "cancelled", None);
                return Err(RuntimeError::Cancelled { stage });
            }

            info_log!("[{}/{}] {}", stage_index, stage_count, stage.label());
            emit(0.0, stage.label());
            let ctx = StageContext {
                layout: &self.layout,
                sources: &self.sources,
                cancel,
            };
            let outcome = self
                .backend
                .run_stage(stage, &ctx, &mut |fraction, message| emit(fraction, message))
                .and_then(|()| {
                    if stage.is_complete(&self.layout) {
                        Ok(())
                    } else {
                        Err(RuntimeError::StageFailed {
                            stage,
                            detail: format!(
                                "finished without leaving its marker{}",
                                stage
                                    .marker_path(&self.layout)
                                    .map(|p| format!(" at {}", p.display()))
                                    .unwrap_or_default()
                            ),
                        })
                    }
                });

            if let Err(e) = outcome {
                let status = if matches!(e, RuntimeError::Cancelled { .. }) {
                    "cancelled"
                } else {
                    "failed"
                };
                tracing::warn!(stage = %stage, error = %e, "install stage {}", status);
                observability::audit_install_stage(
                    &env_root,
                    stage.as_str(),
                    status,
                    Some(&e.to_string()),
                );
                return Err(e);
            }

            emit(1.0, &format!("{}: done", stage.label()));
            observability::audit_install_stage(&env_root, stage.as_str(), "completed", None);
            report.executed.push(stage);
        }

        on_progress(&InstallProgress {
            stage: InstallationStage::Complete,
            stage_index: stage_count,
            stage_count,
            percent: 100.0,
            message: "Environment ready".to_string(),
        });
        info_log!(
            "Environment ready ({} stages run, {} already done)",
            report.executed.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
