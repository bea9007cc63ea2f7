//! Inference invoker: runs the vendored inference CLI in the isolated
//! interpreter and confirms it produced a PLY.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use splatkit_core::config::InferenceConfig;
use splatkit_core::observability;

use crate::env::validator::{check_environment, EnvironmentStatus, ImportProbe};
use crate::error::{InferenceFailure, Result, RuntimeError};
use crate::info_log;
use crate::layout::RuntimeLayout;
use crate::platform::Platform;
use crate::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Let the inference CLI pick; no `--device` flag is passed.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// The accelerator a "GPU" choice means on `platform`.
    pub fn gpu_for(platform: Platform) -> Self {
        match platform {
            Platform::MacOs => Self::Mps,
            Platform::Windows | Platform::Linux => Self::Cuda,
        }
    }

    pub fn as_cli_arg(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Cpu => Some("cpu"),
            Self::Cuda => Some("cuda"),
            Self::Mps => Some("mps"),
        }
    }
}

impl FromStr for Device {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" | "default" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            "gpu" => Ok(Self::gpu_for(Platform::current().unwrap_or(Platform::Linux))),
            other => Err(RuntimeError::InvalidRequest(format!(
                "unknown device '{}' (expected auto, cpu, cuda, mps or gpu)",
                other
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cli_arg().unwrap_or("auto"))
    }
}

/// One prediction. Built with consuming setters and not changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub image_path: PathBuf,
    /// `None` uses the layout's output directory
    pub output_dir: Option<PathBuf>,
    pub device: Device,
    /// Overrides the installed checkpoint
    pub checkpoint_path: Option<PathBuf>,
    pub verbose: bool,
}

impl InferenceRequest {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            output_dir: None,
            device: Device::Auto,
            checkpoint_path: None,
            verbose: false,
        }
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Fails without touching any subprocess when the image is unusable.
    pub fn validate(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.image_path).map_err(|_| {
            RuntimeError::InvalidRequest(format!(
                "input image not found: {}",
                self.image_path.display()
            ))
        })?;
        if !meta.is_file() {
            return Err(RuntimeError::InvalidRequest(format!(
                "input image is not a file: {}",
                self.image_path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(RuntimeError::InvalidRequest(format!(
                "input image is empty: {}",
                self.image_path.display()
            )));
        }
        if self.image_path.file_stem().is_none() {
            return Err(RuntimeError::InvalidRequest(format!(
                "input image has no file name: {}",
                self.image_path.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub output_artifact_path: Option<PathBuf>,
    pub command_line: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct InvokerOptions {
    /// Module run as `python -m <module>`
    pub module: String,
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub probe: ImportProbe,
}

impl InvokerOptions {
    pub fn from_config(cfg: &InferenceConfig) -> Self {
        Self {
            module: cfg.module.clone(),
            timeout: (cfg.timeout_secs > 0).then(|| Duration::from_secs(cfg.timeout_secs)),
            probe: ImportProbe::from_config(cfg),
        }
    }
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self::from_config(&InferenceConfig::default())
    }
}

pub struct Invoker {
    layout: RuntimeLayout,
    options: InvokerOptions,
}

impl Invoker {
    pub fn new(layout: RuntimeLayout, options: InvokerOptions) -> Self {
        Self { layout, options }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    pub fn options(&self) -> &InvokerOptions {
        &self.options
    }

    /// Validate the request, check readiness, then run the inference CLI.
    pub fn predict(&self, request: &InferenceRequest) -> Result<InferenceResult> {
        request.validate()?;
        let status = check_environment(&self.layout, &self.options.probe);
        self.predict_with_status(request, &status)
    }

    /// Like `predict` but trusts a status the caller already computed.
    pub fn predict_with_status(
        &self,
        request: &InferenceRequest,
        status: &EnvironmentStatus,
    ) -> Result<InferenceResult> {
        request.validate()?;
        let override_ok = request
            .checkpoint_path
            .as_deref()
            .is_some_and(Path::is_file);
        if !status.python_installed || !status.packages_installed {
            return Err(RuntimeError::NotReady {
                message: status.message.clone(),
            });
        }
        if !status.checkpoint_installed && !override_ok {
            return Err(RuntimeError::NotReady {
                message: match request.checkpoint_path {
                    Some(ref p) => format!("checkpoint not found: {}", p.display()),
                    None => status.message.clone(),
                },
            });
        }

        let output_dir = self.output_dir_for(request);
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| RuntimeError::io(format!("create {}", output_dir.display()), e))?;
        let expected = expected_output(&request.image_path, &output_dir);
        // An output left by an earlier run must not pass for this one.
        remove_stale_output(&expected)?;

        let mut cmd = self.build_command(request)?;
        let command_line = render_command(&cmd);
        let image = request.image_path.to_string_lossy().into_owned();
        info_log!("Running inference on {}", request.image_path.display());
        tracing::debug!(command = %command_line, "inference command");
        observability::audit_inference_invoked(
            &image,
            &command_line,
            &self.layout.inference_dir.to_string_lossy(),
        );

        let output = process::run_captured(&mut cmd, self.options.timeout, None)
            .map_err(|e| RuntimeError::io(format!("start {}", self.layout.interpreter.display()), e))?;

        let produced = output.exit_code == 0
            && !output.timed_out
            && expected.is_file();
        observability::audit_inference_completed(
            &image,
            output.exit_code,
            output.elapsed.as_millis() as u64,
            produced.then(|| expected.to_string_lossy()).as_deref(),
            output.timed_out,
        );

        if !produced {
            let missing_output =
                (output.exit_code == 0 && !output.timed_out).then(|| expected.clone());
            let failure = InferenceFailure {
                exit_code: output.exit_code,
                command: command_line,
                stdout: output.stdout,
                stderr: output.stderr,
                timed_out: output.timed_out,
                missing_output,
            };
            tracing::warn!(
                exit_code = failure.exit_code,
                timed_out = failure.timed_out,
                "inference failed"
            );
            return Err(RuntimeError::InferenceFailed(Box::new(failure)));
        }

        info_log!(
            "Generated {} in {:.1}s",
            expected.display(),
            output.elapsed.as_secs_f32()
        );
        Ok(InferenceResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            output_artifact_path: Some(expected),
            command_line,
            elapsed: output.elapsed,
        })
    }

    pub fn output_dir_for(&self, request: &InferenceRequest) -> PathBuf {
        request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.layout.output_dir.clone())
    }

    /// `<python> -m <module> predict -i <image> -o <out> [-c ckpt] [--device d] [-v]`
    ///
    /// Embeddable Windows interpreters ignore `PYTHONPATH` once a `._pth`
    /// file is present, so there the vendored sources are put on `sys.path`
    /// by a `-c` launcher before the module runs.
    pub fn build_command(&self, request: &InferenceRequest) -> Result<Command> {
        let layout = &self.layout;
        let mut cmd = layout.python_command();
        if layout.path_config.is_some() {
            cmd.arg("-c")
                .arg(launcher_script(&layout.inference_src, &self.options.module)?);
        } else {
            cmd.arg("-m").arg(&self.options.module);
        }
        cmd.arg("predict")
            .arg("-i")
            .arg(&request.image_path)
            .arg("-o")
            .arg(self.output_dir_for(request));

        let checkpoint = request.checkpoint_path.clone().or_else(|| {
            layout
                .checkpoint
                .is_file()
                .then(|| layout.checkpoint.clone())
        });
        if let Some(ckpt) = checkpoint {
            cmd.arg("-c").arg(ckpt);
        }
        if let Some(device) = request.device.as_cli_arg() {
            cmd.arg("--device").arg(device);
        }
        if request.verbose {
            cmd.arg("-v");
        }

        cmd.env(
            "PYTHONPATH",
            python_path_with(&layout.inference_src, std::env::var_os("PYTHONPATH"))?,
        );
        cmd.current_dir(&layout.inference_dir);
        Ok(cmd)
    }
}

/// `<out>/<image_stem>.ply`
pub fn expected_output(image: &Path, output_dir: &Path) -> PathBuf {
    let stem = image.file_stem().unwrap_or(image.as_os_str());
    let mut name = stem.to_os_string();
    name.push(".ply");
    output_dir.join(name)
}

/// `src` first, then whatever was already set.
pub fn python_path_with(src: &Path, existing: Option<OsString>) -> Result<OsString> {
    let mut entries = vec![src.to_path_buf()];
    if let Some(existing) = existing.filter(|e| !e.is_empty()) {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).map_err(|e| {
        RuntimeError::Configuration(format!(
            "cannot build PYTHONPATH from {}: {}",
            src.display(),
            e
        ))
    })
}

/// JSON string literals are valid Python string literals.
fn python_literal(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        RuntimeError::Configuration(format!("cannot quote '{}' for the launcher: {}", value, e))
    })
}

fn launcher_script(src: &Path, module: &str) -> Result<String> {
    Ok(format!(
        "import runpy, sys; sys.path.insert(0, {}); runpy.run_module({}, run_name='__main__', alter_sys=True)",
        python_literal(&src.to_string_lossy())?,
        python_literal(module)?
    ))
}

fn remove_stale_output(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed output of an earlier run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::io(format!("remove {}", path.display()), e)),
    }
}

fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| {
            let s = a.to_string_lossy();
            if s.is_empty() || s.contains(char::is_whitespace) {
                format!("\"{}\"", s)
            } else {
                s.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::stage::test_support::{layout_in, mark_complete};
    use crate::env::stage::InstallationStage;

    fn ready_status(layout: &RuntimeLayout) -> EnvironmentStatus {
        EnvironmentStatus {
            python_installed: true,
            packages_installed: true,
            checkpoint_installed: true,
            message: "Environment ready".to_string(),
            interpreter: layout.interpreter.clone(),
            checkpoint: layout.checkpoint.clone(),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!("auto".parse::<Device>().unwrap(), Device::Auto);
        assert_eq!("default".parse::<Device>().unwrap(), Device::Auto);
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!(Device::gpu_for(Platform::MacOs), Device::Mps);
        assert_eq!(Device::gpu_for(Platform::Windows), Device::Cuda);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Auto.as_cli_arg(), None);
    }

    #[test]
    fn test_build_command_flags() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let invoker = Invoker::new(layout.clone(), InvokerOptions::default());

        let auto = invoker
            .build_command(&InferenceRequest::new("/img/cat.png"))
            .unwrap();
        let a = args(&auto);
        assert_eq!(&a[..4], ["-m", "sharp", "predict", "-i"]);
        assert!(!a.contains(&"--device".to_string()));
        assert!(!a.contains(&"-c".to_string()));
        assert_eq!(auto.get_current_dir(), Some(layout.inference_dir.as_path()));

        let full = invoker
            .build_command(
                &InferenceRequest::new("/img/cat.png")
                    .device(Device::Cuda)
                    .checkpoint("/w/model.pt")
                    .verbose(true),
            )
            .unwrap();
        let a = args(&full);
        assert!(a.windows(2).any(|w| w == ["--device", "cuda"]));
        assert!(a.windows(2).any(|w| w == ["-c", "/w/model.pt"]));
        assert_eq!(a.last().map(String::as_str), Some("-v"));

        let python_path = full
            .get_envs()
            .find(|(k, _)| *k == "PYTHONPATH")
            .and_then(|(_, v)| v)
            .unwrap();
        let first = std::env::split_paths(python_path).next().unwrap();
        assert_eq!(first, layout.inference_src);
    }

    #[test]
    fn test_windows_uses_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut layout = layout_in(dir.path());
        layout.path_config = Some(layout.env_root.join("python313._pth"));
        let invoker = Invoker::new(layout, InvokerOptions::default());
        let cmd = invoker
            .build_command(&InferenceRequest::new("cat.png"))
            .unwrap();
        let a = args(&cmd);
        assert_eq!(a[0], "-c");
        assert!(a[1].contains("runpy.run_module(\"sharp\""));
        assert_eq!(a[2], "predict");
    }

    #[test]
    fn test_launcher_quotes_paths_as_python_literals() {
        let script = launcher_script(Path::new("C:\\Users\\Zoë \"q\"\\src"), "sharp").unwrap();
        assert!(script.contains(r#"sys.path.insert(0, "C:\\Users\\Zoë \"q\"\\src");"#));
        assert!(script.contains(r#"runpy.run_module("sharp""#));
        assert!(!script.contains("\\u{"));
    }

    #[test]
    fn test_python_path_preserves_existing() {
        let joined = python_path_with(
            Path::new("/vendored/src"),
            Some(std::env::join_paths(["/a", "/b"]).unwrap()),
        )
        .unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/vendored/src"),
                PathBuf::from("/a"),
                PathBuf::from("/b")
            ]
        );
    }

    #[test]
    fn test_expected_output_uses_stem() {
        assert_eq!(
            expected_output(Path::new("/x/photo.final.jpg"), Path::new("/out")),
            PathBuf::from("/out/photo.final.ply")
        );
    }

    #[test]
    fn test_missing_image_fails_before_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let invoker = Invoker::new(layout, InvokerOptions::default());
        let err = invoker
            .predict(&InferenceRequest::new(dir.path().join("nope.png")))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest(_)));

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        let err = invoker.predict(&InferenceRequest::new(&empty)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest(msg) if msg.contains("empty")));
    }

    #[test]
    fn test_missing_checkpoint_override_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let image = dir.path().join("cat.png");
        std::fs::write(&image, b"png").unwrap();
        let mut status = ready_status(&layout);
        status.checkpoint_installed = false;
        let invoker = Invoker::new(layout, InvokerOptions::default());

        let request = InferenceRequest::new(&image).checkpoint(dir.path().join("gone.pt"));
        match invoker.predict_with_status(&request, &status).unwrap_err() {
            RuntimeError::NotReady { message } => {
                assert!(message.starts_with("checkpoint not found"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_ready_environment() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let image = dir.path().join("cat.png");
        std::fs::write(&image, b"png").unwrap();
        let invoker = Invoker::new(layout, InvokerOptions::default());
        let err = invoker.predict(&InferenceRequest::new(&image)).unwrap_err();
        assert!(matches!(err, RuntimeError::NotReady { .. }));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;

        /// Shell stand-in for the interpreter. Answers the import probe and
        /// otherwise runs `predict_body` with `$img` and `$out` parsed.
        fn fake_python(layout: &RuntimeLayout, predict_body: &str) {
            use std::os::unix::fs::PermissionsExt;
            let script = format!(
                r#"#!/bin/sh
if [ "$1" = "-c" ]; then echo OK; exit 0; fi
while [ $# -gt 0 ]; do
  case "$1" in
    -i) img="$2"; shift ;;
    -o) out="$2"; shift ;;
  esac
  shift
done
stem=$(basename "$img"); stem="${{stem%.*}}"
{}
"#,
                predict_body
            );
            std::fs::create_dir_all(layout.interpreter.parent().unwrap()).unwrap();
            std::fs::write(&layout.interpreter, script).unwrap();
            std::fs::set_permissions(&layout.interpreter, std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }

        fn setup(predict_body: &str) -> (tempfile::TempDir, Invoker, PathBuf) {
            let dir = tempfile::tempdir().unwrap();
            let layout = layout_in(dir.path());
            fake_python(&layout, predict_body);
            mark_complete(&layout, InstallationStage::FetchModelWeights);
            let image = dir.path().join("cat.png");
            std::fs::write(&image, b"png").unwrap();
            let options = InvokerOptions {
                timeout: Some(Duration::from_secs(20)),
                ..InvokerOptions::default()
            };
            (dir, Invoker::new(layout, options), image)
        }

        #[test]
        fn test_successful_prediction() {
            let (_dir, invoker, image) =
                setup(r#"echo "writing"; printf 'ply\n' > "$out/$stem.ply""#);
            let result = invoker.predict(&InferenceRequest::new(&image)).unwrap();
            assert_eq!(result.exit_code, 0);
            let artifact = result.output_artifact_path.unwrap();
            assert_eq!(artifact, invoker.layout().output_dir.join("cat.ply"));
            assert!(artifact.is_file());
            assert!(result.stdout.contains("writing"));
            assert!(result.command_line.contains("predict"));
        }

        #[test]
        fn test_exit_zero_without_output_is_failure() {
            let (_dir, invoker, image) = setup("exit 0");
            let err = invoker.predict(&InferenceRequest::new(&image)).unwrap_err();
            match err {
                RuntimeError::InferenceFailed(f) => {
                    assert_eq!(f.exit_code, 0);
                    assert_eq!(
                        f.missing_output,
                        Some(invoker.layout().output_dir.join("cat.ply"))
                    );
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn test_stale_output_is_not_success() {
            let (_dir, invoker, image) = setup("exit 0");
            let out = invoker.layout().output_dir.clone();
            std::fs::create_dir_all(&out).unwrap();
            std::fs::write(out.join("cat.ply"), b"old").unwrap();
            let err = invoker.predict(&InferenceRequest::new(&image)).unwrap_err();
            assert!(matches!(err, RuntimeError::InferenceFailed(_)));
            assert!(!out.join("cat.ply").exists());
        }

        #[test]
        fn test_rewritten_output_succeeds_within_same_second() {
            let (_dir, invoker, image) = setup(r#"printf 'new\n' > "$out/$stem.ply""#);
            let out = invoker.layout().output_dir.join("cat.ply");
            std::fs::create_dir_all(out.parent().unwrap()).unwrap();
            std::fs::write(&out, b"old").unwrap();
            let result = invoker.predict(&InferenceRequest::new(&image)).unwrap();
            assert_eq!(result.output_artifact_path, Some(out.clone()));
            assert_eq!(std::fs::read(&out).unwrap(), b"new\n");
        }

        #[test]
        fn test_nonzero_exit_captures_streams() {
            let (_dir, invoker, image) = setup("echo 'CUDA out of memory' >&2; exit 3");
            let err = invoker.predict(&InferenceRequest::new(&image)).unwrap_err();
            let diag = err.diagnostics();
            match err {
                RuntimeError::InferenceFailed(f) => {
                    assert_eq!(f.exit_code, 3);
                    assert!(!f.timed_out);
                    assert!(f.stderr.contains("CUDA out of memory"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(diag.contains("exit code: 3"));
        }

        #[test]
        fn test_timeout_kills_inference() {
            let (_dir, invoker, image) = setup("exec sleep 5");
            let invoker = Invoker::new(
                invoker.layout().clone(),
                InvokerOptions {
                    timeout: Some(Duration::from_millis(300)),
                    ..InvokerOptions::default()
                },
            );
            let err = invoker.predict(&InferenceRequest::new(&image)).unwrap_err();
            assert!(matches!(err, RuntimeError::InferenceFailed(ref f) if f.timed_out));
        }
    }
}
