//! `splatkit predict`: image → validated splat PLY.

use anyhow::Result;
use serde_json::json;
use std::str::FromStr;

use splatkit_artifact::{read_splats, splat_path_for, write_splat_file};
use splatkit_core::config::InferenceConfig;
use splatkit_runtime::{Device, InferenceRequest, RuntimeError};
use splatkit_services::environment::artifact_error;

use super::{report, service};

#[derive(Debug)]
pub struct PredictOptions {
    pub image: String,
    pub output: Option<String>,
    pub device: Option<String>,
    pub checkpoint: Option<String>,
    pub timeout: Option<u64>,
    pub verbose: bool,
    pub splat: bool,
    pub json: bool,
}

impl PredictOptions {
    fn request(&self, default_device: &str) -> Result<InferenceRequest, RuntimeError> {
        let device = Device::from_str(self.device.as_deref().unwrap_or(default_device))?;
        let mut request = InferenceRequest::new(&self.image)
            .device(device)
            .verbose(self.verbose);
        if let Some(ref dir) = self.output {
            request = request.output_dir(dir);
        }
        if let Some(ref ckpt) = self.checkpoint {
            request = request.checkpoint(ckpt);
        }
        Ok(request)
    }
}

pub fn cmd_predict(opts: PredictOptions) -> Result<()> {
    let request = opts
        .request(&InferenceConfig::from_env().device)
        .map_err(report)?;
    let svc = service(opts.timeout)?;
    let outcome = svc.predict(&request).map_err(report)?;

    if opts.verbose && !opts.json {
        for line in outcome.result.stdout.lines() {
            eprintln!("  {}", line);
        }
    }

    let splat_path = if opts.splat {
        let ply = &outcome.artifact_path;
        let cloud = read_splats(ply).map_err(|e| report(artifact_error(ply, e)))?;
        let out = splat_path_for(ply);
        write_splat_file(&out, &cloud.points).map_err(|e| report(artifact_error(&out, e)))?;
        if cloud.dropped > 0 {
            tracing::warn!(dropped = cloud.dropped, "skipped splats with non-finite values");
        }
        Some(out)
    } else {
        None
    };

    if opts.json {
        let value = json!({
            "ply": outcome.artifact_path,
            "splat": splat_path,
            "vertex_count": outcome.artifact.vertex_count,
            "elapsed_secs": outcome.result.elapsed.as_secs_f64(),
            "command": outcome.result.command_line,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        eprintln!(
            "✓ {} splats in {:.1}s",
            outcome.artifact.vertex_count,
            outcome.result.elapsed.as_secs_f64()
        );
        println!("{}", outcome.artifact_path.display());
        if let Some(path) = splat_path {
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(device: Option<&str>) -> PredictOptions {
        PredictOptions {
            image: "photo.png".to_string(),
            output: Some("out".to_string()),
            device: device.map(str::to_string),
            checkpoint: None,
            timeout: None,
            verbose: true,
            splat: false,
            json: false,
        }
    }

    #[test]
    fn test_request_from_options() {
        let request = opts(Some("cpu")).request("auto").unwrap();
        assert_eq!(request.device, Device::Cpu);
        assert_eq!(request.output_dir.as_deref(), Some(std::path::Path::new("out")));
        assert!(request.verbose);
        assert!(request.checkpoint_path.is_none());
    }

    #[test]
    fn test_configured_device_is_default() {
        assert_eq!(opts(None).request("mps").unwrap().device, Device::Mps);
        assert_eq!(opts(Some("cpu")).request("mps").unwrap().device, Device::Cpu);
    }

    #[test]
    fn test_unknown_device_rejected() {
        assert!(matches!(
            opts(Some("tpu")).request("auto"),
            Err(RuntimeError::InvalidRequest(_))
        ));
    }
}
