use std::{
    env,
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, bail};

pub const DEFAULT_REMOTE_MODEL_ID: &str = "ckp_HSxsm89y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Run inference in-process against a checkpoint found in the models directory.
    Local,
    /// Forward uploads to a hosted generation API.
    Proxy,
}

impl FromStr for GatewayMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "local" => Ok(GatewayMode::Local),
            "proxy" => Ok(GatewayMode::Proxy),
            other => bail!("unknown GATEWAY_MODE `{other}`, expected `local` or `proxy`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl ComputeDevice {
    pub fn is_gpu(&self) -> bool {
        matches!(self, ComputeDevice::Cuda(_))
    }

    /// Short label reported by the status endpoints.
    pub fn label(&self) -> &'static str {
        match self {
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Cuda(_) => "cuda",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => f.write_str("cpu"),
            ComputeDevice::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[cfg(feature = "tch-backend")]
impl From<ComputeDevice> for tch::Device {
    fn from(device: ComputeDevice) -> Self {
        match device {
            ComputeDevice::Cpu => tch::Device::Cpu,
            ComputeDevice::Cuda(idx) => tch::Device::Cuda(idx),
        }
    }
}

pub fn cuda_available() -> bool {
    #[cfg(feature = "tch-backend")]
    {
        tch::Cuda::is_available()
    }
    #[cfg(not(feature = "tch-backend"))]
    {
        false
    }
}

/// Values substituted for form fields the client leaves out or sends empty.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub prompt: String,
    pub negative_prompt: String,
    pub cfg_scale: f64,
    pub steps: i64,
    pub strength: f64,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub mode: GatewayMode,
    pub models_dir: PathBuf,
    pub checkpoint_extension: String,
    pub pipeline_module_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub device: ComputeDevice,
    pub defaults: GenerationDefaults,
    pub max_upload_bytes: usize,
    pub remote: Option<RemoteConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000));

        let mode = match lookup("GATEWAY_MODE") {
            Some(raw) => raw.parse()?,
            None => GatewayMode::Local,
        };

        let models_dir =
            PathBuf::from(lookup("MODELS_DIR").unwrap_or_else(|| "/models".to_string()));
        let checkpoint_extension = lookup("CHECKPOINT_EXTENSION")
            .map(|ext| ext.trim_start_matches('.').to_string())
            .unwrap_or_else(|| "safetensors".to_string());
        let pipeline_module_path = PathBuf::from(
            lookup("PIPELINE_MODULE_PATH").unwrap_or_else(|| "pipeline/img2img.ts".to_string()),
        );
        let tokenizer_path = PathBuf::from(
            lookup("TOKENIZER_PATH").unwrap_or_else(|| "pipeline/tokenizer.json".to_string()),
        );

        let device = parse_device(&lookup("DEVICE").unwrap_or_else(|| "auto".into()));

        let default_strength = match mode {
            GatewayMode::Local => 0.75,
            GatewayMode::Proxy => 0.6,
        };
        let defaults = GenerationDefaults {
            prompt: lookup("DEFAULT_PROMPT")
                .unwrap_or_else(|| "high quality, detailed".to_string()),
            negative_prompt: lookup("DEFAULT_NEGATIVE_PROMPT")
                .unwrap_or_else(|| "blurry, low quality, distorted".to_string()),
            cfg_scale: parse_var(&lookup, "DEFAULT_CFG_SCALE").unwrap_or(7.5),
            steps: parse_var(&lookup, "DEFAULT_STEPS").unwrap_or(20),
            strength: parse_var(&lookup, "DEFAULT_STRENGTH").unwrap_or(default_strength),
        };

        let max_upload_bytes = parse_var(&lookup, "MAX_UPLOAD_BYTES").unwrap_or(10 * 1024 * 1024);

        let remote = match mode {
            GatewayMode::Local => None,
            GatewayMode::Proxy => {
                let endpoint = lookup("REMOTE_API_URL")
                    .filter(|url| !url.trim().is_empty())
                    .context("REMOTE_API_URL must be set when GATEWAY_MODE=proxy")?;
                let api_key = lookup("REMOTE_API_KEY").filter(|key| !key.is_empty());
                let model_id = lookup("REMOTE_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_REMOTE_MODEL_ID.to_string());
                let timeout = parse_var(&lookup, "REMOTE_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| Duration::from_secs(120));
                Some(RemoteConfig {
                    endpoint,
                    api_key,
                    model_id,
                    timeout,
                })
            }
        };

        Ok(Self {
            listen_addr,
            mode,
            models_dir,
            checkpoint_extension,
            pipeline_module_path,
            tokenizer_path,
            device,
            defaults,
            max_upload_bytes,
            remote,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_device(raw: &str) -> ComputeDevice {
    let lower = raw.trim().to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if cuda_available() {
            ComputeDevice::Cuda(idx)
        } else {
            ComputeDevice::Cpu
        }
    } else if lower == "auto" && cuda_available() {
        ComputeDevice::Cuda(0)
    } else {
        ComputeDevice::Cpu
    }
}
