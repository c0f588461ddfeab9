//! Process configuration: flags with environment fallbacks, read once at
//! startup into an immutable `AppConfig`.
//!
//! Every credential is optional. A missing one disables its feature with a
//! reported error at call time; it never stops the process from starting.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VISION_ITERATION: &str = "Iteration1";
pub const DEFAULT_GUIDANCE_ENDPOINT: &str = "https://smu-team8-openai.openai.azure.com/openai/v1";
pub const DEFAULT_GUIDANCE_DEPLOYMENT: &str = "gpt-4o-mini";
pub const DEFAULT_RECYCLING_URL: &str =
    "https://apis.data.go.kr/B552584/kecoapi/reutilCltRtrvlBzentyService/getReutilCltRtrvlBzentyInfo";
pub const DEFAULT_SEARCH_URL: &str = "https://openapi.naver.com/v1/search/local.json";
pub const DEFAULT_FEEDBACK_URL: &str = "https://github.com/EchoSongEEE/recycling-app/issues/new?title=[버그신고]";

/// Bin CSVs live here, under the data directory.
pub const BINS_SUBDIR: &str = "trash";
/// District boundaries and request links live here, under the data directory.
pub const DISTRICTS_SUBDIR: &str = "recycle_link";
/// Live browser sessions kept before the least recently seen is evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Shared settings for every subcommand.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding `trash/*.csv` and `recycle_link/`.
    #[arg(long, env = "SSDAM_DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Custom Vision prediction endpoint (e.g. https://<name>.cognitiveservices.azure.com/).
    #[arg(long, env = "AZURE_CV_ENDPOINT", hide_env_values = true, global = true)]
    pub vision_endpoint: Option<String>,

    #[arg(long, env = "AZURE_CV_PREDICTION_KEY", hide_env_values = true, global = true)]
    pub vision_key: Option<String>,

    #[arg(long, env = "AZURE_CV_PROJECT_ID", global = true)]
    pub vision_project: Option<String>,

    /// Published iteration name of the classifier.
    #[arg(long, env = "AZURE_CV_ITERATION", default_value = DEFAULT_VISION_ITERATION, global = true)]
    pub vision_iteration: String,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT", default_value = DEFAULT_GUIDANCE_ENDPOINT, global = true)]
    pub guidance_endpoint: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub guidance_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", default_value = DEFAULT_GUIDANCE_DEPLOYMENT, global = true)]
    pub guidance_model: String,

    /// data.go.kr service key for the recycling collector service.
    #[arg(long, env = "RECYCLE_INFO_KEY", hide_env_values = true, global = true)]
    pub open_data_key: Option<String>,

    #[arg(long, env = "RECYCLE_INFO_URL", default_value = DEFAULT_RECYCLING_URL, global = true)]
    pub recycling_url: String,

    /// Endpoint of the drop-off point service (district-code filters).
    #[arg(long, env = "DROPOFF_INFO_URL", global = true)]
    pub dropoff_url: Option<String>,

    #[arg(long, env = "NAVER_CLIENT_ID", hide_env_values = true, global = true)]
    pub search_client_id: Option<String>,

    #[arg(long, env = "NAVER_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub search_client_secret: Option<String>,

    #[arg(long, env = "NAVER_SEARCH_URL", default_value = DEFAULT_SEARCH_URL, global = true)]
    pub search_url: String,

    /// Where users are sent to report a wrong answer or a broken page.
    #[arg(long, env = "FEEDBACK_URL", default_value = DEFAULT_FEEDBACK_URL, global = true)]
    pub feedback_url: String,

    /// Browser sessions kept in memory; the least recently seen is dropped past this.
    #[arg(long, env = "SSDAM_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS, global = true)]
    pub max_sessions: usize,

    #[arg(long, default_value_t = 15, global = true)]
    pub vision_timeout_secs: u64,

    #[arg(long, default_value_t = 30, global = true)]
    pub guidance_timeout_secs: u64,

    #[arg(long, default_value_t = 5, global = true)]
    pub open_data_timeout_secs: u64,

    #[arg(long, default_value_t = 10, global = true)]
    pub search_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: Option<String>,
    pub prediction_key: Option<String>,
    pub project_id: Option<String>,
    pub iteration: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GuidanceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OpenDataConfig {
    pub service_key: Option<String>,
    pub recycling_url: String,
    pub dropoff_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: Duration,
}

/// Everything the application reads from its environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub feedback_url: String,
    pub max_sessions: usize,
    pub vision: VisionConfig,
    pub guidance: GuidanceConfig,
    pub open_data: OpenDataConfig,
    pub search: SearchConfig,
}

impl AppConfig {
    pub fn bins_dir(&self) -> PathBuf {
        self.data_dir.join(BINS_SUBDIR)
    }

    pub fn districts_dir(&self) -> PathBuf {
        self.data_dir.join(DISTRICTS_SUBDIR)
    }

    /// Names of features that are disabled for lack of credentials.
    pub fn missing_features(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.vision.prediction_key.is_none() || self.vision.endpoint.is_none() || self.vision.project_id.is_none() {
            missing.push("image classification");
        }
        if self.guidance.api_key.is_none() {
            missing.push("disposal guidance");
        }
        if self.open_data.service_key.is_none() {
            missing.push("public recycling data");
        }
        if self.search.client_id.is_none() || self.search.client_secret.is_none() {
            missing.push("zero-waste shop search");
        }
        missing
    }
}

/// Blank values count as unset.
fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl From<Settings> for AppConfig {
    fn from(s: Settings) -> Self {
        Self {
            data_dir: s.data_dir,
            feedback_url: s.feedback_url,
            max_sessions: s.max_sessions,
            vision: VisionConfig {
                endpoint: present(s.vision_endpoint),
                prediction_key: present(s.vision_key),
                project_id: present(s.vision_project),
                iteration: s.vision_iteration,
                timeout: Duration::from_secs(s.vision_timeout_secs),
            },
            guidance: GuidanceConfig {
                endpoint: s.guidance_endpoint,
                api_key: present(s.guidance_key),
                model: s.guidance_model,
                timeout: Duration::from_secs(s.guidance_timeout_secs),
            },
            open_data: OpenDataConfig {
                service_key: present(s.open_data_key),
                recycling_url: s.recycling_url,
                dropoff_url: present(s.dropoff_url),
                timeout: Duration::from_secs(s.open_data_timeout_secs),
            },
            search: SearchConfig {
                endpoint: s.search_url,
                client_id: present(s.search_client_id),
                client_secret: present(s.search_client_secret),
                timeout: Duration::from_secs(s.search_timeout_secs),
            },
        }
    }
}

impl AppConfig {
    /// A configuration with every credential unset, rooted at `data_dir`.
    pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            feedback_url: DEFAULT_FEEDBACK_URL.to_string(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            vision: VisionConfig {
                endpoint: None,
                prediction_key: None,
                project_id: None,
                iteration: DEFAULT_VISION_ITERATION.to_string(),
                timeout: Duration::from_secs(15),
            },
            guidance: GuidanceConfig {
                endpoint: DEFAULT_GUIDANCE_ENDPOINT.to_string(),
                api_key: None,
                model: DEFAULT_GUIDANCE_DEPLOYMENT.to_string(),
                timeout: Duration::from_secs(30),
            },
            open_data: OpenDataConfig {
                service_key: None,
                recycling_url: DEFAULT_RECYCLING_URL.to_string(),
                dropoff_url: None,
                timeout: Duration::from_secs(5),
            },
            search: SearchConfig {
                endpoint: DEFAULT_SEARCH_URL.to_string(),
                client_id: None,
                client_secret: None,
                timeout: Duration::from_secs(10),
            },
        }
    }
}
