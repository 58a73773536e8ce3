use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chatline_backend::DEFAULT_BASE_URL;
use chatline_chat::{BusyPolicy, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SYSTEM_PROMPT, SessionOptions};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "chatline";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "CHATLINE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Zero disables the bound.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            system_prompt: default_system_prompt(),
            busy_policy: BusyPolicy::default(),
            email: String::new(),
            name: String::new(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.base_url = if self.base_url.trim().is_empty() {
            default_base_url()
        } else {
            self.base_url.trim().to_string()
        };
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = default_system_prompt();
        }
        self.email = self.email.trim().to_string();
        self.name = self.name.trim().to_string();
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            system_prompt: self.system_prompt.clone(),
            request_timeout: self.request_timeout(),
            busy_policy: self.busy_policy,
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.email.is_empty()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
    env_prefix: String,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatline"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        Self::with_env_prefix(config_path, ENV_PREFIX)
    }

    pub fn with_env_prefix(config_path: PathBuf, env_prefix: impl Into<String>) -> Self {
        let env_prefix = env_prefix.into();
        let settings = Self::load_from_disk(&config_path, &env_prefix);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            env_prefix,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Re-reads every source and swaps the result in.
    pub fn reload(&self) -> Arc<ClientSettings> {
        let settings = Arc::new(Self::load_from_disk(&self.config_path, &self.env_prefix));
        self.settings.store(Arc::clone(&settings));
        settings
    }

    /// Records who is signed in, keeping every other setting. Empty strings sign out.
    pub fn save_identity(
        &self,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Arc<ClientSettings>, SaveError> {
        let mut settings = (*self.settings()).clone();
        settings.email = email.into();
        settings.name = name.into();
        let settings = Arc::new(settings.normalized());

        write_settings_file(&self.config_path, &settings)?;
        self.settings.store(Arc::clone(&settings));
        tracing::info!(
            path = ?self.config_path,
            signed_in = settings.has_identity(),
            "saved identity"
        );
        Ok(settings)
    }

    fn load_from_disk(path: &Path, env_prefix: &str) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(env_prefix));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }
}

/// Staged beside the target, then renamed over it.
fn write_settings_file(path: &Path, settings: &ClientSettings) -> Result<(), SaveError> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory).context(ConfigDirSnafu {
        stage: "create-config-dir",
        directory: directory.to_path_buf(),
    })?;

    let mut encoded = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
        stage: "encode-settings",
    })?;
    encoded.push(b'\n');

    let staged = path.with_extension(format!("json.{}.partial", std::process::id()));
    std::fs::write(&staged, &encoded).context(StageSnafu {
        stage: "write-staged-settings",
        staged: staged.clone(),
    })?;
    if let Err(source) = std::fs::rename(&staged, path) {
        let _ = std::fs::remove_file(&staged);
        return Err(source).context(CommitSnafu {
            stage: "commit-settings",
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SaveError {
    #[snafu(display("cannot create config directory {directory:?} on `{stage}`: {source}"))]
    ConfigDir {
        stage: &'static str,
        directory: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write {staged:?} on `{stage}`: {source}"))]
    Stage {
        stage: &'static str,
        staged: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move new settings into {path:?} on `{stage}`: {source}"))]
    Commit {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
