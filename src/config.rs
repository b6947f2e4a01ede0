use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub port: u16,
    pub public_base_url: String,
    pub fal_key: Option<String>,
    pub secret_key: Option<String>,
    pub max_upload_mb: u64,
    pub delete_after: Duration,
    pub tmp_dir: PathBuf,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8787);
        let bind_address = format!("0.0.0.0:{}", port);

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("http://{}", bind_address));

        let fal_key = env::var("FAL_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let secret_key = env::var("SECRET_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let max_upload_mb = env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10);
        let delete_after_minutes = env::var("DELETE_AFTER_MINUTES")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            port,
            public_base_url: normalize_base_url(&public_base_url),
            fal_key,
            secret_key,
            max_upload_mb,
            delete_after: Duration::from_secs(delete_after_minutes * 60),
            tmp_dir: resolve_tmp_dir(),
            allowed_origins,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn ttl_minutes(&self) -> u64 {
        self.delete_after.as_secs() / 60
    }

    /// API route path; an optional static secret becomes a path prefix.
    pub fn api_path(&self) -> String {
        match self.secret_key.as_deref() {
            Some(secret) => format!("/{}/api/tryon", secret),
            None => "/api/tryon".to_string(),
        }
    }

    /// Base URL under which temporary artifacts are publicly served.
    pub fn tmp_base_url(&self) -> String {
        format!("{}/tmp", self.public_base_url)
    }
}

fn resolve_tmp_dir() -> PathBuf {
    let tmp_dir = env::var("TMP_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    if let Some(dir) = tmp_dir {
        return dir;
    }
    let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("tryon-proxy");
    base
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
