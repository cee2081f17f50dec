use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const URL_VAR: &str = "HEARTH_URL";
pub const API_KEY_VAR: &str = "HEARTH_API_KEY";
pub const PROFILE_VAR: &str = "HEARTH_PROFILE";

pub struct Config {
    pub data_dir: PathBuf,
    /// Base URL of the remote store, e.g. `http://127.0.0.1:8080`.
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub preferred_profile: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "hearth").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::resolve(data_dir, |name| std::env::var(name).ok())
    }

    /// Build the configuration from `data_dir` and an environment lookup.
    ///
    /// The API key and preferred profile fall back to the `api_key` and
    /// `profile` files in the data directory.
    pub fn resolve(data_dir: PathBuf, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let remote_url = var(URL_VAR).map(|url| url.trim_end_matches('/').to_string());
        let api_key = match var(API_KEY_VAR) {
            Some(key) => Some(key),
            None => read_trimmed(&data_dir.join("api_key"))?,
        };
        let preferred_profile = match var(PROFILE_VAR) {
            Some(name) => Some(name),
            None => read_trimmed(&data_dir.join("profile"))?,
        };

        Ok(Config {
            data_dir,
            remote_url,
            api_key,
            preferred_profile,
        })
    }

    /// Why the remote cannot be used, if it cannot.
    pub fn missing_remote(&self) -> Option<String> {
        match (&self.remote_url, &self.api_key) {
            (None, _) => Some(format!("{URL_VAR} is not set")),
            (Some(_), None) => Some(format!(
                "{API_KEY_VAR} is not set and no api_key file exists in {}",
                self.data_dir.display()
            )),
            _ => None,
        }
    }

    /// Remember `name` as the default profile for later commands.
    pub fn save_preferred_profile(&self, name: &str) -> Result<()> {
        let path = self.data_dir.join("profile");
        std::fs::write(&path, name)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if let Some(key) = read_trimmed(&path)? {
            return Ok((key, false));
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Clients read it from the data directory or {API_KEY_VAR}");
        Ok((key, true))
    }
}

fn read_trimmed(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let value = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_values_win_and_url_is_normalised() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api_key"), "from-file").unwrap();
        let config = Config::resolve(
            dir.path().to_path_buf(),
            env(&[
                (URL_VAR, "http://127.0.0.1:8080/"),
                (API_KEY_VAR, "from-env"),
                (PROFILE_VAR, "Mom"),
            ]),
        )
        .unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.preferred_profile.as_deref(), Some("Mom"));
        assert!(config.missing_remote().is_none());
    }

    #[test]
    fn api_key_and_profile_fall_back_to_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api_key"), "abc123\n").unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), env(&[])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("abc123"));
        assert!(config.preferred_profile.is_none());

        config.save_preferred_profile("Dad").unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), env(&[])).unwrap();
        assert_eq!(config.preferred_profile.as_deref(), Some("Dad"));
    }

    #[test]
    fn missing_remote_names_the_variable() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), env(&[])).unwrap();
        assert!(config.missing_remote().unwrap().contains(URL_VAR));

        let config =
            Config::resolve(dir.path().to_path_buf(), env(&[(URL_VAR, "http://x")])).unwrap();
        assert!(config.missing_remote().unwrap().contains(API_KEY_VAR));
    }

    #[test]
    fn api_key_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), env(&[])).unwrap();
        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);

        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
