use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub trait IdentityProvider: Send + Sync {
    fn installation_id(&self) -> &str;
    fn advertising_id(&self) -> Option<&str>;
}

/// Installation id persisted as a UUID string in a single file. Generated the
/// first time it is asked for and reused for the life of the install.
#[derive(Debug, Clone)]
pub struct FileIdentity {
    installation_id: String,
    advertising_id: Option<String>,
}

impl FileIdentity {
    pub fn load_or_create(path: &Path, advertising_id: Option<String>) -> Result<Self> {
        let installation_id = if path.exists() {
            let s = fs::read_to_string(path).context("read installation id")?;
            let id = Uuid::parse_str(s.trim())
                .with_context(|| format!("installation id in {} is not a uuid", path.display()))?;
            id.to_string()
        } else {
            create(path)?
        };

        Ok(Self {
            installation_id,
            advertising_id: advertising_id.filter(|s| !s.trim().is_empty()),
        })
    }
}

fn create(path: &Path) -> Result<String> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    let id = Uuid::new_v4().to_string();
    let tmp = path.with_extension("new");
    fs::write(&tmp, format!("{}\n", id))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, path).context("commit installation id")?;
    tracing::info!(installation_id = %id, "identity: new installation id generated");
    Ok(id)
}

impl IdentityProvider for FileIdentity {
    fn installation_id(&self) -> &str {
        &self.installation_id
    }

    fn advertising_id(&self) -> Option<&str> {
        self.advertising_id.as_deref()
    }
}
