use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn check_state_dir(state_dir: &Path) -> Result<()> {
    if state_dir.exists() {
        anyhow::ensure!(state_dir.is_dir(), "storage.state_dir is not a dir: {}", state_dir.display());
    } else {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
    }
    let probe = state_dir.join(".doctor-probe");
    fs::write(&probe, b"ok").with_context(|| format!("state dir not writable: {}", state_dir.display()))?;
    fs::remove_file(&probe).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_dir_and_rejects_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        check_state_dir(&dir).unwrap();
        assert!(dir.is_dir());

        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(check_state_dir(&file).is_err());
    }
}
