use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use eyre::{Context, Result, bail};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::ServerConfig},
    ports::config_provider::ConfigProvider,
};

/// Reads the routing configuration from one file. Edits are reported once
/// `watch` is called; the directory is watched so that editors saving via
/// rename are still seen.
pub struct FileConfigProvider {
    path: PathBuf,
    file_name: OsString,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Config path '{}' has no file name", path.display()))?
            .to_owned();
        Ok(Self {
            path,
            file_name,
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `event` changed the file called `file_name`.
fn touches(event: &Event, file_name: &OsStr) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<ServerConfig> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Config path is not valid UTF-8"))?;
        load_config(path).await
    }

    fn watch(&self) -> Result<mpsc::Receiver<()>> {
        let mut slot = self
            .watcher
            .lock()
            .map_err(|_| eyre::eyre!("Config watcher lock poisoned"))?;
        if slot.is_some() {
            bail!("Config changes are already being watched");
        }

        // One slot: a pending signal already covers any further edits.
        let (tx, rx) = mpsc::channel(1);
        let file_name = self.file_name.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &file_name) => {
                tracing::debug!(kind = ?event.kind, "Config file changed");
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Config watch error"),
        })
        .wrap_err("Failed to create config watcher")?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch '{}'", dir.display()))?;
        tracing::info!(path = %self.path.display(), "Watching config file");

        *slot = Some(watcher);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use notify::event::{CreateKind, ModifyKind};
    use tempfile::tempdir;
    use tokio::time::{Duration, sleep, timeout};

    use super::*;

    const CONFIG_V1: &str = r#"
        listen_addr = "127.0.0.1:8080"
        [routing]
        build_id = "b1"
    "#;

    #[test]
    fn only_events_for_the_config_file_count() {
        let name = OsStr::new("switchyard.toml");
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/sw/switchyard.toml"));
        assert!(touches(&event, name));

        let sibling = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/sw/other.toml"));
        assert!(!touches(&sibling, name));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/etc/sw/switchyard.toml"));
        assert!(!touches(&access, name));
    }

    #[tokio::test]
    async fn reports_edits_and_reloads() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("switchyard.toml");
        fs::write(&path, CONFIG_V1)?;

        let provider = FileConfigProvider::new(&path)?;
        assert_eq!(provider.load_config().await?.routing.build_id, "b1");

        let mut rx = provider.watch()?;
        assert!(provider.watch().is_err());

        sleep(Duration::from_millis(100)).await;
        fs::write(&path, CONFIG_V1.replace("b1", "b2"))?;

        let signal = timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(signal, Ok(Some(()))), "no change reported");
        assert_eq!(provider.load_config().await?.routing.build_id, "b2");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_edits_surface_on_load() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("switchyard.toml");
        fs::write(&path, CONFIG_V1)?;
        let provider = FileConfigProvider::new(&path)?;

        fs::write(&path, CONFIG_V1.replace("127.0.0.1:8080", "not-an-address"))?;
        assert!(provider.load_config().await.is_err());
        Ok(())
    }

    #[test]
    fn rejects_paths_without_a_file_name() {
        assert!(FileConfigProvider::new("/").is_err());
    }
}
