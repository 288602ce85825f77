use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};

use {
    async_trait::async_trait,
    chatrelay_bus::EventBus,
    chatrelay_common::{ChangeSource, Event, Platform},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    config_dir::credentials_dir,
    error::{Context, Error},
    types::Credential,
};

/// Persists one [`Credential`] per platform.
///
/// `save` and `clear` publish `settings-changed{keys: ["credentials.<p>"]}`
/// when a bus is attached, tagged with the caller's [`ChangeSource`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, platform: Platform) -> Result<Option<Credential>>;
    async fn save(
        &self,
        platform: Platform,
        credential: &Credential,
        source: ChangeSource,
    ) -> Result<()>;
    async fn clear(&self, platform: Platform, source: ChangeSource) -> Result<()>;
    /// Platforms with a stored credential.
    async fn list(&self) -> Result<Vec<Platform>>;
}

fn notify(bus: Option<&EventBus>, platform: Platform, source: ChangeSource) {
    if let Some(bus) = bus {
        bus.publish(Event::settings_changed(
            vec![platform.credential_key()],
            source,
        ));
    }
}

// ── File store ──────────────────────────────────────────────────────────────

/// File-based store: `<config dir>/credentials/<platform>.json`, 0600 on Unix.
///
/// Access is serialized per platform; writes go to a temp file that is
/// renamed over the target.
pub struct FileCredentialStore {
    dir: PathBuf,
    locks: HashMap<Platform, Mutex<()>>,
    bus: Option<EventBus>,
}

impl FileCredentialStore {
    pub fn new() -> Self {
        Self::with_dir(credentials_dir())
    }

    /// Create a store rooted at a specific directory (useful for testing).
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: Platform::ALL.iter().map(|p| (*p, Mutex::new(()))).collect(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}.json", platform.as_str()))
    }

    async fn lock(&self, platform: Platform) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        let lock = self
            .locks
            .get(&platform)
            .with_context(|| format!("no lock for {platform}"))?;
        Ok(lock.lock().await)
    }
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, platform: Platform) -> Result<Option<Credential>> {
        let _guard = self.lock(platform).await?;
        let path = self.path(platform);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), %platform, "credential file not found");
                return Ok(None);
            },
            Err(e) => return Err(Error::external(format!("read {}", path.display()), e)),
        };
        let credential: Credential = serde_json::from_str(&data)
            .with_context(|| format!("parse {}", path.display()))?;
        debug!(path = %path.display(), %platform, "credential loaded");
        Ok(Some(credential))
    }

    async fn save(
        &self,
        platform: Platform,
        credential: &Credential,
        source: ChangeSource,
    ) -> Result<()> {
        {
            let _guard = self.lock(platform).await?;
            let path = self.path(platform);
            tokio::fs::create_dir_all(&self.dir).await?;

            let data = serde_json::to_string_pretty(credential)?;
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, data).await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
            }

            tokio::fs::rename(&tmp, &path).await?;
            info!(path = %path.display(), %platform, ?source, "credential saved");
        }
        notify(self.bus.as_ref(), platform, source);
        Ok(())
    }

    async fn clear(&self, platform: Platform, source: ChangeSource) -> Result<()> {
        {
            let _guard = self.lock(platform).await?;
            let path = self.path(platform);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!(path = %path.display(), %platform, ?source, "credential cleared"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(%platform, "clear: no stored credential");
                    return Ok(());
                },
                Err(e) => return Err(Error::external(format!("remove {}", path.display()), e)),
            }
        }
        notify(self.bus.as_ref(), platform, source);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Platform>> {
        let mut found = Vec::new();
        for platform in Platform::ALL {
            if tokio::fs::try_exists(self.path(*platform))
                .await
                .unwrap_or(false)
            {
                found.push(*platform);
            }
        }
        Ok(found)
    }
}

// ── Memory store ────────────────────────────────────────────────────────────

/// In-process store, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: StdMutex<HashMap<Platform, Credential>>,
    bus: Option<EventBus>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Seed a credential without publishing a change.
    pub fn insert(&self, platform: Platform, credential: Credential) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(platform, credential);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, platform: Platform) -> Result<Option<Credential>> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&platform)
            .cloned())
    }

    async fn save(
        &self,
        platform: Platform,
        credential: &Credential,
        source: ChangeSource,
    ) -> Result<()> {
        self.insert(platform, credential.clone());
        notify(self.bus.as_ref(), platform, source);
        Ok(())
    }

    async fn clear(&self, platform: Platform, source: ChangeSource) -> Result<()> {
        let removed = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&platform);
        if removed.is_some() {
            notify(self.bus.as_ref(), platform, source);
        } else {
            warn!(%platform, "clear: no stored credential");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Platform>> {
        let mut platforms: Vec<Platform> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        platforms.sort();
        Ok(platforms)
    }
}
