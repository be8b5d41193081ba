//! Placeholder images shown while a stream is down.
//!
//! At most one viewer runs per region. Showing a new image replaces the old
//! viewer, which is killed and reaped before the new one starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::Mutex;

use crate::backend::MediaBackend;
use crate::error::ProcessError;
use crate::region::Region;

struct Viewer {
    image: PathBuf,
    child: Child,
}

impl Viewer {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn close(mut self, region: &Region) {
        if let Err(e) = self.child.kill().await {
            log::debug!("Placeholder viewer at {} already gone: {}", region, e);
        }
    }
}

pub struct FallbackPresenter<B> {
    backend: Arc<B>,
    viewers: Mutex<HashMap<Region, Viewer>>,
}

impl<B: MediaBackend> FallbackPresenter<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            viewers: Mutex::new(HashMap::new()),
        }
    }

    /// Displays `image` over `region`, superseding whatever was there.
    pub async fn show(&self, image: &Path, region: Region) -> Result<(), ProcessError> {
        let mut viewers = self.viewers.lock().await;

        if let Some(viewer) = viewers.get_mut(&region) {
            if viewer.image == image && viewer.is_alive() {
                return Ok(());
            }
        }
        if let Some(previous) = viewers.remove(&region) {
            previous.close(&region).await;
        }

        let child = self.backend.spawn_viewer(image, &region)?;
        log::info!("Showing placeholder {:?} at {}", image, region);
        viewers.insert(
            region,
            Viewer {
                image: image.to_path_buf(),
                child,
            },
        );
        Ok(())
    }

    pub async fn clear(&self, region: Region) {
        let previous = self.viewers.lock().await.remove(&region);
        if let Some(viewer) = previous {
            log::debug!("Clearing placeholder at {}", region);
            viewer.close(&region).await;
        }
    }

    pub async fn clear_all(&self) {
        let viewers: Vec<_> = self.viewers.lock().await.drain().collect();
        for (region, viewer) in viewers {
            viewer.close(&region).await;
        }
    }

    /// Regions that currently have a viewer, dead or alive.
    pub async fn active_regions(&self) -> Vec<Region> {
        self.viewers.lock().await.keys().copied().collect()
    }

    pub async fn is_showing(&self, region: Region) -> bool {
        match self.viewers.lock().await.get_mut(&region) {
            Some(viewer) => viewer.is_alive(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Event, ScriptedBackend};

    fn presenter() -> (Arc<ScriptedBackend>, FallbackPresenter<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new());
        let presenter = FallbackPresenter::new(Arc::clone(&backend));
        (backend, presenter)
    }

    #[tokio::test]
    async fn test_show_same_image_twice_is_a_no_op() {
        let (backend, presenter) = presenter();
        let region = Region::new(0, 0, 1920, 1080);

        presenter.show(Path::new("/img/offline.png"), region).await.unwrap();
        presenter.show(Path::new("/img/offline.png"), region).await.unwrap();

        assert_eq!(backend.count(|e| matches!(e, Event::Viewer(..))), 1);
        assert!(presenter.is_showing(region).await);
        presenter.clear_all().await;
    }

    #[tokio::test]
    async fn test_new_image_supersedes_old_viewer() {
        let (backend, presenter) = presenter();
        let region = Region::new(0, 0, 960, 1080);

        presenter.show(Path::new("/img/a.png"), region).await.unwrap();
        presenter.show(Path::new("/img/b.png"), region).await.unwrap();

        assert_eq!(backend.count(|e| matches!(e, Event::Viewer(..))), 2);
        assert_eq!(presenter.active_regions().await, vec![region]);
        presenter.clear_all().await;
    }

    #[tokio::test]
    async fn test_dead_viewer_is_replaced() {
        let backend = Arc::new(ScriptedBackend::new().with_viewer("exit 0"));
        let presenter = FallbackPresenter::new(Arc::clone(&backend));
        let region = Region::new(0, 0, 960, 1080);

        presenter.show(Path::new("/img/a.png"), region).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        presenter.show(Path::new("/img/a.png"), region).await.unwrap();

        assert_eq!(backend.count(|e| matches!(e, Event::Viewer(..))), 2);
    }

    #[tokio::test]
    async fn test_clear_only_touches_its_region() {
        let (_backend, presenter) = presenter();
        let left = Region::new(0, 0, 960, 1080);
        let right = Region::new(960, 0, 960, 1080);

        presenter.show(Path::new("/img/a.png"), left).await.unwrap();
        presenter.show(Path::new("/img/a.png"), right).await.unwrap();
        presenter.clear(left).await;

        assert!(!presenter.is_showing(left).await);
        assert!(presenter.is_showing(right).await);

        presenter.clear_all().await;
        assert!(presenter.active_regions().await.is_empty());
    }
}
