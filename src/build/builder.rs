//! Local build pipeline
//!
//! Sequences one build as a strict ordered list of named stages: init the
//! image spec from the Kubefile, pull the base image if needed, discover
//! a cluster definition, execute the instructions, write metadata, push.
//! The pipeline halts at the first failing stage and the error propagates
//! to the caller verbatim.

use crate::build::engine::{Engine, ExecState, MAX_LAYER_DEPTH};
use crate::build::mount::{MountDriver, OverlayDriver};
use crate::cluster;
use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::image::{
    resolve_base, Image, ImageStore, LayerKind, ResolvedBase, CLUSTERFILE_ANNOTATION,
};
use crate::kubefile;
use crate::registry::{ImageService, LocalImageService};
use crate::store::{cache, CacheProbe, LayerStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything one build invocation needs to know
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Path to the instruction file
    pub kubefile: PathBuf,

    /// Build context directory COPY sources resolve against
    pub context: PathBuf,

    /// Name the finished image is saved under
    pub name: String,

    /// Skip all cache probing
    pub no_cache: bool,

    /// Downgrade failed RUN/CMD commands to no-ops
    pub ignore_error: bool,
}

/// Builds a cluster image on this machine
pub struct LocalBuilder {
    layout: Layout,
    request: BuildRequest,
    registry: Arc<dyn ImageService>,
    driver: Arc<dyn MountDriver>,
}

impl LocalBuilder {
    pub fn new(layout: Layout, request: BuildRequest) -> Self {
        let registry = Arc::new(LocalImageService::new(layout.clone()));
        Self {
            layout,
            request,
            registry,
            driver: Arc::new(OverlayDriver),
        }
    }

    /// Substitute the mount driver (tests, alternative overlay backends)
    pub fn with_driver(mut self, driver: Arc<dyn MountDriver>) -> Self {
        self.driver = driver;
        self
    }

    /// Substitute the registry boundary
    pub fn with_registry(mut self, registry: Arc<dyn ImageService>) -> Self {
        self.registry = registry;
        self
    }

    /// Run the whole pipeline, returning the finished image
    pub async fn build(self) -> StrataResult<Image> {
        if !self.request.context.is_dir() {
            return Err(StrataError::ContextInvalid {
                path: self.request.context.clone(),
            });
        }
        self.layout.ensure().await?;

        info!("stage: init image spec");
        let layers = kubefile::parse_file(&self.request.kubefile).await?;
        let mut image = Image::new(&self.request.name, layers);
        info!("image spec initialized, image id is {}", image.id);

        let copy_only = image.layers[1..]
            .iter()
            .all(|l| !matches!(l.kind, LayerKind::Run | LayerKind::Cmd));

        let clusterfile = if copy_only {
            info!("copy-only build, skipping base image pull and cluster discovery");
            None
        } else {
            info!("stage: pull base image");
            if !image.layers[0].is_scratch_from() {
                self.registry.pull_if_absent(&image.layers[0].value).await?;
            }

            info!("stage: discover cluster definition");
            cluster::discover(&self.request.context, &image.layers, &self.layout).await
        };

        info!("stage: execute instructions");
        let base = resolve_base(&self.layout, &image.layers[0]).await?;
        let total = base.layers.len() + image.layers.len() - 1;
        if total > MAX_LAYER_DEPTH {
            return Err(StrataError::LayerDepthExceeded {
                count: total,
                limit: MAX_LAYER_DEPTH,
            });
        }
        self.execute(&mut image, &base).await?;

        info!("stage: update image metadata");
        if let Some(definition) = clusterfile {
            image.annotate(CLUSTERFILE_ANNOTATION, definition);
        }
        squash_base(&mut image, base);
        cache::verify_layers_present(&LayerStore::new(self.layout.clone()), &image)?;
        ImageStore::new(self.layout.clone()).save(&image).await?;
        info!("image metadata written for {}", image.name);

        info!("stage: push image");
        self.registry.push(&image.name).await?;

        Ok(image)
    }

    async fn execute(&self, image: &mut Image, base: &ResolvedBase) -> StrataResult<()> {
        let probe = if self.request.no_cache {
            CacheProbe::cold(&self.layout)
        } else {
            CacheProbe::restore(&self.layout).await
        };

        let engine = Engine::new(
            self.layout.clone(),
            probe,
            self.driver.clone(),
            self.request.context.clone(),
            self.request.ignore_error,
        );
        let state = ExecState::new(
            !self.request.no_cache,
            base.parent_chain.clone(),
            base.paths.clone(),
        );
        engine.execute(&mut image.layers, state).await?;
        Ok(())
    }
}

/// Replace the FROM layer with the base image's own layers, so stored
/// metadata describes the complete stack without a base indirection.
fn squash_base(image: &mut Image, base: ResolvedBase) {
    let mut layers = base.layers;
    layers.extend(image.layers.drain(1..));
    image.layers = layers;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::mount::testing::RedirectDriver;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        layout: Layout,
        context: PathBuf,
        kubefile: PathBuf,
        driver: Arc<RedirectDriver>,
    }

    async fn fixture(kubefile: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("state"));
        layout.ensure().await.unwrap();

        let context = temp.path().join("ctx");
        fs::create_dir_all(&context).unwrap();

        let kubefile_path = temp.path().join("Kubefile");
        fs::write(&kubefile_path, kubefile).unwrap();

        Fixture {
            layout,
            context,
            kubefile: kubefile_path,
            driver: RedirectDriver::new(),
            _temp: temp,
        }
    }

    impl Fixture {
        fn builder(&self, name: &str) -> LocalBuilder {
            LocalBuilder::new(
                self.layout.clone(),
                BuildRequest {
                    kubefile: self.kubefile.clone(),
                    context: self.context.clone(),
                    name: name.to_string(),
                    no_cache: false,
                    ignore_error: false,
                },
            )
            .with_driver(self.driver.clone())
        }

        fn write_context(&self, rel: &str, content: &str) {
            let path = self.context.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    fn hashed(image: &Image) -> Vec<String> {
        image.layers.iter().filter_map(|l| l.hash.clone()).collect()
    }

    #[tokio::test]
    async fn scenario_build_then_cached_rebuild() {
        let fx = fixture("FROM scratch\nCOPY app /app\nRUN echo hi > out.txt\n").await;
        fx.write_context("app", "binary");

        let first = fx.builder("kube:v1").build().await.unwrap();
        assert_eq!(hashed(&first).len(), 2);
        assert_eq!(fx.driver.mount_count(), 1);
        // FROM squashed away
        assert_eq!(first.layers.len(), 2);
        assert!(first.layers.iter().all(|l| l.kind != LayerKind::From));

        let second = fx.builder("kube:v1").build().await.unwrap();
        assert_eq!(hashed(&second), hashed(&first));
        // All cache hits: zero further command executions
        assert_eq!(fx.driver.mount_count(), 1);
    }

    #[tokio::test]
    async fn scenario_source_change_forces_fresh_run() {
        let fx = fixture("FROM scratch\nCOPY app /app\nRUN echo hi > out.txt\n").await;
        fx.write_context("app", "v1");

        let first = fx.builder("kube:v1").build().await.unwrap();

        fx.write_context("app", "v2");
        let second = fx.builder("kube:v1").build().await.unwrap();

        assert_ne!(hashed(&first)[0], hashed(&second)[0]);
        // RUN instruction text unchanged, but it executed again
        assert_eq!(fx.driver.mount_count(), 2);
    }

    #[tokio::test]
    async fn copy_only_build_skips_pull_and_produces_image() {
        let fx = fixture("FROM scratch\nCOPY etc /etc\n").await;
        fx.write_context("etc/conf", "v=1");

        let image = fx.builder("conf:v1").build().await.unwrap();
        assert_eq!(hashed(&image).len(), 1);
        assert_eq!(fx.driver.mount_count(), 0);

        let stored = ImageStore::new(fx.layout.clone())
            .by_name("conf:v1")
            .await
            .unwrap();
        assert_eq!(stored.id, image.id);
    }

    #[tokio::test]
    async fn build_on_base_image_squashes_its_layers() {
        let fx = fixture("FROM scratch\nCOPY etc /etc\n").await;
        fx.write_context("etc/conf", "v=1");
        fx.builder("base:v1").build().await.unwrap();

        fs::write(&fx.kubefile, "FROM base:v1\nRUN echo extra > extra.txt\n").unwrap();
        let image = fx.builder("derived:v1").build().await.unwrap();

        assert_eq!(image.layers.len(), 2);
        assert_eq!(image.layers[0].kind, LayerKind::Copy);
        assert_eq!(image.layers[1].kind, LayerKind::Run);
        assert_eq!(hashed(&image).len(), 2);
    }

    #[tokio::test]
    async fn nested_base_is_rejected_before_any_mount() {
        let fx = fixture("FROM nested:v1\nRUN echo hi > f\n").await;

        // A stored image that still carries a FROM layer
        let bad = Image::new(
            "nested:v1",
            vec![
                crate::image::Layer::new(LayerKind::From, "deeper:v1"),
                crate::image::Layer::new(LayerKind::Run, "true"),
            ],
        );
        ImageStore::new(fx.layout.clone()).save(&bad).await.unwrap();

        let err = fx.builder("kube:v1").build().await.unwrap_err();
        assert!(matches!(err, StrataError::BaseImageHasBase { .. }));
        assert_eq!(fx.driver.mount_count(), 0);
    }

    #[tokio::test]
    async fn missing_base_image_fails_pull_stage() {
        let fx = fixture("FROM ghost:v1\nRUN echo hi > f\n").await;
        let err = fx.builder("kube:v1").build().await.unwrap_err();
        assert!(matches!(err, StrataError::ImageNotFound { .. }));
    }

    #[tokio::test]
    async fn failed_run_aborts_whole_build() {
        let fx = fixture("FROM scratch\nRUN exit 9\n").await;
        let err = fx.builder("kube:v1").build().await.unwrap_err();
        assert!(err.to_string().contains("RUN exit 9"));
        assert!(!ImageStore::new(fx.layout.clone())
            .contains("kube:v1")
            .await
            .unwrap());
        // No temp debris
        assert_eq!(fs::read_dir(fx.layout.tmp_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_run_with_ignore_error_still_saves() {
        let fx = fixture("FROM scratch\nCOPY app /app\nRUN exit 9\n").await;
        fx.write_context("app", "x");

        let mut builder = fx.builder("kube:v1");
        builder.request.ignore_error = true;
        let image = builder.build().await.unwrap();

        assert_eq!(hashed(&image).len(), 1);
        assert!(image.layers.iter().any(|l| l.kind == LayerKind::Run && l.hash.is_none()));
    }

    #[tokio::test]
    async fn no_cache_rebuild_executes_again() {
        let fx = fixture("FROM scratch\nRUN echo hi > f.txt\n").await;
        fx.builder("kube:v1").build().await.unwrap();
        assert_eq!(fx.driver.mount_count(), 1);

        let mut builder = fx.builder("kube:v1");
        builder.request.no_cache = true;
        builder.build().await.unwrap();
        assert_eq!(fx.driver.mount_count(), 2);
    }

    #[tokio::test]
    async fn clusterfile_is_attached_to_metadata() {
        let fx = fixture("FROM scratch\nRUN echo hi > f.txt\n").await;
        fx.write_context("Clusterfile", "name: demo\nhosts:\n  - ip: 10.0.0.5\n");

        let image = fx.builder("kube:v1").build().await.unwrap();
        assert!(image
            .annotations
            .get(CLUSTERFILE_ANNOTATION)
            .unwrap()
            .contains("demo"));
    }

    #[tokio::test]
    async fn invalid_context_is_rejected() {
        let fx = fixture("FROM scratch\nRUN true\n").await;
        let mut builder = fx.builder("kube:v1");
        builder.request.context = Path::new("/nonexistent/ctx").to_path_buf();
        assert!(matches!(
            builder.build().await,
            Err(StrataError::ContextInvalid { .. })
        ));
    }
}
