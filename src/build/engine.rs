//! Instruction execution engine
//!
//! Walks the instruction list in order, serving each layer from cache
//! when the chain is still intact and executing it for real otherwise.
//! The cache/layer state is an explicit accumulator passed through every
//! step, so the sequential dependency between instructions is visible in
//! the types rather than hidden in shared mutable fields.

use crate::build::hasher;
use crate::build::mount::{MountDriver, MountTarget};
use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::fsutil;
use crate::image::{Layer, LayerKind};
use crate::store::{CacheProbe, LayerStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hard cap on the overlay stack. Deeper stacks degrade mount performance
/// and signal a malformed instruction list.
pub const MAX_LAYER_DEPTH: usize = 128;

/// Cache and layer state threaded across the instruction list.
///
/// `continue_cache` degrades monotonically: the first instruction that
/// cannot be served from cache breaks the chain, and no later instruction
/// consults the probe again.
#[derive(Debug, Clone)]
pub struct ExecState {
    pub continue_cache: bool,
    pub parent_chain: String,
    pub base_layers: Vec<PathBuf>,
}

impl ExecState {
    pub fn new(use_cache: bool, parent_chain: String, base_layers: Vec<PathBuf>) -> Self {
        Self {
            continue_cache: use_cache,
            parent_chain,
            base_layers,
        }
    }

    /// Once an instruction executes fresh there is no sound basis to
    /// trust downstream cache entries; drop the chain entirely.
    fn break_cache(&mut self) {
        self.continue_cache = false;
        self.parent_chain.clear();
    }
}

/// Executes the non-FROM layers of one build
pub struct Engine {
    layout: Layout,
    store: LayerStore,
    probe: CacheProbe,
    driver: Arc<dyn MountDriver>,
    context: PathBuf,
    ignore_error: bool,
}

impl Engine {
    pub fn new(
        layout: Layout,
        probe: CacheProbe,
        driver: Arc<dyn MountDriver>,
        context: PathBuf,
        ignore_error: bool,
    ) -> Self {
        let store = LayerStore::new(layout.clone());
        Self {
            layout,
            store,
            probe,
            driver,
            context,
            ignore_error,
        }
    }

    /// Execute every layer in order, resolving each from cache or for
    /// real. Each layer's `hash` (and for COPY its `cache_id`) is filled
    /// in; the returned state carries the final base layer list.
    pub async fn execute(&self, layers: &mut [Layer], mut state: ExecState) -> StrataResult<ExecState> {
        for layer in layers.iter_mut() {
            let step = match layer.kind {
                LayerKind::From => continue,
                LayerKind::Copy => self.exec_copy(layer, &mut state).await,
                LayerKind::Run | LayerKind::Cmd => self.exec_command(layer, &mut state).await,
            };
            step.map_err(|e| StrataError::instruction(layer.kind, layer.value.clone(), e))?;

            if let Some(ref hash) = layer.hash {
                if state.base_layers.len() + 1 > MAX_LAYER_DEPTH {
                    return Err(StrataError::LayerDepthExceeded {
                        count: state.base_layers.len() + 1,
                        limit: MAX_LAYER_DEPTH,
                    });
                }
                state.base_layers.push(self.layout.layer_path(hash));
            }
        }
        info!("executed all build instructions");
        Ok(state)
    }

    /// COPY: digest the source, try the cache, otherwise stage the files
    /// into a fresh build directory and hash that.
    async fn exec_copy(&self, layer: &mut Layer, state: &mut ExecState) -> StrataResult<()> {
        info!("run build layer: {} {}", layer.kind, layer.value);
        let (src, dst) = layer.copy_src_dst()?;
        let src_path = self.context.join(src);

        // The source digest is computed against the build context,
        // independent of any mount, so source edits invalidate the cache
        // even when the instruction text is unchanged.
        let source_digest = match hasher::source_digest(&src_path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(
                    "failed to digest COPY source {}, discarding cache for this instruction: {e}",
                    src_path.display()
                );
                None
            }
        };

        if state.continue_cache {
            let hit = source_digest
                .as_deref()
                .and_then(|digest| self.probe.probe(&state.parent_chain, layer, Some(digest)));
            match hit {
                Some(hit) => {
                    info!("---> using cache {}", hit.layer_hash.as_deref().unwrap_or("(empty)"));
                    layer.hash = hit.layer_hash;
                    layer.cache_id = source_digest;
                    state.parent_chain = hit.chain;
                    return Ok(());
                }
                None => state.break_cache(),
            }
        }

        if !src_path.exists() {
            return Err(StrataError::CopySourceMissing(src_path));
        }

        let staging = self.layout.mk_tmp_dir("copy").await?;
        let staged = stage_copy(&src_path, dst, &staging);
        let digest = match staged {
            Ok(()) => self.store.register(&staging),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_dir_all(&staging).await;

        layer.hash = none_if_empty(digest?);
        layer.cache_id = source_digest;
        Ok(())
    }

    /// RUN/CMD: try the cache, otherwise mount the base layers and run
    /// the command against the merged view. Only RUN persists a layer;
    /// CMD records a default command, not a filesystem mutation.
    async fn exec_command(&self, layer: &mut Layer, state: &mut ExecState) -> StrataResult<()> {
        info!("run build layer: {} {}", layer.kind, layer.value);
        if state.continue_cache {
            match self.probe.probe(&state.parent_chain, layer, None) {
                Some(hit) => {
                    info!("---> using cache {}", hit.layer_hash.as_deref().unwrap_or("(empty)"));
                    layer.hash = hit.layer_hash;
                    state.parent_chain = hit.chain;
                    return Ok(());
                }
                None => state.break_cache(),
            }
        }

        // A scratch build's first command has no layers yet; give the
        // mount an empty lower to merge over.
        let scratch_lower = if state.base_layers.is_empty() {
            Some(self.layout.mk_tmp_dir("scratch").await?)
        } else {
            None
        };
        let lowers = match &scratch_lower {
            Some(lower) => vec![lower.clone()],
            None => state.base_layers.clone(),
        };

        let mount = MountTarget::new(&self.layout, None, None, lowers, self.driver.clone()).await;
        let mount = match mount {
            Ok(mount) => mount,
            Err(e) => {
                remove_scratch(scratch_lower).await;
                return Err(e);
            }
        };

        let result = self.run_in_mount(layer, mount).await;
        remove_scratch(scratch_lower).await;

        match result {
            Ok(hash) => {
                layer.hash = hash;
                Ok(())
            }
            Err(e) if self.ignore_error && is_command_failure(&e) => {
                warn!("ignoring failed instruction `{} {}`: {e}", layer.kind, layer.value);
                layer.hash = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Mount, run, unmount, hash, with cleanup on every exit path
    async fn run_in_mount(
        &self,
        layer: &Layer,
        mut mount: MountTarget,
    ) -> StrataResult<Option<String>> {
        if let Err(e) = mount.mount().await {
            mount.cleanup().await;
            return Err(e);
        }

        let run_result = self.run_shell(&layer.value, mount.target()).await;
        if let Err(e) = run_result {
            mount.cleanup().await;
            return Err(e);
        }

        if let Err(e) = mount.unmount().await {
            mount.cleanup().await;
            return Err(e);
        }

        let hash = if layer.kind == LayerKind::Run {
            self.store.register(mount.upper()).map(none_if_empty)
        } else {
            Ok(None)
        };
        mount.cleanup().await;
        hash
    }

    /// Run the instruction's command text with the merged view as working
    /// directory
    async fn run_shell(&self, value: &str, workdir: &Path) -> StrataResult<()> {
        let shell = format!("cd {} && {}", workdir.display(), value);
        debug!("exec: {shell}");

        let output = Command::new("sh")
            .args(["-c", shell.as_str()])
            .output()
            .await
            .map_err(|e| StrataError::command_failed(shell.clone(), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim_end());
        }

        if !output.status.success() {
            return Err(StrataError::command_exec(
                shell,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Place the COPY source into the staging directory.
///
/// A directory source lands at the destination path itself (`.` means
/// "name it after the source"); a single file lands inside the
/// destination-named subpath.
fn stage_copy(src: &Path, dst: &str, staging: &Path) -> StrataResult<()> {
    let src_name = src
        .file_name()
        .ok_or_else(|| StrataError::Internal(format!("no file name in {}", src.display())))?;

    let dest = if src.is_dir() {
        let dst = if dst == "." {
            PathBuf::from(src_name)
        } else {
            PathBuf::from(dst.trim_start_matches('/'))
        };
        staging.join(dst)
    } else {
        staging.join(dst.trim_start_matches('/')).join(src_name)
    };

    fsutil::copy_tree(src, &dest)
}

fn none_if_empty(digest: String) -> Option<String> {
    if hasher::is_empty_digest(&digest) {
        None
    } else {
        Some(digest)
    }
}

fn is_command_failure(e: &StrataError) -> bool {
    matches!(
        e,
        StrataError::CommandExecution { .. } | StrataError::CommandFailed { .. }
    )
}

async fn remove_scratch(dir: Option<PathBuf>) {
    if let Some(dir) = dir {
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::mount::testing::RedirectDriver;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        layout: Layout,
        context: PathBuf,
        driver: Arc<RedirectDriver>,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("state"));
        layout.ensure().await.unwrap();
        let context = temp.path().join("context");
        fs::create_dir_all(&context).unwrap();
        Fixture {
            layout,
            context,
            driver: RedirectDriver::new(),
            _temp: temp,
        }
    }

    impl Fixture {
        async fn engine(&self, ignore_error: bool) -> Engine {
            Engine::new(
                self.layout.clone(),
                CacheProbe::restore(&self.layout).await,
                self.driver.clone(),
                self.context.clone(),
                ignore_error,
            )
        }

        fn fresh_state(&self) -> ExecState {
            ExecState::new(true, String::new(), vec![])
        }

        fn tmp_entries(&self) -> usize {
            fs::read_dir(self.layout.tmp_dir()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn copy_layer_is_hashed_and_stored() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "payload").unwrap();

        let mut layers = vec![Layer::new(LayerKind::Copy, "app.bin /app")];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();

        let hash = layers[0].hash.clone().unwrap();
        assert!(layers[0].cache_id.is_some());
        assert_eq!(state.base_layers, vec![fx.layout.layer_path(&hash)]);

        let stored = fx.layout.layer_path(&hash).join("app/app.bin");
        assert_eq!(fs::read_to_string(stored).unwrap(), "payload");
    }

    #[tokio::test]
    async fn copy_directory_preserves_structure() {
        let fx = fixture().await;
        fs::create_dir_all(fx.context.join("conf/sub")).unwrap();
        fs::write(fx.context.join("conf/sub/a.yaml"), "a: 1").unwrap();

        let mut layers = vec![Layer::new(LayerKind::Copy, "conf /etc/conf")];
        fx.engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();

        let hash = layers[0].hash.clone().unwrap();
        let stored = fx.layout.layer_path(&hash).join("etc/conf/sub/a.yaml");
        assert_eq!(fs::read_to_string(stored).unwrap(), "a: 1");
    }

    #[tokio::test]
    async fn copy_missing_source_fails_with_instruction_context() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Copy, "ghost /app")];
        let err = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("COPY ghost /app"));
    }

    #[tokio::test]
    async fn run_layer_captures_upper_changes() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Run, "echo hi > greeting.txt")];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();

        let hash = layers[0].hash.clone().unwrap();
        assert_eq!(state.base_layers.len(), 1);
        assert_eq!(fx.driver.mount_count(), 1);

        let stored = fx.layout.layer_path(&hash).join("greeting.txt");
        assert_eq!(fs::read_to_string(stored).unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn run_with_no_output_produces_no_layer() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Run, "true")];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert!(layers[0].hash.is_none());
        assert!(state.base_layers.is_empty());
    }

    #[tokio::test]
    async fn cmd_layer_never_persists_a_layer() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Cmd, "echo hi > boot.txt")];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert!(layers[0].hash.is_none());
        assert!(state.base_layers.is_empty());
        // The command still ran against a mount
        assert_eq!(fx.driver.mount_count(), 1);
    }

    #[tokio::test]
    async fn failed_run_aborts_and_cleans_up() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Run, "exit 3")];
        let err = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("RUN exit 3"));
        assert!(layers[0].hash.is_none());
        assert_eq!(fx.tmp_entries(), 0);
    }

    #[tokio::test]
    async fn failed_run_with_ignore_error_continues() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "x").unwrap();
        let mut layers = vec![
            Layer::new(LayerKind::Run, "exit 3"),
            Layer::new(LayerKind::Copy, "app.bin /app"),
        ];
        let state = fx
            .engine(true)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert!(layers[0].hash.is_none());
        assert!(layers[1].hash.is_some());
        assert_eq!(state.base_layers.len(), 1);
        assert_eq!(fx.tmp_entries(), 0);
    }

    #[tokio::test]
    async fn successful_run_leaves_no_temp_dirs() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::Run, "echo hi > f.txt")];
        fx.engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert_eq!(fx.tmp_entries(), 0);
    }

    #[tokio::test]
    async fn later_run_mounts_earlier_layers() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "x").unwrap();
        let mut layers = vec![
            Layer::new(LayerKind::Copy, "app.bin /app"),
            Layer::new(LayerKind::Run, "echo hi > f.txt"),
        ];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert_eq!(state.base_layers.len(), 2);
    }

    #[tokio::test]
    async fn from_layers_are_skipped() {
        let fx = fixture().await;
        let mut layers = vec![Layer::new(LayerKind::From, "scratch")];
        let state = fx
            .engine(false)
            .await
            .execute(&mut layers, fx.fresh_state())
            .await
            .unwrap();
        assert!(layers[0].hash.is_none());
        assert!(state.base_layers.is_empty());
        assert_eq!(fx.driver.mount_count(), 0);
    }

    #[tokio::test]
    async fn depth_cap_is_enforced() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "x").unwrap();

        let mut layers = vec![Layer::new(LayerKind::Copy, "app.bin /app")];
        let mut state = fx.fresh_state();
        state.base_layers = (0..MAX_LAYER_DEPTH)
            .map(|i| fx.layout.layer_path(&format!("base{i}")))
            .collect();

        let err = fx
            .engine(false)
            .await
            .execute(&mut layers, state)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::LayerDepthExceeded { .. }));
    }

    #[tokio::test]
    async fn second_build_is_served_from_cache() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "payload").unwrap();

        let instructions = || {
            vec![
                Layer::new(LayerKind::Copy, "app.bin /app"),
                Layer::new(LayerKind::Run, "echo hi > f.txt"),
            ]
        };

        let mut first = instructions();
        let engine = fx.engine(false).await;
        engine.execute(&mut first, fx.fresh_state()).await.unwrap();
        save_for_cache(&fx.layout, &first).await;
        assert_eq!(fx.driver.mount_count(), 1);

        // Fresh engine so the probe sees the saved chains
        let mut second = instructions();
        let engine = fx.engine(false).await;
        let state = engine.execute(&mut second, fx.fresh_state()).await.unwrap();

        assert_eq!(first[0].hash, second[0].hash);
        assert_eq!(first[1].hash, second[1].hash);
        assert_eq!(state.base_layers.len(), 2);
        // No further executions: mount count unchanged
        assert_eq!(fx.driver.mount_count(), 1);
        assert!(state.continue_cache);
    }

    #[tokio::test]
    async fn source_change_breaks_cache_for_the_rest_of_the_build() {
        let fx = fixture().await;
        fs::write(fx.context.join("app.bin"), "v1").unwrap();

        let instructions = || {
            vec![
                Layer::new(LayerKind::Copy, "app.bin /app"),
                Layer::new(LayerKind::Run, "echo hi > f.txt"),
            ]
        };

        let mut first = instructions();
        fx.engine(false)
            .await
            .execute(&mut first, fx.fresh_state())
            .await
            .unwrap();
        save_for_cache(&fx.layout, &first).await;

        fs::write(fx.context.join("app.bin"), "v2").unwrap();

        let mut second = instructions();
        let state = fx
            .engine(false)
            .await
            .execute(&mut second, fx.fresh_state())
            .await
            .unwrap();

        assert_ne!(first[0].hash, second[0].hash);
        // RUN text is unchanged but caching was disabled after the COPY
        // miss, so it executed again
        assert_eq!(fx.driver.mount_count(), 2);
        assert!(!state.continue_cache);
    }

    async fn save_for_cache(layout: &Layout, layers: &[Layer]) {
        use crate::image::{Image, ImageStore};
        let image = Image::new("cache-seed", layers.to_vec());
        ImageStore::new(layout.clone()).save(&image).await.unwrap();
    }
}
