//! Container storage behind the scheduling engine.
//!
//! Each block run executes inside a per-run container directory named
//! `{workflow_id}_{block_id}_{run_id}`. The engine only needs three
//! operations from storage: create a container before dispatch, resolve an
//! output file's host path, and check whether an output file exists after a
//! run. [`ContainerStore`] is that seam; the coordinator binary plugs in
//! [`FsContainerStore`], tests use [`MemoryContainerStore`].

use flowgrid_core::WorkflowId;
use std::io;
use std::path::{Path, PathBuf};

use crate::definition::BlockId;

/// Stable name of one block run's container directory.
#[must_use]
pub fn container_id(workflow_id: WorkflowId, block_id: BlockId, run_id: usize) -> String {
    format!("{workflow_id}_{block_id}_{run_id}")
}

/// Storage seam for per-run container directories.
pub trait ContainerStore: Send + Sync {
    /// Creates (or reuses) the container directory for one block run and
    /// returns its host path.
    fn ensure_container(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
    ) -> io::Result<PathBuf>;

    /// Host path of an output file inside a run's container. Does not touch
    /// the filesystem.
    fn output_path(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> PathBuf;

    /// Whether a run actually produced the given output file.
    fn output_exists(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> bool;
}

/// Filesystem-backed container store rooted at `<root>/containers`.
pub struct FsContainerStore {
    root: PathBuf,
}

impl FsContainerStore {
    #[must_use]
    pub fn new(var_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: var_dir.into().join("containers"),
        }
    }

    fn container_path(&self, workflow_id: WorkflowId, block_id: BlockId, run_id: usize) -> PathBuf {
        self.root.join(container_id(workflow_id, block_id, run_id))
    }
}

impl ContainerStore for FsContainerStore {
    fn ensure_container(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
    ) -> io::Result<PathBuf> {
        let path = self.container_path(workflow_id, block_id, run_id);
        std::fs::create_dir_all(&path)?;
        // Runner sandboxes execute as an unprivileged user, so the container
        // directory must be writable by everyone.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;
        }
        Ok(path)
    }

    fn output_path(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> PathBuf {
        self.container_path(workflow_id, block_id, run_id).join(output)
    }

    fn output_exists(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> bool {
        self.output_path(workflow_id, block_id, run_id, output)
            .exists()
    }
}

/// In-memory container store for tests.
///
/// Containers live under a virtual `/containers` root and outputs are
/// explicitly recorded with [`MemoryContainerStore::add_output`]. Setting
/// `fail_ensure` makes container creation fail, exercising the synthetic
/// failure path.
#[derive(Default)]
pub struct MemoryContainerStore {
    outputs: std::sync::Mutex<std::collections::HashSet<PathBuf>>,
    fail_ensure: std::sync::atomic::AtomicBool,
}

impl MemoryContainerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn container_path(workflow_id: WorkflowId, block_id: BlockId, run_id: usize) -> PathBuf {
        Path::new("/containers").join(container_id(workflow_id, block_id, run_id))
    }

    /// Records that a run produced the given output file.
    pub fn add_output(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) {
        let path = Self::container_path(workflow_id, block_id, run_id).join(output);
        self.outputs.lock().unwrap().insert(path);
    }

    /// Makes every subsequent `ensure_container` call fail.
    pub fn set_fail_ensure(&self, fail: bool) {
        self.fail_ensure
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl ContainerStore for MemoryContainerStore {
    fn ensure_container(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
    ) -> io::Result<PathBuf> {
        if self.fail_ensure.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "container creation failed",
            ));
        }
        Ok(Self::container_path(workflow_id, block_id, run_id))
    }

    fn output_path(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> PathBuf {
        Self::container_path(workflow_id, block_id, run_id).join(output)
    }

    fn output_exists(
        &self,
        workflow_id: WorkflowId,
        block_id: BlockId,
        run_id: usize,
        output: &str,
    ) -> bool {
        let path = Self::container_path(workflow_id, block_id, run_id).join(output);
        self.outputs.lock().unwrap().contains(&path)
    }
}
