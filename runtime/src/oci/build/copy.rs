//! COPY execution.
//!
//! [`CopyCommand`] performs the copy against the filesystem being built.
//! [`CachingCopyCommand`] replays the output of an earlier, equivalent
//! copy by extracting its cached single-layer image instead. Both are
//! driven through [`BuildCommand`] so the stage builder does not need to
//! know which one it holds.

use std::path::PathBuf;
use std::sync::Arc;

use strata_core::config::ExecutorConfig;
use strata_core::error::{Result, StrataError};

use super::args::BuildArgs;
use super::context::FileContext;
use super::dockerfile::CopyInstruction;
use super::ownership::{
    get_active_user_group, get_chmod, get_user_group, EtcPasswdLookup, Ownership, UserLookup,
};
use super::path::resolve_if_symlink;
use super::sources::{destination_filepath, join_under, resolve_env_and_wildcards};
use crate::fs::{copy_dir, copy_file, copy_symlink, create_file, CopyOptions, CopyOutcome};
use crate::oci::image::{LayeredImage, OciImageConfig};
use crate::oci::layers::extract_layer;

/// Mode for heredoc files when `--chmod` is not given.
pub const DEFAULT_HEREDOC_MODE: u32 = 0o644;

/// Ownership used when `copy_as_root` is enabled.
const ROOT_USER: &str = "0:0";

/// One executable build instruction.
pub trait BuildCommand: Send {
    /// Apply the instruction to the filesystem being built.
    fn execute_command(&mut self, config: &OciImageConfig, args: &BuildArgs) -> Result<()>;

    /// Paths written by the last execution, for the snapshotter.
    fn files_to_snapshot(&self) -> &[PathBuf];

    /// Absolute source paths the instruction reads, for cache keys.
    fn files_used_from_context(
        &self,
        config: &OciImageConfig,
        args: &BuildArgs,
    ) -> Result<Vec<PathBuf>>;

    /// Whether the output of this instruction should be pushed to the layer cache.
    fn should_cache_output(&self) -> bool;
}

/// Executes a COPY instruction.
pub struct CopyCommand {
    instruction: CopyInstruction,
    config: ExecutorConfig,
    file_context: FileContext,
    user_lookup: Arc<dyn UserLookup>,
    snapshot_files: Vec<PathBuf>,
    should_cache: bool,
}

impl CopyCommand {
    /// Create an executor resolving names against the build root's
    /// `etc/passwd` and `etc/group`.
    pub fn new(instruction: CopyInstruction, config: ExecutorConfig) -> Result<Self> {
        let lookup = Arc::new(EtcPasswdLookup::new(&config.root_dir));
        Self::with_user_lookup(instruction, config, lookup)
    }

    /// Create an executor with an explicit user/group lookup.
    pub fn with_user_lookup(
        instruction: CopyInstruction,
        config: ExecutorConfig,
        user_lookup: Arc<dyn UserLookup>,
    ) -> Result<Self> {
        let file_context = file_context_for(&instruction, &config)?;
        Ok(Self {
            instruction,
            config,
            file_context,
            user_lookup,
            snapshot_files: Vec::new(),
            should_cache: false,
        })
    }

    /// Mark whether the output should be cached.
    pub fn with_cache_output(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    pub fn instruction(&self) -> &CopyInstruction {
        &self.instruction
    }

    /// Turn this into the executor that replays `image` instead of copying.
    pub fn into_cached(self, image: Option<Arc<dyn LayeredImage>>) -> CachingCopyCommand {
        CachingCopyCommand {
            image,
            instruction: self.instruction,
            config: self.config,
            file_context: self.file_context,
            extracted_files: Vec::new(),
        }
    }

    fn resolve_ownership(
        &self,
        config: &OciImageConfig,
        env: &[(String, String)],
    ) -> Result<Ownership> {
        let chown = self.instruction.chown.as_deref();
        if self.instruction.from.is_some() {
            return get_user_group(chown, env, self.user_lookup.as_ref());
        }
        let user = if self.config.copy_as_root {
            ROOT_USER
        } else {
            config.user.as_deref().unwrap_or_default()
        };
        get_active_user_group(user, chown, env, self.user_lookup.as_ref())
    }

    fn copy(&mut self, config: &OciImageConfig, args: &BuildArgs) -> Result<()> {
        self.snapshot_files.clear();
        let env = args.replacement_envs(&config.env);
        let ownership = self.resolve_ownership(config, &env)?;

        let cwd = image_cwd(config);
        let resolved = resolve_env_and_wildcards(
            &self.instruction,
            &self.file_context,
            &env,
            &self.config.root_dir,
            &cwd,
        )?;
        let chmod = get_chmod(self.instruction.chmod.as_deref(), &env)?;

        let opts = CopyOptions {
            context: &self.file_context,
            ownership,
            chmod,
        };

        for src in &resolved.sources {
            let full_path = join_under(self.file_context.root(), src);
            let meta = std::fs::symlink_metadata(&full_path)
                .map_err(|e| StrataError::io_at("could not copy source", &full_path, e))?;

            let mut src_repr = full_path.to_string_lossy().into_owned();
            if meta.is_dir() && !src_repr.ends_with('/') {
                src_repr.push('/');
            }

            let dest =
                destination_filepath(&src_repr, &resolved.dest, &self.config.root_dir, &cwd);
            let dest = resolve_if_symlink(&dest)?;

            if meta.is_dir() {
                let copied = copy_dir(&full_path, &dest, &opts)?;
                self.snapshot_files.extend(copied);
                continue;
            }

            let outcome = if meta.file_type().is_symlink() {
                copy_symlink(&full_path, &dest, &self.file_context)?
            } else {
                copy_file(&full_path, &dest, &opts)?
            };
            match outcome {
                CopyOutcome::Written => self.snapshot_files.push(dest),
                CopyOutcome::Skipped => {}
            }
        }

        for heredoc in self.instruction.heredoc_sources() {
            let src = join_under(self.file_context.root(), &heredoc.path);
            let dest = destination_filepath(
                &src.to_string_lossy(),
                &resolved.dest,
                &self.config.root_dir,
                &cwd,
            );
            let dest = resolve_if_symlink(&dest)?;
            let content = heredoc.content.as_deref().unwrap_or_default();
            create_file(
                &dest,
                &mut content.as_bytes(),
                chmod.unwrap_or(DEFAULT_HEREDOC_MODE),
                ownership,
            )?;
            self.snapshot_files.push(dest);
        }

        Ok(())
    }
}

impl BuildCommand for CopyCommand {
    fn execute_command(&mut self, config: &OciImageConfig, args: &BuildArgs) -> Result<()> {
        let result = self.copy(config, args);
        result.map_err(|e| e.in_step(self.instruction.to_string()))
    }

    fn files_to_snapshot(&self) -> &[PathBuf] {
        &self.snapshot_files
    }

    fn files_used_from_context(
        &self,
        config: &OciImageConfig,
        args: &BuildArgs,
    ) -> Result<Vec<PathBuf>> {
        files_used_from_context(
            &self.instruction,
            &self.config,
            &self.file_context,
            config,
            args,
        )
    }

    fn should_cache_output(&self) -> bool {
        self.should_cache
    }
}

impl std::fmt::Display for CopyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instruction)
    }
}

/// Replays a cached COPY by extracting its single-layer image.
pub struct CachingCopyCommand {
    image: Option<Arc<dyn LayeredImage>>,
    instruction: CopyInstruction,
    config: ExecutorConfig,
    file_context: FileContext,
    extracted_files: Vec<PathBuf>,
}

impl CachingCopyCommand {
    pub fn new(
        image: Option<Arc<dyn LayeredImage>>,
        instruction: CopyInstruction,
        config: ExecutorConfig,
    ) -> Result<Self> {
        let file_context = file_context_for(&instruction, &config)?;
        Ok(Self {
            image,
            instruction,
            config,
            file_context,
            extracted_files: Vec::new(),
        })
    }

    fn extract(&mut self) -> Result<()> {
        tracing::info!("Found cached layer, extracting to filesystem");

        let image = self.image.as_ref().ok_or_else(|| {
            StrataError::CacheIntegrity(format!("cached command image is nil {}", self.instruction))
        })?;

        let layers = image.layers()?;
        if layers.len() != 1 {
            return Err(StrataError::CacheIntegrity(format!(
                "expected 1 layers but got {}",
                layers.len()
            )));
        }

        self.extracted_files = extract_layer(&layers[0], &self.config.root_dir)?;
        tracing::debug!(files = ?self.extracted_files, "Extracted files");
        Ok(())
    }
}

impl BuildCommand for CachingCopyCommand {
    fn execute_command(&mut self, _config: &OciImageConfig, _args: &BuildArgs) -> Result<()> {
        let result = self.extract();
        result.map_err(|e| e.in_step(self.instruction.to_string()))
    }

    fn files_to_snapshot(&self) -> &[PathBuf] {
        tracing::debug!(
            count = self.extracted_files.len(),
            "Files extracted by caching copy command"
        );
        &self.extracted_files
    }

    fn files_used_from_context(
        &self,
        config: &OciImageConfig,
        args: &BuildArgs,
    ) -> Result<Vec<PathBuf>> {
        files_used_from_context(
            &self.instruction,
            &self.config,
            &self.file_context,
            config,
            args,
        )
    }

    fn should_cache_output(&self) -> bool {
        false
    }
}

impl std::fmt::Display for CachingCopyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instruction)
    }
}

/// Source root for `instruction`: the named stage's root, or the build
/// context with its exclusions.
fn file_context_for(
    instruction: &CopyInstruction,
    config: &ExecutorConfig,
) -> Result<FileContext> {
    match &instruction.from {
        Some(stage) => Ok(FileContext::new(config.stage_root(stage))),
        None => FileContext::with_excludes(&config.build_context, config.ignore_patterns.as_slice()),
    }
}

fn image_cwd(config: &OciImageConfig) -> PathBuf {
    match config.working_dir.as_deref() {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("/"),
    }
}

fn files_used_from_context(
    instruction: &CopyInstruction,
    exec_config: &ExecutorConfig,
    file_context: &FileContext,
    config: &OciImageConfig,
    args: &BuildArgs,
) -> Result<Vec<PathBuf>> {
    let env = args.replacement_envs(&config.env);
    let resolved = resolve_env_and_wildcards(
        instruction,
        file_context,
        &env,
        &exec_config.root_dir,
        &image_cwd(config),
    )?;

    let files: Vec<PathBuf> = resolved
        .sources
        .iter()
        .map(|src| join_under(file_context.root(), src))
        .collect();
    tracing::debug!(files = ?files, "Using files from context");
    Ok(files)
}
