//! Runs the external conversion executable.
//!
//! Every invocation is bounded by the recipe's `timeout`. A timed-out child
//! is killed and the recipe is abandoned for this run; other failures are
//! retried up to `retry_attempts` times with backoff.
//!
//! Command lines:
//!
//! ```text
//! <convert-tool> <recipe> <publish_dir>/<slug>.<src_ext> [format flags] [--dont-download-recipe] [-vv]
//! <convert-tool> <source artifact> <publish_dir>/<stem>.<ext> [format flags] [-vv]
//! ```

use crate::config::BuildConfig;
use crate::models::{FailureReason, RecipeDescriptor};
use crate::retry::Backoff;
use crate::utils::truncate_for_log;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Flags the converter needs for a given output format, before per-recipe options.
pub fn format_flags(ext: &str) -> Vec<String> {
    match ext {
        "mobi" | "azw3" => vec!["--output-profile=kindle_oasis".into()],
        "pdf" => vec![
            "--pdf-page-numbers".into(),
            "--pdf-default-font-size=20".into(),
            "--paper-size=a5".into(),
        ],
        _ => Vec::new(),
    }
}

fn flags_for(descriptor: &RecipeDescriptor, ext: &str, verbose: bool) -> Vec<String> {
    let mut flags = format_flags(ext);
    if let Some(extra) = descriptor.conv_options.get(ext) {
        flags.extend(extra.iter().cloned());
    }
    if verbose {
        flags.push("-vv".into());
    }
    flags
}

/// Arguments for converting a recipe into its primary artifact.
pub fn recipe_args(config: &BuildConfig, descriptor: &RecipeDescriptor) -> (Vec<String>, PathBuf) {
    let (source, is_local) = config.recipe_source(&descriptor.recipe);
    let dest = config.publish_path(&format!("{}.{}", descriptor.slug, descriptor.src_ext));
    let mut args = vec![source, dest.display().to_string()];
    let mut flags = flags_for(descriptor, &descriptor.src_ext, false);
    if !is_local {
        flags.push("--dont-download-recipe".into());
    }
    if config.verbose {
        flags.push("-vv".into());
    }
    args.extend(flags);
    (args, dest)
}

/// Arguments for converting an existing artifact into `dest`.
pub fn fanout_args(
    config: &BuildConfig,
    descriptor: &RecipeDescriptor,
    source: &Path,
    dest: &Path,
    ext: &str,
) -> Vec<String> {
    let mut args = vec![source.display().to_string(), dest.display().to_string()];
    args.extend(flags_for(descriptor, ext, config.verbose));
    args
}

/// Run `program` once with a hard wall-clock limit.
///
/// Dropping the output future on timeout kills the child (`kill_on_drop`).
#[instrument(level = "debug", skip(args), fields(argc = args.len()))]
pub async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, FailureReason> {
    let t0 = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(program, ?args, "Spawning");

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => {
            return Err(FailureReason::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        Ok(Err(source)) => {
            return Err(FailureReason::Spawn {
                program: program.to_string(),
                source,
            });
        }
        Ok(Ok(output)) => output,
    };

    let elapsed_ms = t0.elapsed().as_millis();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FailureReason::ExitStatus {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: truncate_for_log(stderr.trim(), 600),
        });
    }
    debug!(program, elapsed_ms, "Process finished");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Converter front-end bound to one build configuration.
#[derive(Debug, Clone)]
pub struct Invoker {
    program: String,
    base_delay: Duration,
}

impl Invoker {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            program: config.tools.convert.clone(),
            base_delay: Duration::from_secs(2),
        }
    }

    /// Shorten the delay between retries (tests).
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    async fn run(&self, descriptor: &RecipeDescriptor, args: Vec<String>) -> Result<(), FailureReason> {
        let backoff = Backoff::new(descriptor.retry_attempts, self.base_delay);
        let label = format!("convert {}", descriptor.recipe);
        backoff
            .run(
                &label,
                || run_with_timeout(&self.program, &args, descriptor.timeout()),
                FailureReason::is_retryable,
            )
            .await
            .map(|_| ())
    }

    /// Convert the recipe into `<publish_dir>/<slug>.<src_ext>`.
    #[instrument(level = "info", skip_all, fields(recipe = %descriptor.recipe))]
    pub async fn convert_recipe(
        &self,
        config: &BuildConfig,
        descriptor: &RecipeDescriptor,
    ) -> Result<PathBuf, FailureReason> {
        let (args, dest) = recipe_args(config, descriptor);
        let t0 = Instant::now();
        self.run(descriptor, args).await?;
        info!(
            dest = %dest.display(),
            elapsed_secs = t0.elapsed().as_secs(),
            "Recipe converted"
        );
        Ok(dest)
    }

    /// Convert an existing artifact into another format.
    #[instrument(level = "info", skip_all, fields(recipe = %descriptor.recipe, %ext))]
    pub async fn convert_file(
        &self,
        config: &BuildConfig,
        descriptor: &RecipeDescriptor,
        source: &Path,
        dest: &Path,
        ext: &str,
    ) -> Result<(), FailureReason> {
        let args = fanout_args(config, descriptor, source, dest, ext);
        self.run(descriptor, args).await?;
        info!(dest = %dest.display(), "Format converted");
        Ok(())
    }
}
