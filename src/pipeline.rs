//! The build loop.
//!
//! Recipes are processed one at a time in registry order. Each one ends in
//! exactly one of: skipped, restored from the cache, run live, or failed.
//! A failure is logged and the loop moves on; only the final writes of
//! `index.json`, `last_run.json` and `index.html` can abort the build.
//!
//! # Per-recipe flow
//!
//! 1. Skipped recipes contribute nothing and are listed as unavailable.
//! 2. A recipe that is not due, not forced and has a cache entry is restored
//!    by downloading its published files.
//! 3. Otherwise the converter runs live. If that fails and the cache has an
//!    entry that was not tried yet, the cached files are used instead.
//! 4. The primary artifact is resolved and its dated name computed.
//! 5. Live artifacts with a title get a generated cover.
//! 6. Every extra format is taken from disk or converted from the primary.
//!
//! Renames to the dated names happen after the loop, in one pass.

use crate::cache::{CacheClient, CacheError};
use crate::config::{BuildConfig, DEFAULT_TEMPLATE};
use crate::cover::generate_cover;
use crate::index::build_index;
use crate::invoker::{Invoker, recipe_args};
use crate::models::{FailureReason, PublishIndex, RecipeDescriptor, RecipeOutput, RunLog};
use crate::outputs::{feed, html, json};
use crate::resolver::{newest_candidate, resolve, resolve_file};
use crate::retry::Backoff;
use crate::schedule::is_due;
use crate::{registry, utils};
use chrono::{DateTime, Utc};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

pub const HTML_FILE: &str = "index.html";

/// Where a recipe's artifacts came from this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Live,
    Cache,
}

/// The artifacts one recipe produced, primary format first.
#[derive(Debug, Clone)]
pub struct RecipeRun {
    pub source: Source,
    pub outputs: Vec<RecipeOutput>,
}

/// Counters and the written manifest, for the final log line and tests.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub live: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub index: PublishIndex,
    pub elapsed: Duration,
}

/// Everything the loop shares between recipes.
#[derive(Debug)]
pub struct BuildContext {
    pub config: BuildConfig,
    pub registry: Vec<RecipeDescriptor>,
    pub cache: CacheClient,
    pub cache_index: PublishIndex,
    pub run_log: RunLog,
    pub invoker: Invoker,
    /// Delay between attempts when restoring from the cache.
    pub cache_backoff: Backoff,
    pub outputs: Vec<RecipeOutput>,
    pub now: DateTime<Utc>,
    pub started: Instant,
}

impl BuildContext {
    /// Load the registry and the previous build's state.
    #[instrument(level = "info", skip_all, fields(site = %config.publish_site))]
    pub async fn prepare(config: BuildConfig) -> Result<Self, Box<dyn Error>> {
        let started = Instant::now();
        if let Err(e) = utils::ensure_writable_dir(&config.publish_dir).await {
            error!(
                path = %config.publish_dir.display(),
                error = %e,
                "Publish directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }

        let mut registry = registry::load(&config.registry).await?;
        let cache = CacheClient::new(config.publish_site.clone())?;
        let cache_index = cache.fetch_index().await;
        let run_log = cache.fetch_run_log().await;
        registry::apply_run_log(&mut registry, &run_log);
        info!(
            recipes = registry.len(),
            cached = cache_index.entries.len(),
            "Build prepared"
        );

        Ok(Self {
            invoker: Invoker::new(&config),
            cache_backoff: Backoff::new(1, Duration::from_secs(1)),
            config,
            registry,
            cache,
            cache_index,
            run_log,
            outputs: Vec::new(),
            now: Utc::now(),
            started,
        })
    }

    async fn restore_from_cache(&self, descriptor: &RecipeDescriptor, files: &[String]) -> Result<(), CacheError> {
        let cache = &self.cache;
        let dir = self.config.publish_dir.as_path();
        let label = format!("restore {}", descriptor.recipe);
        self.cache_backoff
            .run(&label, move || cache.download_all(files, dir), CacheError::is_transient)
            .await?;
        info!(recipe = %descriptor.recipe, files = files.len(), "Restored from cache");
        Ok(())
    }

    /// Delete whatever a failed conversion left at the primary destination.
    async fn discard_partial(&self, descriptor: &RecipeDescriptor) {
        let (_, dest) = recipe_args(&self.config, descriptor);
        match fs::remove_file(&dest).await {
            Ok(()) => warn!(path = %dest.display(), "Removed partial artifact from failed conversion"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dest.display(), error = %e, "Failed to remove partial artifact"),
        }
    }

    /// Fetch or convert the primary artifact.
    ///
    /// Returns where it came from and, for cached artifacts, the primary
    /// filename as listed in the cache index.
    async fn obtain(&self, descriptor: &RecipeDescriptor) -> Result<(Source, Option<String>), FailureReason> {
        let cached = self.cache_index.files_for(descriptor.name());
        let forced = self.config.is_forced(&descriptor.recipe);
        let due = is_due(descriptor, self.now);
        debug!(recipe = %descriptor.recipe, forced, due, has_cache = cached.is_some(), "Scheduling");

        let cached_primary = |files: &[String]| {
            let suffix = format!(".{}", descriptor.src_ext);
            files.iter().find(|f| f.ends_with(&suffix)).cloned()
        };

        let mut cache_tried = false;
        if let Some(files) = cached {
            if !forced && !due {
                cache_tried = true;
                match self.restore_from_cache(descriptor, files).await {
                    Ok(()) => return Ok((Source::Cache, cached_primary(files))),
                    Err(e) => warn!(
                        recipe = %descriptor.recipe,
                        error = %e,
                        "Cache restore failed; running recipe live"
                    ),
                }
            }
        }

        match self.invoker.convert_recipe(&self.config, descriptor).await {
            Ok(_) => Ok((Source::Live, None)),
            Err(e) => {
                self.discard_partial(descriptor).await;
                match cached {
                    Some(files) if !cache_tried => {
                        warn!(
                            recipe = %descriptor.recipe,
                            error = %e,
                            "Live conversion failed; falling back to cache"
                        );
                        self.restore_from_cache(descriptor, files).await?;
                        Ok((Source::Cache, cached_primary(files)))
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Produce every artifact for one recipe.
    #[instrument(level = "info", skip_all, fields(recipe = %descriptor.recipe))]
    pub async fn process_recipe(&self, descriptor: &RecipeDescriptor) -> Result<RecipeRun, FailureReason> {
        let (source, cached_primary) = self.obtain(descriptor).await?;
        let primary = match cached_primary {
            Some(file_name) => resolve_file(&self.config, descriptor, file_name, self.now).await?,
            None => resolve(&self.config, descriptor, self.now).await?,
        };
        let primary_path = self.config.publish_path(&primary.file_name);

        if source == Source::Live && descriptor.overwrite_cover {
            if let Some(title) = primary.title.as_deref() {
                if let Err(e) = generate_cover(&self.config, &primary_path, title).await {
                    warn!(error = %e, "Cover generation failed; keeping original cover");
                }
            }
        }

        let stem = primary
            .rename_to
            .strip_suffix(&format!(".{}", primary.ext))
            .unwrap_or(&primary.rename_to)
            .to_string();
        let mut outputs = vec![primary.clone()];
        for ext in &descriptor.target_ext {
            if let Some(existing) = newest_candidate(&self.config.publish_dir, &descriptor.slug, ext)? {
                debug!(%ext, file = %existing, "Extra format already present");
                outputs.push(RecipeOutput {
                    file_name: existing.clone(),
                    rename_to: existing,
                    ext: ext.clone(),
                    ..primary.clone()
                });
                continue;
            }

            let file_name = format!("{stem}.{ext}");
            let dest = self.config.publish_path(&file_name);
            match self
                .invoker
                .convert_file(&self.config, descriptor, &primary_path, &dest, ext)
                .await
            {
                Ok(()) => outputs.push(RecipeOutput {
                    file_name: file_name.clone(),
                    rename_to: file_name,
                    ext: ext.clone(),
                    ..primary.clone()
                }),
                Err(e) => warn!(%ext, error = %e, "Format conversion failed; skipping format"),
            }
        }

        Ok(RecipeRun { source, outputs })
    }

    /// Process every recipe in registry order.
    pub async fn process_all(&mut self, summary: &mut BuildSummary) {
        let registry = std::mem::take(&mut self.registry);
        for descriptor in &registry {
            if self.config.is_skipped(&descriptor.recipe) {
                info!(recipe = %descriptor.recipe, "Skipped");
                summary.skipped += 1;
                continue;
            }

            let t0 = Instant::now();
            match self.process_recipe(descriptor).await {
                Ok(run) => {
                    match run.source {
                        Source::Live => {
                            self.run_log.record(&descriptor.recipe, self.now);
                            summary.live += 1;
                        }
                        Source::Cache => summary.cached += 1,
                    }
                    info!(
                        recipe = %descriptor.recipe,
                        source = ?run.source,
                        files = run.outputs.len(),
                        elapsed_secs = t0.elapsed().as_secs(),
                        "Recipe done"
                    );
                    self.outputs.extend(run.outputs);
                }
                Err(e) => {
                    error!(recipe = %descriptor.recipe, error = %e, "Recipe failed; continuing");
                    summary.failed += 1;
                }
            }
        }
        self.registry = registry;
    }

    /// Move artifacts to their dated names.
    pub async fn commit_renames(&mut self) {
        let dir = self.config.publish_dir.clone();
        for output in self.outputs.iter_mut().filter(|o| o.needs_rename()) {
            let from = dir.join(&output.file_name);
            let to = dir.join(&output.rename_to);
            match fs::rename(&from, &to).await {
                Ok(()) => {
                    debug!(from = %output.file_name, to = %output.rename_to, "Renamed");
                    output.file_name = output.rename_to.clone();
                }
                Err(e) => warn!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "Rename failed; publishing under the original name"
                ),
            }
        }
    }

    async fn load_template(&self) -> Result<String, Box<dyn Error>> {
        match &self.config.template {
            Some(path) => Ok(fs::read_to_string(path).await?),
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    /// Write `index.json`, `last_run.json`, `index.html` and `feed.xml`.
    #[instrument(level = "info", skip_all)]
    pub async fn write_outputs(&self) -> Result<PublishIndex, Box<dyn Error>> {
        let publish_dir = &self.config.publish_dir;
        let (index, fragment, listing) = build_index(
            &self.registry,
            &self.outputs,
            &self.config.categories,
            publish_dir,
            self.now.timestamp(),
        );

        json::write_index(&index, publish_dir).await?;
        json::write_run_log(&self.run_log, publish_dir).await?;

        let template = self.load_template().await?;
        let page = html::render_page(&template, &fragment, self.started.elapsed(), self.now);
        write_html(&page, publish_dir).await?;

        if let Err(e) = feed::write_feed(&listing, &self.config.publish_site, self.now, publish_dir).await {
            warn!(error = %e, "Failed to write feed");
        }
        Ok(index)
    }
}

async fn write_html(page: &str, publish_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let path = publish_dir.join(HTML_FILE);
    if let Err(e) = fs::write(&path, page).await {
        error!(path = %path.display(), error = %e, "Failed to write HTML");
        return Err(e.into());
    }
    info!(path = %path.display(), "Wrote HTML");
    Ok(path)
}

/// Run a full build.
pub async fn run(config: BuildConfig) -> Result<BuildSummary, Box<dyn Error>> {
    let mut ctx = BuildContext::prepare(config).await?;
    run_context(&mut ctx).await
}

/// Run the loop and write outputs for an already prepared context.
pub async fn run_context(ctx: &mut BuildContext) -> Result<BuildSummary, Box<dyn Error>> {
    let mut summary = BuildSummary::default();
    ctx.process_all(&mut summary).await;
    ctx.commit_renames().await;
    summary.index = ctx.write_outputs().await?;
    summary.elapsed = ctx.started.elapsed();
    info!(
        live = summary.live,
        cached = summary.cached,
        failed = summary.failed,
        skipped = summary.skipped,
        elapsed = %utils::format_elapsed(summary.elapsed),
        "Build finished"
    );
    Ok(summary)
}
