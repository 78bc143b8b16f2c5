use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gridrun::adapter::CommandAdapter;
use gridrun::config::{load_config, load_grid, shared_grid_id, Config, GridId};
use gridrun::dispatch::{
    execute_grid_run, execute_run, read_job_ids, BatchDispatcher, BatchTemplate, DispatchReport,
    FailurePolicy, ParallelDispatcher, RunDispatcher, WorkerLauncher,
};
use gridrun::experiment::FileRepository;
use gridrun::grid::GridAggregator;
use gridrun::scheduler::{JobId, JobPoller, SlurmScheduler};
use gridrun::settings::Settings;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridrun", version, about = "Run experiments over parameter grids")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Storage root (overrides gridrun.yaml and GRIDRUN_FILE_ROOT)
    #[arg(short = 'f', long, global = true)]
    file_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one configuration and print the stored run id
    Run {
        adapter: PathBuf,
        config: PathBuf,
        /// Surround the run with the adapter's grid hooks
        #[arg(long, hide = true)]
        grid_hooks: bool,
    },
    /// Run every configuration of a grid on this machine
    GridRun {
        adapter: PathBuf,
        grid: PathBuf,
        /// Worker processes; 1 runs serially in this process
        #[arg(short = 'n', long)]
        workers: Option<usize>,
        /// Keep going after a failed run
        #[arg(long)]
        continue_on_error: bool,
        /// Aggregate the grid to CSV afterwards
        #[arg(short = 'p', long)]
        post_process: bool,
    },
    /// Submit one batch job per configuration of a grid
    GridBatch {
        adapter: PathBuf,
        grid: PathBuf,
        template: PathBuf,
        /// Aggregate the grid to CSV once every job has finished
        #[arg(short = 'p', long)]
        post_process: bool,
        /// Return right after submission
        #[arg(long)]
        no_wait: bool,
    },
    /// Wait for a grid's batch jobs, then aggregate it to a table
    GridToCsv {
        grid_id: String,
        /// Write Parquet instead of CSV
        #[arg(long)]
        parquet: bool,
    },
    /// Print the configurations of a grid as JSON lines
    Expand { grid: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let mut settings = Settings::discover(&cwd)
        .context("invalid settings file")?
        .with_env(|key| std::env::var(key).ok());
    if let Some(root) = cli.file_root {
        settings = settings.with_file_root(root);
    }
    if settings.file_root.is_relative() {
        settings.file_root = cwd.join(&settings.file_root);
    }
    debug!(file_root = %settings.file_root.display(), "storage root");

    let outcome = match cli.command {
        Commands::Run {
            adapter,
            config,
            grid_hooks,
        } => run(&settings, &adapter, &config, grid_hooks),
        Commands::GridRun {
            adapter,
            grid,
            workers,
            continue_on_error,
            post_process,
        } => {
            grid_run(
                &settings,
                &adapter,
                &grid,
                workers,
                continue_on_error,
                post_process,
            )
            .await
        }
        Commands::GridBatch {
            adapter,
            grid,
            template,
            post_process,
            no_wait,
        } => grid_batch(&settings, &adapter, &grid, &template, post_process, no_wait).await,
        Commands::GridToCsv { grid_id, parquet } => {
            grid_to_table(&settings, &GridId::new(grid_id), parquet).await
        }
        Commands::Expand { grid } => expand(&grid),
    };
    if let Err(e) = outcome {
        error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(settings: &Settings, adapter: &Path, config: &Path, grid_hooks: bool) -> Result<()> {
    let adapter = CommandAdapter::load(adapter)
        .with_context(|| format!("cannot load adapter {}", adapter.display()))?;
    let config = load_config(config)?;
    let repo = FileRepository::new(settings.runs_path());
    let run_id = if grid_hooks {
        execute_grid_run(&adapter, &config, &repo)?
    } else {
        execute_run(&adapter, &config, &repo)?
    };
    println!("{run_id}");
    Ok(())
}

/// Expand a grid, tagging it with a fresh grid id unless it names one.
fn grid_configs(path: &Path) -> Result<Vec<Config>> {
    let mut spec = load_grid(path).with_context(|| format!("cannot load grid {}", path.display()))?;
    if !spec.has_grid_id() {
        let label = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let grid_id = GridId::generate(label);
        info!(grid_id = %grid_id, "generated grid id");
        spec.set_grid_id(&grid_id);
    }
    let configs = spec.configs()?;
    info!(configs = configs.len(), "expanded grid");
    Ok(configs)
}

async fn grid_run(
    settings: &Settings,
    adapter_path: &Path,
    grid: &Path,
    workers: Option<usize>,
    continue_on_error: bool,
    post_process: bool,
) -> Result<()> {
    let adapter = CommandAdapter::load(adapter_path)
        .with_context(|| format!("cannot load adapter {}", adapter_path.display()))?;
    let configs = grid_configs(grid)?;
    let grid_id = shared_grid_id(&configs);
    let workers = workers
        .or(settings.workers)
        .map_or(1, |n| settings.clone().with_workers(n).worker_count());

    let report = if workers <= 1 {
        let repo = FileRepository::new(settings.runs_path());
        let policy = if continue_on_error {
            FailurePolicy::ContinueOnError
        } else {
            FailurePolicy::FailFast
        };
        tokio::task::block_in_place(|| {
            RunDispatcher::new(&adapter, &repo)
                .with_policy(policy)
                .run(&configs)
        })?
    } else {
        let manifest = adapter
            .manifest_path()
            .context("adapter was not loaded from a manifest")?;
        let launcher = WorkerLauncher::current_exe(manifest, &settings.file_root)?;
        ParallelDispatcher::new(launcher)
            .with_workers(workers)
            .with_poll_interval(settings.parallel_poll_interval())
            .run(&configs, &settings.temp_configs_path(grid_id.as_ref()))
            .await?
    };
    log_failures(&report);

    if post_process {
        match &grid_id {
            Some(gid) => export(settings, gid, false)?,
            None => warn!("configs do not share a grid id; skipping aggregation"),
        }
    }
    if !report.is_success() {
        bail!("{} of {} runs failed", report.failures.len(), report.finished());
    }
    Ok(())
}

fn log_failures(report: &DispatchReport) {
    for failure in &report.failures {
        warn!(run = failure.index + 1, "{}", failure.message);
    }
    info!(
        completed = report.completed.len(),
        failed = report.failures.len(),
        "grid run finished"
    );
}

async fn grid_batch(
    settings: &Settings,
    adapter_path: &Path,
    grid: &Path,
    template: &Path,
    post_process: bool,
    no_wait: bool,
) -> Result<()> {
    let adapter = CommandAdapter::load(adapter_path)
        .with_context(|| format!("cannot load adapter {}", adapter_path.display()))?;
    let manifest = adapter
        .manifest_path()
        .context("adapter was not loaded from a manifest")?;
    let template = BatchTemplate::load(template)?;
    let configs = grid_configs(grid)?;

    let launcher = WorkerLauncher::current_exe(manifest, &settings.file_root)?;
    let dispatcher = BatchDispatcher::new(SlurmScheduler::new(), template, launcher);
    let submission = dispatcher.submit(&configs, settings).await?;
    if let Some(file) = &submission.job_ids_file {
        info!(jobs = submission.job_ids.len(), file = %file.display(), "saved job ids");
    }

    if no_wait {
        if let Some(gid) = &submission.grid_id {
            info!("not waiting; run `gridrun grid-to-csv {gid}` once the jobs are done");
        }
        if post_process {
            warn!("--no-wait given; skipping aggregation");
        }
        return Ok(());
    }

    wait_for_jobs(settings, dispatcher.scheduler().clone(), &submission.job_ids).await?;

    if post_process {
        match (&submission.grid_id, &submission.job_ids_file) {
            (Some(gid), Some(file)) => {
                export(settings, gid, false)?;
                info!(file = %file.display(), "removing job ids file");
                std::fs::remove_file(file)
                    .with_context(|| format!("cannot remove {}", file.display()))?;
            }
            _ => warn!("configs do not share a grid id; skipping aggregation"),
        }
    }
    Ok(())
}

async fn wait_for_jobs(settings: &Settings, scheduler: SlurmScheduler, jobs: &[JobId]) -> Result<()> {
    let counts = JobPoller::new(scheduler)
        .with_interval(settings.job_poll_interval())
        .with_max_retries(settings.job_query_retries)
        .wait(jobs)
        .await
        .context("cannot query batch job status")?;
    if counts.other_total() > 0 {
        warn!("{} jobs did not complete: {counts}", counts.other_total());
    }
    Ok(())
}

async fn grid_to_table(settings: &Settings, grid_id: &GridId, parquet: bool) -> Result<()> {
    let job_ids_file = settings.job_ids_path(grid_id);
    if job_ids_file.exists() {
        let jobs = read_job_ids(&job_ids_file)?;
        info!(grid_id = %grid_id, jobs = jobs.len(), "batch jobs found for grid");
        wait_for_jobs(settings, SlurmScheduler::new(), &jobs).await?;
        info!(file = %job_ids_file.display(), "removing job ids file");
        std::fs::remove_file(&job_ids_file)
            .with_context(|| format!("cannot remove {}", job_ids_file.display()))?;
    }
    export(settings, grid_id, parquet)
}

fn export(settings: &Settings, grid_id: &GridId, parquet: bool) -> Result<()> {
    let repo = FileRepository::new(settings.runs_path());
    let grid = GridAggregator::new()
        .with_exclude_keys(settings.exclude_keys.iter().cloned())
        .aggregate(&repo, grid_id)
        .with_context(|| format!("cannot aggregate grid {grid_id}"))?;
    let path = if parquet {
        let path = settings.grid_parquet_path(grid_id);
        grid.write_parquet(&path)?;
        path
    } else {
        let path = settings.grid_csv_path(grid_id);
        grid.write_csv(&path)?;
        path
    };
    info!(path = %path.display(), cells = grid.array().filled(), "grid exported");
    Ok(())
}

fn expand(grid: &Path) -> Result<()> {
    let configs = load_grid(grid)
        .with_context(|| format!("cannot load grid {}", grid.display()))?
        .configs()?;
    for config in configs {
        println!("{}", serde_json::Value::Object(config));
    }
    Ok(())
}
