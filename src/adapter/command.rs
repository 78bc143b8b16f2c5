//! Adapters implemented by external programs
//!
//! A manifest names the program to run for each configuration. The child
//! receives the configuration as JSON on stdin and reports back through
//! JSON lines on stdout:
//!
//! ```text
//! {"event": "scalar", "name": "loss", "value": 0.25, "step": 3}
//! {"event": "artifact", "path": "model.bin", "name": "weights"}
//! {"event": "result", "value": {"accuracy": 0.9}}
//! ```
//!
//! Any other stdout line is captured output. A non-zero exit status fails
//! the run with the tail of stderr.

use super::{Adapter, RunContext, DEFAULT_EXPERIMENT_NAME};
use crate::config::{load_value, Config};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, warn};

const STDERR_TAIL_BYTES: usize = 4096;

/// Description of a command-based adapter, loaded from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterManifest {
    /// Experiment name recorded on each run.
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    /// Program and arguments executed once per configuration.
    pub command: Vec<String>,
    /// Program executed before each grid run.
    #[serde(default)]
    pub pre_grid_hook: Option<Vec<String>>,
    /// Program executed after each grid run.
    #[serde(default)]
    pub post_grid_hook: Option<Vec<String>>,
    /// Extra environment for every child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_experiment_name() -> String {
    DEFAULT_EXPERIMENT_NAME.to_string()
}

impl AdapterManifest {
    /// Load a manifest from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, does not describe a
    /// manifest, or has an empty `command`.
    pub fn load(path: &Path) -> Result<Self> {
        let manifest: Self = serde_json::from_value(load_value(path)?).map_err(|e| {
            Error::Configuration(format!("adapter manifest {}: {e}", path.display()))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let argvs = std::iter::once(Some(&self.command))
            .chain([self.pre_grid_hook.as_ref(), self.post_grid_hook.as_ref()])
            .flatten();
        for argv in argvs {
            if argv.first().map_or(true, String::is_empty) {
                return Err(Error::Configuration(format!(
                    "adapter {}: command must name a program",
                    self.experiment_name
                )));
            }
        }
        Ok(())
    }
}

/// One structured line emitted by an adapter program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// Log a scalar metric value.
    Scalar {
        /// Metric name.
        name: String,
        /// Metric value.
        value: f64,
        /// Explicit step; auto-increments when absent.
        #[serde(default)]
        step: Option<u64>,
    },
    /// Attach a file produced by the run.
    Artifact {
        /// File path, relative paths resolve against the base directory.
        path: PathBuf,
        /// Name to store the file under; defaults to its file name.
        #[serde(default)]
        name: Option<String>,
    },
    /// Return value of the run.
    Result {
        /// Arbitrary JSON result.
        value: Value,
    },
}

impl AdapterEvent {
    /// Parse a stdout line; `None` for anything that is not an event.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// Adapter running an external program per configuration.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    manifest: AdapterManifest,
    base_dir: PathBuf,
    manifest_path: Option<PathBuf>,
}

impl CommandAdapter {
    /// Build from a manifest; relative paths resolve against `base_dir`,
    /// which is also the child's working directory.
    #[must_use]
    pub fn new(manifest: AdapterManifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            base_dir: base_dir.into(),
            manifest_path: None,
        }
    }

    /// Load a manifest file, using its directory as the base directory.
    ///
    /// # Errors
    ///
    /// Returns error if the manifest cannot be loaded.
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let manifest_path = if manifest_path.is_absolute() {
            manifest_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(manifest_path)
        };
        let manifest = AdapterManifest::load(&manifest_path)?;
        let base_dir = manifest_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self {
            manifest,
            base_dir,
            manifest_path: Some(manifest_path),
        })
    }

    /// The manifest this adapter was built from.
    #[must_use]
    pub const fn manifest(&self) -> &AdapterManifest {
        &self.manifest
    }

    /// Absolute path of the manifest file, when loaded from disk.
    #[must_use]
    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    /// Directory relative paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn program(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        // bare names are looked up on PATH
        if path.components().count() > 1 {
            self.resolve(path)
        } else {
            path.to_path_buf()
        }
    }

    fn apply(&self, event: AdapterEvent, ctx: &mut RunContext, result: &mut Option<Value>) -> Result<()> {
        match event {
            AdapterEvent::Scalar { name, value, step } => ctx.log_scalar(&name, value, step),
            AdapterEvent::Artifact { path, name } => {
                let path = self.resolve(&path);
                let name = name.unwrap_or_else(|| {
                    path.file_name()
                        .map_or_else(|| "artifact".to_string(), |n| n.to_string_lossy().into_owned())
                });
                ctx.add_artifact(&path, name)?;
            }
            AdapterEvent::Result { value } => *result = Some(value),
        }
        Ok(())
    }

    /// Run `argv` with `config` on stdin. Events are applied to `ctx` when
    /// given; otherwise stdout is only logged.
    fn spawn(
        &self,
        argv: &[String],
        config: &Config,
        mut ctx: Option<&mut RunContext>,
    ) -> Result<Option<Value>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::adapter(config, "empty command"))?;

        let mut child = Command::new(self.program(program))
            .args(args)
            .current_dir(&self.base_dir)
            .envs(&self.manifest.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::adapter(config, format!("failed to start {program}: {e}")))?;
        debug!(program = %program, pid = child.id(), "adapter process started");

        let payload = serde_json::to_vec(config)?;
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&payload) {
                    // the child may exit without reading its input
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok(())
        });
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut buf) {
                    debug!(error = %e, "adapter stderr closed early");
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut result = None;
        let mut event_error = None;
        let mut read_error = None;
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                }
                // output is not required to be UTF-8
                let text = String::from_utf8_lossy(&buf);
                let line = text.strip_suffix('\n').unwrap_or(&*text);
                let line = line.strip_suffix('\r').unwrap_or(line);
                match (AdapterEvent::parse(line), ctx.as_deref_mut()) {
                    (Some(event), Some(ctx)) => {
                        if let Err(e) = self.apply(event, ctx, &mut result) {
                            event_error.get_or_insert(e);
                        }
                    }
                    (None, Some(ctx)) => ctx.capture(line),
                    (_, None) => debug!(program = %program, "{line}"),
                }
            }
        }
        if read_error.is_some() {
            // nobody drains stdout anymore
            if let Err(e) = child.kill() {
                debug!(program = %program, error = %e, "adapter already exited");
            }
        }

        let status = child.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();
        if let Ok(Err(e)) = writer.join() {
            warn!(program = %program, error = %e, "failed to write config to adapter stdin");
        }

        if let Some(e) = read_error {
            return Err(Error::adapter(
                config,
                format!("cannot read output of {program}: {e}"),
            ));
        }
        if !status.success() {
            return Err(Error::adapter(
                config,
                format!("{program} exited with {status}: {}", tail(&stderr).trim()),
            ));
        }
        if let Some(e) = event_error {
            return Err(Error::adapter(config, e.to_string()));
        }
        Ok(result)
    }
}

fn tail(text: &str) -> &str {
    if text.len() <= STDERR_TAIL_BYTES {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl Adapter for CommandAdapter {
    fn experiment_name(&self) -> &str {
        &self.manifest.experiment_name
    }

    fn run(&self, config: &Config, ctx: &mut RunContext) -> Result<Option<Value>> {
        self.spawn(&self.manifest.command, config, Some(ctx))
    }

    fn pre_grid_hook(&self, config: &Config) -> Result<()> {
        match &self.manifest.pre_grid_hook {
            Some(argv) => self.spawn(argv, config, None).map(drop),
            None => Ok(()),
        }
    }

    fn post_grid_hook(&self, config: &Config) -> Result<()> {
        match &self.manifest.post_grid_hook {
            Some(argv) => self.spawn(argv, config, None).map(drop),
            None => Ok(()),
        }
    }
}
