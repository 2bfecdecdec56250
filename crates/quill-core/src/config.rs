use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::store::RollbackPolicy;
use crate::timeline::MAX_WINDOW_DAYS;

const RC_ENV_VAR: &str = "QUILLRC";
const RC_FILE_NAME: &str =
  ".quillrc";
const DEFAULT_DATA_DIR: &str =
  "~/.quill";
const DEFAULT_CALENDAR_DAYS: i64 = 7;

/// Settings read from `.quillrc` plus command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let map = [
      (
        "data.location",
        DEFAULT_DATA_DIR
      ),
      ("default.command", "list"),
      ("color", "on"),
      ("sync.rollback", "on"),
      ("calendar.days", "7")
    ]
    .into_iter()
    .map(|(k, v)| {
      (k.to_string(), v.to_string())
    })
    .collect();

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)?
    {
      | Some(path) => {
        info!(quillrc = %path.display(), "loading quillrc");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no quillrc found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&str> {
    self
      .map
      .get(key)
      .map(String::as_str)
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn color_enabled(
    &self
  ) -> bool {
    self
      .get_bool("color")
      .unwrap_or(true)
  }

  pub fn default_command(
    &self
  ) -> &str {
    self
      .get("default.command")
      .filter(|cmd| !cmd.trim().is_empty())
      .unwrap_or("list")
  }

  /// `sync.rollback = off` keeps optimistic changes after a failed sync.
  pub fn rollback_policy(
    &self
  ) -> RollbackPolicy {
    match self.get_bool("sync.rollback")
    {
      | Some(false) => {
        RollbackPolicy::Retain
      }
      | _ => RollbackPolicy::Revert
    }
  }

  /// Number of days the `calendar` command shows.
  pub fn calendar_days(
    &self
  ) -> anyhow::Result<i64> {
    let Some(raw) =
      self.get("calendar.days")
    else {
      return Ok(DEFAULT_CALENDAR_DAYS);
    };

    let days: i64 = raw
      .trim()
      .parse()
      .with_context(|| {
        format!(
          "calendar.days must be a \
           number, got '{raw}'"
        )
      })?;
    if !(1..=MAX_WINDOW_DAYS)
      .contains(&days)
    {
      return Err(anyhow!(
        "calendar.days must be \
         between 1 and \
         {MAX_WINDOW_DAYS}, got {days}"
      ));
    }
    Ok(days)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      warn!(file = %path.display(), "config file already loaded; skipping include cycle");
      return Ok(());
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());
    let base_dir = path
      .parent()
      .unwrap_or(Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let entry = RcLine::parse(raw_line)
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match entry {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let target =
            resolve_include_path(
              &base_dir, target
            )?;
          if target.exists() {
            debug!(from = %path.display(), include = %target.display(), "following include");
            self.load_file(&target)?;
          } else {
            warn!(include = %target.display(), "include file does not exist; skipping");
          }
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

/// One line of a quillrc file.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl<'a> RcLine<'a> {
  /// `#` starts a comment anywhere on the line.
  fn parse(
    raw: &'a str
  ) -> anyhow::Result<Self> {
    let line = raw
      .split_once('#')
      .map_or(raw, |(before, _)| before)
      .trim();

    if line.is_empty() {
      return Ok(Self::Blank);
    }
    if let Some(target) =
      line.strip_prefix("include ")
    {
      return Ok(Self::Include(
        target.trim()
      ));
    }

    match line.split_once('=') {
      | Some((key, value))
        if !key.trim().is_empty() =>
      {
        Ok(Self::Setting(
          key.trim(),
          value.trim()
        ))
      }
      | _ => {
        Err(anyhow!(
          "expected `key = value` or \
           `include <file>`, got: {raw}"
        ))
      }
    }
  }
}

/// Where tasks live: `--data`, then `data.location`, then `~/.quill`.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(value)) => {
      expand_tilde(Path::new(value))
    }
    | (None, None) => {
      expand_tilde(Path::new(
        DEFAULT_DATA_DIR
      ))
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null"
      || rc_env.trim().is_empty()
    {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate =
    home.join(RC_FILE_NAME);
  Ok(candidate
    .exists()
    .then_some(candidate))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
