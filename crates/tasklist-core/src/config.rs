use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

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

use crate::list::DEFAULT_TABLE;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in defaults only; no rc file
  /// is read.
  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    cfg.map.insert(
      "store.backend".to_string(),
      "postgres".to_string()
    );
    cfg.map.insert(
      "store.table".to_string(),
      DEFAULT_TABLE.to_string()
    );
    cfg.map.insert(
      "color".to_string(),
      "on".to_string()
    );
    cfg
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading tasklistrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no tasklistrc found; using \
         defaults"
      );
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
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<T>().map_err(
          |err| {
            anyhow!(
              "invalid value for \
               {key}: {raw} ({err})"
            )
          }
        )
      })
      .transpose()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
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
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      // Connection strings may carry a
      // '#' inside a password, so only a
      // '#' preceded by whitespace starts
      // a trailing comment.
      if let Some(idx) = line.find(" #")
      {
        line = line[..idx].trim();
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Backend {
  Postgres,
  Memory
}

impl FromStr for Backend {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "postgres" | "postgresql"
      | "pg" => Ok(Backend::Postgres),
      | "memory" | "mem" => {
        Ok(Backend::Memory)
      }
      | other => Err(anyhow!(
        "unknown store backend: {other}"
      ))
    }
  }
}

/// Connection settings for the remote
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
  pub backend:         Backend,
  pub url:             Option<String>,
  pub table:           String,
  pub pool_size:       u32,
  pub connect_timeout: Duration
}

impl StoreSettings {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let backend = cfg
      .get_parsed::<Backend>(
        "store.backend"
      )?
      .unwrap_or(Backend::Postgres);

    let url = cfg
      .get("store.url")
      .filter(|url| !url.is_empty())
      .or_else(|| {
        std::env::var("DATABASE_URL")
          .ok()
      });

    let table = cfg
      .get("store.table")
      .unwrap_or_else(|| {
        DEFAULT_TABLE.to_string()
      });

    let pool_size = cfg
      .get_parsed::<u32>(
        "store.pool_size"
      )?
      .unwrap_or(4);
    let connect_timeout =
      Duration::from_secs(
        cfg
          .get_parsed::<u64>(
            "store.connect_timeout"
          )?
          .unwrap_or(10)
      );

    if backend == Backend::Postgres
      && url.is_none()
    {
      return Err(anyhow!(
        "store.url is not set (and \
         DATABASE_URL is empty); set \
         it in ~/.tasklistrc or pass \
         --rc store.url=..."
      ));
    }

    Ok(Self {
      backend,
      url,
      table,
      pool_size,
      connect_timeout
    })
  }
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
    std::env::var("TASKLISTRC")
  {
    if rc_env == "/dev/null" {
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
    home.join(".tasklistrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
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

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use super::{
    Backend,
    Config,
    StoreSettings
  };

  #[test]
  fn rc_file_includes_and_comments()
  {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "policy.toggle = optimistic\n"
    )
    .expect("write include");

    let main = dir.path().join("main.rc");
    fs::write(
      &main,
      "# connection\n\
       store.url = postgres://u:p#w@db/app\n\
       store.table = chores  # custom\n\
       store.pool_size=2\n\
       include extra.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&main))
      .expect("load config");
    assert_eq!(
      cfg.get("store.url").as_deref(),
      Some("postgres://u:p#w@db/app")
    );
    assert_eq!(
      cfg.get("store.table").as_deref(),
      Some("chores")
    );
    assert_eq!(
      cfg
        .get("policy.toggle")
        .as_deref(),
      Some("optimistic")
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    let settings =
      StoreSettings::from_config(&cfg)
        .expect("settings");
    assert_eq!(
      settings.backend,
      Backend::Postgres
    );
    assert_eq!(settings.pool_size, 2);
    assert_eq!(
      settings.connect_timeout,
      Duration::from_secs(10)
    );
  }

  #[test]
  fn malformed_line_is_an_error() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let main = dir.path().join("bad.rc");
    fs::write(&main, "just words\n")
      .expect("write rc");

    let err = Config::load(Some(&main))
      .expect_err("no '=' on the line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_rc_prefix_and_win()
  {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![
      (
        "rc.store.backend".to_string(),
        "memory".to_string()
      ),
      (
        "store.pool_size".to_string(),
        "many".to_string()
      ),
    ]);

    assert_eq!(
      cfg
        .get_parsed::<Backend>(
          "store.backend"
        )
        .expect("parse"),
      Some(Backend::Memory)
    );
    assert!(
      StoreSettings::from_config(&cfg)
        .is_err()
    );
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("on")
    );
  }
}
