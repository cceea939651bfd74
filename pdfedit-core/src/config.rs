use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{DEFAULT_PAGE_CACHE_CAPACITY, DEFAULT_THUMBNAIL_CACHE_CAPACITY};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_THUMBNAIL_DPI: f32 = 24.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub page_cache_capacity: usize,
    pub thumbnail_cache_capacity: usize,
    pub thumbnail_dpi: f32,
    pub fonts: FontConfig,
    pub image_page: ImagePageConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            thumbnail_cache_capacity: DEFAULT_THUMBNAIL_CACHE_CAPACITY,
            thumbnail_dpi: DEFAULT_THUMBNAIL_DPI,
            fonts: FontConfig::default(),
            image_page: ImagePageConfig::default(),
        }
    }
}

impl EditorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.thumbnail_dpi.is_finite() && self.thumbnail_dpi > 0.0) {
            bail!("thumbnail_dpi must be a positive number, got {}", self.thumbnail_dpi);
        }
        self.image_page.validate().context("invalid [image_page] section")
    }

    /// Reads `<config_dir>/config.toml` if it exists, defaults otherwise.
    pub fn load_or_default(dirs: &ProjectDirs) -> Result<Self> {
        let path = dirs.config_dir().join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Application-shipped fonts. Defaults to `<exe_dir>/fonts`.
    pub bundled_dir: Option<PathBuf>,
    /// Replaces the platform font directories when set.
    pub system_dirs: Option<Vec<PathBuf>>,
}

impl FontConfig {
    pub fn bundled_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.bundled_dir {
            return Some(dir.clone());
        }
        let exe = std::env::current_exe().ok()?;
        let dir = exe.parent()?.join("fonts");
        dir.is_dir().then_some(dir)
    }

    pub fn system_dirs(&self) -> Vec<PathBuf> {
        match &self.system_dirs {
            Some(dirs) => dirs.clone(),
            None => default_system_font_dirs(),
        }
    }
}

pub fn default_system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let home = BaseDirs::new().map(|base| base.home_dir().to_path_buf());

    if cfg!(windows) {
        let windir = std::env::var_os("WINDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
        dirs.push(windir.join("Fonts"));
        if let Some(base) = BaseDirs::new() {
            dirs.push(
                base.data_local_dir()
                    .join("Microsoft")
                    .join("Windows")
                    .join("Fonts"),
            );
        }
    } else if cfg!(target_os = "macos") {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Some(home) = &home {
            dirs.push(home.join("Library").join("Fonts"));
        }
    } else {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Some(home) = &home {
            dirs.push(home.join(".local").join("share").join("fonts"));
            dirs.push(home.join(".fonts"));
        }
    }

    dirs
}

/// Page sizing for documents built from a single image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePageConfig {
    pub dpi: f32,
    pub min_points: f32,
    pub max_points: f32,
}

impl Default for ImagePageConfig {
    fn default() -> Self {
        Self {
            dpi: 150.0,
            min_points: 72.0,
            max_points: 14400.0,
        }
    }
}

impl ImagePageConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            bail!("dpi must be a positive number, got {}", self.dpi);
        }
        if !(self.min_points.is_finite() && self.max_points.is_finite()) {
            bail!(
                "page bounds must be finite, got {}..{}",
                self.min_points,
                self.max_points
            );
        }
        if self.min_points > self.max_points {
            bail!(
                "min_points {} exceeds max_points {}",
                self.min_points,
                self.max_points
            );
        }
        Ok(())
    }
}
