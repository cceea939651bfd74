use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use ureq::{AgentBuilder, Error as UreqError};
use walkdir::WalkDir;
use zip::read::ZipArchive;

const DEFAULT_PDFIUM_VERSION: &str = "7350";
const DEFAULT_BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

const WATCHED_ENV: &[&str] = &[
    "PDFEDIT_PDFIUM_SKIP_DOWNLOAD",
    "PDFEDIT_PDFIUM_ARCHIVE_PATH",
    "PDFEDIT_PDFIUM_VERSION",
    "PDFEDIT_PDFIUM_PLATFORM",
    "PDFEDIT_PDFIUM_BASE_URL",
    "PDFIUM_DYNAMIC_LIB_PATH",
    "PDFIUM_STATIC_LIB_PATH",
];

/// Stages a prebuilt PDFium next to the build output and exports its path as
/// `PDFEDIT_PDFIUM_LIBRARY_PATH`. A failure only produces a warning; the
/// library is then looked up at runtime.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for name in WATCHED_ENV {
        println!("cargo:rerun-if-env-changed={name}");
    }

    if env::var_os("PDFEDIT_PDFIUM_SKIP_DOWNLOAD").is_some()
        || env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        return;
    }

    match stage_pdfium() {
        Ok(path) => println!("cargo:rustc-env=PDFEDIT_PDFIUM_LIBRARY_PATH={}", path.display()),
        Err(err) => println!("cargo:warning=PDFium was not staged ({err:#}); it will be looked up at runtime"),
    }
}

fn stage_pdfium() -> Result<PathBuf> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR is not set")?);
    let staging = out_dir.join("pdfium");
    fs::create_dir_all(&staging).context("failed to create staging directory")?;

    let target_os = env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS is not set")?;
    let target_arch =
        env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH is not set")?;
    let library_name = match target_os.as_str() {
        "windows" => "pdfium.dll",
        "macos" => "libpdfium.dylib",
        _ => "libpdfium.so",
    };

    if let Some(path) = find_file(&staging, library_name) {
        return Ok(path);
    }

    let archive = match env::var_os("PDFEDIT_PDFIUM_ARCHIVE_PATH") {
        Some(path) => PathBuf::from(path),
        None => {
            let platform = env::var("PDFEDIT_PDFIUM_PLATFORM")
                .unwrap_or_else(|_| platform_name(&target_os, &target_arch));
            download(&staging.join("downloads"), &platform)?
        }
    };
    unpack(&archive, &staging)?;

    find_file(&staging, library_name)
        .ok_or_else(|| anyhow!("{library_name} not found in {:?} after unpacking", staging))
}

fn platform_name(target_os: &str, target_arch: &str) -> String {
    let os = match target_os {
        "macos" => "mac",
        other => other,
    };
    let arch = match target_arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == name)
        .map(|e| e.into_path())
}

fn download(cache_dir: &Path, platform: &str) -> Result<PathBuf> {
    let version =
        env::var("PDFEDIT_PDFIUM_VERSION").unwrap_or_else(|_| DEFAULT_PDFIUM_VERSION.to_string());
    let base_url =
        env::var("PDFEDIT_PDFIUM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    fs::create_dir_all(cache_dir).context("failed to create download cache")?;

    let agent = AgentBuilder::new()
        .timeout_read(Duration::from_secs(120))
        .build();
    let mut failures = Vec::new();

    for file_name in [format!("pdfium-{platform}.tgz"), format!("pdfium-{platform}.zip")] {
        let destination = cache_dir.join(&file_name);
        if destination.exists() {
            return Ok(destination);
        }
        let url = format!(
            "{}/chromium/{version}/{file_name}",
            base_url.trim_end_matches('/')
        );
        let response = match agent.get(&url).call() {
            Ok(response) => response,
            Err(UreqError::Status(code, _)) => {
                failures.push(format!("{url}: HTTP {code}"));
                continue;
            }
            Err(err) => {
                failures.push(format!("{url}: {err}"));
                continue;
            }
        };
        let mut file = File::create(&destination)
            .with_context(|| format!("failed to create {:?}", destination))?;
        io::copy(&mut response.into_reader(), &mut file)
            .with_context(|| format!("failed to write {:?}", destination))?;
        return Ok(destination);
    }

    bail!("no PDFium archive for {platform}: {}", failures.join(", "))
}

fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("failed to open {:?}", archive))?;
    let extension = archive
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "tgz" | "gz" => Archive::new(GzDecoder::new(file))
            .unpack(destination)
            .with_context(|| format!("failed to unpack {:?}", archive)),
        "zip" => ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(destination))
            .with_context(|| format!("failed to extract {:?}", archive)),
        other => bail!("unsupported archive format {other:?}"),
    }
}
