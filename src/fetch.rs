//! Download and cache sample cubes.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::FetchConfig;

/// Check if a file exists and is not empty
fn file_exists_and_not_empty<P: AsRef<Path>>(path: P) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}

/// File name used for `url` in the cache: its last path segment, without
/// query string or fragment.
pub fn cache_file_name(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains(':') {
        bail!("cannot derive a file name from URL '{url}'");
    }
    Ok(name.to_string())
}

/// Where `url` is (or would be) cached.
pub fn cached_path(url: &str, cfg: &FetchConfig) -> Result<PathBuf> {
    Ok(cfg.cache_dir().join(cache_file_name(url)?))
}

/// Download target for `path`: the full file name with `.part` appended.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Return the cached copy of `url`, downloading it first if needed.
///
/// The body is streamed to a `.part` file which is renamed into place only
/// after the whole response has been written.
pub fn fetch_file(url: &str, cfg: &FetchConfig) -> Result<PathBuf> {
    let path = cached_path(url, cfg)?;
    if file_exists_and_not_empty(&path) {
        log::info!("Using cached {}", path.display());
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }

    log::info!("Downloading {url} → {}", path.display());

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .context("building HTTP client")?;

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("requesting {url}"))?;

    if !response.status().is_success() {
        bail!("download failed with status {}", response.status());
    }

    let temp_path = partial_path(&path);
    let result = (|| -> Result<u64> {
        let mut file = BufWriter::new(File::create(&temp_path).context("creating temp file")?);
        let bytes = io::copy(&mut response, &mut file).context("reading response body")?;
        file.flush().context("flushing download")?;
        Ok(bytes)
    })();

    match result {
        Ok(bytes) if bytes > 0 => {
            fs::rename(&temp_path, &path).context("moving download into place")?;
            log::info!("Downloaded {bytes} bytes");
            Ok(path)
        }
        Ok(_) => {
            let _ = fs::remove_file(&temp_path);
            bail!("server returned an empty body for {url}")
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}
