//! HTTP downloads into staging directories.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::archive::{extract_tar_gz, extract_zip};
use crate::error::{AppError, Result};

const USER_AGENT: &str = concat!("gamewarden/", env!("CARGO_PKG_VERSION"));

/// Stream a URL to a file on disk.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let mut file = fs::File::create(dest)
        .map_err(|e| AppError::io(format!("failed to create {}: {}", dest.display(), e)))?;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| AppError::io(format!("failed to write {}: {}", dest.display(), e)))?;
    }

    Ok(())
}

/// File name from the last URL path segment, for staging downloads.
fn file_name_from_url(url: &str) -> String {
    url.split('?')
        .next()
        .and_then(|base| base.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.bin")
        .to_string()
}

/// Fetch a release artifact into `staging_dir`.
///
/// Archives (`.zip`, `.tar.gz`, `.tgz`) are downloaded next to the staging
/// directory, unpacked into it with the usual wrapping directory stripped,
/// and the archive file removed. Anything else is kept verbatim as a raw
/// payload file.
pub async fn fetch_archive(client: &Client, url: &str, staging_dir: &Path) -> Result<()> {
    fs::create_dir_all(staging_dir)
        .map_err(|e| AppError::io(format!("failed to create {}: {}", staging_dir.display(), e)))?;

    let name = file_name_from_url(url);
    let lowered = name.to_ascii_lowercase();
    let is_zip = lowered.ends_with(".zip");
    let is_tar_gz = lowered.ends_with(".tar.gz") || lowered.ends_with(".tgz");

    if !(is_zip || is_tar_gz) {
        return download_file(client, url, &staging_dir.join(name)).await;
    }

    let archive_path = staging_dir
        .parent()
        .unwrap_or(staging_dir)
        .join(format!(".fetch-{}", name));
    download_file(client, url, &archive_path).await?;

    let extracted = if is_zip {
        extract_zip(&archive_path, staging_dir, true)
    } else {
        extract_tar_gz(&archive_path, staging_dir, true)
    };

    if let Err(e) = fs::remove_file(&archive_path) {
        log::warn!("Failed to remove {}: {}", archive_path.display(), e);
    }

    extracted.map_err(|e| AppError::download(format!("failed to extract {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::file_name_from_url;

    #[test]
    fn file_name_extraction() {
        assert_eq!(
            file_name_from_url("https://host/releases/server-1.2.tar.gz"),
            "server-1.2.tar.gz"
        );
        assert_eq!(
            file_name_from_url("https://host/get/latest.zip?token=abc"),
            "latest.zip"
        );
        assert_eq!(file_name_from_url("https://host/"), "download.bin");
    }
}
