//! Downloading and unpacking a bundled JRE.
//!
//! Primary source is the Adoptium API; when it is unreachable, a pinned
//! set of Temurin GitHub release URLs covers the majors Minecraft needs.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use ember_core::constants::ARCH_NAME;
use ember_core::download::{self, FetchOptions};
use ember_core::{err, file_utils, info, pt, GenericProgress, IntoIoError, IoError, LAUNCHER_DIR};

use crate::{compression, find, JavaError, JavaInstall, JAVA};

/// OS name as the Adoptium API and Temurin file names spell it.
const ADOPTIUM_OS: &str = if cfg!(target_os = "windows") {
    "windows"
} else if cfg!(target_os = "macos") {
    "mac"
} else {
    "linux"
};

const ARCHIVE_EXT: &str = if cfg!(target_os = "windows") {
    "zip"
} else {
    "tar.gz"
};

#[derive(Deserialize)]
struct AdoptiumAsset {
    binary: AdoptiumBinary,
}

#[derive(Deserialize)]
struct AdoptiumBinary {
    package: AdoptiumPackage,
}

#[derive(Deserialize)]
struct AdoptiumPackage {
    link: String,
    name: String,
    /// SHA-256 of the archive.
    checksum: Option<String>,
    size: Option<u64>,
}

struct JreSource {
    url: String,
    file_name: String,
    sha256: Option<String>,
    size: Option<u64>,
}

async fn adoptium_source(major: u32) -> Result<JreSource, JavaError> {
    let url = format!(
        "https://api.adoptium.net/v3/assets/latest/{major}/hotspot?os={ADOPTIUM_OS}&architecture={ARCH_NAME}&image_type=jre"
    );
    let assets: Vec<AdoptiumAsset> = file_utils::download_file_to_json(&url, true).await?;
    let asset = assets
        .into_iter()
        .next()
        .ok_or(JavaError::JavaUnavailable { required: major })?;
    Ok(JreSource {
        url: asset.binary.package.link,
        file_name: asset.binary.package.name,
        sha256: asset.binary.package.checksum,
        size: asset.binary.package.size,
    })
}

/// Pinned Temurin releases, used when the Adoptium API is down.
fn github_fallback_source(major: u32) -> Option<JreSource> {
    let (repo, tag, file_version) = match major {
        8 => ("temurin8-binaries", "jdk8u412-b08", "8u412b08"),
        17 => ("temurin17-binaries", "jdk-17.0.11%2B9", "17.0.11_9"),
        21 => ("temurin21-binaries", "jdk-21.0.3%2B9", "21.0.3_9"),
        _ => return None,
    };
    let file_name = format!(
        "OpenJDK{major}U-jre_{ARCH_NAME}_{ADOPTIUM_OS}_hotspot_{file_version}.{ARCHIVE_EXT}"
    );
    Some(JreSource {
        url: format!(
            "https://github.com/adoptium/{repo}/releases/download/{tag}/{file_name}"
        ),
        file_name,
        sha256: None,
        size: None,
    })
}

async fn sha256_file(path: &Path) -> Result<String, IoError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<String, IoError> {
        let mut file = std::fs::File::open(&owned).path(&owned)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).path(&owned)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await;
    match result {
        Ok(hash) => hash,
        Err(error) => Err(IoError::Io {
            error: error.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

async fn find_java_bin(java_dir: &Path) -> Result<PathBuf, JavaError> {
    let names = [
        format!("bin/{JAVA}"),
        "bin/java".to_owned(),
        format!("Contents/Home/bin/{JAVA}"),
        "Contents/Home/bin/java".to_owned(),
        "jre.bundle/Contents/Home/bin/java".to_owned(),
    ];
    for name in names {
        let path = java_dir.join(&name);
        if file_utils::exists(&path).await {
            return Ok(path);
        }
        let with_exe = java_dir.join(format!("{name}.exe"));
        if file_utils::exists(&with_exe).await {
            return Ok(with_exe);
        }
    }
    Err(JavaError::NoJavaBinFound(java_dir.to_path_buf()))
}

fn send_progress(sender: Option<&Sender<GenericProgress>>, progress: GenericProgress) {
    if let Some(sender) = sender {
        _ = sender.send(progress);
    }
}

/// Downloads and unpacks a JRE for `major` under
/// `java_installs/<major>/`, returning the validated binary.
pub async fn install_jre(
    major: u32,
    progress: Option<&Sender<GenericProgress>>,
) -> Result<JavaInstall, JavaError> {
    let installs_dir = LAUNCHER_DIR.join("java_installs");
    let install_dir = installs_dir.join(major.to_string());
    // Sibling of the install dir, so the extracted tree stays pristine.
    let lock_file = installs_dir.join(format!("{major}.install.lock"));

    // A finished install has no lock file; reuse it.
    if file_utils::exists(&install_dir).await && !file_utils::exists(&lock_file).await {
        if let Ok(bin) = find_java_bin(&install_dir).await {
            if let Some(found_major) = find::probe_java(&bin).await {
                return Ok(JavaInstall {
                    path: bin,
                    major_version: found_major,
                });
            }
        }
        // Present but broken; rebuild from scratch.
        err!("Existing Java {major} install is broken, reinstalling");
        tokio::fs::remove_dir_all(&install_dir)
            .await
            .path(&install_dir)?;
    } else if file_utils::exists(&lock_file).await {
        pt!("Found half-finished Java {major} install, restarting it");
        tokio::fs::remove_dir_all(&install_dir)
            .await
            .path(&install_dir)?;
    }

    info!("Installing Java {major}");
    tokio::fs::create_dir_all(&install_dir)
        .await
        .path(&install_dir)?;
    tokio::fs::write(&lock_file, "If you see this, Java hasn't finished installing.")
        .await
        .path(&lock_file)?;

    send_progress(
        progress,
        GenericProgress {
            done: 0,
            total: 3,
            message: Some(format!("Resolving JRE {major} download")),
            has_finished: false,
        },
    );

    let source = match adoptium_source(major).await {
        Ok(source) => source,
        Err(error) => {
            err!("Adoptium API unreachable ({error}), using pinned release");
            github_fallback_source(major)
                .ok_or(JavaError::JavaUnavailable { required: major })?
        }
    };

    send_progress(
        progress,
        GenericProgress {
            done: 1,
            total: 3,
            message: Some(format!("Downloading {}", source.file_name)),
            has_finished: false,
        },
    );

    let archive = installs_dir.join(&source.file_name);
    let mut options = FetchOptions::default().large_file();
    if let Some(size) = source.size {
        options = options.size(size);
    }
    download::fetch(&source.url, &archive, options).await?;

    if let Some(expected) = &source.sha256 {
        let got = sha256_file(&archive).await?;
        if !got.eq_ignore_ascii_case(expected) {
            _ = tokio::fs::remove_file(&archive).await;
            return Err(JavaError::ChecksumMismatch);
        }
    }

    send_progress(
        progress,
        GenericProgress {
            done: 2,
            total: 3,
            message: Some("Extracting JRE".to_owned()),
            has_finished: false,
        },
    );

    if source.file_name.ends_with(".zip") {
        compression::extract_zip(&archive, &install_dir).await?;
    } else {
        compression::extract_tar_gz(&archive, &install_dir).await?;
    }
    tokio::fs::remove_file(&archive).await.path(&archive)?;
    compression::strip_top_level(&install_dir).await?;

    let bin = find_java_bin(&install_dir).await?;
    #[cfg(target_family = "unix")]
    file_utils::set_executable(&bin).await?;

    let found_major = find::probe_java(&bin)
        .await
        .ok_or_else(|| JavaError::NoJavaBinFound(install_dir.clone()))?;

    tokio::fs::remove_file(&lock_file).await.path(&lock_file)?;

    send_progress(progress, GenericProgress::finished());
    info!("Finished installing Java {major}");

    Ok(JavaInstall {
        path: bin,
        major_version: found_major,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_urls_exist_for_needed_majors() {
        for major in [8, 17, 21] {
            let source = github_fallback_source(major).unwrap();
            assert!(source.url.contains(&format!("OpenJDK{major}U-jre")));
            assert!(source.url.contains(ADOPTIUM_OS));
            assert!(source.file_name.ends_with(ARCHIVE_EXT));
        }
        assert!(github_fallback_source(11).is_none());
    }
}
