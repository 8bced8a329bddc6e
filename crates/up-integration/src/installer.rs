//! Whole-package installation
//!
//! Package-level problems (bad header, unsupported content or key type, a
//! corrupted item table) abort the install. A failing item is recorded and
//! the next item is tried, so one broken file does not cost the rest of a
//! theme. Cancellation stops the whole install.

use crate::layout::{content_root, route_item, Pipeline};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use up_core::config::{Config, ImageFormat, PartialOutputPolicy};
use up_core::{ExtractContext, Result, UnpackError};
use up_crypto::Key;
use up_loader::{
    copy_item, ContentKind, EbootExtractor, EdatExtractor, PkgContainer, PkgItem, PkgKeys,
};
use up_vfs::{ImageSink, Storage};

/// Per-install settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub image_format: ImageFormat,
    pub partial_output: PartialOutputPolicy,
    /// Delete the package after every item was extracted
    pub remove_source: bool,
}

impl From<&Config> for InstallOptions {
    fn from(config: &Config) -> Self {
        Self {
            image_format: config.output.image_format,
            partial_output: config.extract.partial_output,
            remove_source: config.extract.remove_source,
        }
    }
}

/// An item that could not be extracted
#[derive(Debug)]
pub struct ItemFailure {
    pub name: String,
    pub error: UnpackError,
}

/// Result of installing one package
#[derive(Debug)]
pub struct InstallReport {
    pub content_id: String,
    pub kind: ContentKind,
    /// Written files, relative to the storage root
    pub outputs: Vec<PathBuf>,
    /// Items that are not extracted for this kind of content
    pub skipped: u32,
    pub failures: Vec<ItemFailure>,
    /// Whether the package file was deleted afterwards
    pub source_removed: bool,
}

impl InstallReport {
    /// Every selected item was extracted
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Installs packages onto a storage device
pub struct PkgInstaller<S: Storage> {
    storage: S,
    options: InstallOptions,
}

impl<S: Storage> PkgInstaller<S> {
    pub fn new(storage: S, options: InstallOptions) -> Self {
        Self { storage, options }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Extract every supported item of the package at `pkg_path` on the
    /// install storage itself
    pub fn install(&self, pkg_path: &Path, ctx: &ExtractContext<'_>) -> Result<InstallReport> {
        self.install_from(&self.storage, pkg_path, ctx)
    }

    /// Extract every supported item of the package at `pkg_path` on `source`
    pub fn install_from<P: Storage>(
        &self,
        source: &P,
        pkg_path: &Path,
        ctx: &ExtractContext<'_>,
    ) -> Result<InstallReport> {
        info!("Installing {:?}", pkg_path);

        let size = source.size(pkg_path)?;
        let reader = source.open(pkg_path)?;
        let mut pkg = PkgContainer::open(reader, size)?;

        let metadata = pkg.metadata()?;
        let kind = metadata.kind()?;
        let keys = PkgKeys::for_header(pkg.header())?;
        let header = pkg.header().clone();

        info!(
            "{:?} package {} ({} items)",
            kind, header.content_id, header.item_count
        );

        self.storage.create_dir_all(&content_root(kind, &header)?)?;

        let mut report = InstallReport {
            content_id: header.content_id.clone(),
            kind,
            outputs: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
            source_removed: false,
        };

        for index in 0..header.item_count {
            let item = pkg.decrypt_item(&keys, kind, metadata.items_offset, index)?;
            if !item.is_file() {
                continue;
            }

            let target = match route_item(kind, &header, &item.name, self.options.image_format) {
                Ok(Some(target)) => target,
                Ok(None) => {
                    debug!("skipping {}", item.name);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("{}: {}", item.name, e);
                    report.failures.push(ItemFailure {
                        name: item.name.clone(),
                        error: e,
                    });
                    continue;
                }
            };

            let key = *keys.item_key(kind, item.psp_type);
            let label = target.path.to_string_lossy().into_owned();
            info!("[{}/{}] {} -> {}", index + 1, header.item_count, item.name, label);

            let result = match target.pipeline {
                Pipeline::DiscImage => self.produce(&target.path, |writer| {
                    disc_image(&mut pkg, &key, &item, writer, self.options.image_format, ctx, &label)
                }),
                Pipeline::Edat => self.produce(&target.path, |mut writer| {
                    let mut edat = EdatExtractor::new(&mut pkg, &key, &item);
                    let edat_header = edat.read_header()?;
                    edat.extract(&edat_header, &mut writer, ctx, &label)
                }),
                Pipeline::Copy => self.produce(&target.path, |mut writer| {
                    copy_item(&mut pkg, &key, &item, &mut writer, ctx, &label)
                }),
            };

            match result {
                Ok(bytes) => {
                    debug!("{}: {} bytes", label, bytes);
                    report.outputs.push(target.path);
                }
                Err(UnpackError::Cancelled) => {
                    warn!("installation of {} cancelled", header.content_id);
                    return Err(UnpackError::Cancelled);
                }
                Err(e) => {
                    error!("{}: {}", item.name, e);
                    report.failures.push(ItemFailure {
                        name: item.name.clone(),
                        error: e,
                    });
                }
            }
        }

        drop(pkg);
        ctx.report("", size);

        if self.options.remove_source && report.is_complete() {
            source.remove_file(pkg_path)?;
            report.source_removed = true;
            info!("removed {:?}", pkg_path);
        }

        info!(
            "{}: {} written, {} skipped, {} failed",
            report.content_id,
            report.outputs.len(),
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Create `path`, fill it, and apply the partial-output policy on failure
    fn produce<F>(&self, path: &Path, fill: F) -> Result<u64>
    where
        F: FnOnce(S::Writer) -> Result<u64>,
    {
        let writer = self.storage.create(path)?;
        let result = fill(writer);

        if result.is_err() && self.options.partial_output == PartialOutputPolicy::Remove {
            match self.storage.remove_file(path) {
                Ok(()) => debug!("removed partial output {:?}", path),
                Err(e) => warn!("could not remove partial output {:?}: {}", path, e),
            }
        }
        result
    }
}

/// EBOOT.PBP item to an ISO or CSO image
fn disc_image<R, W>(
    pkg: &mut PkgContainer<R>,
    key: &Key,
    item: &PkgItem,
    writer: W,
    format: ImageFormat,
    ctx: &ExtractContext<'_>,
    label: &str,
) -> Result<u64>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut extractor = EbootExtractor::new(pkg, key, item);
    let psar = extractor.read_psar()?;
    let mut sink = ImageSink::new(writer, format, psar.image_size())?;
    let written = extractor.extract(&psar, &mut sink, ctx, label)?;
    sink.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use up_core::FormatError;
    use up_loader::fixtures::{EdatBuilder, PkgBuilder};
    use up_vfs::LocalStorage;

    fn installer(dir: &TempDir, partial_output: PartialOutputPolicy) -> PkgInstaller<LocalStorage> {
        let options = InstallOptions {
            partial_output,
            ..InstallOptions::default()
        };
        PkgInstaller::new(LocalStorage::new(dir.path()), options)
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.output.image_format = ImageFormat::Cso;
        config.extract.partial_output = PartialOutputPolicy::Keep;
        config.extract.remove_source = true;

        let options = InstallOptions::from(&config);
        assert_eq!(options.image_format, ImageFormat::Cso);
        assert_eq!(options.partial_output, PartialOutputPolicy::Keep);
        assert!(options.remove_source);
    }

    #[test]
    fn test_produce_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir, PartialOutputPolicy::Remove);

        let result = installer.produce(Path::new("out/half.bin"), |mut w| {
            w.write_all(b"half")?;
            Err(FormatError::Corrupted("boom".into()).into())
        });
        assert!(result.is_err());
        assert!(!dir.path().join("out/half.bin").exists());
    }

    #[test]
    fn test_produce_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir, PartialOutputPolicy::Keep);

        let result = installer.produce(Path::new("half.bin"), |mut w| {
            w.write_all(b"half")?;
            w.flush()?;
            Err(FormatError::Corrupted("boom".into()).into())
        });
        assert!(result.is_err());
        assert_eq!(fs::read(dir.path().join("half.bin")).unwrap(), b"half");
    }

    #[test]
    fn test_produce_success() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir, PartialOutputPolicy::Remove);

        let written = installer
            .produce(Path::new("whole.bin"), |mut w| {
                w.write_all(b"whole")?;
                w.flush()?;
                Ok(5)
            })
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(fs::read(dir.path().join("whole.bin")).unwrap(), b"whole");
    }

    #[test]
    fn test_bad_item_does_not_stop_install() {
        let dir = TempDir::new().unwrap();
        let pkg = PkgBuilder::new(9)
            .file("../escape.ptf", EdatBuilder::new(vec![1; 40]).build())
            .file("broken.ptf", vec![0u8; 0x200])
            .file("good.ptf", EdatBuilder::new(vec![2; 40]).build())
            .build();
        fs::write(dir.path().join("theme.pkg"), pkg).unwrap();

        let installer = installer(&dir, PartialOutputPolicy::Remove);
        let report = installer
            .install(Path::new("theme.pkg"), &ExtractContext::silent())
            .unwrap();

        assert_eq!(report.kind, ContentKind::Theme);
        assert_eq!(report.outputs, vec![PathBuf::from("PSP/THEME/good.ptf")]);
        let failed: Vec<_> = report.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, ["../escape.ptf", "broken.ptf"]);
        assert!(!report.is_complete());

        assert!(!dir.path().join("PSP/THEME/broken.ptf").exists());
        assert_eq!(fs::read(dir.path().join("PSP/THEME/good.ptf")).unwrap(), vec![2; 40]);
    }
}
