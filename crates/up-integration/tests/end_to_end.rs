//! Whole-package installs onto a temporary storage root

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use up_core::config::{ImageFormat, PartialOutputPolicy};
use up_core::{CancelFlag, ExtractContext, FormatError, RangeDecodeError, UnpackError};
use up_integration::{InstallOptions, PkgInstaller};
use up_loader::fixtures::{sample_sectors, EbootBuilder, EdatBuilder, PkgBuilder};
use up_loader::ContentKind;
use up_vfs::{LocalStorage, CISO_HEADER_SIZE, CISO_STORED_FLAG};

const EBOOT: &str = "USRDIR/CONTENT/EBOOT.PBP";
const DOCUMENT: &str = "USRDIR/CONTENT/DOCUMENT.DAT";
const ISO_NAME: &str = "ISO/LOCOROCO00000001 [NPUZ00001].iso";
const CSO_NAME: &str = "ISO/LOCOROCO00000001 [NPUZ00001].cso";

struct Device {
    dir: TempDir,
}

impl Device {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Store a package on the device and return its storage path
    fn add_package(&self, name: &str, bytes: Vec<u8>) -> PathBuf {
        fs::write(self.dir.path().join(name), bytes).unwrap();
        PathBuf::from(name)
    }

    fn installer(&self, options: InstallOptions) -> PkgInstaller<LocalStorage> {
        PkgInstaller::new(LocalStorage::new(self.dir.path()), options)
    }

    fn read(&self, path: &str) -> Vec<u8> {
        fs::read(self.dir.path().join(path)).unwrap()
    }

    fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }
}

/// Sector that deflate cannot shrink
fn noise_sector(mut state: u32) -> Vec<u8> {
    (0..2048)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[test]
fn test_disc_image_to_iso() {
    let device = Device::new();
    let sectors = sample_sectors(4, 7);
    let eboot = EbootBuilder::new(2)
        .raw_block(sectors[..4096].to_vec(), true)
        .stored_block(sectors[4096..].to_vec(), false)
        .build();
    let pkg = PkgBuilder::new(7)
        .directory("USRDIR")
        .file("USRDIR/CONTENT/PSP-KEY.EDAT", vec![9; 64])
        .file(EBOOT, eboot)
        .build();
    let pkg_path = device.add_package("game.pkg", pkg);

    let report = device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();

    assert_eq!(report.kind, ContentKind::DiscImage);
    assert_eq!(report.outputs, vec![PathBuf::from(ISO_NAME)]);
    assert_eq!(report.skipped, 1);
    assert!(report.is_complete());
    assert!(!report.source_removed);
    assert_eq!(device.read(ISO_NAME), sectors);
    assert!(device.exists("game.pkg"));
}

#[test]
fn test_disc_image_with_ps3_item_key() {
    let device = Device::new();
    let sectors = sample_sectors(1, 2);
    let eboot = EbootBuilder::new(1).raw_block(sectors.clone(), true).build();
    let pkg = PkgBuilder::new(0xE).item(EBOOT, eboot, 0x00, 0).build();
    let pkg_path = device.add_package("game.pkg", pkg);

    device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();
    assert_eq!(device.read(ISO_NAME), sectors);
}

#[test]
fn test_disc_image_to_cso() {
    let device = Device::new();
    let zero = vec![0u8; 2048];
    let noise = noise_sector(0x1234_5678);
    let eboot = EbootBuilder::new(1)
        .raw_block(zero.clone(), false)
        .raw_block(noise.clone(), true)
        .build();
    let pkg = PkgBuilder::new(7).file(EBOOT, eboot).build();
    let pkg_path = device.add_package("game.pkg", pkg);

    let options = InstallOptions {
        image_format: ImageFormat::Cso,
        ..InstallOptions::default()
    };
    let report = device
        .installer(options)
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();
    assert_eq!(report.outputs, vec![PathBuf::from(CSO_NAME)]);
    assert!(!device.exists(ISO_NAME));

    let cso = device.read(CSO_NAME);
    assert_eq!(&cso[0..4], b"CISO");
    assert_eq!(u64::from_le_bytes(cso[8..16].try_into().unwrap()), 2 * 2048);

    let table = CISO_HEADER_SIZE as usize;
    let first = le32(&cso, table);
    let second = le32(&cso, table + 4);
    let end = le32(&cso, table + 8);

    assert_eq!(first & CISO_STORED_FLAG, 0);
    assert_ne!(second & CISO_STORED_FLAG, 0);
    assert_eq!(end as usize, cso.len());

    let stored = (second & !CISO_STORED_FLAG) as usize;
    assert_eq!(&cso[stored..stored + 2048], &noise[..]);
    assert!(stored - (first as usize) < 2048);
}

#[test]
fn test_corrupt_block_removes_partial_image() {
    let device = Device::new();
    let eboot = EbootBuilder::new(1)
        .raw_block(sample_sectors(1, 1), true)
        .compressed_block(vec![0x05, 0x00], false)
        .build();
    let pkg_path = device.add_package("game.pkg", PkgBuilder::new(7).file(EBOOT, eboot).build());

    let options = InstallOptions {
        remove_source: true,
        ..InstallOptions::default()
    };
    let report = device
        .installer(options)
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();

    assert!(report.outputs.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, EBOOT);
    assert!(matches!(
        report.failures[0].error,
        UnpackError::RangeDecode(RangeDecodeError::TruncatedInput { .. })
    ));
    assert!(!device.exists(ISO_NAME));

    // An incomplete install never deletes the package
    assert!(!report.source_removed);
    assert!(device.exists("game.pkg"));
}

#[test]
fn test_corrupt_block_keeps_partial_image() {
    let device = Device::new();
    let first = sample_sectors(1, 1);
    let eboot = EbootBuilder::new(1)
        .raw_block(first.clone(), true)
        .compressed_block(vec![0x05, 0x00], false)
        .build();
    let pkg_path = device.add_package("game.pkg", PkgBuilder::new(7).file(EBOOT, eboot).build());

    let options = InstallOptions {
        partial_output: PartialOutputPolicy::Keep,
        ..InstallOptions::default()
    };
    let report = device
        .installer(options)
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(device.read(ISO_NAME), first);
}

#[test]
fn test_cancellation_aborts_install() {
    let device = Device::new();
    let eboot = EbootBuilder::new(1)
        .raw_block(sample_sectors(1, 4), true)
        .build();
    let pkg_path = device.add_package("game.pkg", PkgBuilder::new(7).file(EBOOT, eboot).build());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let progress = |_: &str, _: u64| {};
    let ctx = ExtractContext::new(&progress, &cancel);

    let result = device.installer(InstallOptions::default()).install(&pkg_path, &ctx);
    assert!(matches!(result, Err(UnpackError::Cancelled)));
    assert!(!device.exists(ISO_NAME));
    assert!(device.exists("game.pkg"));
}

#[test]
fn test_theme_install_and_progress() {
    let device = Device::new();
    let blue: Vec<u8> = (0..3000u32).map(|i| (i % 199) as u8).collect();
    let red = vec![0xEE; 17];
    let pkg = PkgBuilder::new(9)
        .file("blue.ptf", EdatBuilder::new(blue.clone()).build())
        .file("red.ptf", EdatBuilder::new(red.clone()).build())
        .build();
    let pkg_size = pkg.len() as u64;
    let pkg_path = device.add_package("theme.pkg", pkg);

    let reports = RefCell::new(Vec::new());
    let progress = |label: &str, offset: u64| reports.borrow_mut().push((label.to_string(), offset));
    let cancel = CancelFlag::new();
    let ctx = ExtractContext::new(&progress, &cancel);

    let report = device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ctx)
        .unwrap();

    assert_eq!(report.kind, ContentKind::Theme);
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(device.read("PSP/THEME/blue.ptf"), blue);
    assert_eq!(device.read("PSP/THEME/red.ptf"), red);

    let reports = reports.into_inner();
    assert!(reports.iter().any(|(label, _)| label.ends_with("blue.ptf")));
    assert!(reports.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(reports.last().map(|r| r.1), Some(pkg_size));
}

#[test]
fn test_psx_install_and_remove_source() {
    let device = Device::new();
    let document = vec![0x44; 100];
    let eboot = vec![0x50; 5000];
    let pkg = PkgBuilder::new(6)
        .directory("USRDIR/CONTENT")
        .file(DOCUMENT, document.clone())
        .item(EBOOT, eboot.clone(), 0x00, 0)
        .file("USRDIR/CONTENT/CONFIG.BIN", vec![1; 16])
        .build();

    // The package does not have to live on the storage device
    let downloads = TempDir::new().unwrap();
    let pkg_path = downloads.path().join("psx.pkg");
    fs::write(&pkg_path, pkg).unwrap();
    assert!(!device.exists("psx.pkg"));

    let options = InstallOptions {
        remove_source: true,
        ..InstallOptions::default()
    };
    let report = device
        .installer(options)
        .install_from(&LocalStorage::new(downloads.path()), Path::new("psx.pkg"), &ExtractContext::silent())
        .unwrap();

    assert_eq!(report.kind, ContentKind::Psx);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        report.outputs,
        vec![
            PathBuf::from("PSP/GAME/NPUZ00001/DOCUMENT.DAT"),
            PathBuf::from("PSP/GAME/NPUZ00001/EBOOT.PBP"),
        ]
    );
    assert_eq!(device.read("PSP/GAME/NPUZ00001/DOCUMENT.DAT"), document);
    assert_eq!(device.read("PSP/GAME/NPUZ00001/EBOOT.PBP"), eboot);

    assert!(report.source_removed);
    assert!(!pkg_path.exists());
}

#[test]
fn test_unsupported_content_type() {
    let device = Device::new();
    let pkg_path = device.add_package("ps3.pkg", PkgBuilder::new(0x15).file("x", vec![0; 16]).build());

    let result = device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ExtractContext::silent());
    assert!(matches!(
        result,
        Err(UnpackError::Format(FormatError::UnsupportedContentType(0x15)))
    ));
    assert!(!device.exists("ISO"));
    assert!(!device.exists("PSP"));
}

#[test]
fn test_missing_package() {
    let device = Device::new();
    let result = device
        .installer(InstallOptions::default())
        .install(Path::new("nowhere.pkg"), &ExtractContext::silent());
    assert!(matches!(result, Err(UnpackError::Io(_))));
}

fn patched(mut pkg: Vec<u8>, offset: usize, field: &[u8]) -> Vec<u8> {
    pkg[offset..offset + field.len()].copy_from_slice(field);
    pkg
}

/// Every file below `dir`, relative to it
fn files_below(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path.strip_prefix(dir).unwrap().to_path_buf());
            }
        }
    }
    found
}

#[test]
fn test_hostile_title_id_writes_nothing() {
    // The device is one level down so an escape would land in `parent`
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("ux0");
    fs::create_dir(&root).unwrap();

    let pkg = PkgBuilder::new(6)
        .file(DOCUMENT, vec![0x44; 100])
        .file(EBOOT, vec![0x50; 100])
        .build();
    fs::write(root.join("psx.pkg"), patched(pkg, 0x37, b"../../../")).unwrap();

    let installer = PkgInstaller::new(LocalStorage::new(&root), InstallOptions::default());
    let result = installer.install(Path::new("psx.pkg"), &ExtractContext::silent());

    assert!(matches!(
        result,
        Err(UnpackError::Format(FormatError::Corrupted(_)))
    ));
    assert_eq!(files_below(parent.path()), vec![PathBuf::from("ux0/psx.pkg")]);
}

#[test]
fn test_hostile_label_writes_nothing() {
    let device = Device::new();
    let eboot = EbootBuilder::new(1).raw_block(sample_sectors(1, 5), true).build();
    let pkg = PkgBuilder::new(7).file(EBOOT, eboot).build();
    let pkg_path = device.add_package("game.pkg", patched(pkg, 0x44, b"/../../../../evl"));

    let report = device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();

    assert!(report.outputs.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        UnpackError::Format(FormatError::Corrupted(_))
    ));
    assert!(!Path::new("/evl [NPUZ00001].iso").exists());
    assert_eq!(files_below(device.dir.path()), vec![PathBuf::from("game.pkg")]);
}

#[test]
fn test_hostile_theme_name_writes_nothing() {
    let device = Device::new();
    let pkg = PkgBuilder::new(9)
        .file("../../escape.ptf", EdatBuilder::new(vec![3; 40]).build())
        .build();
    let pkg_path = device.add_package("theme.pkg", pkg);

    let report = device
        .installer(InstallOptions::default())
        .install(&pkg_path, &ExtractContext::silent())
        .unwrap();

    assert!(report.outputs.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "../../escape.ptf");
    assert_eq!(files_below(device.dir.path()), vec![PathBuf::from("theme.pkg")]);
}

#[test]
fn test_absolute_package_path_rejected() {
    let device = Device::new();
    let pkg = PkgBuilder::new(6).file(DOCUMENT, vec![1; 16]).build();
    let absolute = device.dir.path().join("psx.pkg");
    fs::write(&absolute, pkg).unwrap();

    let result = device
        .installer(InstallOptions::default())
        .install(&absolute, &ExtractContext::silent());
    assert!(matches!(result, Err(UnpackError::Io(_))));
}
