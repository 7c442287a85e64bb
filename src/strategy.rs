//! Format strategies.
//!
//! One [`ImportStrategy`] per supported appliance image type. The table is
//! compiled in and never changes at runtime; [`resolve`] is a pure lookup.
//!
//! | image type | disk format | preparation | registry properties |
//! |------------|-------------|-------------|---------------------|
//! | `kvm` | `qcow2` | none, the registry copies from the download URL | `hypervisor_type=kvm` |
//! | `xen` | `raw` | download, extract, locate `.raw` | `hypervisor_type=xen`, `vm_mode=xen` |
//! | `vmx` | `vmdk` | download, extract, locate `.vmdk`, convert | `hypervisor_type=vmware`, `vmware_adaptertype=lsiLogic`, `vmware_disktype=preallocated` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Image types with a registered strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Kvm,
    Xen,
    Vmx,
}

impl ImageType {
    pub const ALL: [ImageType; 3] = [ImageType::Kvm, ImageType::Xen, ImageType::Vmx];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Kvm => "kvm",
            ImageType::Xen => "xen",
            ImageType::Vmx => "vmx",
        }
    }

    pub fn strategy(self) -> &'static ImportStrategy {
        match self {
            ImageType::Kvm => &KVM,
            ImageType::Xen => &XEN,
            ImageType::Vmx => &VMX,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A single preparation operation, used for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreparationStep {
    Download,
    Extract,
    Convert,
}

impl fmt::Display for PreparationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreparationStep::Download => "download",
            PreparationStep::Extract => "extract",
            PreparationStep::Convert => "convert",
        })
    }
}

/// Disk conversion applied to an extracted VMware payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskConversion {
    /// Converter disk type; 4 is preallocated ESX-style (monolithic flat).
    pub disk_type: u8,
    /// Appended to the payload stem to name the converted descriptor.
    pub output_suffix: &'static str,
    /// Appended to the converted stem to name its flat data file.
    pub flat_suffix: &'static str,
}

/// How the downloaded build becomes something the registry can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// The registry fetches the download URL itself.
    None,
    /// Download the archive, extract it, use the payload with this extension.
    DownloadExtract { payload_extension: &'static str },
    /// As `DownloadExtract`, then convert the payload.
    DownloadExtractConvert {
        payload_extension: &'static str,
        conversion: DiskConversion,
    },
}

impl Preparation {
    pub fn steps(&self) -> &'static [PreparationStep] {
        match self {
            Preparation::None => &[],
            Preparation::DownloadExtract { .. } => {
                &[PreparationStep::Download, PreparationStep::Extract]
            }
            Preparation::DownloadExtractConvert { .. } => &[
                PreparationStep::Download,
                PreparationStep::Extract,
                PreparationStep::Convert,
            ],
        }
    }

    /// True when preparation stages files in a scratch directory.
    pub fn stages_locally(&self) -> bool {
        !matches!(self, Preparation::None)
    }
}

/// Static per-format import description.
#[derive(Debug, PartialEq, Eq)]
pub struct ImportStrategy {
    pub image_type: ImageType,
    pub disk_format: &'static str,
    pub container_format: &'static str,
    /// Ordered `key=value` metadata passed to the registry.
    pub registry_properties: &'static [(&'static str, &'static str)],
    pub preparation: Preparation,
}

static KVM: ImportStrategy = ImportStrategy {
    image_type: ImageType::Kvm,
    disk_format: "qcow2",
    container_format: "bare",
    registry_properties: &[("hypervisor_type", "kvm")],
    preparation: Preparation::None,
};

static XEN: ImportStrategy = ImportStrategy {
    image_type: ImageType::Xen,
    disk_format: "raw",
    container_format: "bare",
    registry_properties: &[("hypervisor_type", "xen"), ("vm_mode", "xen")],
    preparation: Preparation::DownloadExtract {
        payload_extension: "raw",
    },
};

static VMX: ImportStrategy = ImportStrategy {
    image_type: ImageType::Vmx,
    disk_format: "vmdk",
    container_format: "bare",
    registry_properties: &[
        ("hypervisor_type", "vmware"),
        ("vmware_adaptertype", "lsiLogic"),
        ("vmware_disktype", "preallocated"),
    ],
    preparation: Preparation::DownloadExtractConvert {
        payload_extension: "vmdk",
        conversion: DiskConversion {
            disk_type: 4,
            output_suffix: "-preallocated",
            flat_suffix: "-flat",
        },
    },
};

/// Look up the strategy for an image type identifier.
///
/// Unknown identifiers resolve to `None`; callers treat that as "ignored".
///
/// ```rust
/// use studio_import::resolve;
///
/// assert_eq!(resolve("kvm").unwrap().disk_format, "qcow2");
/// assert!(resolve("oem").is_none());
/// ```
pub fn resolve(image_type: &str) -> Option<&'static ImportStrategy> {
    image_type.parse::<ImageType>().ok().map(ImageType::strategy)
}
