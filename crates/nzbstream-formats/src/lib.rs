//! Container formats for segmented Usenet releases
//!
//! Parsers here never see a network: the RAR and 7z scanners are sans-IO
//! state machines that announce the byte ranges they need next through
//! [`ReadRequest`] and are fed those bytes by the caller.
//!
//! ```rust
//! use nzbstream_formats::names::{FileKind, classify_name, rar_volume_name};
//!
//! assert_eq!(classify_name("release.part02.rar"), FileKind::RarVolume);
//! let volume = rar_volume_name("release.r00").unwrap();
//! assert_eq!(volume.part_number, 2);
//! ```

pub mod error;
pub mod magic;
pub mod names;
pub mod rar;
pub mod request;
pub mod sevenzip;

pub use error::{FormatError, FormatResult};
pub use magic::{Signature, sniff};
pub use names::FileKind;
pub use rar::{RarEntry, RarVersion, RarVolumeHeaders, RarVolumeScanner, resolve_part_order};
pub use request::ReadRequest;
pub use sevenzip::{SevenZipEntry, SevenZipScanner, StorageMethod, derive_decryption_params};
