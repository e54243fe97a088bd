//! Archive handling for downloads and backups.
//!
//! Every extractor validates entry paths before writing: traversal
//! components, absolute paths, and targets escaping the destination are
//! rejected up front, so a hostile archive cannot write outside the
//! directory it is being unpacked into.

mod extract;
mod path;
mod tar_gz;
mod zip_ops;

pub use path::entry_rel_path;
pub use tar_gz::{extract_tar_gz, extract_tar_gz_mapped};
pub use zip_ops::{extract_zip, extract_zip_mapped};
