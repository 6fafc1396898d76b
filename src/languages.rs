//! The fixed table of supported snippet languages.
//!
//! A submitted language tag resolves to the file extension under which the
//! snippet is written into its workspace. Resolution is local validation:
//! an unknown tag fails before any workspace or container resource is
//! allocated.

use crate::error::LanguageError;

/// The stem of the source file written into every workspace.
const SOURCE_FILE_STEM: &str = "prog";

/// Language tag to source-file extension mapping.
const LANGUAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("c", "c"),
    ("golang", "go"),
    ("python", "py"),
    ("ruby", "rb"),
    ("perl", "pl"),
];

/// Resolve a language tag to its source-file extension.
///
/// # Errors
///
/// Returns `LanguageError::Unsupported` when the tag has no entry in the
/// table.
pub fn extension_for(language: &str) -> Result<&'static str, LanguageError> {
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(tag, _)| *tag == language)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| LanguageError::Unsupported {
            language: String::from(language),
        })
}

/// Build the workspace file name (`prog.<ext>`) for a language tag.
///
/// # Errors
///
/// Returns `LanguageError::Unsupported` when the tag has no entry in the
/// table.
pub fn source_file_name(language: &str) -> Result<String, LanguageError> {
    let ext = extension_for(language)?;
    Ok(format!("{SOURCE_FILE_STEM}.{ext}"))
}
