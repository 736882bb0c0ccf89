//! Access descent.
//!
//! Every operation walks from the share root toward its target one element
//! at a time. Each node visited must carry at least one bit of the check
//! mask after the share's mode mask is applied; the walk never leaves the
//! share root.

use crate::error::ShareError;
use crate::names;
use crate::share::Share;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A successful descent
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Local path of the final node
    pub path: PathBuf,
    /// Disk name of the final node; empty for the share root
    pub disk_name: String,
    /// Metadata of the final node
    pub metadata: fs::Metadata,
}

fn check_node(share: &Share, path: &Path, meta: &fs::Metadata, check: u32) -> Result<(), ShareError> {
    if meta.permissions().mode() & check & share.mode_mask() == 0 {
        return Err(ShareError::AccessViolation(path.display().to_string()));
    }
    Ok(())
}

fn stay_inside(share: &Share, path: &Path) -> Result<(), ShareError> {
    let link = fs::symlink_metadata(path).map_err(|e| ShareError::from_io(e, &path.display().to_string()))?;
    if !link.file_type().is_symlink() {
        return Ok(());
    }
    let root = fs::canonicalize(share.root())?;
    let target = fs::canonicalize(path).map_err(|e| ShareError::from_io(e, &path.display().to_string()))?;
    if target.starts_with(&root) {
        Ok(())
    } else {
        Err(ShareError::AccessViolation(path.display().to_string()))
    }
}

/// Walk `elements` below the share root, checking every node against `check`
///
/// # Errors
/// `NotFound` when an element is missing, `NotADirectory` when an
/// intermediate node is a file, `AccessViolation` when a node fails the check
pub fn descend(share: &Share, elements: &[String], check: u32) -> Result<Resolved, ShareError> {
    let mut path = share.root().to_path_buf();
    let mut meta = fs::metadata(&path).map_err(|e| ShareError::from_io(e, share.name()))?;
    check_node(share, &path, &meta, check)?;
    let mut disk_name = String::new();

    for elem in elements {
        if !meta.is_dir() {
            return Err(ShareError::NotADirectory(path.display().to_string()));
        }
        let found = names::find_entry(&path, elem, share.presentation())
            .map_err(|e| ShareError::from_io(e, elem))?
            .ok_or_else(|| ShareError::NotFound(elem.clone()))?;
        path.push(&found);
        stay_inside(share, &path)?;
        meta = fs::metadata(&path).map_err(|e| ShareError::from_io(e, elem))?;
        check_node(share, &path, &meta, check)?;
        disk_name = found;
    }

    Ok(Resolved {
        path,
        disk_name,
        metadata: meta,
    })
}

/// Descend to the parent of the last element and look the leaf up.
///
/// Returns the resolved parent, the leaf as the client named it, and the
/// leaf's disk name if it exists. An existing leaf must stay inside the
/// share and pass `check` like every other node.
///
/// # Errors
/// As [`descend`]; the parent must be a directory
pub fn descend_parent(
    share: &Share,
    elements: &[String],
    check: u32,
) -> Result<(Resolved, String, Option<String>), ShareError> {
    let Some((leaf, parents)) = elements.split_last() else {
        return Err(ShareError::AccessViolation(share.name().to_string()));
    };
    let parent = descend(share, parents, check)?;
    if !parent.metadata.is_dir() {
        return Err(ShareError::NotADirectory(parent.path.display().to_string()));
    }
    let existing = names::find_entry(&parent.path, leaf, share.presentation())
        .map_err(|e| ShareError::from_io(e, leaf))?;
    if let Some(disk) = &existing {
        let path = parent.path.join(disk);
        stay_inside(share, &path).map_err(|e| match e {
            ShareError::NotFound(_) => ShareError::AccessViolation(path.display().to_string()),
            e => e,
        })?;
        let meta = fs::metadata(&path).map_err(|e| ShareError::from_io(e, leaf))?;
        check_node(share, &path, &meta, check)?;
    }
    Ok((parent, leaf.clone(), existing))
}
