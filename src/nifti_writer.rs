use ndarray::ArrayViewD;
use nifti::writer::WriterOptions;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaskWriteError {
    /// The writer only accepts 3-D mask volumes; anything else is a contract
    /// violation by the caller.
    #[error("Mask array must be 3-dimensional, got {0} dimension(s)")]
    ShapeContract(usize),

    #[error("NIfTI write error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

/// Writes a binary mask volume as a NIfTI-1 file with an identity spatial
/// transform.
///
/// Paths ending in `.nii.gz` are gzip-compressed; an existing file at `path`
/// is overwritten without warning.
pub fn save_mask(mask: ArrayViewD<'_, u8>, path: impl AsRef<Path>) -> Result<(), MaskWriteError> {
    if mask.ndim() != 3 {
        return Err(MaskWriteError::ShapeContract(mask.ndim()));
    }
    WriterOptions::new(path).write_nifti(&mask)?;
    Ok(())
}
