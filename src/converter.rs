use crate::{
    contours::{ContourReadError, ContourSet, read_contours},
    enums::SortBy,
    nifti_writer::{MaskWriteError, save_mask},
    rasterizer::{RasterizeError, rasterize},
    volume::{GridPoint, Volume},
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Appended to the annotation file stem to form the mask file name.
pub const MASK_SUFFIX: &str = "_mask.nii.gz";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Contours(#[from] ContourReadError),

    #[error(transparent)]
    Volume(#[from] VolumeLoaderError),

    #[error(transparent)]
    Rasterize(#[from] RasterizeError),

    #[error(transparent)]
    Write(#[from] MaskWriteError),

    #[error("Cannot determine DICOM folder for {0}; pass it explicitly")]
    DicomFolderUndetermined(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-batch settings. Unset fields are derived per annotation file.
#[derive(Clone, Debug, Default)]
pub struct ConvertConfig {
    /// DICOM series folder; located among the annotation file's sibling
    /// directories when unset.
    pub dicom_folder: Option<PathBuf>,
    /// Output folder for mask files; the DICOM folder when unset.
    pub output_folder: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Converts one annotation/series pair into a mask file.
///
/// Returns the path of the written mask, or `Ok(None)` when the annotation
/// file contains no contours (the pair is skipped and nothing is written).
/// Contours are parsed before the series is loaded so an empty annotation
/// never costs a series load.
pub fn convert_pair(
    xml_file: &Path,
    dicom_folder: &Path,
    output_folder: &Path,
) -> Result<Option<PathBuf>, ConvertError> {
    let contour_set = read_contours(xml_file)?;
    if contour_set.is_empty() {
        log::info!("{}: no contours, skipping", xml_file.display());
        return Ok(None);
    }

    let volume = VolumeLoader::load_from_directory(dicom_folder, SortBy::ImagePositionPatient)?;
    let grid_points = map_contour_points(&contour_set, &volume);
    let mask = rasterize(&grid_points, volume.shape())?;

    let output_path = mask_output_path(xml_file, output_folder);
    save_mask(mask.view().into_dyn(), &output_path)?;
    Ok(Some(output_path))
}

/// Pools every contour point into voxel-index space, dropping points the
/// volume transform cannot map.
fn map_contour_points(contour_set: &ContourSet, volume: &Volume) -> Vec<GridPoint> {
    let mut dropped = 0usize;
    let mapped: Vec<GridPoint> = contour_set
        .iter()
        .flat_map(|contour| contour.points.iter())
        .filter_map(|&point| {
            let index = volume.physical_to_continuous_index(point);
            if index.is_none() {
                dropped += 1;
            }
            index
        })
        .collect();
    if dropped > 0 {
        log::debug!("Dropped {dropped} unmappable contour point(s)");
    }
    mapped
}

fn mask_output_path(xml_file: &Path, output_folder: &Path) -> PathBuf {
    let stem = xml_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_folder.join(format!("{stem}{MASK_SUFFIX}"))
}

/// Locates the DICOM series folder belonging to an annotation file.
///
/// Strips the `pseg.` prefix from the file stem and grows a prefix of the
/// remainder until exactly one sibling directory matches it. No match at any
/// prefix length means the folder has to be supplied explicitly.
pub fn determine_dicom_folder(xml_file: &Path) -> Result<PathBuf, ConvertError> {
    let stem = xml_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder_name = stem.replace("pseg.", "");
    let parent = xml_file.parent().unwrap_or_else(|| Path::new("."));

    let siblings: Vec<PathBuf> = fs::read_dir(parent)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    let mut prefix_end = 0;
    for character in folder_name.chars() {
        prefix_end += character.len_utf8();
        let prefix = &folder_name[..prefix_end];
        let matches: Vec<_> = siblings
            .iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with(prefix))
                    .unwrap_or(false)
            })
            .collect();

        if matches.len() == 1 {
            return Ok(matches[0].clone());
        }
        if matches.is_empty() {
            break;
        }
    }

    Err(ConvertError::DicomFolderUndetermined(
        xml_file.to_path_buf(),
    ))
}

/// Converts a single annotation file or every `*.xml` file in a directory.
///
/// Pairs are independent and processed in parallel. A failing pair is logged
/// and counted; it never aborts its siblings.
pub fn convert_batch(xml_input: &Path, config: &ConvertConfig) -> BatchSummary {
    let xml_files = collect_annotation_files(xml_input);
    if xml_files.is_empty() {
        log::warn!("No annotation files found at {}", xml_input.display());
        return BatchSummary::default();
    }

    xml_files
        .par_iter()
        .map(|xml_file| match convert_one(xml_file, config) {
            Ok(Some(output_path)) => {
                log::info!("{} -> {}", xml_file.display(), output_path.display());
                BatchSummary {
                    converted: 1,
                    ..Default::default()
                }
            }
            Ok(None) => BatchSummary {
                skipped: 1,
                ..Default::default()
            },
            Err(error) => {
                log::error!("{}: {error}", xml_file.display());
                BatchSummary {
                    failed: 1,
                    ..Default::default()
                }
            }
        })
        .reduce(BatchSummary::default, |a, b| BatchSummary {
            converted: a.converted + b.converted,
            skipped: a.skipped + b.skipped,
            failed: a.failed + b.failed,
        })
}

fn convert_one(xml_file: &Path, config: &ConvertConfig) -> Result<Option<PathBuf>, ConvertError> {
    let dicom_folder = match &config.dicom_folder {
        Some(folder) => folder.clone(),
        None => determine_dicom_folder(xml_file)?,
    };
    let output_folder = config
        .output_folder
        .clone()
        .unwrap_or_else(|| dicom_folder.clone());
    convert_pair(xml_file, &dicom_folder, &output_folder)
}

fn collect_annotation_files(xml_input: &Path) -> Vec<PathBuf> {
    if !xml_input.is_dir() {
        return vec![xml_input.to_path_buf()];
    }
    match fs::read_dir(xml_input) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
            })
            .collect(),
        Err(error) => {
            log::error!("Cannot read {}: {error}", xml_input.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const EMPTY_ANNOTATION: &str = "<Segmentation></Segmentation>";
    const SMALL_ANNOTATION: &str = concat!(
        "<Segmentation><Contour>",
        "<Pt>1,1,1</Pt><Pt>5,1,1</Pt><Pt>1,5,1</Pt><Pt>1,1,5</Pt>",
        "</Contour></Segmentation>",
    );

    #[test]
    fn empty_contour_set_is_skipped_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let xml_file = dir.path().join("pseg.empty.xml");
        fs::write(&xml_file, EMPTY_ANNOTATION).unwrap();

        // The DICOM folder does not exist; an empty annotation must be
        // skipped before the series is ever touched.
        let result = convert_pair(&xml_file, &dir.path().join("missing"), dir.path());
        assert!(matches!(result, Ok(None)));
        assert!(!mask_output_path(&xml_file, dir.path()).exists());
    }

    #[test]
    fn mask_name_derives_from_annotation_stem() {
        let path = mask_output_path(Path::new("/data/pseg.case42.xml"), Path::new("/out"));
        assert_eq!(path, Path::new("/out/pseg.case42_mask.nii.gz"));
    }

    #[test]
    fn dicom_folder_found_by_prefix_growth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("166064.20231212")).unwrap();
        fs::create_dir(dir.path().join("walnut")).unwrap();
        let xml_file = dir.path().join("pseg.166064.20231212.xml");
        fs::write(&xml_file, EMPTY_ANNOTATION).unwrap();

        let folder = determine_dicom_folder(&xml_file).unwrap();
        assert_eq!(folder, dir.path().join("166064.20231212"));
    }

    #[test]
    fn ambiguous_prefixes_are_narrowed_until_unique() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("ab1")).unwrap();
        fs::create_dir(dir.path().join("ab2")).unwrap();
        let xml_file = dir.path().join("pseg.ab2.xml");
        fs::write(&xml_file, EMPTY_ANNOTATION).unwrap();

        let folder = determine_dicom_folder(&xml_file).unwrap();
        assert_eq!(folder, dir.path().join("ab2"));
    }

    #[test]
    fn unmatchable_dicom_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("unrelated")).unwrap();
        let xml_file = dir.path().join("pseg.case.xml");
        fs::write(&xml_file, EMPTY_ANNOTATION).unwrap();

        assert!(matches!(
            determine_dicom_folder(&xml_file),
            Err(ConvertError::DicomFolderUndetermined(_))
        ));
    }

    #[test]
    fn failing_pairs_do_not_abort_their_siblings() {
        let dir = tempfile::tempdir().unwrap();
        // Malformed XML: fails at parse.
        fs::write(dir.path().join("broken.xml"), "<Segmentation>").unwrap();
        // No contours: skipped.
        fs::write(dir.path().join("empty.xml"), EMPTY_ANNOTATION).unwrap();
        // Contours present, but the series folder is missing: fails at load.
        fs::write(dir.path().join("orphan.xml"), SMALL_ANNOTATION).unwrap();

        let config = ConvertConfig {
            dicom_folder: Some(dir.path().join("no_such_series")),
            output_folder: Some(dir.path().to_path_buf()),
        };
        let summary = convert_batch(dir.path(), &config);
        assert_eq!(
            summary,
            BatchSummary {
                converted: 0,
                skipped: 1,
                failed: 2,
            }
        );
    }

    #[test]
    fn single_file_input_is_one_pair() {
        let dir = tempfile::tempdir().unwrap();
        let xml_file = dir.path().join("empty.xml");
        fs::write(&xml_file, EMPTY_ANNOTATION).unwrap();

        let config = ConvertConfig {
            dicom_folder: Some(dir.path().join("missing")),
            output_folder: None,
        };
        let summary = convert_batch(&xml_file, &config);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }
}
