//! # contours2nii
//!
//! Converts clinician-drawn contour annotations into binary segmentation
//! masks aligned to a DICOM image series, written as NIfTI-1 volumes.
//!
//! Annotations are XML files in which each `Contour` element holds `Pt`
//! elements with `x,y,z` physical-space (millimeter) coordinate triples.
//! For every annotation/series pair the pipeline:
//!
//! 1. loads the DICOM series into a [`volume::Volume`] with its spatial
//!    metadata (origin, spacing, direction cosines),
//! 2. maps every contour point into continuous voxel-index space, dropping
//!    points the transform cannot map,
//! 3. pools all surviving points, builds their 3D convex hull and labels
//!    every voxel center inside it (see [`rasterizer::rasterize`]) — the mask
//!    is one global convex region, not per-slice filled polygons,
//! 4. writes the mask next to the series as `<annotation-stem>_mask.nii.gz`.
//!
//! Batch processing pairs each annotation file in a directory with a sibling
//! DICOM series folder and converts the pairs in parallel; a failing pair is
//! logged and never aborts its siblings.
//!
//! # Examples
//!
//! ```no_run
//! # use contours2nii::converter::convert_pair;
//! # use std::path::Path;
//! let written = convert_pair(
//!     Path::new("patient/pseg.166064.xml"),
//!     Path::new("patient/166064.20231212"),
//!     Path::new("patient/166064.20231212"),
//! )
//! .expect("conversion should succeed");
//! ```

pub mod contours;
pub mod converter;
pub mod enums;
pub mod nifti_writer;
pub mod rasterizer;
pub mod volume;
pub mod volume_loader;
