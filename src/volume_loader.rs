use crate::{
    enums::SortBy,
    volume::{PhysicalPoint, Volume},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Missing Image Position (Patient)")]
    MissingPosition,

    #[error("Missing Image Orientation (Patient)")]
    MissingOrientation,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

struct SliceRecord {
    order: Option<f64>,
    image: Array2<u16>,
    position: Option<PhysicalPoint>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images are found, dimensions are
    /// inconsistent, or the spatial metadata needed for coordinate mapping
    /// is missing
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, &sort_by))
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let volume_array = Self::build_volume_array(&slices);
        let spacing = Self::get_spacing(dicom_objects, &slices)
            .ok_or(VolumeLoaderError::MissingSpacing)?;
        let origin = slices[0]
            .position
            .ok_or(VolumeLoaderError::MissingPosition)?;
        let direction =
            Self::get_direction(dicom_objects).ok_or(VolumeLoaderError::MissingOrientation)?;

        Ok(Volume::new(volume_array, spacing, origin, direction))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<SliceRecord> {
        let position = Self::get_position(dicom_object);
        let order = Self::get_sort_order(dicom_object, sort_by, position)?;
        let image = Self::decode_image(dicom_object)?;
        Some(SliceRecord {
            order,
            image,
            position,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
        position: Option<PhysicalPoint>,
    ) -> Option<Option<f64>> {
        match sort_by {
            SortBy::ImagePositionPatient => Some(position.map(|p| p.z)),
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float64()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f64);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<PhysicalPoint> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        Some(PhysicalPoint::new(
            *pos.first()?,
            *pos.get(1)?,
            *pos.get(2)?,
        ))
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let rows = dicom_object.element(tags::ROWS).ok()?.to_int::<u32>().ok()? as usize;
        let columns = dicom_object
            .element(tags::COLUMNS)
            .ok()?
            .to_int::<u32>()
            .ok()? as usize;

        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        let mut values = pixel_data.to_vec_with_options::<u16>(&options).ok()?;

        // Always the first frame, single sample per pixel.
        if values.len() < rows * columns {
            return None;
        }
        values.truncate(rows * columns);
        Array2::from_shape_vec((rows, columns), values).ok()
    }

    fn sort_slices(slices: &mut [SliceRecord], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(slices: &[SliceRecord]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[SliceRecord]) -> Array3<u16> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }

    fn get_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        slices: &[SliceRecord],
    ) -> Option<(f64, f64, f64)> {
        let pixel_spacing = dicom_objects.iter().find_map(|dicom_object| {
            dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()
        })?;

        // Pixel Spacing is (row spacing, column spacing).
        let column_spacing = *pixel_spacing.get(1)?;
        let row_spacing = *pixel_spacing.first()?;
        let slice_spacing = Self::get_slice_spacing(dicom_objects, slices)?;

        Some((column_spacing, row_spacing, slice_spacing))
    }

    /// Distance between consecutive sorted slice positions, falling back to
    /// Slice Thickness for single-slice series.
    fn get_slice_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        slices: &[SliceRecord],
    ) -> Option<f64> {
        slices
            .windows(2)
            .find_map(|pair| {
                let distance = (pair[1].position? - pair[0].position?).norm();
                (distance > 0.0).then_some(distance)
            })
            .or_else(|| {
                dicom_objects.iter().find_map(|dicom_object| {
                    dicom_object
                        .element(tags::SLICE_THICKNESS)
                        .ok()?
                        .to_float64()
                        .ok()
                })
            })
    }

    fn get_direction(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Option<Matrix3<f64>> {
        let cosines = dicom_objects.iter().find_map(|dicom_object| {
            dicom_object
                .element(tags::IMAGE_ORIENTATION_PATIENT)
                .ok()?
                .to_multi_float64()
                .ok()
        })?;
        Self::direction_from_cosines(&cosines)
    }

    fn direction_from_cosines(cosines: &[f64]) -> Option<Matrix3<f64>> {
        if cosines.len() < 6 {
            return None;
        }
        // First triple: physical direction along image rows (x axis).
        // Second triple: physical direction along image columns (y axis).
        let x_axis = Vector3::new(cosines[0], cosines[1], cosines[2]);
        let y_axis = Vector3::new(cosines[3], cosines[4], cosines[5]);
        let z_axis = x_axis.cross(&y_axis);
        Some(Matrix3::from_columns(&[x_axis, y_axis, z_axis]))
    }
}
