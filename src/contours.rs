use crate::volume::PhysicalPoint;

use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContourReadError {
    #[error("Annotation file {0} does not exist")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("Malformed point {text:?} in contour {contour}")]
    MalformedPoint { contour: usize, text: String },
}

/// Ordered boundary points of one structure on one slice, in physical space.
#[derive(Clone, Debug, Default)]
pub struct Contour {
    pub points: Vec<PhysicalPoint>,
}

/// All contours parsed from one annotation file. May be empty when the file
/// contains no `Contour` elements; that is not an error.
pub type ContourSet = Vec<Contour>;

/// Reads the contours of one XML annotation file.
///
/// Every `Contour` descendant element contributes one contour; its `Pt`
/// descendants carry a comma-separated `x,y,z` physical coordinate triple.
pub fn read_contours(path: impl AsRef<Path>) -> Result<ContourSet, ContourReadError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ContourReadError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    parse_contours(&text)
}

fn parse_contours(text: &str) -> Result<ContourSet, ContourReadError> {
    let document = roxmltree::Document::parse(text)?;

    let mut contour_set = ContourSet::new();
    for (index, contour_node) in document
        .descendants()
        .filter(|node| node.has_tag_name("Contour"))
        .enumerate()
    {
        let mut contour = Contour::default();
        for point_node in contour_node
            .descendants()
            .filter(|node| node.has_tag_name("Pt"))
        {
            let text = point_node.text().unwrap_or_default();
            let point =
                parse_point(text).ok_or_else(|| ContourReadError::MalformedPoint {
                    contour: index,
                    text: text.to_owned(),
                })?;
            contour.points.push(point);
        }
        contour_set.push(contour);
    }

    Ok(contour_set)
}

fn parse_point(text: &str) -> Option<PhysicalPoint> {
    let mut parts = text.split(',');
    let x = parts.next()?.trim().parse().ok()?;
    let y = parts.next()?.trim().parse().ok()?;
    let z = parts.next()?.trim().parse().ok()?;
    parts.next().is_none().then(|| PhysicalPoint::new(x, y, z))
}
