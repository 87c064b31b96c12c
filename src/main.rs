use std::path::PathBuf;

use clap::Parser;
use contours2nii::converter::{ConvertConfig, convert_batch};

/// Convert XML contour annotations of DICOM series into NIfTI mask volumes.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Annotation XML file, or a directory of annotation files
    xml_input: PathBuf,

    /// DICOM series folder; located among the annotation file's sibling
    /// directories when omitted
    #[arg(long)]
    dicom_folder: Option<PathBuf>,

    /// Output folder for mask files; defaults to the DICOM folder
    #[arg(long)]
    output_folder: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ConvertConfig {
        dicom_folder: cli.dicom_folder,
        output_folder: cli.output_folder,
    };

    let summary = convert_batch(&cli.xml_input, &config);
    log::info!(
        "{} converted, {} skipped, {} failed",
        summary.converted,
        summary.skipped,
        summary.failed
    );

    if summary.failed > 0 && summary.converted == 0 && summary.skipped == 0 {
        anyhow::bail!("all {} annotation pair(s) failed", summary.failed);
    }
    Ok(())
}
