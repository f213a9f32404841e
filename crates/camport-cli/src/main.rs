//! Camport - import photos from cameras and memory cards.

mod commands;
mod error;
mod logging;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use camport_core::{ControllerConfig, LosslessFormat, PreviewMode, RawConversionOptions};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, error};

use crate::commands::ImportOptions;
use crate::error::CliResult;
use crate::logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "camport")]
#[command(about = "Import photos from cameras and memory cards mounted as a directory")]
#[command(version)]
struct Cli {
    /// Increase console verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Controller config file (default: the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Do not write a log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LosslessArg {
    Png,
    Tiff,
}

impl From<LosslessArg> for LosslessFormat {
    fn from(arg: LosslessArg) -> Self {
        match arg {
            LosslessArg::Png => Self::Png,
            LosslessArg::Tiff => Self::Tiff,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum PreviewArg {
    None,
    #[default]
    Medium,
    Full,
}

impl From<PreviewArg> for PreviewMode {
    fn from(arg: PreviewArg) -> Self {
        match arg {
            PreviewArg::None => Self::None,
            PreviewArg::Medium => Self::Medium,
            PreviewArg::Full => Self::FullSize,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show driver information and free space
    Info {
        /// Mount point of the camera or card
        mount: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List sub-folders and files of a folder
    List {
        /// Mount point of the camera or card
        mount: PathBuf,

        /// Folder to list (default: the mount point)
        #[arg(short, long)]
        folder: Option<String>,

        /// Read capture dates from EXIF
        #[arg(short, long)]
        metadata: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Download files into a local directory
    Import {
        /// Mount point of the camera or card
        mount: PathBuf,

        /// Destination directory
        dest: PathBuf,

        /// Folder to import from (default: the mount point)
        #[arg(short, long)]
        folder: Option<String>,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Re-encode JPEG files losslessly
        #[arg(long, value_enum)]
        convert_jpeg: Option<LosslessArg>,

        /// Convert RAW files to DNG
        #[arg(long)]
        convert_dng: bool,

        /// Request lossless compression of the DNG image data
        #[arg(long, requires = "convert_dng")]
        compress_dng: bool,

        /// Record the original RAW file name in the DNG
        #[arg(long, requires = "convert_dng")]
        backup_raw: bool,

        /// Preview embedded in the DNG
        #[arg(long, value_enum, default_value_t = PreviewArg::Medium, requires = "convert_dng")]
        preview_mode: PreviewArg,

        /// Store the original file name as document name
        #[arg(long)]
        document_name: bool,

        /// Rating to stamp (0 to 5)
        #[arg(long, default_value = "0")]
        rating: u8,

        /// Command run on every downloaded file (%file, %filename, %path, %orgfilename, %orgpath)
        #[arg(long)]
        script: Option<String>,

        /// Continue after failed files without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete files from the device
    Delete {
        /// Mount point of the camera or card
        mount: PathBuf,

        /// Folder holding the files
        folder: String,

        /// Files to delete
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Write-protect files on the device
    Lock {
        /// Mount point of the camera or card
        mount: PathBuf,

        /// Folder holding the files
        folder: String,

        /// Files to change
        #[arg(required = true)]
        files: Vec<String>,

        /// Remove the write protection instead
        #[arg(long)]
        unlock: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> CliResult<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::load_from(path)?,
        None => ControllerConfig::load()?,
    };
    debug!("Controller config: {:?}", config);
    Ok(config)
}

fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Info { mount, json } => commands::info(&mount, config, json),
        Commands::List {
            mount,
            folder,
            metadata,
            json,
        } => commands::list(&mount, config, folder, metadata, json),
        Commands::Import {
            mount,
            dest,
            folder,
            recursive,
            convert_jpeg,
            convert_dng,
            compress_dng,
            backup_raw,
            preview_mode,
            document_name,
            rating,
            script,
            yes,
        } => {
            let options = ImportOptions {
                folder,
                recursive,
                lossless: convert_jpeg.map(LosslessFormat::from),
                raw: convert_dng.then(|| RawConversionOptions {
                    backup_original: backup_raw,
                    lossless_compression: compress_dng,
                    preview_mode: preview_mode.into(),
                }),
                document_name,
                rating,
                script,
                yes,
            };
            commands::import(&mount, &dest, config, &options)
        }
        Commands::Delete {
            mount,
            folder,
            files,
        } => commands::delete(&mount, config, &folder, &files),
        Commands::Lock {
            mount,
            folder,
            files,
            unlock,
        } => commands::lock(&mount, config, &folder, &files, !unlock),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().with_verbosity(cli.verbose);
    if cli.no_log_file {
        logging = logging.without_file();
    }
    let _guard = match logging::init(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("camport: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("camport: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::parse_from([
            "camport",
            "import",
            "/media/card",
            "/photos",
            "--convert-jpeg",
            "png",
            "--rating",
            "3",
            "--yes",
        ]);
        match cli.command {
            Commands::Import {
                convert_jpeg,
                rating,
                yes,
                ..
            } => {
                assert!(matches!(convert_jpeg, Some(LosslessArg::Png)));
                assert_eq!(rating, 3);
                assert!(yes);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_parse_dng_options() {
        let cli = Cli::parse_from([
            "camport",
            "import",
            "/media/card",
            "/photos",
            "--convert-dng",
            "--compress-dng",
            "--preview-mode",
            "full",
        ]);
        match cli.command {
            Commands::Import {
                convert_dng,
                compress_dng,
                backup_raw,
                preview_mode,
                ..
            } => {
                assert!(convert_dng);
                assert!(compress_dng);
                assert!(!backup_raw);
                assert_eq!(PreviewMode::from(preview_mode), PreviewMode::FullSize);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_dng_options_require_conversion() {
        let result = Cli::try_parse_from(["camport", "import", "/media/card", "/photos", "--backup-raw"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_unlock() {
        let cli = Cli::parse_from(["camport", "lock", "/media/card", "/media/card/DCIM/", "a.jpg", "--unlock"]);
        assert!(matches!(cli.command, Commands::Lock { unlock: true, .. }));
    }
}
