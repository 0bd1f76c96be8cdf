use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use diskimager::error::DiskImageError;
use diskimager::manifest::Manifest;

/// Author a GPT-partitioned, FAT32-populated raw disk image from a JSON manifest.
#[derive(Parser, Debug)]
#[command(name = "diskimager", version, about)]
struct Cli {
    /// Path to the JSON manifest describing partitions and filesystems.
    manifest: PathBuf,
}

/// Mirrors the reference implementation's `main`: codes 2/3 are keyed by
/// error variant (manifest/lookup failures surface before either creation
/// loop runs), but codes 4/5 are keyed by *which loop was running*
/// ([`DiskImageError::DirectoryCreationFailed`] /
/// [`DiskImageError::FileCreationFailed`]) rather than by the wrapped
/// error's variant, since either loop can fail with any underlying cause.
fn exit_code_for(err: &DiskImageError) -> u8 {
    match err {
        DiskImageError::DirectoryCreationFailed(_) => 4,
        DiskImageError::FileCreationFailed(_) => 5,
        DiskImageError::UnknownPartitionType(_) | DiskImageError::Manifest(_) => 2,
        DiskImageError::PartitionNotFound(_) => 3,
        DiskImageError::PathLookupFailed(_) => 4,
        DiskImageError::FileTooLarge(_) | DiskImageError::ClusterExhausted { .. } => 5,
        DiskImageError::Io(_) | DiskImageError::PartitionTooSmall(_) | DiskImageError::SequenceError(_) => 1,
    }
}

fn main() -> ExitCode {
    env_logger::init();

    // Preserve exit code 1 for "missing argument" rather than clap's own
    // usage-error exit code.
    if std::env::args().len() < 2 {
        log::error!("usage: diskimager <manifest.json>");
        return ExitCode::from(1);
    }

    let cli = Cli::parse();

    let manifest = match Manifest::load(&cli.manifest) {
        Ok(m) => m,
        Err(e) => {
            log::error!("failed to load manifest: {e}");
            return ExitCode::from(exit_code_for(&e));
        }
    };

    if let Err(e) = diskimager::author_image(&manifest) {
        log::error!("failed to author image: {e}");
        return ExitCode::from(exit_code_for(&e));
    }

    ExitCode::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_loop_failure_is_exit_code_4_regardless_of_cause() {
        let io_err = DiskImageError::Io(std::io::Error::other("boom"));
        let lookup_err = DiskImageError::PathLookupFailed("/missing/child".to_string());
        assert_eq!(exit_code_for(&DiskImageError::DirectoryCreationFailed(Box::new(io_err))), 4);
        assert_eq!(exit_code_for(&DiskImageError::DirectoryCreationFailed(Box::new(lookup_err))), 4);
    }

    #[test]
    fn file_loop_failure_is_exit_code_5_regardless_of_cause() {
        let io_err = DiskImageError::Io(std::io::Error::other("boom"));
        let lookup_err = DiskImageError::PathLookupFailed("/missing/dst.txt".to_string());
        assert_eq!(exit_code_for(&DiskImageError::FileCreationFailed(Box::new(io_err))), 5);
        assert_eq!(exit_code_for(&DiskImageError::FileCreationFailed(Box::new(lookup_err))), 5);
    }
}
