//! Operations accepted by the controller.

use std::fmt;
use std::path::PathBuf;

use crate::item::ItemDescriptor;
use crate::settings::DownloadSettings;

/// Handle identifying one queued thumbnail request, used for promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThumbnailTicket(pub u64);

impl fmt::Display for ThumbnailTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One queued device operation.
///
/// Commands are immutable once enqueued and consumed exactly once by the
/// worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the device.
    Connect,
    /// List the sub-folders of `folder`.
    ListFolders {
        /// Parent folder.
        folder: String,
    },
    /// List the files of `folder`.
    ListFiles {
        /// Folder to list.
        folder: String,
        /// Read capture times from embedded metadata.
        use_metadata: bool,
    },
    /// Fetch thumbnails for a batch of items.
    GetThumbnails {
        /// Ticket used to promote this request.
        ticket: ThumbnailTicket,
        /// Items to fetch, in order.
        items: Vec<ItemDescriptor>,
    },
    /// Fetch the embedded metadata of one item.
    GetMetadata {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
    },
    /// Fetch the driver summary, manual and about texts.
    GetCameraInfo,
    /// Query free space on the device.
    GetFreeSpace,
    /// Grab a live preview frame.
    GetPreview,
    /// Trigger a capture.
    Capture,
    /// Download one file through the pipeline.
    Download(Box<DownloadSettings>),
    /// Upload a local file.
    Upload {
        /// Destination folder on the device.
        folder: String,
        /// Destination file name.
        file: String,
        /// Local source file.
        src: PathBuf,
    },
    /// Delete one item.
    Delete {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
    },
    /// Lock or unlock one item.
    Lock {
        /// Folder on the device.
        folder: String,
        /// File name.
        file: String,
        /// `true` to lock, `false` to unlock.
        locked: bool,
    },
}

/// Action kind of a [`Command`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// [`Command::Connect`].
    Connect,
    /// [`Command::ListFolders`].
    ListFolders,
    /// [`Command::ListFiles`].
    ListFiles,
    /// [`Command::GetThumbnails`].
    GetThumbnails,
    /// [`Command::GetMetadata`].
    GetMetadata,
    /// [`Command::GetCameraInfo`].
    GetCameraInfo,
    /// [`Command::GetFreeSpace`].
    GetFreeSpace,
    /// [`Command::GetPreview`].
    GetPreview,
    /// [`Command::Capture`].
    Capture,
    /// [`Command::Download`].
    Download,
    /// [`Command::Upload`].
    Upload,
    /// [`Command::Delete`].
    Delete,
    /// [`Command::Lock`].
    Lock,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::ListFolders => "list folders",
            Self::ListFiles => "list files",
            Self::GetThumbnails => "thumbnails",
            Self::GetMetadata => "metadata",
            Self::GetCameraInfo => "camera info",
            Self::GetFreeSpace => "free space",
            Self::GetPreview => "preview",
            Self::Capture => "capture",
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::Lock => "lock",
        };
        f.write_str(name)
    }
}

impl Command {
    /// Action kind of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Connect => CommandKind::Connect,
            Self::ListFolders { .. } => CommandKind::ListFolders,
            Self::ListFiles { .. } => CommandKind::ListFiles,
            Self::GetThumbnails { .. } => CommandKind::GetThumbnails,
            Self::GetMetadata { .. } => CommandKind::GetMetadata,
            Self::GetCameraInfo => CommandKind::GetCameraInfo,
            Self::GetFreeSpace => CommandKind::GetFreeSpace,
            Self::GetPreview => CommandKind::GetPreview,
            Self::Capture => CommandKind::Capture,
            Self::Download(_) => CommandKind::Download,
            Self::Upload { .. } => CommandKind::Upload,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Lock { .. } => CommandKind::Lock,
        }
    }

    /// Whether this command belongs in the low-priority thumbnail lane.
    #[must_use]
    pub const fn is_thumbnail(&self) -> bool {
        matches!(self, Self::GetThumbnails { .. })
    }

    /// Ticket of a thumbnail request.
    #[must_use]
    pub const fn ticket(&self) -> Option<ThumbnailTicket> {
        match self {
            Self::GetThumbnails { ticket, .. } => Some(*ticket),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_classification() {
        let thumbs = Command::GetThumbnails {
            ticket: ThumbnailTicket(7),
            items: vec![],
        };
        assert!(thumbs.is_thumbnail());
        assert_eq!(thumbs.ticket(), Some(ThumbnailTicket(7)));

        let delete = Command::Delete {
            folder: "/card/".to_string(),
            file: "x.jpg".to_string(),
        };
        assert!(!delete.is_thumbnail());
        assert_eq!(delete.ticket(), None);
        assert_eq!(delete.kind(), CommandKind::Delete);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(CommandKind::Download.to_string(), "download");
        assert_eq!(CommandKind::GetFreeSpace.to_string(), "free space");
    }
}
