//! Value types carried inside messages: handles, open flags, file
//! attributes and directory entries.

use std::fmt;
use std::ops::BitOr;

use bytes::Bytes;

/// Opaque server-assigned file or directory handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(Bytes);

impl Handle {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap clone of the underlying bytes.
    #[inline]
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Handle {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<Bytes> for Handle {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// `pflags` field of an OPEN request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x0000_0001);
    pub const WRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const APPEND: OpenFlags = OpenFlags(0x0000_0004);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0008);
    pub const TRUNCATE: OpenFlags = OpenFlags(0x0000_0010);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0x0000_0020);

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Attribute presence bits.
pub mod attr_flags {
    pub const SIZE: u32 = 0x0000_0001;
    pub const UIDGID: u32 = 0x0000_0002;
    pub const PERMISSIONS: u32 = 0x0000_0004;
    pub const ACMODTIME: u32 = 0x0000_0008;
    pub const EXTENDED: u32 = 0x8000_0000;
}

/// File type mask and values within `permissions`.
const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// Name/data pair used by INIT/VERSION extensions and extended attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub data: String,
}

impl Extension {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// File attributes. Absent fields are not sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<Extension>,
}

impl FileAttributes {
    /// Attributes with no fields set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Presence flags for the fields that are set.
    ///
    /// uid/gid and atime/mtime travel in pairs; a pair is only flagged when
    /// both halves are present.
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= attr_flags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= attr_flags::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= attr_flags::EXTENDED;
        }
        flags
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    fn file_type(&self) -> Option<u32> {
        self.permissions.map(|p| p & S_IFMT)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(S_IFDIR)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(S_IFREG)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }
}

/// One entry of a NAME response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub filename: String,
    /// `ls -l` style rendering supplied by the server.
    pub longname: String,
    pub attrs: FileAttributes,
}

impl DirEntry {
    pub fn new(filename: impl Into<String>, attrs: FileAttributes) -> Self {
        Self {
            filename: filename.into(),
            longname: String::new(),
            attrs,
        }
    }

    /// Whether this is the `.` or `..` pseudo entry.
    pub fn is_dot(&self) -> bool {
        self.filename == "." || self.filename == ".."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_conversions() {
        let handle = Handle::from("abc");
        assert_eq!(handle.as_bytes(), b"abc");
        assert_eq!(handle.to_string(), "abc");
        assert_eq!(handle, Handle::from(b"abc".to_vec()));
    }

    #[test]
    fn test_open_flags_combine() {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        assert_eq!(flags.bits(), 0x1A);
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::READ));
    }

    #[test]
    fn test_attr_flags_for_pairs() {
        let mut attrs = FileAttributes::empty().with_size(10);
        attrs.uid = Some(1000);
        assert_eq!(attrs.flags(), attr_flags::SIZE);

        attrs.gid = Some(1000);
        assert_eq!(attrs.flags(), attr_flags::SIZE | attr_flags::UIDGID);
    }

    #[test]
    fn test_file_type_from_permissions() {
        assert!(FileAttributes::empty().with_permissions(0o040_755).is_dir());
        assert!(FileAttributes::empty().with_permissions(0o100_644).is_file());
        assert!(FileAttributes::empty().with_permissions(0o120_777).is_symlink());
        assert!(!FileAttributes::empty().is_dir());
    }

    #[test]
    fn test_dot_entries() {
        assert!(DirEntry::new(".", FileAttributes::empty()).is_dot());
        assert!(DirEntry::new("..", FileAttributes::empty()).is_dot());
        assert!(!DirEntry::new("...", FileAttributes::empty()).is_dot());
    }
}
