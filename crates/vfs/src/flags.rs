//! Open flags.

/// Access mode requested when opening a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// How a file is opened. Immutable for the lifetime of a handle.
///
/// # Examples
///
/// ```
/// use hoard_vfs::OpenFlags;
///
/// let flags = OpenFlags::read_write().create().truncate();
/// assert!(!flags.is_read_only());
/// assert!(flags.is_create());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    access: AccessMode,
    create: bool,
    exclusive: bool,
    truncate: bool,
    append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn write_only() -> Self {
        Self {
            access: AccessMode::WriteOnly,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            access: AccessMode::ReadWrite,
            ..Self::default()
        }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn append(mut self) -> Self {
        self.append = true;
        self
    }

    /// Decode `open(2)` flags.
    pub fn from_bits(bits: i32) -> Self {
        let access = match bits & libc::O_ACCMODE {
            libc::O_WRONLY => AccessMode::WriteOnly,
            libc::O_RDWR => AccessMode::ReadWrite,
            _ => AccessMode::ReadOnly,
        };
        Self {
            access,
            create: bits & libc::O_CREAT != 0,
            exclusive: bits & libc::O_EXCL != 0,
            truncate: bits & libc::O_TRUNC != 0,
            append: bits & libc::O_APPEND != 0,
        }
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }

    pub fn is_write_only(&self) -> bool {
        self.access == AccessMode::WriteOnly
    }

    pub fn is_create(&self) -> bool {
        self.create
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_truncate(&self) -> bool {
        self.truncate
    }

    pub fn is_append(&self) -> bool {
        self.append
    }
}
