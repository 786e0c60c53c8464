//! Raw disk image sources
//!
//! A [`DiskImageSource`] lists the partitions of an image and hands out a
//! bounded `Read + Seek` view over each one. Partition contents are opaque
//! byte ranges here; nothing interprets filesystems.
//!
//! [`RawImage`] wraps any `Read + Seek` with either an explicit partition
//! list or, with the `partition-info` feature, the image's own GPT or MBR.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

#[cfg(feature = "partition-info")]
use bootsector::{list_partitions, Attributes, Options};

/// Bytes read from the start of an image to find its partition table
///
/// GPT needs LBA 0-33 (17,408 bytes with 512-byte sectors); 64 KB also
/// covers 4K-sector disks.
pub const PARTITION_HEADER_SIZE: usize = 64 * 1024;

/// Trait alias for types that can be read and seeked
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A partition of a source image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePartition {
    /// Partition name
    pub name: String,
    /// Type or attribute tag recorded in the container
    pub type_tag: String,
    /// Byte offset within the image
    pub offset: u64,
    /// Size in bytes
    pub length: u64,
}

impl SourcePartition {
    /// Describe a partition
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            offset,
            length,
        }
    }

    /// Human-readable partition type
    pub fn type_name(&self) -> String {
        describe_type(&self.type_tag)
    }
}

/// Supplies partitions of a raw image
pub trait DiskImageSource {
    /// Partitions in on-disk order
    fn partitions(&self) -> &[SourcePartition];

    /// Open a bounded view over one partition
    fn open_partition(&mut self, partition: &SourcePartition) -> Result<Box<dyn ReadSeek + '_>>;
}

// ============================================================================
// Raw image
// ============================================================================

/// A raw image backed by any seekable reader
pub struct RawImage<R> {
    reader: R,
    partitions: Vec<SourcePartition>,
}

impl<R: Read + Seek> RawImage<R> {
    /// Wrap a reader with an explicit partition list
    pub fn new(reader: R, partitions: Vec<SourcePartition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for partition in &partitions {
            if partition.name.is_empty() {
                return Err(Error::Configuration(format!(
                    "partition at offset {} has no name",
                    partition.offset
                )));
            }
            if !seen.insert(partition.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate partition name '{}'",
                    partition.name
                )));
            }
        }

        Ok(Self { reader, partitions })
    }

    /// Read the image's partition table
    #[cfg(feature = "partition-info")]
    pub fn from_partition_table(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;

        let mut buffer = vec![0u8; PARTITION_HEADER_SIZE];
        let bytes_read = crate::planner::read_exact_or_eof(&mut reader, &mut buffer)?;
        buffer.truncate(bytes_read);

        let partitions = partitions_from_buffer(&buffer)?;
        tracing::debug!("Found {} partition(s) in image", partitions.len());
        Self::new(reader, partitions)
    }

    /// Stub when the `partition-info` feature is disabled
    #[cfg(not(feature = "partition-info"))]
    pub fn from_partition_table(_reader: R) -> Result<Self> {
        Err(Error::Configuration(
            "Partition table parsing not available (compiled without partition-info feature)"
                .to_string(),
        ))
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> DiskImageSource for RawImage<R> {
    fn partitions(&self) -> &[SourcePartition] {
        &self.partitions
    }

    fn open_partition(&mut self, partition: &SourcePartition) -> Result<Box<dyn ReadSeek + '_>> {
        Ok(Box::new(PartitionView::new(
            &mut self.reader,
            partition.offset,
            partition.length,
        )))
    }
}

/// Parse a GPT or MBR from the first bytes of an image
#[cfg(feature = "partition-info")]
pub fn partitions_from_buffer(buffer: &[u8]) -> Result<Vec<SourcePartition>> {
    if buffer.len() < 512 {
        return Err(Error::Configuration(
            "image is too small to hold a partition table".to_string(),
        ));
    }

    let found = list_partitions(buffer, &Options::default())
        .map_err(|e| Error::Configuration(format!("no usable partition table: {:?}", e)))?;

    let partitions: Vec<SourcePartition> = found
        .iter()
        .enumerate()
        .map(|(idx, partition)| {
            let (name, type_tag) = match &partition.attributes {
                Attributes::GPT {
                    type_uuid, name, ..
                } => (name.clone(), format_guid(type_uuid)),
                Attributes::MBR { type_code, .. } => {
                    (String::new(), format!("0x{:02X}", type_code))
                }
            };
            let name = if name.is_empty() {
                format!("partition{}", idx + 1)
            } else {
                name
            };
            SourcePartition::new(name, type_tag, partition.first_byte, partition.len)
        })
        .collect();

    if partitions.is_empty() {
        return Err(Error::Configuration(
            "partition table lists no partitions".to_string(),
        ));
    }
    Ok(partitions)
}

/// Format a GUID as a string
#[cfg(feature = "partition-info")]
fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        guid[3], guid[2], guid[1], guid[0],
        guid[5], guid[4],
        guid[7], guid[6],
        guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15]
    )
}

/// Human-readable name for a GPT type GUID or MBR type code
pub fn describe_type(type_tag: &str) -> String {
    match type_tag.to_uppercase().as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" | "0XEF" => "EFI System".to_string(),
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft Basic Data".to_string(),
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft Reserved".to_string(),
        "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC" => "Windows Recovery".to_string(),
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" | "0X83" => "Linux filesystem".to_string(),
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" | "0X82" => "Linux swap".to_string(),
        "21686148-6449-6E6F-744E-656564454649" => "BIOS boot".to_string(),
        "0X07" => "NTFS/HPFS".to_string(),
        "0X0C" => "W95 FAT32 (LBA)".to_string(),
        _ => type_tag.to_string(),
    }
}

/// Format a size in bytes to human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Partition view
// ============================================================================

/// `Read + Seek` window over `[start, start + len)` of an inner stream
pub struct PartitionView<'a, R: ?Sized> {
    inner: &'a mut R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a, R: Read + Seek + ?Sized> PartitionView<'a, R> {
    /// Create a view
    pub fn new(inner: &'a mut R, start: u64, len: u64) -> Self {
        Self {
            inner,
            start,
            len,
            pos: 0,
        }
    }
}

impl<R: Read + Seek + ?Sized> Read for PartitionView<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let want = (self.len - self.pos).min(buf.len() as u64) as usize;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek + ?Sized> Seek for PartitionView<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of partition",
            )),
        }
    }
}
