//! CISO (compressed ISO) writer
//!
//! Layout:
//! - 24-byte header: `CISO`, le32 header size, le64 uncompressed size,
//!   le32 sector size (2048), u8 version (1), u8 alignment shift (0), 2 reserved
//! - `1 + sectors` le32 entries, the absolute file offset of each sector's data;
//!   the last entry is the end of the file. Bit 31 marks a sector stored
//!   uncompressed.
//! - sector data, each sector raw-deflated on its own
//!
//! The table is written as zeros up front and rewritten in place by
//! [`CisoWriter::finish`].

use flate2::{Compress, Compression, FlushCompress, Status};
use std::io::{self, Seek, SeekFrom, Write};
use tracing::debug;

pub const CISO_MAGIC: [u8; 4] = *b"CISO";
pub const CISO_HEADER_SIZE: u64 = 24;
pub const CISO_SECTOR_SIZE: usize = 2048;
pub const CISO_VERSION: u8 = 1;

/// Table entry flag for a sector stored without compression
pub const CISO_STORED_FLAG: u32 = 0x8000_0000;

/// Streams 2048-byte sectors into a CSO container
pub struct CisoWriter<W: Write + Seek> {
    inner: W,
    table: Vec<u32>,
    capacity: usize,
    offset: u64,
    compress: Compress,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> CisoWriter<W> {
    /// Write the header and a zeroed block table sized for `uncompressed_size` bytes
    pub fn new(mut inner: W, uncompressed_size: u64) -> io::Result<Self> {
        let sectors = uncompressed_size.div_ceil(CISO_SECTOR_SIZE as u64);
        let capacity = usize::try_from(sectors + 1)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "CSO image too large"))?;

        let mut header = [0u8; CISO_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&CISO_MAGIC);
        header[4..8].copy_from_slice(&(CISO_HEADER_SIZE as u32).to_le_bytes());
        header[8..16].copy_from_slice(&uncompressed_size.to_le_bytes());
        header[16..20].copy_from_slice(&(CISO_SECTOR_SIZE as u32).to_le_bytes());
        header[20] = CISO_VERSION;

        inner.write_all(&header)?;
        inner.write_all(&vec![0u8; capacity * 4])?;

        debug!(
            "CSO: {} bytes uncompressed, {} table entries",
            uncompressed_size, capacity
        );

        Ok(Self {
            inner,
            table: Vec::with_capacity(capacity),
            capacity,
            offset: CISO_HEADER_SIZE + capacity as u64 * 4,
            compress: Compress::new(Compression::best(), false),
            scratch: vec![0u8; CISO_SECTOR_SIZE],
        })
    }

    /// Number of sectors written so far
    pub fn sectors_written(&self) -> usize {
        self.table.len()
    }

    /// Deflate one sector and append it; sectors that do not shrink are stored raw
    pub fn write_sector(&mut self, sector: &[u8]) -> io::Result<()> {
        if sector.len() != CISO_SECTOR_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CSO sector must be {} bytes, got {}", CISO_SECTOR_SIZE, sector.len()),
            ));
        }
        if self.table.len() + 1 >= self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "more sectors than the CSO header announced",
            ));
        }

        let mut entry = u32::try_from(self.offset)
            .ok()
            .filter(|&o| o & CISO_STORED_FLAG == 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "CSO offset exceeds 2 GiB"))?;

        self.compress.reset();
        let status = self
            .compress
            .compress(sector, &mut self.scratch, FlushCompress::Finish)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let packed = self.compress.total_out() as usize;

        let written = if status == Status::StreamEnd && packed < CISO_SECTOR_SIZE {
            self.inner.write_all(&self.scratch[..packed])?;
            packed
        } else {
            entry |= CISO_STORED_FLAG;
            self.inner.write_all(sector)?;
            CISO_SECTOR_SIZE
        };

        self.table.push(entry);
        self.offset += written as u64;
        Ok(())
    }

    /// Append every 2048-byte sector of `data`
    pub fn write_sectors(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() % CISO_SECTOR_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "CSO data is not a whole number of sectors",
            ));
        }
        for sector in data.chunks_exact(CISO_SECTOR_SIZE) {
            self.write_sector(sector)?;
        }
        Ok(())
    }

    /// Terminate the table with the end offset and rewrite it at the start of the file
    pub fn finish(mut self) -> io::Result<W> {
        let end = u32::try_from(self.offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "CSO offset exceeds 4 GiB"))?;
        self.table.push(end);

        let bytes: Vec<u8> = self.table.iter().flat_map(|e| e.to_le_bytes()).collect();
        self.inner.seek(SeekFrom::Start(CISO_HEADER_SIZE))?;
        self.inner.write_all(&bytes)?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;

        debug!(
            "CSO: {} sectors, {} bytes",
            self.table.len() - 1,
            self.offset
        );
        Ok(self.inner)
    }
}
