//! Disc image output

use crate::formats::ciso::CisoWriter;
use std::io::{self, Seek, Write};
use up_core::config::ImageFormat;

/// Destination for reconstructed disc image sectors
pub enum ImageSink<W: Write + Seek> {
    /// Plain ISO: sectors written back to back
    Iso(W),
    /// Compressed ISO
    Cso(CisoWriter<W>),
}

impl<W: Write + Seek> ImageSink<W> {
    /// Start an image of `size` bytes in `format`
    pub fn new(inner: W, format: ImageFormat, size: u64) -> io::Result<Self> {
        Ok(match format {
            ImageFormat::Iso => Self::Iso(inner),
            ImageFormat::Cso => Self::Cso(CisoWriter::new(inner, size)?),
        })
    }

    /// Append whole sectors
    pub fn write_sectors(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Iso(w) => w.write_all(data),
            Self::Cso(w) => w.write_sectors(data),
        }
    }

    /// Finalize the image and hand back the writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Iso(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Self::Cso(w) => w.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_iso_sink_is_verbatim() {
        let data: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
        let mut sink = ImageSink::new(Cursor::new(Vec::new()), ImageFormat::Iso, 4096).unwrap();
        sink.write_sectors(&data).unwrap();
        assert_eq!(sink.finish().unwrap().into_inner(), data);
    }

    #[test]
    fn test_cso_sink_writes_container() {
        let mut sink = ImageSink::new(Cursor::new(Vec::new()), ImageFormat::Cso, 2048).unwrap();
        sink.write_sectors(&[0u8; 2048]).unwrap();
        let image = sink.finish().unwrap().into_inner();
        assert_eq!(&image[0..4], b"CISO");
        let end = u32::from_le_bytes([image[28], image[29], image[30], image[31]]);
        assert_eq!(end as usize, image.len());
    }
}
