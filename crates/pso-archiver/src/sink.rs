//! Archive output
//!
//! An image is a list of byte pieces. Blob mode concatenates them; stream mode
//! writes them to the sink one after another, so both produce the same bytes.

use crate::archive::ArchiveImage;
use bytes::{Bytes, BytesMut};
use std::io::Write;

/// Concatenates the pieces of an image into one buffer
pub fn to_blob(image: ArchiveImage) -> Bytes {
    if let [piece] = image.pieces.as_slice() {
        return piece.clone();
    }
    let mut buf = BytesMut::with_capacity(image.size as usize);
    for piece in &image.pieces {
        buf.extend_from_slice(piece);
    }
    buf.freeze()
}

/// Writes the pieces of an image to a stream in order
///
/// # Returns
/// The number of bytes written
pub fn to_stream<W: Write + ?Sized>(image: &ArchiveImage, writer: &mut W) -> std::io::Result<u64> {
    for piece in &image.pieces {
        writer.write_all(piece)?;
    }
    writer.flush()?;
    Ok(image.size)
}
