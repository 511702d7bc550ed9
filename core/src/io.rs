//! Host-order wire primitives for automaton serialization.

use std::io::{Read, Result as IoResult, Write};

/// Additional methods for reading automaton wire primitives on top of the
/// standard `Read` trait.
///
/// All multi-byte primitives are read in host byte order; the serialized form
/// is not portable across architectures with different endianness.
pub trait WireReadExt: Read {
    fn read_u8(&mut self) -> IoResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_i32(&mut self) -> IoResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_ne_bytes(buf))
    }

    fn read_f64(&mut self) -> IoResult<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_ne_bytes(buf))
    }
}

impl<R: Read + ?Sized> WireReadExt for R {}

/// Additional methods for writing automaton wire primitives on top of the
/// standard `Write` trait.
///
/// See [WireReadExt] for byte-order notes.
pub trait WireWriteExt: Write {
    fn write_u8(&mut self, value: u8) -> IoResult<()> {
        self.write_all(&[value])
    }

    fn write_i32(&mut self, value: i32) -> IoResult<()> {
        self.write_all(&value.to_ne_bytes())
    }

    fn write_f64(&mut self, value: f64) -> IoResult<()> {
        self.write_all(&value.to_ne_bytes())
    }
}

impl<W: Write + ?Sized> WireWriteExt for W {}
