//! MessagePack primitives shared by the tracker codec and the realtime wire
//! messages.
//!
//! Optional values are written as arrays of length 0 or 1 so that readers
//! never need to peek at markers.

use crate::error::{DecodeError, Result};
use rmp::{decode, encode};
use std::io::{Cursor, Read};

pub(crate) fn write_array_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    encode::write_array_len(buf, len as u32)?;
    Ok(())
}

pub(crate) fn write_u64(buf: &mut Vec<u8>, value: u64) -> Result<()> {
    encode::write_uint(buf, value)?;
    Ok(())
}

pub(crate) fn write_i64(buf: &mut Vec<u8>, value: i64) -> Result<()> {
    encode::write_sint(buf, value)?;
    Ok(())
}

pub(crate) fn write_f64(buf: &mut Vec<u8>, value: f64) -> Result<()> {
    encode::write_f64(buf, value)?;
    Ok(())
}

pub(crate) fn write_bool(buf: &mut Vec<u8>, value: bool) -> Result<()> {
    encode::write_bool(buf, value)?;
    Ok(())
}

pub(crate) fn write_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    encode::write_str(buf, value)?;
    Ok(())
}

pub(crate) fn write_bin(buf: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    encode::write_bin(buf, value)?;
    Ok(())
}

pub(crate) fn write_opt_u64(buf: &mut Vec<u8>, value: Option<u64>) -> Result<()> {
    match value {
        Some(v) => {
            write_array_len(buf, 1)?;
            write_u64(buf, v)
        }
        None => write_array_len(buf, 0),
    }
}

pub(crate) fn write_opt_i64(buf: &mut Vec<u8>, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) => {
            write_array_len(buf, 1)?;
            write_i64(buf, v)
        }
        None => write_array_len(buf, 0),
    }
}

pub(crate) fn write_opt_f64(buf: &mut Vec<u8>, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) => {
            write_array_len(buf, 1)?;
            write_f64(buf, v)
        }
        None => write_array_len(buf, 0),
    }
}

pub(crate) fn write_opt_str(buf: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => {
            write_array_len(buf, 1)?;
            write_str(buf, v)
        }
        None => write_array_len(buf, 0),
    }
}

/// Sequential MessagePack reader over a byte slice
pub(crate) struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    /// True once every byte has been consumed
    pub(crate) fn is_exhausted(&self) -> bool {
        self.cursor.position() as usize >= self.cursor.get_ref().len()
    }

    pub(crate) fn read_array_len(&mut self, what: &str) -> std::result::Result<usize, DecodeError> {
        decode::read_array_len(&mut self.cursor)
            .map(|len| len as usize)
            .map_err(|e| DecodeError::with_source(format!("reading {what} array header"), e))
    }

    /// Read an array header and require an exact length
    pub(crate) fn expect_array_len(
        &mut self,
        what: &str,
        expected: usize,
    ) -> std::result::Result<(), DecodeError> {
        let len = self.read_array_len(what)?;
        if len != expected {
            return Err(DecodeError::new(format!(
                "{what}: expected {expected} elements, found {len}"
            )));
        }
        Ok(())
    }

    pub(crate) fn read_u64(&mut self, what: &str) -> std::result::Result<u64, DecodeError> {
        decode::read_int::<u64, _>(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> std::result::Result<u32, DecodeError> {
        decode::read_int::<u32, _>(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> std::result::Result<u8, DecodeError> {
        decode::read_int::<u8, _>(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_i64(&mut self, what: &str) -> std::result::Result<i64, DecodeError> {
        decode::read_int::<i64, _>(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_f64(&mut self, what: &str) -> std::result::Result<f64, DecodeError> {
        decode::read_f64(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_bool(&mut self, what: &str) -> std::result::Result<bool, DecodeError> {
        decode::read_bool(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))
    }

    pub(crate) fn read_string(&mut self, what: &str) -> std::result::Result<String, DecodeError> {
        let len = decode::read_str_len(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what} length"), e))?;
        let bytes = self.read_exact(len as usize, what)?;
        String::from_utf8(bytes)
            .map_err(|e| DecodeError::with_source(format!("{what} is not valid UTF-8"), e))
    }

    pub(crate) fn read_bin(&mut self, what: &str) -> std::result::Result<Vec<u8>, DecodeError> {
        let len = decode::read_bin_len(&mut self.cursor)
            .map_err(|e| DecodeError::with_source(format!("reading {what} length"), e))?;
        self.read_exact(len as usize, what)
    }

    pub(crate) fn read_opt_u64(&mut self, what: &str) -> std::result::Result<Option<u64>, DecodeError> {
        match self.read_option_len(what)? {
            0 => Ok(None),
            _ => self.read_u64(what).map(Some),
        }
    }

    pub(crate) fn read_opt_i64(&mut self, what: &str) -> std::result::Result<Option<i64>, DecodeError> {
        match self.read_option_len(what)? {
            0 => Ok(None),
            _ => self.read_i64(what).map(Some),
        }
    }

    pub(crate) fn read_opt_f64(&mut self, what: &str) -> std::result::Result<Option<f64>, DecodeError> {
        match self.read_option_len(what)? {
            0 => Ok(None),
            _ => self.read_f64(what).map(Some),
        }
    }

    pub(crate) fn read_opt_string(
        &mut self,
        what: &str,
    ) -> std::result::Result<Option<String>, DecodeError> {
        match self.read_option_len(what)? {
            0 => Ok(None),
            _ => self.read_string(what).map(Some),
        }
    }

    fn read_option_len(&mut self, what: &str) -> std::result::Result<usize, DecodeError> {
        let len = self.read_array_len(what)?;
        if len > 1 {
            return Err(DecodeError::new(format!(
                "{what}: optional value holds {len} elements"
            )));
        }
        Ok(len)
    }

    fn read_exact(&mut self, len: usize, what: &str) -> std::result::Result<Vec<u8>, DecodeError> {
        let remaining = self.cursor.get_ref().len() - self.cursor.position() as usize;
        if len > remaining {
            return Err(DecodeError::new(format!(
                "{what}: needs {len} bytes but only {remaining} remain"
            )));
        }
        let mut bytes = vec![0u8; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|e| DecodeError::with_source(format!("reading {what}"), e))?;
        Ok(bytes)
    }
}
