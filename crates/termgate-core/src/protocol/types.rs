//! Core value types shared by client and server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal character and pixel dimensions.
///
/// Pixel dimensions of zero mean "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub columns: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Geometry {
    /// Geometry with character dimensions only.
    pub const fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns,
            rows,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Geometry with both character and pixel dimensions.
    pub const fn with_pixels(columns: u32, rows: u32, pixel_width: u32, pixel_height: u32) -> Self {
        Self {
            columns,
            rows,
            pixel_width,
            pixel_height,
        }
    }

    /// True when both pixel dimensions are known.
    pub fn has_pixels(&self) -> bool {
        self.pixel_width != 0 && self.pixel_height != 0
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)?;
        if self.has_pixels() {
            write!(f, " ({}x{} pixels)", self.pixel_width, self.pixel_height)?;
        }
        Ok(())
    }
}

/// Unique identifier for one interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Create a session ID from bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell sessions apart in logs
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
