//! Deep Zoom Image (DZI) URL grammar.
//!
//! ```text
//! dzi-xml   := "/dzi/" path
//! tile-url  := "/dzi/" path "/files/" level "/" col "_" row "." format
//! ```
//!
//! `path` may contain slashes. The first `/files/` segment is the separator
//! between the slide path and the tile address, never part of the path. The
//! formatter percent-encodes the path (slashes included), so a formatted URL
//! always parses back to the same tuple.

use std::borrow::Cow;

use crate::error::TileError;

/// Route prefix of the DZI endpoints.
pub const DZI_PREFIX: &str = "/dzi/";

/// Separator between the slide path and the tile address.
pub const FILES_SEPARATOR: &str = "/files/";

/// What a DZI URL asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DziTarget {
    /// The XML descriptor of a slide
    Descriptor { path: String },

    /// One tile
    Tile {
        path: String,
        level: u32,
        col: u32,
        row: u32,
        format: String,
    },
}

impl DziTarget {
    pub fn path(&self) -> &str {
        match self {
            DziTarget::Descriptor { path } | DziTarget::Tile { path, .. } => path,
        }
    }
}

/// Parse a raw request path (`/dzi/...`, still percent-encoded).
pub fn parse_dzi_url(raw: &str) -> Result<DziTarget, TileError> {
    let rest = raw
        .strip_prefix(DZI_PREFIX)
        .ok_or_else(|| TileError::BadRequest(format!("not a DZI url: {}", raw)))?;

    match rest.split_once(FILES_SEPARATOR) {
        None => Ok(DziTarget::Descriptor {
            path: decode_path(rest)?,
        }),
        Some((path, tile)) => {
            let path = decode_path(path)?;
            let (level, col, row, format) = parse_tile_address(tile)?;
            Ok(DziTarget::Tile {
                path,
                level,
                col,
                row,
                format,
            })
        }
    }
}

/// Parse `L/C_R.fmt`.
fn parse_tile_address(tile: &str) -> Result<(u32, u32, u32, String), TileError> {
    let bad = || {
        TileError::BadRequest(format!(
            "malformed tile address {:?}, expected <level>/<col>_<row>.<format>",
            tile
        ))
    };

    let segments: Vec<&str> = tile.split('/').collect();
    let [level, name] = segments.as_slice() else {
        return Err(bad());
    };

    let parts: Vec<&str> = name.split('.').collect();
    let [coords, format] = parts.as_slice() else {
        return Err(bad());
    };

    let coords: Vec<&str> = coords.split('_').collect();
    let [col, row] = coords.as_slice() else {
        return Err(bad());
    };

    // Plain decimal digits only: `u32::from_str` would also take a leading `+`
    let number = |what: &str, value: &str| {
        let invalid = || {
            TileError::BadRequest(format!("invalid {} {:?} in tile address {:?}", what, value, tile))
        };
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        value.parse::<u32>().map_err(|_| invalid())
    };

    Ok((
        number("level", *level)?,
        number("col", *col)?,
        number("row", *row)?,
        (*format).to_string(),
    ))
}

/// Percent-decode a slide path, keeping the raw text when it does not decode.
fn decode_path(raw: &str) -> Result<String, TileError> {
    let path = match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    };
    if path.is_empty() {
        return Err(TileError::BadRequest("empty slide path".to_string()));
    }
    Ok(path)
}

fn encode_path(path: &str) -> Cow<'_, str> {
    urlencoding::encode(path)
}

/// URL of a slide's descriptor.
pub fn descriptor_url(path: &str) -> String {
    format!("{}{}", DZI_PREFIX, encode_path(path))
}

/// URL of one tile.
pub fn tile_url(path: &str, level: u32, col: u32, row: u32, format: &str) -> String {
    format!(
        "{}{}{}{}/{}_{}.{}",
        DZI_PREFIX,
        encode_path(path),
        FILES_SEPARATOR,
        level,
        col,
        row,
        format
    )
}
