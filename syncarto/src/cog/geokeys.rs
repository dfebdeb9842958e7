//! GeoTIFF GeoKey directory parsing.
//!
//! The GeoKeyDirectory tag (34735) holds a header followed by one
//! `[KeyID, TIFFTagLocation, Count, Value]` entry per key:
//!
//! ```text
//! [version, revision, minor, key_count,
//!  key_id, location, count, value_or_offset, ...]
//! ```
//!
//! A location of 0 stores the value inline, otherwise the value is an offset
//! into the GeoDoubleParams (34736) or GeoAsciiParams (34737) tag.

use std::collections::BTreeMap;

use super::CogError;

/// GeoKeyDirectory tag.
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
/// GeoDoubleParams tag.
pub const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
/// GeoAsciiParams tag.
pub const GEO_ASCII_PARAMS_TAG: u16 = 34737;

pub const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// Code GeoTIFF uses for a user-defined (non-EPSG) system.
pub const USER_DEFINED: u16 = 32767;

/// A single GeoKey value.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoKeyValue {
    Short(Vec<u16>),
    Double(Vec<f64>),
    Ascii(String),
}

/// Parsed GeoKeys of one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeys {
    keys: BTreeMap<u16, GeoKeyValue>,
}

impl GeoKeys {
    /// Parse a GeoKey directory with its double and ASCII parameter tags.
    pub fn parse(directory: &[u16], doubles: &[f64], ascii: &str) -> Result<Self, CogError> {
        if directory.len() < 4 {
            return Err(CogError::Tiff(format!(
                "GeoKey directory too short ({} values)",
                directory.len()
            )));
        }
        let key_count = directory[3] as usize;
        let entries = &directory[4..];
        if entries.len() < key_count * 4 {
            return Err(CogError::Tiff(format!(
                "GeoKey directory declares {} keys but holds {}",
                key_count,
                entries.len() / 4
            )));
        }

        let mut keys = BTreeMap::new();
        for entry in entries.chunks_exact(4).take(key_count) {
            let (key, location, count, value) = (
                entry[0],
                entry[1],
                entry[2] as usize,
                entry[3] as usize,
            );
            let parsed = match location {
                0 => Some(GeoKeyValue::Short(vec![entry[3]])),
                GEO_KEY_DIRECTORY_TAG => directory
                    .get(value..value + count)
                    .map(|v| GeoKeyValue::Short(v.to_vec())),
                GEO_DOUBLE_PARAMS_TAG => doubles
                    .get(value..value + count)
                    .map(|v| GeoKeyValue::Double(v.to_vec())),
                GEO_ASCII_PARAMS_TAG => ascii.get(value..value + count).map(|v| {
                    GeoKeyValue::Ascii(v.trim_end_matches(['|', '\0']).to_string())
                }),
                _ => None,
            };
            match parsed {
                Some(parsed) => {
                    keys.insert(key, parsed);
                }
                None => tracing::warn!(key, location, "skipping unreadable GeoKey"),
            }
        }
        Ok(Self { keys })
    }

    pub fn get(&self, key: u16) -> Option<&GeoKeyValue> {
        self.keys.get(&key)
    }

    /// First short value of a key.
    pub fn short(&self, key: u16) -> Option<u16> {
        match self.keys.get(&key)? {
            GeoKeyValue::Short(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// EPSG code of the image's coordinate system.
    ///
    /// The projected system wins over the geographic one; missing, zero and
    /// user-defined codes are ignored.
    pub fn epsg_code(&self) -> Option<u16> {
        let usable = |code: u16| code != 0 && code != USER_DEFINED;
        self.short(PROJECTED_CS_TYPE_GEO_KEY)
            .filter(|&c| usable(c))
            .or_else(|| self.short(GEOGRAPHIC_TYPE_GEO_KEY).filter(|&c| usable(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(entries: &[[u16; 4]]) -> Vec<u16> {
        let mut dir = vec![1, 1, 0, entries.len() as u16];
        for e in entries {
            dir.extend_from_slice(e);
        }
        dir
    }

    #[test]
    fn test_projected_code_wins() {
        let dir = directory(&[
            [GT_MODEL_TYPE_GEO_KEY, 0, 1, 1],
            [GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, 4326],
            [PROJECTED_CS_TYPE_GEO_KEY, 0, 1, 32633],
        ]);
        let keys = GeoKeys::parse(&dir, &[], "").unwrap();
        assert_eq!(keys.epsg_code(), Some(32633));
        assert_eq!(keys.short(GT_MODEL_TYPE_GEO_KEY), Some(1));
    }

    #[test]
    fn test_geographic_fallback() {
        let dir = directory(&[[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, 4326]]);
        let keys = GeoKeys::parse(&dir, &[], "").unwrap();
        assert_eq!(keys.epsg_code(), Some(4326));
    }

    #[test]
    fn test_user_defined_code_is_absent() {
        let dir = directory(&[
            [PROJECTED_CS_TYPE_GEO_KEY, 0, 1, USER_DEFINED],
            [GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, 4269],
        ]);
        let keys = GeoKeys::parse(&dir, &[], "").unwrap();
        assert_eq!(keys.epsg_code(), Some(4269));

        let dir = directory(&[[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, USER_DEFINED]]);
        let keys = GeoKeys::parse(&dir, &[], "").unwrap();
        assert_eq!(keys.epsg_code(), None);
    }

    #[test]
    fn test_double_and_ascii_params() {
        let dir = directory(&[
            [1026, GEO_ASCII_PARAMS_TAG, 11, 0],
            [2057, GEO_DOUBLE_PARAMS_TAG, 1, 1],
        ]);
        let keys = GeoKeys::parse(&dir, &[1.0, 6378137.0], "WGS 84 / UTM|").unwrap();
        assert_eq!(
            keys.get(1026),
            Some(&GeoKeyValue::Ascii("WGS 84 / UT".to_string()))
        );
        assert_eq!(keys.get(2057), Some(&GeoKeyValue::Double(vec![6378137.0])));
    }

    #[test]
    fn test_truncated_directory_is_rejected() {
        assert!(GeoKeys::parse(&[1, 1, 0], &[], "").is_err());
        assert!(GeoKeys::parse(&[1, 1, 0, 2, 1024, 0, 1, 1], &[], "").is_err());
    }
}
