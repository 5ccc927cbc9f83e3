//! Font resources for lettering.
//!
//! The font file is chosen outside the pipeline (per chapter); this module
//! only loads it, or falls back to an installed system font (found with
//! fontdb) when the selection is absent or unreadable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use tracing::{debug, info, warn};
use ttf_parser::Face;

use super::layout::TextMeasure;
use crate::error::{Error, Result};

/// Families preferred, in order, when no font was selected. Any other
/// installed face that covers Latin text is used after these.
pub const FALLBACK_FAMILIES: &[&str] = &["DejaVu Sans", "Liberation Sans", "Noto Sans", "Arial"];

/// System fonts are scanned once per process.
static SYSTEM_FONT: LazyLock<Option<FontResource>> = LazyLock::new(discover_system_font);

fn discover_system_font() -> Option<FontResource> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    debug!("fontdb found {} system faces", db.len());

    let preferred = FALLBACK_FAMILIES.iter().filter_map(|&name| {
        db.query(&fontdb::Query {
            families: &[fontdb::Family::Name(name)],
            ..Default::default()
        })
    });
    let sans = db.query(&fontdb::Query {
        families: &[fontdb::Family::SansSerif],
        ..Default::default()
    });
    let any = db.faces().map(|face| face.id);

    let font = preferred.chain(sans).chain(any).find_map(|id| {
        let info = db.face(id)?;
        let path = match &info.source {
            fontdb::Source::File(path) | fontdb::Source::SharedFile(path, _) => path.clone(),
            fontdb::Source::Binary(_) => PathBuf::from(&info.post_script_name),
        };
        let (data, index) = db.with_face_data(id, |data, index| (data.to_vec(), index))?;
        match FontResource::from_collection(data, index, path) {
            Ok(font) if font.covers_latin() => Some(font),
            Ok(_) => None,
            Err(e) => {
                debug!("Skipping system font: {}", e);
                None
            }
        }
    });
    match &font {
        Some(font) => info!("Default lettering font: {}", font.path.display()),
        None => warn!("No usable system font found"),
    }
    font
}

/// A parsed-once TrueType/OpenType font file.
#[derive(Clone)]
pub struct FontResource {
    data: Arc<Vec<u8>>,
    index: u32,
    path: PathBuf,
    units_per_em: f32,
    ascender: f32,
    descender: f32,
    line_gap: f32,
}

impl FontResource {
    /// Load and validate a font file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::ResourceMissing(format!("font {}: {e}", path.display()))
        })?;
        Self::from_bytes(data, path.to_path_buf())
    }

    pub fn from_bytes(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        Self::from_collection(data, 0, path)
    }

    /// Face `index` of a font file or collection.
    pub fn from_collection(data: Vec<u8>, index: u32, path: PathBuf) -> Result<Self> {
        let face = Face::parse(&data, index).map_err(|e| Error::FontInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let units_per_em = f32::from(face.units_per_em());
        let ascender = f32::from(face.ascender());
        let descender = f32::from(face.descender());
        let line_gap = f32::from(face.line_gap());

        Ok(Self {
            data: Arc::new(data),
            index,
            path,
            units_per_em,
            ascender,
            descender,
            line_gap,
        })
    }

    /// The installed font used when none is selected: the first of
    /// [`FALLBACK_FAMILIES`], the system sans-serif, or else any installed
    /// face with Latin glyphs.
    pub fn system_default() -> Option<Self> {
        SYSTEM_FONT.clone()
    }

    fn covers_latin(&self) -> bool {
        self.face().is_ok_and(|face| "Aa".chars().all(|c| face.glyph_index(c).is_some()))
    }

    /// The selected font, or the system default when the selection is absent
    /// or cannot be loaded. `None` means no font is available at all.
    pub fn resolve(selection: Option<&Path>) -> Option<Self> {
        if let Some(path) = selection {
            match Self::load(path) {
                Ok(font) => return Some(font),
                Err(e) => warn!("Selected font unusable ({}), falling back to system font", e),
            }
        }

        let fallback = Self::system_default();
        if fallback.is_none() {
            warn!("No usable font found; translated text will not be drawn");
        }
        fallback
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn face(&self) -> Result<Face<'_>> {
        Face::parse(&self.data, self.index).map_err(|e| Error::FontInvalid {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Pixels per font unit at `font_size`.
    pub fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em
    }

    /// Distance from the top of a line box to its baseline.
    pub fn ascent_px(&self, font_size: f32) -> f32 {
        self.ascender * self.scale(font_size)
    }
}

impl TextMeasure for FontResource {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = self.face() else {
            return 0.0;
        };
        let units: u32 = text
            .chars()
            .map(|c| {
                face.glyph_index(c)
                    .and_then(|g| face.glyph_hor_advance(g))
                    .map_or(0, u32::from)
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let units = units as f32;
        units * self.scale(font_size)
    }

    fn line_height(&self, font_size: f32) -> f32 {
        (self.ascender - self.descender + self.line_gap) * self.scale(font_size)
    }
}

impl fmt::Debug for FontResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontResource")
            .field("path", &self.path)
            .field("units_per_em", &self.units_per_em)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_font_is_resource_missing() {
        let err = FontResource::load(Path::new("/nonexistent/font.ttf")).err();
        assert!(matches!(err, Some(Error::ResourceMissing(_))));
    }

    #[test]
    fn test_garbage_font_is_invalid() {
        let err = FontResource::from_bytes(b"not a font".to_vec(), PathBuf::from("x.ttf")).err();
        assert!(matches!(err, Some(Error::FontInvalid { .. })));
    }

    #[test]
    fn test_resolve_falls_back_from_bad_selection() {
        // Same answer as having no selection at all.
        let fallback = FontResource::resolve(Some(Path::new("/nonexistent/font.ttf")));
        let default = FontResource::system_default();
        assert_eq!(fallback.map(|f| f.path), default.map(|f| f.path));
    }

    #[test]
    fn test_installed_fonts_always_yield_a_default() {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let latin = db.faces().any(|face| {
            db.with_face_data(face.id, |data, index| {
                Face::parse(data, index).is_ok_and(|f| f.glyph_index('A').is_some() && f.glyph_index('a').is_some())
            })
            .unwrap_or(false)
        });
        assert_eq!(FontResource::resolve(None).is_some(), latin);
    }

    #[test]
    fn test_system_font_measures_text() {
        // Hosts with no fonts installed at all skip this check.
        let Some(font) = FontResource::system_default() else {
            return;
        };
        let narrow = font.text_width("i", 20.0);
        let wide = font.text_width("iiii", 20.0);
        assert!(wide > narrow);
        assert!(font.line_height(20.0) > 0.0);
    }
}
