//! Picks a concrete, embeddable font for a requested family and style.
//!
//! Resolution walks three tiers: fonts shipped next to the application, fonts
//! installed on the system, then a last-resort pair (bundled Noto Sans Thai,
//! system Tahoma). Text containing Thai steers every tier towards faces with
//! Thai coverage. If nothing can be embedded the document falls back to a
//! standard Helvetica face, which has no Thai glyphs.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FontConfig;
use crate::draw::{FontHandle, StandardFont};
use crate::PageDocument;

const THAI_BLOCK: std::ops::RangeInclusive<char> = '\u{0E00}'..='\u{0E7F}';

pub fn contains_thai(text: &str) -> bool {
    text.chars().any(|c| THAI_BLOCK.contains(&c))
}

/// Face index inside a four-face collection: regular, bold, italic,
/// bold-italic.
fn style_index(bold: bool, italic: bool) -> usize {
    match (bold, italic) {
        (false, false) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (true, true) => 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontTier {
    /// Application font matching the requested family.
    Bundled,
    /// Application default Thai font used for Thai text.
    BundledThai,
    /// Installed font matching the requested family.
    System,
    /// Installed font from the generic Thai-capable list.
    SystemThaiFallback,
    /// Bundled Noto Sans Thai or system Tahoma.
    LastResort,
    /// Non-embedded Helvetica.
    Standard,
}

impl FontTier {
    pub fn is_embedded(&self) -> bool {
        !matches!(self, FontTier::Standard)
    }
}

/// One face inside a font file; `index` only matters for collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontFace {
    pub path: PathBuf,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontCandidate {
    pub face: FontFace,
    pub tier: FontTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFont {
    pub handle: FontHandle,
    pub tier: FontTier,
    pub face: Option<FontFace>,
}

// Application-shipped faces, by [regular, bold, italic, bold-italic].
const BUNDLED_SARABUN: [&str; 4] = [
    "Sarabun-Regular.ttf",
    "Sarabun-Bold.ttf",
    "Sarabun-Italic.ttf",
    "Sarabun-BoldItalic.ttf",
];
const BUNDLED_NOTO_THAI: [&str; 4] = [
    "NotoSansThai-Regular.ttf",
    "NotoSansThai-Bold.ttf",
    "NotoSansThai-Regular.ttf",
    "NotoSansThai-Bold.ttf",
];

enum FaceFiles {
    /// One file per style.
    Separate([&'static str; 4]),
    /// A single collection with the four styles as faces 0..=3.
    Collection(&'static str),
}

impl FaceFiles {
    fn select(&self, bold: bool, italic: bool) -> (&'static str, u32) {
        let style = style_index(bold, italic);
        match self {
            FaceFiles::Separate(files) => (files[style], 0),
            FaceFiles::Collection(file) => (file, style as u32),
        }
    }
}

/// Thai-capable system families, matched by substring of the lowercased
/// request.
const THAI_SYSTEM_FAMILIES: &[(&str, FaceFiles)] = &[
    (
        "sarabun",
        FaceFiles::Separate([
            "THSarabunNew.ttf",
            "THSarabunNew Bold.ttf",
            "THSarabunNew Italic.ttf",
            "THSarabunNew BoldItalic.ttf",
        ]),
    ),
    ("angsana", FaceFiles::Collection("angsana.ttc")),
    ("cordia", FaceFiles::Collection("cordia.ttc")),
    ("browallia", FaceFiles::Collection("browalia.ttc")),
    (
        "leelawadee",
        FaceFiles::Separate(["LeelawUI.ttf", "LeelaUIb.ttf", "LeelawUI.ttf", "LeelaUIb.ttf"]),
    ),
    (
        "norasi",
        FaceFiles::Separate([
            "Norasi.ttf",
            "Norasi-Bold.ttf",
            "Norasi-Oblique.ttf",
            "Norasi-BoldOblique.ttf",
        ]),
    ),
    (
        "garuda",
        FaceFiles::Separate([
            "Garuda.ttf",
            "Garuda-Bold.ttf",
            "Garuda-Oblique.ttf",
            "Garuda-BoldOblique.ttf",
        ]),
    ),
    (
        "loma",
        FaceFiles::Separate([
            "Loma.ttf",
            "Loma-Bold.ttf",
            "Loma-Oblique.ttf",
            "Loma-BoldOblique.ttf",
        ]),
    ),
];

/// Generally Thai-capable faces tried in order when the requested family has
/// no Thai mapping installed.
const THAI_FALLBACKS: &[FaceFiles] = &[
    FaceFiles::Separate(["tahoma.ttf", "tahomabd.ttf", "tahoma.ttf", "tahomabd.ttf"]),
    FaceFiles::Separate(["segoeui.ttf", "segoeuib.ttf", "segoeuii.ttf", "segoeuiz.ttf"]),
    FaceFiles::Separate(["LeelawUI.ttf", "LeelaUIb.ttf", "LeelawUI.ttf", "LeelaUIb.ttf"]),
    FaceFiles::Separate(["leelawad.ttf", "leelawdb.ttf", "leelawad.ttf", "leelawdb.ttf"]),
    FaceFiles::Collection("cordia.ttc"),
    FaceFiles::Collection("angsana.ttc"),
    FaceFiles::Collection("browalia.ttc"),
    FaceFiles::Separate([
        "Garuda.ttf",
        "Garuda-Bold.ttf",
        "Garuda-Oblique.ttf",
        "Garuda-BoldOblique.ttf",
    ]),
    FaceFiles::Separate([
        "Loma.ttf",
        "Loma-Bold.ttf",
        "Loma-Oblique.ttf",
        "Loma-BoldOblique.ttf",
    ]),
];

/// Common Latin families. A family may appear more than once; entries are
/// tried in order (vendor file names first, metric-compatible clones after).
const LATIN_FAMILIES: &[(&str, [&str; 4])] = &[
    ("arial", ["arial.ttf", "arialbd.ttf", "ariali.ttf", "arialbi.ttf"]),
    (
        "arial",
        [
            "LiberationSans-Regular.ttf",
            "LiberationSans-Bold.ttf",
            "LiberationSans-Italic.ttf",
            "LiberationSans-BoldItalic.ttf",
        ],
    ),
    (
        "helvetica",
        [
            "LiberationSans-Regular.ttf",
            "LiberationSans-Bold.ttf",
            "LiberationSans-Italic.ttf",
            "LiberationSans-BoldItalic.ttf",
        ],
    ),
    ("times new roman", ["times.ttf", "timesbd.ttf", "timesi.ttf", "timesbi.ttf"]),
    (
        "times new roman",
        [
            "LiberationSerif-Regular.ttf",
            "LiberationSerif-Bold.ttf",
            "LiberationSerif-Italic.ttf",
            "LiberationSerif-BoldItalic.ttf",
        ],
    ),
    ("courier new", ["cour.ttf", "courbd.ttf", "couri.ttf", "courbi.ttf"]),
    (
        "courier new",
        [
            "LiberationMono-Regular.ttf",
            "LiberationMono-Bold.ttf",
            "LiberationMono-Italic.ttf",
            "LiberationMono-BoldItalic.ttf",
        ],
    ),
    ("verdana", ["verdana.ttf", "verdanab.ttf", "verdanai.ttf", "verdanaz.ttf"]),
    ("tahoma", ["tahoma.ttf", "tahomabd.ttf", "tahoma.ttf", "tahomabd.ttf"]),
    ("calibri", ["calibri.ttf", "calibrib.ttf", "calibrii.ttf", "calibriz.ttf"]),
    ("cambria", ["cambria.ttc", "cambriab.ttf", "cambriai.ttf", "cambriaz.ttf"]),
    ("segoe ui", ["segoeui.ttf", "segoeuib.ttf", "segoeuii.ttf", "segoeuiz.ttf"]),
    ("georgia", ["georgia.ttf", "georgiab.ttf", "georgiai.ttf", "georgiaz.ttf"]),
    ("trebuchet ms", ["trebuc.ttf", "trebucbd.ttf", "trebucit.ttf", "trebucbi.ttf"]),
    (
        "dejavu sans",
        [
            "DejaVuSans.ttf",
            "DejaVuSans-Bold.ttf",
            "DejaVuSans-Oblique.ttf",
            "DejaVuSans-BoldOblique.ttf",
        ],
    ),
    (
        "liberation sans",
        [
            "LiberationSans-Regular.ttf",
            "LiberationSans-Bold.ttf",
            "LiberationSans-Italic.ttf",
            "LiberationSans-BoldItalic.ttf",
        ],
    ),
];

const DEFAULT_LATIN_FAMILIES: &[&str] = &["arial", "liberation sans", "dejavu sans"];

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// Font files found under the system font directories, keyed by lowercased
/// file name. Built once and never rescanned.
#[derive(Debug, Default)]
pub struct SystemFontIndex {
    files: HashMap<String, PathBuf>,
}

impl SystemFontIndex {
    pub fn scan(dirs: &[PathBuf]) -> Self {
        let mut files = HashMap::new();
        for dir in dirs {
            for entry in WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let is_font = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FONT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if !is_font {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_lowercase();
                files.entry(name).or_insert_with(|| path.to_path_buf());
            }
        }
        info!(fonts = files.len(), "indexed system fonts");
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn find(&self, file_name: &str) -> Option<&Path> {
        self.files
            .get(&file_name.to_lowercase())
            .map(PathBuf::as_path)
    }

    /// Best file whose name contains the family, preferring names whose
    /// bold/italic markers agree with the request.
    pub fn fuzzy(&self, family: &str, bold: bool, italic: bool) -> Option<&Path> {
        let needle = normalize_family(family);
        if needle.is_empty() {
            return None;
        }
        self.files
            .iter()
            .filter(|(name, _)| normalize_family(stem(name)).contains(&needle))
            .max_by(|(a, _), (b, _)| {
                let score_a = style_score(a, bold, italic);
                let score_b = style_score(b, bold, italic);
                // Shorter names win ties ("arial.ttf" over "arialnarrow.ttf").
                score_a.cmp(&score_b).then_with(|| b.len().cmp(&a.len()))
            })
            .map(|(_, path)| path.as_path())
    }
}

fn stem(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

fn normalize_family(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn style_score(name: &str, bold: bool, italic: bool) -> u8 {
    let has_bold = name.contains("bold") || name.contains("bd");
    let has_italic = name.contains("italic") || name.contains("oblique");
    let mut score = 0;
    if has_bold == bold {
        score += 2;
    }
    if has_italic == italic {
        score += 1;
    }
    score
}

/// Process-lifetime resolver. The system font index is built lazily on first
/// use.
pub struct FontResolver {
    bundled_dir: Option<PathBuf>,
    system_dirs: Vec<PathBuf>,
    system_fonts: OnceCell<SystemFontIndex>,
}

static SHARED: Lazy<Arc<FontResolver>> =
    Lazy::new(|| Arc::new(FontResolver::new(&FontConfig::default())));

impl FontResolver {
    pub fn new(config: &FontConfig) -> Self {
        Self {
            bundled_dir: config.bundled_dir(),
            system_dirs: config.system_dirs(),
            system_fonts: OnceCell::new(),
        }
    }

    /// Resolver for the default font locations, shared by the whole process.
    pub fn shared() -> Arc<FontResolver> {
        Arc::clone(&SHARED)
    }

    /// The shared resolver unless `config` points somewhere else.
    pub fn for_config(config: &FontConfig) -> Arc<FontResolver> {
        if config.bundled_dir.is_none() && config.system_dirs.is_none() {
            Self::shared()
        } else {
            Arc::new(Self::new(config))
        }
    }

    pub fn system_fonts(&self) -> &SystemFontIndex {
        self.system_fonts
            .get_or_init(|| SystemFontIndex::scan(&self.system_dirs))
    }

    fn bundled(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.bundled_dir.as_ref()?.join(file_name);
        path.is_file().then_some(path)
    }

    fn bundled_face(&self, files: &[&str; 4], bold: bool, italic: bool) -> Option<FontFace> {
        self.bundled(files[style_index(bold, italic)])
            .map(|path| FontFace { path, index: 0 })
    }

    fn system_face(&self, files: &FaceFiles, bold: bool, italic: bool) -> Option<FontFace> {
        let (name, index) = files.select(bold, italic);
        self.system_fonts().find(name).map(|path| FontFace {
            path: path.to_path_buf(),
            index,
        })
    }

    /// Ordered list of faces to try. The standard-font fallback is implied
    /// after the last entry.
    pub fn candidates(
        &self,
        family: &str,
        bold: bool,
        italic: bool,
        sample: Option<&str>,
    ) -> Vec<FontCandidate> {
        let needs_thai = sample.map(contains_thai).unwrap_or(false);
        let family_lower = family.to_lowercase();
        let mut out: Vec<FontCandidate> = Vec::new();
        let mut push = |face: Option<FontFace>, tier: FontTier| {
            if let Some(face) = face {
                if !out.iter().any(|c| c.face == face) {
                    out.push(FontCandidate { face, tier });
                }
            }
        };

        // Tier 1: application fonts.
        if family_lower.contains("sarabun") {
            push(self.bundled_face(&BUNDLED_SARABUN, bold, italic), FontTier::Bundled);
        } else if family_lower.contains("noto") && family_lower.contains("thai") {
            push(self.bundled_face(&BUNDLED_NOTO_THAI, bold, italic), FontTier::Bundled);
        }
        if needs_thai {
            push(
                self.bundled_face(&BUNDLED_SARABUN, bold, italic),
                FontTier::BundledThai,
            );
        }

        // Tier 2: installed fonts.
        if needs_thai {
            for (key, files) in THAI_SYSTEM_FAMILIES {
                if family_lower.contains(key) {
                    push(self.system_face(files, bold, italic), FontTier::System);
                }
            }
            for files in THAI_FALLBACKS {
                push(
                    self.system_face(files, bold, italic),
                    FontTier::SystemThaiFallback,
                );
            }
        } else {
            let mut matched = false;
            for (name, files) in LATIN_FAMILIES {
                if *name == family_lower.trim() {
                    let face = self.system_face(&FaceFiles::Separate(*files), bold, italic);
                    matched |= face.is_some();
                    push(face, FontTier::System);
                }
            }
            if !matched {
                let fuzzy = self
                    .system_fonts()
                    .fuzzy(family, bold, italic)
                    .map(|path| FontFace {
                        path: path.to_path_buf(),
                        index: 0,
                    });
                matched = fuzzy.is_some();
                push(fuzzy, FontTier::System);
            }
            if !matched {
                for default in DEFAULT_LATIN_FAMILIES {
                    for (name, files) in LATIN_FAMILIES {
                        if name == default {
                            push(
                                self.system_face(&FaceFiles::Separate(*files), bold, italic),
                                FontTier::System,
                            );
                        }
                    }
                }
            }
        }

        // Tier 3: last resort.
        push(
            self.bundled(BUNDLED_NOTO_THAI[0])
                .map(|path| FontFace { path, index: 0 }),
            FontTier::LastResort,
        );
        push(
            self.system_fonts()
                .find("tahoma.ttf")
                .map(|path| FontFace {
                    path: path.to_path_buf(),
                    index: 0,
                }),
            FontTier::LastResort,
        );

        out
    }
}

/// Fonts already embedded in one document, so repeated requests reuse the
/// same handle.
pub struct DocumentFonts<'r> {
    resolver: &'r FontResolver,
    embedded: HashMap<FontFace, ResolvedFont>,
    standard: HashMap<StandardFont, FontHandle>,
    failed: Vec<FontFace>,
}

impl<'r> DocumentFonts<'r> {
    pub fn new(resolver: &'r FontResolver) -> Self {
        Self {
            resolver,
            embedded: HashMap::new(),
            standard: HashMap::new(),
            failed: Vec::new(),
        }
    }

    /// Never fails: a face that cannot be read or embedded moves on to the
    /// next candidate, and the standard font closes the chain.
    pub fn resolve<D: PageDocument>(
        &mut self,
        document: &mut D,
        family: &str,
        bold: bool,
        italic: bool,
        sample: Option<&str>,
    ) -> ResolvedFont {
        for candidate in self.resolver.candidates(family, bold, italic, sample) {
            if let Some(resolved) = self.embedded.get(&candidate.face) {
                return resolved.clone();
            }
            if self.failed.contains(&candidate.face) {
                continue;
            }
            match load_face(&candidate.face).and_then(|data| document.load_font(&data)) {
                Ok(handle) => {
                    debug!(
                        family,
                        path = %candidate.face.path.display(),
                        index = candidate.face.index,
                        tier = ?candidate.tier,
                        "embedded font"
                    );
                    let resolved = ResolvedFont {
                        handle,
                        tier: candidate.tier,
                        face: Some(candidate.face.clone()),
                    };
                    self.embedded.insert(candidate.face, resolved.clone());
                    return resolved;
                }
                Err(err) => {
                    warn!(
                        family,
                        path = %candidate.face.path.display(),
                        "font could not be embedded, trying next: {err:#}"
                    );
                    self.failed.push(candidate.face);
                }
            }
        }

        let standard = StandardFont::for_style(bold, italic);
        let handle = match self.standard.get(&standard) {
            Some(handle) => *handle,
            None => {
                warn!(
                    family,
                    fallback = standard.name(),
                    thai = sample.map(contains_thai).unwrap_or(false),
                    "no embeddable font found, using standard font without Thai glyphs"
                );
                let handle = document.standard_font(standard);
                self.standard.insert(standard, handle);
                handle
            }
        };
        ResolvedFont {
            handle,
            tier: FontTier::Standard,
            face: None,
        }
    }
}

fn load_face(face: &FontFace) -> Result<Vec<u8>> {
    let data = fs::read(&face.path)
        .with_context(|| format!("failed to read font {:?}", face.path))?;
    if data.is_empty() {
        bail!("font file {:?} is empty", face.path);
    }
    if is_collection(&data) {
        return extract_collection_face(&data, face.index)
            .with_context(|| format!("failed to extract face {} of {:?}", face.index, face.path));
    }
    Ok(data)
}

fn is_collection(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == b"ttcf"
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(BigEndian::read_u32)
        .ok_or_else(|| anyhow!("truncated font data at offset {offset}"))
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(BigEndian::read_u16)
        .ok_or_else(|| anyhow!("truncated font data at offset {offset}"))
}

/// Copies one face of a TrueType collection into a standalone sfnt file,
/// rewriting table offsets.
pub fn extract_collection_face(data: &[u8], index: u32) -> Result<Vec<u8>> {
    if !is_collection(data) {
        return Ok(data.to_vec());
    }
    let num_fonts = read_u32(data, 8)?;
    if index >= num_fonts {
        bail!("collection has {num_fonts} faces, face {index} requested");
    }
    let face_offset = read_u32(data, 12 + 4 * index as usize)? as usize;
    let sfnt_version = read_u32(data, face_offset)?;
    let num_tables = read_u16(data, face_offset + 4)?;

    struct Table {
        tag: u32,
        checksum: u32,
        offset: usize,
        length: usize,
    }
    let mut tables = Vec::with_capacity(num_tables as usize);
    for i in 0..num_tables as usize {
        let record = face_offset + 12 + 16 * i;
        let table = Table {
            tag: read_u32(data, record)?,
            checksum: read_u32(data, record + 4)?,
            offset: read_u32(data, record + 8)? as usize,
            length: read_u32(data, record + 12)? as usize,
        };
        if table.offset.checked_add(table.length).map_or(true, |end| end > data.len()) {
            bail!("table {:08x} lies outside the collection", table.tag);
        }
        tables.push(table);
    }

    let header_len = 12 + 16 * tables.len();
    let mut out = Vec::with_capacity(header_len + tables.iter().map(|t| t.length + 3).sum::<usize>());
    out.write_u32::<BigEndian>(sfnt_version)?;
    out.write_u16::<BigEndian>(num_tables)?;
    // searchRange, entrySelector and rangeShift are derived from the table
    // count; past 4095 tables they no longer fit a u16 and saturate.
    let count = u32::from(num_tables);
    let entry_selector = if count == 0 { 0 } else { 31 - count.leading_zeros() };
    let search_range = (1u32 << entry_selector) * 16;
    out.write_u16::<BigEndian>(saturate_u16(search_range))?;
    out.write_u16::<BigEndian>(saturate_u16(entry_selector))?;
    out.write_u16::<BigEndian>(saturate_u16((count * 16).saturating_sub(search_range)))?;

    let mut cursor = header_len;
    for table in &tables {
        out.write_u32::<BigEndian>(table.tag)?;
        out.write_u32::<BigEndian>(table.checksum)?;
        out.write_u32::<BigEndian>(cursor as u32)?;
        out.write_u32::<BigEndian>(table.length as u32)?;
        cursor += padded(table.length);
    }
    for table in &tables {
        out.write_all(&data[table.offset..table.offset + table.length])?;
        out.resize(out.len() + padded(table.length) - table.length, 0);
    }
    Ok(out)
}

fn padded(length: usize) -> usize {
    (length + 3) & !3
}

fn saturate_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::{tempdir, TempDir};

    use crate::testing::MemoryBackend;
    use crate::PdfBackend;

    fn resolver(bundled: Option<&Path>, system: &[&Path]) -> FontResolver {
        FontResolver::new(&FontConfig {
            bundled_dir: bundled.map(Path::to_path_buf),
            system_dirs: Some(system.iter().map(|p| p.to_path_buf()).collect()),
        })
    }

    fn write_font(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn detects_thai_code_points() {
        assert!(contains_thai("สวัสดี"));
        assert!(contains_thai("price: ๕ baht"));
        assert!(!contains_thai("hello"));
        assert!(!contains_thai("日本語 🎉"));
    }

    #[test]
    fn resolves_standard_font_when_nothing_is_installed() {
        let empty = tempdir().unwrap();
        let resolver = resolver(None, &[empty.path()]);
        let backend = MemoryBackend::new();
        let mut document = backend.create().unwrap();
        let mut fonts = DocumentFonts::new(&resolver);

        for (family, bold, italic, sample) in [
            ("Arial", false, false, Some("plain")),
            ("TH Sarabun New", true, false, Some("ภาษาไทย")),
            ("Nonexistent", true, true, Some("🎉 emoji")),
            ("", false, true, None),
        ] {
            let resolved = fonts.resolve(&mut document, family, bold, italic, sample);
            assert_eq!(resolved.tier, FontTier::Standard);
            assert!(resolved.face.is_none());
        }
        assert_eq!(document.font_names().len(), 4);
    }

    #[test]
    fn bundled_sarabun_variant_follows_style() {
        let bundled = tempdir().unwrap();
        write_font(&bundled, "Sarabun-Regular.ttf", b"regular");
        write_font(&bundled, "Sarabun-BoldItalic.ttf", b"bold-italic");
        let empty = tempdir().unwrap();
        let resolver = resolver(Some(bundled.path()), &[empty.path()]);

        let candidates = resolver.candidates("Sarabun", true, true, None);
        assert_eq!(candidates[0].tier, FontTier::Bundled);
        assert!(candidates[0].face.path.ends_with("Sarabun-BoldItalic.ttf"));
    }

    #[test]
    fn thai_text_prefers_bundled_default_over_system() {
        let bundled = tempdir().unwrap();
        write_font(&bundled, "Sarabun-Regular.ttf", b"sarabun");
        let system = tempdir().unwrap();
        write_font(&system, "tahoma.ttf", b"tahoma");
        let resolver = resolver(Some(bundled.path()), &[system.path()]);

        let candidates = resolver.candidates("Arial", false, false, Some("ทดสอบ"));
        let tiers: Vec<FontTier> = candidates.iter().map(|c| c.tier).collect();
        assert_eq!(tiers, vec![FontTier::BundledThai, FontTier::SystemThaiFallback]);
    }

    #[test]
    fn thai_family_maps_to_collection_face() {
        let system = tempdir().unwrap();
        write_font(&system, "ANGSANA.TTC", b"ttcf");
        let resolver = resolver(None, &[system.path()]);

        let candidates = resolver.candidates("AngsanaUPC", false, true, Some("ก"));
        assert_eq!(candidates[0].tier, FontTier::System);
        assert_eq!(candidates[0].face.index, 2);
    }

    #[test]
    fn latin_family_uses_table_then_fuzzy_then_default() {
        let system = tempdir().unwrap();
        write_font(&system, "timesbd.ttf", b"times bold");
        write_font(&system, "Roboto-Regular.ttf", b"roboto");
        write_font(&system, "Roboto-Bold.ttf", b"roboto bold");
        write_font(&system, "LiberationSans-Regular.ttf", b"liberation");
        let resolver = resolver(None, &[system.path()]);

        let times = resolver.candidates("Times New Roman", true, false, None);
        assert!(times[0].face.path.ends_with("timesbd.ttf"));

        let roboto = resolver.candidates("Roboto", true, false, None);
        assert!(roboto[0].face.path.ends_with("Roboto-Bold.ttf"));

        let unknown = resolver.candidates("Comic Whatever", false, false, None);
        assert!(unknown[0]
            .face
            .path
            .ends_with("LiberationSans-Regular.ttf"));
    }

    #[test]
    fn unloadable_face_falls_through_to_next_tier() {
        let bundled = tempdir().unwrap();
        write_font(&bundled, "Sarabun-Regular.ttf", b"");
        write_font(&bundled, "NotoSansThai-Regular.ttf", b"noto");
        let empty = tempdir().unwrap();
        let resolver = resolver(Some(bundled.path()), &[empty.path()]);
        let backend = MemoryBackend::new();
        let mut document = backend.create().unwrap();
        let mut fonts = DocumentFonts::new(&resolver);

        let resolved = fonts.resolve(&mut document, "Sarabun", false, false, Some("ไทย"));
        assert_eq!(resolved.tier, FontTier::LastResort);

        let again = fonts.resolve(&mut document, "Sarabun", false, false, Some("ไทย"));
        assert_eq!(again.handle, resolved.handle);
        assert_eq!(document.font_names().len(), 1);
    }

    #[test]
    fn system_index_is_built_once() {
        let system = tempdir().unwrap();
        let resolver = resolver(None, &[system.path()]);
        assert!(resolver.system_fonts().is_empty());

        write_font(&system, "arial.ttf", b"arial");
        // Cached for the process lifetime, a later install is not seen.
        assert!(resolver.system_fonts().find("arial.ttf").is_none());
    }

    fn collection_with_two_faces() -> Vec<u8> {
        // ttcf header, two faces with one table each.
        let mut data = Vec::new();
        data.extend_from_slice(b"ttcf");
        data.write_u32::<BigEndian>(0x0001_0000).unwrap();
        data.write_u32::<BigEndian>(2).unwrap();
        data.write_u32::<BigEndian>(20).unwrap();
        data.write_u32::<BigEndian>(48).unwrap();
        for (table_offset, length) in [(76u32, 3u32), (80, 4)] {
            data.write_u32::<BigEndian>(0x0001_0000).unwrap();
            data.write_u16::<BigEndian>(1).unwrap();
            data.write_u16::<BigEndian>(16).unwrap();
            data.write_u16::<BigEndian>(0).unwrap();
            data.write_u16::<BigEndian>(0).unwrap();
            data.extend_from_slice(b"name");
            data.write_u32::<BigEndian>(0).unwrap();
            data.write_u32::<BigEndian>(table_offset).unwrap();
            data.write_u32::<BigEndian>(length).unwrap();
        }
        data.extend_from_slice(b"abc\0");
        data.extend_from_slice(b"wxyz");
        data
    }

    #[test]
    fn extracts_requested_collection_face() {
        let data = collection_with_two_faces();
        let face = extract_collection_face(&data, 1).unwrap();

        assert_eq!(BigEndian::read_u32(&face[0..4]), 0x0001_0000);
        assert_eq!(BigEndian::read_u16(&face[4..6]), 1);
        assert_eq!(&face[12..16], b"name");
        assert_eq!(BigEndian::read_u32(&face[20..24]), 28);
        assert_eq!(&face[28..32], b"wxyz");

        let first = extract_collection_face(&data, 0).unwrap();
        assert_eq!(&first[28..31], b"abc");
        assert_eq!(first.len(), 32);

        assert!(extract_collection_face(&data, 2).is_err());
    }

    #[test]
    fn collection_face_with_thousands_of_tables() {
        let num_tables: u16 = 4096;
        let face_offset = 16u32;
        let mut data = Vec::new();
        data.extend_from_slice(b"ttcf");
        data.write_u32::<BigEndian>(0x0001_0000).unwrap();
        data.write_u32::<BigEndian>(1).unwrap();
        data.write_u32::<BigEndian>(face_offset).unwrap();
        data.write_u32::<BigEndian>(0x0001_0000).unwrap();
        data.write_u16::<BigEndian>(num_tables).unwrap();
        data.extend_from_slice(&[0; 6]);
        for tag in 0..u32::from(num_tables) {
            data.write_u32::<BigEndian>(tag).unwrap();
            data.write_u32::<BigEndian>(0).unwrap();
            data.write_u32::<BigEndian>(0).unwrap();
            data.write_u32::<BigEndian>(0).unwrap();
        }

        let face = extract_collection_face(&data, 0).unwrap();
        assert_eq!(face.len(), 12 + 16 * usize::from(num_tables));
        assert_eq!(BigEndian::read_u16(&face[4..6]), num_tables);
        assert_eq!(BigEndian::read_u16(&face[6..8]), u16::MAX);
        assert_eq!(BigEndian::read_u16(&face[8..10]), 12);
        assert_eq!(BigEndian::read_u16(&face[10..12]), 0);
    }

    #[test]
    fn plain_font_passes_through_extraction() {
        let plain = b"\x00\x01\x00\x00rest".to_vec();
        assert_eq!(extract_collection_face(&plain, 3).unwrap(), plain);
    }
}
