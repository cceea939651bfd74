use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::cache::{page_key, thumbnail_key, PageCache};
use crate::config::EditorConfig;
use crate::coords::SCREEN_DPI;
use crate::{PdfBackend, RenderOptions};

pub type PageImage = Arc<RgbaImage>;

/// Current bytes plus a counter bumped on every swap or invalidation. A render
/// only lands in a cache if the counter it started under is still current.
#[derive(Default)]
struct Snapshot {
    bytes: Option<Arc<[u8]>>,
    generation: u64,
}

/// Rasterises pages of the current byte snapshot through two LRU tiers: full
/// pages keyed by scale and rotation, and fixed-DPI thumbnails.
pub struct PageRenderer<B> {
    backend: Arc<B>,
    state: RwLock<Snapshot>,
    pages: PageCache<PageImage>,
    thumbnails: PageCache<PageImage>,
    thumbnail_dpi: f32,
}

impl<B: PdfBackend> PageRenderer<B> {
    pub fn new(backend: Arc<B>, config: &EditorConfig) -> Self {
        Self {
            backend,
            state: RwLock::new(Snapshot::default()),
            pages: PageCache::new(config.page_cache_capacity),
            thumbnails: PageCache::new(config.thumbnail_cache_capacity),
            thumbnail_dpi: config.thumbnail_dpi,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Swaps the snapshot and drops everything rendered from the old one.
    /// Renders already running finish on their own snapshot but are not cached.
    pub fn set_document(&self, bytes: Option<Arc<[u8]>>) {
        let mut state = self.state.write();
        state.bytes = bytes;
        state.generation += 1;
        self.pages.clear();
        self.thumbnails.clear();
    }

    pub fn snapshot(&self) -> Option<Arc<[u8]>> {
        self.state.read().bytes.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    #[instrument(skip(self))]
    pub fn render_page(&self, page_index: usize, scale: f32, rotation: u16) -> Option<PageImage> {
        let key = page_key(page_index, scale, rotation);
        let options = RenderOptions {
            dpi: Some(SCREEN_DPI * scale),
            rotation,
        };
        self.render_cached(&self.pages, key, page_index, options)
    }

    #[instrument(skip(self))]
    pub fn render_thumbnail(&self, page_index: usize, rotation: u16) -> Option<PageImage> {
        let key = thumbnail_key(page_index, rotation);
        let options = RenderOptions {
            dpi: Some(self.thumbnail_dpi),
            rotation,
        };
        self.render_cached(&self.thumbnails, key, page_index, options)
    }

    fn render_cached(
        &self,
        cache: &PageCache<PageImage>,
        key: String,
        page_index: usize,
        options: RenderOptions,
    ) -> Option<PageImage> {
        if let Some(image) = cache.try_get(&key) {
            debug!(%key, "cache hit");
            return Some(image);
        }
        debug!(%key, "cache miss");

        let (bytes, generation) = {
            let state = self.state.read();
            (state.bytes.clone()?, state.generation)
        };
        match self.backend.render_page(&bytes, page_index, options) {
            Ok(image) => {
                let image = Arc::new(image);
                let state = self.state.read();
                if state.generation == generation {
                    cache.set(key, Arc::clone(&image));
                } else {
                    debug!(%key, "snapshot changed during render, not caching");
                }
                Some(image)
            }
            Err(err) => {
                warn!(page_index, "render failed, retrying with default options: {err:#}");
                match self
                    .backend
                    .render_page(&bytes, page_index, RenderOptions::default())
                {
                    // Not cached: the key describes options this image was not rendered with.
                    Ok(image) => Some(Arc::new(image)),
                    Err(err) => {
                        warn!(page_index, "fallback render failed: {err:#}");
                        None
                    }
                }
            }
        }
    }

    /// Renders independent pages in parallel. Returns how many succeeded.
    pub fn prefetch_pages<F>(&self, indices: &[usize], scale: f32, rotation_for: F) -> usize
    where
        F: Fn(usize) -> u16 + Sync,
    {
        indices
            .par_iter()
            .filter(|&&index| self.render_page(index, scale, rotation_for(index)).is_some())
            .count()
    }

    /// Fills the thumbnail tier page by page until done or `cancel` is set.
    /// Returns how many pages were visited.
    pub fn warm_thumbnails<F>(&self, page_count: usize, rotation_for: F, cancel: &AtomicBool) -> usize
    where
        F: Fn(usize) -> u16,
    {
        let mut visited = 0;
        for index in 0..page_count {
            if cancel.load(Ordering::Relaxed) {
                debug!(visited, "thumbnail warm-up cancelled");
                break;
            }
            self.render_thumbnail(index, rotation_for(index));
            visited += 1;
        }
        visited
    }

    pub fn invalidate_page(&self, page_index: usize) {
        let mut state = self.state.write();
        state.generation += 1;
        self.pages.invalidate_page(page_index);
        self.thumbnails.invalidate_page(page_index);
    }

    /// Drops full-page renders only; thumbnails do not depend on zoom.
    pub fn clear_pages(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        self.pages.clear();
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        self.pages.clear();
        self.thumbnails.clear();
    }

    pub fn page_cache(&self) -> &PageCache<PageImage> {
        &self.pages
    }

    pub fn thumbnail_cache(&self) -> &PageCache<PageImage> {
        &self.thumbnails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::thread;

    use anyhow::Result;

    use crate::coords::MediaBox;
    use crate::testing::{MemoryBackend, MemoryDocument, MemoryFile, MemoryPage};
    use crate::DocumentSource;

    /// Holds the first render between two barriers so the caller can swap
    /// the document while it is in flight.
    struct GatedBackend {
        inner: MemoryBackend,
        armed: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl GatedBackend {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                armed: AtomicBool::new(true),
                entered: Barrier::new(2),
                release: Barrier::new(2),
            }
        }
    }

    impl PdfBackend for GatedBackend {
        type Document<'a> = MemoryDocument where Self: 'a;

        fn open(&self, source: &DocumentSource) -> Result<MemoryDocument> {
            self.inner.open(source)
        }

        fn create(&self) -> Result<MemoryDocument> {
            self.inner.create()
        }

        fn page_count(&self, bytes: &[u8]) -> Result<usize> {
            self.inner.page_count(bytes)
        }

        fn render_page(
            &self,
            bytes: &[u8],
            page_index: usize,
            options: RenderOptions,
        ) -> Result<RgbaImage> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.render_page(bytes, page_index, options)
        }
    }

    fn square_document() -> Arc<[u8]> {
        MemoryFile {
            pages: vec![MemoryPage {
                id: "square".to_string(),
                rotation: 0,
                media: MediaBox::new(0.0, 0.0, 300.0, 300.0),
                ops: Vec::new(),
            }],
            fonts: Vec::new(),
        }
        .to_bytes()
        .into()
    }

    fn renderer(backend: MemoryBackend, pages: usize) -> PageRenderer<MemoryBackend> {
        let renderer = PageRenderer::new(Arc::new(backend), &EditorConfig::default());
        renderer.set_document(Some(MemoryFile::with_pages(pages).to_bytes().into()));
        renderer
    }

    #[test]
    fn second_render_is_served_from_cache() {
        let renderer = renderer(MemoryBackend::new(), 2);
        let first = renderer.render_page(0, 1.0, 0).unwrap();
        let second = renderer.render_page(0, 1.0, 0).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(renderer.backend().render_count(), 1);
        assert_eq!((first.width(), first.height()), (816, 1056));
    }

    #[test]
    fn render_started_before_a_swap_is_not_cached() {
        let renderer = PageRenderer::new(Arc::new(GatedBackend::new()), &EditorConfig::default());
        renderer.set_document(Some(MemoryFile::with_pages(1).to_bytes().into()));

        let stale = thread::scope(|scope| {
            let in_flight = scope.spawn(|| renderer.render_page(0, 1.0, 0));
            renderer.backend().entered.wait();
            renderer.set_document(Some(square_document()));
            renderer.backend().release.wait();
            in_flight.join().unwrap()
        })
        .unwrap();

        assert_eq!((stale.width(), stale.height()), (816, 1056));
        assert_eq!(renderer.page_cache().count(), 0);

        let fresh = renderer.render_page(0, 1.0, 0).unwrap();
        assert_eq!((fresh.width(), fresh.height()), (400, 400));
        assert_eq!(renderer.page_cache().count(), 1);
    }

    #[test]
    fn invalidation_bumps_the_generation() {
        let renderer = renderer(MemoryBackend::new(), 2);
        let start = renderer.generation();
        renderer.invalidate_page(1);
        renderer.clear_pages();
        renderer.clear();
        assert_eq!(renderer.generation(), start + 3);
    }

    #[test]
    fn rotation_is_part_of_the_key() {
        let renderer = renderer(MemoryBackend::new(), 1);
        let upright = renderer.render_page(0, 0.75, 0).unwrap();
        let turned = renderer.render_page(0, 0.75, 90).unwrap();

        assert_eq!((upright.width(), upright.height()), (612, 792));
        assert_eq!((turned.width(), turned.height()), (792, 612));
        assert_eq!(renderer.page_cache().count(), 2);
    }

    #[test]
    fn thumbnails_use_their_own_tier() {
        let renderer = renderer(MemoryBackend::new(), 3);
        let thumb = renderer.render_thumbnail(1, 0).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (204, 264));
        assert_eq!(renderer.thumbnail_cache().count(), 1);
        assert_eq!(renderer.page_cache().count(), 0);

        renderer.render_page(1, 1.0, 0);
        renderer.clear_pages();
        assert_eq!(renderer.thumbnail_cache().count(), 1);
        assert_eq!(renderer.page_cache().count(), 0);
    }

    #[test]
    fn failed_render_falls_back_without_caching() {
        let renderer = renderer(MemoryBackend::failing_custom_renders(), 1);
        let image = renderer.render_page(0, 2.0, 0).unwrap();

        assert_eq!((image.width(), image.height()), (612, 792));
        assert_eq!(renderer.page_cache().count(), 0);
        assert_eq!(renderer.backend().render_count(), 2);
    }

    #[test]
    fn missing_page_or_document_yields_none() {
        let renderer = renderer(MemoryBackend::new(), 1);
        assert!(renderer.render_page(5, 1.0, 0).is_none());

        renderer.set_document(None);
        assert!(renderer.render_thumbnail(0, 0).is_none());
    }

    #[test]
    fn invalidate_page_spares_other_pages() {
        let renderer = renderer(MemoryBackend::new(), 3);
        renderer.render_page(0, 1.0, 0);
        renderer.render_page(1, 1.0, 0);
        renderer.render_thumbnail(1, 0);

        renderer.invalidate_page(1);
        assert_eq!(renderer.page_cache().count(), 1);
        assert_eq!(renderer.thumbnail_cache().count(), 0);
    }

    #[test]
    fn prefetch_renders_in_parallel() {
        let renderer = renderer(MemoryBackend::new(), 6);
        let rendered = renderer.prefetch_pages(&[0, 1, 2, 3, 9], 0.5, |_| 0);
        assert_eq!(rendered, 4);
        assert_eq!(renderer.page_cache().count(), 4);
    }

    #[test]
    fn warm_up_stops_when_cancelled() {
        let renderer = renderer(MemoryBackend::new(), 10);
        let cancel = AtomicBool::new(false);
        let visited = renderer.warm_thumbnails(
            10,
            |index| {
                if index == 3 {
                    cancel.store(true, Ordering::Relaxed);
                }
                0
            },
            &cancel,
        );
        assert_eq!(visited, 4);
        assert_eq!(renderer.thumbnail_cache().count(), 4);
    }
}
