//! Image sources for `drawImage` and `createPattern`.
//!
//! `data:` URLs decode on the spot. `http(s)://` and `file://` sources load in
//! the background; until they finish, lookups report the image as not ready
//! and drawing it is a no-op. Local files are only read when the backend
//! limits allow it.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use canvas_relay_core::SurfaceError;
use image::ImageReader;
use lru::LruCache;
use tiny_skia::{ColorU8, Pixmap};
use tracing::{debug, warn};

use crate::{BackendLimits, SurfaceResult};

/// Decoded images kept per backend.
const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

#[derive(Clone)]
enum ImageState {
    Loading,
    Ready(Arc<Pixmap>),
    Failed(String),
}

/// Recently used images keyed by source URL, shared by all surfaces of a
/// backend.
///
/// A failed load is reported once and then forgotten, so the next lookup of
/// the same URL tries again.
#[derive(Clone)]
pub struct ImageCache {
    entries: Arc<Mutex<LruCache<String, ImageState>>>,
    limits: BackendLimits,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(BackendLimits::default())
    }
}

impl ImageCache {
    pub fn new(limits: BackendLimits) -> Self {
        Self::with_capacity(limits, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(limits: BackendLimits, capacity: NonZeroUsize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            limits,
        }
    }

    pub fn limits(&self) -> BackendLimits {
        self.limits
    }

    /// Look up `url`, starting a load on first use.
    ///
    /// Returns `Ok(None)` while a background load is still running.
    pub fn get(&self, url: &str) -> SurfaceResult<Option<Arc<Pixmap>>> {
        if let Some(state) = self.lookup(url) {
            return resolve_state(url, state);
        }

        let state = if url.starts_with("data:") {
            match decode_data_url(url, self.limits) {
                Ok(pixmap) => {
                    let state = ImageState::Ready(Arc::new(pixmap));
                    self.set(url, state.clone());
                    state
                }
                Err(reason) => ImageState::Failed(reason),
            }
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.spawn_http(url)
        } else if let Some(path) = url.strip_prefix("file://") {
            if !self.limits.allow_file_images {
                return Err(SurfaceError::UnsupportedSource(format!(
                    "{} (file images are disabled on this host)",
                    truncate_url(url)
                )));
            }
            self.spawn_file(url, path)
        } else {
            return Err(SurfaceError::UnsupportedSource(truncate_url(url)));
        };
        resolve_state(url, state)
    }

    /// Current state for `url`. Failed entries are removed as they are read.
    fn lookup(&self, url: &str) -> Option<ImageState> {
        let mut entries = self.entries.lock().ok()?;
        let state = entries.get(url)?.clone();
        if matches!(state, ImageState::Failed(_)) {
            entries.pop(url);
        }
        Some(state)
    }

    fn set(&self, url: &str, state: ImageState) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(url.to_string(), state);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn finish(&self, url: &str, result: Result<Pixmap, String>) {
        match result {
            Ok(pixmap) => {
                debug!(url, width = pixmap.width(), height = pixmap.height(), "Image loaded");
                self.set(url, ImageState::Ready(Arc::new(pixmap)));
            }
            Err(reason) => {
                warn!(url, %reason, "Image load failed");
                self.set(url, ImageState::Failed(reason));
            }
        }
    }

    fn spawn_http(&self, url: &str) -> ImageState {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return ImageState::Failed("no async runtime available for remote images".into());
        };
        self.set(url, ImageState::Loading);
        let cache = self.clone();
        let url = url.to_string();
        handle.spawn(async move {
            let result = fetch(&url, cache.limits).await;
            cache.finish(&url, result);
        });
        ImageState::Loading
    }

    fn spawn_file(&self, url: &str, path: &str) -> ImageState {
        self.set(url, ImageState::Loading);
        let cache = self.clone();
        let url = url.to_string();
        let path = path.to_string();
        let load = move || {
            let result = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| decode_image(&bytes, cache.limits));
            cache.finish(&url, result);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(load);
            }
            Err(_) => {
                std::thread::spawn(load);
            }
        }
        ImageState::Loading
    }
}

fn resolve_state(url: &str, state: ImageState) -> SurfaceResult<Option<Arc<Pixmap>>> {
    match state {
        ImageState::Loading => Ok(None),
        ImageState::Ready(pixmap) => Ok(Some(pixmap)),
        ImageState::Failed(reason) => Err(SurfaceError::ImageUnavailable {
            url: truncate_url(url),
            reason,
        }),
    }
}

/// Keep error messages readable when the source is a long data URL.
fn truncate_url(url: &str) -> String {
    const MAX: usize = 64;
    match url.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &url[..idx]),
        None => url.to_string(),
    }
}

async fn fetch(url: &str, limits: BackendLimits) -> Result<Pixmap, String> {
    let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    decode_image(&bytes, limits)
}

fn decode_data_url(url: &str, limits: BackendLimits) -> Result<Pixmap, String> {
    let rest = url.strip_prefix("data:").unwrap_or(url);
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no payload".to_string())?;
    let bytes = if meta.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64: {e}"))?
    } else {
        payload.as_bytes().to_vec()
    };
    decode_image(&bytes, limits)
}

/// Decode PNG, JPEG, GIF or WebP bytes into a premultiplied pixmap.
///
/// The header is read first so oversized images are refused before any
/// pixel buffer is allocated.
pub fn decode_image(bytes: &[u8], limits: BackendLimits) -> Result<Pixmap, String> {
    let reader = || {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| e.to_string())
    };
    let (width, height) = reader()?.into_dimensions().map_err(|e| e.to_string())?;
    limits
        .check_area(width as u64, height as u64)
        .map_err(|e| e.to_string())?;

    let rgba = reader()?.decode().map_err(|e| e.to_string())?.to_rgba8();
    let mut pixmap = Pixmap::new(rgba.width(), rgba.height())
        .ok_or_else(|| format!("image has no pixels ({width}x{height})"))?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

/// Encode PNG bytes as a `data:` URL.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::time::Duration;

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        // JPEG has no alpha channel.
        let image = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 0, 0])))
        } else {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255])))
        };
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn red_square_png() -> Vec<u8> {
        encoded(2, 2, ImageFormat::Png)
    }

    fn file_limits() -> BackendLimits {
        BackendLimits {
            allow_file_images: true,
            ..Default::default()
        }
    }

    async fn wait_ready(cache: &ImageCache, url: &str) -> SurfaceResult<Option<Arc<Pixmap>>> {
        let mut state = cache.get(url);
        for _ in 0..100 {
            if !matches!(state, Ok(None)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = cache.get(url);
        }
        state
    }

    #[test]
    fn test_data_url_decodes_immediately() {
        let cache = ImageCache::default();
        let url = png_data_url(&red_square_png());
        let pixmap = cache.get(&url).unwrap().expect("data URLs are synchronous");
        assert_eq!((pixmap.width(), pixmap.height()), (2, 2));
        let px = pixmap.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.alpha()), (255, 255));
    }

    #[test]
    fn test_jpeg_and_gif_sources_decode() {
        let cache = ImageCache::default();
        for (format, mime) in [(ImageFormat::Jpeg, "jpeg"), (ImageFormat::Gif, "gif")] {
            let url = format!(
                "data:image/{mime};base64,{}",
                STANDARD.encode(encoded(4, 3, format))
            );
            let pixmap = cache.get(&url).unwrap().expect("data URLs are synchronous");
            assert_eq!((pixmap.width(), pixmap.height()), (4, 3), "{mime}");
            let px = pixmap.pixel(1, 1).unwrap();
            assert!(px.red() > 200 && px.green() < 50, "{mime}: {px:?}");
        }
    }

    #[test]
    fn test_decode_premultiplies_alpha() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 128]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        let pixmap = decode_image(out.get_ref(), BackendLimits::default()).unwrap();
        let px = pixmap.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.alpha()), (128, 128));
    }

    #[test]
    fn test_oversized_image_is_refused_before_decoding() {
        let limits = BackendLimits {
            max_pixels: 100,
            ..Default::default()
        };
        let err = decode_image(&encoded(20, 20, ImageFormat::Png), limits).unwrap_err();
        assert!(err.contains("exceeds"), "{err}");
        assert!(decode_image(&encoded(10, 10, ImageFormat::Png), limits).is_ok());
    }

    #[test]
    fn test_unknown_format_is_an_error() {
        let err = decode_image(b"not an image at all", BackendLimits::default()).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_bad_data_url_fails_every_time() {
        let cache = ImageCache::default();
        let url = "data:image/png;base64,!!!";
        for _ in 0..2 {
            assert!(matches!(
                cache.get(url),
                Err(SurfaceError::ImageUnavailable { .. })
            ));
        }
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_unknown_scheme_is_unsupported() {
        let cache = ImageCache::default();
        assert!(matches!(
            cache.get("ftp://example.com/a.png"),
            Err(SurfaceError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_file_sources_are_disabled_by_default() {
        let cache = ImageCache::default();
        let err = cache.get("file:///etc/hostname.png").unwrap_err();
        assert!(
            matches!(err, SurfaceError::UnsupportedSource(ref m) if m.contains("disabled")),
            "{err}"
        );
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_file_url_loads_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        std::fs::write(&path, red_square_png()).unwrap();
        let url = format!("file://{}", path.display());

        let cache = ImageCache::new(file_limits());
        let ready = wait_ready(&cache, &url).await.unwrap();
        assert_eq!(ready.expect("file image never loaded").width(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.png");
        let url = format!("file://{}", path.display());
        let cache = ImageCache::new(file_limits());

        let err = wait_ready(&cache, &url).await.unwrap_err();
        assert!(matches!(err, SurfaceError::ImageUnavailable { .. }));

        std::fs::write(&path, red_square_png()).unwrap();
        let ready = wait_ready(&cache, &url).await.unwrap();
        assert_eq!(ready.expect("retry never loaded").height(), 2);
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = ImageCache::with_capacity(BackendLimits::default(), NonZeroUsize::new(2).unwrap());
        for size in 1..=4 {
            let url = png_data_url(&encoded(size, 1, ImageFormat::Png));
            cache.get(&url).unwrap();
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_truncate_url() {
        let long = format!("data:{}", "a".repeat(200));
        assert!(truncate_url(&long).len() < 80);
        assert_eq!(truncate_url("file:///x.png"), "file:///x.png");
    }
}
