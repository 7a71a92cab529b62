//! Cover thumbnails materialized through the disk cache, and bulk redraws.

use crate::cache::ThumbnailCache;
use crate::cover::CoverResolver;
use crate::models::Album;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Loads square album thumbnails, filling the cache on a miss.
#[derive(Clone)]
pub struct ThumbnailLoader {
    cache: ThumbnailCache,
    resolver: CoverResolver,
}

impl ThumbnailLoader {
    pub fn new(cache: ThumbnailCache, resolver: CoverResolver) -> Self {
        Self { cache, resolver }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    /// The album's thumbnail at the cache size, or `None` if it has no usable cover.
    pub fn load(&self, album: &Album) -> Option<DynamicImage> {
        let path = self.cache.create_filename(album);
        if path.is_file() {
            match decode_file(&path) {
                Some(image) => return Some(image),
                None => tracing::debug!(path = %path.display(), "dropping undecodable thumbnail"),
            }
        }

        let source = self.resolver.resolve(album)?;
        let bytes = self.resolver.read(&source)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| tracing::debug!(album = %album.title(), error = %err, "cover decode failed"))
            .ok()?;
        let size = self.cache.size();
        let thumbnail = decoded.resize_exact(size, size, FilterType::Lanczos3);
        if save_png_atomic(&thumbnail, &path).is_none() {
            tracing::debug!(path = %path.display(), "failed to persist thumbnail");
        }
        Some(thumbnail)
    }
}

fn decode_file(path: &Path) -> Option<DynamicImage> {
    let bytes = fs::read(path).ok()?;
    image::load_from_memory(&bytes).ok()
}

fn save_png_atomic(image: &DynamicImage, target_path: &Path) -> Option<()> {
    let temp_path = target_path.with_extension("tmp");
    image.save_with_format(&temp_path, ImageFormat::Png).ok()?;
    fs::rename(&temp_path, target_path).ok()?;
    Some(())
}

/// Runs one kind of bulk thumbnail redraw (library grid, playlist grid)
/// on its own thread.
///
/// Batches of the same renderer never overlap. Starting a batch cancels the
/// one in flight, which notices between two albums.
#[derive(Clone, Default)]
pub struct BatchRenderer {
    lock: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
}

impl BatchRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the batch in flight, if any.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Load thumbnails for `albums` in order, handing each result to
    /// `on_item`. The thread returns how many albums it processed.
    pub fn start<F>(
        &self,
        albums: Vec<Album>,
        loader: ThumbnailLoader,
        mut on_item: F,
    ) -> std::io::Result<JoinHandle<usize>>
    where
        F: FnMut(&Album, Option<DynamicImage>) + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let lock = Arc::clone(&self.lock);
        thread::Builder::new()
            .name("mcg-thumbnails".into())
            .spawn(move || {
                let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let mut done = 0;
                for album in &albums {
                    if current.load(Ordering::SeqCst) != generation {
                        tracing::debug!(done, total = albums.len(), "thumbnail batch cancelled");
                        break;
                    }
                    let thumbnail = loader.load(album);
                    on_item(album, thumbnail);
                    done += 1;
                }
                done
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;
    use image::{GenericImageView, Rgb, RgbImage};
    use std::sync::mpsc;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        music: TempDir,
        cache_root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                music: tempdir().unwrap(),
                cache_root: tempdir().unwrap(),
            }
        }

        fn loader(&self, size: u32) -> ThumbnailLoader {
            let cache = ThumbnailCache::open(self.cache_root.path(), "localhost", size).unwrap();
            let resolver = CoverResolver::new("localhost", self.music.path().to_string_lossy());
            ThumbnailLoader::new(cache, resolver)
        }

        fn write_cover(&self, dir: &str) {
            let path = self.music.path().join(dir).join("cover.png");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            RgbImage::from_pixel(40, 20, Rgb([200, 10, 10]))
                .save_with_format(&path, ImageFormat::Png)
                .unwrap();
        }
    }

    fn album(title: &str, dir: &str) -> Album {
        let mut album = Album::new(title);
        album.add_track(Track::new(vec!["A".into()], "t", format!("{dir}/01.flac")));
        album
    }

    #[test]
    fn miss_resizes_and_persists() {
        let fixture = Fixture::new();
        fixture.write_cover("a/x");
        let loader = fixture.loader(16);
        let album = album("X", "a/x");

        let thumbnail = loader.load(&album).unwrap();
        assert_eq!(thumbnail.dimensions(), (16, 16));
        let cached = loader.cache().create_filename(&album);
        assert!(cached.is_file());
        assert_eq!(decode_file(&cached).unwrap().dimensions(), (16, 16));
    }

    #[test]
    fn hit_is_served_without_the_source() {
        let fixture = Fixture::new();
        fixture.write_cover("a/x");
        let loader = fixture.loader(16);
        loader.load(&album("X", "a/x")).unwrap();

        fs::remove_file(fixture.music.path().join("a/x/cover.png")).unwrap();
        let again = loader.load(&album("X", "a/x")).unwrap();
        assert_eq!(again.dimensions(), (16, 16));
    }

    #[test]
    fn size_change_regenerates() {
        let fixture = Fixture::new();
        fixture.write_cover("a/x");
        fixture.loader(16).load(&album("X", "a/x")).unwrap();

        let thumbnail = fixture.loader(24).load(&album("X", "a/x")).unwrap();
        assert_eq!(thumbnail.dimensions(), (24, 24));
    }

    #[test]
    fn missing_or_broken_cover_is_none() {
        let fixture = Fixture::new();
        let loader = fixture.loader(16);
        assert!(loader.load(&album("Nope", "none")).is_none());

        let broken = fixture.music.path().join("b/cover.jpg");
        fs::create_dir_all(broken.parent().unwrap()).unwrap();
        fs::write(&broken, b"not an image").unwrap();
        let album = album("B", "b");
        assert!(loader.load(&album).is_none());
        assert!(!loader.cache().create_filename(&album).exists());
    }

    #[test]
    fn batch_reports_every_album_in_order() {
        let fixture = Fixture::new();
        fixture.write_cover("a/x");
        let albums = vec![album("X", "a/x"), album("Y", "a/y")];
        let (tx, rx) = mpsc::channel();
        let handle = BatchRenderer::new()
            .start(albums, fixture.loader(8), move |album, image| {
                tx.send((album.title().to_string(), image.is_some())).unwrap();
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), 2);
        let seen: Vec<_> = rx.iter().collect();
        assert_eq!(seen, vec![("X".into(), true), ("Y".into(), false)]);
    }

    #[test]
    fn new_batch_cancels_the_running_one() {
        let fixture = Fixture::new();
        let renderer = BatchRenderer::new();
        let albums: Vec<_> = (0..5).map(|i| Album::new(format!("A{i}"))).collect();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = renderer
            .start(albums.clone(), fixture.loader(8), move |_, _| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            })
            .unwrap();

        started_rx.recv().unwrap();
        let second = renderer.start(albums, fixture.loader(8), |_, _| {}).unwrap();
        release_tx.send(()).unwrap();
        drop(release_tx);

        assert_eq!(first.join().unwrap(), 1);
        assert_eq!(second.join().unwrap(), 5);
    }
}
