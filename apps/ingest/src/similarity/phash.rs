//! Average hash (aHash): 8×8 grayscale, each pixel thresholded against the
//! block mean, giving a 64-bit fingerprint.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use reqwest::Client;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

const HASH_SIDE: u32 = 8;
/// Hamming distances strictly below this are the same picture.
pub const HAMMING_THRESHOLD: u32 = 10;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for fetching and hashing one image.
pub const IMAGE_HASH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ImageHashError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image host returned status {0}")]
    Status(u16),

    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("invalid hash '{0}'")]
    InvalidHex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHash(pub u64);

impl ImageHash {
    pub fn distance(&self, other: &ImageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn is_similar(&self, other: &ImageHash) -> bool {
        self.distance(other) < HAMMING_THRESHOLD
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, ImageHashError> {
        let hex = hex.trim();
        if hex.len() != 16 {
            return Err(ImageHashError::InvalidHex(hex.to_string()));
        }
        u64::from_str_radix(hex, 16)
            .map(ImageHash)
            .map_err(|_| ImageHashError::InvalidHex(hex.to_string()))
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes the aHash of an encoded image.
pub fn average_hash(bytes: &[u8]) -> Result<ImageHash, ImageHashError> {
    let pixels = image::load_from_memory(bytes)?
        .grayscale()
        .resize_exact(HASH_SIDE, HASH_SIDE, FilterType::Triangle)
        .to_luma8();

    let values: Vec<u32> = pixels.pixels().map(|p| u32::from(p.0[0])).collect();
    let mean = values.iter().sum::<u32>() as f64 / values.len() as f64;

    let bits = values
        .iter()
        .fold(0u64, |acc, &v| (acc << 1) | u64::from(f64::from(v) > mean));
    Ok(ImageHash(bits))
}

/// Downloads image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, ImageHashError>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, ImageHashError> {
        let response = self.client.get(url).timeout(FETCH_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageHashError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }
}

/// Fetches and hashes images. Failures are logged and yield `None`, so an
/// unreachable image simply drops out of comparison.
#[derive(Clone)]
pub struct ImageHasher {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageHasher {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    /// `None` when the image cannot be fetched or decoded within
    /// [`IMAGE_HASH_TIMEOUT`].
    pub async fn hash_url(&self, url: &str) -> Option<ImageHash> {
        let result = match tokio::time::timeout(IMAGE_HASH_TIMEOUT, self.fetcher.fetch(url)).await {
            Ok(Ok(bytes)) => average_hash(&bytes),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Skipping image {url} in similarity check: timed out after {IMAGE_HASH_TIMEOUT:?}");
                return None;
            }
        };
        match result {
            Ok(hash) => {
                debug!("Hashed image {url}: {hash}");
                Some(hash)
            }
            Err(e) => {
                warn!("Skipping image {url} in similarity check: {e}");
                None
            }
        }
    }

    /// Hashes all `urls` concurrently, keeping input order and dropping
    /// failures.
    pub async fn hash_all(&self, urls: &[String]) -> Vec<ImageHash> {
        let mut tasks = JoinSet::new();
        for (index, url) in urls.iter().cloned().enumerate() {
            let hasher = self.clone();
            tasks.spawn(async move { (index, hasher.hash_url(&url).await) });
        }

        let mut hashed = Vec::with_capacity(urls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(hash))) => hashed.push((index, hash)),
                Ok((_, None)) => {}
                Err(e) => warn!("Image hashing task failed: {e}"),
            }
        }
        hashed.sort_by_key(|(index, _)| *index);
        hashed.into_iter().map(|(_, hash)| hash).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
    use std::collections::HashMap;
    use std::io::Cursor;

    pub(crate) fn horizontal_gradient(side: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(side, side, |x, _| {
            Luma([(x * 255 / (side - 1)) as u8])
        }))
    }

    pub(crate) fn vertical_gradient(side: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(side, side, |_, y| {
            Luma([(y * 255 / (side - 1)) as u8])
        }))
    }

    pub(crate) fn encode(img: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    /// Serves canned bytes per URL; unknown URLs fail like a 404.
    pub(crate) struct FakeFetcher(pub HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, ImageHashError> {
            self.0
                .get(url)
                .map(|b| Bytes::from(b.clone()))
                .ok_or(ImageHashError::Status(404))
        }
    }

    #[test]
    fn test_reencoded_image_is_similar() {
        let img = horizontal_gradient(64);
        let png = average_hash(&encode(&img, ImageOutputFormat::Png)).unwrap();
        let jpeg = average_hash(&encode(&img, ImageOutputFormat::Jpeg(70))).unwrap();
        let resized = img.resize_exact(200, 200, FilterType::Lanczos3);
        let big = average_hash(&encode(&resized, ImageOutputFormat::Png)).unwrap();

        assert!(png.distance(&jpeg) < HAMMING_THRESHOLD, "distance {}", png.distance(&jpeg));
        assert!(png.is_similar(&big), "distance {}", png.distance(&big));
    }

    #[test]
    fn test_unrelated_images_exceed_threshold() {
        let a = average_hash(&encode(&horizontal_gradient(64), ImageOutputFormat::Png)).unwrap();
        let b = average_hash(&encode(&vertical_gradient(64), ImageOutputFormat::Png)).unwrap();
        assert!(!a.is_similar(&b));
        assert_eq!(a.distance(&b), 32);
    }

    #[test]
    fn test_gradient_hash_sets_right_half() {
        let hash = average_hash(&encode(&horizontal_gradient(64), ImageOutputFormat::Png)).unwrap();
        assert_eq!(hash.to_hex(), "0f0f0f0f0f0f0f0f");
    }

    #[test]
    fn test_hex_round_trip_and_validation() {
        let hash = ImageHash::from_hex("0f0f0f0f0f0f0f0f").unwrap();
        assert_eq!(hash.0, 0x0f0f_0f0f_0f0f_0f0f);
        assert!(ImageHash::from_hex("xyz").is_err());
        assert!(ImageHash::from_hex("0f0f").is_err());
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(matches!(
            average_hash(b"not an image"),
            Err(ImageHashError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_skipped() {
        let png = encode(&horizontal_gradient(32), ImageOutputFormat::Png);
        let fetcher = FakeFetcher(HashMap::from([("https://img/ok.png".to_string(), png)]));
        let hasher = ImageHasher::new(Arc::new(fetcher));

        let hashes = hasher
            .hash_all(&[
                "https://img/missing.png".to_string(),
                "https://img/ok.png".to_string(),
            ])
            .await;
        assert_eq!(hashes.len(), 1);
    }

    /// Accepts the connection and never answers.
    struct HangingFetcher;

    #[async_trait]
    impl ImageFetcher for HangingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, ImageHashError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ImageHashError::Status(504))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_images_are_hashed_in_parallel_and_bounded() {
        let hasher = ImageHasher::new(Arc::new(HangingFetcher));
        let urls: Vec<String> = (0..5).map(|i| format!("https://img/{i}.png")).collect();

        let started = tokio::time::Instant::now();
        assert!(hasher.hash_all(&urls).await.is_empty());
        assert_eq!(started.elapsed(), IMAGE_HASH_TIMEOUT);
    }

    #[tokio::test]
    async fn test_hash_all_keeps_input_order() {
        let fetcher = FakeFetcher(HashMap::from([
            (
                "https://img/h.png".to_string(),
                encode(&horizontal_gradient(32), ImageOutputFormat::Png),
            ),
            (
                "https://img/v.png".to_string(),
                encode(&vertical_gradient(32), ImageOutputFormat::Png),
            ),
        ]));
        let hasher = ImageHasher::new(Arc::new(fetcher));

        let hashes = hasher
            .hash_all(&["https://img/v.png".to_string(), "https://img/h.png".to_string()])
            .await;
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[1].to_hex(), "0f0f0f0f0f0f0f0f");
    }
}
