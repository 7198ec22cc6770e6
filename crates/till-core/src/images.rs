//! Product image cache
//!
//! Product tiles must render while offline, so image bytes are cached to
//! disk next to the database. File names embed a digest of the source URL:
//! a product whose image URL changes gets a fresh cache entry, and stale
//! files are simply never referenced again.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::models::Product;

/// Hex digest length used in cached file names.
const URL_DIGEST_LEN: usize = 16;

fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..URL_DIGEST_LEN].to_string()
}

fn url_extension(url: &str) -> &str {
    url.rsplit('.')
        .next()
        .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("img")
}

/// Where a product image lives in the cache.
pub fn image_cache_path(images_dir: &Path, product_id: i64, url: &str) -> PathBuf {
    images_dir.join(format!(
        "product_{}_{}.{}",
        product_id,
        url_digest(url),
        url_extension(url)
    ))
}

/// Download a product's image into the cache unless it is already there.
///
/// Returns the cached path, or None for products without an image URL.
pub async fn cache_product_image(
    client: &reqwest::Client,
    images_dir: &Path,
    product: &Product,
) -> Result<Option<PathBuf>> {
    let Some(url) = product.image_url.as_deref() else {
        return Ok(None);
    };

    let path = image_cache_path(images_dir, product.id, url);
    if path.exists() {
        return Ok(Some(path));
    }

    if !images_dir.exists() {
        std::fs::create_dir_all(images_dir)?;
    }

    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    std::fs::write(&path, &bytes)?;
    debug!(product = product.id, path = %path.display(), "Cached product image");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_path_shape() {
        let dir = Path::new("/data/cached_images");
        let path = image_cache_path(dir, 42, "https://cdn.example.com/latte.png");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("product_42_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_url_change_changes_path() {
        let dir = Path::new("/tmp");
        let a = image_cache_path(dir, 1, "https://cdn.example.com/a.png");
        let b = image_cache_path(dir, 1, "https://cdn.example.com/b.png");
        assert_ne!(a, b);
    }

    #[test]
    fn test_weird_extension_falls_back() {
        let dir = Path::new("/tmp");
        let path = image_cache_path(dir, 1, "https://cdn.example.com/image-no-extension");
        assert!(path.to_string_lossy().ends_with(".img"));
    }
}
