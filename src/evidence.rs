//! Evidence image ingestion: base64 wrapper → sniffed image → blob URL.
//!
//! Clients post each image as a form field whose value is a JSON object
//! with a `base64Data` string. Decoding and sniffing are pure and happen
//! while the submission is still being validated; the upload is the first
//! side effect of a submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ::image::ImageFormat;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::blob::{BlobObject, BlobStore};
use crate::error::{InputError, StorageError};

pub const PUBLIC_URL_BASE: &str = "https://storage.googleapis.com";

/// A decoded image that passed content sniffing, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub field: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Where an uploaded image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub key: String,
    pub url: String,
}

/// Formats accepted as evidence. Other signatures `guess_format` knows
/// (PNM, QOI, DDS, Radiance) are short enough to match plain text.
const EVIDENCE_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Ico,
];

/// Sniff the content type from magic bytes.
///
/// Returns the MIME type and canonical file extension of a recognised
/// photo format, `None` otherwise.
pub fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    let format = ::image::guess_format(bytes).ok()?;
    if !EVIDENCE_FORMATS.contains(&format) {
        return None;
    }
    let mime = format.to_mime_type();
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    Some((mime, extension))
}

/// Parse the JSON wrapper of `field`, decode its base64 payload and make
/// sure the bytes are an image.
pub fn decode_evidence(field: &str, raw: &str) -> Result<DecodedImage, InputError> {
    let wrapper: Value = serde_json::from_str(raw).map_err(|_| InputError::MalformedJson {
        field: field.to_string(),
    })?;
    if !(wrapper.is_object() || wrapper.is_null()) {
        return Err(InputError::MalformedJson {
            field: field.to_string(),
        });
    }

    let b64 = wrapper
        .get("base64Data")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InputError::MissingImage {
            field: field.to_string(),
        })?;

    let bytes = STANDARD
        .decode(b64)
        .map_err(|_| InputError::MalformedBase64 {
            field: field.to_string(),
        })?;

    let (content_type, extension) = sniff_image(&bytes).ok_or_else(|| InputError::NotAnImage {
        field: field.to_string(),
    })?;

    Ok(DecodedImage {
        field: field.to_string(),
        bytes,
        content_type,
        extension,
    })
}

/// Public URL of an object, independent of the store implementation.
pub fn public_url(bucket: &str, key: &str) -> String {
    format!("{PUBLIC_URL_BASE}/{bucket}/{key}")
}

/// Uploads decoded images under generated keys.
#[derive(Clone)]
pub struct ImageIngestor {
    store: Arc<dyn BlobStore>,
}

impl ImageIngestor {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Upload `image` as `{folder}/{uuid}.{ext}`, tagged with
    /// `upload-source` and `original-content-type`.
    pub async fn upload(
        &self,
        image: DecodedImage,
        folder: &str,
        upload_source: &str,
    ) -> Result<UploadedImage, StorageError> {
        let key = format!("{folder}/{}.{}", Uuid::new_v4(), image.extension);

        let mut metadata = BTreeMap::new();
        metadata.insert("upload-source".to_string(), upload_source.to_string());
        metadata.insert(
            "original-content-type".to_string(),
            image.content_type.to_string(),
        );

        self.store
            .put(BlobObject {
                key: key.clone(),
                content_type: image.content_type.to_string(),
                metadata,
                bytes: image.bytes,
            })
            .await?;

        let url = public_url(self.store.bucket(), &key);
        info!(field = %image.field, url = %url, content_type = image.content_type, "File uploaded");
        Ok(UploadedImage { key, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn wrapper(bytes: &[u8]) -> String {
        format!(r#"{{"base64Data":"{}"}}"#, STANDARD.encode(bytes))
    }

    #[test]
    fn sniffs_png_and_jpeg() {
        assert_eq!(sniff_image(PNG_HEADER), Some(("image/png", "png")));
        assert_eq!(sniff_image(JPEG_HEADER).map(|(m, _)| m), Some("image/jpeg"));
        assert_eq!(sniff_image(b"%PDF-1.7 not an image"), None);
    }

    #[test]
    fn decodes_valid_wrapper() {
        let image = decode_evidence("evidencia_recepcion", &wrapper(PNG_HEADER)).unwrap();
        assert_eq!(image.bytes, PNG_HEADER);
        assert_eq!(image.content_type, "image/png");
    }

    #[test]
    fn rejects_non_json_wrapper() {
        let err = decode_evidence("evidencia_recepcion", "not json").unwrap_err();
        assert!(matches!(err, InputError::MalformedJson { .. }));

        let err = decode_evidence("evidencia_recepcion", "[1,2]").unwrap_err();
        assert!(matches!(err, InputError::MalformedJson { .. }));
    }

    #[test]
    fn rejects_missing_or_empty_payload() {
        for raw in [r#"{}"#, r#"{"base64Data":""}"#, r#"{"base64Data":42}"#, "null"] {
            let err = decode_evidence("f", raw).unwrap_err();
            assert!(matches!(err, InputError::MissingImage { .. }), "{raw}");
        }
    }

    #[test]
    fn rejects_bad_base64() {
        let err = decode_evidence("f", r#"{"base64Data":"@@@"}"#).unwrap_err();
        assert!(matches!(err, InputError::MalformedBase64 { .. }));
    }

    #[test]
    fn rejects_non_image_bytes() {
        let err = decode_evidence("f", &wrapper(b"hello, plain text")).unwrap_err();
        assert!(matches!(err, InputError::NotAnImage { .. }));

        let err = decode_evidence("f", &wrapper(b"P1 shipping notes")).unwrap_err();
        assert!(matches!(err, InputError::NotAnImage { .. }));
    }

    #[test]
    fn text_with_short_image_signatures_is_not_evidence() {
        for text in [
            &b"P1 shipping notes"[..],
            b"P6 pallets",
            b"qoif text",
            b"DDS report",
            b"#?RADIANCE",
        ] {
            assert_eq!(sniff_image(text), None, "{}", String::from_utf8_lossy(text));
        }
    }

    #[tokio::test]
    async fn upload_tags_object_and_returns_public_url() {
        let store = Arc::new(MemoryBlobStore::new("app-entradas-salidas-merc"));
        let ingestor = ImageIngestor::new(store.clone());
        let image = decode_evidence("evidencia_recepcion", &wrapper(PNG_HEADER)).unwrap();

        let uploaded = ingestor
            .upload(image, "evidencias_entradas", "app-entradas")
            .await
            .unwrap();

        assert!(uploaded.key.starts_with("evidencias_entradas/"));
        assert!(uploaded.key.ends_with(".png"));
        assert_eq!(
            uploaded.url,
            format!("https://storage.googleapis.com/app-entradas-salidas-merc/{}", uploaded.key)
        );

        let stored = store.get(&uploaded.key).unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.metadata["upload-source"], "app-entradas");
        assert_eq!(stored.metadata["original-content-type"], "image/png");
    }

    #[tokio::test]
    async fn keys_are_unique_per_upload() {
        let store = Arc::new(MemoryBlobStore::new("b"));
        let ingestor = ImageIngestor::new(store.clone());
        for _ in 0..3 {
            let image = decode_evidence("f", &wrapper(PNG_HEADER)).unwrap();
            ingestor.upload(image, "folder", "src").await.unwrap();
        }
        assert_eq!(store.len(), 3);
    }
}
