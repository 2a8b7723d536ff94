//! Results of completed variations.

use serde::{Deserialize, Serialize};

use crate::{AssetId, TransformConfig};

/// Build the id (and output file stem) of variation `index` of an asset.
pub fn variation_id(asset_id: &AssetId, index: u32) -> String {
    format!("{}_variation_{}", asset_id, index)
}

/// One successfully transcoded variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationResult {
    /// `{assetId}_variation_{n}`
    pub id: String,
    /// Display name
    pub name: String,
    /// Synthetic similarity score, always within [50, 70]
    pub similarity: u8,
    /// Relative URL the output can be downloaded from
    pub download_url: String,
    /// Parameters the variation was produced with
    pub transform: TransformConfig,
}

impl VariationResult {
    pub fn new(asset_id: &AssetId, index: u32, similarity: u8, transform: TransformConfig) -> Self {
        let id = variation_id(asset_id, index);
        Self {
            download_url: format!("/api/video/download/{}", id),
            name: format!("Variation {}", index),
            id,
            similarity,
            transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variation_locator() {
        let asset = AssetId::parse("1700000000000-123456789").unwrap();
        let result = VariationResult::new(&asset, 3, 62, TransformConfig::IDENTITY);

        assert_eq!(result.id, "1700000000000-123456789_variation_3");
        assert_eq!(result.name, "Variation 3");
        assert_eq!(
            result.download_url,
            "/api/video/download/1700000000000-123456789_variation_3"
        );

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("downloadUrl").is_some());
    }
}
