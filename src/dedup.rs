//! Menu scan ingestion with three-tier deduplication.
//!
//! Tier zero is free: a SHA-256 over the raw image bytes catches a user
//! re-uploading the same photo before any OCR or model call happens. The
//! remaining tiers run after OCR and structuring:
//!
//! 1. exact `content_signature_hash` match against canonical menus,
//! 2. embedding cosine similarity against the nearest canonical menu,
//! 3. otherwise a new canonical menu, its first scan, and its dish rows
//!    are inserted in one transaction.
//!
//! A reuse tier inserts only a new scan row pointing at the existing
//! canonical menu. Embedding problems never fail a save; tier two simply
//! falls through to the insert.

use std::sync::Arc;
use uuid::Uuid;

use anyhow::Result;

use crate::config::{DedupConfig, StructuringConfig};
use crate::embedding::EmbeddingProvider;
use crate::llm::ChatProvider;
use crate::models::{SaveMethod, SaveOutcome, StructuredMenu};
use crate::ocr::TextExtractor;
use crate::signature::{content_signature, full_structure_hash, normalize_metadata, sha256_hex};
use crate::store::{MenuStore, NewCanonicalMenu, NewDish, NewScan};
use crate::structure::structure_menu;

pub struct ScanPipeline {
    store: Arc<dyn MenuStore>,
    provider: Arc<dyn ChatProvider>,
    ocr: Arc<dyn TextExtractor>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    structuring: StructuringConfig,
    dedup: DedupConfig,
}

impl ScanPipeline {
    pub fn new(
        store: Arc<dyn MenuStore>,
        provider: Arc<dyn ChatProvider>,
        ocr: Arc<dyn TextExtractor>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        structuring: StructuringConfig,
        dedup: DedupConfig,
    ) -> Self {
        Self {
            store,
            provider,
            ocr,
            embeddings,
            structuring,
            dedup,
        }
    }

    /// Ingest one menu image for a user.
    pub async fn save_scan(&self, user_id: Uuid, image: &[u8]) -> Result<SaveOutcome> {
        self.store.ensure_user(user_id).await?;

        let image_hash = sha256_hex(image);

        // Tier zero: same user, same image bytes.
        if let Some(existing) = self
            .store
            .find_scan_by_image_hash(user_id, &image_hash)
            .await?
        {
            tracing::info!(scan_id = %existing.id, "Image already scanned by this user");
            let dish_count = match existing.canonical_menu_id {
                Some(id) => Some(self.store.canonical_dish_count(id).await?),
                None => None,
            };
            return Ok(SaveOutcome {
                scan_id: existing.id,
                canonical_id: existing.canonical_menu_id,
                method: SaveMethod::DuplicateImageHash,
                dish_count,
                is_duplicate: true,
                content_signature_hash: None,
                full_structure_hash: None,
                image_hash,
            });
        }

        let extraction = self.ocr.extract(image).await?;
        let menu = structure_menu(self.provider.as_ref(), &self.structuring, &extraction.text)
            .await
            .into_inner();

        let signature = content_signature(&menu);
        let full_hash = full_structure_hash(&menu);

        let scan = NewScan {
            user_id,
            canonical_menu_id: None,
            image_hash: image_hash.clone(),
            menu_raw_text: extraction.text,
            restaurant_name: menu.restaurant.name.clone(),
            location: menu.restaurant.location.clone(),
            ocr_method: extraction.model,
        };

        // Tier one: exact dish-set signature.
        if let Some((sig_hash, _)) = &signature {
            if let Some(canonical) = self.store.find_canonical_by_signature(sig_hash).await? {
                tracing::info!(canonical_id = %canonical.id, "Reusing canonical menu via content signature");
                let scan_id = self
                    .store
                    .insert_scan(NewScan {
                        canonical_menu_id: Some(canonical.id),
                        ..scan
                    })
                    .await?;
                return Ok(SaveOutcome {
                    scan_id,
                    canonical_id: Some(canonical.id),
                    method: SaveMethod::ContentSignatureReuse,
                    dish_count: Some(canonical.dish_count),
                    is_duplicate: true,
                    content_signature_hash: Some(sig_hash.clone()),
                    full_structure_hash: Some(full_hash),
                    image_hash,
                });
            }
        }

        // Tier two: semantic similarity.
        let embedding = self.embed_identity(&menu, &signature).await;
        if let Some(vector) = &embedding {
            match self.store.nearest_canonical(vector).await {
                Ok(Some((canonical_id, similarity)))
                    if similarity >= self.dedup.similarity_threshold =>
                {
                    tracing::info!(
                        canonical_id = %canonical_id,
                        similarity,
                        "Reusing canonical menu via vector similarity"
                    );
                    let scan_id = self
                        .store
                        .insert_scan(NewScan {
                            canonical_menu_id: Some(canonical_id),
                            ..scan
                        })
                        .await?;
                    let dish_count = self.store.canonical_dish_count(canonical_id).await?;
                    return Ok(SaveOutcome {
                        scan_id,
                        canonical_id: Some(canonical_id),
                        method: SaveMethod::VectorSimilarityReuse,
                        dish_count: Some(dish_count),
                        is_duplicate: true,
                        content_signature_hash: signature.map(|(h, _)| h),
                        full_structure_hash: Some(full_hash),
                        image_hash,
                    });
                }
                Ok(Some((_, similarity))) => {
                    tracing::debug!(similarity, "Nearest canonical menu below threshold");
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %format!("{:#}", err), "Similarity lookup failed, treating menu as new");
                }
            }
        }

        // New canonical menu.
        let dishes = flatten_dishes(&menu);
        let dish_count = dishes.len() as i64;
        let new_canonical = NewCanonicalMenu {
            normalized_restaurant_name: menu
                .restaurant
                .name
                .as_deref()
                .and_then(normalize_metadata),
            normalized_location: menu
                .restaurant
                .location
                .as_deref()
                .and_then(normalize_metadata),
            content_signature_hash: signature.as_ref().map(|(h, _)| h.clone()),
            full_structure_hash: full_hash.clone(),
            embedding,
            dishes,
        };
        let (canonical_id, scan_id) = self.store.create_canonical_menu(new_canonical, scan).await?;
        tracing::info!(canonical_id = %canonical_id, dish_count, "Created canonical menu");

        Ok(SaveOutcome {
            scan_id,
            canonical_id: Some(canonical_id),
            method: SaveMethod::NewCanonicalMenu,
            dish_count: Some(dish_count),
            is_duplicate: false,
            content_signature_hash: signature.map(|(h, _)| h),
            full_structure_hash: Some(full_hash),
            image_hash,
        })
    }

    /// Embed the menu's identity text. `None` when embeddings are disabled,
    /// the menu has no dishes, or the embedding call fails.
    async fn embed_identity(
        &self,
        menu: &StructuredMenu,
        signature: &Option<(String, String)>,
    ) -> Option<Vec<f32>> {
        let provider = self.embeddings.as_ref()?;
        let (_, signature_string) = signature.as_ref()?;

        let name = menu
            .restaurant
            .name
            .as_deref()
            .and_then(normalize_metadata)
            .unwrap_or_default();
        let location = menu
            .restaurant
            .location
            .as_deref()
            .and_then(normalize_metadata)
            .unwrap_or_default();
        let identity = format!("{} {} {}", name, location, signature_string);

        match provider.embed(identity.trim()).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(error = %format!("{:#}", err), "Embedding failed, skipping similarity tier");
                None
            }
        }
    }
}

fn flatten_dishes(menu: &StructuredMenu) -> Vec<NewDish> {
    menu.categories
        .iter()
        .flat_map(|category| {
            category.dishes.iter().map(|dish| NewDish {
                name: dish.name.clone(),
                description: dish.description.clone(),
                price: dish.price,
                category: Some(category.name.clone()),
                tags: dish.dietary_tags.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RestaurantInfo, StructuredCategory, StructuredDish, StructuredMenu};

    #[test]
    fn flatten_keeps_category_names() {
        let menu = StructuredMenu {
            restaurant: RestaurantInfo::default(),
            categories: vec![
                StructuredCategory {
                    name: "Starters".to_string(),
                    dishes: vec![StructuredDish {
                        name: "Soup".to_string(),
                        description: None,
                        price: Some(4.5),
                        dietary_tags: vec!["vegan".to_string()],
                    }],
                },
                StructuredCategory {
                    name: "Mains".to_string(),
                    dishes: vec![StructuredDish {
                        name: "Salmon".to_string(),
                        description: None,
                        price: Some(18.0),
                        dietary_tags: vec![],
                    }],
                },
            ],
        };
        let dishes = flatten_dishes(&menu);
        assert_eq!(dishes.len(), 2);
        assert_eq!(dishes[0].category.as_deref(), Some("Starters"));
        assert_eq!(dishes[0].tags, vec!["vegan"]);
        assert_eq!(dishes[1].category.as_deref(), Some("Mains"));
    }
}
