//! Persistence seam.
//!
//! [`MenuStore`] is the trait the dedup pipeline, the HTTP handlers, and
//! the billing webhooks talk to. [`PgStore`] is the Postgres
//! implementation; [`MemoryStore`] is a complete in-memory fake used by
//! tests and by the `analyze` CLI path, which never touches a database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, vector_literal};
use crate::models::{CanonicalMenu, MenuScan};

/// A scan row to insert.
#[derive(Debug, Clone)]
pub struct NewScan {
    pub user_id: Uuid,
    pub canonical_menu_id: Option<Uuid>,
    pub image_hash: String,
    pub menu_raw_text: String,
    pub restaurant_name: Option<String>,
    pub location: Option<String>,
    pub ocr_method: String,
}

/// A dish row to insert alongside a new canonical menu.
#[derive(Debug, Clone)]
pub struct NewDish {
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// A canonical menu to insert, with its dishes and optional embedding.
#[derive(Debug, Clone)]
pub struct NewCanonicalMenu {
    pub normalized_restaurant_name: Option<String>,
    pub normalized_location: Option<String>,
    pub content_signature_hash: Option<String>,
    pub full_structure_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub dishes: Vec<NewDish>,
}

/// Subscription fields to write for a user.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: String,
    pub plan: Option<String>,
}

/// Onboarding answers to persist.
#[derive(Debug, Clone)]
pub struct OnboardingData {
    pub goals: Vec<String>,
    pub diets: Vec<String>,
    pub preferences: serde_json::Value,
}

#[async_trait]
pub trait MenuStore: Send + Sync {
    /// Create the user row if it does not exist.
    async fn ensure_user(&self, user_id: Uuid) -> Result<()>;

    /// Tier-zero lookup: has this user scanned this exact image before?
    async fn find_scan_by_image_hash(
        &self,
        user_id: Uuid,
        image_hash: &str,
    ) -> Result<Option<MenuScan>>;

    /// Tier-two lookup: canonical menu with this content signature.
    async fn find_canonical_by_signature(&self, hash: &str) -> Result<Option<CanonicalMenu>>;

    /// Tier-three lookup: nearest canonical menu by cosine similarity.
    async fn nearest_canonical(&self, embedding: &[f32]) -> Result<Option<(Uuid, f32)>>;

    async fn canonical_dish_count(&self, canonical_id: Uuid) -> Result<i64>;

    /// Insert canonical menu, first scan, and dish rows atomically.
    /// Returns `(canonical_id, scan_id)`.
    async fn create_canonical_menu(
        &self,
        menu: NewCanonicalMenu,
        scan: NewScan,
    ) -> Result<(Uuid, Uuid)>;

    /// Insert a scan row pointing at an existing canonical menu (or none).
    async fn insert_scan(&self, scan: NewScan) -> Result<Uuid>;

    // Billing.
    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<Uuid>>;
    async fn update_subscription(&self, user_id: Uuid, update: SubscriptionUpdate) -> Result<()>;
    async fn update_subscription_status_by_customer(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<()>;

    // Onboarding.
    async fn save_onboarding(&self, user_id: Uuid, data: OnboardingData) -> Result<()>;
    async fn save_plan(&self, user_id: Uuid, plan: &str) -> Result<()>;
}

// ─── Postgres ───────────────────────────────────────────────────────

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn scan_from_row(row: &sqlx::postgres::PgRow) -> Result<MenuScan> {
    Ok(MenuScan {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        canonical_menu_id: row.try_get("canonical_menu_id")?,
        image_hash: row.try_get("image_hash")?,
        menu_raw_text: row.try_get("menu_raw_text")?,
        restaurant_name: row.try_get("restaurant_name")?,
        location: row.try_get("location")?,
        ocr_method: row.try_get("ocr_method")?,
        scanned_at: row.try_get("scanned_at")?,
    })
}

fn canonical_from_row(row: &sqlx::postgres::PgRow) -> Result<CanonicalMenu> {
    Ok(CanonicalMenu {
        id: row.try_get("id")?,
        normalized_restaurant_name: row.try_get("normalized_restaurant_name")?,
        normalized_location: row.try_get("normalized_location")?,
        content_signature_hash: row.try_get("content_signature_hash")?,
        full_structure_hash: row.try_get("full_structure_hash")?,
        dish_count: row.try_get("dish_count")?,
        first_scan_id: row.try_get("first_scan_id")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_scan_row<'e, E>(executor: E, id: Uuid, scan: &NewScan) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO menu_scan \
         (id, user_id, canonical_menu_id, image_hash, menu_raw_text, \
          restaurant_name, location, ocr_method, scanned_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(id)
    .bind(scan.user_id)
    .bind(scan.canonical_menu_id)
    .bind(&scan.image_hash)
    .bind(&scan.menu_raw_text)
    .bind(&scan.restaurant_name)
    .bind(&scan.location)
    .bind(&scan.ocr_method)
    .bind(Utc::now())
    .execute(executor)
    .await
    .context("Failed to insert scan row")?;
    Ok(())
}

#[async_trait]
impl MenuStore for PgStore {
    async fn ensure_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_profile (id, created_at) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to ensure user row")?;
        Ok(())
    }

    async fn find_scan_by_image_hash(
        &self,
        user_id: Uuid,
        image_hash: &str,
    ) -> Result<Option<MenuScan>> {
        let row = sqlx::query(
            "SELECT id, user_id, canonical_menu_id, image_hash, menu_raw_text, \
                    restaurant_name, location, ocr_method, scanned_at \
             FROM menu_scan WHERE user_id = $1 AND image_hash = $2",
        )
        .bind(user_id)
        .bind(image_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query scan by image hash")?;
        row.as_ref().map(scan_from_row).transpose()
    }

    async fn find_canonical_by_signature(&self, hash: &str) -> Result<Option<CanonicalMenu>> {
        let row = sqlx::query(
            "SELECT id, normalized_restaurant_name, normalized_location, \
                    content_signature_hash, full_structure_hash, dish_count, \
                    first_scan_id, created_at \
             FROM canonical_menus WHERE content_signature_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query canonical by signature")?;
        row.as_ref().map(canonical_from_row).transpose()
    }

    async fn nearest_canonical(&self, embedding: &[f32]) -> Result<Option<(Uuid, f32)>> {
        let row = sqlx::query(
            "SELECT id, similarity FROM match_closest_canonical_menu($1::vector, 1)",
        )
        .bind(vector_literal(embedding))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query nearest canonical menu")?;
        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let similarity: f64 = row.try_get("similarity")?;
                Ok(Some((id, similarity as f32)))
            }
            None => Ok(None),
        }
    }

    async fn canonical_dish_count(&self, canonical_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT dish_count FROM canonical_menus WHERE id = $1")
            .bind(canonical_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to query canonical dish count")?;
        Ok(row.try_get("dish_count")?)
    }

    async fn create_canonical_menu(
        &self,
        menu: NewCanonicalMenu,
        scan: NewScan,
    ) -> Result<(Uuid, Uuid)> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let canonical_id = Uuid::new_v4();
        let scan_id = Uuid::new_v4();
        let embedding_literal = menu.embedding.as_deref().map(vector_literal);

        sqlx::query(
            "INSERT INTO canonical_menus \
             (id, normalized_restaurant_name, normalized_location, \
              content_signature_hash, full_structure_hash, dish_count, \
              embedding, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::vector, $8)",
        )
        .bind(canonical_id)
        .bind(&menu.normalized_restaurant_name)
        .bind(&menu.normalized_location)
        .bind(&menu.content_signature_hash)
        .bind(&menu.full_structure_hash)
        .bind(menu.dishes.len() as i64)
        .bind(embedding_literal)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("Failed to insert canonical menu")?;

        let scan = NewScan {
            canonical_menu_id: Some(canonical_id),
            ..scan
        };
        insert_scan_row(&mut *tx, scan_id, &scan).await?;

        sqlx::query("UPDATE canonical_menus SET first_scan_id = $1 WHERE id = $2")
            .bind(scan_id)
            .bind(canonical_id)
            .execute(&mut *tx)
            .await
            .context("Failed to set first scan id")?;

        for dish in &menu.dishes {
            sqlx::query(
                "INSERT INTO menu_dishes \
                 (id, canonical_menu_id, name, description, price, category, tags) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(canonical_id)
            .bind(&dish.name)
            .bind(&dish.description)
            .bind(dish.price)
            .bind(&dish.category)
            .bind(&dish.tags)
            .execute(&mut *tx)
            .await
            .context("Failed to insert dish row")?;
        }

        tx.commit().await.context("Failed to commit canonical menu")?;
        Ok((canonical_id, scan_id))
    }

    async fn insert_scan(&self, scan: NewScan) -> Result<Uuid> {
        let id = Uuid::new_v4();
        insert_scan_row(&self.pool, id, &scan).await?;
        Ok(id)
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT id FROM user_profile WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query user by customer id")?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    async fn update_subscription(&self, user_id: Uuid, update: SubscriptionUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE user_profile SET \
             stripe_customer_id = COALESCE($2, stripe_customer_id), \
             stripe_subscription_id = COALESCE($3, stripe_subscription_id), \
             subscription_status = $4, \
             plan = COALESCE($5, plan) \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(&update.customer_id)
        .bind(&update.subscription_id)
        .bind(&update.status)
        .bind(&update.plan)
        .execute(&self.pool)
        .await
        .context("Failed to update subscription")?;
        Ok(())
    }

    async fn update_subscription_status_by_customer(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_profile SET subscription_status = $2 WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .context("Failed to update subscription status")?;
        if result.rows_affected() == 0 {
            tracing::warn!(customer_id, "Subscription update matched no user");
        }
        Ok(())
    }

    async fn save_onboarding(&self, user_id: Uuid, data: OnboardingData) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query(
            "INSERT INTO user_goals_and_diets (user_id, goals, diets, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET goals = EXCLUDED.goals, diets = EXCLUDED.diets, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(&data.goals)
        .bind(&data.diets)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("Failed to save goals and diets")?;

        sqlx::query(
            "INSERT INTO user_preferences (user_id, preferences, updated_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
             SET preferences = EXCLUDED.preferences, updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(&data.preferences)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("Failed to save preferences")?;

        tx.commit().await.context("Failed to commit onboarding data")?;
        Ok(())
    }

    async fn save_plan(&self, user_id: Uuid, plan: &str) -> Result<()> {
        sqlx::query("UPDATE user_profile SET plan = $2 WHERE id = $1")
            .bind(user_id)
            .bind(plan)
            .execute(&self.pool)
            .await
            .context("Failed to save plan")?;
        Ok(())
    }
}

// ─── In-memory fake ─────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    users: HashSet<Uuid>,
    scans: Vec<MenuScan>,
    canonicals: Vec<CanonicalMenu>,
    embeddings: Vec<(Uuid, Vec<f32>)>,
    customers: HashMap<String, Uuid>,
    subscriptions: HashMap<Uuid, SubscriptionUpdate>,
    onboarding: HashMap<Uuid, OnboardingData>,
    plans: HashMap<Uuid, String>,
}

/// In-memory [`MenuStore`] with the same observable behavior as
/// [`PgStore`], including cosine-similarity nearest-neighbor lookup over
/// embeddings it has stored.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a payment customer id with a user, as checkout would.
    pub fn link_customer(&self, customer_id: &str, user_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.customers.insert(customer_id.to_string(), user_id);
    }

    pub fn scan_count(&self) -> usize {
        self.inner.lock().unwrap().scans.len()
    }

    pub fn canonical_count(&self) -> usize {
        self.inner.lock().unwrap().canonicals.len()
    }

    pub fn subscription_status(&self, user_id: Uuid) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.subscriptions.get(&user_id).map(|s| s.status.clone())
    }

    pub fn plan(&self, user_id: Uuid) -> Option<String> {
        self.inner.lock().unwrap().plans.get(&user_id).cloned()
    }

    pub fn saved_goals(&self, user_id: Uuid) -> Option<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        inner.onboarding.get(&user_id).map(|d| d.goals.clone())
    }
}

#[async_trait]
impl MenuStore for MemoryStore {
    async fn ensure_user(&self, user_id: Uuid) -> Result<()> {
        self.inner.lock().unwrap().users.insert(user_id);
        Ok(())
    }

    async fn find_scan_by_image_hash(
        &self,
        user_id: Uuid,
        image_hash: &str,
    ) -> Result<Option<MenuScan>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .scans
            .iter()
            .find(|s| s.user_id == user_id && s.image_hash == image_hash)
            .cloned())
    }

    async fn find_canonical_by_signature(&self, hash: &str) -> Result<Option<CanonicalMenu>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .canonicals
            .iter()
            .find(|c| c.content_signature_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn nearest_canonical(&self, embedding: &[f32]) -> Result<Option<(Uuid, f32)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .embeddings
            .iter()
            .map(|(id, stored)| (*id, cosine_similarity(embedding, stored)))
            .max_by(|a, b| a.1.total_cmp(&b.1)))
    }

    async fn canonical_dish_count(&self, canonical_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        inner
            .canonicals
            .iter()
            .find(|c| c.id == canonical_id)
            .map(|c| c.dish_count)
            .ok_or_else(|| anyhow::anyhow!("No canonical menu {}", canonical_id))
    }

    async fn create_canonical_menu(
        &self,
        menu: NewCanonicalMenu,
        scan: NewScan,
    ) -> Result<(Uuid, Uuid)> {
        let mut inner = self.inner.lock().unwrap();
        let canonical_id = Uuid::new_v4();
        let scan_id = Uuid::new_v4();

        inner.canonicals.push(CanonicalMenu {
            id: canonical_id,
            normalized_restaurant_name: menu.normalized_restaurant_name,
            normalized_location: menu.normalized_location,
            content_signature_hash: menu.content_signature_hash,
            full_structure_hash: menu.full_structure_hash,
            dish_count: menu.dishes.len() as i64,
            first_scan_id: Some(scan_id),
            created_at: Utc::now(),
        });
        if let Some(embedding) = menu.embedding {
            inner.embeddings.push((canonical_id, embedding));
        }
        inner.scans.push(MenuScan {
            id: scan_id,
            user_id: scan.user_id,
            canonical_menu_id: Some(canonical_id),
            image_hash: scan.image_hash,
            menu_raw_text: scan.menu_raw_text,
            restaurant_name: scan.restaurant_name,
            location: scan.location,
            ocr_method: scan.ocr_method,
            scanned_at: Utc::now(),
        });
        Ok((canonical_id, scan_id))
    }

    async fn insert_scan(&self, scan: NewScan) -> Result<Uuid> {
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        inner.scans.push(MenuScan {
            id,
            user_id: scan.user_id,
            canonical_menu_id: scan.canonical_menu_id,
            image_hash: scan.image_hash,
            menu_raw_text: scan.menu_raw_text,
            restaurant_name: scan.restaurant_name,
            location: scan.location,
            ocr_method: scan.ocr_method,
            scanned_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.customers.get(customer_id).copied())
    }

    async fn update_subscription(&self, user_id: Uuid, update: SubscriptionUpdate) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(customer_id) = &update.customer_id {
            inner.customers.insert(customer_id.clone(), user_id);
        }
        if let Some(plan) = &update.plan {
            inner.plans.insert(user_id, plan.clone());
        }
        inner.subscriptions.insert(user_id, update);
        Ok(())
    }

    async fn update_subscription_status_by_customer(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(user_id) = inner.customers.get(customer_id).copied() else {
            tracing::warn!(customer_id, "Subscription update matched no user");
            return Ok(());
        };
        match inner.subscriptions.get_mut(&user_id) {
            Some(sub) => sub.status = status.to_string(),
            None => {
                inner.subscriptions.insert(
                    user_id,
                    SubscriptionUpdate {
                        customer_id: Some(customer_id.to_string()),
                        subscription_id: None,
                        status: status.to_string(),
                        plan: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn save_onboarding(&self, user_id: Uuid, data: OnboardingData) -> Result<()> {
        self.inner.lock().unwrap().onboarding.insert(user_id, data);
        Ok(())
    }

    async fn save_plan(&self, user_id: Uuid, plan: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .plans
            .insert(user_id, plan.to_string());
        Ok(())
    }
}
