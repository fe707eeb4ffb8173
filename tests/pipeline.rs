//! End-to-end tests over the agent pipeline and the scan dedup flow,
//! using scripted in-process fakes for the model, OCR, and embedding
//! seams and the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use nutriflow::agents::ranker::DishRanker;
use nutriflow::billing;
use nutriflow::config::{DedupConfig, LlmConfig, RankerConfig, StructuringConfig};
use nutriflow::dedup::ScanPipeline;
use nutriflow::embedding::EmbeddingProvider;
use nutriflow::llm::{ChatProvider, ChatRequest, ChatResponse};
use nutriflow::models::{
    MacroLevel, MacroProfile, MenuCategory, MenuItem, SaveMethod, UserProfile,
};
use nutriflow::ocr::{OcrExtraction, TextExtractor};
use nutriflow::orchestrator::Orchestrator;
use nutriflow::store::{MemoryStore, MenuStore, SubscriptionUpdate};
use nutriflow::structure::structure_menu;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Replies chosen by prompt content; counts every call.
struct ScriptedProvider {
    replies: Vec<(&'static str, String)>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(replies: Vec<(&'static str, String)>) -> Self {
        Self {
            replies,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (marker, reply) in &self.replies {
            if request.prompt.contains(marker) {
                return Ok(ChatResponse {
                    content: reply.clone(),
                    model: request.model.clone(),
                    total_tokens: 10,
                });
            }
        }
        anyhow::bail!("No scripted reply for prompt")
    }
}

/// Every call fails at the transport level.
struct FailingProvider;

#[async_trait]
impl ChatProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        anyhow::bail!("connection refused")
    }
}

struct FakeOcr {
    text: String,
}

#[async_trait]
impl TextExtractor for FakeOcr {
    async fn extract(&self, _image: &[u8]) -> anyhow::Result<OcrExtraction> {
        Ok(OcrExtraction {
            text: self.text.clone(),
            model: "fake-vision".to_string(),
        })
    }
}

/// Returns the same vector for every input.
struct ConstantEmbeddings;

#[async_trait]
impl EmbeddingProvider for ConstantEmbeddings {
    fn name(&self) -> &str {
        "constant"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.6, 0.8, 0.0])
    }
}

fn llm_config() -> LlmConfig {
    LlmConfig {
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        temperature: 0.2,
        max_tokens: 1024,
        timeout_secs: 5,
    }
}

fn ranker_config() -> RankerConfig {
    RankerConfig {
        skip_below: 20.0,
        skip_above: 90.0,
    }
}

fn structuring_config() -> StructuringConfig {
    StructuringConfig {
        model: "gpt-4o-mini".to_string(),
        timeout_secs: 5,
    }
}

fn dedup_config() -> DedupConfig {
    DedupConfig {
        similarity_threshold: 0.9,
    }
}

// ─── Agent pipeline ─────────────────────────────────────────────────

fn full_script() -> Vec<(&'static str, String)> {
    vec![
        (
            "Extract every distinct dish",
            r#"{"items": [
                {"title": "Grilled Salmon", "description": "with steamed greens", "price": "18.00", "section": "Mains"},
                {"title": "Caesar Salad", "description": null, "price": "11.00", "section": "Starters"},
                {"title": "Chocolate Lava Cake", "description": "warm, with cream", "price": "9.00", "section": "Desserts"}
            ]}"#
            .to_string(),
        ),
        (
            "Score each dish",
            r#"{"scores": [
                {"title": "Grilled Salmon", "score": 85, "confidence": 0.9},
                {"title": "Caesar Salad", "score": 55, "confidence": 0.8},
                {"title": "Chocolate Lava Cake", "score": 15, "confidence": 0.9}
            ]}"#
            .to_string(),
        ),
        (
            "pick exactly one healthiest",
            r#"{"healthiest": "Grilled Salmon", "balanced": "Caesar Salad",
                "indulgent": "Chocolate Lava Cake",
                "rationale": {"healthiest": "Lean protein.", "balanced": "Middle ground.",
                              "indulgent": "Dessert."}}"#
                .to_string(),
        ),
        (
            "Estimate the nutritional profile",
            r#"{"calories": 520, "protein": "High", "carbs": "Low", "fat": "Mid",
                "sugar": "Low", "confidence": 0.85}"#
                .to_string(),
        ),
        (
            "Write a short health summary",
            r#"{"summary": "A solid choice.", "short_term": "Steady energy.",
                "long_term": "Supports your goals."}"#
                .to_string(),
        ),
        (
            "Produce a final health score",
            r#"{"score": 82, "category": "Healthiest", "confidence": 0.9}"#.to_string(),
        ),
        (
            "too close to call",
            r#"{"score": 68, "confidence": 0.7}"#.to_string(),
        ),
    ]
}

#[tokio::test]
async fn full_analysis_with_scripted_model() {
    let provider = Arc::new(ScriptedProvider::new(full_script()));
    let orchestrator = Orchestrator::new(provider.clone(), llm_config(), ranker_config());
    let profile = UserProfile {
        goals: vec!["eat more protein".to_string()],
        restrictions: vec![],
        recent_patterns: vec![],
    };

    let analysis = orchestrator.analyze("menu text", &profile).await;

    assert!(!analysis.degraded);
    assert_eq!(analysis.top_dishes.healthiest.title, "Grilled Salmon");
    assert_eq!(analysis.top_dishes.balanced.title, "Caesar Salad");
    assert_eq!(analysis.top_dishes.indulgent.title, "Chocolate Lava Cake");
    // Average of 85, 55, 15.
    assert!((analysis.average_menu_score - 51.666_668).abs() < 0.01);
    assert_eq!(analysis.menu_category, MenuCategory::Balanced);
    assert_eq!(analysis.top_dishes.healthiest.score, 82.0);
    assert!(!analysis.top_dishes.healthiest.summary.is_empty());
    assert!(provider.call_count() > 0);
}

#[tokio::test]
async fn analysis_degrades_instead_of_failing() {
    let provider = Arc::new(FailingProvider);
    let orchestrator = Orchestrator::new(provider, llm_config(), ranker_config());
    let profile = UserProfile::default();

    let text = "Pad Thai 12.50\nGreen Curry 13.00\nMango Sticky Rice 8.00";
    let analysis = orchestrator.analyze(text, &profile).await;

    // Every stage fell back, but the full output shape is intact.
    assert!(analysis.degraded);
    assert!(!analysis.top_dishes.healthiest.title.is_empty());
    assert!(!analysis.top_dishes.balanced.title.is_empty());
    assert!(!analysis.top_dishes.indulgent.title.is_empty());
    assert!(!analysis.top_dishes.healthiest.summary.is_empty());
    assert!((0.0..=100.0).contains(&analysis.average_menu_score));
    assert!((0.0..=100.0).contains(&analysis.top_dishes.healthiest.score));
}

#[tokio::test]
async fn unparseable_reply_falls_back_with_full_shape() {
    // The model answers, but not with JSON.
    struct ChattyProvider;

    #[async_trait]
    impl ChatProvider for ChattyProvider {
        fn name(&self) -> &str {
            "chatty"
        }

        async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: "Sorry, I can only describe the dish in prose.".to_string(),
                model: request.model.clone(),
                total_tokens: 5,
            })
        }
    }

    let item = MenuItem::titled("Mystery Stew");
    let out =
        nutriflow::agents::macro_profiler::run(&ChattyProvider, &llm_config(), &item).await;
    assert!(out.is_fallback());
    let macros = out.into_inner();
    assert_eq!(macros.calories, 500);
    assert_eq!(macros.protein, MacroLevel::Mid);
    assert_eq!(macros.sugar, MacroLevel::Low);

    let out = nutriflow::agents::benefits::run(
        &ChattyProvider,
        &llm_config(),
        &item,
        &macros,
        &UserProfile::default(),
    )
    .await;
    assert!(out.is_fallback());
    let summary = out.into_inner();
    assert!(summary.summary.contains("Mystery Stew"));
    assert!(!summary.short_term.is_empty());
    assert!(!summary.long_term.is_empty());
}

#[tokio::test]
async fn analysis_of_empty_text_uses_placeholders() {
    let provider = Arc::new(FailingProvider);
    let orchestrator = Orchestrator::new(provider, llm_config(), ranker_config());

    let analysis = orchestrator.analyze("", &UserProfile::default()).await;

    assert!(analysis.degraded);
    assert_eq!(analysis.top_dishes.healthiest.title, "No dish available");
}

#[tokio::test]
async fn ranker_skips_model_outside_the_band() {
    let provider = ScriptedProvider::new(vec![]);
    let ranker = DishRanker::new(ranker_config());

    // Heavy macros and a pile of unhealthy keywords push the score to 0.
    let indulgent = MenuItem {
        title: "Deep Fried Chocolate Cake".to_string(),
        description: Some("battered, creamy, sweetened caramel".to_string()),
        price: None,
        section: None,
    };
    let heavy = MacroProfile {
        calories: 1100,
        protein: MacroLevel::Low,
        carbs: MacroLevel::High,
        fat: MacroLevel::High,
        sugar: MacroLevel::High,
        confidence: 0.9,
    };
    let out = ranker.score(&provider, &llm_config(), &indulgent, &heavy).await;
    assert!(!out.is_fallback());
    assert_eq!(out.value().score, 0.0);
    assert_eq!(provider.call_count(), 0);

    // A clearly healthy dish also skips the call.
    let healthy = MenuItem {
        title: "Grilled Garden Salad".to_string(),
        description: Some("fresh steamed vegetable, quinoa, lean tofu".to_string()),
        price: None,
        section: None,
    };
    let light = MacroProfile {
        calories: 250,
        protein: MacroLevel::High,
        carbs: MacroLevel::Low,
        fat: MacroLevel::Low,
        sugar: MacroLevel::Low,
        confidence: 0.9,
    };
    let out = ranker.score(&provider, &llm_config(), &healthy, &light).await;
    assert!(out.value().score >= 90.0);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn ranker_refines_ambiguous_scores_with_one_call() {
    let provider = ScriptedProvider::new(vec![(
        "too close to call",
        r#"{"score": 62, "confidence": 0.7}"#.to_string(),
    )]);
    let ranker = DishRanker::new(ranker_config());

    let item = MenuItem::titled("House Plate");
    let macros = MacroProfile {
        calories: 500,
        protein: MacroLevel::Mid,
        carbs: MacroLevel::Mid,
        fat: MacroLevel::Mid,
        sugar: MacroLevel::Mid,
        confidence: 0.8,
    };
    let out = ranker.score(&provider, &llm_config(), &item, &macros).await;
    assert_eq!(provider.call_count(), 1);
    assert_eq!(out.value().score, 62.0);
}

// ─── Structuring ────────────────────────────────────────────────────

#[tokio::test]
async fn structuring_recovers_location_from_raw_text() {
    // The model returns a menu without a location; the address heuristic
    // should fill it from the OCR text.
    let provider = ScriptedProvider::new(vec![(
        "Convert this OCR menu text",
        r#"{"restaurant": {"name": "The Golden Fork", "location": null},
            "categories": [{"name": "Mains", "dishes": [
                {"name": "Salmon", "description": null, "price": 18.0, "dietary_tags": []}
            ]}]}"#
            .to_string(),
    )]);
    let raw = "The Golden Fork\n742 Evergreen Ave, Springfield, 49007\nSalmon 18.00";

    let menu = structure_menu(&provider, &structuring_config(), raw)
        .await
        .into_inner();

    assert_eq!(menu.restaurant.name.as_deref(), Some("The Golden Fork"));
    let location = menu.restaurant.location.expect("location recovered");
    assert!(location.contains("Evergreen"));
}

// ─── Scan dedup flow ────────────────────────────────────────────────

const MENU_A: &str = "The Golden Fork\n742 Evergreen Ave, Springfield\nGrilled Salmon 18.00\nCaesar Salad 11.00";

fn structuring_reply(dishes: &[(&str, f64)]) -> String {
    let dish_json: Vec<String> = dishes
        .iter()
        .map(|(name, price)| {
            format!(
                r#"{{"name": "{}", "description": null, "price": {}, "dietary_tags": []}}"#,
                name, price
            )
        })
        .collect();
    format!(
        r#"{{"restaurant": {{"name": "The Golden Fork", "location": "742 Evergreen Ave"}},
            "categories": [{{"name": "Menu", "dishes": [{}]}}]}}"#,
        dish_json.join(",")
    )
}

fn pipeline_with(
    store: Arc<MemoryStore>,
    ocr_text: &str,
    dishes: &[(&str, f64)],
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
) -> ScanPipeline {
    let provider = Arc::new(ScriptedProvider::new(vec![(
        "Convert this OCR menu text",
        structuring_reply(dishes),
    )]));
    let ocr = Arc::new(FakeOcr {
        text: ocr_text.to_string(),
    });
    ScanPipeline::new(
        store,
        provider,
        ocr,
        embeddings,
        structuring_config(),
        dedup_config(),
    )
}

#[tokio::test]
async fn same_image_same_user_short_circuits() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        MENU_A,
        &[("Grilled Salmon", 18.0), ("Caesar Salad", 11.0)],
        None,
    );
    let user = Uuid::new_v4();
    let image = b"jpeg bytes of the menu photo";

    let first = pipeline.save_scan(user, image).await.unwrap();
    assert_eq!(first.method, SaveMethod::NewCanonicalMenu);
    assert!(!first.is_duplicate);
    assert_eq!(first.dish_count, Some(2));

    let second = pipeline.save_scan(user, image).await.unwrap();
    assert_eq!(second.method, SaveMethod::DuplicateImageHash);
    assert!(second.is_duplicate);
    assert_eq!(second.scan_id, first.scan_id);
    assert_eq!(second.canonical_id, first.canonical_id);
    // No new rows on the short-circuit path.
    assert_eq!(store.scan_count(), 1);
    assert_eq!(store.canonical_count(), 1);
}

#[tokio::test]
async fn same_menu_different_photo_reuses_by_signature() {
    let store = Arc::new(MemoryStore::new());
    let dishes = [("Grilled Salmon", 18.0), ("Caesar Salad", 11.0)];
    let pipeline = pipeline_with(store.clone(), MENU_A, &dishes, None);

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let first = pipeline.save_scan(alice, b"photo one").await.unwrap();
    let second = pipeline.save_scan(bob, b"photo two").await.unwrap();

    assert_eq!(second.method, SaveMethod::ContentSignatureReuse);
    assert!(second.is_duplicate);
    assert_eq!(second.canonical_id, first.canonical_id);
    assert_eq!(second.dish_count, Some(2));
    assert_eq!(
        second.content_signature_hash,
        first.content_signature_hash
    );
    // A reuse adds a scan row but never a canonical row.
    assert_eq!(store.scan_count(), 2);
    assert_eq!(store.canonical_count(), 1);
}

#[tokio::test]
async fn near_identical_menu_reuses_by_similarity() {
    let store = Arc::new(MemoryStore::new());
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(ConstantEmbeddings);
    let first_pipeline = pipeline_with(
        store.clone(),
        MENU_A,
        &[("Grilled Salmon", 18.0), ("Caesar Salad", 11.0)],
        Some(embeddings.clone()),
    );
    let first = first_pipeline
        .save_scan(Uuid::new_v4(), b"photo one")
        .await
        .unwrap();

    // Different dish names mean the signature differs, but the identity
    // embedding is closer than the threshold.
    let second_pipeline = pipeline_with(
        store.clone(),
        MENU_A,
        &[("Grilled Salmon Fillet", 18.0), ("Cesar Salad", 11.0)],
        Some(embeddings),
    );
    let second = second_pipeline
        .save_scan(Uuid::new_v4(), b"photo two")
        .await
        .unwrap();

    assert_eq!(second.method, SaveMethod::VectorSimilarityReuse);
    assert_eq!(second.canonical_id, first.canonical_id);
    assert_eq!(store.canonical_count(), 1);
    assert_eq!(store.scan_count(), 2);
}

#[tokio::test]
async fn different_menus_create_separate_canonicals() {
    let store = Arc::new(MemoryStore::new());
    let first_pipeline = pipeline_with(
        store.clone(),
        MENU_A,
        &[("Grilled Salmon", 18.0), ("Caesar Salad", 11.0)],
        None,
    );
    first_pipeline
        .save_scan(Uuid::new_v4(), b"photo one")
        .await
        .unwrap();

    let second_pipeline = pipeline_with(
        store.clone(),
        "Taco Palace\nBarbacoa Taco 4.00",
        &[("Barbacoa Taco", 4.0), ("Elote", 5.0)],
        None,
    );
    let second = second_pipeline
        .save_scan(Uuid::new_v4(), b"photo two")
        .await
        .unwrap();

    assert_eq!(second.method, SaveMethod::NewCanonicalMenu);
    assert_eq!(store.canonical_count(), 2);
}

// ─── Billing events ─────────────────────────────────────────────────

#[tokio::test]
async fn billing_event_sequence_updates_subscription_state() {
    let store = MemoryStore::new();
    let user = Uuid::new_v4();

    let completed = serde_json::json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "client_reference_id": user.to_string(),
            "customer": "cus_42",
            "subscription": "sub_42",
            "metadata": { "plan": "annual" }
        }}
    });
    billing::handle_event(&store, &completed).await.unwrap();
    assert_eq!(store.subscription_status(user).as_deref(), Some("active"));
    assert_eq!(store.plan(user).as_deref(), Some("annual"));

    let failed = serde_json::json!({
        "type": "invoice.payment_failed",
        "data": { "object": { "customer": "cus_42" } }
    });
    billing::handle_event(&store, &failed).await.unwrap();
    assert_eq!(store.subscription_status(user).as_deref(), Some("past_due"));

    let deleted = serde_json::json!({
        "type": "customer.subscription.deleted",
        "data": { "object": { "customer": "cus_42" } }
    });
    billing::handle_event(&store, &deleted).await.unwrap();
    assert_eq!(store.subscription_status(user).as_deref(), Some("canceled"));

    // Redelivery settles on the same state.
    billing::handle_event(&store, &deleted).await.unwrap();
    assert_eq!(store.subscription_status(user).as_deref(), Some("canceled"));

    // Unknown events are ignored without error.
    let unknown = serde_json::json!({ "type": "charge.refunded", "data": { "object": {} } });
    billing::handle_event(&store, &unknown).await.unwrap();
}

#[tokio::test]
async fn onboarding_data_round_trips_through_the_store() {
    let store = MemoryStore::new();
    let user = Uuid::new_v4();
    store.ensure_user(user).await.unwrap();
    store
        .save_onboarding(
            user,
            nutriflow::store::OnboardingData {
                goals: vec!["lose weight".to_string()],
                diets: vec!["vegetarian".to_string()],
                preferences: serde_json::json!({ "spice": "medium" }),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        store.saved_goals(user),
        Some(vec!["lose weight".to_string()])
    );

    store.save_plan(user, "weekly").await.unwrap();
    assert_eq!(store.plan(user).as_deref(), Some("weekly"));
}

#[tokio::test]
async fn subscription_update_links_customer_for_later_events() {
    let store = MemoryStore::new();
    let user = Uuid::new_v4();
    store
        .update_subscription(
            user,
            SubscriptionUpdate {
                customer_id: Some("cus_7".to_string()),
                subscription_id: None,
                status: "active".to_string(),
                plan: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(
        store.find_user_by_customer_id("cus_7").await.unwrap(),
        Some(user)
    );
}
