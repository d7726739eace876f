use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use uuid::Uuid;

use crate::assistant::{AssistantClient, AssistantError, QueryValidation};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::BotError;
use crate::model::drug::{DangerClass, DrugContent, DrugRecord};
use crate::model::user::UserTier;
use crate::runtime::task::JobStatus;
use crate::service::ledger::LedgerError;
use crate::service::query::QueryOutcome;
use crate::service::ratelimit::RateLimitError;
use crate::service::ServiceError;
use crate::storage::{CacheBackend, DrugStore, MemoryCache, MemoryStore, UserStore};
use crate::transport::{Transport, TransportError};

struct StubAssistant {
    generate_delay: Duration,
    danger: DangerClass,
}

impl StubAssistant {
    fn new() -> Self {
        Self {
            generate_delay: Duration::ZERO,
            danger: DangerClass::Safe,
        }
    }
}

#[async_trait]
impl AssistantClient for StubAssistant {
    async fn validate_query(&self, text: &str) -> Result<QueryValidation, AssistantError> {
        if text.trim().eq_ignore_ascii_case("notadrug") {
            return Ok(QueryValidation {
                exists: false,
                canonical_name: None,
            });
        }
        Ok(QueryValidation {
            exists: true,
            canonical_name: Some(text.trim().to_string()),
        })
    }

    async fn generate_drug_content(&self, _canonical_name: &str) -> Result<DrugContent, AssistantError> {
        sleep(self.generate_delay).await;
        Ok(content(self.danger))
    }
}

fn content(danger: DangerClass) -> DrugContent {
    DrugContent {
        overview: "overview".to_string(),
        mechanism: "mechanism".to_string(),
        dosages: vec!["200mg oral".to_string()],
        interactions: vec![],
        analogs: vec![],
        research: vec![],
        danger,
    }
}

#[derive(Default)]
struct StubTransport {
    sent: AtomicUsize,
    edited: AtomicUsize,
}

#[async_trait]
impl Transport for StubTransport {
    async fn send_message(&self, _telegram_user_id: u64, _text: &str) -> Result<i32, TransportError> {
        let id = self.sent.fetch_add(1, Ordering::SeqCst) as i32 + 1;
        Ok(id)
    }

    async fn edit_message(&self, _: u64, _: i32, _: &str) -> Result<(), TransportError> {
        self.edited.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestApp {
    context: AppContext,
    store: Arc<MemoryStore>,
    transport: Arc<StubTransport>,
}

async fn build_app(mut config: AppConfig, assistant: StubAssistant) -> TestApp {
    let _ = pretty_env_logger::try_init_timed();
    config.runtime.poll_interval = Duration::from_millis(10);

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(StubTransport::default());
    let context = AppContext::new(
        config,
        CacheBackend::Memory(MemoryCache::new(64)),
        Arc::clone(&store) as Arc<dyn UserStore>,
        Arc::clone(&store) as Arc<dyn DrugStore>,
        Arc::new(assistant),
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .await
    .expect("context should initialize");

    TestApp {
        context,
        store,
        transport,
    }
}

async fn wait_for_done(app: &TestApp, job_id: Uuid) {
    for _ in 0..100 {
        if let Some(job) = app.context.services.query.job_status(job_id) {
            if job.status == JobStatus::Done {
                return;
            }
            assert_ne!(job.status, JobStatus::Failed, "job failed: {:?}", job.error);
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish in time", job_id);
}

#[tokio::test]
async fn query_enqueues_once_then_serves_the_record() {
    let assistant = StubAssistant {
        generate_delay: Duration::from_millis(150),
        ..StubAssistant::new()
    };
    let app = build_app(AppConfig::default(), assistant).await;
    let query = &app.context.services.query;

    let first = query.handle_drug_query(1001, "Ibuprofen").await.unwrap();
    let job_id = match first {
        QueryOutcome::Queued { job_id } => job_id,
        other => panic!("expected Queued, got {:?}", other),
    };

    // A concurrent request for the same substance, differently spelled,
    // must ride the same job.
    let second = query.handle_drug_query(1002, "  ibuprofen ").await.unwrap();
    match second {
        QueryOutcome::AlreadyQueued { job_id: existing } => assert_eq!(existing, job_id),
        other => panic!("expected AlreadyQueued, got {:?}", other),
    }

    wait_for_done(&app, job_id).await;
    // One progress message, edited in place when the record landed.
    assert_eq!(app.transport.sent.load(Ordering::SeqCst), 1);
    assert_eq!(app.transport.edited.load(Ordering::SeqCst), 1);

    let third = query.handle_drug_query(1001, "IBUPROFEN").await.unwrap();
    match third {
        QueryOutcome::Found(record) => assert_eq!(record.name_key, "ibuprofen"),
        other => panic!("expected Found, got {:?}", other),
    }

    // Two charged queries for user 1001, one for 1002.
    let requester = app.store.find_by_telegram(1001).await.unwrap().unwrap();
    assert_eq!(requester.used_tokens, 2);
    assert_eq!(requester.allowed_tokens, 8);
}

#[tokio::test]
async fn unknown_substance_is_free() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;

    let outcome = app
        .context
        .services
        .query
        .handle_drug_query(42, "notadrug")
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::UnknownSubstance));

    let user = app.store.find_by_telegram(42).await.unwrap().unwrap();
    assert_eq!(user.used_tokens, 0);
    assert_eq!(user.allowed_tokens, 10);
}

#[tokio::test]
async fn premium_gated_record_requires_premium() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;
    app.store
        .upsert_drug(&DrugRecord::new("Ketamine", content(DangerClass::PremiumGated)))
        .await
        .unwrap();

    let outcome = app
        .context
        .services
        .query
        .handle_drug_query(7, "ketamine")
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::PremiumRequired));

    // Gated refusals are not charged.
    let user = app.store.find_by_telegram(7).await.unwrap().unwrap();
    assert_eq!(user.used_tokens, 0);

    app.context
        .services
        .ledger
        .set_tier(user.id, UserTier::Premium, 30)
        .await
        .unwrap();

    let outcome = app
        .context
        .services
        .query
        .handle_drug_query(7, "ketamine")
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::Found(_)));
}

#[tokio::test]
async fn forbidden_record_is_refused_even_for_premium() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;
    app.store
        .upsert_drug(&DrugRecord::new("Carfentanil", content(DangerClass::Forbidden)))
        .await
        .unwrap();

    let user = app.context.services.query.resolve_profile(9).await.unwrap();
    app.context
        .services
        .ledger
        .set_tier(user.id, UserTier::Premium, 30)
        .await
        .unwrap();

    let outcome = app
        .context
        .services
        .query
        .handle_drug_query(9, "carfentanil")
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::Forbidden));
}

#[tokio::test]
async fn throttled_query_reports_retry_after() {
    let mut config = AppConfig::default();
    config.tiers.default.max_requests = 2;
    let app = build_app(config, StubAssistant::new()).await;
    let query = &app.context.services.query;

    app.store
        .upsert_drug(&DrugRecord::new("Aspirin", content(DangerClass::Safe)))
        .await
        .unwrap();

    for _ in 0..2 {
        query.handle_drug_query(5, "aspirin").await.unwrap();
    }

    let err = query.handle_drug_query(5, "aspirin").await.unwrap_err();
    match err {
        BotError::ServiceError(ServiceError::RateLimit(RateLimitError::Limited { retry_after })) => {
            assert!(retry_after > Duration::ZERO)
        }
        other => panic!("expected RateLimited, got {}", other),
    }
}

#[tokio::test]
async fn exhausted_balance_is_rejected_with_insufficient_credits() {
    let mut config = AppConfig::default();
    config.tiers.default.token_cap = 1;
    let app = build_app(config, StubAssistant::new()).await;
    let query = &app.context.services.query;

    app.store
        .upsert_drug(&DrugRecord::new("Aspirin", content(DangerClass::Safe)))
        .await
        .unwrap();

    query.handle_drug_query(5, "aspirin").await.unwrap();

    let err = query.handle_drug_query(5, "aspirin").await.unwrap_err();
    assert!(matches!(
        err,
        BotError::ServiceError(ServiceError::Ledger(LedgerError::InsufficientCredits { .. }))
    ));
}

#[tokio::test]
async fn update_request_regenerates_the_stored_record() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;
    let mut stale = content(DangerClass::Safe);
    stale.overview = "last year's text".to_string();
    app.store
        .upsert_drug(&DrugRecord::new("Aspirin", stale))
        .await
        .unwrap();

    let outcome = app
        .context
        .services
        .query
        .request_drug_update(11, "aspirin")
        .await
        .unwrap();
    let job_id = match outcome {
        QueryOutcome::Queued { job_id } => job_id,
        other => panic!("expected Queued, got {:?}", other),
    };

    wait_for_done(&app, job_id).await;

    let record = app.store.get_drug("aspirin").await.unwrap().unwrap();
    assert_eq!(record.content.overview, "overview");

    let user = app.store.find_by_telegram(11).await.unwrap().unwrap();
    assert_eq!(user.used_tokens, 1);
}

#[tokio::test]
async fn referral_on_first_contact_pays_the_referrer() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;

    let result = app
        .context
        .services
        .query
        .attribute_referral(100, 200)
        .await
        .unwrap();
    assert_eq!(result.referral_count, 1);
    assert_eq!(result.granted_tokens, 10);

    let referrer = app.store.find_by_telegram(100).await.unwrap().unwrap();
    assert_eq!(referrer.additional_tokens, 10);

    // The cached referrer profile was invalidated by the grant, so the
    // next resolve sees the new balance.
    let fresh = app.context.services.query.resolve_profile(100).await.unwrap();
    assert_eq!(fresh.additional_tokens, 10);
}

#[tokio::test]
async fn profile_cache_tracks_ledger_mutations() {
    let app = build_app(AppConfig::default(), StubAssistant::new()).await;
    let query = &app.context.services.query;

    let before = query.resolve_profile(77).await.unwrap();
    assert_eq!(before.additional_tokens, 0);

    app.context.services.ledger.grant(before.id, 25).await.unwrap();

    let after = query.resolve_profile(77).await.unwrap();
    assert_eq!(after.additional_tokens, 25);
}
