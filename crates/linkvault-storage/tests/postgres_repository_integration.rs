use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use linkvault_core::{
    BatchRequest, IdGenerator, NanoIdGenerator, Repository, RepositoryError, RepositoryStats,
    SeqGenerator, ShortId,
};
use linkvault_storage::postgres::DB_ID_ATTEMPTS;
use linkvault_storage::{BatcherConfig, PostgresRepository};
use linkvault_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

struct Fixture<G = NanoIdGenerator> {
    _postgres: PostgresServer,
    url: String,
    repo: PostgresRepository<G>,
}

impl Fixture {
    async fn start() -> Option<Self> {
        Self::with_generator(NanoIdGenerator::new()).await
    }
}

impl<G: IdGenerator> Fixture<G> {
    /// Returns `None` when no container runtime is reachable.
    async fn with_generator(generator: G) -> Option<Self> {
        let postgres = match PostgresServer::new(PostgresConfig::builder().build()).await {
            Ok(postgres) => postgres,
            Err(err) => {
                eprintln!("skipping postgres test, container unavailable: {err}");
                return None;
            }
        };
        let url = postgres.database_url().to_string();
        let pool = connect_with_retry(&url).await;

        let batcher = BatcherConfig::builder()
            .flush_interval(Duration::from_millis(50))
            .build();
        let repo = PostgresRepository::with_pool(pool, generator, batcher)
            .await
            .expect("bootstrap schema");

        Some(Self {
            _postgres: postgres,
            url,
            repo,
        })
    }
}

async fn connect_with_retry(url: &str) -> PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

/// Always hands out the same id.
struct FixedGenerator(&'static str);

impl IdGenerator for FixedGenerator {
    fn generate(&self) -> ShortId {
        ShortId::new_unchecked(self.0)
    }
}

fn batch(entries: &[(&str, &str)]) -> BatchRequest {
    entries
        .iter()
        .map(|(correlation_id, url)| (correlation_id.to_string(), url.to_string()))
        .collect()
}

async fn wait_until_deleted<R: Repository + ?Sized>(repo: &R, id: &ShortId) {
    for _ in 0..100 {
        if let Err(RepositoryError::Deleted(_)) = repo.restore(id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{id} was not deleted in time");
}

#[tokio::test]
async fn store_and_restore() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };

    let outcome = fixture.repo.store("u1", "https://a.com").await.unwrap();
    assert!(outcome.is_created());

    let url = fixture.repo.restore(outcome.id()).await.unwrap();
    assert_eq!(url, "https://a.com");
}

#[tokio::test]
async fn restore_nonexistent() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let id = ShortId::new_unchecked("ZZZZZZZZ");

    let err = fixture.repo.restore(&id).await.unwrap_err();
    assert_eq!(err, RepositoryError::NotFound(id));
}

#[tokio::test]
async fn same_url_returns_existing_id_for_any_owner() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };

    let first = fixture.repo.store("u1", "https://a.com").await.unwrap();
    let second = fixture.repo.store("u2", "https://a.com").await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.id(), second.id());
    assert_eq!(
        second.into_result(),
        Err(RepositoryError::AlreadyShortened(first.id().clone()))
    );
    assert!(fixture.repo.user_storage("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_stores_of_one_url_agree_on_the_id() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let repo = Arc::new(fixture.repo);
    let mut handles = vec![];

    for i in 0..8 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.store(&format!("u{i}"), "https://same.example")
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        created += usize::from(outcome.is_created());
        ids.insert(outcome.into_id());
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn concurrent_stores_of_distinct_urls_get_distinct_ids() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let repo = Arc::new(fixture.repo);
    let mut handles = vec![];

    for i in 0..20 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.store("u1", &format!("https://example{i}.com"))
                .await
                .unwrap()
                .into_id()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    assert_eq!(ids.len(), 20);
    assert_eq!(repo.user_storage("u1").await.unwrap().len(), 20);
}

#[tokio::test]
async fn store_fails_when_ids_are_exhausted() {
    let Some(fixture) = Fixture::with_generator(FixedGenerator("AAAAAAAA")).await else {
        return;
    };

    fixture.repo.store("u1", "https://a.com").await.unwrap();
    let err = fixture.repo.store("u1", "https://b.com").await.unwrap_err();

    assert_eq!(
        err,
        RepositoryError::UnableGenerateId {
            attempts: DB_ID_ATTEMPTS
        }
    );
}

#[tokio::test]
async fn unstore_soft_deletes_eventually() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let id = fixture
        .repo
        .store("u1", "https://a.com")
        .await
        .unwrap()
        .into_id();

    fixture.repo.unstore("u1", vec![id.clone()]).await.unwrap();
    wait_until_deleted(&fixture.repo, &id).await;

    assert_eq!(
        fixture.repo.restore(&id).await,
        Err(RepositoryError::Deleted(id.clone()))
    );
}

#[tokio::test]
async fn unstore_ignores_links_of_other_owners() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let foreign = fixture
        .repo
        .store("u1", "https://a.com")
        .await
        .unwrap()
        .into_id();
    let own = fixture
        .repo
        .store("u2", "https://b.com")
        .await
        .unwrap()
        .into_id();

    fixture
        .repo
        .unstore("u2", vec![foreign.clone()])
        .await
        .unwrap();
    fixture.repo.unstore("u2", vec![own.clone()]).await.unwrap();
    wait_until_deleted(&fixture.repo, &own).await;
    // give any later batch time to land
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(fixture.repo.restore(&foreign).await.unwrap(), "https://a.com");
}

#[tokio::test]
async fn unstore_with_unknown_ids_is_accepted() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };

    fixture
        .repo
        .unstore("u1", vec![ShortId::new_unchecked("missing1")])
        .await
        .unwrap();
    fixture.repo.unstore("u1", vec![]).await.unwrap();
}

#[tokio::test]
async fn user_storage_includes_tombstoned_links() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    assert!(fixture.repo.user_storage("u1").await.unwrap().is_empty());

    let kept = fixture
        .repo
        .store("u1", "https://a.com")
        .await
        .unwrap()
        .into_id();
    let deleted = fixture
        .repo
        .store("u1", "https://b.com")
        .await
        .unwrap()
        .into_id();
    fixture
        .repo
        .unstore("u1", vec![deleted.clone()])
        .await
        .unwrap();
    wait_until_deleted(&fixture.repo, &deleted).await;

    let links = fixture.repo.user_storage("u1").await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[&kept], "https://a.com");
    assert_eq!(links[&deleted], "https://b.com");
}

#[tokio::test]
async fn store_batch_returns_distinct_ids() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };

    let outcome = fixture
        .repo
        .store_batch(
            "u1",
            batch(&[("c1", "https://x.com"), ("c2", "https://y.com")]),
        )
        .await
        .unwrap();

    assert!(!outcome.is_already_shortened());
    assert_ne!(outcome.ids["c1"], outcome.ids["c2"]);
    assert_eq!(
        fixture.repo.restore(&outcome.ids["c1"]).await.unwrap(),
        "https://x.com"
    );
}

#[tokio::test]
async fn store_batch_reports_conflicts_and_commits() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let existing = fixture
        .repo
        .store("u1", "https://x.com")
        .await
        .unwrap()
        .into_id();

    let outcome = fixture
        .repo
        .store_batch(
            "u1",
            batch(&[("c1", "https://x.com"), ("c2", "https://z.com")]),
        )
        .await
        .unwrap();

    assert!(outcome.is_already_shortened());
    assert_eq!(outcome.conflicts, vec!["c1".to_string()]);
    assert_eq!(outcome.ids["c1"], existing);
    assert_eq!(
        fixture.repo.restore(&outcome.ids["c2"]).await.unwrap(),
        "https://z.com"
    );
}

#[tokio::test]
async fn store_batch_rolls_back_on_failure() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };

    // postgres rejects NUL bytes in text values
    let result = fixture
        .repo
        .store_batch(
            "u1",
            batch(&[("c1", "https://good.com"), ("c2", "https://bad\0.com")]),
        )
        .await;

    assert!(result.is_err());
    assert!(fixture.repo.user_storage("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn sequential_ids_are_used_verbatim() {
    let Some(fixture) = Fixture::with_generator(SeqGenerator::with_prefix("lv")).await else {
        return;
    };

    let id = fixture
        .repo
        .store("u1", "https://a.com")
        .await
        .unwrap()
        .into_id();

    assert_eq!(id.as_str(), "lv000000");
}

#[tokio::test]
async fn ping_and_stats() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    fixture.repo.ping().await.unwrap();

    fixture.repo.store("u1", "https://a.com").await.unwrap();
    fixture.repo.store("u1", "https://b.com").await.unwrap();
    fixture.repo.store("u2", "https://c.com").await.unwrap();

    let stats = fixture.repo.stats().await.unwrap();
    assert_eq!(stats, RepositoryStats { links: 3, owners: 2 });
}

#[tokio::test]
async fn close_right_after_unstore_flushes_the_deletes() {
    let Some(fixture) = Fixture::start().await else {
        return;
    };
    let pool = connect_with_retry(&fixture.url).await;
    let repo = PostgresRepository::with_pool(
        pool,
        NanoIdGenerator::new(),
        BatcherConfig::builder()
            .flush_interval(Duration::from_secs(60))
            .build(),
    )
    .await
    .unwrap();

    let id = repo.store("u1", "https://a.com").await.unwrap().into_id();
    repo.unstore("u1", vec![id.clone()]).await.unwrap();
    repo.close().await.unwrap();

    assert!(matches!(
        repo.unstore("u1", vec![id.clone()]).await,
        Err(RepositoryError::StorageUnavailable(_))
    ));
    assert!(repo.ping().await.is_err());

    assert_eq!(
        fixture.repo.restore(&id).await,
        Err(RepositoryError::Deleted(id))
    );
}
