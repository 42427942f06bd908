mod common;

use std::collections::HashSet;

use bson::doc;
use docguard::{memory::InMemoryStore, prelude::*};
use proptest::prelude::*;

use common::{CountingBackend, int};

fn indexes() -> IndexAdvisor {
    let mut indexes = IndexAdvisor::new();
    indexes
        .register_index(IndexDefinition::builder("items").asc("n").build())
        .unwrap();
    indexes
        .register_index(IndexDefinition::builder("items").asc("group").asc("n").build())
        .unwrap();
    indexes
}

async fn seeded<B: StoreBackend>(backend: B, values: &[Option<i32>]) -> Repository<B> {
    let repository = Repository::builder(backend).indexes(indexes()).build().unwrap();
    repository.ensure_indexes().await.unwrap();

    for value in values {
        let body = match value {
            Some(n) => doc! { "n": *n, "group": n % 2 },
            None => doc! { "group": 0 },
        };
        repository.create_raw("items", body).await.unwrap();
    }

    repository
}

async fn drain<B: StoreBackend>(repository: &Repository<B>, spec: &QuerySpec) -> Vec<Vec<StoredDocument>> {
    let mut pages = Vec::new();
    let mut cursor = None;

    loop {
        let page = repository.find_raw("items", spec, cursor.as_ref()).await.unwrap();
        let next = page.next_cursor.clone();
        pages.push(page.items);

        match next {
            Some(next) => cursor = Some(next),
            None => return pages,
        }
    }
}

fn numbers(documents: &[StoredDocument]) -> Vec<i64> {
    documents.iter().map(|document| int(document, "n")).collect()
}

#[tokio::test]
async fn pages_walk_the_ordering_and_end_without_a_cursor() {
    let repository = seeded(InMemoryStore::new(), &[Some(3), Some(1), Some(5), Some(2), Some(4)]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(2).build();

    let pages = drain(&repository, &spec).await;

    assert_eq!(
        pages.iter().map(|page| numbers(page)).collect::<Vec<_>>(),
        vec![vec![1, 2], vec![3, 4], vec![5]]
    );
}

#[tokio::test]
async fn exact_multiple_ends_on_a_full_page() {
    let repository = seeded(InMemoryStore::new(), &[Some(1), Some(2), Some(3), Some(4)]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(2).build();

    let first = repository.find_raw("items", &spec, None).await.unwrap();
    assert!(!first.is_last());

    let second = repository
        .find_raw("items", &spec, first.next_cursor.as_ref())
        .await
        .unwrap();
    assert_eq!(numbers(&second.items), vec![3, 4]);
    assert!(second.is_last());
}

#[tokio::test]
async fn duplicate_sort_values_are_split_by_id() {
    let repository = seeded(
        InMemoryStore::new(),
        &[Some(1), Some(1), Some(1), Some(2), Some(2), Some(3)],
    )
    .await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(2).build();

    let all = drain(&repository, &spec).await.concat();
    let ids = all.iter().map(|document| document.id).collect::<HashSet<_>>();

    assert_eq!(all.len(), 6);
    assert_eq!(ids.len(), 6);
    assert_eq!(numbers(&all), vec![1, 1, 1, 2, 2, 3]);
}

#[tokio::test]
async fn descending_pages_put_missing_values_last() {
    let repository = seeded(InMemoryStore::new(), &[Some(3), None, Some(1), None, Some(2)]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Desc).limit(2).build();

    let all = drain(&repository, &spec).await.concat();

    assert_eq!(all.len(), 5);
    assert_eq!(numbers(&all[..3]), vec![3, 2, 1]);
    assert!(all[3..].iter().all(|document| !document.body.contains_key("n")));
}

#[tokio::test]
async fn equality_prefix_narrows_every_page() {
    let repository = seeded(
        InMemoryStore::new(),
        &[Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7)],
    )
    .await;
    let spec = QuerySpec::builder()
        .eq("group", 1)
        .sort("n", SortDirection::Asc)
        .limit(2)
        .build();

    let pages = drain(&repository, &spec).await;

    assert_eq!(
        pages.iter().map(|page| numbers(page)).collect::<Vec<_>>(),
        vec![vec![1, 3], vec![5, 7]]
    );
}

#[tokio::test]
async fn range_filters_apply_across_pages() {
    let repository = seeded(InMemoryStore::new(), &[Some(1), Some(2), Some(3), Some(4), Some(5)]).await;
    let spec = QuerySpec::builder()
        .gt("n", 1)
        .lte("n", 4)
        .sort("n", SortDirection::Asc)
        .limit(2)
        .build();

    let all = drain(&repository, &spec).await.concat();

    assert_eq!(numbers(&all), vec![2, 3, 4]);
}

#[tokio::test]
async fn empty_result_is_a_last_page() {
    let repository = seeded(InMemoryStore::new(), &[]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).build();

    let page = repository.find_raw("items", &spec, None).await.unwrap();

    assert!(page.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn tampered_cursor_is_rejected() {
    let repository = seeded(InMemoryStore::new(), &[Some(1), Some(2), Some(3)]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(1).build();

    let page = repository.find_raw("items", &spec, None).await.unwrap();
    let token = page.next_cursor.unwrap().into_string();

    let mut forged = token.clone();
    let first = if forged.starts_with('A') { "B" } else { "A" };
    forged.replace_range(0..1, first);

    let err = repository
        .find_raw("items", &spec, Some(&Cursor::from(forged)))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidCursor(_)));

    let truncated = Cursor::from(&token[..token.len() / 2]);
    let err = repository.find_raw("items", &spec, Some(&truncated)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidCursor(_)));
}

#[tokio::test]
async fn cursor_from_another_ordering_is_rejected() {
    let repository = seeded(InMemoryStore::new(), &[Some(1), Some(2), Some(3)]).await;
    let ascending = QuerySpec::builder().sort("n", SortDirection::Asc).limit(1).build();
    let descending = QuerySpec::builder().sort("n", SortDirection::Desc).limit(1).build();

    let page = repository.find_raw("items", &ascending, None).await.unwrap();
    let err = repository
        .find_raw("items", &descending, page.next_cursor.as_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::InvalidCursor(_)));
}

#[tokio::test]
async fn signed_cursors_do_not_verify_under_another_secret() {
    let signed = |secret: &str| {
        RepositoryConfig::builder()
            .with_cursor_secret(secret)
            .build()
            .unwrap()
    };

    let store = InMemoryStore::new();
    let issuer = Repository::builder(store.clone())
        .indexes(indexes())
        .config(signed("first"))
        .build()
        .unwrap();
    let other = Repository::builder(store)
        .indexes(indexes())
        .config(signed("second"))
        .build()
        .unwrap();

    for n in 1..=3 {
        issuer.create_raw("items", doc! { "n": n, "group": 0 }).await.unwrap();
    }

    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(1).build();
    let page = issuer.find_raw("items", &spec, None).await.unwrap();

    assert!(issuer.find_raw("items", &spec, page.next_cursor.as_ref()).await.is_ok());
    assert!(matches!(
        other.find_raw("items", &spec, page.next_cursor.as_ref()).await,
        Err(RepositoryError::InvalidCursor(_))
    ));
}

#[tokio::test]
async fn unindexed_query_never_reaches_the_store() {
    let backend = CountingBackend::new();
    let repository = seeded(backend.clone(), &[Some(1)]).await;
    let spec = QuerySpec::builder().eq("color", "red").build();

    let err = repository.find_raw("items", &spec, None).await.unwrap_err();

    assert!(matches!(err, RepositoryError::UnindexedQuery { .. }));
    assert_eq!(backend.queries(), 0);
}

#[tokio::test]
async fn oversized_page_is_rejected() {
    let repository = seeded(InMemoryStore::new(), &[Some(1)]).await;
    let spec = QuerySpec::builder().sort("n", SortDirection::Asc).limit(5_000).build();

    let err = repository.find_raw("items", &spec, None).await.unwrap_err();

    assert!(matches!(err, RepositoryError::Validation(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn paging_matches_a_full_scan(
        values in proptest::collection::vec(proptest::option::weighted(0.9, 0..6i32), 0..30),
        page_size in 1..6usize,
        descending in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();

        runtime.block_on(async {
            let direction = if descending { SortDirection::Desc } else { SortDirection::Asc };
            let repository = seeded(InMemoryStore::new(), &values).await;
            let spec = QuerySpec::builder().sort("n", direction).limit(page_size).build();

            let pages = drain(&repository, &spec).await;
            let all = pages.concat();
            let ids = all.iter().map(|document| document.id).collect::<HashSet<_>>();

            assert_eq!(all.len(), values.len());
            assert_eq!(ids.len(), values.len());
            assert!(pages[..pages.len() - 1].iter().all(|page| page.len() == page_size));

            let seen = all
                .iter()
                .map(|document| document.body.get_i32("n").ok())
                .collect::<Vec<_>>();
            let mut expected = values.clone();
            expected.sort();
            if descending {
                expected.reverse();
            }
            assert_eq!(seen, expected);
        });
    }
}
