mod common;

use common::{fallback_services, register, TEST_PASSWORD};
use loyalty_service::models::TransactionKind;
use loyalty_service::services::ServiceError;

#[tokio::test]
async fn test_demo_scenario() {
    let services = fallback_services();
    assert_eq!(services.ledger.mode(), "fallback");

    let account = register(&services.identity, "demo@x.com");
    assert_eq!(account.points, 0);

    let session = services
        .identity
        .authenticate("demo@x.com", TEST_PASSWORD)
        .unwrap();
    assert_eq!(session.account.id, account.id);

    let earned = services
        .ledger
        .earn_points(&account.id, 100, "bonus")
        .await
        .unwrap();
    assert_eq!(earned.kind, TransactionKind::Earn);
    assert_eq!(earned.points, 100);
    assert_eq!(earned.account_id, account.id);
    assert_eq!(earned.description, "bonus");

    let balance = services.ledger.get_balance(&account.id).await.unwrap();
    assert_eq!(balance.points, 100);
    assert_eq!(balance.transactions, vec![earned.clone()]);

    let too_much = services.ledger.redeem_points(&account.id, 150, "too much").await;
    assert!(matches!(too_much, Err(ServiceError::InsufficientPoints)));

    let redeemed = services
        .ledger
        .redeem_points(&account.id, 40, "reward")
        .await
        .unwrap();
    assert_eq!(redeemed.kind, TransactionKind::Redeem);
    assert_eq!(redeemed.points, 40);

    let balance = services.ledger.get_balance(&account.id).await.unwrap();
    assert_eq!(balance.points, 60);
    assert_eq!(balance.transactions, vec![earned, redeemed]);

    // The directory's cached balance is the fallback source of truth
    let profile = services.identity.get_profile(&account.id).unwrap();
    assert_eq!(profile.points, 60);
}

#[tokio::test]
async fn test_earn_accumulates() {
    let services = fallback_services();
    let account = register(&services.identity, "earn@x.com");

    let mut expected = 0;
    for points in [1, 25, 300, 7] {
        services
            .ledger
            .earn_points(&account.id, points, "")
            .await
            .unwrap();
        expected += points;

        let balance = services.ledger.get_balance(&account.id).await.unwrap();
        assert_eq!(balance.points, expected);
    }
}

#[tokio::test]
async fn test_non_positive_points_rejected() {
    let services = fallback_services();
    let account = register(&services.identity, "zero@x.com");

    for points in [0, -5] {
        assert!(matches!(
            services.ledger.earn_points(&account.id, points, "").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            services.ledger.redeem_points(&account.id, points, "").await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    let balance = services.ledger.get_balance(&account.id).await.unwrap();
    assert_eq!(balance.points, 0);
    assert!(balance.transactions.is_empty());
}

#[tokio::test]
async fn test_unknown_account() {
    let services = fallback_services();

    assert!(matches!(
        services.ledger.earn_points("missing", 10, "").await,
        Err(ServiceError::NotFound)
    ));
    assert!(matches!(
        services.ledger.redeem_points("missing", 10, "").await,
        Err(ServiceError::NotFound)
    ));
    assert!(matches!(
        services.ledger.get_balance("missing").await,
        Err(ServiceError::NotFound)
    ));
    assert!(matches!(
        services.ledger.get_history("missing", 10).await,
        Err(ServiceError::NotFound)
    ));

    // A failed earn leaves nothing behind in the log
    assert!(services.ledger.backend().local_log().list("missing").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_redeem_does_not_mutate() {
    let services = fallback_services();
    let account = register(&services.identity, "nomutate@x.com");
    services.ledger.earn_points(&account.id, 50, "").await.unwrap();

    let before = services.ledger.get_balance(&account.id).await.unwrap();
    let result = services.ledger.redeem_points(&account.id, 51, "").await;
    let after = services.ledger.get_balance(&account.id).await.unwrap();

    assert!(matches!(result, Err(ServiceError::InsufficientPoints)));
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_history_returns_most_recent_entries() {
    let services = fallback_services();
    let account = register(&services.identity, "history@x.com");

    for points in 1..=5 {
        services
            .ledger
            .earn_points(&account.id, points, &format!("earn {}", points))
            .await
            .unwrap();
    }

    let history = services.ledger.get_history(&account.id, 3).await.unwrap();
    let points: Vec<i64> = history.iter().map(|tx| tx.points).collect();
    assert_eq!(points, vec![3, 4, 5]);

    let all = services.ledger.get_history(&account.id, 200).await.unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_history_limit_bounds() {
    let services = fallback_services();
    let account = register(&services.identity, "limits@x.com");

    for limit in [0, 201] {
        assert!(matches!(
            services.ledger.get_history(&account.id, limit).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemptions_single_winner() {
    let services = fallback_services();
    let account = register(&services.identity, "race@x.com");
    services
        .ledger
        .earn_points(&account.id, 100, "seed")
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = services.ledger.clone();
            let id = account.id.clone();
            tokio::spawn(async move { ledger.redeem_points(&id, 100, "all in").await })
        })
        .collect();

    let mut successes = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(ServiceError::InsufficientPoints) => insufficient += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(insufficient, 15);

    let balance = services.ledger.get_balance(&account.id).await.unwrap();
    assert_eq!(balance.points, 0);
    assert_eq!(balance.transactions.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_earn_and_redeem_never_negative() {
    let services = fallback_services();
    let account = register(&services.identity, "mixed@x.com");

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let ledger = services.ledger.clone();
            let id = account.id.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.earn_points(&id, 10, "").await
                } else {
                    ledger.redeem_points(&id, 15, "").await
                }
            })
        })
        .collect();

    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(ServiceError::InsufficientPoints) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    // Replaying the log reproduces the cached balance exactly
    let balance = services.ledger.get_balance(&account.id).await.unwrap();
    let replayed: i64 = balance.transactions.iter().map(|tx| tx.signed_points()).sum();
    assert_eq!(balance.points, replayed);
    assert!(balance.points >= 0);

    let mut running = 0;
    for tx in &balance.transactions {
        running += tx.signed_points();
        assert!(running >= 0, "log replays through a negative balance");
    }
}
