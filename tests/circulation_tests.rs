//! Circulation ledger integration tests

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use circulation_server::{
    error::{AppError, ValidationError},
    models::{Book, BorrowAction, HistoryEvent, ItemId, Role, User, UserId},
    repository::{
        items::ItemsRepository, users::UsersRepository, FileLedger, LedgerError, LedgerStore,
        MemoryLedger, Repository,
    },
    services::{
        availability::fold_events,
        circulation::CirculationService,
        clock::ManualClock,
    },
};

const U1: UserId = UserId(1);
const U2: UserId = UserId(2);
const I1: ItemId = ItemId(1);
const I2: ItemId = ItemId(2);

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn books() -> ItemsRepository {
    ItemsRepository::from_books((1..=5).map(|id| Book {
        id: ItemId(id),
        title: format!("Title {}", id),
        author: "Ursula K. Le Guin".to_string(),
        genre: "Fantasy".to_string(),
        published_year: 1968 + id,
        price: Decimal::new(1250, 2),
    }))
}

fn users() -> UsersRepository {
    UsersRepository::from_users((1..=3).map(|id| User {
        id: UserId(id),
        username: format!("reader{}", id),
        role: Role::User,
    }))
}

async fn open_with(ledger: Arc<dyn LedgerStore>, clock: Arc<ManualClock>) -> CirculationService {
    let repository = Repository::new(Arc::new(books()), Arc::new(users()), ledger);
    CirculationService::open(repository, clock, Duration::days(14))
        .await
        .expect("failed to open circulation service")
}

async fn open_file(path: &Path, clock: Arc<ManualClock>) -> CirculationService {
    let ledger = FileLedger::open(path).await.expect("failed to open ledger");
    open_with(Arc::new(ledger), clock).await
}

/// Ledger whose appends take a while, and fail if `fail` is set
struct SlowLedger {
    inner: MemoryLedger,
    delay: std::time::Duration,
    fail: bool,
}

impl SlowLedger {
    fn new(fail: bool) -> Self {
        Self {
            inner: MemoryLedger::new(),
            delay: std::time::Duration::from_millis(200),
            fail,
        }
    }
}

#[async_trait]
impl LedgerStore for SlowLedger {
    async fn load_history(&self) -> Result<Vec<HistoryEvent>, LedgerError> {
        self.inner.load_history().await
    }

    async fn append(&self, event: &HistoryEvent) -> Result<(), LedgerError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(LedgerError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk unavailable",
            )));
        }
        self.inner.append(event).await
    }
}

fn assert_alternates(events: &[HistoryEvent]) {
    for (i, event) in events.iter().enumerate() {
        let expected = if i % 2 == 0 {
            BorrowAction::Borrow
        } else {
            BorrowAction::Return
        };
        assert_eq!(event.action, expected, "event {} out of order", i);
    }
}

async fn assert_state_matches_history(svc: &CirculationService, item_id: ItemId) {
    let history = svc.book_history(item_id).await;
    let folded = fold_events(&history).expect("history must fold");
    assert_eq!(folded.get(&item_id).copied(), svc.item_state(item_id).await);
    assert_alternates(&history);
}

#[tokio::test]
async fn test_second_borrow_is_rejected_and_holder_kept() {
    let clock = Arc::new(ManualClock::new(start()));
    let svc = open_with(Arc::new(MemoryLedger::new()), clock).await;

    assert!(svc.borrow_book(U1, I1).await.unwrap());
    assert!(!svc.borrow_book(U2, I1).await.unwrap());

    let borrowed = svc.borrowed_books_by_user(U1).await.unwrap();
    assert_eq!(borrowed.len(), 1);
    assert_eq!(borrowed[0].borrowed_by, Some(U1));
    assert!(borrowed[0].is_borrowed);
    assert!(svc.borrowed_books_by_user(U2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overdue_return_after_fifteen_days() {
    let clock = Arc::new(ManualClock::new(start()));
    let svc = open_with(Arc::new(MemoryLedger::new()), clock.clone()).await;

    svc.borrow_book(U1, I1).await.unwrap();
    assert_eq!(
        svc.holding(I1).await.map(|h| h.due_at),
        Some(start() + Duration::days(14))
    );
    assert!(svc.overdue_books().await.is_empty());

    clock.advance(Duration::days(15));
    let overdue: Vec<ItemId> = svc.overdue_books().await.iter().map(|i| i.id()).collect();
    assert_eq!(overdue, vec![I1]);

    svc.return_book(U1, I1).await.unwrap();
    assert!(svc.overdue_books().await.is_empty());

    let history = svc.book_history(I1).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, BorrowAction::Return);
    assert_eq!(history[1].is_overdue, Some(true));
    assert_eq!(history[1].due_at, None);
}

#[tokio::test]
async fn test_return_by_other_user_is_rejected() {
    let clock = Arc::new(ManualClock::new(start()));
    let svc = open_with(Arc::new(MemoryLedger::new()), clock).await;
    svc.borrow_book(U1, I1).await.unwrap();

    let err = svc.return_book(U2, I1).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Validation(ValidationError::NotHolder { item_id: I1, user_id: U2 })
    ));
    assert_eq!(svc.holding(I1).await.map(|h| h.borrowed_by), Some(U1));
    assert_eq!(svc.book_history(I1).await.len(), 1);
}

#[tokio::test]
async fn test_return_of_available_book_is_rejected() {
    let clock = Arc::new(ManualClock::new(start()));
    let svc = open_with(Arc::new(MemoryLedger::new()), clock).await;

    let err = svc.return_book(U1, I1).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Validation(ValidationError::NotCurrentlyBorrowed { item_id: I1 })
    ));
    assert_eq!(err.to_string(), "Validation error: Book 1 is not currently borrowed");
    assert!(svc.book_history(I1).await.is_empty());
}

#[tokio::test]
async fn test_rejected_returns_leave_no_trace() {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(MemoryLedger::new());
    let svc = open_with(ledger.clone(), clock).await;
    svc.borrow_book(U1, I1).await.unwrap();

    let before = svc.book_history(I1).await;
    assert!(matches!(
        svc.return_book(U2, I1).await,
        Err(AppError::Validation(ValidationError::NotHolder { .. }))
    ));
    assert!(matches!(
        svc.return_book(U1, I2).await,
        Err(AppError::Validation(ValidationError::NotCurrentlyBorrowed { .. }))
    ));

    assert_eq!(svc.book_history(I1).await, before);
    assert!(svc.book_history(I2).await.is_empty());
    assert_eq!(ledger.events().len(), 1);
    assert_eq!(svc.holding(I1).await.map(|h| h.borrowed_by), Some(U1));
}

#[tokio::test]
async fn test_borrow_abandoned_mid_append_still_commits() {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(SlowLedger::new(false));
    let svc = open_with(ledger.clone(), clock.clone()).await;

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(20),
        svc.borrow_book(U1, I1),
    )
    .await;
    assert!(abandoned.is_err());

    // readers wait for the commit, then see it in both index and history
    assert_eq!(svc.book_history(I1).await.len(), 1);
    assert_eq!(svc.holding(I1).await.map(|h| h.borrowed_by), Some(U1));
    assert_eq!(ledger.inner.events().len(), 1);

    svc.return_book(U1, I1).await.unwrap();

    let restarted = open_with(
        Arc::new(MemoryLedger::with_events(ledger.inner.events())),
        clock,
    )
    .await;
    assert!(restarted.holding(I1).await.is_none());
    assert_eq!(restarted.book_history(I1).await.len(), 2);
}

#[tokio::test]
async fn test_readers_never_observe_a_failing_borrow() {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(SlowLedger::new(true));
    let svc = Arc::new(open_with(ledger.clone(), clock).await);

    let borrow = tokio::spawn({
        let svc = svc.clone();
        async move { svc.borrow_book(U1, I1).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // taken while the append is in flight
    assert_eq!(svc.item_state(I1).await, None);
    assert!(matches!(borrow.await.unwrap(), Err(AppError::Ledger(_))));
    assert!(svc.holding(I1).await.is_none());
    assert!(svc.book_history(I1).await.is_empty());
    assert!(ledger.inner.events().is_empty());
}

#[tokio::test]
async fn test_unknown_book_appends_nothing() {
    let ledger = Arc::new(MemoryLedger::new());
    let svc = open_with(ledger.clone(), Arc::new(ManualClock::new(start()))).await;

    assert!(matches!(
        svc.borrow_book(U1, ItemId(404)).await,
        Err(AppError::NotFound(_))
    ));
    assert!(ledger.events().is_empty());
    assert!(matches!(
        svc.user_history(UserId(99)).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        svc.borrowed_books_by_user(UserId(99)).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_restart_rebuilds_state_from_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");
    let clock = Arc::new(ManualClock::new(start()));

    {
        let svc = open_file(&path, clock.clone()).await;
        assert!(svc.borrow_book(U1, I1).await.unwrap());
        assert!(!svc.borrow_book(U2, I1).await.unwrap());
        clock.advance(Duration::days(15));
        svc.return_book(U1, I1).await.unwrap();
        assert!(svc.borrow_book(U2, I2).await.unwrap());
    }

    let restarted = open_file(&path, clock.clone()).await;
    assert!(restarted.holding(I1).await.is_none());
    assert_eq!(
        restarted.holding(I2).await.map(|h| h.borrowed_by),
        Some(U2)
    );

    let history = restarted.book_history(I1).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].user_id, U1);
    assert_eq!(history[0].due_at, Some(start() + Duration::days(14)));
    assert_eq!(history[1].is_overdue, Some(true));

    let user_history = restarted.user_history(U2).await.unwrap();
    assert_eq!(user_history.len(), 1);
    assert_eq!(user_history[0].item_id, I2);

    // rebuilt state keeps working
    assert!(restarted.borrow_book(U1, I1).await.unwrap());
    assert_state_matches_history(&restarted, I1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_have_single_winner() {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(MemoryLedger::new());
    let svc = Arc::new(open_with(ledger.clone(), clock).await);

    let mut handles = Vec::new();
    for n in 0..32 {
        let svc = svc.clone();
        let user = UserId(n % 3 + 1);
        handles.push(tokio::spawn(async move { svc.borrow_book(user, I1).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(ledger.events().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_and_history_agree_under_concurrent_traffic() {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(MemoryLedger::new());
    let svc = Arc::new(open_with(ledger.clone(), clock).await);

    let mut handles = Vec::new();
    for n in 0..60 {
        let svc = svc.clone();
        let user = UserId(n % 3 + 1);
        let item = ItemId(n % 5 + 1);
        handles.push(tokio::spawn(async move {
            if svc.borrow_book(user, item).await.unwrap() {
                return 1;
            }
            // a refused borrow falls back to a return, which only the holder may make
            match svc.return_book(user, item).await {
                Ok(()) => 1,
                Err(AppError::Validation(
                    ValidationError::NotHolder { .. } | ValidationError::NotCurrentlyBorrowed { .. },
                )) => 0,
                Err(e) => panic!("unexpected return failure: {}", e),
            }
        }));
    }
    let mut committed = 0;
    for handle in handles {
        committed += handle.await.unwrap();
    }
    assert_eq!(ledger.events().len(), committed);

    for id in 1..=5 {
        assert_state_matches_history(&svc, ItemId(id)).await;
    }

    // the in-memory history mirrors the ledger order exactly
    let mut mirrored = Vec::new();
    for id in 1..=3 {
        mirrored.extend(svc.user_history(UserId(id)).await.unwrap());
    }
    assert_eq!(mirrored.len(), ledger.events().len());
}

#[tokio::test]
async fn test_overdue_query_is_idempotent() {
    let clock = Arc::new(ManualClock::new(start()));
    let svc = open_with(Arc::new(MemoryLedger::new()), clock.clone()).await;

    svc.borrow_book(U1, I1).await.unwrap();
    svc.borrow_book(U2, I2).await.unwrap();
    clock.advance(Duration::days(20));

    let first = svc.overdue_books().await;
    let second = svc.overdue_books().await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);

    let summary = svc.summary().await;
    assert_eq!(summary.events, 2);
    assert_eq!(summary.borrowed, 2);
    assert_eq!(summary.overdue, 2);
}

#[tokio::test]
async fn test_corrupt_ledger_fails_startup() {
    let t0 = start();
    let ledger = MemoryLedger::with_events(vec![
        HistoryEvent::borrow(U1, I1, t0, t0 + Duration::days(14)),
        HistoryEvent::borrow(U2, I1, t0, t0 + Duration::days(14)),
    ]);

    let repository = Repository::new(Arc::new(books()), Arc::new(users()), Arc::new(ledger));
    let result = CirculationService::open(
        repository,
        Arc::new(ManualClock::new(t0)),
        Duration::days(14),
    )
    .await;
    assert!(matches!(result, Err(AppError::Ledger(_))));
}
