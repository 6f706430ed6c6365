mod common;

use common::strategies::*;
use common::{global_domain, Recorder, TestHarness};
use notifier_core::filter::condition::negate_operator;
use notifier_core::filter::{Clause, Condition, NotificationFilter, Page, Predicate};
use notifier_core::models::{NewNotification, Scope};
use notifier_core::store::{EventStore, LeaseStore};
use notifier_core::{EventSelector, ListenOutcome, Operator, Timing};
use proptest::prelude::*;

fn comparison_strategy() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Lt),
        Just(Operator::Lte),
        Just(Operator::Gt),
        Just(Operator::Gte),
    ]
}

fn notification(id: i64, event: &str) -> notifier_core::Notification {
    NewNotification {
        scope: Scope::Global,
        scope_id: None,
        event: event.to_string(),
        trigger_date: chrono::Utc::now(),
        expiry_date: None,
        data: None,
    }
    .into_notification(id)
}

proptest! {
    /// Property: negating a comparison twice gives the comparison back
    #[test]
    fn negation_is_an_involution(operator in comparison_strategy()) {
        let negated = negate_operator(operator).unwrap();
        prop_assert_ne!(negated, operator);
        prop_assert_eq!(negate_operator(negated).unwrap(), operator);
    }

    /// Property: a condition holds unless its expression matches and its statement does not
    #[test]
    fn condition_is_an_implication(
        id in 1i64..100,
        bound in 1i64..100,
        operator in comparison_strategy(),
        guarded in any::<bool>(),
    ) {
        let row = notification(id, if guarded { "audit" } else { "other" });
        let expression = Predicate::equals("event", "audit");
        let statement = Predicate::new("id", operator, bound);
        let condition = Condition::new(expression.clone(), statement.clone()).unwrap();

        let expression_holds = Clause::Compare(expression).matches(&row).unwrap();
        let statement_holds = Clause::Compare(statement).matches(&row).unwrap();
        prop_assert_eq!(
            condition.to_clause().matches(&row).unwrap(),
            !expression_holds || statement_holds
        );
    }

    /// Property: the lease key of an event set does not depend on order or duplicates
    #[test]
    fn event_set_lease_key_is_canonical(names in event_names_strategy()) {
        let forward = EventSelector::any(names.clone()).unwrap();
        let mut reversed_names = names.clone();
        reversed_names.reverse();
        reversed_names.extend(names.iter().cloned());
        let reversed = EventSelector::any(reversed_names).unwrap();

        prop_assert_eq!(forward.lease_key(), reversed.lease_key());
        for name in &names {
            prop_assert!(forward.contains(name));
        }
    }

    /// Property: stored dates follow delay and ttl, with non-positive values ignored
    #[test]
    fn stored_dates_follow_timing((delay, ttl) in timing_strategy()) {
        let harness = TestHarness::new();
        let now = harness.now();
        let stored = tokio_test::block_on(
            harness
                .notifier
                .store_global_event("tick", &(), Timing::delayed(delay).with_ttl(ttl)),
        )
        .unwrap();

        prop_assert_eq!(stored.trigger_date, now + chrono::Duration::seconds(delay.max(0)));
        if ttl > 0 {
            prop_assert_eq!(stored.expiry_date, Some(stored.trigger_date + chrono::Duration::seconds(ttl)));
        } else {
            prop_assert_eq!(stored.expiry_date, None);
        }
    }

    /// Property: searching past a cursor returns exactly the later ids, in order
    #[test]
    fn cursor_search_returns_later_ids(count in 1usize..40, cursor in 0i64..45, chunk in 1usize..10) {
        let harness = TestHarness::new();
        let rows = tokio_test::block_on(async {
            for _ in 0..count {
                harness
                    .store
                    .save(NewNotification {
                        scope: Scope::Global,
                        scope_id: None,
                        event: "tick".to_string(),
                        trigger_date: harness.now(),
                        expiry_date: None,
                        data: None,
                    })
                    .await
                    .unwrap();
            }
            let filter = NotificationFilter::new().with("id", Clause::compare("id", Operator::Gt, cursor));
            harness.store.search(&filter, Page::first(chunk)).await.unwrap()
        });

        let expected: Vec<i64> = ((cursor + 1)..=(count as i64)).take(chunk).collect();
        prop_assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: the persisted cursor never moves backwards and ends at the last delivered id
    #[test]
    fn persisted_cursor_is_monotonic(count in 1usize..20, chunk in 1usize..5) {
        let harness = TestHarness::new();
        let (recorder, outcome, lease) = tokio_test::block_on(async {
            for _ in 0..count {
                harness.due_event("tick").await;
            }
            let mut recorder = Recorder::new(harness.store.clone(), global_domain("tick"));
            let mut listener = harness.listener("tick");
            let outcome = listener.listen(chunk, Some(&mut recorder)).await.unwrap();
            let lease = harness.store.find_lease(&global_domain("tick")).await.unwrap();
            (recorder, outcome, lease)
        });

        let delivered: Vec<i64> = recorder.batches.iter().flatten().copied().collect();
        let max_id = count as i64;
        prop_assert_eq!(delivered, (1..=max_id).collect::<Vec<_>>());
        prop_assert_eq!(recorder.batches.len(), count.div_ceil(chunk));
        prop_assert!(recorder.batches.iter().all(|batch| batch.len() <= chunk));

        prop_assert!(recorder.persisted_offsets.windows(2).all(|pair| pair[0] <= pair[1]));
        for (offset, batch) in recorder.persisted_offsets.iter().zip(&recorder.batches) {
            prop_assert!(batch.iter().all(|id| id > offset));
        }

        let lease = lease.expect("lease row persisted");
        prop_assert!(recorder.persisted_offsets.iter().all(|offset| *offset <= lease.offset));
        prop_assert_eq!(lease.offset, max_id);
        prop_assert_eq!(lease.lock_expiry_date, None);
        match outcome {
            ListenOutcome::Completed(summary) => {
                prop_assert_eq!(summary.offset, max_id);
                prop_assert_eq!(summary.notifications, count);
            }
            other => prop_assert!(false, "expected a completed session, got {:?}", other),
        }
    }
}
