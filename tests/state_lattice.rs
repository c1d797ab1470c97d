//! Whatever writers ask for, an order only ever walks the state lattice

mod common;

use common::{drain, macd_order, Harness};
use proptest::prelude::*;
use sigmatch::domain::{OrderPatch, QueueState};
use sigmatch::SigmatchError;

fn state() -> impl Strategy<Value = QueueState> {
    prop::sample::select(QueueState::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transitions_stay_on_the_lattice(requests in prop::collection::vec((state(), state()), 1..24)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let h = Harness::new();
            let order = h.repo.submit(macd_order("alice")).await.unwrap();
            let mut events = h.events();
            let mut current = QueueState::Pending;

            for (from, to) in requests {
                let result = h.repo.transition(order.id, from, to, OrderPatch::default()).await;
                match result {
                    Ok(moved) => {
                        prop_assert_eq!(from, current);
                        prop_assert!(from.can_transition_to(to));
                        prop_assert_eq!(moved.state, to);
                        current = to;
                    }
                    Err(SigmatchError::InvalidStateTransition { .. }) => {
                        prop_assert!(!from.can_transition_to(to));
                    }
                    Err(e) => {
                        prop_assert!(e.is_stale(), "unexpected error: {}", e);
                        prop_assert_ne!(from, current);
                    }
                }
                prop_assert_eq!(h.repo.get(order.id).await.unwrap().state, current);
            }

            let mut walked = QueueState::Pending;
            for event in drain(&mut events) {
                prop_assert_eq!(event.transition.from, Some(walked));
                prop_assert!(walked.can_transition_to(event.to()));
                walked = event.to();
            }
            prop_assert_eq!(walked, current);
            Ok(())
        })?;
    }

    #[test]
    fn terminal_states_have_no_exits(from in state(), to in state()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
            prop_assert!(from.valid_transitions().is_empty());
        }
        prop_assert_eq!(from.can_transition_to(to), from.valid_transitions().contains(&to));
    }
}
