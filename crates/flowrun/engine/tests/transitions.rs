//! Arbitrary operation sequences against the run aggregate.

use chrono::Utc;
use flowrun_engine::StateTransitionValidator;
use flowrun_types::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug)]
enum Op {
    Start,
    Suspend,
    Resume,
    Cancel,
    Complete,
    Fail,
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Suspend),
        Just(Op::Resume),
        Just(Op::Cancel),
        Just(Op::Complete),
        Just(Op::Fail),
    ]
}

fn apply(run: &mut WorkflowRun, op: Op) -> WorkflowResult<()> {
    let now = Utc::now();
    match op {
        Op::Start => run.start(now),
        Op::Suspend => run.suspend("waiting", Some(NodeId::new("n1")), now),
        Op::Resume => run.resume(BTreeMap::new(), now),
        Op::Cancel => run.cancel(now),
        Op::Complete => run.complete(BTreeMap::new(), now),
        Op::Fail => run.fail(ErrorInfo::new("E", "boom"), now),
    }
}

proptest! {
    #[test]
    fn rejected_operations_leave_the_run_untouched(ops in prop::collection::vec(any_op(), 1..24)) {
        let validator = StateTransitionValidator::new();
        let mut run = WorkflowRun::new(
            WorkflowDefinitionId::new("def"),
            TenantId::new("acme"),
            Utc::now(),
        );

        for op in ops {
            let before = run.clone();
            match apply(&mut run, op) {
                Ok(()) => {
                    prop_assert!(validator.validate(before.status, run.status).is_valid());
                    prop_assert!(!before.is_terminal());
                }
                Err(WorkflowError::InvalidStateTransition { from, .. }) => {
                    prop_assert_eq!(from, before.status);
                    prop_assert_eq!(&run, &before);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
            if before.is_terminal() {
                prop_assert_eq!(run.status, before.status);
            }
            if run.status != RunStatus::Suspended {
                prop_assert!(run.waiting_on_node_id.is_none());
            }
        }
    }
}
