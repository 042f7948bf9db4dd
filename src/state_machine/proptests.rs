//! Property-based tests for the router
//!
//! Drive the transition function with arbitrary responder behaviour and check
//! that every turn terminates within the hop bound and escalation never drops.

use super::*;
use crate::error::{ErrorKind, ErrorRecord};
use crate::escalation::{EscalationEvaluator, EscalationLevel};
use crate::responder::{default_routing_rules, HandoffTiming, ResponderReply, Role};
use crate::rules::RuleSet;
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Generators
// ============================================================================

fn arb_role() -> impl Strategy<Value = Role> {
    proptest::sample::select(Role::ALL.to_vec())
}

fn arb_level() -> impl Strategy<Value = EscalationLevel> {
    prop_oneof![
        Just(EscalationLevel::None),
        Just(EscalationLevel::Routine),
        Just(EscalationLevel::DoctorRequired),
        Just(EscalationLevel::Emergency),
    ]
}

fn arb_timing() -> impl Strategy<Value = HandoffTiming> {
    prop_oneof![Just(HandoffTiming::Now), Just(HandoffTiming::NextTurn)]
}

/// What a responder does when dispatched
#[derive(Debug, Clone)]
enum Behaviour {
    Reply {
        text: String,
        escalation: EscalationLevel,
        handoff: Option<(Role, HandoffTiming)>,
    },
    Fail,
}

fn arb_behaviour() -> impl Strategy<Value = Behaviour> {
    prop_oneof![
        4 => ("[a-zA-Z ]{0,20}", arb_level(), proptest::option::of((arb_role(), arb_timing())))
            .prop_map(|(text, escalation, handoff)| Behaviour::Reply { text, escalation, handoff }),
        1 => Just(Behaviour::Fail),
    ]
}

fn context(max_hops: u32, sticky: Option<Role>) -> RouterContext {
    RouterContext::new(
        "prop-conv",
        Arc::new(RuleSet::compile(&default_routing_rules()).unwrap()),
        Arc::new(EscalationEvaluator::default()),
    )
    .with_max_hops(max_hops)
    .with_next_responder(sticky)
}

/// Run one turn against scripted behaviours, applying escalation effects to `state`
fn run_turn(
    ctx: &RouterContext,
    text: &str,
    behaviours: &[Behaviour],
    state: &mut ConversationState,
) -> (u32, usize) {
    let mut router = RouterState::initial();
    let mut event = Event::Route {
        text: text.to_string(),
    };
    let mut dispatches = 0;
    let mut max_hops_seen = 0;
    let mut terminal_effects = 0;

    loop {
        let result = transition(&router, ctx, event).expect("valid transition");
        router = result.new_state;
        if let Some(hops) = router.hops() {
            max_hops_seen = max_hops_seen.max(hops);
        }

        let mut dispatched = None;
        for effect in result.effects {
            match effect {
                Effect::EscalateTo(level) => state.escalate(level),
                Effect::Dispatch { role, .. } => dispatched = Some(role),
                Effect::Deliver { .. } | Effect::Fallback { .. } => terminal_effects += 1,
                _ => {}
            }
        }

        event = match (&router, dispatched) {
            (RouterState::Done, _) => break,
            (RouterState::Routing { .. }, _) => Event::Route {
                text: text.to_string(),
            },
            (RouterState::Dispatched { .. }, Some(role)) => {
                let behaviour = behaviours
                    .get(dispatches)
                    .cloned()
                    .unwrap_or(Behaviour::Fail);
                dispatches += 1;
                match behaviour {
                    Behaviour::Reply {
                        text,
                        escalation,
                        handoff,
                    } => {
                        let mut reply = ResponderReply::text(role, text).with_escalation(escalation);
                        if let Some((target, when)) = handoff {
                            reply = reply.with_handoff(target, when);
                        }
                        Event::ResponderReplied { reply }
                    }
                    Behaviour::Fail => Event::ResponderFailed {
                        error: ErrorRecord::new(ErrorKind::Llm, "scripted failure"),
                    },
                }
            }
            (RouterState::Dispatched { .. }, None) => panic!("dispatched without a Dispatch effect"),
        };
    }

    (max_hops_seen, terminal_effects)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_turn_terminates_within_hop_bound(
        max_hops in 0u32..4,
        sticky in proptest::option::of(arb_role()),
        text in "[a-zA-Z ]{0,30}",
        behaviours in proptest::collection::vec(arb_behaviour(), 0..8),
    ) {
        let ctx = context(max_hops, sticky);
        let mut state = ConversationState::new("prop-conv", "t");
        let (hops, terminal) = run_turn(&ctx, &text, &behaviours, &mut state);
        prop_assert!(hops <= max_hops);
        // Exactly one of Deliver/Fallback ends every turn
        prop_assert_eq!(terminal, 1);
    }

    #[test]
    fn prop_escalation_never_decreases(
        turns in proptest::collection::vec(
            ("[a-zA-Z0-9 ]{0,30}", proptest::collection::vec(arb_behaviour(), 1..4)),
            1..6,
        ),
    ) {
        let ctx = context(2, None);
        let mut state = ConversationState::new("prop-conv", "t");
        let mut previous = state.level();
        for (text, behaviours) in &turns {
            run_turn(&ctx, text, behaviours, &mut state);
            let level = state.level();
            prop_assert!(level >= previous);
            if level.requires_human() {
                prop_assert!(state.requires_human);
            }
            previous = level;
        }
    }

    #[test]
    fn prop_delivered_text_is_unchanged(text in "[a-zA-Z][a-zA-Z .,!?]{0,40}", role in arb_role()) {
        let reply = ResponderReply::text(role, text.clone());
        let result = transition(
            &RouterState::Dispatched { role, hops: 0 },
            &context(2, None),
            Event::ResponderReplied { reply },
        ).unwrap();
        let delivered = result.effects.iter().find_map(|e| match e {
            Effect::Deliver { text, .. } => Some(text.clone()),
            _ => None,
        });
        prop_assert_eq!(delivered, Some(text));
    }
}
