use chrono::Utc;
use cohort_core::model::{Attributes, Preference, RuleSpec};
use cohort_core::{
    Engine, EngineConfig, EngineError, GroupingSessionRequest, SelectionRequest,
    SelectionSessionRequest,
};
use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};

use generators::*;

fn grouping_engine(shape: GroupingShape, rng: &mut StdRng) -> (Engine, String) {
    let engine = Engine::open_in_memory(EngineConfig::default()).expect("engine");
    let session = engine
        .create_grouping_session_with(
            &GroupingSessionRequest {
                host_id: HOST.into(),
                name: "prop".into(),
                group_names: (0..shape.groups).map(|i| format!("G{i}")).collect(),
                max_group_size: shape.max_group_size,
                fields: vec!["team".into(), "gender".into()],
                rules: vec![
                    RuleSpec {
                        field_key: "team".into(),
                        cap: shape.team_cap,
                    },
                    RuleSpec {
                        field_key: "female".into(),
                        cap: shape.female_cap,
                    },
                ],
                reveal_immediately: true,
                expiry_minutes: None,
            },
            Utc::now(),
            rng,
        )
        .expect("create session");
    (engine, session.code)
}

/// Whether a member with `attrs` could legally be added to a group whose
/// current members are `occupants`.
fn fits(shape: GroupingShape, occupants: &[Attributes], attrs: &Attributes) -> bool {
    if occupants.len() >= shape.max_group_size {
        return false;
    }
    if let Some(team) = attrs.get("team").filter(|t| !t.trim().is_empty()) {
        let same_team = occupants
            .iter()
            .filter(|o| o.get("team") == Some(team))
            .count();
        if same_team + 1 > shape.team_cap {
            return false;
        }
    }
    if is_female(attrs) {
        let females = occupants.iter().filter(|o| is_female(o)).count();
        if females + 1 > shape.female_cap {
            return false;
        }
    }
    true
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn joins_respect_capacity_and_rules(
        shape in arb_grouping_shape(),
        joiners in arb_joiners(),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (engine, code) = grouping_engine(shape, &mut rng);
        let now = Utc::now();

        let mut placed = 0;
        for (i, attrs) in joiners.iter().enumerate() {
            match engine.join_with(&code, &format!("m{i}"), attrs, now, &mut rng) {
                Ok(_) => placed += 1,
                Err(EngineError::NoEligibleGroup) => {
                    // Rejection is only allowed when no group could take the member.
                    let roster = engine.roster(&code, HOST).expect("roster");
                    for group in &roster.groups {
                        let occupants: Vec<Attributes> =
                            group.members.iter().map(|m| m.attributes.clone()).collect();
                        prop_assert!(
                            !fits(shape, &occupants, attrs),
                            "member {attrs:?} rejected although {} could take it",
                            group.group.name
                        );
                    }
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }

        let roster = engine.roster(&code, HOST).expect("roster");
        prop_assert_eq!(roster.member_count(), placed);
        for group in &roster.groups {
            prop_assert!(group.members.len() <= shape.max_group_size);

            let females = group.members.iter().filter(|m| is_female(&m.attributes)).count();
            prop_assert!(females <= shape.female_cap);

            for team in ["red", "blue", "green"] {
                let same_team = group
                    .members
                    .iter()
                    .filter(|m| m.attributes.get("team").map(String::as_str) == Some(team))
                    .count();
                prop_assert!(same_team <= shape.team_cap);
            }
        }
    }

    #[test]
    fn selection_reaches_exact_count(
        (females, males, pre_selected, requested, cap) in arb_selection_case(),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let engine = Engine::open_in_memory(EngineConfig::default()).expect("engine");
        let session = engine
            .create_selection_session_with(
                &SelectionSessionRequest {
                    host_id: HOST.into(),
                    name: "prop".into(),
                    description: None,
                    identifier_label: "ID".into(),
                    fields: vec!["gender".into()],
                    rules: vec![RuleSpec { field_key: "female".into(), cap }],
                    expiry_minutes: None,
                },
                Utc::now(),
                &mut rng,
            )
            .expect("create session");
        let code = session.code;
        let now = Utc::now();

        for i in 0..females {
            let attrs = Attributes::from([("gender".to_string(), "female".to_string())]);
            engine.join_pool_at(&code, &format!("f{i}"), &attrs, now).expect("join");
        }
        for i in 0..males {
            let attrs = Attributes::from([("gender".to_string(), "male".to_string())]);
            engine.join_pool_at(&code, &format!("m{i}"), &attrs, now).expect("join");
        }

        let pool = females + males;
        let already = pre_selected.min(pool);
        if already > 0 {
            let warmup = SelectionRequest { requested_count: already, preference: None };
            engine
                .select_with(&code, HOST, &warmup, now, &mut rng)
                .expect("warm-up selection");
        }
        let already_females = engine
            .list_selected(&code, HOST)
            .expect("list")
            .iter()
            .filter(|d| is_female(&d.attributes))
            .count();

        let request = SelectionRequest {
            requested_count: requested,
            preference: Some(Preference { field: "gender".into(), value: "female".into() }),
        };
        let outcome = engine.select_with(&code, HOST, &request, now, &mut rng);

        if already >= requested {
            let is_already_at_count =
                matches!(outcome, Err(EngineError::AlreadyAtOrAboveRequestedCount { .. }));
            prop_assert!(is_already_at_count);
            return Ok(());
        }
        if pool < requested {
            let is_insufficient = matches!(outcome, Err(EngineError::InsufficientPool { .. }));
            prop_assert!(is_insufficient);
            prop_assert_eq!(engine.list_selected(&code, HOST).expect("list").len(), already);
            return Ok(());
        }

        let result = outcome.expect("selection succeeds");
        prop_assert_eq!(result.selected_count, requested);
        prop_assert_eq!(result.preferential_count + result.random_count, requested);
        prop_assert_eq!(result.member_identifiers.len(), requested);

        let listed = engine.list_selected(&code, HOST).expect("list");
        prop_assert_eq!(listed.len(), requested);

        prop_assert!(result.preferential_count <= cap);

        // Once the cap is reached the random draw skips preferred members,
        // unless the others run out.
        let cap_reached = already_females + result.preferential_count >= cap;
        let unselected_males = males - (already - already_females);
        let remaining_after_preferential = requested - already - result.preferential_count;
        if cap_reached && unselected_males >= remaining_after_preferential {
            let selected_females = listed.iter().filter(|d| is_female(&d.attributes)).count();
            prop_assert_eq!(selected_females, already_females + result.preferential_count);
        }
    }
}
